//! Voting history, league tables, and the feedback summary.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use concord_store::votes::aggregate_instance;

use crate::auth::{require_admin, require_instance_admin, Identity};
use crate::errors::ApiResult;
use crate::runtime::feedback::generate_feedback_summary;
use crate::state::AppState;

// ── GET /api/admin/stats/voting ────────────────────────────────────

pub async fn history(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&caller)?;
    let usernames = state.users.usernames(&caller.org_id);
    let sessions = state.voting_log.history(&caller.org_id, &usernames)?;
    Ok(Json(json!(sessions)))
}

// ── GET /api/admin/league-table ────────────────────────────────────

pub async fn league_table(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&caller)?;
    let active = state.config.active_personalities(&caller.org_id)?;
    let table = state.votes.league_table(&caller.org_id, &active)?;
    Ok(Json(json!(table)))
}

// ── GET /api/admin/instance/league-table ───────────────────────────

pub async fn instance_league_table(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<serde_json::Value>> {
    require_instance_admin(&caller)?;

    let mut org_tables = Vec::new();
    for org_id in state.config.list_org_ids() {
        let active = state.config.active_personalities(&org_id).unwrap_or_default();
        match state.votes.league_table(&org_id, &active) {
            Ok(table) => org_tables.push(table),
            Err(e) => {
                tracing::error!(org_id = %org_id, error = %e, "skipping tenant in instance table")
            }
        }
    }
    Ok(Json(json!(aggregate_instance(&org_tables))))
}

// ── POST /api/admin/feedback-summary ───────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeedbackSummaryRequest {
    pub personality_name: String,
}

pub async fn feedback_summary(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<FeedbackSummaryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&caller)?;
    let summary =
        generate_feedback_summary(&state, &caller.org_id, &body.personality_name).await?;
    Ok(Json(json!({ "summary": summary })))
}
