//! Council packs: listing, custom creation, and activation.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use concord_store::packs::PackConfig;
use concord_store::{ActiveConfig, Pack};

use crate::auth::{require_admin, Identity};
use crate::errors::ApiResult;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<Vec<Pack>>> {
    Ok(Json(state.packs.list_packs(&caller.org_id)?))
}

#[derive(Debug, Deserialize)]
pub struct CreatePackRequest {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: PackConfig,
}

pub async fn create(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<CreatePackRequest>,
) -> ApiResult<Json<Pack>> {
    require_admin(&caller)?;
    let pack = state.packs.create_custom_pack(
        &caller.org_id,
        &body.display_name,
        body.description.as_deref(),
        body.config,
    )?;
    Ok(Json(pack))
}

pub async fn apply(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<ActiveConfig>> {
    let active = state.packs.apply_pack(&caller.org_id, &caller.user_id, &id)?;
    Ok(Json(active))
}

pub async fn active(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<serde_json::Value>> {
    match state.packs.active_config(&caller.org_id, &caller.user_id)? {
        Some(active) => Ok(Json(json!(active))),
        None => Ok(Json(json!(null))),
    }
}
