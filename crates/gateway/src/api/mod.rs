//! API surface: route table and handler modules.

pub mod config;
pub mod conversations;
pub mod message;
pub mod models;
pub mod packs;
pub mod voting;

use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        // Conversations & turns
        .route(
            "/api/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route(
            "/api/conversations/:id",
            get(conversations::get_one).delete(conversations::delete),
        )
        .route("/api/conversations/:id/message", post(message::send))
        .route(
            "/api/conversations/:id/message/stream",
            post(message::send_stream),
        )
        // Upstream catalog
        .route("/api/models", get(models::list))
        // Voting & rankings
        .route("/api/admin/stats/voting", get(voting::history))
        .route("/api/admin/league-table", get(voting::league_table))
        .route(
            "/api/admin/instance/league-table",
            get(voting::instance_league_table),
        )
        .route("/api/admin/feedback-summary", post(voting::feedback_summary))
        // Tenant configuration
        .route(
            "/api/config/system-prompts",
            get(config::get_system_prompts).put(config::put_system_prompt),
        )
        .route(
            "/api/config/models",
            get(config::get_models).put(config::put_model),
        )
        .route("/api/config/personalities", get(config::list_personalities))
        .route(
            "/api/config/personalities/active",
            get(config::list_active_personalities),
        )
        .route(
            "/api/config/personalities/evolve",
            post(config::evolve_personalities),
        )
        .route(
            "/api/config/personalities/:id",
            put(config::put_personality).delete(config::delete_personality),
        )
        .route("/api/config/api", put(config::put_api_config))
        .route(
            "/api/config/consensus-strategies",
            get(config::list_strategies),
        )
        // Packs
        .route("/api/packs", get(packs::list).post(packs::create))
        .route("/api/packs/active", get(packs::active))
        .route("/api/packs/:id/apply", post(packs::apply))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "concord" }))
}
