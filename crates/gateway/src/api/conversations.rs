//! Conversation CRUD (reads are owner-scoped; messages are appended only
//! through the turn endpoints).

use axum::extract::{Path, State};
use axum::Json;

use concord_store::{Conversation, ConversationMetadata};

use crate::auth::Identity;
use crate::errors::ApiResult;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> Json<Vec<ConversationMetadata>> {
    Json(state.conversations.list(&caller))
}

pub async fn create(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.conversations.create(&caller)?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.conversations.get(&caller, &id)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.conversations.delete(&caller, &id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
