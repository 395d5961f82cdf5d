//! Tenant configuration endpoints: system prompts, role models,
//! personalities, upstream credentials, and the strategy catalog.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use concord_config::prompts::PromptRole;
use concord_config::{ModelsConfig, Personality, SystemPrompts};
use concord_domain::Error;

use crate::auth::{require_admin, Identity};
use crate::errors::ApiResult;
use crate::state::AppState;

// ── System prompts ─────────────────────────────────────────────────

pub async fn get_system_prompts(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<SystemPrompts>> {
    Ok(Json(state.config.load_system_prompts(&caller.org_id)?))
}

#[derive(Debug, Deserialize)]
pub struct PutPromptRequest {
    pub role: PromptRole,
    #[serde(default)]
    pub value: String,
    /// `true` reverts the role to pure inheritance.
    #[serde(default)]
    pub is_default: bool,
}

pub async fn put_system_prompt(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<PutPromptRequest>,
) -> ApiResult<Json<SystemPrompts>> {
    require_admin(&caller)?;
    state
        .config
        .save_prompt_override(&caller.org_id, body.role, &body.value, body.is_default)?;
    Ok(Json(state.config.load_system_prompts(&caller.org_id)?))
}

// ── Role models ────────────────────────────────────────────────────

pub async fn get_models(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<ModelsConfig>> {
    Ok(Json(state.config.load_models_config(&caller.org_id)?))
}

#[derive(Debug, Deserialize)]
pub struct PutModelRequest {
    /// `chairman`, `title_generation`, or `ranking`.
    pub section: String,
    /// Empty clears the override.
    #[serde(default)]
    pub model: String,
}

pub async fn put_model(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<PutModelRequest>,
) -> ApiResult<Json<ModelsConfig>> {
    require_admin(&caller)?;
    if !matches!(body.section.as_str(), "chairman" | "title_generation" | "ranking") {
        return Err(Error::Config(format!("unknown model section: {}", body.section)).into());
    }
    state
        .config
        .save_model_override(&caller.org_id, &body.section, &body.model)?;
    Ok(Json(state.config.load_models_config(&caller.org_id)?))
}

// ── Personalities ──────────────────────────────────────────────────

pub async fn list_personalities(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<Vec<Personality>>> {
    Ok(Json(state.config.all_personalities(&caller.org_id)?))
}

pub async fn list_active_personalities(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<Vec<Personality>>> {
    Ok(Json(state.config.active_personalities(&caller.org_id)?))
}

pub async fn put_personality(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
    Json(mut personality): Json<Personality>,
) -> ApiResult<Json<Personality>> {
    require_admin(&caller)?;
    personality.id = id;
    state.config.save_personality(&caller.org_id, &personality)?;
    Ok(Json(personality))
}

pub async fn delete_personality(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&caller)?;
    state.config.delete_personality(&caller.org_id, &id)?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct EvolveRequest {
    pub parent_ids: Vec<String>,
    pub name: String,
}

pub async fn evolve_personalities(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<EvolveRequest>,
) -> ApiResult<Json<Personality>> {
    require_admin(&caller)?;
    let offspring = crate::runtime::evolution::combine_personalities(
        &state,
        &caller.org_id,
        &body.parent_ids,
        &body.name,
    )
    .await?;
    Ok(Json(offspring))
}

// ── Upstream credentials ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PutApiConfigRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub async fn put_api_config(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(body): Json<PutApiConfigRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&caller)?;
    state.config.save_api_config(
        &caller.org_id,
        &state.cipher,
        body.api_key.as_deref(),
        body.base_url.as_deref(),
    )?;
    Ok(Json(json!({ "saved": true })))
}

// ── Consensus strategies ───────────────────────────────────────────

pub async fn list_strategies(
    State(state): State<AppState>,
    Identity(_caller): Identity,
) -> Json<Vec<String>> {
    Json(state.config.list_consensus_strategies())
}
