//! Model catalog listing for the caller's tenant.

use axum::extract::State;
use axum::Json;

use concord_upstream::ModelInfo;

use crate::auth::Identity;
use crate::errors::ApiResult;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> ApiResult<Json<Vec<ModelInfo>>> {
    let ctx = state.tenant_context(&caller.org_id)?;
    let models = state.upstream.list_models(&ctx.api_key, &ctx.base_url).await;
    Ok(Json(models))
}
