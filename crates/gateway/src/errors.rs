//! Error-to-HTTP mapping for API handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use concord_domain::Error;

/// Wrapper so handlers can return `Result<T, ApiError>` with `?` on any
/// domain error.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::NotFound(what) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("not found: {what}") }),
            ),
            Error::Forbidden(why) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": why }),
            ),
            Error::Conflict(why) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": why }),
            ),
            Error::Validation { missing } => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "required template tags missing",
                    "missing": missing,
                }),
            ),
            Error::Config(why) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": why }),
            ),
            other => {
                tracing::error!(error = %other, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
