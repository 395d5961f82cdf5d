/// Shared error type used across all concord crates.
///
/// The gateway maps these kinds onto HTTP statuses: `NotFound` → 404,
/// `Forbidden` → 403, `Conflict` → 409, `Validation`/`Config` → 400,
/// everything else → 500.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream {model}: {message}")]
    Upstream { model: String, message: String },

    #[error("database: {0}")]
    Db(String),

    #[error("config: {0}")]
    Config(String),

    #[error("secret: {0}")]
    Secret(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed, missing template tags: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
