//! Runtime settings derived from the environment.

use std::path::PathBuf;

/// Default chat-completions endpoint when neither the tenant nor the
/// environment configures one.
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Process-wide runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Upper bound on simultaneously outstanding upstream requests.
    pub max_concurrent_requests: usize,
    /// Overall per-call timeout for upstream requests, in seconds.
    pub llm_request_timeout: f64,
    /// Retry attempts per upstream call, inclusive of the first.
    pub llm_max_retries: u32,
    /// Global fallback chat-completions URL.
    pub llm_api_url: String,
    /// Global fallback api key. Tenants may override with their own.
    pub llm_api_key: Option<String>,
    /// Root of all tenant and default data directories.
    pub data_dir: PathBuf,
    /// Deployment environment name; `production` tightens secret handling.
    pub environment: String,
    /// Base64-encoded 32-byte AES key for secret-at-rest encryption.
    pub encryption_key: Option<String>,
    /// Listen address for the HTTP server.
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            llm_request_timeout: 180.0,
            llm_max_retries: 3,
            llm_api_url: DEFAULT_API_URL.to_owned(),
            llm_api_key: None,
            data_dir: PathBuf::from("data"),
            environment: "development".to_owned(),
            encryption_key: None,
            bind_addr: "0.0.0.0:8001".to_owned(),
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults on
    /// absent or malformed values (malformed values are logged and ignored).
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_requests: parse_env("MAX_CONCURRENT_REQUESTS", defaults.max_concurrent_requests),
            llm_request_timeout: parse_env("LLM_REQUEST_TIMEOUT", defaults.llm_request_timeout),
            llm_max_retries: parse_env("LLM_MAX_RETRIES", defaults.llm_max_retries),
            llm_api_url: std::env::var("LLM_API_URL").unwrap_or(defaults.llm_api_url),
            llm_api_key: std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            data_dir: std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            encryption_key: std::env::var("ENCRYPTION_KEY").ok().filter(|k| !k.is_empty()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    /// Directory holding instance-wide defaults (`system-prompts.yaml`,
    /// `personalities/`, `consensus/`, `packs/`).
    pub fn defaults_dir(&self) -> PathBuf {
        self.data_dir.join("defaults")
    }

    /// Root directory for a tenant's files.
    pub fn org_dir(&self, org_id: &str) -> PathBuf {
        self.data_dir.join("organizations").join(org_id)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let s = Settings::default();
        assert_eq!(s.max_concurrent_requests, 4);
        assert_eq!(s.llm_max_retries, 3);
        assert_eq!(s.llm_request_timeout, 180.0);
        assert!(s.llm_api_url.contains("openrouter.ai"));
        assert!(!s.is_production());
    }

    #[test]
    fn org_dir_is_nested_under_data_dir() {
        let s = Settings::default();
        assert_eq!(
            s.org_dir("org-1"),
            PathBuf::from("data/organizations/org-1")
        );
    }
}
