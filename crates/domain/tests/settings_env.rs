//! Environment-variable settings resolution.
//!
//! Kept to a single test function: env vars are process-global, so
//! splitting these assertions across tests would race under the parallel
//! test runner.

use concord_domain::Settings;

#[test]
fn env_overrides_and_malformed_values() {
    std::env::set_var("MAX_CONCURRENT_REQUESTS", "9");
    std::env::set_var("LLM_REQUEST_TIMEOUT", "30.5");
    std::env::set_var("LLM_MAX_RETRIES", "not-a-number");
    std::env::set_var("LLM_API_URL", "https://llm.internal/v1/chat/completions");
    std::env::set_var("LLM_API_KEY", "sk-test");
    std::env::set_var("DATA_DIR", "/srv/concord-data");
    std::env::set_var("ENVIRONMENT", "production");

    let settings = Settings::from_env();
    assert_eq!(settings.max_concurrent_requests, 9);
    assert_eq!(settings.llm_request_timeout, 30.5);
    // Malformed values fall back to the default.
    assert_eq!(settings.llm_max_retries, 3);
    assert_eq!(settings.llm_api_url, "https://llm.internal/v1/chat/completions");
    assert_eq!(settings.llm_api_key.as_deref(), Some("sk-test"));
    assert_eq!(settings.data_dir, std::path::PathBuf::from("/srv/concord-data"));
    assert!(settings.is_production());

    // An empty key counts as unset.
    std::env::set_var("LLM_API_KEY", "");
    assert!(Settings::from_env().llm_api_key.is_none());

    for key in [
        "MAX_CONCURRENT_REQUESTS",
        "LLM_REQUEST_TIMEOUT",
        "LLM_MAX_RETRIES",
        "LLM_API_URL",
        "LLM_API_KEY",
        "DATA_DIR",
        "ENVIRONMENT",
    ] {
        std::env::remove_var(key);
    }
}
