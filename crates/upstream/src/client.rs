//! One-shot chat completions against an OpenAI-compatible endpoint.
//!
//! The client is best-effort by contract: any permanent failure is reported
//! as `None`, never raised, so that sibling calls in the same council stage
//! can still succeed. Transient failures (connect/read timeout, HTTP 429,
//! HTTP 5xx) are retried with jittered exponential back-off up to
//! `LLM_MAX_RETRIES` attempts inclusive of the first.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use concord_domain::{ChatMessage, Settings};

use crate::backoff::RetryBackoff;
use crate::catalog::{self, CatalogCache, ModelInfo};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overall timeout in seconds. `None` uses the configured default.
    pub timeout: Option<f64>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
}

/// A successful chat completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Provider-specific reasoning payload, passed through untouched.
    pub reasoning_details: Option<Value>,
}

/// Outcome of a single HTTP attempt, used to drive the retry loop.
enum Attempt {
    Success(Completion),
    Transient(String),
    Permanent(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared upstream client. One instance per process; the semaphore bounds
/// outbound requests across every in-flight session.
pub struct UpstreamClient {
    http: reqwest::Client,
    permits: Arc<Semaphore>,
    max_retries: u32,
    default_timeout: f64,
    backoff: RetryBackoff,
    catalog: CatalogCache,
}

impl UpstreamClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1))),
            max_retries: settings.llm_max_retries.max(1),
            default_timeout: settings.llm_request_timeout,
            backoff: RetryBackoff::default(),
            catalog: CatalogCache::default(),
        }
    }

    /// Replace the retry schedule (tests use near-zero delays).
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Number of free upstream permits right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    // ── Chat completions ──────────────────────────────────────────

    /// Query a single model. Returns `None` after retry exhaustion or on any
    /// permanent failure; the error is logged with model id and attempt
    /// count and never crosses this boundary.
    pub async fn query(
        &self,
        model: &str,
        messages: &[ChatMessage],
        api_key: &str,
        base_url: &str,
        opts: QueryOptions,
    ) -> Option<Completion> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("upstream semaphore closed");

        let timeout = Duration::from_secs_f64(opts.timeout.unwrap_or(self.default_timeout));

        let mut payload = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temp) = opts.temperature {
            payload["temperature"] = serde_json::json!(temp);
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.execute(base_url, api_key, &payload, timeout).await {
                Attempt::Success(completion) => {
                    tracing::debug!(model, attempts, "upstream query succeeded");
                    return Some(completion);
                }
                Attempt::Permanent(reason) => {
                    tracing::error!(model, attempts, reason = %reason, "upstream query failed permanently");
                    return None;
                }
                Attempt::Transient(reason) => {
                    if attempts >= self.max_retries {
                        tracing::error!(
                            model,
                            attempts,
                            reason = %reason,
                            "upstream query failed after retries"
                        );
                        return None;
                    }
                    let delay = self.backoff.delay_for_attempt(attempts - 1);
                    tracing::debug!(model, attempts, reason = %reason, delay_ms = delay.as_millis() as u64, "retrying upstream query");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute(
        &self,
        base_url: &str,
        api_key: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Attempt {
        let response = self
            .http
            .post(base_url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(payload)
            .timeout(timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Attempt::Transient(e.to_string());
            }
            Err(e) => return Attempt::Permanent(e.to_string()),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Attempt::Transient(format!("HTTP {}", status.as_u16()));
        }
        if !status.is_success() {
            return Attempt::Permanent(format!("HTTP {}", status.as_u16()));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return Attempt::Permanent(format!("invalid JSON body: {e}")),
        };

        match parse_completion(&body) {
            Some(completion) => Attempt::Success(completion),
            None => Attempt::Permanent("no choices in response".into()),
        }
    }

    // ── Model catalog ─────────────────────────────────────────────

    /// List the models offered at `base_url`, cached per base URL for the
    /// catalog TTL. Returns an empty list on failure.
    pub async fn list_models(&self, api_key: &str, base_url: &str) -> Vec<ModelInfo> {
        if let Some(models) = self.catalog.get(base_url) {
            return models;
        }

        let models_url = catalog::models_url(base_url);
        tracing::info!(url = %models_url, "fetching model catalog");

        match self.fetch_models(&models_url, api_key).await {
            Some(models) => {
                self.catalog.insert(base_url, models.clone());
                models
            }
            None => Vec::new(),
        }
    }

    /// Catalog fetches use a shorter retry budget than completions: the
    /// listing is advisory and callers tolerate an empty result.
    async fn fetch_models(&self, models_url: &str, api_key: &str) -> Option<Vec<ModelInfo>> {
        const CATALOG_ATTEMPTS: u32 = 3;
        const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = self
                .http
                .get(models_url)
                .bearer_auth(api_key)
                .timeout(CATALOG_TIMEOUT)
                .send()
                .await;

            let retryable = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(body) => return Some(catalog::parse_models(&body)),
                            Err(e) => {
                                tracing::error!(error = %e, "model catalog body unreadable");
                                return None;
                            }
                        }
                    }
                    status.as_u16() == 429 || status.is_server_error()
                }
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            if !retryable || attempts >= CATALOG_ATTEMPTS {
                tracing::error!(url = %models_url, attempts, "model catalog fetch failed");
                return None;
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempts - 1)).await;
        }
    }
}

/// Extract `choices[0].message` from a chat-completions body.
fn parse_completion(body: &Value) -> Option<Completion> {
    let message = body.get("choices")?.as_array()?.first()?.get("message")?;
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let reasoning_details = message.get("reasoning_details").cloned().filter(|v| !v.is_null());
    Some(Completion {
        content,
        reasoning_details,
    })
}
