//! Model-catalog cache, keyed per base URL.
//!
//! Two tenants pointing at the same provider share cache validity but never
//! credentials: the api key is used for the fetch and is not part of the key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How long a fetched catalog stays valid.
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// One entry in a provider's model listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
}

struct CacheEntry {
    models: Vec<ModelInfo>,
    fetched_at: Instant,
}

/// Mutex-guarded snapshot cache. Readers clone the snapshot out.
pub struct CatalogCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::with_ttl(CACHE_TTL)
    }
}

impl CatalogCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, base_url: &str) -> Option<Vec<ModelInfo>> {
        let entries = self.entries.lock();
        let entry = entries.get(base_url)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.models.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, base_url: &str, models: Vec<ModelInfo>) {
        self.entries.lock().insert(
            base_url.to_owned(),
            CacheEntry {
                models,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// Derive the models-listing URL from a chat-completions base URL.
///
/// OpenRouter gets its fixed catalog endpoint; anything else (LiteLLM,
/// vLLM, self-hosted gateways) follows the OpenAI convention of a sibling
/// `/models` route.
pub fn models_url(base_url: &str) -> String {
    if base_url.contains("openrouter.ai") {
        "https://openrouter.ai/api/v1/models".to_owned()
    } else {
        let base = base_url.trim_end_matches('/');
        let base = base.strip_suffix("/chat/completions").unwrap_or(base);
        format!("{base}/models")
    }
}

/// Parse the `data` array of a models listing into `ModelInfo` triples.
/// Entries may be bare id strings or objects; entries without an id are
/// skipped.
pub fn parse_models(body: &Value) -> Vec<ModelInfo> {
    let raw = match body.get("data").and_then(|d| d.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    raw.iter()
        .filter_map(|m| {
            let (id, name) = match m {
                Value::String(s) => (s.clone(), s.clone()),
                _ => {
                    let id = m.get("id")?.as_str()?.to_string();
                    let name = m
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or(&id)
                        .to_string();
                    (id, name)
                }
            };
            Some(ModelInfo {
                provider: provider_from_id(&id),
                id,
                name,
            })
        })
        .collect()
}

/// `"openai/gpt-4o"` → `"openai"`; ids without a slash → `"unknown"`.
fn provider_from_id(id: &str) -> String {
    match id.split_once('/') {
        Some((prefix, _)) => prefix.to_owned(),
        None => "unknown".to_owned(),
    }
}
