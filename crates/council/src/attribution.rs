//! Contributor attribution extraction for consensus-mode answers.
//!
//! The consensus prompt asks the model to append a JSON block naming which
//! proposals contributed to the final text. The block is parsed out and
//! removed so the user sees a clean answer; any parse failure leaves the
//! response untouched.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("static regex"))
}

fn bare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)(\{\s*"contributors"\s*:\s*\[.*?\]\s*\})"#).expect("static regex")
    })
}

/// Extract the contributor block from free-form model output.
///
/// Returns `(cleaned_text, contributors)`. On any parse failure the
/// original text comes back with an empty contributor list.
pub fn parse_attribution(response_text: &str) -> (String, Vec<Value>) {
    let captures = fenced_re()
        .captures(response_text)
        .or_else(|| bare_re().captures(response_text));

    let Some(captures) = captures else {
        return (response_text.to_owned(), Vec::new());
    };

    let whole_match = captures.get(0).expect("group 0 always present").as_str();
    let json_str = captures.get(1).expect("pattern has one group").as_str();

    match serde_json::from_str::<Value>(json_str) {
        Ok(data) => {
            let contributors = data
                .get("contributors")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            let cleaned = response_text.replacen(whole_match, "", 1).trim().to_owned();
            (cleaned, contributors)
        }
        Err(_) => {
            tracing::warn!("failed to decode attribution JSON");
            (response_text.to_owned(), Vec::new())
        }
    }
}
