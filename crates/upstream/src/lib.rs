//! Upstream LLM client: one-shot chat completions against any
//! OpenAI-compatible endpoint, with bounded concurrency, retry with
//! exponential backoff on transient failures, and a per-base-URL
//! model-catalog cache.

pub mod backoff;
pub mod catalog;
pub mod client;

pub use catalog::ModelInfo;
pub use client::{Completion, QueryOptions, UpstreamClient};
