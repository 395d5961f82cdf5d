//! Qualitative feedback synthesis for a personality.
//!
//! Pulls the candidate's recent reasoned votes from the vote store and has
//! the chairman model distill them into a constructive report. Shared by
//! the feedback endpoint and personality evolution.

use concord_config::prompts::fill_template;
use concord_domain::{ChatMessage, Result};
use concord_upstream::QueryOptions;

use crate::state::AppState;

pub const NO_FEEDBACK: &str = "No qualitative feedback available.";

pub async fn generate_feedback_summary(
    state: &AppState,
    org_id: &str,
    personality_name: &str,
) -> Result<String> {
    // The callers pass a display name; resolve it to an id when possible so
    // the query hits the candidate index.
    let active = state.config.active_personalities(org_id)?;
    let target_id = active
        .iter()
        .find(|p| p.name == personality_name)
        .map(|p| p.id.clone());

    let snippets = state
        .votes
        .feedback_snippets(org_id, target_id.as_deref(), personality_name)?;
    if snippets.is_empty() {
        return Ok(NO_FEEDBACK.to_owned());
    }

    let prompts = state.config.load_system_prompts(org_id)?;
    let models = state.config.load_models_config(org_id)?;
    let prompt = fill_template(
        &prompts.feedback_synthesis.value,
        &[
            ("personality_name", personality_name),
            ("feedback_text", snippets.join("\n").as_str()),
        ],
    );

    let ctx = state.tenant_context(org_id)?;
    let response = state
        .upstream
        .query(
            &models.chairman_model,
            &[ChatMessage::user(prompt)],
            &ctx.api_key,
            &ctx.base_url,
            QueryOptions::default(),
        )
        .await;

    Ok(match response {
        Some(completion) => completion.content,
        None => "Failed to generate summary.".to_owned(),
    })
}
