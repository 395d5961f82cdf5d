//! Strategy-based Stage 3: consensus synthesis with attribution.
//!
//! Instead of the chairman's vote table, a named strategy prompt receives
//! the raw proposals and peer reviews and is expected to emit a final
//! answer plus a JSON contributor block, which is parsed out via the
//! attribution parser.

use std::sync::Arc;

use concord_config::ConfigStore;
use concord_domain::{ChatMessage, Result};
use concord_upstream::{QueryOptions, UpstreamClient};

use crate::attribution::parse_attribution;
use crate::engine::TenantContext;
use crate::types::{Stage1Result, Stage2Result, Stage3Result};

pub const CONSENSUS_FAILED: &str = "Error: Failed to generate consensus.";

/// Synthesize the final answer with the active (or overridden) consensus
/// strategy. Returns the cleaned answer and the extracted contributor list,
/// each contributor tagged with the strategy id.
pub async fn synthesize_consensus(
    upstream: &Arc<UpstreamClient>,
    config: &ConfigStore,
    stage1: &[Stage1Result],
    stage2: &[Stage2Result],
    ctx: &TenantContext,
    strategy_override: Option<&str>,
) -> Result<Stage3Result> {
    let (strategy_name, prompt_template) = match strategy_override {
        Some(name) => (name.to_owned(), config.load_consensus_prompt(name)?),
        None => config.active_consensus_prompt(&ctx.org_id)?,
    };

    tracing::info!(strategy = %strategy_name, "synthesizing consensus");

    let full_context = build_evidence(stage1, stage2);
    let system_prompt = prompt_template.replace("{count}", &stage1.len().to_string());

    let models = config.load_models_config(&ctx.org_id)?;
    let chairman_model = models.chairman_model;

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(full_context),
    ];

    let response = upstream
        .query(
            &chairman_model,
            &messages,
            &ctx.api_key,
            &ctx.base_url,
            QueryOptions::default(),
        )
        .await;

    let Some(completion) = response else {
        return Ok(Stage3Result {
            model: chairman_model,
            response: CONSENSUS_FAILED.into(),
            contributors: Vec::new(),
        });
    };

    let (final_answer, mut contributors) = parse_attribution(&completion.content);
    for item in &mut contributors {
        if let Some(obj) = item.as_object_mut() {
            obj.insert(
                "strategy".into(),
                serde_json::Value::String(strategy_name.clone()),
            );
        }
    }

    Ok(Stage3Result {
        model: chairman_model,
        response: final_answer,
        contributors,
    })
}

/// The evidence pack handed to the strategy prompt: proposals with their
/// identities, then the raw peer reviews with a veto-flag heuristic.
fn build_evidence(stage1: &[Stage1Result], stage2: &[Stage2Result]) -> String {
    let mut lines = Vec::new();

    lines.push("### SECTION A: PROPOSALS (The Options) ###".to_owned());
    for res in stage1 {
        lines.push(format!(
            "\n--- PROPOSAL FROM {} (ID: {}) ---",
            res.personality_name, res.personality_id
        ));
        lines.push(res.response.clone());
    }

    lines.push("\n### SECTION B: PEER REVIEWS (The Critique) ###".to_owned());
    for res in stage2 {
        lines.push(format!("\n--- REVIEW BY {} ---", res.personality_name));
        lines.push(res.ranking.clone());

        let lowered = res.ranking.to_lowercase();
        if lowered.contains("fatal flaw") || lowered.contains("critical risk") {
            lines.push("    *** VETO FLAGS DETECTED IN THIS REVIEW ***".to_owned());
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(id: &str, text: &str) -> Stage1Result {
        Stage1Result {
            model: format!("m-{id}"),
            response: text.into(),
            personality_id: id.into(),
            personality_name: format!("P{id}"),
        }
    }

    fn review(id: &str, text: &str) -> Stage2Result {
        Stage2Result {
            model: format!("m-{id}"),
            personality_id: id.into(),
            personality_name: format!("P{id}"),
            ranking: text.into(),
            parsed_ranking: vec![],
        }
    }

    #[test]
    fn evidence_has_both_sections_with_identities() {
        let text = build_evidence(
            &[proposal("p1", "use a heap")],
            &[review("p2", "the heap is fine")],
        );
        assert!(text.contains("### SECTION A: PROPOSALS (The Options) ###"));
        assert!(text.contains("--- PROPOSAL FROM Pp1 (ID: p1) ---"));
        assert!(text.contains("### SECTION B: PEER REVIEWS (The Critique) ###"));
        assert!(text.contains("--- REVIEW BY Pp2 ---"));
        assert!(!text.contains("VETO FLAGS"));
    }

    #[test]
    fn veto_heuristic_flags_fatal_language() {
        let text = build_evidence(
            &[],
            &[review("p2", "This has a FATAL FLAW in the locking")],
        );
        assert!(text.contains("*** VETO FLAGS DETECTED IN THIS REVIEW ***"));

        let text = build_evidence(&[], &[review("p3", "there is a critical risk here")]);
        assert!(text.contains("VETO FLAGS"));
    }
}
