//! The council engine: Propose → Rank → Synthesize.
//!
//! Each stage fans out one upstream call per active personality with
//! wait-all semantics; a failed call yields a hole that is dropped from the
//! stage's results without cancelling its siblings. Result order is always
//! the personality-resolution order, never completion order.

use std::sync::Arc;

use concord_config::personalities::format_personality_prompt;
use concord_config::prompts::fill_template;
use concord_config::{ConfigStore, Personality, SystemPrompts};
use concord_domain::{ChatMessage, Error, Result};
use concord_upstream::{QueryOptions, UpstreamClient};

use crate::consensus;
use crate::history::{build_llm_history, build_message_chain, time_instructions};
use crate::ranking::{
    calculate_aggregate_rankings, parse_ranking_from_text, FINAL_RANKING_MARKER,
    RESPONSE_LABEL_PREFIX,
};
use crate::types::{
    AggregateRanking, LabelMap, LabelTarget, Stage1Result, Stage2Result, Stage3Result,
    TranscriptMessage,
};

/// Fixed synthesis text when Stage 1 produces nothing.
pub const ALL_MODELS_FAILED: &str = "All models failed to respond. Please try again.";
/// Fixed synthesis text when the chairman call fails.
pub const SYNTHESIS_FAILED: &str = "Error: Unable to generate final synthesis.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs & outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything tenant-specific a turn needs: the tenant id plus resolved
/// upstream credentials.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub org_id: String,
    pub api_key: String,
    pub base_url: String,
}

/// How Stage 3 synthesizes the final answer.
#[derive(Debug, Clone, Default)]
pub enum SynthesisMode {
    /// The chairman prompt over proposals + detailed votes.
    #[default]
    Chairman,
    /// A named consensus strategy with contributor attribution.
    /// `None` uses the tenant's active strategy.
    Consensus { strategy: Option<String> },
}

/// The complete result of one council turn.
#[derive(Debug, Clone)]
pub struct CouncilOutcome {
    pub stage1: Vec<Stage1Result>,
    pub stage2: Vec<Stage2Result>,
    pub stage3: Stage3Result,
    pub label_map: LabelMap,
    pub aggregate_rankings: Vec<AggregateRanking>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CouncilEngine {
    upstream: Arc<UpstreamClient>,
    config: ConfigStore,
}

impl CouncilEngine {
    pub fn new(upstream: Arc<UpstreamClient>, config: ConfigStore) -> Self {
        Self { upstream, config }
    }

    /// Run the complete three-stage protocol for one turn.
    pub async fn run_full(
        &self,
        user_query: &str,
        messages: &[TranscriptMessage],
        ctx: &TenantContext,
        mode: SynthesisMode,
    ) -> Result<CouncilOutcome> {
        tracing::info!(org_id = %ctx.org_id, "starting council turn");
        let history = build_llm_history(messages);

        let stage1 = self.stage1_collect(user_query, &history, ctx).await?;
        if stage1.is_empty() {
            tracing::warn!(org_id = %ctx.org_id, "stage 1 produced no responses, short-circuiting");
            return Ok(CouncilOutcome {
                stage1: Vec::new(),
                stage2: Vec::new(),
                stage3: Stage3Result {
                    model: "error".into(),
                    response: ALL_MODELS_FAILED.into(),
                    contributors: Vec::new(),
                },
                label_map: LabelMap::new(),
                aggregate_rankings: Vec::new(),
            });
        }

        let label_map = anonymize(&stage1);
        let stage2 = self
            .stage2_collect(user_query, &stage1, &label_map, &history, ctx)
            .await?;
        let aggregate_rankings = calculate_aggregate_rankings(&stage2, &label_map);

        let stage3 = match mode {
            SynthesisMode::Chairman => {
                self.stage3_synthesize(user_query, &stage1, &stage2, &label_map, &history, ctx)
                    .await?
            }
            SynthesisMode::Consensus { strategy } => {
                consensus::synthesize_consensus(
                    &self.upstream,
                    &self.config,
                    &stage1,
                    &stage2,
                    ctx,
                    strategy.as_deref(),
                )
                .await?
            }
        };

        tracing::info!(org_id = %ctx.org_id, proposals = stage1.len(), votes = stage2.len(), "council turn complete");
        Ok(CouncilOutcome {
            stage1,
            stage2,
            stage3,
            label_map,
            aggregate_rankings,
        })
    }

    // ── Stage 1: Propose ──────────────────────────────────────────

    pub async fn stage1_collect(
        &self,
        user_query: &str,
        history: &[ChatMessage],
        ctx: &TenantContext,
    ) -> Result<Vec<Stage1Result>> {
        let personalities = self.config.active_personalities(&ctx.org_id)?;
        if personalities.is_empty() {
            tracing::warn!(org_id = %ctx.org_id, "no active personalities");
            return Ok(Vec::new());
        }
        let prompts = self.load_prompts(&ctx.org_id)?;

        tracing::info!(
            org_id = %ctx.org_id,
            count = personalities.len(),
            names = %personalities.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", "),
            "stage 1: collecting proposals"
        );

        let (system_time, user_time) = time_instructions();
        let user_message = format!("{user_time}\n\n{user_query}");

        let mut handles = Vec::with_capacity(personalities.len());
        for p in &personalities {
            let system_prompt = format!(
                "{}\n\n{}\n\n{}",
                prompts.base.value,
                system_time,
                format_personality_prompt(p, &prompts, true)
            );
            let chain = build_message_chain(&system_prompt, history, &user_message);
            handles.push(self.spawn_query(p, chain, ctx));
        }

        // Join in personality order: results stay deterministic while the
        // tasks themselves run in parallel.
        let mut results = Vec::new();
        for (p, handle) in personalities.iter().zip(handles) {
            match handle.await {
                Ok(Some(completion)) => {
                    tracing::debug!(personality = %p.name, "stage 1 response received");
                    results.push(Stage1Result {
                        model: p.model.clone(),
                        response: completion.content,
                        personality_id: p.id.clone(),
                        personality_name: p.name.clone(),
                    });
                }
                Ok(None) => {
                    tracing::warn!(personality = %p.name, model = %p.model, "stage 1 call failed")
                }
                Err(e) => {
                    tracing::error!(personality = %p.name, error = %e, "stage 1 task aborted")
                }
            }
        }

        tracing::info!(collected = results.len(), "stage 1 complete");
        Ok(results)
    }

    // ── Stage 2: Rank ─────────────────────────────────────────────

    pub async fn stage2_collect(
        &self,
        user_query: &str,
        stage1: &[Stage1Result],
        label_map: &LabelMap,
        history: &[ChatMessage],
        ctx: &TenantContext,
    ) -> Result<Vec<Stage2Result>> {
        let personalities = self.config.active_personalities(&ctx.org_id)?;
        let prompts = self.load_prompts(&ctx.org_id)?;

        tracing::info!(voters = personalities.len(), "stage 2: collecting rankings");

        // Labels zip with stage1 in collection order.
        let labels: Vec<&String> = label_map.keys().collect();
        let (system_time, user_time) = time_instructions();

        let mut handles = Vec::with_capacity(personalities.len());
        for p in &personalities {
            let filtered: Vec<String> = labels
                .iter()
                .zip(stage1)
                .filter(|(_, result)| result.personality_id != p.id)
                .map(|(label, result)| format!("{label}:\n{}", result.response))
                .collect();
            let excluded_self = filtered.len() != stage1.len();
            let peer_text = if excluded_self {
                "your peers (anonymized)"
            } else {
                "different models (anonymized)"
            };
            let responses_text = filtered.join("\n\n");

            let ranking_prompt = fill_template(
                &prompts.ranking.value,
                &[
                    ("user_query", user_query),
                    ("responses_text", &responses_text),
                    ("peer_text", peer_text),
                    ("FINAL_RANKING_MARKER", FINAL_RANKING_MARKER),
                    ("RESPONSE_LABEL_PREFIX", RESPONSE_LABEL_PREFIX),
                ],
            );

            // Rankings use the personality's own voice, but never the
            // enforced Stage 1 structure.
            let system_prompt = format!(
                "{}\n\n{}\n\n{}",
                prompts.base.value,
                system_time,
                format_personality_prompt(p, &prompts, false)
            );
            let user_message = format!("{user_time}\n\n{ranking_prompt}");
            let chain = build_message_chain(&system_prompt, history, &user_message);
            handles.push(self.spawn_query(p, chain, ctx));
        }

        let mut results = Vec::new();
        for (p, handle) in personalities.iter().zip(handles) {
            match handle.await {
                Ok(Some(completion)) => {
                    let parsed = parse_ranking_from_text(&completion.content);
                    results.push(Stage2Result {
                        model: p.model.clone(),
                        personality_id: p.id.clone(),
                        personality_name: p.name.clone(),
                        ranking: completion.content,
                        parsed_ranking: parsed,
                    });
                }
                Ok(None) => {
                    tracing::warn!(personality = %p.name, model = %p.model, "stage 2 call failed")
                }
                Err(e) => {
                    tracing::error!(personality = %p.name, error = %e, "stage 2 task aborted")
                }
            }
        }

        tracing::info!(received = results.len(), "stage 2 complete");
        Ok(results)
    }

    // ── Stage 3: Synthesize ───────────────────────────────────────

    pub async fn stage3_synthesize(
        &self,
        user_query: &str,
        stage1: &[Stage1Result],
        stage2: &[Stage2Result],
        label_map: &LabelMap,
        history: &[ChatMessage],
        ctx: &TenantContext,
    ) -> Result<Stage3Result> {
        let prompts = self.load_prompts(&ctx.org_id)?;
        let models = self.config.load_models_config(&ctx.org_id)?;
        let chairman_model = models.chairman_model;

        tracing::info!(model = %chairman_model, "stage 3: synthesizing final response");

        let stage1_text = stage1
            .iter()
            .map(|r| format!("Model: {}\nResponse: {}", r.personality_name, r.response))
            .collect::<Vec<_>>()
            .join("\n\n");

        // Voter names only, never model ids, to keep the report unbiased.
        let voting_details_text = stage2
            .iter()
            .map(|res| {
                let mut block = format!("Voter: {}\n", res.personality_name);
                for (i, label) in res.parsed_ranking.iter().enumerate() {
                    let target = label_map
                        .get(label)
                        .map(|t| t.name.as_str())
                        .unwrap_or("Unknown");
                    block.push_str(&format!("   {}. {} ({})\n", i + 1, target, label));
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n");

        let chairman_prompt = fill_template(
            &prompts.chairman.value,
            &[
                ("user_query", user_query),
                ("stage1_text", &stage1_text),
                ("voting_details_text", &voting_details_text),
            ],
        );

        let (system_time, user_time) = time_instructions();
        let user_message = format!("{user_time}\n\n{chairman_prompt}");
        let chain = build_message_chain(&system_time, history, &user_message);

        let response = self
            .upstream
            .query(
                &chairman_model,
                &chain,
                &ctx.api_key,
                &ctx.base_url,
                QueryOptions::default(),
            )
            .await;

        Ok(match response {
            Some(completion) => Stage3Result {
                model: chairman_model,
                response: completion.content,
                contributors: Vec::new(),
            },
            None => Stage3Result {
                model: chairman_model,
                response: SYNTHESIS_FAILED.into(),
                contributors: Vec::new(),
            },
        })
    }

    // ── Title generation ──────────────────────────────────────────

    /// Generate a short conversation title from the first user query.
    /// Never fails: any upstream problem falls back to the default title.
    pub async fn generate_title(&self, user_query: &str, ctx: &TenantContext) -> String {
        const TITLE_TIMEOUT_SECS: f64 = 30.0;

        let (prompts, models) = match (
            self.config.load_system_prompts(&ctx.org_id),
            self.config.load_models_config(&ctx.org_id),
        ) {
            (Ok(p), Ok(m)) => (p, m),
            _ => return DEFAULT_TITLE.to_owned(),
        };

        let prompt = fill_template(&prompts.title.value, &[("user_query", user_query)]);
        let messages = vec![ChatMessage::user(prompt)];

        let response = self
            .upstream
            .query(
                &models.title_model,
                &messages,
                &ctx.api_key,
                &ctx.base_url,
                QueryOptions {
                    timeout: Some(TITLE_TIMEOUT_SECS),
                    temperature: None,
                },
            )
            .await;

        match response {
            Some(completion) => clean_title(&completion.content),
            None => DEFAULT_TITLE.to_owned(),
        }
    }

    // ── Internals ─────────────────────────────────────────────────

    fn load_prompts(&self, org_id: &str) -> Result<SystemPrompts> {
        let prompts = self.config.load_system_prompts(org_id)?;
        for (role, value) in [
            ("base", &prompts.base.value),
            ("ranking", &prompts.ranking.value),
            ("chairman", &prompts.chairman.value),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("mandatory prompt role '{role}' is empty")));
            }
        }
        Ok(prompts)
    }

    fn spawn_query(
        &self,
        personality: &Personality,
        chain: Vec<ChatMessage>,
        ctx: &TenantContext,
    ) -> tokio::task::JoinHandle<Option<concord_upstream::Completion>> {
        let upstream = self.upstream.clone();
        let model = personality.model.clone();
        let temperature = personality.temperature;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            upstream
                .query(
                    &model,
                    &chain,
                    &ctx.api_key,
                    &ctx.base_url,
                    QueryOptions {
                        timeout: None,
                        temperature,
                    },
                )
                .await
        })
    }
}

pub const DEFAULT_TITLE: &str = "New Conversation";

/// Assign labels `Response A`, `Response B`, … to Stage 1 results in
/// collection order.
pub fn anonymize(stage1: &[Stage1Result]) -> LabelMap {
    stage1
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let label = format!("{RESPONSE_LABEL_PREFIX}{}", (b'A' + i as u8) as char);
            (
                label,
                LabelTarget {
                    name: result.personality_name.clone(),
                    id: result.personality_id.clone(),
                    model: result.model.clone(),
                },
            )
        })
        .collect()
}

/// Normalize a raw title: strip surrounding quotes and whitespace, fall
/// back on empty, and clamp to 50 characters with an ellipsis.
pub fn clean_title(raw: &str) -> String {
    let title = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if title.is_empty() {
        return DEFAULT_TITLE.to_owned();
    }

    let chars: Vec<char> = title.chars().collect();
    if chars.len() > 50 {
        let mut clipped: String = chars[..47].iter().collect();
        clipped.push_str("...");
        clipped
    } else {
        title.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str) -> Stage1Result {
        Stage1Result {
            model: format!("m-{id}"),
            response: format!("r-{id}"),
            personality_id: id.into(),
            personality_name: format!("P{id}"),
        }
    }

    #[test]
    fn labels_assigned_in_collection_order() {
        let map = anonymize(&[result("p1"), result("p2"), result("p3")]);
        assert_eq!(map["Response A"].id, "p1");
        assert_eq!(map["Response B"].id, "p2");
        assert_eq!(map["Response C"].id, "p3");
    }

    #[test]
    fn label_assignment_is_deterministic() {
        let stage1 = vec![result("p2"), result("p1")];
        assert_eq!(anonymize(&stage1), anonymize(&stage1));
    }

    #[test]
    fn title_boundary_behavior() {
        assert_eq!(clean_title(&"A".repeat(50)).len(), 50);
        assert_eq!(clean_title(&"A".repeat(50)), "A".repeat(50));

        let truncated = clean_title(&"A".repeat(51));
        assert_eq!(truncated.chars().count(), 50);
        assert_eq!(truncated, format!("{}...", "A".repeat(47)));

        let long = clean_title(&"A".repeat(100));
        assert_eq!(long, format!("{}...", "A".repeat(47)));
    }

    #[test]
    fn title_quote_stripping_and_fallback() {
        assert_eq!(clean_title("\"Rust Lifetimes\""), "Rust Lifetimes");
        assert_eq!(clean_title("'Quoted'"), "Quoted");
        assert_eq!(clean_title("   "), DEFAULT_TITLE);
        assert_eq!(clean_title("\"\""), DEFAULT_TITLE);
    }
}
