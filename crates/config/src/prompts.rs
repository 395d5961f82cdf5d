//! System-prompt resolution and override persistence.
//!
//! Each prompt role resolves to `(value, is_default)`: the tenant override
//! when present, else the instance default, else a built-in. Override
//! locations mirror the config file layout: `base_system_prompt`,
//! `evolution_prompt`, `stage1_response_structure` and
//! `stage1_meta_structure` at top level; `chairman.prompt`,
//! `title_generation.prompt` and `ranking.prompt` nested. A legacy
//! top-level `ranking_prompt` key is honored and preferred on write.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use concord_domain::{Error, Result};

use crate::layout::ConfigStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_BASE_SYSTEM_PROMPT: &str = "You are a member of a council of \
diverse AI intelligences assembled to provide comprehensive, multi-faceted \
answers to user queries.\n\nYour goal is not just to answer the question, but \
to contribute a unique perspective to the collective discussion. You will \
later review each other's answers, so be thorough and distinct.";

pub const DEFAULT_CHAIRMAN_PROMPT: &str = "You are the Chairman of a model \
council. Multiple AI models have provided responses to a user's question, and \
then ranked each other's responses.\n\nOriginal Question: {user_query}\n\n\
STAGE 1 - Individual Responses:\n{stage1_text}\n\nSTAGE 2 - Peer Rankings \
(Detailed Votes):\n{voting_details_text}\n\nYour task is to provide a final \
response in two parts:\n\n## PART 1: COUNCIL REPORT\n- **Voting Results**: \
Create a standard MARKDOWN TABLE showing how each model voted.\n  - Columns: \
Voter, 1st Choice, 2nd Choice.\n  - **IMPORTANT**: In the table, you MUST use \
the **Personality Name** for all entries (Voter, 1st Choice, 2nd Choice).\n  \
- Do NOT include model names or IDs, as they are not provided to you.\n  - \
Ensure there is a newline after each row.\n- **Brief Rationale**: Briefly \
explain why the winner was preferred.\n\n## PART 2: FINAL ANSWER\n- Provide \
the single, comprehensive, best possible answer to the user's question.\n- \
This should be a direct answer to the user, ready to be used.\n\nBegin:";

pub const DEFAULT_TITLE_PROMPT: &str = "Generate a very short title (3-5 \
words maximum) that summarizes the following question.\nThe title should be \
concise and descriptive. Do not use quotes or punctuation in the title.\n\n\
Question: {user_query}\n\nTitle:";

pub const DEFAULT_RANKING_PROMPT: &str = "You previously answered the \
following question:\n\n{user_query}\n\nBelow are responses from \
{peer_text}:\n\n{responses_text}\n\nFirst, evaluate each response \
individually. For each response, explain what it does well and what it does \
poorly.\n\nThen produce your ranking, best first, under the marker \
{FINAL_RANKING_MARKER} as a numbered list of the form \"1. \
{RESPONSE_LABEL_PREFIX}X\".";

pub const DEFAULT_EVOLUTION_PROMPT: &str = "You are an expert AI Personality \
Architect.\nYour task is to COMBINE the traits of {parent_count} existing \
\"Parent\" personalities into a new, superior \"Offspring\" personality.\n\n\
NAME OF NEW PERSONALITY: {offspring_name}\n\nGOAL:\n- Create a coherent, \
integrated personality, not just a concatenation.\n- PRESERVE the STRENGTHS \
identified in the peer feedback for each parent.\n- MITIGATE the WEAKNESSES \
identified in the peer feedback.\n\nSOURCE MATERIAL:\n{parent_data}\n\n\
OUTPUT FORMAT:\nOutput a valid YAML object for the 'personality_prompt' \
section with EXACTLY these keys: identity_and_role, \
interpretation_of_questions, problem_decomposition, analysis_and_reasoning, \
differentiation_and_bias, tone.\n\nDo not include a markdown code fence. \
Just the raw YAML.\n\nYAML:";

pub const DEFAULT_FEEDBACK_SYNTHESIS_PROMPT: &str = "You are analyzing peer \
feedback for an AI Personality named \"{personality_name}\".\nYour task is \
to synthesize this feedback into a constructive report.\nFEEDBACK LOGS:\n\
{feedback_text}\nSynthesize:";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolved prompt set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A resolved prompt value plus its provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptEntry {
    pub value: String,
    pub is_default: bool,
}

impl PromptEntry {
    fn inherited(value: String) -> Self {
        Self {
            value,
            is_default: true,
        }
    }

    fn custom(value: String) -> Self {
        Self {
            value,
            is_default: false,
        }
    }
}

/// The full prompt map for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompts {
    pub base: PromptEntry,
    pub chairman: PromptEntry,
    pub title: PromptEntry,
    pub ranking: PromptEntry,
    pub evolution: PromptEntry,
    pub feedback_synthesis: PromptEntry,
    pub stage1_response_structure: PromptEntry,
    pub stage1_meta_structure: PromptEntry,
}

/// Prompt roles addressable by the override API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    Base,
    Chairman,
    Title,
    Ranking,
    Evolution,
    FeedbackSynthesis,
    Stage1ResponseStructure,
    Stage1MetaStructure,
}

/// Template tags that must appear in a saved override for the role.
pub fn required_tags(role: PromptRole) -> &'static [&'static str] {
    match role {
        PromptRole::Chairman => &["{user_query}", "{stage1_text}", "{voting_details_text}"],
        PromptRole::Title => &["{user_query}"],
        PromptRole::Ranking => &["{user_query}", "{responses_text}"],
        _ => &[],
    }
}

/// Reject a prompt whose required template tags are missing.
pub fn validate_prompt(role: PromptRole, value: &str) -> Result<()> {
    let missing: Vec<String> = required_tags(role)
        .iter()
        .filter(|tag| !value.contains(*tag))
        .map(|tag| (*tag).to_owned())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation { missing })
    }
}

/// Substitute `{tag}` placeholders in a template. Tags absent from the
/// template are ignored, matching how real defaults omit optional tags.
pub fn fill_template(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_owned();
    for (tag, value) in substitutions {
        out = out.replace(&format!("{{{tag}}}"), value);
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ConfigStore {
    /// Resolve the full prompt set for a tenant.
    pub fn load_system_prompts(&self, org_id: &str) -> Result<SystemPrompts> {
        let defaults = load_yaml(&self.default_system_prompts_file());
        let org = load_yaml(&self.org_system_prompts_file(org_id)?);

        let default_base = top_str(&defaults, "base_system_prompt")
            .unwrap_or_else(|| DEFAULT_BASE_SYSTEM_PROMPT.to_owned());
        let default_chairman = nested_str(&defaults, "chairman", "prompt")
            .unwrap_or_else(|| DEFAULT_CHAIRMAN_PROMPT.to_owned());
        let default_title = nested_str(&defaults, "title_generation", "prompt")
            .unwrap_or_else(|| DEFAULT_TITLE_PROMPT.to_owned());
        let default_ranking = top_str(&defaults, "ranking_prompt")
            .unwrap_or_else(|| DEFAULT_RANKING_PROMPT.to_owned());
        let default_evolution = top_str(&defaults, "evolution_prompt")
            .unwrap_or_else(|| DEFAULT_EVOLUTION_PROMPT.to_owned());
        let default_feedback = top_str(&defaults, "feedback_synthesis_prompt")
            .unwrap_or_else(|| DEFAULT_FEEDBACK_SYNTHESIS_PROMPT.to_owned());
        let default_struct_resp =
            top_str(&defaults, "stage1_response_structure").unwrap_or_default();
        let default_struct_meta = top_str(&defaults, "stage1_meta_structure").unwrap_or_default();

        let resolve_top = |key: &str, default: String| match top_str(&org, key) {
            Some(v) => PromptEntry::custom(v),
            None => PromptEntry::inherited(default),
        };
        let resolve_nested = |section: &str, default: String| {
            match nested_str(&org, section, "prompt") {
                Some(v) => PromptEntry::custom(v),
                None => PromptEntry::inherited(default),
            }
        };

        // Ranking accepts the legacy top-level key first, then the nested
        // form, then the default.
        let ranking = match top_str(&org, "ranking_prompt")
            .or_else(|| nested_str(&org, "ranking", "prompt"))
        {
            Some(v) => PromptEntry::custom(v),
            None => PromptEntry::inherited(default_ranking),
        };

        Ok(SystemPrompts {
            base: resolve_top("base_system_prompt", default_base),
            chairman: resolve_nested("chairman", default_chairman),
            title: resolve_nested("title_generation", default_title),
            ranking,
            evolution: resolve_top("evolution_prompt", default_evolution),
            feedback_synthesis: resolve_top("feedback_synthesis_prompt", default_feedback),
            stage1_response_structure: resolve_top(
                "stage1_response_structure",
                default_struct_resp,
            ),
            stage1_meta_structure: resolve_top("stage1_meta_structure", default_struct_meta),
        })
    }

    /// Persist one prompt override for a tenant.
    ///
    /// `is_default=true` removes the stored key (pure inheritance); a custom
    /// value is validated for its required template tags first.
    pub fn save_prompt_override(
        &self,
        org_id: &str,
        role: PromptRole,
        value: &str,
        is_default: bool,
    ) -> Result<()> {
        if !is_default {
            validate_prompt(role, value)?;
        }

        let path = self.org_system_prompts_file(org_id)?;
        let mut doc = load_yaml(&path).unwrap_or(Value::Mapping(Default::default()));
        if !doc.is_mapping() {
            doc = Value::Mapping(Default::default());
        }
        let map = doc.as_mapping_mut().expect("mapping ensured above");

        match role {
            PromptRole::Base => set_top(map, "base_system_prompt", value, is_default),
            PromptRole::Evolution => set_top(map, "evolution_prompt", value, is_default),
            PromptRole::FeedbackSynthesis => {
                set_top(map, "feedback_synthesis_prompt", value, is_default)
            }
            PromptRole::Stage1ResponseStructure => {
                set_top(map, "stage1_response_structure", value, is_default)
            }
            PromptRole::Stage1MetaStructure => {
                set_top(map, "stage1_meta_structure", value, is_default)
            }
            PromptRole::Chairman => set_nested(map, "chairman", "prompt", value, is_default),
            PromptRole::Title => set_nested(map, "title_generation", "prompt", value, is_default),
            PromptRole::Ranking => {
                // Clear both historical locations, then write the unified key.
                map.remove(&Value::String("ranking_prompt".into()));
                set_nested(map, "ranking", "prompt", "", true);
                if !is_default {
                    set_top(map, "ranking_prompt", value, false);
                }
            }
        }

        write_yaml(&path, &doc)
    }
}

// ── YAML helpers ───────────────────────────────────────────────────

pub(crate) fn load_yaml(path: &std::path::Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_yaml::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "unreadable YAML config file");
            None
        }
    }
}

pub(crate) fn write_yaml(path: &std::path::Path, doc: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_yaml::to_string(doc)?;
    std::fs::write(path, raw)?;
    Ok(())
}

fn top_str(doc: &Option<Value>, key: &str) -> Option<String> {
    doc.as_ref()?
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

fn nested_str(doc: &Option<Value>, section: &str, key: &str) -> Option<String> {
    doc.as_ref()?
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

fn set_top(map: &mut serde_yaml::Mapping, key: &str, value: &str, remove: bool) {
    let key = Value::String(key.to_owned());
    if remove {
        map.remove(&key);
    } else {
        map.insert(key, Value::String(value.to_owned()));
    }
}

fn set_nested(map: &mut serde_yaml::Mapping, section: &str, key: &str, value: &str, remove: bool) {
    let section_key = Value::String(section.to_owned());
    if remove {
        if let Some(existing) = map.get_mut(&section_key).and_then(|v| v.as_mapping_mut()) {
            existing.remove(&Value::String(key.to_owned()));
            if existing.is_empty() {
                map.remove(&section_key);
            }
        }
        return;
    }

    let entry = map
        .entry(section_key)
        .or_insert_with(|| Value::Mapping(Default::default()));
    if !entry.is_mapping() {
        *entry = Value::Mapping(Default::default());
    }
    entry
        .as_mapping_mut()
        .expect("mapping ensured above")
        .insert(
            Value::String(key.to_owned()),
            Value::String(value.to_owned()),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_domain::Settings;

    fn store(dir: &std::path::Path) -> ConfigStore {
        ConfigStore::new(&Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        })
    }

    #[test]
    fn built_in_defaults_carry_required_tags() {
        validate_prompt(PromptRole::Chairman, DEFAULT_CHAIRMAN_PROMPT).unwrap();
        validate_prompt(PromptRole::Title, DEFAULT_TITLE_PROMPT).unwrap();
        validate_prompt(PromptRole::Ranking, DEFAULT_RANKING_PROMPT).unwrap();
    }

    #[test]
    fn missing_tags_reported_by_name() {
        let err = validate_prompt(PromptRole::Chairman, "just {user_query}").unwrap_err();
        match err {
            concord_domain::Error::Validation { missing } => {
                assert_eq!(missing, vec!["{stage1_text}", "{voting_details_text}"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn org_override_shadows_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let prompts = store.load_system_prompts("org-1").unwrap();
        assert!(prompts.base.is_default);

        std::fs::create_dir_all(store.org_config_dir("org-1").unwrap()).unwrap();
        std::fs::write(
            store.org_system_prompts_file("org-1").unwrap(),
            "base_system_prompt: custom base\nchairman:\n  prompt: \"c {user_query} {stage1_text} {voting_details_text}\"\n",
        )
        .unwrap();

        let prompts = store.load_system_prompts("org-1").unwrap();
        assert_eq!(prompts.base.value, "custom base");
        assert!(!prompts.base.is_default);
        assert!(!prompts.chairman.is_default);
        assert!(prompts.title.is_default);
    }

    #[test]
    fn legacy_ranking_key_honored() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        std::fs::create_dir_all(store.org_config_dir("org-1").unwrap()).unwrap();
        std::fs::write(
            store.org_system_prompts_file("org-1").unwrap(),
            "ranking_prompt: \"legacy {user_query} {responses_text}\"\n",
        )
        .unwrap();

        let prompts = store.load_system_prompts("org-1").unwrap();
        assert_eq!(prompts.ranking.value, "legacy {user_query} {responses_text}");
        assert!(!prompts.ranking.is_default);
    }

    #[test]
    fn saving_default_removes_override() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        store
            .save_prompt_override("org-1", PromptRole::Base, "my base", false)
            .unwrap();
        assert!(!store.load_system_prompts("org-1").unwrap().base.is_default);

        store
            .save_prompt_override("org-1", PromptRole::Base, "", true)
            .unwrap();
        let prompts = store.load_system_prompts("org-1").unwrap();
        assert!(prompts.base.is_default);
        assert_eq!(prompts.base.value, DEFAULT_BASE_SYSTEM_PROMPT);
    }

    #[test]
    fn invalid_override_rejected_before_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let result =
            store.save_prompt_override("org-1", PromptRole::Chairman, "no tags here", false);
        assert!(result.is_err());
        assert!(!store.org_system_prompts_file("org-1").unwrap().exists());
    }

    #[test]
    fn fill_template_replaces_known_tags() {
        let out = fill_template("Q: {user_query} / {peer_text}", &[
            ("user_query", "why?"),
            ("peer_text", "your peers (anonymized)"),
        ]);
        assert_eq!(out, "Q: why? / your peers (anonymized)");
    }
}
