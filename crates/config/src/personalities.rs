//! Personality records: loading, tenant shadowing, and prompt formatting.
//!
//! System personalities live under `data/defaults/personalities/*.yaml`;
//! tenant personalities under the org's `personalities/` directory. When
//! ids collide the tenant version wins (shadowing) and becomes editable.
//! A personality is *active* iff it is in the merged set, not listed in the
//! tenant's `disabled_system_personalities`, and its own `enabled` flag is
//! true.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use concord_domain::{Error, Result};

use crate::layout::ConfigStore;
use crate::prompts::{load_yaml, SystemPrompts};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The six user-editable prompt sections, in their fixed display order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptSections {
    #[serde(default)]
    pub identity_and_role: String,
    #[serde(default)]
    pub interpretation_of_questions: String,
    #[serde(default)]
    pub problem_decomposition: String,
    #[serde(default)]
    pub analysis_and_reasoning: String,
    #[serde(default)]
    pub differentiation_and_bias: String,
    #[serde(default)]
    pub tone: String,
}

const SECTION_HEADERS: [(&str, fn(&PromptSections) -> &str); 6] = [
    ("IDENTITY & ROLE", |s| &s.identity_and_role),
    ("INTERPRETATION OF QUESTIONS", |s| {
        &s.interpretation_of_questions
    }),
    ("PROBLEM DECOMPOSITION", |s| &s.problem_decomposition),
    ("ANALYSIS & REASONING", |s| &s.analysis_and_reasoning),
    ("DIFFERENTIATION & BIAS", |s| &s.differentiation_and_bias),
    ("TONE", |s| &s.tone),
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersonalitySource {
    #[default]
    System,
    Custom,
}

/// One voice on the council: identity, delivery, and prompt sections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Personality {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub personality_prompt: PromptSections,
    #[serde(default)]
    pub source: PersonalitySource,
    #[serde(default)]
    pub is_editable: bool,
}

fn default_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & merging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ConfigStore {
    /// All personalities for a tenant: defaults merged with tenant files,
    /// tenant versions shadowing by id. Order is deterministic: defaults in
    /// filename order, shadowed in place, new customs appended in filename
    /// order.
    pub fn all_personalities(&self, org_id: &str) -> Result<Vec<Personality>> {
        let mut ordered: Vec<String> = Vec::new();
        let mut registry: HashMap<String, Personality> = HashMap::new();

        for mut p in load_dir(&self.default_personalities_dir()) {
            p.source = PersonalitySource::System;
            p.is_editable = false;
            if !registry.contains_key(&p.id) {
                ordered.push(p.id.clone());
            }
            registry.insert(p.id.clone(), p);
        }

        for mut p in load_dir(&self.org_personalities_dir(org_id)?) {
            p.source = PersonalitySource::Custom;
            p.is_editable = true;
            if !registry.contains_key(&p.id) {
                ordered.push(p.id.clone());
            }
            registry.insert(p.id.clone(), p);
        }

        Ok(ordered
            .into_iter()
            .filter_map(|id| registry.remove(&id))
            .collect())
    }

    /// Active personalities only: merged, not tenant-disabled, `enabled`.
    pub fn active_personalities(&self, org_id: &str) -> Result<Vec<Personality>> {
        let disabled = self.disabled_system_personalities(org_id)?;
        Ok(self
            .all_personalities(org_id)?
            .into_iter()
            .filter(|p| !disabled.contains(&p.id) && p.enabled)
            .collect())
    }

    /// Ids listed in the tenant's `disabled_system_personalities`.
    pub fn disabled_system_personalities(&self, org_id: &str) -> Result<Vec<String>> {
        let org = load_yaml(&self.org_system_prompts_file(org_id)?);
        let Some(doc) = org else {
            return Ok(Vec::new());
        };
        Ok(doc
            .get("disabled_system_personalities")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Write (create or shadow) a custom personality for a tenant.
    pub fn save_personality(&self, org_id: &str, personality: &Personality) -> Result<()> {
        if personality.id.is_empty() || personality.name.is_empty() {
            return Err(Error::Config("personality requires id and name".into()));
        }
        let dir = self.org_personalities_dir(org_id)?;
        std::fs::create_dir_all(&dir)?;

        // File name derives from the id, which org_personalities_dir already
        // confines; still reject separators outright.
        if personality.id.contains(['/', '\\']) || personality.id.contains("..") {
            return Err(Error::Config(format!(
                "invalid personality id: {}",
                personality.id
            )));
        }

        let mut stored = personality.clone();
        stored.source = PersonalitySource::Custom;
        stored.is_editable = true;

        let raw = serde_yaml::to_string(&stored)?;
        std::fs::write(dir.join(format!("{}.yaml", stored.id)), raw)?;
        Ok(())
    }

    /// Delete a tenant's custom personality (un-shadowing any system entry
    /// with the same id).
    pub fn delete_personality(&self, org_id: &str, id: &str) -> Result<()> {
        let path = self.org_personalities_dir(org_id)?.join(format!("{id}.yaml"));
        if !path.exists() {
            return Err(Error::NotFound(format!("personality {id}")));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}

fn load_dir(dir: &Path) -> Vec<Personality> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    files.sort();

    let mut out = Vec::new();
    for path in files {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match serde_yaml::from_str::<Personality>(&raw) {
            Ok(p) if !p.id.is_empty() => out.push(p),
            Ok(_) => {
                tracing::error!(path = %path.display(), "personality file missing id, skipped")
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "unreadable personality file")
            }
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt formatting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a personality's prompt sections with numbered bold headers.
///
/// The six editable sections come first (`**1. IDENTITY & ROLE**` …); the
/// tenant-level enforced structures (which carry their own `7.`+ headers)
/// are appended only when `include_enforced` — Stage 1 uses them, Stage 2
/// does not.
pub fn format_personality_prompt(
    personality: &Personality,
    prompts: &SystemPrompts,
    include_enforced: bool,
) -> String {
    let mut parts = Vec::new();

    for (i, (header, accessor)) in SECTION_HEADERS.iter().enumerate() {
        let content = accessor(&personality.personality_prompt);
        if !content.is_empty() {
            parts.push(format!("**{}. {header}**\n{content}", i + 1));
        }
    }

    if include_enforced {
        if !prompts.stage1_response_structure.value.is_empty() {
            parts.push(prompts.stage1_response_structure.value.clone());
        }
        if !prompts.stage1_meta_structure.value.is_empty() {
            parts.push(prompts.stage1_meta_structure.value.clone());
        }
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_domain::Settings;

    fn store(dir: &Path) -> ConfigStore {
        ConfigStore::new(&Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        })
    }

    fn write_default(store: &ConfigStore, id: &str, name: &str, enabled: bool) {
        let dir = store.default_personalities_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{id}.yaml")),
            format!(
                "id: {id}\nname: {name}\nmodel: openai/gpt-4o\nenabled: {enabled}\npersonality_prompt:\n  identity_and_role: I am {name}\n"
            ),
        )
        .unwrap();
    }

    fn sample(id: &str) -> Personality {
        Personality {
            id: id.into(),
            name: format!("P {id}"),
            description: None,
            model: "openai/gpt-4o".into(),
            temperature: Some(0.7),
            enabled: true,
            personality_prompt: PromptSections {
                identity_and_role: "identity".into(),
                tone: "dry".into(),
                ..Default::default()
            },
            source: PersonalitySource::System,
            is_editable: false,
        }
    }

    #[test]
    fn tenant_personality_shadows_system_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        write_default(&store, "analyst", "Analyst", true);
        write_default(&store, "skeptic", "Skeptic", true);

        let mut shadow = sample("analyst");
        shadow.name = "Tenant Analyst".into();
        store.save_personality("org-1", &shadow).unwrap();

        let all = store.all_personalities("org-1").unwrap();
        assert_eq!(all.len(), 2);
        // Shadowed in place: order preserved from defaults.
        assert_eq!(all[0].id, "analyst");
        assert_eq!(all[0].name, "Tenant Analyst");
        assert_eq!(all[0].source, PersonalitySource::Custom);
        assert!(all[0].is_editable);
        assert_eq!(all[1].source, PersonalitySource::System);
    }

    #[test]
    fn disabled_list_excludes_from_active_but_not_all() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        write_default(&store, "analyst", "Analyst", true);
        write_default(&store, "skeptic", "Skeptic", true);

        std::fs::create_dir_all(store.org_config_dir("org-1").unwrap()).unwrap();
        std::fs::write(
            store.org_system_prompts_file("org-1").unwrap(),
            "disabled_system_personalities:\n  - skeptic\n",
        )
        .unwrap();

        assert_eq!(store.all_personalities("org-1").unwrap().len(), 2);
        let active = store.active_personalities("org-1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "analyst");
    }

    #[test]
    fn own_enabled_flag_respected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        write_default(&store, "analyst", "Analyst", true);
        write_default(&store, "sleeper", "Sleeper", false);

        let active = store.active_personalities("org-1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "analyst");
    }

    #[test]
    fn deleting_custom_unshadows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        write_default(&store, "analyst", "Analyst", true);
        let mut shadow = sample("analyst");
        shadow.name = "Shadow".into();
        store.save_personality("org-1", &shadow).unwrap();
        assert_eq!(store.all_personalities("org-1").unwrap()[0].name, "Shadow");

        store.delete_personality("org-1", "analyst").unwrap();
        assert_eq!(store.all_personalities("org-1").unwrap()[0].name, "Analyst");
        assert!(store.delete_personality("org-1", "analyst").is_err());
    }

    #[test]
    fn formatted_prompt_numbers_sections_in_order() {
        let p = Personality {
            personality_prompt: PromptSections {
                identity_and_role: "first".into(),
                problem_decomposition: "third".into(),
                tone: "sixth".into(),
                ..Default::default()
            },
            ..sample("x")
        };
        let prompts = empty_prompts();
        let text = format_personality_prompt(&p, &prompts, false);

        assert!(text.contains("**1. IDENTITY & ROLE**\nfirst"));
        assert!(text.contains("**3. PROBLEM DECOMPOSITION**\nthird"));
        assert!(text.contains("**6. TONE**\nsixth"));
        // Skipped sections keep their number for the ones that follow.
        assert!(!text.contains("**2."));
    }

    #[test]
    fn enforced_structures_only_when_requested() {
        let p = sample("x");
        let mut prompts = empty_prompts();
        prompts.stage1_response_structure.value = "**7. RESPONSE STRUCTURE**\nuse parts".into();
        prompts.stage1_meta_structure.value = "**8. META**\nself-assess".into();

        let with = format_personality_prompt(&p, &prompts, true);
        assert!(with.contains("**7. RESPONSE STRUCTURE**"));
        assert!(with.contains("**8. META**"));

        let without = format_personality_prompt(&p, &prompts, false);
        assert!(!without.contains("RESPONSE STRUCTURE"));
    }

    fn empty_prompts() -> SystemPrompts {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path()).load_system_prompts("org-x").unwrap()
    }
}
