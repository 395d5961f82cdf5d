//! Chairman / title / ranking model resolution.

use serde::{Deserialize, Serialize};

use concord_domain::Result;

use crate::layout::ConfigStore;
use crate::prompts::load_yaml;

pub const DEFAULT_CHAIRMAN_MODEL: &str = "google/gemini-2.5-pro";
pub const DEFAULT_TITLE_MODEL: &str = "google/gemini-2.5-pro";
pub const DEFAULT_RANKING_MODEL: &str = "openai/gpt-4o";

/// The models used by the engine's special roles, resolved with the same
/// default + tenant-override policy as prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelsConfig {
    pub chairman_model: String,
    pub title_model: String,
    pub ranking_model: String,
}

impl ConfigStore {
    pub fn load_models_config(&self, org_id: &str) -> Result<ModelsConfig> {
        let defaults = load_yaml(&self.default_system_prompts_file());
        let org = load_yaml(&self.org_system_prompts_file(org_id)?);

        let resolve = |section: &str, built_in: &str| {
            let default = nested_model(&defaults, section)
                .unwrap_or_else(|| built_in.to_owned());
            nested_model(&org, section).unwrap_or(default)
        };

        Ok(ModelsConfig {
            chairman_model: resolve("chairman", DEFAULT_CHAIRMAN_MODEL),
            title_model: resolve("title_generation", DEFAULT_TITLE_MODEL),
            ranking_model: resolve("ranking", DEFAULT_RANKING_MODEL),
        })
    }

    /// Persist one model override. An empty value removes the override.
    pub fn save_model_override(&self, org_id: &str, section: &str, model: &str) -> Result<()> {
        use serde_yaml::Value;

        let path = self.org_system_prompts_file(org_id)?;
        let mut doc = load_yaml(&path).unwrap_or(Value::Mapping(Default::default()));
        if !doc.is_mapping() {
            doc = Value::Mapping(Default::default());
        }
        let map = doc.as_mapping_mut().expect("mapping ensured above");

        let section_key = Value::String(section.to_owned());
        if model.is_empty() {
            if let Some(existing) = map.get_mut(&section_key).and_then(|v| v.as_mapping_mut()) {
                existing.remove(&Value::String("model".into()));
                if existing.is_empty() {
                    map.remove(&section_key);
                }
            }
        } else {
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
                    Value::String("model".into()),
                    Value::String(model.to_owned()),
                );
        }

        crate::prompts::write_yaml(&path, &doc)
    }
}

fn nested_model(doc: &Option<serde_yaml::Value>, section: &str) -> Option<String> {
    doc.as_ref()?
        .get(section)
        .and_then(|s| s.get("model"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
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
    fn built_in_defaults_without_files() {
        let tmp = tempfile::tempdir().unwrap();
        let models = store(tmp.path()).load_models_config("org-1").unwrap();
        assert_eq!(models.chairman_model, DEFAULT_CHAIRMAN_MODEL);
        assert_eq!(models.ranking_model, DEFAULT_RANKING_MODEL);
    }

    #[test]
    fn nested_overrides_resolve_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        std::fs::create_dir_all(store.defaults_dir()).unwrap();
        std::fs::write(
            store.default_system_prompts_file(),
            "chairman:\n  model: default/chair\ntitle_generation:\n  model: default/title\n",
        )
        .unwrap();
        std::fs::create_dir_all(store.org_config_dir("org-1").unwrap()).unwrap();
        std::fs::write(
            store.org_system_prompts_file("org-1").unwrap(),
            "chairman:\n  model: org/chair\n",
        )
        .unwrap();

        let models = store.load_models_config("org-1").unwrap();
        assert_eq!(models.chairman_model, "org/chair");
        assert_eq!(models.title_model, "default/title");
        assert_eq!(models.ranking_model, DEFAULT_RANKING_MODEL);
    }

    #[test]
    fn save_and_clear_model_override() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        store.save_model_override("org-1", "chairman", "org/chair").unwrap();
        assert_eq!(
            store.load_models_config("org-1").unwrap().chairman_model,
            "org/chair"
        );

        store.save_model_override("org-1", "chairman", "").unwrap();
        assert_eq!(
            store.load_models_config("org-1").unwrap().chairman_model,
            DEFAULT_CHAIRMAN_MODEL
        );
    }
}
