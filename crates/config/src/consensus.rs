//! Consensus-strategy prompt catalog.
//!
//! Strategies are markdown prompt files under `data/defaults/consensus/`;
//! the file stem is the strategy id. An unknown id falls back to
//! `balanced`.

use concord_domain::{Error, Result};

use crate::layout::ConfigStore;
use crate::prompts::load_yaml;

pub const FALLBACK_STRATEGY: &str = "balanced";

impl ConfigStore {
    /// Sorted ids of every available strategy.
    pub fn list_consensus_strategies(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.consensus_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "md") {
                    path.file_stem()?.to_str().map(str::to_owned)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }

    /// Load a strategy prompt by id, falling back to `balanced` when the id
    /// is unknown.
    pub fn load_consensus_prompt(&self, strategy_id: &str) -> Result<String> {
        let dir = self.consensus_dir();
        let mut path = dir.join(format!("{strategy_id}.md"));
        if !path.exists() {
            tracing::warn!(strategy_id, "unknown consensus strategy, falling back to balanced");
            path = dir.join(format!("{FALLBACK_STRATEGY}.md"));
        }
        if !path.exists() {
            return Err(Error::Config(format!(
                "consensus prompt catalog missing (no {strategy_id}.md or {FALLBACK_STRATEGY}.md)"
            )));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// The tenant's active strategy: org config `consensus_strategy` key,
    /// else `balanced`. Returns `(strategy_id, prompt)`.
    pub fn active_consensus_prompt(&self, org_id: &str) -> Result<(String, String)> {
        let org = load_yaml(&self.org_system_prompts_file(org_id)?);
        let strategy = org
            .as_ref()
            .and_then(|doc| doc.get("consensus_strategy"))
            .and_then(|v| v.as_str())
            .unwrap_or(FALLBACK_STRATEGY)
            .to_owned();
        let prompt = self.load_consensus_prompt(&strategy)?;
        Ok((strategy, prompt))
    }
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

    fn seed(store: &ConfigStore) {
        let dir = store.consensus_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("balanced.md"), "balanced prompt {count}").unwrap();
        std::fs::write(dir.join("adversarial.md"), "adversarial prompt").unwrap();
    }

    #[test]
    fn strategies_listed_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        seed(&store);
        assert_eq!(
            store.list_consensus_strategies(),
            vec!["adversarial", "balanced"]
        );
    }

    #[test]
    fn unknown_id_falls_back_to_balanced() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        seed(&store);
        assert_eq!(
            store.load_consensus_prompt("nonexistent").unwrap(),
            "balanced prompt {count}"
        );
    }

    #[test]
    fn active_strategy_from_org_config() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        seed(&store);

        let (name, _) = store.active_consensus_prompt("org-1").unwrap();
        assert_eq!(name, "balanced");

        std::fs::create_dir_all(store.org_config_dir("org-1").unwrap()).unwrap();
        std::fs::write(
            store.org_system_prompts_file("org-1").unwrap(),
            "consensus_strategy: adversarial\n",
        )
        .unwrap();
        let (name, prompt) = store.active_consensus_prompt("org-1").unwrap();
        assert_eq!(name, "adversarial");
        assert_eq!(prompt, "adversarial prompt");
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(store(tmp.path()).load_consensus_prompt("balanced").is_err());
    }
}
