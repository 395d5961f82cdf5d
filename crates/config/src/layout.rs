//! Directory layout for defaults and tenant data.

use std::path::{Path, PathBuf};

use concord_domain::{paths, Result, Settings};

/// Handle to the on-disk configuration tree. Cheap to clone; all reads go
/// straight to the filesystem so edits take effect on the next turn.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    data_dir: PathBuf,
    defaults_dir: PathBuf,
    orgs_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            defaults_dir: settings.defaults_dir(),
            orgs_dir: settings.data_dir.join("organizations"),
        }
    }

    pub fn defaults_dir(&self) -> &Path {
        &self.defaults_dir
    }

    pub fn default_personalities_dir(&self) -> PathBuf {
        self.defaults_dir.join("personalities")
    }

    pub fn default_system_prompts_file(&self) -> PathBuf {
        self.defaults_dir.join("system-prompts.yaml")
    }

    pub fn consensus_dir(&self) -> PathBuf {
        self.defaults_dir.join("consensus")
    }

    pub fn default_packs_dir(&self) -> PathBuf {
        self.defaults_dir.join("packs")
    }

    /// Tenant root, confined under the data directory. Rejects org ids that
    /// would escape (`..`, absolute paths, separators).
    pub fn org_dir(&self, org_id: &str) -> Result<PathBuf> {
        paths::resolve_under(&self.data_dir, &format!("organizations/{org_id}"))
    }

    pub fn org_personalities_dir(&self, org_id: &str) -> Result<PathBuf> {
        Ok(self.org_dir(org_id)?.join("personalities"))
    }

    pub fn org_config_dir(&self, org_id: &str) -> Result<PathBuf> {
        Ok(self.org_dir(org_id)?.join("config"))
    }

    pub fn org_system_prompts_file(&self, org_id: &str) -> Result<PathBuf> {
        Ok(self.org_config_dir(org_id)?.join("system-prompts.yaml"))
    }

    pub fn org_api_config_file(&self, org_id: &str) -> Result<PathBuf> {
        Ok(self.org_config_dir(org_id)?.join("api.yaml"))
    }

    /// All org ids with a directory on disk (for instance-wide aggregation).
    pub fn list_org_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.orgs_dir) else {
            return ids;
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_owned());
                }
            }
        }
        ids.sort();
        ids
    }
}
