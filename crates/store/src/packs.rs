//! Council packs and per-user active configuration.
//!
//! A pack is a pre-built bundle of personalities, a consensus strategy, and
//! prompt overrides. System packs ship as YAML under
//! `data/defaults/packs/`; custom packs live in the tenant database.
//! Applying a pack writes the user's active configuration row, which the
//! gateway consults to pick the Stage 3 synthesis mode.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use concord_config::ConfigStore;
use concord_domain::{Error, Result};

use crate::tenant_db::{db_err, TenantDb};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackConfig {
    #[serde(default)]
    pub personalities: Vec<Value>,
    #[serde(default)]
    pub consensus_strategy: Option<String>,
    #[serde(default)]
    pub system_prompts: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pack {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub is_system: bool,
    pub config: PackConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// What a user currently runs with: the applied pack and its resolved
/// pieces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveConfig {
    pub user_id: String,
    pub active_pack_id: Option<String>,
    pub personalities: Vec<Value>,
    pub strategy_id: Option<String>,
    pub system_prompts: serde_json::Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// On-disk shape of a system pack file.
#[derive(Debug, Deserialize)]
struct SystemPackFile {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    personalities: Vec<Value>,
    #[serde(default)]
    consensus_strategy: Option<String>,
    #[serde(default)]
    system_prompts: serde_json::Map<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PackStore {
    db: Arc<TenantDb>,
    config: ConfigStore,
}

impl PackStore {
    pub fn new(db: Arc<TenantDb>, config: ConfigStore) -> Self {
        Self { db, config }
    }

    /// Merged view of system packs and the tenant's custom packs, keyed by
    /// id (custom wins on collision).
    pub fn list_packs(&self, org_id: &str) -> Result<Vec<Pack>> {
        let mut packs = self.system_packs();
        for custom in self.custom_packs(org_id)? {
            match packs.iter_mut().find(|p| p.id == custom.id) {
                Some(existing) => *existing = custom,
                None => packs.push(custom),
            }
        }
        Ok(packs)
    }

    fn system_packs(&self) -> Vec<Pack> {
        let dir = self.config.default_packs_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut files: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        files.sort();

        let mut packs = Vec::new();
        for path in files {
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_yaml::from_str::<SystemPackFile>(&raw) {
                Ok(file) => packs.push(Pack {
                    display_name: file.display_name.unwrap_or_else(|| file.id.clone()),
                    id: file.id,
                    description: file.description,
                    is_system: true,
                    config: PackConfig {
                        personalities: file.personalities,
                        consensus_strategy: file.consensus_strategy,
                        system_prompts: file.system_prompts,
                    },
                    created_at: None,
                }),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "unreadable system pack")
                }
            }
        }
        packs
    }

    fn custom_packs(&self, org_id: &str) -> Result<Vec<Pack>> {
        let conn = self.db.connection(org_id)?;
        let conn = conn.lock();
        let mut statement = conn
            .prepare(
                "SELECT id, display_name, description, config_json, created_at
                 FROM council_packs ORDER BY created_at",
            )
            .map_err(db_err)?;

        let packs = statement
            .query_map([], |row| {
                let config_json: String = row.get(3)?;
                let created_at: String = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    config_json,
                    created_at,
                ))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(packs
            .into_iter()
            .filter_map(|(id, display_name, description, config_json, created_at)| {
                let config = serde_json::from_str(&config_json).ok()?;
                Some(Pack {
                    id,
                    display_name,
                    description: description.unwrap_or_default(),
                    is_system: false,
                    config,
                    created_at: created_at.parse().ok(),
                })
            })
            .collect())
    }

    pub fn create_custom_pack(
        &self,
        org_id: &str,
        display_name: &str,
        description: Option<&str>,
        config: PackConfig,
    ) -> Result<Pack> {
        let pack = Pack {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_owned(),
            description: description.unwrap_or_default().to_owned(),
            is_system: false,
            config,
            created_at: Some(Utc::now()),
        };

        let conn = self.db.connection(org_id)?;
        conn.lock()
            .execute(
                "INSERT INTO council_packs (id, display_name, description, config_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    pack.id,
                    pack.display_name,
                    pack.description,
                    serde_json::to_string(&pack.config)?,
                    pack.created_at.expect("set above").to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(pack)
    }

    /// Apply a pack to the user's active configuration.
    pub fn apply_pack(&self, org_id: &str, user_id: &str, pack_id: &str) -> Result<ActiveConfig> {
        let pack = self
            .list_packs(org_id)?
            .into_iter()
            .find(|p| p.id == pack_id)
            .ok_or_else(|| Error::NotFound(format!("pack {pack_id}")))?;

        let active = ActiveConfig {
            user_id: user_id.to_owned(),
            active_pack_id: Some(pack.id.clone()),
            personalities: pack.config.personalities.clone(),
            strategy_id: pack.config.consensus_strategy.clone(),
            system_prompts: pack.config.system_prompts.clone(),
            updated_at: Utc::now(),
        };

        let conn = self.db.connection(org_id)?;
        conn.lock()
            .execute(
                "INSERT INTO council_configuration
                     (user_id, active_pack_id, personalities_json, strategy_id,
                      system_prompts_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id) DO UPDATE SET
                     active_pack_id = excluded.active_pack_id,
                     personalities_json = excluded.personalities_json,
                     strategy_id = excluded.strategy_id,
                     system_prompts_json = excluded.system_prompts_json,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    active.user_id,
                    active.active_pack_id,
                    serde_json::to_string(&active.personalities)?,
                    active.strategy_id,
                    serde_json::to_string(&active.system_prompts)?,
                    active.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

        tracing::info!(org_id, user_id, pack_id, "pack applied");
        Ok(active)
    }

    pub fn active_config(&self, org_id: &str, user_id: &str) -> Result<Option<ActiveConfig>> {
        let conn = self.db.connection(org_id)?;
        let conn = conn.lock();
        let mut statement = conn
            .prepare(
                "SELECT active_pack_id, personalities_json, strategy_id,
                        system_prompts_json, updated_at
                 FROM council_configuration WHERE user_id = ?1",
            )
            .map_err(db_err)?;

        let row = statement
            .query_row([user_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(db_err(other)),
            })?;

        let Some((active_pack_id, personalities_json, strategy_id, prompts_json, updated_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(ActiveConfig {
            user_id: user_id.to_owned(),
            active_pack_id,
            personalities: serde_json::from_str(&personalities_json)?,
            strategy_id,
            system_prompts: serde_json::from_str(&prompts_json)?,
            updated_at: updated_at
                .parse()
                .map_err(|_| Error::Db("invalid updated_at timestamp".into()))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_domain::Settings;

    fn fixture() -> (tempfile::TempDir, PackStore) {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: tmp.path().to_path_buf(),
            ..Settings::default()
        };
        let store = PackStore::new(
            Arc::new(TenantDb::new(&settings)),
            ConfigStore::new(&settings),
        );
        (tmp, store)
    }

    fn seed_system_pack(tmp: &tempfile::TempDir, id: &str, strategy: &str) {
        let dir = tmp.path().join("defaults/packs");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{id}.yaml")),
            format!(
                "id: {id}\ndisplay_name: Pack {id}\npersonalities:\n  - id: p1\nconsensus_strategy: {strategy}\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn system_and_custom_packs_merge() {
        let (tmp, store) = fixture();
        seed_system_pack(&tmp, "starter", "balanced");

        store
            .create_custom_pack("org-a", "Mine", Some("custom pack"), PackConfig::default())
            .unwrap();

        let packs = store.list_packs("org-a").unwrap();
        assert_eq!(packs.len(), 2);
        assert!(packs[0].is_system);
        assert_eq!(packs[0].display_name, "Pack starter");
        assert!(!packs[1].is_system);

        // Custom packs stay tenant-local.
        assert_eq!(store.list_packs("org-b").unwrap().len(), 1);
    }

    #[test]
    fn apply_pack_writes_active_config() {
        let (tmp, store) = fixture();
        seed_system_pack(&tmp, "starter", "adversarial");

        assert!(store.active_config("org-a", "u1").unwrap().is_none());

        let active = store.apply_pack("org-a", "u1", "starter").unwrap();
        assert_eq!(active.strategy_id.as_deref(), Some("adversarial"));
        assert_eq!(active.personalities.len(), 1);

        let loaded = store.active_config("org-a", "u1").unwrap().unwrap();
        assert_eq!(loaded.active_pack_id.as_deref(), Some("starter"));
        assert_eq!(loaded.strategy_id.as_deref(), Some("adversarial"));
    }

    #[test]
    fn reapplying_replaces_the_row() {
        let (tmp, store) = fixture();
        seed_system_pack(&tmp, "one", "balanced");
        seed_system_pack(&tmp, "two", "adversarial");

        store.apply_pack("org-a", "u1", "one").unwrap();
        store.apply_pack("org-a", "u1", "two").unwrap();

        let active = store.active_config("org-a", "u1").unwrap().unwrap();
        assert_eq!(active.active_pack_id.as_deref(), Some("two"));
    }

    #[test]
    fn unknown_pack_is_not_found() {
        let (_tmp, store) = fixture();
        assert!(matches!(
            store.apply_pack("org-a", "u1", "ghost"),
            Err(Error::NotFound(_))
        ));
    }
}
