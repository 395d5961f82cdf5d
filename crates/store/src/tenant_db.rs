//! Lazy per-tenant SQLite connections.
//!
//! Each tenant gets its own `tenant.db`, opened on first use and cached for
//! the life of the process. Schema migrations run at cache-insert time
//! inside a transaction, so a freshly provisioned tenant is usable on its
//! first request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use concord_domain::{paths, Error, Result, Settings};

pub struct TenantDb {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl TenantDb {
    pub fn new(settings: &Settings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or open and migrate) the tenant's database connection.
    pub fn connection(&self, org_id: &str) -> Result<Arc<Mutex<Connection>>> {
        if let Some(conn) = self.connections.lock().get(org_id) {
            return Ok(conn.clone());
        }

        let db_path =
            paths::resolve_under(&self.data_dir, &format!("organizations/{org_id}/tenant.db"))?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(org_id, path = %db_path.display(), "opening tenant database");
        let mut conn = Connection::open(&db_path).map_err(db_err)?;
        migrate(&mut conn)?;

        // Two threads may race to open the same tenant; the first insert
        // wins and everyone shares it.
        let conn = Arc::new(Mutex::new(conn));
        let mut connections = self.connections.lock();
        let entry = connections
            .entry(org_id.to_owned())
            .or_insert_with(|| conn.clone());
        Ok(entry.clone())
    }
}

/// Bring the tenant schema up to date. Idempotent; runs in one transaction.
fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction().map_err(db_err)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS votes (
             id TEXT PRIMARY KEY,
             conversation_id TEXT NOT NULL,
             turn_number INTEGER NOT NULL,
             voter_model TEXT NOT NULL,
             candidate_personality_id TEXT NOT NULL,
             candidate_model TEXT NOT NULL,
             rank INTEGER NOT NULL,
             label TEXT NOT NULL,
             reasoning TEXT,
             timestamp TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_votes_candidate
             ON votes (candidate_personality_id);
         CREATE INDEX IF NOT EXISTS idx_votes_conversation
             ON votes (conversation_id);

         CREATE TABLE IF NOT EXISTS council_packs (
             id TEXT PRIMARY KEY,
             display_name TEXT NOT NULL,
             description TEXT,
             config_json TEXT NOT NULL,
             created_at TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS council_configuration (
             user_id TEXT PRIMARY KEY,
             active_pack_id TEXT,
             personalities_json TEXT NOT NULL,
             strategy_id TEXT,
             system_prompts_json TEXT NOT NULL,
             updated_at TEXT NOT NULL
         );",
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Db(e.to_string())
}
