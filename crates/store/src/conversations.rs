//! Append-only JSON conversation transcripts.
//!
//! Each conversation is one `conversations/<id>.json` file under its
//! tenant's directory. Messages only ever grow; `title` and
//! `processing_state` are the sole mutable scalar fields. Ownership and
//! tenancy are enforced on every read and write: a conversation from
//! another tenant is indistinguishable from a missing one.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use concord_council::{Stage1Result, Stage2Result, Stage3Result, TranscriptMessage};
use concord_domain::{paths, Caller, Error, Result, Settings};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Guards against overlapping turns in one conversation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub org_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processing_state: ProcessingState,
    #[serde(default)]
    pub messages: Vec<TranscriptMessage>,
}

/// Listing view: metadata only, no message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub message_count: usize,
    pub processing_state: ProcessingState,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationStore {
    data_dir: PathBuf,
    /// Serializes read-modify-write cycles on the JSON files. The
    /// per-conversation `processing_state` guard handles cross-turn
    /// exclusion; this mutex handles same-instant metadata updates.
    write_lock: Mutex<()>,
}

impl ConversationStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            write_lock: Mutex::new(()),
        }
    }

    fn conversations_dir(&self, org_id: &str) -> Result<PathBuf> {
        paths::resolve_under(&self.data_dir, &format!("organizations/{org_id}/conversations"))
    }

    fn conversation_path(&self, org_id: &str, conversation_id: &str) -> Result<PathBuf> {
        let dir = self.conversations_dir(org_id)?;
        paths::resolve_under(&dir, &format!("{conversation_id}.json"))
            .map_err(|_| Error::NotFound(format!("conversation {conversation_id}")))
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    pub fn create(&self, caller: &Caller) -> Result<Conversation> {
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: caller.user_id.clone(),
            org_id: caller.org_id.clone(),
            title: "New Conversation".into(),
            created_at: Utc::now(),
            processing_state: ProcessingState::Idle,
            messages: Vec::new(),
        };

        let dir = self.conversations_dir(&caller.org_id)?;
        std::fs::create_dir_all(&dir)?;
        self.write(&conversation)?;

        tracing::info!(
            conversation_id = %conversation.id,
            org_id = %caller.org_id,
            "conversation created"
        );
        Ok(conversation)
    }

    /// Load a conversation, enforcing tenancy and ownership.
    pub fn get(&self, caller: &Caller, conversation_id: &str) -> Result<Conversation> {
        let conversation = self.read(&caller.org_id, conversation_id)?;
        if conversation.user_id != caller.user_id {
            return Err(Error::Forbidden(
                "not authorized to access this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    /// Metadata for the caller's conversations, newest first.
    pub fn list(&self, caller: &Caller) -> Vec<ConversationMetadata> {
        let Ok(dir) = self.conversations_dir(&caller.org_id) else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            // Skip malformed files rather than failing the whole listing.
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(conversation) = serde_json::from_str::<Conversation>(&raw) else {
                tracing::warn!(path = %path.display(), "skipping malformed conversation file");
                continue;
            };
            if conversation.user_id != caller.user_id {
                continue;
            }
            out.push(ConversationMetadata {
                id: conversation.id,
                created_at: conversation.created_at,
                title: conversation.title,
                message_count: conversation.messages.len(),
                processing_state: conversation.processing_state,
            });
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn delete(&self, caller: &Caller, conversation_id: &str) -> Result<()> {
        // Ownership check before the unlink.
        self.get(caller, conversation_id)?;
        std::fs::remove_file(self.conversation_path(&caller.org_id, conversation_id)?)?;
        Ok(())
    }

    /// Delete every conversation owned by the caller. Returns the count.
    pub fn delete_user_conversations(&self, caller: &Caller) -> usize {
        let mut deleted = 0;
        for meta in self.list(caller) {
            if self.delete(caller, &meta.id).is_ok() {
                deleted += 1;
            }
        }
        deleted
    }

    // ── Append-only message writes ────────────────────────────────

    /// Append the user message and return the post-append conversation, so
    /// callers hand the engine a history that already includes it.
    pub fn append_user_message(
        &self,
        caller: &Caller,
        conversation_id: &str,
        content: &str,
    ) -> Result<Conversation> {
        let _guard = self.write_lock.lock();
        let mut conversation = self.get(caller, conversation_id)?;
        conversation.messages.push(TranscriptMessage::user(content));
        self.write(&conversation)?;
        Ok(conversation)
    }

    pub fn append_assistant_message(
        &self,
        caller: &Caller,
        conversation_id: &str,
        stage1: Vec<Stage1Result>,
        stage2: Vec<Stage2Result>,
        stage3: Stage3Result,
    ) -> Result<Conversation> {
        let _guard = self.write_lock.lock();
        let mut conversation = self.get(caller, conversation_id)?;
        conversation.messages.push(TranscriptMessage::Assistant {
            stage1,
            stage2,
            stage3,
        });
        self.write(&conversation)?;
        Ok(conversation)
    }

    // ── Mutable scalars ───────────────────────────────────────────

    pub fn update_title(&self, caller: &Caller, conversation_id: &str, title: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut conversation = self.get(caller, conversation_id)?;
        conversation.title = title.to_owned();
        self.write(&conversation)
    }

    /// Compare-and-set the turn guard. A conversation already `running`
    /// refuses a second concurrent turn.
    pub fn begin_processing(&self, caller: &Caller, conversation_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut conversation = self.get(caller, conversation_id)?;
        if conversation.processing_state == ProcessingState::Running {
            return Err(Error::Conflict(
                "a turn is already in progress for this conversation".into(),
            ));
        }
        conversation.processing_state = ProcessingState::Running;
        self.write(&conversation)
    }

    pub fn end_processing(&self, caller: &Caller, conversation_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut conversation = self.get(caller, conversation_id)?;
        conversation.processing_state = ProcessingState::Idle;
        self.write(&conversation)
    }

    // ── IO ────────────────────────────────────────────────────────

    fn read(&self, org_id: &str, conversation_id: &str) -> Result<Conversation> {
        let path = self.conversation_path(org_id, conversation_id)?;
        if !path.exists() {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.org_id, &conversation.id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(conversation)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, ConversationStore, Caller) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(&Settings {
            data_dir: tmp.path().to_path_buf(),
            ..Settings::default()
        });
        let caller = Caller::member("u1", "alice", "org-a");
        (tmp, store, caller)
    }

    fn stage3(text: &str) -> Stage3Result {
        Stage3Result {
            model: "m".into(),
            response: text.into(),
            contributors: vec![],
        }
    }

    #[test]
    fn create_append_read_round_trip() {
        let (_tmp, store, caller) = fixture();
        let conversation = store.create(&caller).unwrap();

        let after_user = store
            .append_user_message(&caller, &conversation.id, "hello")
            .unwrap();
        // Post-append snapshot already contains the message.
        assert_eq!(after_user.messages.len(), 1);

        store
            .append_assistant_message(&caller, &conversation.id, vec![], vec![], stage3("hi"))
            .unwrap();

        let loaded = store.get(&caller, &conversation.id).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(
            loaded.messages[0],
            TranscriptMessage::user("hello")
        );
    }

    #[test]
    fn cross_tenant_reads_are_not_found() {
        let (_tmp, store, caller) = fixture();
        let conversation = store.create(&caller).unwrap();

        let intruder = Caller::member("u1", "alice", "org-b");
        assert!(matches!(
            store.get(&intruder, &conversation.id),
            Err(Error::NotFound(_))
        ));
        assert!(store.list(&intruder).is_empty());
    }

    #[test]
    fn other_users_conversations_are_forbidden() {
        let (_tmp, store, caller) = fixture();
        let conversation = store.create(&caller).unwrap();

        let neighbor = Caller::member("u2", "bob", "org-a");
        assert!(matches!(
            store.get(&neighbor, &conversation.id),
            Err(Error::Forbidden(_))
        ));
        assert!(store.list(&neighbor).is_empty());
    }

    #[test]
    fn processing_state_guards_concurrent_turns() {
        let (_tmp, store, caller) = fixture();
        let conversation = store.create(&caller).unwrap();

        store.begin_processing(&caller, &conversation.id).unwrap();
        assert!(matches!(
            store.begin_processing(&caller, &conversation.id),
            Err(Error::Conflict(_))
        ));

        store.end_processing(&caller, &conversation.id).unwrap();
        store.begin_processing(&caller, &conversation.id).unwrap();
    }

    #[test]
    fn listing_is_newest_first_metadata_only() {
        let (_tmp, store, caller) = fixture();
        let first = store.create(&caller).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create(&caller).unwrap();

        store.update_title(&caller, &second.id, "newer").unwrap();

        let listing = store.list(&caller);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].id, second.id);
        assert_eq!(listing[0].title, "newer");
        assert_eq!(listing[1].id, first.id);
    }

    #[test]
    fn traversal_ids_rejected_as_not_found() {
        let (_tmp, store, caller) = fixture();
        assert!(matches!(
            store.get(&caller, "../../../etc/passwd"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn delete_user_conversations_counts() {
        let (_tmp, store, caller) = fixture();
        store.create(&caller).unwrap();
        store.create(&caller).unwrap();
        let other = Caller::member("u2", "bob", "org-a");
        store.create(&other).unwrap();

        assert_eq!(store.delete_user_conversations(&caller), 2);
        assert_eq!(store.list(&other).len(), 1);
    }
}
