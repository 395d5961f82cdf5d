//! Durable state for the deliberation engine.
//!
//! Two stores with different consistency models, kept deliberately split:
//! append-only JSON files for conversation transcripts and the voting
//! session log (the transcript's `processing_state` is the single-writer
//! lock), and per-tenant SQLite for normalized vote rows, packs, and
//! per-user active configuration.

pub mod conversations;
pub mod packs;
pub mod tenant_db;
pub mod votes;
pub mod voting_log;

pub use conversations::{Conversation, ConversationMetadata, ConversationStore, ProcessingState};
pub use packs::{ActiveConfig, Pack, PackStore};
pub use tenant_db::TenantDb;
pub use votes::{LeagueRow, VoteStore};
pub use voting_log::{VotingLog, VotingSession};
