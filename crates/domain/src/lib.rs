//! Shared types for the concord workspace: the common error enum, chat
//! message shapes, caller identity, env-derived settings, path confinement,
//! and the secret cipher used for per-tenant api keys.

pub mod chat;
pub mod error;
pub mod identity;
pub mod paths;
pub mod secret;
pub mod settings;

pub use chat::{ChatMessage, Role};
pub use error::{Error, Result};
pub use identity::Caller;
pub use settings::Settings;
