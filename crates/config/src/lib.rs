//! Per-tenant configuration resolver.
//!
//! Two axes of layering: instance defaults (read from `data/defaults/`) and
//! per-tenant overrides (read from `data/organizations/<org_id>/`). For each
//! prompt role, model slot, and personality, the effective value is the
//! tenant override if present, else the default; tenant personalities shadow
//! system ones when ids collide.

pub mod api_config;
pub mod consensus;
pub mod layout;
pub mod models;
pub mod personalities;
pub mod prompts;

pub use api_config::TenantApiConfig;
pub use layout::ConfigStore;
pub use models::ModelsConfig;
pub use personalities::{Personality, PersonalitySource, PromptSections};
pub use prompts::{PromptEntry, SystemPrompts};
