use serde::{Deserialize, Serialize};

/// A validated caller identity, produced by the auth collaborator.
///
/// The core never authenticates anyone itself; it trusts this record and
/// enforces ownership (`user_id`) and tenancy (`org_id`) checks with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub username: String,
    pub org_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_instance_admin: bool,
}

impl Caller {
    /// Test helper for a plain org member.
    pub fn member(user_id: &str, username: &str, org_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            org_id: org_id.to_owned(),
            is_admin: false,
            is_instance_admin: false,
        }
    }
}
