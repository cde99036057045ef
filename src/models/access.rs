use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranteeKind {
    User,
    Team,
}

/// One role entry as stored on a resource document. The role string is
/// interpreted per resource kind by the access resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub grantee_id: String,
    #[serde(rename = "type")]
    pub grantee_type: GranteeKind,
    pub role: String,
}

impl AccessControl {
    pub fn user(grantee_id: &str, role: &str) -> Self {
        Self {
            grantee_id: grantee_id.to_string(),
            grantee_type: GranteeKind::User,
            role: role.to_string(),
        }
    }

    pub fn team(grantee_id: &str, role: &str) -> Self {
        Self {
            grantee_id: grantee_id.to_string(),
            grantee_type: GranteeKind::Team,
            role: role.to_string(),
        }
    }
}
