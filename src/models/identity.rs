use super::AccessControl;
use crate::shared::ids::{OrganizationId, TeamId, UserId};
use crate::shared::serde_ext::null_as_default;
use crate::store::{Collection, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_system_auditor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
}

/// Team membership is itself a role entry (`member` or `admin`) on the team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
}

impl Document for User {
    fn collection(&self) -> Collection {
        Collection::Users
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for Organization {
    fn collection(&self) -> Collection {
        Collection::Organizations
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for Team {
    fn collection(&self) -> Collection {
        Collection::Teams
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}
