use super::AccessControl;
use crate::shared::ids::{InventoryId, OrganizationId, UserId};
use crate::shared::serde_ext::null_as_default;
use crate::store::{Collection, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub id: InventoryId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

impl Document for Inventory {
    fn collection(&self) -> Collection {
        Collection::Inventories
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}
