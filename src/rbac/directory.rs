use super::{AccessDirectory, ResourceKind, Role};
use crate::models::{GranteeKind, Organization, Team};
use crate::shared::ids::{OrganizationId, TeamId, UserId};
use crate::store::{Collection, DocumentStore, DocumentStoreExt, Filter, StoreError};

/// Membership and organization lookups backed by the document store.
pub struct StoreDirectory<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> StoreDirectory<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }
}

impl AccessDirectory for StoreDirectory<'_> {
    fn teams_of(&self, user: &UserId) -> Result<Vec<TeamId>, StoreError> {
        let teams: Vec<Team> = self.store.load_all(Collection::Teams, &Filter::new())?;
        Ok(teams
            .into_iter()
            .filter(|team| {
                team.roles.iter().any(|entry| {
                    entry.grantee_type == GranteeKind::User
                        && entry.grantee_id == user.as_str()
                        && matches!(
                            Role::parse_for(ResourceKind::Team, &entry.role),
                            Ok(Role::Member | Role::Admin)
                        )
                })
            })
            .map(|team| team.id)
            .collect())
    }

    fn organization(&self, id: &OrganizationId) -> Result<Option<Organization>, StoreError> {
        self.store.load(Collection::Organizations, id.as_str())
    }
}
