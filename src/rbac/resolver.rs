use super::{Capability, Grant, Protected, ResourceKind};
use crate::models::{AccessControl, GranteeKind, Organization, User};
use crate::shared::ids::{OrganizationId, TeamId, UserId};
use crate::shared::logging::append_json_log;
use crate::store::StoreError;
use serde_json::Value;
use std::cell::OnceCell;
use std::path::PathBuf;

pub trait AccessDirectory {
    fn teams_of(&self, user: &UserId) -> Result<Vec<TeamId>, StoreError>;
    fn organization(&self, id: &OrganizationId) -> Result<Option<Organization>, StoreError>;
}

/// Which rule granted (or refused) a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPath {
    Superuser,
    SystemAuditor,
    Direct,
    Team,
    Organization,
    Denied,
}

impl AccessPath {
    pub fn allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

pub struct AccessResolver<'a, D: AccessDirectory + ?Sized> {
    directory: &'a D,
    audit_log: Option<PathBuf>,
}

impl<'a, D: AccessDirectory + ?Sized> AccessResolver<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self {
            directory,
            audit_log: None,
        }
    }

    /// Denials are appended to `path` as JSON lines.
    pub fn with_audit_log(mut self, path: PathBuf) -> Self {
        self.audit_log = Some(path);
        self
    }

    pub fn can_read(&self, user: &User, resource: &dyn Protected) -> bool {
        self.check(user, resource, Capability::Read).allowed()
    }

    pub fn can_write(&self, user: &User, resource: &dyn Protected) -> bool {
        self.check(user, resource, Capability::Write).allowed()
    }

    pub fn can_use(&self, user: &User, resource: &dyn Protected) -> bool {
        self.check(user, resource, Capability::Use).allowed()
    }

    pub fn can_execute(&self, user: &User, resource: &dyn Protected) -> bool {
        self.check(user, resource, Capability::Execute).allowed()
    }

    pub fn check(&self, user: &User, resource: &dyn Protected, capability: Capability) -> AccessPath {
        let path = self.resolve(user, resource, capability);
        if path == AccessPath::Denied {
            self.audit_denial(user, resource, capability);
        }
        path
    }

    fn resolve(&self, user: &User, resource: &dyn Protected, capability: Capability) -> AccessPath {
        if user.is_superuser {
            return AccessPath::Superuser;
        }
        if user.is_system_auditor && capability == Capability::Read {
            return AccessPath::SystemAuditor;
        }

        let kind = resource.resource_kind();
        let memberships = Memberships::new(self.directory, &user.id);
        let grants = typed_grants(kind, resource.resource_id(), resource.access_list());

        if grants.iter().any(|grant| {
            grant.grantee_kind == GranteeKind::User
                && grant.grantee_id == user.id.as_str()
                && grant.implies(capability)
        }) {
            return AccessPath::Direct;
        }

        for grant in grants
            .iter()
            .filter(|grant| grant.grantee_kind == GranteeKind::Team && grant.implies(capability))
        {
            match memberships.contains(&grant.grantee_id) {
                Some(true) => return AccessPath::Team,
                Some(false) => {}
                None => return AccessPath::Denied,
            }
        }

        let Some(organization_id) = resource.organization_id() else {
            return AccessPath::Denied;
        };
        let organization = match self.directory.organization(organization_id) {
            Ok(Some(organization)) => organization,
            Ok(None) | Err(_) => return AccessPath::Denied,
        };
        let org_grants = typed_grants(
            ResourceKind::Organization,
            organization.id.as_str(),
            &organization.roles,
        );
        for grant in org_grants
            .iter()
            .filter(|grant| grant.role.inherited_capabilities().contains(&capability))
        {
            let applies = match grant.grantee_kind {
                GranteeKind::User => Some(grant.grantee_id == user.id.as_str()),
                GranteeKind::Team => memberships.contains(&grant.grantee_id),
            };
            match applies {
                Some(true) => return AccessPath::Organization,
                Some(false) => {}
                None => return AccessPath::Denied,
            }
        }

        AccessPath::Denied
    }

    fn audit_denial(&self, user: &User, resource: &dyn Protected, capability: Capability) {
        let Some(path) = &self.audit_log else {
            return;
        };
        append_json_log(
            path,
            "warn",
            "access.denied",
            &[
                ("user_id", Value::from(user.id.as_str())),
                ("resource_kind", Value::from(resource.resource_kind().as_str())),
                ("resource_id", Value::from(resource.resource_id())),
                ("capability", Value::from(capability.as_str())),
            ],
        );
    }
}

/// Malformed entries never grant anything.
fn typed_grants(kind: ResourceKind, resource_id: &str, entries: &[AccessControl]) -> Vec<Grant> {
    entries
        .iter()
        .filter_map(|entry| Grant::from_entry(kind, resource_id, entry).ok())
        .collect()
}

/// Team memberships, fetched on first use. `None` means the lookup failed.
struct Memberships<'a, D: AccessDirectory + ?Sized> {
    directory: &'a D,
    user: &'a UserId,
    teams: OnceCell<Option<Vec<TeamId>>>,
}

impl<'a, D: AccessDirectory + ?Sized> Memberships<'a, D> {
    fn new(directory: &'a D, user: &'a UserId) -> Self {
        Self {
            directory,
            user,
            teams: OnceCell::new(),
        }
    }

    fn contains(&self, team_id: &str) -> Option<bool> {
        self.teams
            .get_or_init(|| self.directory.teams_of(self.user).ok())
            .as_ref()
            .map(|teams| teams.iter().any(|team| team.as_str() == team_id))
    }
}
