use super::ResourceKind;
use crate::models::{
    AccessControl, Credential, Inventory, JobTemplate, Organization, Project, Team,
    TerraformJobTemplate,
};
use crate::shared::ids::OrganizationId;

/// A resource that carries its own access list and may be scoped to an
/// organization.
pub trait Protected {
    fn resource_kind(&self) -> ResourceKind;
    fn resource_id(&self) -> &str;
    /// Parent organization whose roles flow down to this resource.
    fn organization_id(&self) -> Option<&OrganizationId>;
    fn access_list(&self) -> &[AccessControl];
}

impl Protected for Organization {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Organization
    }

    fn resource_id(&self) -> &str {
        self.id.as_str()
    }

    fn organization_id(&self) -> Option<&OrganizationId> {
        None
    }

    fn access_list(&self) -> &[AccessControl] {
        &self.roles
    }
}

impl Protected for Team {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Team
    }

    fn resource_id(&self) -> &str {
        self.id.as_str()
    }

    fn organization_id(&self) -> Option<&OrganizationId> {
        Some(&self.organization_id)
    }

    fn access_list(&self) -> &[AccessControl] {
        &self.roles
    }
}

macro_rules! impl_protected {
    ($ty:ty, $kind:expr) => {
        impl Protected for $ty {
            fn resource_kind(&self) -> ResourceKind {
                $kind
            }

            fn resource_id(&self) -> &str {
                self.id.as_str()
            }

            fn organization_id(&self) -> Option<&OrganizationId> {
                self.organization_id.as_ref()
            }

            fn access_list(&self) -> &[AccessControl] {
                &self.roles
            }
        }
    };
}

impl_protected!(Credential, ResourceKind::Credential);
impl_protected!(Project, ResourceKind::Project);
impl_protected!(Inventory, ResourceKind::Inventory);
impl_protected!(JobTemplate, ResourceKind::JobTemplate);
impl_protected!(TerraformJobTemplate, ResourceKind::TerraformJobTemplate);
