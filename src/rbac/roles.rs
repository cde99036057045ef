use crate::models::{AccessControl, GranteeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Organization,
    Team,
    Credential,
    Project,
    Inventory,
    JobTemplate,
    TerraformJobTemplate,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Team => "team",
            Self::Credential => "credential",
            Self::Project => "project",
            Self::Inventory => "inventory",
            Self::JobTemplate => "job_template",
            Self::TerraformJobTemplate => "terraform_job_template",
        }
    }

    pub fn allowed_roles(self) -> &'static [Role] {
        match self {
            Self::Organization => &[Role::Admin, Role::Auditor, Role::Member, Role::Read],
            Self::Team => &[Role::Admin, Role::Member, Role::Read],
            Self::Credential => &[Role::Admin, Role::Use, Role::Read],
            Self::Project | Self::Inventory => &[Role::Admin, Role::Use, Role::Update, Role::Read],
            Self::JobTemplate | Self::TerraformJobTemplate => {
                &[Role::Admin, Role::Execute, Role::Read]
            }
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Auditor,
    Member,
    Read,
    Use,
    Update,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Use,
    Execute,
    Write,
    Admin,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Use => "use",
            Self::Execute => "execute",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

const ALL_CAPABILITIES: &[Capability] = &[
    Capability::Read,
    Capability::Use,
    Capability::Execute,
    Capability::Write,
    Capability::Admin,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RbacError {
    #[error("unknown role `{role}`")]
    UnknownRole { role: String },
    #[error("role `{role}` is not valid on a {kind}")]
    RoleNotAllowed { role: String, kind: ResourceKind },
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Auditor => "auditor",
            Self::Member => "member",
            Self::Read => "read",
            Self::Use => "use",
            Self::Update => "update",
            Self::Execute => "execute",
        }
    }

    /// Accepts bare names (`admin`) and kind-qualified names
    /// (`organization_admin`); the qualifier must match `kind`.
    pub fn parse_for(kind: ResourceKind, raw: &str) -> Result<Self, RbacError> {
        let raw = raw.trim();
        let bare = match raw.rsplit_once('_') {
            Some((qualifier, name)) if Self::from_bare(name).is_some() => {
                if qualifier != kind.as_str() {
                    return Err(RbacError::RoleNotAllowed {
                        role: raw.to_string(),
                        kind,
                    });
                }
                name
            }
            _ => raw,
        };
        let role = Self::from_bare(bare).ok_or_else(|| RbacError::UnknownRole {
            role: raw.to_string(),
        })?;
        if !kind.allowed_roles().contains(&role) {
            return Err(RbacError::RoleNotAllowed {
                role: raw.to_string(),
                kind,
            });
        }
        Ok(role)
    }

    fn from_bare(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Self::Admin),
            "auditor" => Some(Self::Auditor),
            "member" => Some(Self::Member),
            "read" => Some(Self::Read),
            "use" => Some(Self::Use),
            "update" => Some(Self::Update),
            "execute" => Some(Self::Execute),
            _ => None,
        }
    }

    /// Capabilities this role grants on the resource that carries it.
    /// `admin ⊇ execute/update/use ⊇ read`.
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Self::Admin => ALL_CAPABILITIES,
            Self::Use => &[Capability::Read, Capability::Use],
            Self::Update | Self::Execute => &[Capability::Read, Capability::Execute],
            Self::Auditor | Self::Member | Self::Read => &[Capability::Read],
        }
    }

    /// Capabilities an organization-level role passes down to every
    /// resource scoped to that organization.
    pub fn inherited_capabilities(self) -> &'static [Capability] {
        match self {
            Self::Admin => ALL_CAPABILITIES,
            Self::Auditor | Self::Member | Self::Read => &[Capability::Read],
            Self::Use | Self::Update | Self::Execute => &[],
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed access-control entry bound to the resource that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    pub grantee_kind: GranteeKind,
    pub grantee_id: String,
    pub role: Role,
}

impl Grant {
    pub fn from_entry(
        resource_kind: ResourceKind,
        resource_id: &str,
        entry: &AccessControl,
    ) -> Result<Self, RbacError> {
        Ok(Self {
            resource_kind,
            resource_id: resource_id.to_string(),
            grantee_kind: entry.grantee_type,
            grantee_id: entry.grantee_id.clone(),
            role: Role::parse_for(resource_kind, &entry.role)?,
        })
    }

    pub fn implies(&self, capability: Capability) -> bool {
        self.role.capabilities().contains(&capability)
    }
}

pub fn validate_access_list(kind: ResourceKind, entries: &[AccessControl]) -> Result<(), RbacError> {
    for entry in entries {
        Role::parse_for(kind, &entry.role)?;
    }
    Ok(())
}
