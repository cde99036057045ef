use super::AccessControl;
use crate::crypt::{is_sentinel, redact, CipherError, SecretCipher};
use crate::shared::ids::{CredentialId, OrganizationId, UserId};
use crate::shared::serde_ext::null_as_default;
use crate::store::{Collection, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Ssh,
    Net,
    Windows,
    Scm,
    Aws,
    Rax,
    Vmware,
    Satellite6,
    Cloudforms,
    Gce,
    Azure,
    Openstack,
}

/// The slot a credential fills on a template or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRole {
    Machine,
    Network,
    Cloud,
    Scm,
}

impl CredentialRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::Network => "network",
            Self::Cloud => "cloud",
            Self::Scm => "scm",
        }
    }
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Net => "net",
            Self::Windows => "windows",
            Self::Scm => "scm",
            Self::Aws => "aws",
            Self::Rax => "rax",
            Self::Vmware => "vmware",
            Self::Satellite6 => "satellite6",
            Self::Cloudforms => "cloudforms",
            Self::Gce => "gce",
            Self::Azure => "azure",
            Self::Openstack => "openstack",
        }
    }

    pub fn is_cloud(self) -> bool {
        matches!(
            self,
            Self::Aws
                | Self::Azure
                | Self::Cloudforms
                | Self::Gce
                | Self::Openstack
                | Self::Rax
                | Self::Satellite6
                | Self::Vmware
        )
    }

    pub fn fits(self, role: CredentialRole) -> bool {
        match role {
            CredentialRole::Machine => matches!(self, Self::Ssh | Self::Windows),
            CredentialRole::Network => self == Self::Net,
            CredentialRole::Cloud => self.is_cloud(),
            CredentialRole::Scm => self == Self::Scm,
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: CredentialKind,
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub become_method: String,
    #[serde(default)]
    pub become_username: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub subscription: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub authorize: bool,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssh_key_data: String,
    #[serde(default)]
    pub ssh_key_unlock: String,
    #[serde(default)]
    pub become_password: String,
    #[serde(default)]
    pub vault_password: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub authorize_password: String,
    #[serde(default)]
    pub security_token: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub modified: i64,
}

impl Credential {
    pub const SECRET_FIELDS: [&'static str; 8] = [
        "password",
        "ssh_key_data",
        "ssh_key_unlock",
        "become_password",
        "vault_password",
        "secret",
        "authorize_password",
        "security_token",
    ];

    fn secrets(&self) -> [&String; 8] {
        [
            &self.password,
            &self.ssh_key_data,
            &self.ssh_key_unlock,
            &self.become_password,
            &self.vault_password,
            &self.secret,
            &self.authorize_password,
            &self.security_token,
        ]
    }

    fn secrets_mut(&mut self) -> [&mut String; 8] {
        [
            &mut self.password,
            &mut self.ssh_key_data,
            &mut self.ssh_key_unlock,
            &mut self.become_password,
            &mut self.vault_password,
            &mut self.secret,
            &mut self.authorize_password,
            &mut self.security_token,
        ]
    }

    /// Prepares a submitted credential for storage. A sentinel keeps the
    /// previously stored ciphertext, existing ciphertext is kept as is and
    /// anything else is treated as plaintext.
    pub fn seal_secrets(
        &mut self,
        cipher: &SecretCipher,
        previous: Option<&Credential>,
    ) -> Result<(), CipherError> {
        let previous_secrets = previous.map(Credential::secrets);
        for (index, field) in self.secrets_mut().into_iter().enumerate() {
            if is_sentinel(field) {
                *field = previous_secrets
                    .map(|secrets| secrets[index].clone())
                    .unwrap_or_default();
            } else if !SecretCipher::is_ciphertext(field) {
                *field = cipher.encrypt(field)?;
            }
        }
        Ok(())
    }

    /// Copy safe to hand to any caller outside the engine.
    pub fn redacted(&self) -> Credential {
        let mut copy = self.clone();
        for field in copy.secrets_mut() {
            *field = redact(field);
        }
        copy
    }
}

impl Document for Credential {
    fn collection(&self) -> Collection {
        Collection::Credentials
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

#[cfg(test)]
pub(crate) fn sample_credential(id: &str, kind: CredentialKind) -> Credential {
    Credential {
        id: CredentialId::parse(id).expect("credential id"),
        name: format!("cred {id}"),
        description: String::new(),
        kind,
        organization_id: None,
        username: String::new(),
        domain: String::new(),
        become_method: String::new(),
        become_username: String::new(),
        client: String::new(),
        email: String::new(),
        project: String::new(),
        subscription: String::new(),
        tenant: String::new(),
        host: String::new(),
        authorize: false,
        password: String::new(),
        ssh_key_data: String::new(),
        ssh_key_unlock: String::new(),
        become_password: String::new(),
        vault_password: String::new(),
        secret: String::new(),
        authorize_password: String::new(),
        security_token: String::new(),
        roles: Vec::new(),
        created_by: None,
        created: 0,
        modified: 0,
    }
}
