use super::{workspace_err, Environment, ExecError};
use crate::models::{Credential, CredentialKind};
use crate::shared::fs_atomic::write_private_file;
use serde_json::json;
use std::path::Path;

/// Exports a decrypted cloud credential the way each provider's inventory
/// plugins and SDKs expect. Key files are written 0600 under `transient`.
pub fn apply_cloud_environment(
    credential: &Credential,
    transient: &Path,
    env: &mut Environment,
) -> Result<(), ExecError> {
    match credential.kind {
        CredentialKind::Aws => {
            env.set("AWS_ACCESS_KEY_ID", credential.username.clone());
            env.set_secret("AWS_SECRET_ACCESS_KEY", credential.password.clone());
            if !credential.security_token.is_empty() {
                env.set_secret("AWS_SECURITY_TOKEN", credential.security_token.clone());
            }
        }
        CredentialKind::Rax => {
            let path = transient.join("rax_creds");
            let body = format!(
                "[rackspace_cloud]\nusername = {}\napi_key = {}\n",
                credential.username, credential.password
            );
            write_private_file(&path, body.as_bytes()).map_err(|err| workspace_err(&path, err))?;
            env.set("RAX_CREDS_FILE", path.display().to_string());
        }
        CredentialKind::Gce => {
            let path = transient.join("gce_credentials.json");
            let body = json!({
                "type": "service_account",
                "private_key": credential.ssh_key_data,
                "client_email": credential.email,
                "project_id": credential.project,
            });
            let raw = serde_json::to_vec_pretty(&body).map_err(|source| ExecError::Encode {
                what: "gce credentials",
                source,
            })?;
            write_private_file(&path, &raw).map_err(|err| workspace_err(&path, err))?;
            env.set("GCE_EMAIL", credential.email.clone());
            env.set("GCE_PROJECT", credential.project.clone());
            env.set("GCE_CREDENTIALS_FILE_PATH", path.display().to_string());
        }
        CredentialKind::Azure => {
            if !credential.client.is_empty() && !credential.tenant.is_empty() {
                env.set("AZURE_CLIENT_ID", credential.client.clone());
                env.set_secret("AZURE_SECRET", credential.secret.clone());
                env.set("AZURE_TENANT", credential.tenant.clone());
            } else {
                env.set("AZURE_AD_USER", credential.username.clone());
                env.set_secret("AZURE_PASSWORD", credential.password.clone());
            }
            env.set("AZURE_SUBSCRIPTION_ID", credential.subscription.clone());
        }
        CredentialKind::Openstack => {
            let path = transient.join("clouds.yaml");
            let body = json!({
                "clouds": {
                    "devstack": {
                        "auth": {
                            "auth_url": credential.host,
                            "username": credential.username,
                            "password": credential.password,
                            "project_name": credential.project,
                        }
                    }
                }
            });
            let raw = serde_yaml::to_string(&body).map_err(|source| ExecError::EncodeYaml {
                what: "openstack clouds.yaml",
                source,
            })?;
            write_private_file(&path, raw.as_bytes()).map_err(|err| workspace_err(&path, err))?;
            env.set("OS_CLIENT_CONFIG_FILE", path.display().to_string());
        }
        CredentialKind::Vmware => {
            env.set("VMWARE_USER", credential.username.clone());
            env.set_secret("VMWARE_PASSWORD", credential.password.clone());
            env.set("VMWARE_HOST", credential.host.clone());
        }
        CredentialKind::Satellite6 => {
            env.set("FOREMAN_URL", credential.host.clone());
            env.set("FOREMAN_USERNAME", credential.username.clone());
            env.set_secret("FOREMAN_PASSWORD", credential.password.clone());
        }
        CredentialKind::Cloudforms => {
            env.set("CLOUDFORMS_URL", credential.host.clone());
            env.set("CLOUDFORMS_USERNAME", credential.username.clone());
            env.set_secret("CLOUDFORMS_PASSWORD", credential.password.clone());
        }
        CredentialKind::Ssh
        | CredentialKind::Net
        | CredentialKind::Windows
        | CredentialKind::Scm => {}
    }
    Ok(())
}
