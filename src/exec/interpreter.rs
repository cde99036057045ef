use super::{ansible, sync, terraform, ExecError};
use crate::config::Settings;
use crate::crypt::SecretCipher;
use crate::models::Credential;
use crate::queue::JobUnit;
use crate::shared::logging::mask;
use std::path::Path;
use std::time::Duration;

const FIXED_PATH: &str = "/bin:/usr/local/bin:/usr/bin";

/// One process to run. `hidden_args` carry secrets and are never recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub hidden_args: Vec<String>,
    pub tail_args: Vec<String>,
    pub success_codes: Vec<i32>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            hidden_args: Vec::new(),
            tail_args: Vec::new(),
            success_codes: vec![0],
        }
    }

    pub fn argv(&self) -> Vec<String> {
        self.args
            .iter()
            .chain(&self.hidden_args)
            .chain(&self.tail_args)
            .cloned()
            .collect()
    }

    /// Program plus every non-secret argument, for the job record.
    pub fn recorded(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .chain(self.tail_args.iter().cloned())
            .collect()
    }

    pub fn is_success(&self, code: Option<i32>) -> bool {
        code.is_some_and(|code| self.success_codes.contains(&code))
    }
}

/// Variables handed to the interpreter and their recorded form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
    recorded: Vec<String>,
}

impl Environment {
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.recorded.push(format!("{key}={value}"));
        self.vars.push((key.to_string(), value));
    }

    /// Recorded as asterisks of the same length.
    pub fn set_secret(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.recorded.push(format!("{key}={}", mask(&value)));
        self.vars.push((key.to_string(), value));
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn recorded(&self) -> &[String] {
        &self.recorded
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Everything an interpreter needs from the prepared job sandbox.
pub struct Preparation<'a> {
    pub settings: &'a Settings,
    pub checkout: &'a Path,
    pub transient: &'a Path,
    pub agent_socket: &'a Path,
    pub agent_pid: u32,
    pub token: &'a str,
}

impl Preparation<'_> {
    /// Variables common to every job kind.
    pub fn base_environment(&self, job_id: &str) -> Environment {
        let mut env = Environment::default();
        let checkout = self.checkout.display().to_string();
        env.set("TERM", "xterm");
        env.set("PROJECT_PATH", checkout.clone());
        env.set("HOME_PATH", self.settings.projects_home.display().to_string());
        env.set("PWD", checkout);
        env.set("SHLVL", "0");
        env.set(
            "HOME",
            std::env::var("HOME").unwrap_or_else(|_| "/root".to_string()),
        );
        env.set("PATH", FIXED_PATH);
        env.set_secret("REST_API_TOKEN", self.token);
        env.set("REST_API_URL", self.settings.api_url.clone());
        env.set("JOB_ID", job_id);
        env.set("SSH_AUTH_SOCK", self.agent_socket.display().to_string());
        env.set("SSH_AGENT_PID", self.agent_pid.to_string());
        env
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub invocations: Vec<Invocation>,
    pub env: Environment,
}

/// A private key to load into the job's agent.
#[derive(Debug, Clone)]
pub struct AgentKey {
    pub credential_id: String,
    pub key: String,
    pub passphrase: Option<String>,
}

pub trait Interpreter {
    fn timeout(&self, settings: &Settings) -> Duration;

    fn agent_keys(&self) -> Vec<AgentKey>;

    fn plan(&self, prep: &Preparation<'_>) -> Result<Plan, ExecError>;
}

/// Decrypts the unit's credentials and picks the interpreter for its kind.
/// Any decryption failure stops the job before an agent is started.
pub fn interpreter_for<'u>(
    unit: &'u JobUnit,
    cipher: &SecretCipher,
) -> Result<Box<dyn Interpreter + 'u>, ExecError> {
    let open = |credential: &Option<Credential>| -> Result<Option<Credential>, ExecError> {
        credential
            .as_ref()
            .map(|credential| decrypt_credential(cipher, credential))
            .transpose()
    };
    Ok(match unit {
        JobUnit::Ansible(unit) => Box::new(ansible::AnsibleInterpreter {
            unit,
            machine: open(&unit.machine_credential)?,
            network: open(&unit.network_credential)?,
            cloud: open(&unit.cloud_credential)?,
        }),
        JobUnit::Sync(unit) => Box::new(sync::SyncInterpreter {
            unit,
            scm: open(&unit.scm_credential)?,
        }),
        JobUnit::Terraform(unit) => Box::new(terraform::TerraformInterpreter {
            unit,
            machine: open(&unit.machine_credential)?,
            cloud: open(&unit.cloud_credential)?,
        }),
    })
}

/// Copy of `credential` with every secret field in plaintext.
pub fn decrypt_credential(
    cipher: &SecretCipher,
    credential: &Credential,
) -> Result<Credential, ExecError> {
    let mut open = credential.clone();
    let id = credential.id.to_string();
    let fields: [(&'static str, &mut String); 8] = [
        ("password", &mut open.password),
        ("ssh_key_data", &mut open.ssh_key_data),
        ("ssh_key_unlock", &mut open.ssh_key_unlock),
        ("become_password", &mut open.become_password),
        ("vault_password", &mut open.vault_password),
        ("secret", &mut open.secret),
        ("authorize_password", &mut open.authorize_password),
        ("security_token", &mut open.security_token),
    ];
    for (field, value) in fields {
        if value.is_empty() {
            continue;
        }
        *value = cipher
            .decrypt(value)
            .map_err(|source| ExecError::Decrypt {
                credential_id: id.clone(),
                field,
                source,
            })?;
    }
    Ok(open)
}

/// Key material of `credential`, if it carries any.
pub(crate) fn agent_key(credential: Option<&Credential>) -> Option<AgentKey> {
    let credential = credential?;
    if credential.ssh_key_data.trim().is_empty() {
        return None;
    }
    Some(AgentKey {
        credential_id: credential.id.to_string(),
        key: credential.ssh_key_data.clone(),
        passphrase: Some(credential.ssh_key_unlock.clone()).filter(|value| !value.is_empty()),
    })
}
