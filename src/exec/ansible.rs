use super::cloud::apply_cloud_environment;
use super::interpreter::{agent_key, AgentKey};
use super::{workspace_err, Environment, ExecError, Interpreter, Invocation, Plan, Preparation};
use crate::config::Settings;
use crate::models::{Credential, CredentialKind, JobType};
use crate::queue::AnsibleUnit;
use crate::shared::fs_atomic::write_private_file;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub struct AnsibleInterpreter<'u> {
    pub unit: &'u AnsibleUnit,
    pub machine: Option<Credential>,
    pub network: Option<Credential>,
    pub cloud: Option<Credential>,
}

impl Interpreter for AnsibleInterpreter<'_> {
    fn timeout(&self, settings: &Settings) -> Duration {
        settings.ansible_timeout()
    }

    fn agent_keys(&self) -> Vec<AgentKey> {
        [self.machine.as_ref(), self.network.as_ref()]
            .into_iter()
            .filter_map(agent_key)
            .collect()
    }

    fn plan(&self, prep: &Preparation<'_>) -> Result<Plan, ExecError> {
        let job = &self.unit.job;
        let mut invocation = Invocation::new(&prep.settings.binaries.ansible_playbook);
        let args = &mut invocation.args;
        args.push("-i".to_string());
        args.push(prep.settings.plugins.inventory_script.display().to_string());
        if job.job_type == JobType::Check {
            args.push("--check".to_string());
        }
        if job.forks > 0 {
            args.push("-f".to_string());
            args.push(job.forks.to_string());
        }
        if !job.limit.is_empty() {
            args.push("-l".to_string());
            args.push(job.limit.clone());
        }
        if job.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(usize::from(job.verbosity.min(5)))));
        }
        if !job.extra_vars.is_empty() {
            args.push("-e".to_string());
            args.push(encode_vars(&job.extra_vars)?);
        }
        if !job.job_tags.is_empty() {
            args.push("-t".to_string());
            args.push(job.job_tags.clone());
        }
        if !job.skip_tags.is_empty() {
            args.push(format!("--skip-tags={}", job.skip_tags));
        }
        if job.force_handlers {
            args.push("--force-handlers".to_string());
        }
        if !job.start_at_task.is_empty() {
            args.push(format!("--start-at-task={}", job.start_at_task));
        }
        args.push("-e".to_string());
        args.push(encode_vars(&self.system_vars())?);

        if let Some(machine) = &self.machine {
            if !machine.username.is_empty() {
                args.push("-u".to_string());
                if machine.domain.is_empty() {
                    args.push(machine.username.clone());
                } else {
                    args.push(format!("{}@{}", machine.username, machine.domain));
                }
            }
            if job.become_enabled {
                args.push("-b".to_string());
                if !machine.become_method.is_empty() {
                    args.push(format!("--become-method={}", machine.become_method));
                }
                if !machine.become_username.is_empty() {
                    args.push(format!("--become-user={}", machine.become_username));
                }
            }
            if !machine.vault_password.is_empty() {
                let path = prep.transient.join("vault_pass");
                write_private_file(&path, machine.vault_password.as_bytes())
                    .map_err(|err| workspace_err(&path, err))?;
                args.push(format!("--vault-password-file={}", path.display()));
            }

            let mut hidden = Map::new();
            if machine.kind == CredentialKind::Ssh && !machine.password.is_empty() {
                hidden.insert(
                    "ansible_ssh_pass".to_string(),
                    Value::from(machine.password.clone()),
                );
            }
            if !machine.become_password.is_empty() {
                hidden.insert(
                    "ansible_become_pass".to_string(),
                    Value::from(machine.become_password.clone()),
                );
            }
            if !hidden.is_empty() {
                invocation.hidden_args = vec!["-e".to_string(), encode_vars(&hidden)?];
            }
        }
        invocation.tail_args = vec![job.playbook.clone()];

        let mut env = prep.base_environment(job.id.as_str());
        ansible_environment(prep, &mut env);
        env.set("INVENTORY_HOSTVARS", "True");
        env.set("INVENTORY_ID", self.unit.inventory.id.to_string());
        if let Some(network) = &self.network {
            env.set("ANSIBLE_NET_USERNAME", network.username.clone());
            env.set_secret("ANSIBLE_NET_PASSWORD", network.password.clone());
            if network.authorize {
                env.set("ANSIBLE_NET_AUTHORIZE", "1");
                env.set_secret("ANSIBLE_NET_AUTH_PASS", network.authorize_password.clone());
            }
        }
        if let Some(cloud) = &self.cloud {
            apply_cloud_environment(cloud, prep.transient, &mut env)?;
        }

        Ok(Plan {
            invocations: vec![invocation],
            env,
        })
    }
}

impl AnsibleInterpreter<'_> {
    fn system_vars(&self) -> Map<String, Value> {
        let job = &self.unit.job;
        let created_by = job.created_by.as_ref().map(|id| id.to_string());
        let vars = json!({
            "tensor_job_template_name": self.unit.template.name,
            "tensor_job_id": job.id,
            "tensor_user_id": created_by,
            "tensor_job_template_id": self.unit.template.id,
            "tensor_user_name": created_by,
            "tensor_job_launch_type": job.launch_type,
        });
        match vars {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Settings shared by every `ansible-playbook` run, project updates included.
pub(crate) fn ansible_environment(prep: &Preparation<'_>, env: &mut Environment) {
    env.set("ANSIBLE_PARAMIKO_RECORD_HOST_KEYS", "False");
    env.set(
        "ANSIBLE_CALLBACK_PLUGINS",
        prep.settings.plugins.callback_dir.display().to_string(),
    );
    env.set("ANSIBLE_HOST_KEY_CHECKING", "False");
    env.set("ANSIBLE_FORCE_COLOR", "True");
}

pub(crate) fn encode_vars(vars: &Map<String, Value>) -> Result<String, ExecError> {
    serde_json::to_string(vars).map_err(|source| ExecError::Encode {
        what: "extra vars",
        source,
    })
}
