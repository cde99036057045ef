use super::ansible::{ansible_environment, encode_vars};
use super::interpreter::{agent_key, AgentKey};
use super::{ExecError, Interpreter, Invocation, Plan, Preparation};
use crate::config::Settings;
use crate::models::Credential;
use crate::queue::SyncUnit;
use serde_json::{Map, Value};
use std::time::Duration;

/// Refreshes a project checkout by running the bundled update playbook
/// against localhost.
pub struct SyncInterpreter<'u> {
    pub unit: &'u SyncUnit,
    pub scm: Option<Credential>,
}

impl Interpreter for SyncInterpreter<'_> {
    fn timeout(&self, settings: &Settings) -> Duration {
        settings.sync_timeout()
    }

    fn agent_keys(&self) -> Vec<AgentKey> {
        agent_key(self.scm.as_ref()).into_iter().collect()
    }

    fn plan(&self, prep: &Preparation<'_>) -> Result<Plan, ExecError> {
        let project = &self.unit.project;
        let branch = if project.scm_branch.trim().is_empty() {
            "HEAD".to_string()
        } else {
            project.scm_branch.clone()
        };

        let mut vars = Map::new();
        vars.insert("scm_type".to_string(), Value::from(project.scm_type.as_str()));
        vars.insert("scm_url".to_string(), Value::from(project.scm_url.clone()));
        vars.insert("scm_branch".to_string(), Value::from(branch));
        vars.insert("scm_clean".to_string(), Value::from(project.scm_clean));
        vars.insert(
            "scm_delete_on_update".to_string(),
            Value::from(project.scm_delete_on_update),
        );
        vars.insert(
            "project_path".to_string(),
            Value::from(prep.checkout.display().to_string()),
        );
        vars.insert("scm_accept_hostkey".to_string(), Value::from(true));

        let mut hidden = Map::new();
        if let Some(scm) = &self.scm {
            if !scm.username.is_empty() {
                vars.insert("scm_username".to_string(), Value::from(scm.username.clone()));
            }
            if !scm.password.is_empty() {
                hidden.insert("scm_password".to_string(), Value::from(scm.password.clone()));
            }
        }

        let mut invocation = Invocation::new(&prep.settings.binaries.ansible_playbook);
        invocation.args = vec![
            "-i".to_string(),
            "localhost,".to_string(),
            "-v".to_string(),
            "-e".to_string(),
            encode_vars(&vars)?,
        ];
        if !hidden.is_empty() {
            invocation.hidden_args = vec!["-e".to_string(), encode_vars(&hidden)?];
        }
        invocation.tail_args = vec![prep.settings.plugins.sync_playbook.display().to_string()];

        let mut env = prep.base_environment(self.unit.job.id.as_str());
        ansible_environment(prep, &mut env);

        Ok(Plan {
            invocations: vec![invocation],
            env,
        })
    }
}
