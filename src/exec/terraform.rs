use super::cloud::apply_cloud_environment;
use super::interpreter::{agent_key, AgentKey};
use super::{workspace_err, ExecError, Interpreter, Invocation, Plan, Preparation};
use crate::config::Settings;
use crate::models::{Credential, JobType};
use crate::queue::TerraformUnit;
use crate::shared::fs_atomic::write_private_file;
use std::time::Duration;

pub struct TerraformInterpreter<'u> {
    pub unit: &'u TerraformUnit,
    pub machine: Option<Credential>,
    pub cloud: Option<Credential>,
}

impl Interpreter for TerraformInterpreter<'_> {
    fn timeout(&self, settings: &Settings) -> Duration {
        settings.terraform_timeout()
    }

    fn agent_keys(&self) -> Vec<AgentKey> {
        agent_key(self.machine.as_ref()).into_iter().collect()
    }

    /// `terraform get` first, then the command for the job type. Plans use
    /// `-detailed-exitcode`, where 2 means "changes pending" and is a success.
    fn plan(&self, prep: &Preparation<'_>) -> Result<Plan, ExecError> {
        let job = &self.unit.job;
        let binary = &prep.settings.binaries.terraform;
        let directory = if job.directory.trim().is_empty() {
            ".".to_string()
        } else {
            job.directory.clone()
        };

        let mut get = Invocation::new(binary);
        get.args.push("get".to_string());
        if job.update_on_launch {
            get.args.push("-update".to_string());
        }
        get.tail_args.push(directory.clone());

        let mut main = Invocation::new(binary);
        match job.job_type {
            JobType::Plan => {
                main.args.extend(["plan", "-input=false", "-detailed-exitcode"].map(String::from));
                main.success_codes = vec![0, 2];
            }
            JobType::Destroy => {
                main.args.extend(["destroy", "-auto-approve"].map(String::from));
                if !job.target.is_empty() {
                    main.args.push("-target".to_string());
                    main.args.push(job.target.clone());
                }
            }
            JobType::DestroyPlan => {
                main.args.extend(["plan", "-destroy", "-input=false"].map(String::from));
            }
            _ => {
                main.args.extend(["apply", "-input=false", "-auto-approve"].map(String::from));
            }
        }
        if let Some(parallelism) = job.parallelism {
            main.args.push(format!("-parallelism={parallelism}"));
        }
        if !job.extra_vars.is_empty() {
            let path = prep.transient.join("vars.tfvars.json");
            let raw = serde_json::to_vec(&job.extra_vars).map_err(|source| ExecError::Encode {
                what: "terraform vars",
                source,
            })?;
            write_private_file(&path, &raw).map_err(|err| workspace_err(&path, err))?;
            main.args.push(format!("-var-file={}", path.display()));
        }
        main.tail_args.push(directory);

        let mut env = prep.base_environment(job.id.as_str());
        if let Some(cloud) = &self.cloud {
            apply_cloud_environment(cloud, prep.transient, &mut env)?;
        }

        Ok(Plan {
            invocations: vec![get, main],
            env,
        })
    }
}
