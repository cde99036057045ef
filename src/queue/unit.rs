use super::Topic;
use crate::models::{
    Credential, Inventory, Job, JobKind, JobTemplate, Project, TerraformJobTemplate,
};
use crate::shared::ids::JobId;
use serde::{Deserialize, Serialize};

/// Identity of the job a unit must wait on before it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousJob {
    pub id: JobId,
    pub kind: JobKind,
    pub name: String,
}

/// Credentials travel as stored: secret fields are ciphertext and are only
/// decrypted by the runner that executes the unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsibleUnit {
    pub job: Job,
    pub template: JobTemplate,
    pub project: Project,
    pub inventory: Inventory,
    #[serde(default)]
    pub machine_credential: Option<Credential>,
    #[serde(default)]
    pub network_credential: Option<Credential>,
    #[serde(default)]
    pub cloud_credential: Option<Credential>,
    pub token: String,
    #[serde(default)]
    pub previous_job: Option<PreviousJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUnit {
    pub job: Job,
    pub project: Project,
    #[serde(default)]
    pub scm_credential: Option<Credential>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformUnit {
    pub job: Job,
    pub template: TerraformJobTemplate,
    pub project: Project,
    #[serde(default)]
    pub machine_credential: Option<Credential>,
    #[serde(default)]
    pub cloud_credential: Option<Credential>,
    pub token: String,
    #[serde(default)]
    pub previous_job: Option<PreviousJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum JobUnit {
    Ansible(AnsibleUnit),
    Sync(SyncUnit),
    Terraform(TerraformUnit),
}

impl JobUnit {
    /// Sync units share the ansible topic since they run `ansible-playbook`.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Ansible(_) | Self::Sync(_) => Topic::Ansible,
            Self::Terraform(_) => Topic::Terraform,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            Self::Ansible(unit) => &unit.job,
            Self::Sync(unit) => &unit.job,
            Self::Terraform(unit) => &unit.job,
        }
    }

    pub fn project(&self) -> &Project {
        match self {
            Self::Ansible(unit) => &unit.project,
            Self::Sync(unit) => &unit.project,
            Self::Terraform(unit) => &unit.project,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::Ansible(unit) => &unit.token,
            Self::Sync(unit) => &unit.token,
            Self::Terraform(unit) => &unit.token,
        }
    }

    pub fn previous_job(&self) -> Option<&PreviousJob> {
        match self {
            Self::Ansible(unit) => unit.previous_job.as_ref(),
            Self::Sync(_) => None,
            Self::Terraform(unit) => unit.previous_job.as_ref(),
        }
    }

    pub fn set_previous_job(&mut self, previous: PreviousJob) {
        match self {
            Self::Ansible(unit) => {
                unit.job.previous_job_id = Some(previous.id.clone());
                unit.previous_job = Some(previous);
            }
            Self::Terraform(unit) => {
                unit.job.previous_job_id = Some(previous.id.clone());
                unit.previous_job = Some(previous);
            }
            Self::Sync(_) => {}
        }
    }

    /// Every credential the unit carries, in machine/network/cloud/scm order.
    pub fn credentials(&self) -> Vec<&Credential> {
        match self {
            Self::Ansible(unit) => [
                unit.machine_credential.as_ref(),
                unit.network_credential.as_ref(),
                unit.cloud_credential.as_ref(),
            ]
            .into_iter()
            .flatten()
            .collect(),
            Self::Sync(unit) => unit.scm_credential.iter().collect(),
            Self::Terraform(unit) => [
                unit.machine_credential.as_ref(),
                unit.cloud_credential.as_ref(),
            ]
            .into_iter()
            .flatten()
            .collect(),
        }
    }
}
