use super::{AccessControl, JobStatus, JobType};
use crate::shared::ids::{CredentialId, InventoryId, OrganizationId, ProjectId, TemplateId, UserId};
use crate::shared::serde_ext::null_as_default;
use crate::store::{Collection, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_ansible_job_type")]
    pub job_type: JobType,
    pub inventory_id: Option<InventoryId>,
    pub project_id: ProjectId,
    pub playbook: String,
    #[serde(default)]
    pub machine_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub network_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub cloud_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub forks: u32,
    #[serde(default)]
    pub limit: String,
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default)]
    pub extra_vars: Map<String, Value>,
    #[serde(default)]
    pub job_tags: String,
    #[serde(default)]
    pub skip_tags: String,
    #[serde(default)]
    pub start_at_task: String,
    #[serde(default)]
    pub force_handlers: bool,
    #[serde(default)]
    pub become_enabled: bool,
    #[serde(default = "default_true")]
    pub allow_simultaneous: bool,
    #[serde(default)]
    pub prompt_variables: bool,
    #[serde(default)]
    pub prompt_limit: bool,
    #[serde(default)]
    pub prompt_tags: bool,
    #[serde(default)]
    pub prompt_skip_tags: bool,
    #[serde(default)]
    pub prompt_job_type: bool,
    #[serde(default)]
    pub prompt_inventory: bool,
    #[serde(default)]
    pub prompt_credential: bool,
    pub organization_id: Option<OrganizationId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
    #[serde(default)]
    pub last_job_run: Option<i64>,
    #[serde(default)]
    pub last_job_failed: bool,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerraformJobTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_terraform_job_type")]
    pub job_type: JobType,
    pub project_id: ProjectId,
    #[serde(default)]
    pub machine_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub cloud_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub update_on_launch: bool,
    #[serde(default = "default_true")]
    pub allow_simultaneous: bool,
    #[serde(default)]
    pub prompt_variables: bool,
    #[serde(default)]
    pub prompt_credential: bool,
    #[serde(default)]
    pub prompt_job_type: bool,
    pub organization_id: Option<OrganizationId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
    #[serde(default)]
    pub last_job_run: Option<i64>,
    #[serde(default)]
    pub last_job_failed: bool,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

fn default_true() -> bool {
    true
}

fn default_ansible_job_type() -> JobType {
    JobType::Run
}

fn default_terraform_job_type() -> JobType {
    JobType::Apply
}

impl Document for JobTemplate {
    fn collection(&self) -> Collection {
        Collection::JobTemplates
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for TerraformJobTemplate {
    fn collection(&self) -> Collection {
        Collection::TerraformJobTemplates
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

#[cfg(test)]
pub(crate) fn sample_job_template(id: &str, project: &str, inventory: &str) -> JobTemplate {
    JobTemplate {
        id: TemplateId::parse(id).expect("template id"),
        name: format!("template {id}"),
        description: String::new(),
        job_type: JobType::Run,
        inventory_id: Some(InventoryId::parse(inventory).expect("inventory id")),
        project_id: ProjectId::parse(project).expect("project id"),
        playbook: "site.yml".to_string(),
        machine_credential_id: None,
        network_credential_id: None,
        cloud_credential_id: None,
        forks: 0,
        limit: String::new(),
        verbosity: 0,
        extra_vars: Map::new(),
        job_tags: String::new(),
        skip_tags: String::new(),
        start_at_task: String::new(),
        force_handlers: false,
        become_enabled: false,
        allow_simultaneous: true,
        prompt_variables: false,
        prompt_limit: false,
        prompt_tags: false,
        prompt_skip_tags: false,
        prompt_job_type: false,
        prompt_inventory: false,
        prompt_credential: false,
        organization_id: None,
        roles: Vec::new(),
        last_job_run: None,
        last_job_failed: false,
        status: None,
        created_by: None,
    }
}
