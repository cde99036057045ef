use crate::shared::ids::{CredentialId, InventoryId, JobId, ProjectId, TemplateId, UserId};
use crate::shared::time::now_secs;
use crate::store::{Collection, Document, DocumentStore, DocumentStoreExt, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Pending,
    Running,
    Successful,
    Failed,
    Canceled,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::New, JobStatus::Pending, JobStatus::Running];

    /// Re-writing the current status is allowed so redelivered work can
    /// repeat its writes; terminal states never change.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return !self.is_terminal() || matches!(self, JobStatus::Successful | JobStatus::Failed);
        }
        matches!(
            (self, next),
            (JobStatus::New, JobStatus::Pending)
                | (JobStatus::New, JobStatus::Failed)
                | (JobStatus::New, JobStatus::Canceled)
                | (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Pending, JobStatus::Canceled)
                | (JobStatus::Running, JobStatus::Successful)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ansible,
    Sync,
    Terraform,
}

impl JobKind {
    pub fn collection(self) -> Collection {
        match self {
            JobKind::Ansible | JobKind::Sync => Collection::Jobs,
            JobKind::Terraform => Collection::TerraformJobs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Ansible => "ansible",
            JobKind::Sync => "sync",
            JobKind::Terraform => "terraform",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Run,
    Check,
    UpdateJob,
    Apply,
    Plan,
    Destroy,
    DestroyPlan,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Run => "run",
            JobType::Check => "check",
            JobType::UpdateJob => "update_job",
            JobType::Apply => "apply",
            JobType::Plan => "plan",
            JobType::Destroy => "destroy",
            JobType::DestroyPlan => "destroy_plan",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "run" => Ok(JobType::Run),
            "check" => Ok(JobType::Check),
            "update_job" => Ok(JobType::UpdateJob),
            "apply" => Ok(JobType::Apply),
            "plan" => Ok(JobType::Plan),
            "destroy" => Ok(JobType::Destroy),
            "destroy_plan" => Ok(JobType::DestroyPlan),
            other => Err(format!("unknown job type `{other}`")),
        }
    }

    pub fn valid_for(self, kind: JobKind) -> bool {
        match kind {
            JobKind::Ansible => matches!(self, JobType::Run | JobType::Check),
            JobKind::Sync => self == JobType::UpdateJob,
            JobKind::Terraform => matches!(
                self,
                JobType::Apply | JobType::Plan | JobType::Destroy | JobType::DestroyPlan
            ),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchType {
    Manual,
    Dependency,
}

impl LaunchType {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchType::Manual => "manual",
            LaunchType::Dependency => "dependency",
        }
    }
}

/// One execution instance. Ansible, sync and terraform jobs share this
/// shape; fields that do not apply to a kind stay at their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: JobKind,
    pub job_type: JobType,
    pub launch_type: LaunchType,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub project_id: ProjectId,
    #[serde(default)]
    pub inventory_id: Option<InventoryId>,
    #[serde(default)]
    pub machine_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub network_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub cloud_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub scm_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub playbook: String,
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
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub update_on_launch: bool,
    pub status: JobStatus,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub started: Option<i64>,
    #[serde(default)]
    pub finished: Option<i64>,
    #[serde(default)]
    pub elapsed: f64,
    #[serde(default)]
    pub result_stdout: String,
    #[serde(default)]
    pub job_explanation: String,
    #[serde(default)]
    pub job_args: Vec<String>,
    #[serde(default)]
    pub job_env: Vec<String>,
    #[serde(default)]
    pub job_cwd: String,
    #[serde(default)]
    pub previous_job_id: Option<JobId>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub created_by: Option<UserId>,
    pub created: i64,
    #[serde(default)]
    pub modified: i64,
}

impl Job {
    /// A bare job of `kind` in status `new`; launch code fills in the rest.
    pub fn new(
        id: JobId,
        name: String,
        kind: JobKind,
        job_type: JobType,
        launch_type: LaunchType,
        project_id: ProjectId,
    ) -> Self {
        let now = now_secs();
        Self {
            id,
            name,
            description: String::new(),
            kind,
            job_type,
            launch_type,
            template_id: None,
            project_id,
            inventory_id: None,
            machine_credential_id: None,
            network_credential_id: None,
            cloud_credential_id: None,
            scm_credential_id: None,
            playbook: String::new(),
            forks: 0,
            limit: String::new(),
            verbosity: 0,
            extra_vars: Map::new(),
            job_tags: String::new(),
            skip_tags: String::new(),
            start_at_task: String::new(),
            force_handlers: false,
            become_enabled: false,
            directory: String::new(),
            target: String::new(),
            parallelism: None,
            update_on_launch: false,
            status: JobStatus::New,
            failed: false,
            started: None,
            finished: None,
            elapsed: 0.0,
            result_stdout: String::new(),
            job_explanation: String::new(),
            job_args: Vec::new(),
            job_env: Vec::new(),
            job_cwd: String::new(),
            previous_job_id: None,
            cancel_requested: false,
            created_by: None,
            created: now,
            modified: now,
        }
    }
}

impl Document for Job {
    fn collection(&self) -> Collection {
        self.kind.collection()
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobUpdateError {
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Moves a job to `next` and applies `update` in the same atomic write.
pub fn transition_job(
    store: &dyn DocumentStore,
    kind: JobKind,
    id: &JobId,
    next: JobStatus,
    update: impl FnOnce(&mut Job),
) -> Result<Job, JobUpdateError> {
    transition_where(store, kind, id, next, |_| true, update)
}

/// Like [`transition_job`], but only while the stored job is still `from`.
pub fn transition_job_from(
    store: &dyn DocumentStore,
    kind: JobKind,
    id: &JobId,
    from: JobStatus,
    next: JobStatus,
    update: impl FnOnce(&mut Job),
) -> Result<Job, JobUpdateError> {
    transition_where(store, kind, id, next, |current| current == from, update)
}

fn transition_where(
    store: &dyn DocumentStore,
    kind: JobKind,
    id: &JobId,
    next: JobStatus,
    accept: impl Fn(JobStatus) -> bool,
    update: impl FnOnce(&mut Job),
) -> Result<Job, JobUpdateError> {
    let rejected_from = Cell::new(None);
    let mut update = Some(update);
    let result = store.modify_document(kind.collection(), id.as_str(), |job: &mut Job| {
        if !accept(job.status) || !job.status.can_transition_to(next) {
            rejected_from.set(Some(job.status));
            return Err(StoreError::Rejected(format!(
                "{} -> {next}",
                job.status
            )));
        }
        job.status = next;
        job.failed = next == JobStatus::Failed;
        job.modified = now_secs();
        if let Some(update) = update.take() {
            update(job);
        }
        Ok(())
    });

    match (result, rejected_from.get()) {
        (Err(StoreError::Rejected(_)), Some(from)) => Err(JobUpdateError::InvalidTransition {
            job_id: id.to_string(),
            from,
            to: next,
        }),
        (result, _) => Ok(result?),
    }
}

/// Field-only update that leaves `status` untouched.
pub fn patch_job(
    store: &dyn DocumentStore,
    kind: JobKind,
    id: &JobId,
    update: impl FnOnce(&mut Job),
) -> Result<Job, JobUpdateError> {
    let mut update = Some(update);
    let job = store.modify_document(kind.collection(), id.as_str(), |job: &mut Job| {
        job.modified = now_secs();
        if let Some(update) = update.take() {
            update(job);
        }
        Ok(())
    })?;
    Ok(job)
}
