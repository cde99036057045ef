pub mod access;
pub mod credential;
pub mod identity;
pub mod inventory;
pub mod job;
pub mod project;
pub mod template;

pub use access::{AccessControl, GranteeKind};
pub use credential::{Credential, CredentialKind, CredentialRole};
pub use identity::{Organization, Team, User};
pub use inventory::Inventory;
pub use job::{
    patch_job, transition_job, transition_job_from, Job, JobKind, JobStatus, JobType,
    JobUpdateError, LaunchType,
};
pub use project::{Project, ScmType};
pub use template::{JobTemplate, TerraformJobTemplate};
