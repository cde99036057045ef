use crate::models::JobUpdateError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// Coarse classification a caller can map to a response without matching
/// individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchErrorKind {
    Validation,
    Authorization,
    Dispatch,
    Store,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("user {0} not found")]
    UnknownUser(String),
    #[error("template {0} not found")]
    TemplateNotFound(String),
    #[error("not allowed to {action} {resource} {id}")]
    Forbidden {
        action: &'static str,
        resource: &'static str,
        id: String,
    },
    #[error("`{field}` is prompted on launch and must be supplied")]
    MissingPromptField { field: &'static str },
    #[error("invalid value for `{field}`: {reason}")]
    InvalidOverride { field: &'static str, reason: String },
    #[error("a {role} credential is required to start this template")]
    MissingCredential { role: &'static str },
    #[error("{role} credential {id} not found")]
    CredentialNotFound { role: &'static str, id: String },
    #[error("credential {id} of kind {kind} cannot be used as a {role} credential")]
    IncompatibleCredential {
        role: &'static str,
        id: String,
        kind: String,
    },
    #[error("an inventory is required to start this template")]
    MissingInventory,
    #[error("inventory {0} not found")]
    InventoryNotFound(String),
    #[error("project {0} not found")]
    ProjectNotFound(String),
    #[error("template {template_id} does not allow simultaneous runs; job {active_job_id} is still active")]
    TemplateBusy {
        template_id: String,
        active_job_id: String,
    },
    #[error("job {job_id} was saved but could not be queued: {source}")]
    Dispatch {
        job_id: String,
        #[source]
        source: QueueError,
    },
    #[error("job {job_id} was saved but its project update could not be recorded: {source}")]
    DispatchRecord {
        job_id: String,
        #[source]
        source: JobUpdateError,
    },
    #[error("failed to generate identifiers: {0}")]
    Entropy(getrandom::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LaunchError {
    pub fn kind(&self) -> LaunchErrorKind {
        match self {
            Self::UnknownUser(_) | Self::Forbidden { .. } => LaunchErrorKind::Authorization,
            Self::TemplateNotFound(_)
            | Self::MissingPromptField { .. }
            | Self::InvalidOverride { .. }
            | Self::MissingCredential { .. }
            | Self::CredentialNotFound { .. }
            | Self::IncompatibleCredential { .. }
            | Self::MissingInventory
            | Self::InventoryNotFound(_)
            | Self::ProjectNotFound(_)
            | Self::TemplateBusy { .. } => LaunchErrorKind::Validation,
            Self::Dispatch { .. } | Self::DispatchRecord { .. } => LaunchErrorKind::Dispatch,
            Self::Entropy(_) | Self::Store(_) => LaunchErrorKind::Store,
        }
    }

    /// The persisted job left in `new` when dispatch failed.
    pub fn orphaned_job_id(&self) -> Option<&str> {
        match self {
            Self::Dispatch { job_id, .. } | Self::DispatchRecord { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

impl From<getrandom::Error> for LaunchError {
    fn from(value: getrandom::Error) -> Self {
        Self::Entropy(value)
    }
}
