//! Supervises one interpreter process per job: workspace, credential agent,
//! environment, spawn, timeout and the terminal write.
//!
//! Ansible, project update and terraform jobs share one runner and differ
//! only in the [`Interpreter`] that builds their invocations.

pub mod agent;
pub mod ansible;
pub mod cloud;
pub mod interpreter;
pub mod process;
pub mod runner;
pub mod sandbox;
pub mod sync;
pub mod terraform;
pub mod workspace;

pub use interpreter::{interpreter_for, Environment, Interpreter, Invocation, Plan, Preparation};
pub use runner::{run_unit, RunOutcome};

use crate::crypt::CipherError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to decrypt `{field}` of credential {credential_id}: {source}")]
    Decrypt {
        credential_id: String,
        field: &'static str,
        #[source]
        source: CipherError,
    },
    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start credential agent `{binary}`: {reason}")]
    AgentStart { binary: String, reason: String },
    #[error("failed to load key of credential {credential_id} into agent: {reason}")]
    KeyLoad {
        credential_id: String,
        reason: String,
    },
    #[error("binary `{program}` could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process wait failed for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("job timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("canceled while running")]
    Canceled,
    #[error("`{program}` exited with {}", exit_label(.code))]
    NonZeroExit { program: String, code: Option<i32> },
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {what}: {source}")]
    EncodeYaml {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

pub(crate) fn workspace_err(path: &std::path::Path, source: std::io::Error) -> ExecError {
    ExecError::Workspace {
        path: path.display().to_string(),
        source,
    }
}
