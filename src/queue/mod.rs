//! Durable at-least-once hand-off between launch and execution.
//!
//! Each topic is a directory triple under `<state_root>/queue/<topic>/`.
//! A unit is one JSON file; consumers claim it by renaming it into
//! `processing/` and acknowledge by deleting it.

pub mod lifecycle;
pub mod paths;
pub mod unit;

pub use lifecycle::{ack, claim_oldest, enqueue, queued_job_ids, requeue_failure, ClaimedUnit};
pub use paths::{is_valid_queue_json_filename, unit_filename, QueuePaths, Topic};
pub use unit::{AnsibleUnit, JobUnit, PreviousJob, SyncUnit, TerraformUnit};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode job unit for {job_id}: {source}")]
    Encode {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}
