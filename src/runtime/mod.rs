//! Supervisor process, executor workers and the operator-side job controls
//! that act on the queue and store directly.

pub mod cancel;
pub mod job_worker;
pub mod logging;
pub mod ownership_lock;
pub mod recovery;
pub mod state_paths;
pub mod supervisor;
pub mod sweep;
pub(crate) mod worker_primitives;
pub mod worker_registry;

pub use crate::shared::errors::RuntimeError;
pub(crate) use crate::shared::fs_atomic::atomic_write_file;
pub(crate) use crate::shared::time::now_secs;
pub use cancel::{cancel_job, CancelError, CancelOutcome};
pub use job_worker::{process_next, Delivery};
pub use logging::append_runtime_log;
pub use ownership_lock::{
    cleanup_stale_supervisor, clear_start_lock, is_process_alive, reserve_start_lock, signal_stop,
    spawn_supervisor_process, stop_active_supervisor, supervisor_ownership_state,
    write_supervisor_lock_pid, OwnershipState, StopResult,
};
pub use recovery::recover_processing_units;
pub use state_paths::{bootstrap_state_root, StatePaths};
pub use supervisor::{
    load_supervisor_state, planned_workers, run_supervisor, save_supervisor_state,
    SupervisorState,
};
pub use sweep::{sweep_stale_jobs, StaleJob, SweepError, SweepReport, STALE_EXPLANATION};
pub use worker_registry::{WorkerEvent, WorkerHealth, WorkerKind, WorkerState};
