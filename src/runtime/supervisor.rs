use super::job_worker::run_executor;
use super::recovery::recover_processing_units;
use super::sweep::run_sweeper;
use super::worker_registry::{apply_worker_event, WorkerHealth};
use super::{
    append_runtime_log, atomic_write_file, now_secs, ownership_lock, RuntimeError, StatePaths,
    WorkerEvent, WorkerKind, WorkerState,
};
use crate::context::Context;
use crate::queue::Topic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SupervisorState {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub workers: BTreeMap<String, WorkerHealth>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub recovered_units: usize,
}

/// Executors per topic as configured, plus the sweeper.
pub fn planned_workers(ctx: &Context) -> Vec<WorkerKind> {
    let mut workers = Vec::new();
    for topic in Topic::ALL {
        let count = match topic {
            Topic::Ansible => ctx.settings.workers.ansible,
            Topic::Terraform => ctx.settings.workers.terraform,
        };
        workers.extend((0..count).map(|index| WorkerKind::Executor { topic, index }));
    }
    workers.push(WorkerKind::Sweeper);
    workers
}

/// Runs in the foreground until the stop file appears.
pub fn run_supervisor(ctx: Context) -> Result<(), RuntimeError> {
    let paths = ctx.paths.clone();

    let stop_path = paths.stop_signal_path();
    if stop_path.exists() {
        let _ = fs::remove_file(&stop_path);
    }

    let recovered = recover_processing_units(&paths)?;
    if !recovered.is_empty() {
        append_runtime_log(
            &paths,
            "warn",
            "supervisor.recovered_units",
            &[("count", Value::from(recovered.len()))],
        );
    }

    let workers = planned_workers(&ctx);
    let mut state = SupervisorState {
        running: true,
        pid: Some(std::process::id()),
        started_at: Some(now_secs()),
        stopped_at: None,
        workers: BTreeMap::new(),
        last_error: None,
        recovered_units: recovered.len(),
    };
    for worker in &workers {
        state.workers.insert(worker.id(), WorkerHealth::default());
    }
    save_supervisor_state(&paths, &state)?;
    append_runtime_log(
        &paths,
        "info",
        "supervisor.started",
        &[
            ("pid", Value::from(std::process::id())),
            ("workers", Value::from(workers.len())),
        ],
    );

    let stop = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::channel::<WorkerEvent>();
    let mut handles = Vec::new();
    let mut active = BTreeSet::new();

    for worker in workers {
        let worker_id = worker.id();
        active.insert(worker_id.clone());
        let tx = events_tx.clone();
        let stop_flag = stop.clone();
        let worker_ctx = ctx.clone();
        handles.push(thread::spawn(move || match worker {
            WorkerKind::Executor { topic, .. } => {
                run_executor(worker_id, topic, worker_ctx, stop_flag, tx)
            }
            WorkerKind::Sweeper => run_sweeper(worker_id, worker_ctx, stop_flag, tx),
        }));
    }
    drop(events_tx);

    while !stop.load(Ordering::Relaxed) {
        if paths.stop_signal_path().exists() {
            stop.store(true, Ordering::Relaxed);
            append_runtime_log(&paths, "info", "supervisor.stop.signal", &[]);
        }

        match events_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => handle_worker_event(&paths, &mut state, &mut active, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Executors finish the job in hand before they see the stop flag.
    let deadline = Instant::now() + shutdown_wait_timeout();
    while !active.is_empty() && Instant::now() < deadline {
        match events_rx.recv_timeout(Duration::from_millis(25)) {
            Ok(event) => handle_worker_event(&paths, &mut state, &mut active, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !active.is_empty() {
        let message = format!(
            "shutdown timeout waiting for workers: {}",
            active.iter().cloned().collect::<Vec<_>>().join(",")
        );
        state.last_error = Some(message.clone());
        for worker_id in &active {
            if let Some(worker) = state.workers.get_mut(worker_id) {
                worker.state = WorkerState::Error;
                worker.last_error = Some("shutdown timeout".to_string());
            }
        }
        append_runtime_log(
            &paths,
            "warn",
            "supervisor.shutdown.timeout",
            &[("message", Value::from(message))],
        );
    }

    // Units held by workers still running are recovered on the next start.
    for handle in handles {
        if handle.is_finished() {
            let _ = handle.join();
        }
    }

    state.running = false;
    state.pid = None;
    state.stopped_at = Some(now_secs());
    save_supervisor_state(&paths, &state)?;

    ownership_lock::clear_start_lock(&paths);
    let _ = fs::remove_file(paths.stop_signal_path());
    append_runtime_log(&paths, "info", "supervisor.stopped", &[]);
    Ok(())
}

fn shutdown_wait_timeout() -> Duration {
    let seconds = std::env::var("TENSOR_SHUTDOWN_TIMEOUT_SECONDS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30);
    Duration::from_secs(seconds)
}

pub fn load_supervisor_state(paths: &StatePaths) -> Result<SupervisorState, RuntimeError> {
    let path = paths.supervisor_state_path();
    if !path.exists() {
        return Ok(SupervisorState::default());
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadState {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuntimeError::ParseState {
        path: path.display().to_string(),
        source,
    })
}

pub fn save_supervisor_state(
    paths: &StatePaths,
    state: &SupervisorState,
) -> Result<(), RuntimeError> {
    let path = paths.supervisor_state_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RuntimeError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let encoded = serde_json::to_vec_pretty(state).map_err(|source| RuntimeError::ParseState {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(&path, &encoded).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

fn handle_worker_event(
    paths: &StatePaths,
    state: &mut SupervisorState,
    active: &mut BTreeSet<String>,
    event: WorkerEvent,
) {
    if let Some(log) = apply_worker_event(&mut state.workers, active, event) {
        let mut fields = vec![("worker_id", Value::from(log.worker_id))];
        if let Some(detail) = log.detail {
            fields.push(("detail", Value::from(detail)));
        }
        append_runtime_log(paths, log.level, log.event, &fields);
    }

    let _ = save_supervisor_state(paths, state);
}
