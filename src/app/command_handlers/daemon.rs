use crate::app::command_support::{ensure_runtime_root, none_or, open_context};
use crate::runtime::{
    append_runtime_log, cleanup_stale_supervisor, clear_start_lock, load_supervisor_state,
    reserve_start_lock, run_supervisor, save_supervisor_state, spawn_supervisor_process,
    stop_active_supervisor, supervisor_ownership_state, write_supervisor_lock_pid,
    OwnershipState, RuntimeError, WorkerState,
};
use crate::shared::time::{format_timestamp, now_secs};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub fn cmd_start(root: &Path) -> Result<String, String> {
    let paths = ensure_runtime_root(root)?;
    // Fail here rather than in the detached child.
    open_context(root)?;
    match supervisor_ownership_state(&paths).map_err(|e| e.to_string())? {
        OwnershipState::Running { pid } => {
            return Err(format!("supervisor already running (pid={pid})"))
        }
        OwnershipState::Stale => cleanup_stale_supervisor(&paths).map_err(|e| e.to_string())?,
        OwnershipState::NotRunning => {}
    }

    reserve_start_lock(&paths).map_err(|e| e.to_string())?;
    let pid = match spawn_supervisor_process(&paths.root).and_then(|pid| {
        write_supervisor_lock_pid(&paths, pid)?;
        Ok(pid)
    }) {
        Ok(pid) => pid,
        Err(err) => {
            clear_start_lock(&paths);
            return Err(err.to_string());
        }
    };

    append_runtime_log(
        &paths,
        "info",
        "supervisor.start.requested",
        &[("pid", Value::from(pid))],
    );

    Ok(format!(
        "started\nstate_root={}\npid={pid}",
        paths.root.display()
    ))
}

pub fn cmd_stop(root: &Path) -> Result<String, String> {
    let paths = ensure_runtime_root(root)?;
    match stop_active_supervisor(&paths, Duration::from_secs(5)) {
        Ok(result) => Ok(format!(
            "stopped\npid={}\nforced={}",
            result.pid, result.forced
        )),
        Err(RuntimeError::NotRunning) => Ok("stopped\nrunning=false".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

pub fn cmd_status(root: &Path) -> Result<String, String> {
    let paths = ensure_runtime_root(root)?;
    let mut state = load_supervisor_state(&paths).map_err(|e| e.to_string())?;
    let ownership = match supervisor_ownership_state(&paths).map_err(|e| e.to_string())? {
        OwnershipState::Running { pid } => {
            if !state.running || state.pid != Some(pid) {
                state.running = true;
                state.pid = Some(pid);
                if state.started_at.is_none() {
                    state.started_at = Some(now_secs());
                }
                state.stopped_at = None;
                save_supervisor_state(&paths, &state).map_err(|e| e.to_string())?;
            }
            "running"
        }
        OwnershipState::Stale => {
            cleanup_stale_supervisor(&paths).map_err(|e| e.to_string())?;
            state = load_supervisor_state(&paths).map_err(|e| e.to_string())?;
            "stale"
        }
        OwnershipState::NotRunning => "not_running",
    };

    let mut lines = vec![
        format!("ownership={ownership}"),
        format!("running={}", state.running),
        format!("pid={}", none_or(state.pid)),
        format!("started_at={}", none_or(state.started_at.map(format_timestamp))),
        format!("stopped_at={}", none_or(state.stopped_at.map(format_timestamp))),
        format!("recovered_units={}", state.recovered_units),
        format!("last_error={}", none_or(state.last_error.as_deref())),
    ];
    for (id, worker) in &state.workers {
        let worker_state = match worker.state {
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        };
        lines.push(format!("worker:{id}.state={worker_state}"));
        lines.push(format!(
            "worker:{id}.last_heartbeat={}",
            none_or(worker.last_heartbeat.map(format_timestamp))
        ));
        lines.push(format!("worker:{id}.jobs_finished={}", worker.jobs_finished));
        lines.push(format!(
            "worker:{id}.last_job_id={}",
            none_or(worker.last_job_id.as_deref())
        ));
        lines.push(format!(
            "worker:{id}.last_error={}",
            none_or(worker.last_error.as_deref())
        ));
    }
    Ok(lines.join("\n"))
}

/// Foreground entry point used by `start` for the detached child.
pub fn cmd_supervise(root: &Path) -> Result<String, String> {
    let ctx = open_context(root)?;
    run_supervisor(ctx).map_err(|e| e.to_string())?;
    Ok("supervisor stopped".to_string())
}
