use super::supervisor::{load_supervisor_state, save_supervisor_state};
use super::{append_runtime_log, atomic_write_file, now_secs, RuntimeError, StatePaths};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const SIGNAL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    NotRunning,
    Running { pid: u32 },
    Stale,
}

#[derive(Debug, Clone)]
pub struct StopResult {
    pub pid: u32,
    pub forced: bool,
}

/// Who owns the state root: `runtime.json` is trusted only while its pid is
/// alive, then the lock file is consulted.
pub fn supervisor_ownership_state(paths: &StatePaths) -> Result<OwnershipState, RuntimeError> {
    let state = load_supervisor_state(paths)?;
    if let Some(pid) = state.pid.filter(|pid| state.running && is_process_alive(*pid)) {
        return Ok(OwnershipState::Running { pid });
    }

    match read_lock_pid(paths)? {
        Some(pid) if is_process_alive(pid) => Ok(OwnershipState::Running { pid }),
        Some(_) => Ok(OwnershipState::Stale),
        None if state.running || state.pid.is_some() => Ok(OwnershipState::Stale),
        None => Ok(OwnershipState::NotRunning),
    }
}

pub fn cleanup_stale_supervisor(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in [paths.supervisor_lock_path(), paths.stop_signal_path()] {
        if path.exists() {
            let _ = fs::remove_file(&path);
        }
    }
    let mut state = load_supervisor_state(paths)?;
    state.running = false;
    state.pid = None;
    state.stopped_at = Some(now_secs());
    save_supervisor_state(paths, &state)
}

/// Creates the lock exclusively; a second `start` racing this one fails here.
pub fn reserve_start_lock(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.supervisor_lock_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RuntimeError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(std::process::id().to_string().as_bytes()))
        .map_err(|source| RuntimeError::WriteLock {
            path: path.display().to_string(),
            source,
        })
}

pub fn write_supervisor_lock_pid(paths: &StatePaths, pid: u32) -> Result<(), RuntimeError> {
    let path = paths.supervisor_lock_path();
    atomic_write_file(&path, pid.to_string().as_bytes()).map_err(|source| {
        RuntimeError::WriteLock {
            path: path.display().to_string(),
            source,
        }
    })
}

pub fn clear_start_lock(paths: &StatePaths) {
    let _ = fs::remove_file(paths.supervisor_lock_path());
}

/// Re-executes the current binary as `tensord supervise --state-root <root>`,
/// detached from the caller's stdio.
pub fn spawn_supervisor_process(state_root: &Path) -> Result<u32, RuntimeError> {
    let exe = std::env::current_exe().map_err(|e| RuntimeError::Spawn(e.to_string()))?;
    let child = Command::new(exe)
        .arg("supervise")
        .arg("--state-root")
        .arg(state_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RuntimeError::Spawn(e.to_string()))?;
    Ok(child.id())
}

pub fn signal_stop(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.stop_signal_path();
    fs::write(&path, b"stop").map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

/// Stop file first; TERM then KILL if the supervisor outlives `timeout`.
pub fn stop_active_supervisor(
    paths: &StatePaths,
    timeout: Duration,
) -> Result<StopResult, RuntimeError> {
    let pid = match supervisor_ownership_state(paths)? {
        OwnershipState::Running { pid } => pid,
        OwnershipState::Stale => {
            cleanup_stale_supervisor(paths)?;
            return Err(RuntimeError::NotRunning);
        }
        OwnershipState::NotRunning => return Err(RuntimeError::NotRunning),
    };

    signal_stop(paths)?;
    append_runtime_log(
        paths,
        "info",
        "supervisor.stop.requested",
        &[("pid", Value::from(pid))],
    );

    let mut forced = false;
    if !wait_for_exit(pid, timeout) {
        send_signal(pid, "-TERM");
        if !wait_for_exit(pid, SIGNAL_GRACE) {
            forced = true;
            append_runtime_log(
                paths,
                "warn",
                "supervisor.stop.force_kill",
                &[("pid", Value::from(pid))],
            );
            send_signal(pid, "-KILL");
            if !wait_for_exit(pid, SIGNAL_GRACE) {
                append_runtime_log(
                    paths,
                    "error",
                    "supervisor.stop.failed",
                    &[("pid", Value::from(pid))],
                );
                return Err(RuntimeError::StopFailedAlive { pid });
            }
        }
    }

    cleanup_stale_supervisor(paths)?;
    Ok(StopResult { pid, forced })
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let started = Instant::now();
    while is_process_alive(pid) {
        if started.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(100));
    }
    true
}

fn read_lock_pid(paths: &StatePaths) -> Result<Option<u32>, RuntimeError> {
    let path = paths.supervisor_lock_path();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadLock {
        path: path.display().to_string(),
        source,
    })?;
    Ok(raw.trim().parse::<u32>().ok())
}

pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

fn send_signal(pid: u32, signal: &str) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg(signal)
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}
