use super::RuntimeError;
use crate::config::GLOBAL_SETTINGS_FILE_NAME;
use crate::queue::{QueuePaths, Topic};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.root.join("logs"),
            self.root.join("daemon"),
            self.root.join("store"),
            self.jobs_dir(),
        ];
        for topic in Topic::ALL {
            let queue = self.queue(topic);
            dirs.extend([queue.incoming, queue.processing, queue.rejected]);
        }
        dirs
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(GLOBAL_SETTINGS_FILE_NAME)
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join("store/tensor.db")
    }

    pub fn queue(&self, topic: Topic) -> QueuePaths {
        QueuePaths::for_topic(&self.root, topic)
    }

    /// Parent of the per-job transient directories (agent socket, key files).
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    pub fn supervisor_state_path(&self) -> PathBuf {
        self.daemon_dir().join("runtime.json")
    }

    pub fn supervisor_lock_path(&self) -> PathBuf {
        self.daemon_dir().join("supervisor.lock")
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.daemon_dir().join("stop")
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.root.join("logs/runtime.log")
    }

    pub fn jobs_log_path(&self) -> PathBuf {
        self.root.join("logs/jobs.log")
    }

    pub fn security_log_path(&self) -> PathBuf {
        self.root.join("logs/security.log")
    }
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
