use crate::queue::Topic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started {
        worker_id: String,
        at: i64,
    },
    Heartbeat {
        worker_id: String,
        at: i64,
    },
    JobFinished {
        worker_id: String,
        at: i64,
        job_id: String,
        status: String,
    },
    Error {
        worker_id: String,
        at: i64,
        message: String,
        fatal: bool,
    },
    Stopped {
        worker_id: String,
        at: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerKind {
    Executor { topic: Topic, index: usize },
    Sweeper,
}

impl WorkerKind {
    pub fn id(&self) -> String {
        match self {
            Self::Executor { topic, index } => format!("executor:{}:{index}", topic.as_str()),
            Self::Sweeper => "sweeper".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Stopped,
    Running,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub state: WorkerState,
    pub last_heartbeat: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub jobs_finished: u64,
    #[serde(default)]
    pub last_job_id: Option<String>,
}

/// The runtime log line an event deserves, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    pub level: &'static str,
    pub event: &'static str,
    pub worker_id: String,
    pub detail: Option<String>,
}

/// Folds one worker event into the health table. Workers leave `active`
/// once they report `Stopped`.
pub fn apply_worker_event(
    workers: &mut BTreeMap<String, WorkerHealth>,
    active: &mut BTreeSet<String>,
    event: WorkerEvent,
) -> Option<EventLog> {
    match event {
        WorkerEvent::Started { worker_id, at } => {
            let entry = workers.entry(worker_id.clone()).or_default();
            entry.state = WorkerState::Running;
            entry.last_heartbeat = Some(at);
            Some(EventLog {
                level: "info",
                event: "worker.started",
                worker_id,
                detail: None,
            })
        }
        WorkerEvent::Heartbeat { worker_id, at } => {
            let entry = workers.entry(worker_id).or_default();
            if entry.state != WorkerState::Error {
                entry.state = WorkerState::Running;
            }
            entry.last_heartbeat = Some(at);
            None
        }
        WorkerEvent::JobFinished {
            worker_id,
            at,
            job_id,
            status,
        } => {
            let entry = workers.entry(worker_id.clone()).or_default();
            entry.state = WorkerState::Running;
            entry.last_heartbeat = Some(at);
            entry.jobs_finished += 1;
            entry.last_job_id = Some(job_id.clone());
            Some(EventLog {
                level: "info",
                event: "worker.job_finished",
                worker_id,
                detail: Some(format!("{job_id} {status}")),
            })
        }
        WorkerEvent::Error {
            worker_id,
            at,
            message,
            fatal,
        } => {
            let entry = workers.entry(worker_id.clone()).or_default();
            entry.state = WorkerState::Error;
            entry.last_heartbeat = Some(at);
            entry.last_error = Some(message.clone());
            Some(EventLog {
                level: if fatal { "error" } else { "warn" },
                event: "worker.error",
                worker_id,
                detail: Some(message),
            })
        }
        WorkerEvent::Stopped { worker_id, at } => {
            let entry = workers.entry(worker_id.clone()).or_default();
            if entry.state != WorkerState::Error {
                entry.state = WorkerState::Stopped;
            }
            entry.last_heartbeat = Some(at);
            active.remove(&worker_id);
            Some(EventLog {
                level: "info",
                event: "worker.stopped",
                worker_id,
                detail: None,
            })
        }
    }
}
