use super::worker_primitives::sleep_with_stop;
use super::WorkerEvent;
use crate::context::Context;
use crate::exec::{run_unit, RunOutcome};
use crate::models::{transition_job, JobStatus, JobUpdateError};
use crate::queue::{ack, claim_oldest, requeue_failure, ClaimedUnit, Topic};
use crate::shared::time::now_secs;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// What happened to one claimed unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Acked(RunOutcome),
    Requeued { job_id: String, reason: String },
}

/// Claims and runs at most one unit from `topic`. `Ok(None)` means the
/// queue was empty.
pub fn process_next(
    ctx: &Context,
    topic: Topic,
    stop: &AtomicBool,
) -> Result<Option<Delivery>, String> {
    let queue = ctx.paths.queue(topic);
    let Some(claimed) = claim_oldest(&queue).map_err(|err| err.to_string())? else {
        return Ok(None);
    };
    let job_id = claimed.unit.job().id.to_string();

    let result = panic::catch_unwind(AssertUnwindSafe(|| run_unit(ctx, &claimed.unit, stop)));
    let delivery = match result {
        Ok(Ok(RunOutcome::Interrupted { job_id })) => {
            requeue_failure(&queue, &claimed).map_err(|err| err.to_string())?;
            Delivery::Requeued {
                job_id,
                reason: "stopped while waiting on previous job".to_string(),
            }
        }
        Ok(Ok(outcome)) => {
            ack(&claimed).map_err(|err| err.to_string())?;
            Delivery::Acked(outcome)
        }
        Ok(Err(err)) => {
            requeue_failure(&queue, &claimed).map_err(|err| err.to_string())?;
            return Err(format!("job {job_id} requeued: {err}"));
        }
        Err(payload) => {
            let outcome = fail_after_panic(ctx, &claimed, panic_message(payload.as_ref()))
                .map_err(|err| err.to_string());
            match outcome {
                Ok(outcome) => {
                    ack(&claimed).map_err(|err| err.to_string())?;
                    Delivery::Acked(outcome)
                }
                Err(message) => {
                    requeue_failure(&queue, &claimed).map_err(|err| err.to_string())?;
                    return Err(format!("job {job_id} requeued after panic: {message}"));
                }
            }
        }
    };
    Ok(Some(delivery))
}

fn fail_after_panic(
    ctx: &Context,
    claimed: &ClaimedUnit,
    message: String,
) -> Result<RunOutcome, JobUpdateError> {
    let job = claimed.unit.job();
    let explanation = format!("worker panicked: {message}");
    ctx.log_job(
        "error",
        "job.worker_panicked",
        &[
            ("job_id", Value::from(job.id.as_str())),
            ("message", Value::from(message)),
        ],
    );
    match transition_job(ctx.store.as_ref(), job.kind, &job.id, JobStatus::Failed, |job| {
        job.finished = Some(now_secs());
        job.job_explanation = explanation;
    }) {
        Ok(failed) => Ok(RunOutcome::Completed(failed)),
        Err(JobUpdateError::InvalidTransition { from, .. }) => Ok(RunOutcome::Skipped {
            job_id: job.id.to_string(),
            reason: format!("job already {from}"),
        }),
        Err(err) => Err(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Executor loop: one job at a time from `topic` until `stop` is raised.
pub(crate) fn run_executor(
    worker_id: String,
    topic: Topic,
    ctx: Context,
    stop: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
) {
    let _ = events.send(WorkerEvent::Started {
        worker_id: worker_id.clone(),
        at: now_secs(),
    });
    let poll = ctx.settings.queue_poll_interval();

    while !stop.load(Ordering::Relaxed) {
        match process_next(&ctx, topic, &stop) {
            Ok(Some(Delivery::Acked(outcome))) => {
                let event = match outcome {
                    RunOutcome::Completed(job) => WorkerEvent::JobFinished {
                        worker_id: worker_id.clone(),
                        at: now_secs(),
                        job_id: job.id.to_string(),
                        status: job.status.to_string(),
                    },
                    RunOutcome::Skipped { job_id, reason } => {
                        ctx.log_job(
                            "info",
                            "job.skipped",
                            &[
                                ("job_id", Value::from(job_id)),
                                ("reason", Value::from(reason)),
                            ],
                        );
                        WorkerEvent::Heartbeat {
                            worker_id: worker_id.clone(),
                            at: now_secs(),
                        }
                    }
                    RunOutcome::Interrupted { .. } => WorkerEvent::Heartbeat {
                        worker_id: worker_id.clone(),
                        at: now_secs(),
                    },
                };
                let _ = events.send(event);
            }
            Ok(Some(Delivery::Requeued { job_id, reason })) => {
                ctx.log_job(
                    "info",
                    "job.requeued",
                    &[
                        ("job_id", Value::from(job_id)),
                        ("reason", Value::from(reason)),
                    ],
                );
            }
            Ok(None) => {
                let _ = events.send(WorkerEvent::Heartbeat {
                    worker_id: worker_id.clone(),
                    at: now_secs(),
                });
                if !sleep_with_stop(&stop, poll) {
                    break;
                }
            }
            Err(message) => {
                let _ = events.send(WorkerEvent::Error {
                    worker_id: worker_id.clone(),
                    at: now_secs(),
                    message,
                    fatal: false,
                });
                if !sleep_with_stop(&stop, poll) {
                    break;
                }
            }
        }
    }

    let _ = events.send(WorkerEvent::Stopped {
        worker_id,
        at: now_secs(),
    });
}
