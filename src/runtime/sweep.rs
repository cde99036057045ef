use super::worker_primitives::sleep_with_stop;
use super::WorkerEvent;
use crate::context::Context;
use crate::models::{transition_job_from, Job, JobKind, JobStatus, JobUpdateError};
use crate::queue::{queued_job_ids, QueueError, Topic};
use crate::shared::ids::JobId;
use crate::shared::time::now_secs;
use crate::store::{Collection, DocumentStoreExt, Filter, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

pub const STALE_EXPLANATION: &str = "dispatch never completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleJob {
    pub id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub created: i64,
    pub age_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stale: Vec<StaleJob>,
    /// Old `new` jobs whose unit is still queued behind busy workers.
    pub queued: Vec<JobId>,
    pub failed: Vec<JobId>,
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Update(#[from] JobUpdateError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<StoreError> for SweepError {
    fn from(err: StoreError) -> Self {
        Self::Update(JobUpdateError::Store(err))
    }
}

/// Lists jobs stuck in `new` for at least `max_age`: persisted by a launch
/// whose enqueue never happened. Jobs with a unit still in the queue are
/// only counted as queued. With `apply` the stale ones are failed; nothing
/// is re-dispatched.
pub fn sweep_stale_jobs(
    ctx: &Context,
    max_age: Duration,
    apply: bool,
    now: i64,
) -> Result<SweepReport, SweepError> {
    let cutoff = now.saturating_sub(max_age.as_secs() as i64);
    let mut report = SweepReport::default();
    let mut old_new_jobs = Vec::new();
    for collection in [Collection::Jobs, Collection::TerraformJobs] {
        let jobs: Vec<Job> = ctx.store.load_all(
            collection,
            &Filter::new().eq("status", JobStatus::New.as_str()),
        )?;
        old_new_jobs.extend(jobs.into_iter().filter(|job| job.created <= cutoff));
    }
    if old_new_jobs.is_empty() {
        return Ok(report);
    }

    // Read after the job listing: a unit enqueued in between is still seen.
    let mut queued = BTreeSet::new();
    for topic in Topic::ALL {
        queued.extend(queued_job_ids(&ctx.paths.queue(topic))?);
    }
    let (waiting, stale): (Vec<Job>, Vec<Job>) = old_new_jobs
        .into_iter()
        .partition(|job| queued.contains(job.id.as_str()));
    report.queued = waiting.into_iter().map(|job| job.id).collect();
    report.queued.sort();
    report.stale = stale
        .into_iter()
        .map(|job| StaleJob {
            age_seconds: now.saturating_sub(job.created),
            id: job.id,
            kind: job.kind,
            name: job.name,
            created: job.created,
        })
        .collect();
    report.stale.sort_by_key(|job| job.created);

    if !apply {
        return Ok(report);
    }
    for stale in &report.stale {
        match transition_job_from(
            ctx.store.as_ref(),
            stale.kind,
            &stale.id,
            JobStatus::New,
            JobStatus::Failed,
            |job| {
                job.finished = Some(now);
                job.job_explanation = STALE_EXPLANATION.to_string();
            },
        ) {
            Ok(_) => {
                ctx.log_job(
                    "warn",
                    "job.swept",
                    &[
                        ("job_id", Value::from(stale.id.as_str())),
                        ("age_seconds", Value::from(stale.age_seconds)),
                    ],
                );
                report.failed.push(stale.id.clone());
            }
            // Picked up by a worker since the listing.
            Err(JobUpdateError::InvalidTransition { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(report)
}

/// Periodic listing pass. Stale jobs are only reported; failing them is
/// left to the operator's `sweep --apply`.
pub(crate) fn run_sweeper(
    worker_id: String,
    ctx: Context,
    stop: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
) {
    let _ = events.send(WorkerEvent::Started {
        worker_id: worker_id.clone(),
        at: now_secs(),
    });
    let max_age = Duration::from_secs(ctx.settings.sweep.stale_new_after_seconds);
    let interval = Duration::from_secs(ctx.settings.sweep.interval_seconds.max(1));

    while !stop.load(Ordering::Relaxed) {
        match sweep_stale_jobs(&ctx, max_age, false, now_secs()) {
            Ok(report) => {
                if !report.stale.is_empty() {
                    let ids: Vec<Value> = report
                        .stale
                        .iter()
                        .map(|job| Value::from(job.id.as_str()))
                        .collect();
                    ctx.log_runtime(
                        "warn",
                        "sweep.stale_jobs",
                        &[
                            ("count", Value::from(ids.len())),
                            ("job_ids", Value::Array(ids)),
                        ],
                    );
                }
                let _ = events.send(WorkerEvent::Heartbeat {
                    worker_id: worker_id.clone(),
                    at: now_secs(),
                });
            }
            Err(err) => {
                let _ = events.send(WorkerEvent::Error {
                    worker_id: worker_id.clone(),
                    at: now_secs(),
                    message: err.to_string(),
                    fatal: false,
                });
            }
        }
        if !sleep_with_stop(&stop, interval) {
            break;
        }
    }

    let _ = events.send(WorkerEvent::Stopped {
        worker_id,
        at: now_secs(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::temp_context;
    use crate::models::{JobType, LaunchType};
    use crate::shared::ids::ProjectId;

    fn job(id: &str, kind: JobKind, created: i64) -> Job {
        let job_type = if kind == JobKind::Terraform {
            JobType::Apply
        } else {
            JobType::Run
        };
        let mut job = Job::new(
            JobId::parse(id).expect("id"),
            id.to_string(),
            kind,
            job_type,
            LaunchType::Manual,
            ProjectId::parse("p1").expect("project"),
        );
        job.created = created;
        job
    }

    #[test]
    fn jobs_with_a_queued_unit_are_never_failed() {
        let (_dir, ctx) = temp_context();
        ctx.store.insert_document(&job("waiting", JobKind::Ansible, 100)).expect("insert");
        ctx.store.insert_document(&job("orphan", JobKind::Ansible, 100)).expect("insert");
        let queue = ctx.paths.queue(Topic::Ansible);
        std::fs::write(
            queue.incoming.join("100_waiting.json"),
            r#"{"unit": "ansible", "job": {"id": "waiting"}}"#,
        )
        .expect("unit file");

        let report = sweep_stale_jobs(&ctx, Duration::from_secs(600), true, 1000).expect("apply");
        assert_eq!(report.queued, [JobId::parse("waiting").expect("id")]);
        assert_eq!(report.failed, [JobId::parse("orphan").expect("id")]);

        let waiting: Job = ctx
            .store
            .load(Collection::Jobs, "waiting")
            .expect("load")
            .expect("present");
        assert_eq!(waiting.status, JobStatus::New);
    }

    #[test]
    fn lists_only_old_new_jobs_until_applied() {
        let (_dir, ctx) = temp_context();
        ctx.store.insert_document(&job("old", JobKind::Ansible, 100)).expect("insert");
        ctx.store.insert_document(&job("tf-old", JobKind::Terraform, 50)).expect("insert");
        ctx.store.insert_document(&job("fresh", JobKind::Ansible, 950)).expect("insert");
        let mut pending = job("pending", JobKind::Ansible, 10);
        pending.status = JobStatus::Pending;
        ctx.store.insert_document(&pending).expect("insert");

        let report = sweep_stale_jobs(&ctx, Duration::from_secs(600), false, 1000).expect("list");
        let ids: Vec<&str> = report.stale.iter().map(|job| job.id.as_str()).collect();
        assert_eq!(ids, ["tf-old", "old"]);
        assert!(report.failed.is_empty());

        let report = sweep_stale_jobs(&ctx, Duration::from_secs(600), true, 1000).expect("apply");
        assert_eq!(report.failed.len(), 2);
        let swept: Job = ctx
            .store
            .load(Collection::TerraformJobs, "tf-old")
            .expect("load")
            .expect("present");
        assert_eq!(swept.status, JobStatus::Failed);
        assert_eq!(swept.job_explanation, STALE_EXPLANATION);

        let fresh: Job = ctx.store.load(Collection::Jobs, "fresh").expect("load").expect("present");
        assert_eq!(fresh.status, JobStatus::New);
    }
}
