use crate::context::Context;
use crate::models::{transition_job, Job, JobStatus, JobUpdateError};
use crate::shared::ids::JobId;
use crate::shared::time::now_secs;
use crate::store::{Collection, DocumentStoreExt, StoreError};
use serde_json::Value;
use std::cell::Cell;

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {job_id} already finished with status {status}")]
    AlreadyFinished { job_id: String, status: JobStatus },
    #[error(transparent)]
    Update(#[from] JobUpdateError),
}

impl From<StoreError> for CancelError {
    fn from(err: StoreError) -> Self {
        Self::Update(JobUpdateError::Store(err))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// Never started; now `canceled`.
    Canceled(Job),
    /// Running; its runner kills the process group on the next check and
    /// fails the job.
    Requested(Job),
}

pub fn cancel_job(ctx: &Context, job_id: &JobId) -> Result<CancelOutcome, CancelError> {
    let job = find_job(ctx, job_id)?;
    if job.status.is_terminal() {
        return Err(CancelError::AlreadyFinished {
            job_id: job_id.to_string(),
            status: job.status,
        });
    }

    if job.status != JobStatus::Running {
        match transition_job(ctx.store.as_ref(), job.kind, job_id, JobStatus::Canceled, |job| {
            job.job_explanation = "canceled before start".to_string();
        }) {
            Ok(canceled) => {
                log_cancel(ctx, &canceled, "job.canceled");
                return Ok(CancelOutcome::Canceled(canceled));
            }
            // A worker moved it to running since the lookup.
            Err(JobUpdateError::InvalidTransition {
                from: JobStatus::Running,
                ..
            }) => {}
            Err(JobUpdateError::InvalidTransition { from, .. }) => {
                return Err(CancelError::AlreadyFinished {
                    job_id: job_id.to_string(),
                    status: from,
                })
            }
            Err(err) => return Err(err.into()),
        }
    }

    let requested = request_cancel(ctx, &job)?;
    log_cancel(ctx, &requested, "job.cancel_requested");
    Ok(CancelOutcome::Requested(requested))
}

/// Sets `cancel_requested` unless the job finished since it was looked up.
fn request_cancel(ctx: &Context, job: &Job) -> Result<Job, CancelError> {
    let finished = Cell::new(None);
    let result = ctx
        .store
        .modify_document(job.kind.collection(), job.id.as_str(), |stored: &mut Job| {
            if stored.status.is_terminal() {
                finished.set(Some(stored.status));
                return Err(StoreError::Rejected(format!("job already {}", stored.status)));
            }
            stored.cancel_requested = true;
            stored.modified = now_secs();
            Ok(())
        });
    match (result, finished.get()) {
        (Err(StoreError::Rejected(_)), Some(status)) => Err(CancelError::AlreadyFinished {
            job_id: job.id.to_string(),
            status,
        }),
        (result, _) => Ok(result?),
    }
}

fn find_job(ctx: &Context, job_id: &JobId) -> Result<Job, CancelError> {
    for collection in [Collection::Jobs, Collection::TerraformJobs] {
        if let Some(job) = ctx.store.load::<Job>(collection, job_id.as_str())? {
            return Ok(job);
        }
    }
    Err(CancelError::NotFound(job_id.to_string()))
}

fn log_cancel(ctx: &Context, job: &Job, event: &str) {
    ctx.log_job(
        "info",
        event,
        &[
            ("job_id", Value::from(job.id.as_str())),
            ("kind", Value::from(job.kind.as_str())),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::temp_context;
    use crate::models::{JobKind, JobType, LaunchType};
    use crate::shared::ids::ProjectId;

    fn stored_job(ctx: &Context, id: &str, status: JobStatus) -> JobId {
        let mut job = Job::new(
            JobId::parse(id).expect("id"),
            id.to_string(),
            JobKind::Terraform,
            JobType::Plan,
            LaunchType::Manual,
            ProjectId::parse("p1").expect("project"),
        );
        job.status = status;
        ctx.store.insert_document(&job).expect("insert");
        job.id
    }

    #[test]
    fn pending_jobs_are_canceled_outright() {
        let (_dir, ctx) = temp_context();
        let id = stored_job(&ctx, "j1", JobStatus::Pending);
        match cancel_job(&ctx, &id).expect("cancel") {
            CancelOutcome::Canceled(job) => assert_eq!(job.status, JobStatus::Canceled),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn running_jobs_only_get_the_request_flag() {
        let (_dir, ctx) = temp_context();
        let id = stored_job(&ctx, "j2", JobStatus::Running);
        match cancel_job(&ctx, &id).expect("cancel") {
            CancelOutcome::Requested(job) => {
                assert_eq!(job.status, JobStatus::Running);
                assert!(job.cancel_requested);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn request_flag_is_not_written_once_the_job_finished() {
        let (_dir, ctx) = temp_context();
        let id = stored_job(&ctx, "j4", JobStatus::Running);
        let looked_up: Job = ctx
            .store
            .load(Collection::TerraformJobs, "j4")
            .expect("load")
            .expect("present");
        transition_job(ctx.store.as_ref(), JobKind::Terraform, &id, JobStatus::Successful, |_| {})
            .expect("finish");

        assert!(matches!(
            request_cancel(&ctx, &looked_up),
            Err(CancelError::AlreadyFinished {
                status: JobStatus::Successful,
                ..
            })
        ));
        let stored: Job = ctx
            .store
            .load(Collection::TerraformJobs, "j4")
            .expect("load")
            .expect("present");
        assert!(!stored.cancel_requested);
    }

    #[test]
    fn finished_and_unknown_jobs_are_errors() {
        let (_dir, ctx) = temp_context();
        let id = stored_job(&ctx, "j3", JobStatus::Successful);
        assert!(matches!(
            cancel_job(&ctx, &id),
            Err(CancelError::AlreadyFinished {
                status: JobStatus::Successful,
                ..
            })
        ));
        let missing = JobId::parse("nope").expect("id");
        assert!(matches!(cancel_job(&ctx, &missing), Err(CancelError::NotFound(_))));
    }
}
