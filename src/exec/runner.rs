use super::agent::SshAgent;
use super::process::{run_supervised, ProcessExit};
use super::sandbox::wrap_in_proot;
use super::workspace::Workspace;
use super::{interpreter_for, ExecError, Interpreter, Invocation, Preparation};
use crate::context::Context;
use crate::models::{
    transition_job, Job, JobKind, JobStatus, JobTemplate, JobUpdateError, Project,
    TerraformJobTemplate,
};
use crate::queue::{JobUnit, PreviousJob};
use crate::runtime::worker_primitives::sleep_with_stop;
use crate::shared::time::now_secs;
use crate::store::{Collection, DocumentStoreExt, StoreError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The job reached a terminal state in this call.
    Completed(Job),
    /// Nothing to do: the job is gone, already terminal or was canceled.
    Skipped { job_id: String, reason: String },
    /// Stop was requested while waiting on the previous job; the unit should
    /// go back to the queue.
    Interrupted { job_id: String },
}

/// What the terminal write records about one execution attempt.
struct Execution {
    result: Result<(), ExecError>,
    stdout: String,
    args: Vec<String>,
    env: Vec<String>,
    cwd: String,
}

/// Runs one dequeued unit to a terminal state.
///
/// Status writes are idempotent, so a redelivered unit for a job that was
/// `pending` or `running` when its worker died simply runs again. Failures
/// of the job itself end in a `failed` write; only store errors are
/// returned.
pub fn run_unit(
    ctx: &Context,
    unit: &JobUnit,
    stop: &AtomicBool,
) -> Result<RunOutcome, JobUpdateError> {
    let queued = unit.job();
    let kind = queued.kind;
    let job_id = queued.id.clone();

    let Some(current) = ctx.store.load::<Job>(kind.collection(), job_id.as_str())? else {
        return Ok(skipped(&job_id, "job record not found"));
    };
    if current.status.is_terminal() {
        return Ok(skipped(&job_id, &format!("job already {}", current.status)));
    }
    if current.status != JobStatus::Running {
        match transition_job(ctx.store.as_ref(), kind, &job_id, JobStatus::Pending, |_| {}) {
            Ok(_) => {}
            Err(JobUpdateError::InvalidTransition { from, .. }) => {
                return Ok(skipped(&job_id, &format!("job already {from}")));
            }
            Err(err) => return Err(err),
        }
    }

    if let Some(previous) = unit.previous_job() {
        match wait_for_previous(ctx, queued, previous, stop)? {
            PreviousState::Succeeded => {}
            PreviousState::Interrupted => {
                return Ok(RunOutcome::Interrupted {
                    job_id: job_id.to_string(),
                })
            }
            PreviousState::OwnJobCanceled => return Ok(skipped(&job_id, "job canceled")),
            PreviousState::Failed(explanation) => {
                return finish_without_running(ctx, queued, explanation);
            }
        }
    }

    let started = now_secs();
    let running = match transition_job(ctx.store.as_ref(), kind, &job_id, JobStatus::Running, |job| {
        job.started = Some(started);
    }) {
        Ok(job) => job,
        Err(JobUpdateError::InvalidTransition { from, .. }) => {
            return Ok(skipped(&job_id, &format!("job already {from}")));
        }
        Err(err) => return Err(err),
    };
    ctx.log_job(
        "info",
        "job.running",
        &[
            ("job_id", Value::from(job_id.as_str())),
            ("kind", Value::from(kind.as_str())),
        ],
    );

    let execution = execute(ctx, unit, &running);
    let succeeded = execution.result.is_ok();
    let explanation = match &execution.result {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    };
    let next = if succeeded {
        JobStatus::Successful
    } else {
        JobStatus::Failed
    };

    let finished = match transition_job(ctx.store.as_ref(), kind, &job_id, next, |job| {
        let now = now_secs();
        job.finished = Some(now);
        job.elapsed = now.saturating_sub(job.started.unwrap_or(started)) as f64;
        job.result_stdout = execution.stdout;
        job.job_explanation = explanation.clone();
        job.job_args = execution.args;
        job.job_env = execution.env;
        job.job_cwd = execution.cwd;
    }) {
        Ok(job) => job,
        Err(JobUpdateError::InvalidTransition { from, .. }) => {
            return Ok(skipped(&job_id, &format!("job already {from}")));
        }
        Err(err) => return Err(err),
    };

    ctx.log_job(
        if succeeded { "info" } else { "warn" },
        "job.finished",
        &[
            ("job_id", Value::from(job_id.as_str())),
            ("kind", Value::from(kind.as_str())),
            ("status", Value::from(finished.status.as_str())),
            ("elapsed", Value::from(finished.elapsed)),
            ("explanation", Value::from(finished.job_explanation.clone())),
            ("args", json!(finished.job_args)),
        ],
    );
    record_last_run(ctx, &finished);
    Ok(RunOutcome::Completed(finished))
}

fn skipped(job_id: &impl ToString, reason: &str) -> RunOutcome {
    RunOutcome::Skipped {
        job_id: job_id.to_string(),
        reason: reason.to_string(),
    }
}

enum PreviousState {
    Succeeded,
    Failed(String),
    OwnJobCanceled,
    Interrupted,
}

fn wait_for_previous(
    ctx: &Context,
    job: &Job,
    previous: &PreviousJob,
    stop: &AtomicBool,
) -> Result<PreviousState, JobUpdateError> {
    let poll = ctx.settings.previous_job_poll_interval();
    let deadline = Instant::now() + ctx.settings.previous_job_wait();
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(PreviousState::Interrupted);
        }
        match ctx.store.load::<Job>(job.kind.collection(), job.id.as_str())? {
            Some(own) if own.status != JobStatus::Canceled => {}
            _ => return Ok(PreviousState::OwnJobCanceled),
        }

        let status = ctx
            .store
            .load::<Job>(previous.kind.collection(), previous.id.as_str())?
            .map(|found| found.status);
        match status {
            Some(JobStatus::Successful) => return Ok(PreviousState::Succeeded),
            Some(status) if status.is_terminal() => {
                return Ok(PreviousState::Failed(previous_failed(previous)))
            }
            None => return Ok(PreviousState::Failed(previous_failed(previous))),
            Some(_) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(PreviousState::Failed(format!(
                "{} (not finished after {}s)",
                previous_failed(previous),
                ctx.settings.previous_job_wait().as_secs()
            )));
        }
        let _ = sleep_with_stop(stop, poll.min(deadline - now));
    }
}

fn previous_failed(previous: &PreviousJob) -> String {
    let job_type = match previous.kind {
        JobKind::Sync => "project_update",
        other => other.as_str(),
    };
    format!(
        "Previous Task Failed: {{\"job_type\": \"{job_type}\", \"job_name\": {}, \"job_id\": \"{}\"}}",
        Value::from(previous.name.clone()),
        previous.id
    )
}

/// Pending straight to failed: the job never started.
fn finish_without_running(
    ctx: &Context,
    job: &Job,
    explanation: String,
) -> Result<RunOutcome, JobUpdateError> {
    let failed = match transition_job(ctx.store.as_ref(), job.kind, &job.id, JobStatus::Failed, |job| {
        job.finished = Some(now_secs());
        job.job_explanation = explanation.clone();
    }) {
        Ok(job) => job,
        Err(JobUpdateError::InvalidTransition { from, .. }) => {
            return Ok(skipped(&job.id, &format!("job already {from}")));
        }
        Err(err) => return Err(err),
    };
    ctx.log_job(
        "warn",
        "job.finished",
        &[
            ("job_id", Value::from(failed.id.as_str())),
            ("kind", Value::from(failed.kind.as_str())),
            ("status", Value::from(failed.status.as_str())),
            ("explanation", Value::from(explanation)),
        ],
    );
    record_last_run(ctx, &failed);
    Ok(RunOutcome::Completed(failed))
}

fn execute(ctx: &Context, unit: &JobUnit, job: &Job) -> Execution {
    let checkout = ctx.settings.checkout_path(job.project_id.as_str());
    let mut execution = Execution {
        result: Ok(()),
        stdout: String::new(),
        args: Vec::new(),
        env: Vec::new(),
        cwd: checkout.display().to_string(),
    };
    execution.result = drive(ctx, unit, job, &checkout, &mut execution);
    execution
}

fn drive(
    ctx: &Context,
    unit: &JobUnit,
    job: &Job,
    checkout: &std::path::Path,
    execution: &mut Execution,
) -> Result<(), ExecError> {
    let interpreter = interpreter_for(unit, &ctx.cipher)?;
    let workspace = Workspace::prepare(checkout, &ctx.paths.jobs_dir(), job.id.as_str())?;
    let result = run_in_workspace(ctx, unit, job, interpreter.as_ref(), &workspace, execution);
    execution.stdout = workspace.read_output();
    result
}

fn run_in_workspace(
    ctx: &Context,
    unit: &JobUnit,
    job: &Job,
    interpreter: &dyn Interpreter,
    workspace: &Workspace,
    execution: &mut Execution,
) -> Result<(), ExecError> {
    let settings = ctx.settings.as_ref();
    let agent = SshAgent::start(
        &settings.binaries.ssh_agent,
        &workspace.transient,
        settings.agent_start_timeout(),
    )?;
    for key in interpreter.agent_keys() {
        agent.add_key(&settings.binaries.ssh_add, &key)?;
    }

    let prep = Preparation {
        settings,
        checkout: &workspace.checkout,
        transient: &workspace.transient,
        agent_socket: agent.socket(),
        agent_pid: agent.pid(),
        token: unit.token(),
    };
    let plan = interpreter.plan(&prep)?;
    execution.env = plan.env.recorded().to_vec();
    execution.args = plan
        .invocations
        .last()
        .map(Invocation::recorded)
        .unwrap_or_default();

    let timeout = interpreter.timeout(settings);
    let deadline = Instant::now() + timeout;
    let mut cancel_requested = || cancel_requested(ctx, job);
    let output = workspace.output_path();
    for invocation in plan.invocations {
        let invocation = match &settings.binaries.proot {
            Some(proot) => {
                wrap_in_proot(proot, &workspace.transient, &workspace.checkout, invocation)?
            }
            None => invocation,
        };
        let exit = run_supervised(
            &invocation,
            plan.env.vars(),
            &workspace.checkout,
            &output,
            deadline,
            &mut cancel_requested,
        )?;
        match exit {
            ProcessExit::Exited(code) if invocation.is_success(code) => {}
            ProcessExit::Exited(code) => {
                return Err(ExecError::NonZeroExit {
                    program: invocation.program,
                    code,
                })
            }
            ProcessExit::TimedOut => {
                return Err(ExecError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
            ProcessExit::Canceled => return Err(ExecError::Canceled),
        }
    }
    Ok(())
}

fn cancel_requested(ctx: &Context, job: &Job) -> bool {
    matches!(
        ctx.store.load::<Job>(job.kind.collection(), job.id.as_str()),
        Ok(Some(current)) if current.cancel_requested
    )
}

/// Best effort: a bookkeeping failure never changes the job's outcome.
fn record_last_run(ctx: &Context, job: &Job) {
    let finished = job.finished.unwrap_or_else(now_secs);
    let failed = job.status != JobStatus::Successful;
    let status = job.status;

    if let Some(template_id) = &job.template_id {
        let result = match job.kind {
            JobKind::Ansible => ctx
                .store
                .modify_document::<JobTemplate>(
                    Collection::JobTemplates,
                    template_id.as_str(),
                    |template| {
                        template.last_job_run = Some(finished);
                        template.last_job_failed = failed;
                        template.status = Some(status);
                        Ok(())
                    },
                )
                .map(|_| ()),
            JobKind::Terraform => ctx
                .store
                .modify_document::<TerraformJobTemplate>(
                    Collection::TerraformJobTemplates,
                    template_id.as_str(),
                    |template| {
                        template.last_job_run = Some(finished);
                        template.last_job_failed = failed;
                        template.status = Some(status);
                        Ok(())
                    },
                )
                .map(|_| ()),
            JobKind::Sync => Ok(()),
        };
        log_bookkeeping_error(ctx, job, "template", result);
    }

    let is_sync = job.kind == JobKind::Sync;
    let result = ctx
        .store
        .modify_document::<Project>(Collection::Projects, job.project_id.as_str(), |project| {
            project.last_job_run = Some(finished);
            project.last_job_failed = failed;
            if is_sync {
                project.last_updated = Some(finished);
                project.last_update_failed = failed;
                project.status = Some(status);
            }
            Ok(())
        })
        .map(|_| ());
    log_bookkeeping_error(ctx, job, "project", result);
}

fn log_bookkeeping_error(ctx: &Context, job: &Job, target: &str, result: Result<(), StoreError>) {
    if let Err(err) = result {
        ctx.log_job(
            "warn",
            "job.bookkeeping_failed",
            &[
                ("job_id", Value::from(job.id.as_str())),
                ("target", Value::from(target)),
                ("error", Value::from(err.to_string())),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::temp_context;
    use crate::models::{JobType, LaunchType};
    use crate::queue::SyncUnit;
    use crate::shared::ids::{JobId, ProjectId};

    fn sync_unit(id: &str) -> JobUnit {
        let project = crate::models::project::sample_project("p1", crate::models::ScmType::Git);
        let job = Job::new(
            JobId::parse(id).expect("id"),
            "p1 update Job".to_string(),
            JobKind::Sync,
            JobType::UpdateJob,
            LaunchType::Manual,
            ProjectId::parse("p1").expect("project id"),
        );
        JobUnit::Sync(SyncUnit {
            job,
            project,
            scm_credential: None,
            token: "tok".to_string(),
        })
    }

    #[test]
    fn missing_and_terminal_jobs_are_skipped() {
        let (_dir, ctx) = temp_context();
        let unit = sync_unit("j1");
        let stop = AtomicBool::new(false);

        let outcome = run_unit(&ctx, &unit, &stop).expect("run");
        assert!(matches!(outcome, RunOutcome::Skipped { .. }));

        let mut job = unit.job().clone();
        job.status = JobStatus::Canceled;
        ctx.store.insert_document(&job).expect("insert");
        match run_unit(&ctx, &unit, &stop).expect("run") {
            RunOutcome::Skipped { reason, .. } => assert!(reason.contains("canceled")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn failed_previous_job_fails_the_dependent_without_running() {
        let (_dir, ctx) = temp_context();
        let mut previous = unit_job("sync1", JobKind::Sync);
        previous.status = JobStatus::Failed;
        ctx.store.insert_document(&previous).expect("insert previous");

        let dependent = unit_job("j2", JobKind::Ansible);
        ctx.store.insert_document(&dependent).expect("insert job");
        let state = wait_for_previous(
            &ctx,
            &dependent,
            &PreviousJob {
                id: previous.id.clone(),
                kind: JobKind::Sync,
                name: "p1 update Job".to_string(),
            },
            &AtomicBool::new(false),
        )
        .expect("wait");
        match state {
            PreviousState::Failed(explanation) => assert_eq!(
                explanation,
                "Previous Task Failed: {\"job_type\": \"project_update\", \"job_name\": \"p1 update Job\", \"job_id\": \"sync1\"}"
            ),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn stop_flag_interrupts_the_previous_job_wait() {
        let (_dir, ctx) = temp_context();
        let previous = unit_job("sync1", JobKind::Sync);
        ctx.store.insert_document(&previous).expect("insert previous");
        let dependent = unit_job("j3", JobKind::Ansible);
        ctx.store.insert_document(&dependent).expect("insert job");

        let state = wait_for_previous(
            &ctx,
            &dependent,
            &PreviousJob {
                id: previous.id.clone(),
                kind: JobKind::Sync,
                name: "sync".to_string(),
            },
            &AtomicBool::new(true),
        )
        .expect("wait");
        assert!(matches!(state, PreviousState::Interrupted));
    }

    fn unit_job(id: &str, kind: JobKind) -> Job {
        let job_type = if kind == JobKind::Sync {
            JobType::UpdateJob
        } else {
            JobType::Run
        };
        Job::new(
            JobId::parse(id).expect("id"),
            id.to_string(),
            kind,
            job_type,
            LaunchType::Manual,
            ProjectId::parse("p1").expect("project id"),
        )
    }
}
