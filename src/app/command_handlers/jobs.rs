use crate::app::command_support::{none_or, open_context, parse_flags, read_file};
use crate::launch::{
    job_template_launch_info, launch_job_template, launch_project_update,
    launch_terraform_template, terraform_template_launch_info, LaunchError, LaunchErrorKind,
    LaunchOutcome, LaunchOverrides,
};
use crate::runtime::{cancel_job, sweep_stale_jobs, CancelOutcome};
use crate::shared::ids::{JobId, ProjectId, TemplateId, UserId};
use crate::shared::time::now_secs;
use std::path::Path;
use std::time::Duration;

const LAUNCH_USAGE: &str =
    "tensord launch <template-id> --user <user-id> [--terraform] [--overrides <json file>]";
const LAUNCH_INFO_USAGE: &str = "tensord launch-info <template-id> --user <user-id> [--terraform]";
const UPDATE_PROJECT_USAGE: &str = "tensord update-project <project-id> --user <user-id>";
const CANCEL_USAGE: &str = "tensord cancel <job-id>";
const SWEEP_USAGE: &str = "tensord sweep [--older-than <secs>] [--apply]";

pub fn cmd_launch(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &["user", "overrides"], &["terraform"])?;
    let template_id = TemplateId::parse(parsed.positional(0, LAUNCH_USAGE)?)?;
    let user_id = UserId::parse(parsed.required_value("user", LAUNCH_USAGE)?)?;
    let overrides = match parsed.value("overrides") {
        Some(path) => serde_json::from_str::<LaunchOverrides>(&read_file(path)?)
            .map_err(|e| format!("invalid overrides in {path}: {e}"))?,
        None => LaunchOverrides::default(),
    };

    let ctx = open_context(root)?;
    let result = if parsed.switch("terraform") {
        launch_terraform_template(&ctx, &template_id, &user_id, &overrides)
    } else {
        launch_job_template(&ctx, &template_id, &user_id, &overrides)
    };
    result
        .map(|outcome| render_launch(&outcome))
        .map_err(|err| render_launch_error(&err))
}

pub fn cmd_launch_info(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &["user"], &["terraform"])?;
    let template_id = TemplateId::parse(parsed.positional(0, LAUNCH_INFO_USAGE)?)?;
    let user_id = UserId::parse(parsed.required_value("user", LAUNCH_INFO_USAGE)?)?;

    let ctx = open_context(root)?;
    let info = if parsed.switch("terraform") {
        terraform_template_launch_info(&ctx, &template_id, &user_id)
    } else {
        job_template_launch_info(&ctx, &template_id, &user_id)
    }
    .map_err(|err| render_launch_error(&err))?;
    serde_json::to_string_pretty(&info).map_err(|e| e.to_string())
}

pub fn cmd_update_project(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &["user"], &[])?;
    let project_id = ProjectId::parse(parsed.positional(0, UPDATE_PROJECT_USAGE)?)?;
    let user_id = UserId::parse(parsed.required_value("user", UPDATE_PROJECT_USAGE)?)?;

    let ctx = open_context(root)?;
    launch_project_update(&ctx, &project_id, &user_id)
        .map(|outcome| render_launch(&outcome))
        .map_err(|err| render_launch_error(&err))
}

pub fn cmd_cancel(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &[], &[])?;
    let job_id = JobId::parse(parsed.positional(0, CANCEL_USAGE)?)?;

    let ctx = open_context(root)?;
    match cancel_job(&ctx, &job_id).map_err(|e| e.to_string())? {
        CancelOutcome::Canceled(job) => Ok(format!(
            "canceled\njob_id={}\nstatus={}",
            job.id, job.status
        )),
        CancelOutcome::Requested(job) => Ok(format!(
            "cancel requested\njob_id={}\nstatus={}",
            job.id, job.status
        )),
    }
}

pub fn cmd_sweep(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &["older-than"], &["apply"])?;
    if !parsed.positional.is_empty() {
        return Err(format!("usage: {SWEEP_USAGE}"));
    }
    let ctx = open_context(root)?;
    let max_age = match parsed.value("older-than") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("--older-than must be a number of seconds, got `{raw}`"))?,
        None => ctx.settings.sweep.stale_new_after_seconds,
    };

    let apply = parsed.switch("apply");
    let report = sweep_stale_jobs(&ctx, Duration::from_secs(max_age), apply, now_secs())
        .map_err(|e| e.to_string())?;

    let mut lines = vec![
        format!("older_than={max_age}"),
        format!("stale={}", report.stale.len()),
        format!("queued={}", report.queued.len()),
        format!("applied={apply}"),
    ];
    for job in &report.stale {
        let id = &job.id;
        lines.push(format!("job:{id}.kind={}", job.kind.as_str()));
        lines.push(format!("job:{id}.name={}", job.name));
        lines.push(format!("job:{id}.age_seconds={}", job.age_seconds));
    }
    if apply {
        lines.push(format!("failed={}", report.failed.len()));
    }
    Ok(lines.join("\n"))
}

fn render_launch(outcome: &LaunchOutcome) -> String {
    let job = &outcome.job;
    let mut lines = vec![
        "launched".to_string(),
        format!("job_id={}", job.id),
        format!("kind={}", job.kind.as_str()),
        format!("status={}", job.status),
    ];
    lines.push(format!(
        "sync_job_id={}",
        none_or(outcome.sync_job.as_ref().map(|sync| sync.id.to_string()))
    ));
    lines.join("\n")
}

fn render_launch_error(err: &LaunchError) -> String {
    let kind = match err.kind() {
        LaunchErrorKind::Validation => "validation",
        LaunchErrorKind::Authorization => "authorization",
        LaunchErrorKind::Dispatch => "dispatch",
        LaunchErrorKind::Store => "store",
    };
    match err.orphaned_job_id() {
        Some(job_id) => format!("launch failed ({kind}): {err}\norphaned_job_id={job_id}"),
        None => format!("launch failed ({kind}): {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_errors_carry_their_kind() {
        let rendered = render_launch_error(&LaunchError::TemplateNotFound("t1".to_string()));
        assert_eq!(rendered, "launch failed (validation): template t1 not found");

        let rendered = render_launch_error(&LaunchError::UnknownUser("u9".to_string()));
        assert!(rendered.starts_with("launch failed (authorization)"));
    }
}
