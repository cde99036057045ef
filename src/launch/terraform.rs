use super::overrides::{required, required_map};
use super::sync::prepare_sync;
use super::{
    load_principal, load_readable_template, persist_and_dispatch,
    project_needs_sync, resolve_optional_credential, resolve_project, LaunchError,
    LaunchOutcome, LaunchOverrides,
};
use crate::context::Context;
use crate::models::{CredentialRole, Job, JobKind, LaunchType, TerraformJobTemplate};
use crate::queue::{JobUnit, TerraformUnit};
use crate::shared::ids::{generate_token, JobId, TemplateId, UserId};
use crate::store::Collection;

/// Terraform templates prompt on fewer axes: variables, credential and job
/// type. There is no inventory.
pub fn launch_terraform_template(
    ctx: &Context,
    template_id: &TemplateId,
    user_id: &UserId,
    overrides: &LaunchOverrides,
) -> Result<LaunchOutcome, LaunchError> {
    let principal = load_principal(ctx, user_id)?;
    let directory = ctx.directory();
    let resolver = ctx.resolver(&directory);

    let template: TerraformJobTemplate = load_readable_template(
        ctx,
        &resolver,
        &principal,
        Collection::TerraformJobTemplates,
        template_id,
    )?;
    if !resolver.can_execute(&principal, &template) {
        return Err(LaunchError::Forbidden {
            action: "execute",
            resource: "terraform job template",
            id: template_id.to_string(),
        });
    }

    let mut job = compose_job(&template, JobId::generate()?);
    job.created_by = Some(principal.id.clone());
    apply_prompted_overrides(&template, overrides, &mut job)?;

    let machine_credential = resolve_optional_credential(
        ctx,
        &resolver,
        &principal,
        job.machine_credential_id.as_ref(),
        CredentialRole::Machine,
        template.prompt_credential,
    )?;
    let cloud_credential = resolve_optional_credential(
        ctx,
        &resolver,
        &principal,
        job.cloud_credential_id.as_ref(),
        CredentialRole::Cloud,
        template.prompt_credential && overrides.cloud_credential_id.is_some(),
    )?;
    let project = resolve_project(ctx, &resolver, &principal, &template.project_id)?;

    let sync = if project_needs_sync(ctx, &project) {
        Some(prepare_sync(ctx, &project, LaunchType::Dependency, &principal)?)
    } else {
        None
    };

    let exclusive = !template.allow_simultaneous;
    let unit = JobUnit::Terraform(TerraformUnit {
        job,
        template,
        project,
        machine_credential,
        cloud_credential,
        token: generate_token()?,
        previous_job: None,
    });
    persist_and_dispatch(ctx, unit, sync, exclusive)
}

fn compose_job(template: &TerraformJobTemplate, id: JobId) -> Job {
    let mut job = Job::new(
        id,
        template.name.clone(),
        JobKind::Terraform,
        template.job_type,
        LaunchType::Manual,
        template.project_id.clone(),
    );
    job.description = template.description.clone();
    job.template_id = Some(template.id.clone());
    job.machine_credential_id = template.machine_credential_id.clone();
    job.cloud_credential_id = template.cloud_credential_id.clone();
    job.extra_vars = template.vars.clone();
    job.directory = template.directory.clone();
    job.target = template.target.clone();
    job.parallelism = template.parallelism;
    job.update_on_launch = template.update_on_launch;
    job
}

fn apply_prompted_overrides(
    template: &TerraformJobTemplate,
    overrides: &LaunchOverrides,
    job: &mut Job,
) -> Result<(), LaunchError> {
    if template.prompt_variables {
        job.extra_vars = required_map("vars", &overrides.vars)?;
    }
    if template.prompt_job_type {
        let job_type = required("job_type", &overrides.job_type)?;
        if !job_type.valid_for(JobKind::Terraform) {
            return Err(LaunchError::InvalidOverride {
                field: "job_type",
                reason: format!("`{}` is not a terraform job type", job_type.as_str()),
            });
        }
        job.job_type = job_type;
    }
    if template.prompt_credential {
        job.machine_credential_id = Some(required(
            "machine_credential_id",
            &overrides.machine_credential_id,
        )?);
        if let Some(id) = &overrides.cloud_credential_id {
            job.cloud_credential_id = Some(id.clone());
        }
    }
    Ok(())
}
