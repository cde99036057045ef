use super::overrides::{required, required_map, required_text};
use super::sync::prepare_sync;
use super::{
    load_principal, load_readable_template, persist_and_dispatch,
    project_needs_sync, resolve_credential, resolve_inventory, resolve_optional_credential,
    resolve_project, LaunchError, LaunchOutcome, LaunchOverrides,
};
use crate::context::Context;
use crate::models::{CredentialRole, Job, JobKind, JobTemplate, LaunchType};
use crate::queue::{AnsibleUnit, JobUnit};
use crate::shared::ids::{generate_token, JobId, TemplateId, UserId};
use crate::store::Collection;

pub fn launch_job_template(
    ctx: &Context,
    template_id: &TemplateId,
    user_id: &UserId,
    overrides: &LaunchOverrides,
) -> Result<LaunchOutcome, LaunchError> {
    let principal = load_principal(ctx, user_id)?;
    let directory = ctx.directory();
    let resolver = ctx.resolver(&directory);

    let template: JobTemplate = load_readable_template(
        ctx,
        &resolver,
        &principal,
        Collection::JobTemplates,
        template_id,
    )?;
    if !resolver.can_execute(&principal, &template) {
        return Err(LaunchError::Forbidden {
            action: "execute",
            resource: "job template",
            id: template_id.to_string(),
        });
    }

    let mut job = compose_job(&template, JobId::generate()?);
    job.created_by = Some(principal.id.clone());
    apply_prompted_overrides(&template, overrides, &mut job)?;

    let machine_id = job
        .machine_credential_id
        .clone()
        .ok_or(LaunchError::MissingCredential {
            role: CredentialRole::Machine.as_str(),
        })?;
    let machine_credential = resolve_credential(
        ctx,
        &resolver,
        &principal,
        &machine_id,
        CredentialRole::Machine,
        template.prompt_credential,
    )?;
    let network_credential = resolve_optional_credential(
        ctx,
        &resolver,
        &principal,
        job.network_credential_id.as_ref(),
        CredentialRole::Network,
        template.prompt_credential && overrides.network_credential_id.is_some(),
    )?;
    let cloud_credential = resolve_optional_credential(
        ctx,
        &resolver,
        &principal,
        job.cloud_credential_id.as_ref(),
        CredentialRole::Cloud,
        template.prompt_credential && overrides.cloud_credential_id.is_some(),
    )?;

    let inventory_id = job
        .inventory_id
        .clone()
        .ok_or(LaunchError::MissingInventory)?;
    let inventory = resolve_inventory(
        ctx,
        &resolver,
        &principal,
        &inventory_id,
        template.prompt_inventory,
    )?;
    let project = resolve_project(ctx, &resolver, &principal, &template.project_id)?;

    let sync = if project_needs_sync(ctx, &project) {
        Some(prepare_sync(ctx, &project, LaunchType::Dependency, &principal)?)
    } else {
        None
    };

    let exclusive = !template.allow_simultaneous;
    let unit = JobUnit::Ansible(AnsibleUnit {
        job,
        template,
        project,
        inventory,
        machine_credential: Some(machine_credential),
        network_credential,
        cloud_credential,
        token: generate_token()?,
        previous_job: None,
    });
    persist_and_dispatch(ctx, unit, sync, exclusive)
}

fn compose_job(template: &JobTemplate, id: JobId) -> Job {
    let mut job = Job::new(
        id,
        template.name.clone(),
        JobKind::Ansible,
        template.job_type,
        LaunchType::Manual,
        template.project_id.clone(),
    );
    job.description = template.description.clone();
    job.template_id = Some(template.id.clone());
    job.inventory_id = template.inventory_id.clone();
    job.machine_credential_id = template.machine_credential_id.clone();
    job.network_credential_id = template.network_credential_id.clone();
    job.cloud_credential_id = template.cloud_credential_id.clone();
    job.playbook = template.playbook.clone();
    job.forks = template.forks;
    job.limit = template.limit.clone();
    job.verbosity = template.verbosity;
    job.extra_vars = template.extra_vars.clone();
    job.job_tags = template.job_tags.clone();
    job.skip_tags = template.skip_tags.clone();
    job.start_at_task = template.start_at_task.clone();
    job.force_handlers = template.force_handlers;
    job.become_enabled = template.become_enabled;
    job
}

/// Overwrites exactly the prompted fields; a prompted field without a
/// value is a hard error.
fn apply_prompted_overrides(
    template: &JobTemplate,
    overrides: &LaunchOverrides,
    job: &mut Job,
) -> Result<(), LaunchError> {
    if template.prompt_variables {
        job.extra_vars = required_map("extra_vars", &overrides.extra_vars)?;
    }
    if template.prompt_limit {
        job.limit = required_text("limit", &overrides.limit)?;
    }
    if template.prompt_tags {
        job.job_tags = required_text("job_tags", &overrides.job_tags)?;
    }
    if template.prompt_skip_tags {
        job.skip_tags = required_text("skip_tags", &overrides.skip_tags)?;
    }
    if template.prompt_job_type {
        let job_type = required("job_type", &overrides.job_type)?;
        if !job_type.valid_for(JobKind::Ansible) {
            return Err(LaunchError::InvalidOverride {
                field: "job_type",
                reason: format!("`{}` is not an ansible job type", job_type.as_str()),
            });
        }
        job.job_type = job_type;
    }
    if template.prompt_inventory {
        job.inventory_id = Some(required("inventory_id", &overrides.inventory_id)?);
    }
    if template.prompt_credential {
        job.machine_credential_id = Some(required(
            "machine_credential_id",
            &overrides.machine_credential_id,
        )?);
        if let Some(id) = &overrides.network_credential_id {
            job.network_credential_id = Some(id.clone());
        }
        if let Some(id) = &overrides.cloud_credential_id {
            job.cloud_credential_id = Some(id.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::sample_job_template;
    use crate::models::JobType;
    use serde_json::json;

    #[test]
    fn only_prompted_fields_are_overwritten() {
        let mut template = sample_job_template("t1", "p1", "i1");
        template.limit = "web*".to_string();
        template.job_tags = "deploy".to_string();
        template.prompt_tags = true;

        let overrides = LaunchOverrides {
            limit: Some("db*".to_string()),
            job_tags: Some("migrate".to_string()),
            ..LaunchOverrides::default()
        };
        let mut job = compose_job(&template, JobId::parse("j1").expect("id"));
        apply_prompted_overrides(&template, &overrides, &mut job).expect("apply");

        assert_eq!(job.limit, "web*");
        assert_eq!(job.job_tags, "migrate");
        assert_eq!(job.template_id.as_ref().map(TemplateId::as_str), Some("t1"));
    }

    #[test]
    fn prompted_job_type_must_suit_ansible() {
        let mut template = sample_job_template("t1", "p1", "i1");
        template.prompt_job_type = true;
        let mut job = compose_job(&template, JobId::parse("j1").expect("id"));

        let err = apply_prompted_overrides(&template, &LaunchOverrides::default(), &mut job)
            .expect_err("missing job type");
        assert!(matches!(err, LaunchError::MissingPromptField { field: "job_type" }));

        let overrides = LaunchOverrides {
            job_type: Some(JobType::Apply),
            ..LaunchOverrides::default()
        };
        let err = apply_prompted_overrides(&template, &overrides, &mut job)
            .expect_err("terraform type rejected");
        assert!(matches!(err, LaunchError::InvalidOverride { .. }));
    }

    #[test]
    fn prompted_variables_replace_template_extra_vars() {
        let mut template = sample_job_template("t1", "p1", "i1");
        template.extra_vars = json!({"release": "1.0"}).as_object().cloned().expect("map");
        template.prompt_variables = true;
        let overrides = LaunchOverrides {
            extra_vars: json!({"release": "2.0"}).as_object().cloned(),
            ..LaunchOverrides::default()
        };
        let mut job = compose_job(&template, JobId::parse("j1").expect("id"));
        apply_prompted_overrides(&template, &overrides, &mut job).expect("apply");
        assert_eq!(job.extra_vars["release"], "2.0");
    }
}
