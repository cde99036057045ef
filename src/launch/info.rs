use super::{load_principal, load_readable_template, LaunchError};
use crate::context::Context;
use crate::models::{Credential, CredentialRole, Inventory, JobTemplate, TerraformJobTemplate};
use crate::shared::ids::{CredentialId, InventoryId, TemplateId, UserId};
use crate::store::{Collection, DocumentStoreExt};
use serde::Serialize;
use serde_json::{json, Value};

/// What a caller has to supply before a template can start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchInfo {
    pub template_id: TemplateId,
    pub name: String,
    pub description: String,
    pub ask_variables_on_launch: bool,
    pub ask_limit_on_launch: bool,
    pub ask_tags_on_launch: bool,
    pub ask_skip_tags_on_launch: bool,
    pub ask_job_type_on_launch: bool,
    pub ask_inventory_on_launch: bool,
    pub ask_credential_on_launch: bool,
    pub credential_needed_to_start: bool,
    pub inventory_needed_to_start: bool,
    pub can_start: bool,
    pub can_start_without_user_input: bool,
    pub defaults: Value,
}

pub fn job_template_launch_info(
    ctx: &Context,
    template_id: &TemplateId,
    user_id: &UserId,
) -> Result<LaunchInfo, LaunchError> {
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

    let credential = lookup_credential(ctx, template.machine_credential_id.as_ref())?
        .filter(|credential| credential.kind.fits(CredentialRole::Machine));
    let inventory = lookup_inventory(ctx, template.inventory_id.as_ref())?;
    let credential_needed = credential.is_none() && !template.prompt_credential;
    let inventory_needed = inventory.is_none() && !template.prompt_inventory;
    let asks = [
        template.prompt_variables,
        template.prompt_limit,
        template.prompt_tags,
        template.prompt_skip_tags,
        template.prompt_job_type,
        template.prompt_inventory,
        template.prompt_credential,
    ];

    Ok(LaunchInfo {
        template_id: template.id.clone(),
        name: template.name.clone(),
        description: template.description.clone(),
        ask_variables_on_launch: template.prompt_variables,
        ask_limit_on_launch: template.prompt_limit,
        ask_tags_on_launch: template.prompt_tags,
        ask_skip_tags_on_launch: template.prompt_skip_tags,
        ask_job_type_on_launch: template.prompt_job_type,
        ask_inventory_on_launch: template.prompt_inventory,
        ask_credential_on_launch: template.prompt_credential,
        credential_needed_to_start: credential_needed,
        inventory_needed_to_start: inventory_needed,
        can_start: resolver.can_execute(&principal, &template),
        can_start_without_user_input: !asks.contains(&true)
            && !credential_needed
            && !inventory_needed,
        defaults: json!({
            "job_type": template.job_type.as_str(),
            "extra_vars": template.extra_vars,
            "limit": template.limit,
            "job_tags": template.job_tags,
            "skip_tags": template.skip_tags,
            "credential": credential.map(|c| json!({"id": c.id, "name": c.name})),
            "inventory": inventory.map(|i| json!({"id": i.id, "name": i.name})),
        }),
    })
}

pub fn terraform_template_launch_info(
    ctx: &Context,
    template_id: &TemplateId,
    user_id: &UserId,
) -> Result<LaunchInfo, LaunchError> {
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

    let credential = lookup_credential(ctx, template.machine_credential_id.as_ref())?
        .filter(|credential| credential.kind.fits(CredentialRole::Machine));
    let asks = [
        template.prompt_variables,
        template.prompt_job_type,
        template.prompt_credential,
    ];

    Ok(LaunchInfo {
        template_id: template.id.clone(),
        name: template.name.clone(),
        description: template.description.clone(),
        ask_variables_on_launch: template.prompt_variables,
        ask_limit_on_launch: false,
        ask_tags_on_launch: false,
        ask_skip_tags_on_launch: false,
        ask_job_type_on_launch: template.prompt_job_type,
        ask_inventory_on_launch: false,
        ask_credential_on_launch: template.prompt_credential,
        credential_needed_to_start: false,
        inventory_needed_to_start: false,
        can_start: resolver.can_execute(&principal, &template),
        can_start_without_user_input: !asks.contains(&true),
        defaults: json!({
            "job_type": template.job_type.as_str(),
            "vars": template.vars,
            "directory": template.directory,
            "target": template.target,
            "credential": credential.map(|c| json!({"id": c.id, "name": c.name})),
        }),
    })
}

fn lookup_credential(
    ctx: &Context,
    id: Option<&CredentialId>,
) -> Result<Option<Credential>, LaunchError> {
    match id {
        Some(id) => Ok(ctx.store.load(Collection::Credentials, id.as_str())?),
        None => Ok(None),
    }
}

fn lookup_inventory(
    ctx: &Context,
    id: Option<&InventoryId>,
) -> Result<Option<Inventory>, LaunchError> {
    match id {
        Some(id) => Ok(ctx.store.load(Collection::Inventories, id.as_str())?),
        None => Ok(None),
    }
}
