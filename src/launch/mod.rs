//! Turns a template plus launch-time overrides into a persisted job and a
//! queued unit of work.
//!
//! Validation runs to completion before anything is written: a failed
//! launch never leaves a job behind. Once the job is persisted, a queue
//! failure is reported as [`LaunchError::Dispatch`] and the job stays `new`
//! until an operator sweeps it.

pub mod ansible;
pub mod error;
pub mod info;
pub mod overrides;
pub mod sync;
pub mod terraform;

pub use ansible::launch_job_template;
pub use error::{LaunchError, LaunchErrorKind};
pub use info::{job_template_launch_info, terraform_template_launch_info, LaunchInfo};
pub use overrides::LaunchOverrides;
pub use sync::launch_project_update;
pub use terraform::launch_terraform_template;

use crate::context::Context;
use crate::models::{
    patch_job, Credential, CredentialRole, Inventory, Job, JobKind, JobStatus, JobUpdateError,
    Project, User,
};
use crate::queue::{enqueue, JobUnit, PreviousJob, SyncUnit};
use crate::rbac::{AccessResolver, Protected, StoreDirectory};
use crate::shared::ids::{CredentialId, InventoryId, JobId, ProjectId, TemplateId, UserId};
use crate::shared::time::now_secs;
use crate::store::{DocumentStoreExt, Filter};
use serde_json::Value;

/// What a successful launch produced.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub job: Job,
    /// Project update inserted ahead of the job, when the checkout was stale.
    pub sync_job: Option<Job>,
}

type Resolver<'a> = AccessResolver<'a, StoreDirectory<'a>>;

pub(crate) fn load_principal(ctx: &Context, user_id: &UserId) -> Result<User, LaunchError> {
    ctx.store
        .load::<User>(crate::store::Collection::Users, user_id.as_str())?
        .ok_or_else(|| LaunchError::UnknownUser(user_id.to_string()))
}

/// Template lookup that does not reveal whether an unreadable template
/// exists.
pub(crate) fn load_readable_template<T>(
    ctx: &Context,
    resolver: &Resolver<'_>,
    principal: &User,
    collection: crate::store::Collection,
    template_id: &TemplateId,
) -> Result<T, LaunchError>
where
    T: serde::de::DeserializeOwned + Protected,
{
    let template: Option<T> = ctx.store.load(collection, template_id.as_str())?;
    match template {
        Some(template) if resolver.can_read(principal, &template) => Ok(template),
        _ => Err(LaunchError::TemplateNotFound(template_id.to_string())),
    }
}

/// `from_override` marks ids the caller typed in: those report an
/// unreadable credential as missing so callers cannot learn that the id exists.
pub(crate) fn resolve_credential(
    ctx: &Context,
    resolver: &Resolver<'_>,
    principal: &User,
    id: &CredentialId,
    role: CredentialRole,
    from_override: bool,
) -> Result<Credential, LaunchError> {
    let not_found = || LaunchError::CredentialNotFound {
        role: role.as_str(),
        id: id.to_string(),
    };
    let credential: Credential = ctx
        .store
        .load(crate::store::Collection::Credentials, id.as_str())?
        .ok_or_else(not_found)?;
    if !resolver.can_read(principal, &credential) {
        if from_override {
            return Err(not_found());
        }
        return Err(LaunchError::Forbidden {
            action: "read",
            resource: "credential",
            id: id.to_string(),
        });
    }
    if !credential.kind.fits(role) {
        return Err(LaunchError::IncompatibleCredential {
            role: role.as_str(),
            id: id.to_string(),
            kind: credential.kind.to_string(),
        });
    }
    Ok(credential)
}

pub(crate) fn resolve_optional_credential(
    ctx: &Context,
    resolver: &Resolver<'_>,
    principal: &User,
    id: Option<&CredentialId>,
    role: CredentialRole,
    from_override: bool,
) -> Result<Option<Credential>, LaunchError> {
    id.map(|id| resolve_credential(ctx, resolver, principal, id, role, from_override))
        .transpose()
}

pub(crate) fn resolve_inventory(
    ctx: &Context,
    resolver: &Resolver<'_>,
    principal: &User,
    id: &InventoryId,
    from_override: bool,
) -> Result<Inventory, LaunchError> {
    let inventory: Inventory = ctx
        .store
        .load(crate::store::Collection::Inventories, id.as_str())?
        .ok_or_else(|| LaunchError::InventoryNotFound(id.to_string()))?;
    if !resolver.can_read(principal, &inventory) {
        if from_override {
            return Err(LaunchError::InventoryNotFound(id.to_string()));
        }
        return Err(LaunchError::Forbidden {
            action: "read",
            resource: "inventory",
            id: id.to_string(),
        });
    }
    Ok(inventory)
}

pub(crate) fn resolve_project(
    ctx: &Context,
    resolver: &Resolver<'_>,
    principal: &User,
    id: &ProjectId,
) -> Result<Project, LaunchError> {
    let project: Project = ctx
        .store
        .load(crate::store::Collection::Projects, id.as_str())?
        .ok_or_else(|| LaunchError::ProjectNotFound(id.to_string()))?;
    if !resolver.can_read(principal, &project) {
        return Err(LaunchError::Forbidden {
            action: "read",
            resource: "project",
            id: id.to_string(),
        });
    }
    Ok(project)
}

/// Persists the job, inserts and queues a project update when `sync` is
/// given, then queues the job itself.
///
/// With `exclusive`, the job is only inserted while no other job for its
/// template is active; the check and the insert are one store transaction.
pub(crate) fn persist_and_dispatch(
    ctx: &Context,
    mut unit: JobUnit,
    sync: Option<SyncUnit>,
    exclusive: bool,
) -> Result<LaunchOutcome, LaunchError> {
    let job_id = unit.job().id.clone();
    let kind = unit.job().kind;
    match unit.job().template_id.clone().filter(|_| exclusive) {
        Some(template_id) => {
            let active = Filter::new()
                .eq("template_id", template_id.as_str())
                .one_of("status", JobStatus::ACTIVE.map(JobStatus::as_str));
            if let Some(existing) = ctx.store.insert_document_unless(unit.job(), &active)? {
                return Err(LaunchError::TemplateBusy {
                    template_id: template_id.to_string(),
                    active_job_id: existing
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
        None => ctx.store.insert_document(unit.job())?,
    }
    ctx.log_job(
        "info",
        "job.created",
        &[
            ("job_id", Value::from(job_id.as_str())),
            ("kind", Value::from(kind.as_str())),
            (
                "template_id",
                Value::from(unit.job().template_id.as_ref().map(TemplateId::to_string)),
            ),
        ],
    );

    let mut sync_job = None;
    if let Some(sync_unit) = sync {
        let sync_job_record = sync_unit.job.clone();
        ctx.store
            .insert_document(&sync_job_record)
            .map_err(|source| record_failed(ctx, &job_id, JobUpdateError::Store(source)))?;
        let sync_unit = JobUnit::Sync(sync_unit);
        enqueue(&ctx.paths.queue(sync_unit.topic()), &sync_unit)
            .map_err(|source| dispatch_failed(ctx, &job_id, source))?;
        ctx.log_job(
            "info",
            "job.dispatched",
            &[
                ("job_id", Value::from(sync_job_record.id.as_str())),
                ("kind", Value::from(JobKind::Sync.as_str())),
                ("ahead_of", Value::from(job_id.as_str())),
            ],
        );

        let previous = PreviousJob {
            id: sync_job_record.id.clone(),
            kind: JobKind::Sync,
            name: sync_job_record.name.clone(),
        };
        let previous_id = previous.id.clone();
        patch_job(ctx.store.as_ref(), kind, &job_id, |job| {
            job.previous_job_id = Some(previous_id);
        })
        .map_err(|source| record_failed(ctx, &job_id, source))?;
        unit.set_previous_job(previous);
        sync_job = Some(sync_job_record);
    }

    enqueue(&ctx.paths.queue(unit.topic()), &unit)
        .map_err(|source| dispatch_failed(ctx, &job_id, source))?;
    ctx.log_job(
        "info",
        "job.dispatched",
        &[
            ("job_id", Value::from(job_id.as_str())),
            ("kind", Value::from(kind.as_str())),
            ("topic", Value::from(unit.topic().as_str())),
        ],
    );

    Ok(LaunchOutcome {
        job: unit.job().clone(),
        sync_job,
    })
}

fn dispatch_failed(
    ctx: &Context,
    job_id: &JobId,
    source: crate::queue::QueueError,
) -> LaunchError {
    ctx.log_job(
        "error",
        "job.dispatch_failed",
        &[
            ("job_id", Value::from(job_id.as_str())),
            ("error", Value::from(source.to_string())),
        ],
    );
    LaunchError::Dispatch {
        job_id: job_id.to_string(),
        source,
    }
}

fn record_failed(ctx: &Context, job_id: &JobId, source: JobUpdateError) -> LaunchError {
    ctx.log_job(
        "error",
        "job.dispatch_failed",
        &[
            ("job_id", Value::from(job_id.as_str())),
            ("error", Value::from(source.to_string())),
        ],
    );
    LaunchError::DispatchRecord {
        job_id: job_id.to_string(),
        source,
    }
}

/// Whether a launch of a job on `project` must be preceded by an update.
pub(crate) fn project_needs_sync(ctx: &Context, project: &Project) -> bool {
    let checkout = ctx.settings.checkout_path(project.id.as_str());
    project.needs_sync(checkout.is_dir(), now_secs())
}
