use super::{load_principal, persist_and_dispatch, LaunchError, LaunchOutcome};
use crate::context::Context;
use crate::models::{
    Credential, CredentialRole, Job, JobKind, JobType, LaunchType, Project, ScmType, User,
};
use crate::queue::{JobUnit, SyncUnit};
use crate::shared::ids::{generate_token, JobId, ProjectId, UserId};
use crate::store::{Collection, DocumentStoreExt};

/// Builds (but does not persist) a project update job and its unit.
pub(crate) fn prepare_sync(
    ctx: &Context,
    project: &Project,
    launch_type: LaunchType,
    principal: &User,
) -> Result<SyncUnit, LaunchError> {
    let scm_credential = match &project.scm_credential_id {
        Some(id) => {
            let credential: Credential = ctx
                .store
                .load(Collection::Credentials, id.as_str())?
                .ok_or_else(|| LaunchError::CredentialNotFound {
                    role: CredentialRole::Scm.as_str(),
                    id: id.to_string(),
                })?;
            if !credential.kind.fits(CredentialRole::Scm) {
                return Err(LaunchError::IncompatibleCredential {
                    role: CredentialRole::Scm.as_str(),
                    id: id.to_string(),
                    kind: credential.kind.to_string(),
                });
            }
            Some(credential)
        }
        None => None,
    };

    let mut job = Job::new(
        JobId::generate()?,
        format!("{} update Job", project.name),
        JobKind::Sync,
        JobType::UpdateJob,
        launch_type,
        project.id.clone(),
    );
    job.description = format!("Updates {} project", project.name);
    job.scm_credential_id = project.scm_credential_id.clone();
    job.created_by = Some(principal.id.clone());

    Ok(SyncUnit {
        job,
        project: project.clone(),
        scm_credential,
        token: generate_token()?,
    })
}

/// Operator-requested project update outside of any template launch.
pub fn launch_project_update(
    ctx: &Context,
    project_id: &ProjectId,
    user_id: &UserId,
) -> Result<LaunchOutcome, LaunchError> {
    let principal = load_principal(ctx, user_id)?;
    let directory = ctx.directory();
    let resolver = ctx.resolver(&directory);

    let project: Project = match ctx.store.load(Collection::Projects, project_id.as_str())? {
        Some(project) if resolver.can_read(&principal, &project) => project,
        _ => return Err(LaunchError::ProjectNotFound(project_id.to_string())),
    };
    if !resolver.can_execute(&principal, &project) {
        return Err(LaunchError::Forbidden {
            action: "update",
            resource: "project",
            id: project_id.to_string(),
        });
    }
    if project.scm_type == ScmType::Manual {
        return Err(LaunchError::InvalidOverride {
            field: "scm_type",
            reason: "manual projects have nothing to update".to_string(),
        });
    }

    let unit = prepare_sync(ctx, &project, LaunchType::Manual, &principal)?;
    persist_and_dispatch(ctx, JobUnit::Sync(unit), None, false)
}
