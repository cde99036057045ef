use super::{AccessControl, JobStatus};
use crate::shared::ids::{CredentialId, OrganizationId, ProjectId, UserId};
use crate::shared::serde_ext::null_as_default;
use crate::store::{Collection, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmType {
    #[default]
    Manual,
    Git,
    Hg,
    Svn,
}

impl ScmType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Git => "git",
            Self::Hg => "hg",
            Self::Svn => "svn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scm_type: ScmType,
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub scm_url: String,
    #[serde(default)]
    pub scm_branch: String,
    #[serde(default)]
    pub scm_clean: bool,
    #[serde(default)]
    pub scm_delete_on_update: bool,
    #[serde(default)]
    pub scm_credential_id: Option<CredentialId>,
    #[serde(default)]
    pub scm_update_on_launch: bool,
    #[serde(default)]
    pub scm_update_cache_timeout: u64,
    #[serde(default)]
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub last_update_failed: bool,
    #[serde(default)]
    pub last_job_run: Option<i64>,
    #[serde(default)]
    pub last_job_failed: bool,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<AccessControl>,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

impl Project {
    /// Whether a launch at `now` should refresh the checkout first.
    pub fn needs_sync(&self, checkout_exists: bool, now: i64) -> bool {
        if self.scm_type == ScmType::Manual {
            return false;
        }
        if !checkout_exists {
            return true;
        }
        if !self.scm_update_on_launch {
            return false;
        }
        match self.last_updated {
            Some(last) if self.scm_update_cache_timeout > 0 => {
                now.saturating_sub(last) >= self.scm_update_cache_timeout as i64
            }
            _ => true,
        }
    }
}

impl Document for Project {
    fn collection(&self) -> Collection {
        Collection::Projects
    }

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

#[cfg(test)]
pub(crate) fn sample_project(id: &str, scm_type: ScmType) -> Project {
    Project {
        id: ProjectId::parse(id).expect("project id"),
        name: format!("project {id}"),
        description: String::new(),
        scm_type,
        organization_id: None,
        scm_url: "https://git.example.com/ops/site.git".to_string(),
        scm_branch: String::new(),
        scm_clean: false,
        scm_delete_on_update: false,
        scm_credential_id: None,
        scm_update_on_launch: false,
        scm_update_cache_timeout: 0,
        last_updated: None,
        last_update_failed: false,
        last_job_run: None,
        last_job_failed: false,
        status: None,
        roles: Vec::new(),
        created_by: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkout_forces_sync_for_scm_projects() {
        let project = sample_project("p1", ScmType::Git);
        assert!(project.needs_sync(false, 100));
        assert!(!project.needs_sync(true, 100));
    }

    #[test]
    fn manual_projects_never_sync() {
        let mut project = sample_project("p1", ScmType::Manual);
        project.scm_update_on_launch = true;
        assert!(!project.needs_sync(false, 100));
    }

    #[test]
    fn update_on_launch_respects_cache_timeout() {
        let mut project = sample_project("p1", ScmType::Git);
        project.scm_update_on_launch = true;
        assert!(project.needs_sync(true, 100));

        project.last_updated = Some(1_000);
        project.scm_update_cache_timeout = 60;
        assert!(!project.needs_sync(true, 1_030));
        assert!(project.needs_sync(true, 1_060));

        project.scm_update_cache_timeout = 0;
        assert!(project.needs_sync(true, 1_001));
    }
}
