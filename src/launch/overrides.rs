use crate::models::JobType;
use crate::shared::ids::{CredentialId, InventoryId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Launch-time values. Only fields the template marks as prompted are
/// applied; everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaunchOverrides {
    pub extra_vars: Option<Map<String, Value>>,
    /// Terraform variables; ansible templates use `extra_vars`.
    pub vars: Option<Map<String, Value>>,
    pub limit: Option<String>,
    pub job_tags: Option<String>,
    pub skip_tags: Option<String>,
    pub job_type: Option<JobType>,
    pub inventory_id: Option<InventoryId>,
    pub machine_credential_id: Option<CredentialId>,
    pub network_credential_id: Option<CredentialId>,
    pub cloud_credential_id: Option<CredentialId>,
}

pub(crate) fn required_map(
    field: &'static str,
    value: &Option<Map<String, Value>>,
) -> Result<Map<String, Value>, super::LaunchError> {
    match value {
        Some(map) if !map.is_empty() => Ok(map.clone()),
        _ => Err(super::LaunchError::MissingPromptField { field }),
    }
}

pub(crate) fn required_text(
    field: &'static str,
    value: &Option<String>,
) -> Result<String, super::LaunchError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.clone()),
        _ => Err(super::LaunchError::MissingPromptField { field }),
    }
}

pub(crate) fn required<T: Clone>(
    field: &'static str,
    value: &Option<T>,
) -> Result<T, super::LaunchError> {
    value
        .clone()
        .ok_or(super::LaunchError::MissingPromptField { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_reject_unknown_fields() {
        let err = serde_json::from_str::<LaunchOverrides>(r#"{"playbook":"x.yml"}"#)
            .expect_err("unknown field");
        assert!(err.to_string().contains("playbook"));

        let parsed: LaunchOverrides =
            serde_json::from_str(r#"{"limit":"db*","job_type":"check"}"#).expect("parse");
        assert_eq!(parsed.limit.as_deref(), Some("db*"));
        assert_eq!(parsed.job_type, Some(JobType::Check));
    }

    #[test]
    fn blank_prompted_values_count_as_missing() {
        assert!(required_text("limit", &Some("  ".to_string())).is_err());
        assert!(required_map("extra_vars", &Some(Map::new())).is_err());
        assert_eq!(
            required_text("limit", &Some("web*".to_string())).expect("present"),
            "web*"
        );
    }
}
