use super::StatePaths;
use crate::shared::logging::append_json_log;
use serde_json::Value;

/// Supervisor and worker lifecycle log, `<state_root>/logs/runtime.log`.
pub fn append_runtime_log(paths: &StatePaths, level: &str, event: &str, fields: &[(&str, Value)]) {
    append_json_log(&paths.runtime_log_path(), level, event, fields);
}
