use super::{ConfigError, Settings, ValidationOptions};
use crate::shared::fs_atomic::atomic_write_file;
use std::fs;
use std::path::Path;

pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    settings.validate(ValidationOptions {
        require_projects_home_exists: false,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let body = serde_yaml::to_string(settings).map_err(|source| ConfigError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(path, body.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}
