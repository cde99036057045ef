//! Handles built once at process start and passed to every component.

use crate::config::{load_settings, ConfigError, Settings};
use crate::crypt::{CipherError, SecretCipher};
use crate::rbac::{AccessResolver, StoreDirectory};
use crate::runtime::{append_runtime_log, bootstrap_state_root, RuntimeError, StatePaths};
use crate::shared::logging::append_json_log;
use crate::store::{DocumentStore, SqliteStore, StoreError};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("secret key unusable: {0}")]
    Cipher(#[from] CipherError),
}

#[derive(Clone)]
pub struct Context {
    pub paths: StatePaths,
    pub settings: Arc<Settings>,
    pub store: Arc<dyn DocumentStore>,
    pub cipher: SecretCipher,
}

impl Context {
    pub fn new(
        paths: StatePaths,
        settings: Settings,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ContextError> {
        let cipher = SecretCipher::from_passphrase(&settings.secret_key)?;
        Ok(Self {
            paths,
            settings: Arc::new(settings),
            store,
            cipher,
        })
    }

    /// Loads `<state_root>/config.yaml` and opens the SQLite store.
    pub fn open(state_root: &Path) -> Result<Self, ContextError> {
        let paths = StatePaths::new(state_root);
        bootstrap_state_root(&paths)?;
        let settings = load_settings(&paths.settings_file())?;
        let store = SqliteStore::open(&paths.store_path(), settings.store_busy_timeout())?;
        Self::new(paths, settings, Arc::new(store))
    }

    pub fn directory(&self) -> StoreDirectory<'_> {
        StoreDirectory::new(self.store.as_ref())
    }

    pub fn resolver<'a>(&self, directory: &'a StoreDirectory<'a>) -> AccessResolver<'a, StoreDirectory<'a>> {
        AccessResolver::new(directory).with_audit_log(self.paths.security_log_path())
    }

    pub fn log_job(&self, level: &str, event: &str, fields: &[(&str, Value)]) {
        append_json_log(&self.paths.jobs_log_path(), level, event, fields);
    }

    pub fn log_runtime(&self, level: &str, event: &str, fields: &[(&str, Value)]) {
        append_runtime_log(&self.paths, level, event, fields);
    }
}
