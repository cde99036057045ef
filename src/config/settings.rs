use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub projects_home: PathBuf,
    pub secret_key: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub plugins: PluginPaths,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub workers: WorkerCounts,
    #[serde(default)]
    pub binaries: Binaries,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginPaths {
    #[serde(default = "default_inventory_script")]
    pub inventory_script: PathBuf,
    #[serde(default = "default_callback_dir")]
    pub callback_dir: PathBuf,
    #[serde(default = "default_sync_playbook")]
    pub sync_playbook: PathBuf,
}

impl Default for PluginPaths {
    fn default() -> Self {
        Self {
            inventory_script: default_inventory_script(),
            callback_dir: default_callback_dir(),
            sync_playbook: default_sync_playbook(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    #[serde(default = "default_job_seconds")]
    pub ansible_job_seconds: u64,
    #[serde(default = "default_sync_seconds")]
    pub sync_job_seconds: u64,
    #[serde(default = "default_job_seconds")]
    pub terraform_job_seconds: u64,
    #[serde(default = "default_job_seconds")]
    pub previous_job_wait_seconds: u64,
    #[serde(default = "default_previous_job_poll_ms")]
    pub previous_job_poll_ms: u64,
    #[serde(default = "default_store_busy_ms")]
    pub store_busy_ms: u64,
    #[serde(default = "default_agent_start_ms")]
    pub agent_start_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ansible_job_seconds: default_job_seconds(),
            sync_job_seconds: default_sync_seconds(),
            terraform_job_seconds: default_job_seconds(),
            previous_job_wait_seconds: default_job_seconds(),
            previous_job_poll_ms: default_previous_job_poll_ms(),
            store_busy_ms: default_store_busy_ms(),
            agent_start_ms: default_agent_start_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerCounts {
    #[serde(default = "default_ansible_workers")]
    pub ansible: usize,
    #[serde(default = "default_terraform_workers")]
    pub terraform: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            ansible: default_ansible_workers(),
            terraform: default_terraform_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Binaries {
    #[serde(default = "default_ansible_playbook")]
    pub ansible_playbook: String,
    #[serde(default = "default_terraform")]
    pub terraform: String,
    #[serde(default = "default_ssh_agent")]
    pub ssh_agent: String,
    #[serde(default = "default_ssh_add")]
    pub ssh_add: String,
    #[serde(default)]
    pub proot: Option<String>,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            ansible_playbook: default_ansible_playbook(),
            terraform: default_terraform(),
            ssh_agent: default_ssh_agent(),
            ssh_add: default_ssh_add(),
            proot: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    #[serde(default = "default_stale_new_after_seconds")]
    pub stale_new_after_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stale_new_after_seconds: default_stale_new_after_seconds(),
            interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_poll_ms")]
    pub poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_queue_poll_ms(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8010".to_string()
}

fn default_inventory_script() -> PathBuf {
    PathBuf::from("/var/lib/tensor/plugins/inventory/tensorrest.py")
}

fn default_callback_dir() -> PathBuf {
    PathBuf::from("/var/lib/tensor/plugins/callback")
}

fn default_sync_playbook() -> PathBuf {
    PathBuf::from("/var/lib/tensor/playbooks/project_update.yml")
}

fn default_job_seconds() -> u64 {
    3600
}

fn default_sync_seconds() -> u64 {
    900
}

fn default_previous_job_poll_ms() -> u64 {
    2000
}

fn default_store_busy_ms() -> u64 {
    5000
}

fn default_agent_start_ms() -> u64 {
    5000
}

fn default_ansible_workers() -> usize {
    2
}

fn default_terraform_workers() -> usize {
    1
}

fn default_ansible_playbook() -> String {
    "ansible-playbook".to_string()
}

fn default_terraform() -> String {
    "terraform".to_string()
}

fn default_ssh_agent() -> String {
    "ssh-agent".to_string()
}

fn default_ssh_add() -> String {
    "ssh-add".to_string()
}

fn default_stale_new_after_seconds() -> u64 {
    900
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_queue_poll_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    pub require_projects_home_exists: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            require_projects_home_exists: true,
        }
    }
}

impl Settings {
    /// Settings with every optional section at its default.
    pub fn new(projects_home: PathBuf, secret_key: String) -> Self {
        Self {
            projects_home,
            secret_key,
            api_url: default_api_url(),
            plugins: PluginPaths::default(),
            timeouts: Timeouts::default(),
            workers: WorkerCounts::default(),
            binaries: Binaries::default(),
            sweep: SweepConfig::default(),
            queue: QueueConfig::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self, options: ValidationOptions) -> Result<(), ConfigError> {
        if !self.projects_home.is_absolute() {
            return Err(ConfigError::Settings(
                "`projects_home` must be an absolute path".to_string(),
            ));
        }
        if options.require_projects_home_exists && !self.projects_home.is_dir() {
            return Err(ConfigError::Settings(format!(
                "`projects_home` `{}` is missing or not a directory",
                self.projects_home.display()
            )));
        }
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`secret_key` must be non-empty".to_string(),
            ));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Settings(
                "`api_url` must be an http(s) url".to_string(),
            ));
        }

        for (field, value) in [
            ("timeouts.ansible_job_seconds", self.timeouts.ansible_job_seconds),
            ("timeouts.sync_job_seconds", self.timeouts.sync_job_seconds),
            (
                "timeouts.terraform_job_seconds",
                self.timeouts.terraform_job_seconds,
            ),
            (
                "timeouts.previous_job_wait_seconds",
                self.timeouts.previous_job_wait_seconds,
            ),
            ("timeouts.previous_job_poll_ms", self.timeouts.previous_job_poll_ms),
            ("timeouts.store_busy_ms", self.timeouts.store_busy_ms),
            ("timeouts.agent_start_ms", self.timeouts.agent_start_ms),
            ("sweep.interval_seconds", self.sweep.interval_seconds),
            ("queue.poll_ms", self.queue.poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Settings(format!("`{field}` must be > 0")));
            }
        }

        if self.workers.ansible == 0 {
            return Err(ConfigError::Settings(
                "`workers.ansible` must be >= 1".to_string(),
            ));
        }
        if self.workers.terraform == 0 {
            return Err(ConfigError::Settings(
                "`workers.terraform` must be >= 1".to_string(),
            ));
        }

        for (field, value) in [
            ("binaries.ansible_playbook", &self.binaries.ansible_playbook),
            ("binaries.terraform", &self.binaries.terraform),
            ("binaries.ssh_agent", &self.binaries.ssh_agent),
            ("binaries.ssh_add", &self.binaries.ssh_add),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Settings(format!("`{field}` must be non-empty")));
            }
        }
        if let Some(proot) = &self.binaries.proot {
            if proot.trim().is_empty() {
                return Err(ConfigError::Settings(
                    "`binaries.proot` must be non-empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn checkout_path(&self, project_id: &str) -> PathBuf {
        self.projects_home.join(project_id)
    }

    pub fn ansible_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.ansible_job_seconds)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.sync_job_seconds)
    }

    pub fn terraform_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.terraform_job_seconds)
    }

    pub fn previous_job_wait(&self) -> Duration {
        Duration::from_secs(self.timeouts.previous_job_wait_seconds)
    }

    pub fn previous_job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.previous_job_poll_ms)
    }

    pub fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.store_busy_ms)
    }

    pub fn agent_start_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.agent_start_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_ms)
    }
}
