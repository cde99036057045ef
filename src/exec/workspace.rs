use super::{workspace_err, ExecError};
use crate::shared::fs_atomic::create_dir_with_mode;
use std::fs;
use std::path::{Path, PathBuf};

/// The project checkout plus a per-job private directory for sockets, key
/// files and captured output. The private directory is removed on drop.
pub struct Workspace {
    pub checkout: PathBuf,
    pub transient: PathBuf,
}

impl Workspace {
    pub fn prepare(checkout: &Path, jobs_dir: &Path, job_id: &str) -> Result<Self, ExecError> {
        if !checkout.is_dir() {
            create_dir_with_mode(checkout, 0o770).map_err(|err| workspace_err(checkout, err))?;
        }

        let transient = jobs_dir.join(job_id);
        // Left over from an interrupted delivery of the same job.
        if transient.exists() {
            fs::remove_dir_all(&transient).map_err(|err| workspace_err(&transient, err))?;
        }
        create_dir_with_mode(&transient, 0o700).map_err(|err| workspace_err(&transient, err))?;

        Ok(Self {
            checkout: checkout.to_path_buf(),
            transient,
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.transient.join("output.log")
    }

    pub fn read_output(&self) -> String {
        fs::read(self.output_path())
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .unwrap_or_default()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.transient);
    }
}
