use std::fs;
use std::path::{Path, PathBuf};

/// Routing is a pure function of the template type that produced a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Ansible,
    Terraform,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Ansible, Topic::Terraform];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ansible => "ansible",
            Self::Terraform => "terraform",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    pub topic: Topic,
    pub incoming: PathBuf,
    pub processing: PathBuf,
    pub rejected: PathBuf,
    pub security_log: PathBuf,
}

impl QueuePaths {
    pub fn for_topic(state_root: &Path, topic: Topic) -> Self {
        let base = state_root.join("queue").join(topic.as_str());
        Self {
            topic,
            incoming: base.join("incoming"),
            processing: base.join("processing"),
            rejected: base.join("rejected"),
            security_log: state_root.join("logs/security.log"),
        }
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.incoming, &self.processing, &self.rejected] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Millisecond prefix keeps names unique per job and roughly ordered.
pub fn unit_filename(job_id: &str, enqueued_at_ms: i64) -> String {
    format!("{enqueued_at_ms}_{}.json", sanitize_filename_component(job_id))
}

pub fn is_valid_queue_json_filename(filename: &str) -> bool {
    if filename.starts_with('.') {
        return false;
    }
    let path = Path::new(filename);
    if path.extension().and_then(|v| v.to_str()) != Some("json") {
        return false;
    }

    if let Some(stem) = path.file_stem().and_then(|v| v.to_str()) {
        return !stem.trim().is_empty();
    }

    false
}

fn sanitize_filename_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
