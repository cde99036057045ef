use super::{RuntimeError, StatePaths};
use crate::queue::{is_valid_queue_json_filename, Topic};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Moves every unit left in a `processing` directory back to `incoming`.
///
/// Runs once at supervisor start, before any executor claims work: a unit
/// still in `processing` then belonged to a worker of a previous process
/// that died before acking it.
pub fn recover_processing_units(paths: &StatePaths) -> Result<Vec<PathBuf>, RuntimeError> {
    let mut recovered = Vec::new();
    for topic in Topic::ALL {
        recovered.extend(recover_topic(paths, topic)?);
    }
    Ok(recovered)
}

fn recover_topic(paths: &StatePaths, topic: Topic) -> Result<Vec<PathBuf>, RuntimeError> {
    let queue = paths.queue(topic);
    let read_err = |source| RuntimeError::Recovery {
        path: queue.processing.display().to_string(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(&queue.processing).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let is_unit = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_valid_queue_json_filename);
        if path.is_file() && is_unit {
            entries.push(path);
        }
    }
    entries.sort();

    let mut recovered = Vec::new();
    for (index, processing_path) in entries.into_iter().enumerate() {
        let name = processing_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unit.json");
        let target = queue.incoming.join(recovered_unit_filename(index, name));
        fs::rename(&processing_path, &target).map_err(|source| RuntimeError::Recovery {
            path: processing_path.display().to_string(),
            source,
        })?;
        recovered.push(target);
    }
    Ok(recovered)
}

/// Keeps the original millisecond prefix of the enqueue time.
pub(crate) fn recovered_unit_filename(index: usize, name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("unit");
    let prefix = stem.split('_').next().unwrap_or("0");
    let digest = Sha256::digest(name.as_bytes());
    let hash = digest[..8]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("{prefix}_recovered_{index}_{hash}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bootstrap_state_root;
    use tempfile::tempdir;

    #[test]
    fn processing_units_of_every_topic_return_to_incoming() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        bootstrap_state_root(&paths).expect("bootstrap");

        let ansible = paths.queue(Topic::Ansible);
        let terraform = paths.queue(Topic::Terraform);
        fs::write(ansible.processing.join("100_j1.json"), "{}").expect("write");
        fs::write(terraform.processing.join("200_j2.json"), "{}").expect("write");
        fs::write(terraform.processing.join(".200_j2.json.tmp"), "{}").expect("write");

        let recovered = recover_processing_units(&paths).expect("recover");
        assert_eq!(recovered.len(), 2);
        assert!(recovered
            .iter()
            .all(|path| path.parent() == Some(ansible.incoming.as_path())
                || path.parent() == Some(terraform.incoming.as_path())));
        assert_eq!(
            fs::read_dir(&ansible.processing).expect("read").count(),
            0
        );
        assert!(terraform.processing.join(".200_j2.json.tmp").exists());
    }

    #[test]
    fn recovered_names_keep_their_timestamp_prefix() {
        let name = recovered_unit_filename(3, "1700000000000_j1.json");
        assert!(name.starts_with("1700000000000_recovered_3_"));
        assert!(name.ends_with(".json"));
        assert!(is_valid_queue_json_filename(&name));
    }
}
