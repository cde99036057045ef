use super::{is_valid_queue_json_filename, unit_filename, JobUnit, QueueError, QueuePaths};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::logging::append_json_log;
use crate::shared::time::now_millis;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct ClaimedUnit {
    pub processing_path: PathBuf,
    pub unit: JobUnit,
}

pub fn enqueue(paths: &QueuePaths, unit: &JobUnit) -> Result<PathBuf, QueueError> {
    paths.ensure().map_err(|e| io_err(&paths.incoming, e))?;
    let job_id = unit.job().id.as_str();
    let body = serde_json::to_vec(unit).map_err(|source| QueueError::Encode {
        job_id: job_id.to_string(),
        source,
    })?;
    let path = paths.incoming.join(unit_filename(job_id, next_enqueue_stamp()));
    atomic_write_file(&path, &body).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

pub fn claim_oldest(paths: &QueuePaths) -> Result<Option<ClaimedUnit>, QueueError> {
    paths.ensure().map_err(|e| io_err(&paths.incoming, e))?;
    for incoming_path in sorted_incoming_paths(&paths.incoming)? {
        let Some(file_name) = incoming_path.file_name() else {
            continue;
        };
        let processing_path = paths.processing.join(file_name);

        match fs::rename(&incoming_path, &processing_path) {
            Ok(_) => {
                let raw = match fs::read(&processing_path) {
                    Ok(raw) => raw,
                    Err(err) => {
                        requeue_processing_file(paths, &processing_path)?;
                        return Err(io_err(&processing_path, err));
                    }
                };
                match serde_json::from_slice::<JobUnit>(&raw) {
                    Ok(unit) => {
                        return Ok(Some(ClaimedUnit {
                            processing_path,
                            unit,
                        }))
                    }
                    Err(err) => {
                        reject_processing_file(paths, &processing_path, &err)?;
                        continue;
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&incoming_path, err)),
        }
    }

    Ok(None)
}

pub fn ack(claimed: &ClaimedUnit) -> Result<(), QueueError> {
    match fs::remove_file(&claimed.processing_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&claimed.processing_path, err)),
    }
}

pub fn requeue_failure(paths: &QueuePaths, claimed: &ClaimedUnit) -> Result<PathBuf, QueueError> {
    requeue_processing_file(paths, &claimed.processing_path)
}

/// Ids of the jobs whose units are still waiting in `incoming` or held in
/// `processing`. Files claimed or acked while the scan runs are skipped, as
/// are payloads without a readable `job.id`.
pub fn queued_job_ids(paths: &QueuePaths) -> Result<BTreeSet<String>, QueueError> {
    let mut ids = BTreeSet::new();
    for dir in [&paths.incoming, &paths.processing] {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(dir, err)),
        };
        for entry in entries {
            let path = entry.map_err(|e| io_err(dir, e))?.path();
            let is_unit = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_valid_queue_json_filename);
            if !is_unit {
                continue;
            }
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&path, err)),
            };
            let job_id = serde_json::from_slice::<Value>(&raw)
                .ok()
                .and_then(|unit| unit.pointer("/job/id").and_then(Value::as_str).map(str::to_string));
            if let Some(job_id) = job_id {
                ids.insert(job_id);
            }
        }
    }
    Ok(ids)
}

fn reject_processing_file(
    paths: &QueuePaths,
    processing_path: &Path,
    cause: &serde_json::Error,
) -> Result<(), QueueError> {
    let file_name = processing_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unit.json".to_string());
    let target = paths.rejected.join(&file_name);
    fs::rename(processing_path, &target).map_err(|e| io_err(processing_path, e))?;
    // The payload itself may hold ciphertext; only its location is logged.
    append_json_log(
        &paths.security_log,
        "warn",
        "queue.payload_rejected",
        &[
            ("topic", Value::from(paths.topic.as_str())),
            ("file", Value::from(file_name)),
            ("line", Value::from(cause.line())),
            ("column", Value::from(cause.column())),
        ],
    );
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn sorted_incoming_paths(incoming_dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(incoming_dir).map_err(|e| io_err(incoming_dir, e))? {
        let entry = entry.map_err(|e| io_err(incoming_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_valid_queue_json_filename(name) {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| io_err(&path, e))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, path));
    }

    entries.sort_by(|(a_time, a_path), (b_time, b_path)| {
        a_time
            .cmp(b_time)
            .then_with(|| a_path.file_name().cmp(&b_path.file_name()))
    });

    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

static LAST_ENQUEUE_STAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock millis, bumped so units enqueued back to back by this
/// process sort in enqueue order even when their mtimes tie.
fn next_enqueue_stamp() -> i64 {
    let now = now_millis();
    let previous = LAST_ENQUEUE_STAMP
        .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

static REQUEUE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_requeue_name(original_name: &str) -> String {
    let path = Path::new(original_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("unit");
    let counter = REQUEUE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    format!("{stem}_requeue_{counter}.json")
}

fn requeue_processing_file(
    paths: &QueuePaths,
    processing_path: &Path,
) -> Result<PathBuf, QueueError> {
    let file_name = processing_path.file_name().ok_or_else(|| {
        io_err(
            processing_path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "processing file missing name",
            ),
        )
    })?;
    let file_name = file_name.to_string_lossy();
    let incoming = paths.incoming.join(unique_requeue_name(&file_name));
    fs::rename(processing_path, &incoming).map_err(|e| io_err(processing_path, e))?;
    Ok(incoming)
}
