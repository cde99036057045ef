use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Appends one JSON object per line; logging never fails the caller.
pub fn append_json_log(path: &Path, level: &str, event: &str, fields: &[(&str, Value)]) {
    let mut payload = Map::new();
    payload.insert(
        "timestamp".to_string(),
        Value::from(super::time::now_secs()),
    );
    payload.insert("level".to_string(), Value::String(level.to_string()));
    payload.insert("event".to_string(), Value::String(event.to_string()));
    for (key, value) in fields {
        payload.insert((*key).to_string(), value.clone());
    }

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

pub fn mask(value: &str) -> String {
    "*".repeat(value.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_json_log_writes_one_object_per_line() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("logs/jobs.log");
        append_json_log(&path, "info", "job.started", &[("job_id", Value::from("j1"))]);
        append_json_log(&path, "warn", "job.failed", &[]);

        let raw = fs::read_to_string(&path).expect("read log");
        let lines: Vec<Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "job.started");
        assert_eq!(lines[0]["job_id"], "j1");
        assert_eq!(lines[1]["level"], "warn");
    }

    #[test]
    fn mask_preserves_length() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask(""), "");
    }
}
