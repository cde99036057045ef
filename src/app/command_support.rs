use crate::config::default_state_root_path;
use crate::context::Context;
use crate::runtime::{bootstrap_state_root, StatePaths};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments after the global options have been stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub state_root: PathBuf,
    pub args: Vec<String>,
}

/// Pulls `--state-root <path>` out of `args`, wherever it appears.
pub fn split_global_options(args: Vec<String>) -> Result<Invocation, String> {
    let mut state_root = None;
    let mut rest = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--state-root" {
            let value = iter
                .next()
                .ok_or_else(|| "--state-root requires a path".to_string())?;
            state_root = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--state-root=") {
            state_root = Some(PathBuf::from(value));
        } else {
            rest.push(arg);
        }
    }
    let state_root = match state_root {
        Some(root) => root,
        None => default_state_root_path().map_err(|e| e.to_string())?,
    };
    Ok(Invocation {
        state_root,
        args: rest,
    })
}

pub fn ensure_runtime_root(root: &Path) -> Result<StatePaths, String> {
    let paths = StatePaths::new(root);
    bootstrap_state_root(&paths).map_err(|e| e.to_string())?;
    Ok(paths)
}

pub fn open_context(root: &Path) -> Result<Context, String> {
    Context::open(root).map_err(|e| e.to_string())
}

/// Positional arguments plus `--flag value` and `--switch` options.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    pub positional: Vec<String>,
    pub values: BTreeMap<String, String>,
    pub switches: BTreeSet<String>,
}

impl ParsedArgs {
    pub fn value(&self, flag: &str) -> Option<&str> {
        self.values.get(flag).map(String::as_str)
    }

    pub fn required_value(&self, flag: &str, usage: &str) -> Result<&str, String> {
        self.value(flag)
            .ok_or_else(|| format!("missing --{flag}\nusage: {usage}"))
    }

    pub fn switch(&self, flag: &str) -> bool {
        self.switches.contains(flag)
    }

    pub fn positional(&self, index: usize, usage: &str) -> Result<&str, String> {
        self.positional
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| format!("usage: {usage}"))
    }
}

pub fn parse_flags(
    args: &[String],
    value_flags: &[&str],
    switch_flags: &[&str],
) -> Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let Some(flag) = arg.strip_prefix("--") else {
            parsed.positional.push(arg.clone());
            continue;
        };
        if value_flags.contains(&flag) {
            let value = iter
                .next()
                .ok_or_else(|| format!("--{flag} requires a value"))?;
            parsed.values.insert(flag.to_string(), value.clone());
        } else if switch_flags.contains(&flag) {
            parsed.switches.insert(flag.to_string());
        } else {
            return Err(format!("unknown option `{arg}`"));
        }
    }
    Ok(parsed)
}

pub fn read_file(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))
}

pub fn none_or<T: ToString>(value: Option<T>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn state_root_is_taken_from_any_position() {
        let invocation =
            split_global_options(strings(&["status", "--state-root", "/tmp/t"])).expect("split");
        assert_eq!(invocation.state_root, PathBuf::from("/tmp/t"));
        assert_eq!(invocation.args, ["status"]);

        let invocation =
            split_global_options(strings(&["--state-root=/srv/t", "stop"])).expect("split");
        assert_eq!(invocation.state_root, PathBuf::from("/srv/t"));

        assert!(split_global_options(strings(&["status", "--state-root"])).is_err());
    }

    #[test]
    fn flags_split_into_values_switches_and_positionals() {
        let parsed = parse_flags(
            &strings(&["t1", "--user", "u1", "--terraform"]),
            &["user", "overrides"],
            &["terraform"],
        )
        .expect("parse");
        assert_eq!(parsed.positional, ["t1"]);
        assert_eq!(parsed.value("user"), Some("u1"));
        assert!(parsed.switch("terraform"));
        assert!(parsed.value("overrides").is_none());

        let err = parse_flags(&strings(&["--force"]), &[], &[]).expect_err("unknown flag");
        assert!(err.contains("--force"));
        assert!(parse_flags(&strings(&["--user"]), &["user"], &[]).is_err());
    }
}
