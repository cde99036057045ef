use crate::app::command_support::{ensure_runtime_root, parse_flags};
use crate::config::{save_settings, Settings};
use crate::shared::ids::generate_token;
use std::path::{Path, PathBuf};

const INIT_USAGE: &str =
    "tensord init --projects-home <path> [--secret-key <key>] [--force]";

/// Writes `<state_root>/config.yaml`. Without `--secret-key` a random key is
/// generated; it is never echoed back.
pub fn cmd_init(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &["projects-home", "secret-key"], &["force"])?;
    let projects_home = PathBuf::from(parsed.required_value("projects-home", INIT_USAGE)?);
    let paths = ensure_runtime_root(root)?;
    let config_path = paths.settings_file();
    if config_path.exists() && !parsed.switch("force") {
        return Err(format!(
            "config already exists at {}; pass --force to overwrite",
            config_path.display()
        ));
    }

    let (secret_key, key_source) = match parsed.value("secret-key") {
        Some(key) => (key.to_string(), "provided"),
        None => (
            generate_token().map_err(|e| format!("failed to generate secret key: {e}"))?,
            "generated",
        ),
    };
    let settings = Settings::new(projects_home, secret_key);
    save_settings(&config_path, &settings).map_err(|e| e.to_string())?;

    Ok(format!(
        "initialized\nconfig={}\nprojects_home={}\nsecret_key={key_source}",
        config_path.display(),
        settings.projects_home.display()
    ))
}
