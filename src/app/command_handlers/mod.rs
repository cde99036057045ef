use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::split_global_options;

pub mod daemon;
pub mod documents;
pub mod jobs;
pub mod setup;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let invocation = split_global_options(args)?;
    let root = invocation.state_root.as_path();
    let Some((verb, rest)) = invocation.args.split_first() else {
        return Ok(help_text());
    };

    match parse_cli_verb(verb.as_str()) {
        CliVerb::Init => setup::cmd_init(root, rest),
        CliVerb::Start => daemon::cmd_start(root),
        CliVerb::Stop => daemon::cmd_stop(root),
        CliVerb::Status => daemon::cmd_status(root),
        CliVerb::Supervise => daemon::cmd_supervise(root),
        CliVerb::Launch => jobs::cmd_launch(root, rest),
        CliVerb::LaunchInfo => jobs::cmd_launch_info(root, rest),
        CliVerb::UpdateProject => jobs::cmd_update_project(root, rest),
        CliVerb::Cancel => jobs::cmd_cancel(root, rest),
        CliVerb::Sweep => jobs::cmd_sweep(root, rest),
        CliVerb::Put => documents::cmd_put(root, rest),
        CliVerb::Get => documents::cmd_get(root, rest),
        CliVerb::Encrypt => documents::cmd_encrypt(root, rest),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{verb}`")),
    }
}
