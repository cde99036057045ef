#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Init,
    Start,
    Stop,
    Status,
    Supervise,
    Launch,
    LaunchInfo,
    UpdateProject,
    Cancel,
    Sweep,
    Put,
    Get,
    Encrypt,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "init" => CliVerb::Init,
        "start" => CliVerb::Start,
        "stop" => CliVerb::Stop,
        "status" => CliVerb::Status,
        "supervise" => CliVerb::Supervise,
        "launch" => CliVerb::Launch,
        "launch-info" => CliVerb::LaunchInfo,
        "update-project" => CliVerb::UpdateProject,
        "cancel" => CliVerb::Cancel,
        "sweep" => CliVerb::Sweep,
        "put" => CliVerb::Put,
        "get" => CliVerb::Get,
        "encrypt" => CliVerb::Encrypt,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Usage: tensord [--state-root <path>] <command> [args]".to_string(),
        String::new(),
        "Commands:".to_string(),
        "  init --projects-home <path> [--secret-key <key>] [--force]".to_string(),
        "                                            Write config.yaml for the state root"
            .to_string(),
        "  start                                     Start the supervisor in the background"
            .to_string(),
        "  stop                                      Stop the active supervisor".to_string(),
        "  status                                    Show supervisor ownership and worker health"
            .to_string(),
        "  supervise                                 Run the supervisor in the foreground"
            .to_string(),
        "  launch <template> --user <id> [--terraform] [--overrides <file>]".to_string(),
        "                                            Launch a job from a template".to_string(),
        "  launch-info <template> --user <id> [--terraform]".to_string(),
        "                                            Show what a launch would need".to_string(),
        "  update-project <project> --user <id>      Queue a project update job".to_string(),
        "  cancel <job>                              Cancel a job".to_string(),
        "  sweep [--older-than <secs>] [--apply]     List or fail jobs stuck in `new`"
            .to_string(),
        "  put <collection> <file>                   Store a JSON document".to_string(),
        "  get <collection> <id>                     Print a stored document".to_string(),
        "  encrypt <plaintext>                       Encrypt a value with the secret key"
            .to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
