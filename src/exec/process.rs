use super::{ExecError, Invocation};
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const WAIT_STEP: Duration = Duration::from_millis(50);
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(Option<i32>),
    TimedOut,
    Canceled,
}

/// Runs `invocation` in its own process group with stdout and stderr both
/// appended to `output`, in the order they were produced. The group is
/// killed when `deadline` passes or `cancel_requested` reports true.
pub fn run_supervised(
    invocation: &Invocation,
    env: &[(String, String)],
    cwd: &Path,
    output: &Path,
    deadline: Instant,
    cancel_requested: &mut dyn FnMut() -> bool,
) -> Result<ProcessExit, ExecError> {
    let stdout = File::options()
        .create(true)
        .append(true)
        .open(output)
        .map_err(|source| super::workspace_err(output, source))?;
    let stderr = stdout
        .try_clone()
        .map_err(|source| super::workspace_err(output, source))?;

    let mut command = Command::new(&invocation.program);
    command
        .args(invocation.argv())
        .current_dir(cwd)
        .env_clear()
        .envs(env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;

    let mut last_cancel_check = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(ProcessExit::Exited(status.code())),
            Ok(None) => {
                if Instant::now() >= deadline {
                    kill_group(&mut child);
                    return Ok(ProcessExit::TimedOut);
                }
                if last_cancel_check.elapsed() >= CANCEL_CHECK_INTERVAL {
                    last_cancel_check = Instant::now();
                    if cancel_requested() {
                        kill_group(&mut child);
                        return Ok(ProcessExit::Canceled);
                    }
                }
                thread::sleep(WAIT_STEP);
            }
            Err(source) => {
                kill_group(&mut child);
                return Err(ExecError::Wait {
                    program: invocation.program.clone(),
                    source,
                });
            }
        }
    }
}

/// SIGKILL to the whole group, so interpreter children go with it.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", child.id()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sh(script: &str) -> Invocation {
        let mut invocation = Invocation::new("/bin/sh");
        invocation.args = vec!["-c".to_string(), script.to_string()];
        invocation
    }

    fn path_env() -> Vec<(String, String)> {
        vec![("PATH".to_string(), "/bin:/usr/bin".to_string())]
    }

    #[test]
    fn captures_interleaved_output_and_exit_code() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out.log");
        let exit = run_supervised(
            &sh("echo one; echo two >&2; echo three; exit 3"),
            &path_env(),
            dir.path(),
            &output,
            Instant::now() + Duration::from_secs(10),
            &mut || false,
        )
        .expect("run");

        assert_eq!(exit, ProcessExit::Exited(Some(3)));
        assert_eq!(fs::read_to_string(&output).expect("read"), "one\ntwo\nthree\n");
    }

    #[test]
    fn deadline_kills_the_process_group_and_keeps_partial_output() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out.log");
        let started = Instant::now();
        let exit = run_supervised(
            &sh("echo partial; sleep 30 & wait"),
            &path_env(),
            dir.path(),
            &output,
            Instant::now() + Duration::from_millis(500),
            &mut || false,
        )
        .expect("run");

        assert_eq!(exit, ProcessExit::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(fs::read_to_string(&output).expect("read"), "partial\n");
    }

    #[test]
    fn cancel_flag_stops_the_process() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out.log");
        let exit = run_supervised(
            &sh("sleep 30"),
            &path_env(),
            dir.path(),
            &output,
            Instant::now() + Duration::from_secs(60),
            &mut || true,
        )
        .expect("run");
        assert_eq!(exit, ProcessExit::Canceled);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let dir = tempdir().expect("tempdir");
        let err = run_supervised(
            &Invocation::new("/nonexistent/ansible-playbook"),
            &path_env(),
            dir.path(),
            &dir.path().join("out.log"),
            Instant::now() + Duration::from_secs(5),
            &mut || false,
        )
        .expect_err("spawn fails");
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
