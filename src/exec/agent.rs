use super::interpreter::AgentKey;
use super::{workspace_err, ExecError};
use crate::shared::fs_atomic::write_private_file;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$TENSOR_KEY_PASSPHRASE\"\n";

/// A job-scoped `ssh-agent` listening on a socket inside the job's
/// transient directory. Dropping it kills the agent and removes the socket.
pub struct SshAgent {
    child: Child,
    socket: PathBuf,
    dir: PathBuf,
}

impl SshAgent {
    pub fn start(binary: &str, dir: &Path, timeout: Duration) -> Result<Self, ExecError> {
        let socket = dir.join("agent.sock");
        let child = Command::new(binary)
            .arg("-D")
            .arg("-a")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ExecError::AgentStart {
                binary: binary.to_string(),
                reason: err.to_string(),
            })?;
        let mut agent = Self {
            child,
            socket,
            dir: dir.to_path_buf(),
        };

        let started = Instant::now();
        while !agent.socket.exists() {
            if let Ok(Some(status)) = agent.child.try_wait() {
                return Err(ExecError::AgentStart {
                    binary: binary.to_string(),
                    reason: format!("exited early with {status}"),
                });
            }
            if started.elapsed() > timeout {
                return Err(ExecError::AgentStart {
                    binary: binary.to_string(),
                    reason: format!("socket not ready after {}ms", timeout.as_millis()),
                });
            }
            thread::sleep(Duration::from_millis(20));
        }
        Ok(agent)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Feeds the key to `ssh-add -` over stdin; an unlock phrase is answered
    /// by an askpass helper reading it from the environment.
    pub fn add_key(&self, ssh_add: &str, key: &AgentKey) -> Result<(), ExecError> {
        let mut command = Command::new(ssh_add);
        command
            .arg("-")
            .env_clear()
            .env("PATH", "/bin:/usr/bin")
            .env("SSH_AUTH_SOCK", &self.socket)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(passphrase) = &key.passphrase {
            let askpass = self.dir.join("askpass.sh");
            if !askpass.exists() {
                write_askpass(&askpass)?;
            }
            command
                .env("SSH_ASKPASS", &askpass)
                .env("SSH_ASKPASS_REQUIRE", "force")
                .env("DISPLAY", ":0")
                .env("TENSOR_KEY_PASSPHRASE", passphrase);
        }

        let key_load_err = |reason: String| ExecError::KeyLoad {
            credential_id: key.credential_id.clone(),
            reason,
        };
        let mut child = command.spawn().map_err(|err| key_load_err(err.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            let mut material = key.key.clone();
            if !material.ends_with('\n') {
                material.push('\n');
            }
            stdin
                .write_all(material.as_bytes())
                .map_err(|err| key_load_err(err.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| key_load_err(err.to_string()))?;
        if !output.status.success() {
            return Err(key_load_err(format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for SshAgent {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = fs::remove_file(&self.socket);
        let _ = fs::remove_file(self.dir.join("askpass.sh"));
    }
}

fn write_askpass(path: &Path) -> Result<(), ExecError> {
    write_private_file(path, ASKPASS_SCRIPT.as_bytes()).map_err(|err| workspace_err(path, err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(|err| workspace_err(path, err))?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, body).expect("write script");
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    #[test]
    fn agent_starts_loads_keys_and_cleans_up() {
        let dir = tempdir().expect("tempdir");
        let bin = dir.path().join("bin");
        let job_dir = dir.path().join("job");
        fs::create_dir_all(&bin).expect("bin");
        fs::create_dir_all(&job_dir).expect("job dir");
        let agent_bin = bin.join("ssh-agent");
        let add_bin = bin.join("ssh-add");
        let captured = dir.path().join("captured");
        write_script(&agent_bin, "#!/bin/sh\ntouch \"$3\"\nexec sleep 30\n");
        write_script(
            &add_bin,
            &format!(
                "#!/bin/sh\ncat > {}\n\"$SSH_ASKPASS\" >> {}\n",
                captured.display(),
                captured.display()
            ),
        );

        let socket;
        {
            let agent = SshAgent::start(
                agent_bin.to_str().expect("utf8"),
                &job_dir,
                Duration::from_secs(5),
            )
            .expect("agent starts");
            socket = agent.socket().to_path_buf();
            assert!(socket.exists());
            assert!(agent.pid() > 0);

            agent
                .add_key(
                    add_bin.to_str().expect("utf8"),
                    &AgentKey {
                        credential_id: "c1".to_string(),
                        key: "-----BEGIN KEY-----".to_string(),
                        passphrase: Some("unlock-me".to_string()),
                    },
                )
                .expect("key loads");
        }

        let captured = fs::read_to_string(&captured).expect("captured");
        assert_eq!(captured, "-----BEGIN KEY-----\nunlock-me\n");
        assert!(!socket.exists());
        assert!(!job_dir.join("askpass.sh").exists());
    }

    #[test]
    fn agent_that_exits_early_is_reported() {
        let dir = tempdir().expect("tempdir");
        let agent_bin = dir.path().join("ssh-agent");
        write_script(&agent_bin, "#!/bin/sh\nexit 1\n");
        let err = SshAgent::start(
            agent_bin.to_str().expect("utf8"),
            dir.path(),
            Duration::from_secs(2),
        )
        .err()
        .expect("start fails");
        assert!(matches!(err, ExecError::AgentStart { .. }));
    }
}
