use super::{workspace_err, ExecError, Invocation};
use crate::shared::fs_atomic::create_dir_with_mode;
use std::path::Path;

/// Runs `invocation` under `proot` so it sees a private `/tmp` backed by
/// the job's transient directory.
pub fn wrap_in_proot(
    proot: &str,
    transient: &Path,
    checkout: &Path,
    invocation: Invocation,
) -> Result<Invocation, ExecError> {
    let private_tmp = transient.join("tmp");
    create_dir_with_mode(&private_tmp, 0o700).map_err(|err| workspace_err(&private_tmp, err))?;

    let mut args = vec![
        "-v".to_string(),
        "0".to_string(),
        "-r".to_string(),
        "/".to_string(),
        "-b".to_string(),
        format!("{}:/tmp", private_tmp.display()),
        "-w".to_string(),
        checkout.display().to_string(),
        invocation.program,
    ];
    args.extend(invocation.args);
    Ok(Invocation {
        program: proot.to_string(),
        args,
        hidden_args: invocation.hidden_args,
        tail_args: invocation.tail_args,
        success_codes: invocation.success_codes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wrapped_invocation_keeps_secret_args_hidden() {
        let dir = tempdir().expect("tempdir");
        let mut inner = Invocation::new("ansible-playbook");
        inner.args = vec!["-i".to_string(), "inv".to_string()];
        inner.hidden_args = vec!["-e".to_string(), "secret".to_string()];
        inner.tail_args = vec!["site.yml".to_string()];

        let wrapped =
            wrap_in_proot("/usr/bin/proot", dir.path(), Path::new("/srv/p1"), inner).expect("wrap");
        assert_eq!(wrapped.program, "/usr/bin/proot");
        assert!(dir.path().join("tmp").is_dir());
        let recorded = wrapped.recorded();
        assert_eq!(recorded[recorded.len() - 4..], ["ansible-playbook", "-i", "inv", "site.yml"]);
        assert!(!recorded.contains(&"secret".to_string()));
        assert!(wrapped.argv().contains(&"secret".to_string()));
    }
}
