//! Subprocess git plumbing with an isolated environment.

use crate::RepoError;
use std::path::Path;
use std::process::Command;

/// Build a git command rooted at `workdir` with a clean environment:
/// host git config must not leak into control-plane commits.
pub(crate) fn git_cmd(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env_clear();
    for key in ["PATH", "HOME", "SSH_AUTH_SOCK", "GIT_SSH_COMMAND"] {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

/// Run a git subcommand, returning trimmed stdout on success.
pub(crate) fn run_git(workdir: &Path, args: &[&str]) -> Result<String, RepoError> {
    let output = git_cmd(workdir)
        .args(args)
        .output()
        .map_err(|e| RepoError::Spawn(e.to_string()))?;

    if !output.status.success() {
        return Err(RepoError::Git {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// Run a git subcommand where a non-zero exit is an answer, not an error
/// (e.g. `merge-base --is-ancestor`).
pub(crate) fn git_succeeds(workdir: &Path, args: &[&str]) -> Result<bool, RepoError> {
    let status = git_cmd(workdir)
        .args(args)
        .output()
        .map_err(|e| RepoError::Spawn(e.to_string()))?
        .status;
    Ok(status.success())
}
