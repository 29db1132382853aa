//! EP-031: Local process execution.

use super::ExecOutput;
use std::path::Path;
use std::process::{Command, Stdio};

/// Run `argv[0]` with the remaining arguments in `cwd`, capturing output.
pub fn exec_command(argv: &[String], cwd: &Path) -> Result<ExecOutput, String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "empty command line".to_string())?;

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Clone `https://<repo>` into `dest`.
pub fn git_clone(repo: &str, dest: &Path) -> Result<ExecOutput, String> {
    let parent = dest
        .parent()
        .ok_or_else(|| format!("no parent directory for {}", dest.display()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    let argv = vec![
        "git".to_string(),
        "clone".to_string(),
        format!("https://{}", repo),
        dest.display().to_string(),
    ];
    exec_command(&argv, parent)
}
