//! SS-011: Runs provider scripts through a local `bash`.

use super::ExecOutput;
use std::io::Write;
use std::process::{Command, Stdio};

/// Run a script with the inherited environment.
pub fn exec_local(script: &str) -> Result<ExecOutput, String> {
    exec_local_env(script, &[])
}

/// Run a script with extra environment variables (region, profile).
/// Scripts start with `set -euo pipefail`, so this must be bash.
pub fn exec_local_env(script: &str, env: &[(&str, &str)]) -> Result<ExecOutput, String> {
    let mut child = Command::new("bash")
        .envs(env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("cannot start bash: {}", e))?;

    // stdin is closed when the handle drops, which ends the script
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("cannot send script to bash: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("bash did not finish: {}", e))?;
    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
