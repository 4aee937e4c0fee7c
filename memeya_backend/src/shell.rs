//! Runs `SHELL` edits emitted by the code backend.
//!
//! Only reachable when `allow_shell_edits` is on. Commands run through
//! `/bin/sh -c` inside the workspace directory with a hard timeout.

use std::path::Path;
use std::time::Duration;

pub const SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum output size kept per stream (bytes)
const MAX_OUTPUT_BYTES: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Human-readable report, also fed back to the code backend on failure.
    pub fn report(&self) -> String {
        let mut text = format!("Exit code: {}\n", self.exit_code);
        if !self.stdout.is_empty() {
            text.push_str(&format!("\n--- stdout ---\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            text.push_str(&format!("\n--- stderr ---\n{}", self.stderr));
        }
        text
    }
}

/// Spawn failures and timeouts come back as an `Err` with a readable message.
pub async fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutcome, String> {
    tracing::info!("Running shell edit: {} (cwd: {:?})", command, cwd);

    if let Err(e) = std::fs::create_dir_all(cwd) {
        return Err(format!("Failed to create workspace {:?}: {}", cwd, e));
    }

    let result = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) => Ok(ShellOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_output(String::from_utf8_lossy(&output.stdout).to_string(), "stdout"),
            stderr: truncate_output(String::from_utf8_lossy(&output.stderr).to_string(), "stderr"),
        }),
        Ok(Err(e)) => Err(format!("Failed to execute command: {}", e)),
        Err(_) => Err(format!(
            "Command timed out after {} seconds",
            timeout.as_secs()
        )),
    }
}

fn truncate_output(mut text: String, stream: &str) -> String {
    if text.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(&format!("\n[{} truncated]", stream));
    }
    text
}
