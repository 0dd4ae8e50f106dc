//! Shared plumbing for invoking external command-line tools.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Run `cmd` to completion, capturing stdout/stderr.
///
/// The child is killed if `timeout` expires. Launch failures, timeouts and
/// non-zero exits are all reported as a message that includes the tool's
/// captured stderr, for the caller to wrap in its own error variant.
pub(crate) async fn run_captured(
    mut cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<Output, String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to launch {tool}: {e}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| format!("{tool} did not complete: {e}"))?,
        Err(_) => return Err(format!("{tool} timed out after {}s", timeout.as_secs())),
    };

    if !output.stdout.is_empty() {
        debug!(tool, stdout = %String::from_utf8_lossy(&output.stdout), "tool stdout");
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{tool} exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(output)
}

/// Probe an executable with its version flag; returns the first line it prints.
pub async fn tool_version(executable: &Path, version_arg: &str) -> Option<String> {
    let mut cmd = Command::new(executable);
    cmd.arg(version_arg);
    let output = run_captured(cmd, &executable.to_string_lossy(), Duration::from_secs(10))
        .await
        .ok()?;
    let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
    String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
