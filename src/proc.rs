//! Subprocess lifecycle helpers.
//!
//! Spawning with either a restricted or a full environment, graceful
//! termination with SIGTERM→SIGKILL escalation, and the external-tool
//! version probe. Used by the invocation engine, the streaming engine, and
//! the structured PDF extractor.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::models::{ToolState, ToolStatus};

/// Environment policy for a spawned tool.
#[derive(Debug, Clone)]
pub enum EnvPolicy {
    /// Clear everything, then pass through only the named variables.
    Restricted(Vec<String>),
    /// Inherit the parent's full environment.
    Inherit,
}

/// Build a command with piped stdio and the given environment policy.
pub fn build_command(program: &str, args: &[String], env: &EnvPolicy) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    if let EnvPolicy::Restricted(allowed) = env {
        cmd.env_clear();
        for key in allowed {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd
}

/// Send a graceful termination signal to the child.
///
/// On Unix this is SIGTERM; elsewhere it degrades to a hard kill since no
/// graceful signal exists.
pub fn terminate_gracefully(child: &Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, error = %e, "failed to send SIGTERM");
            } else {
                debug!(pid, "sent SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}

/// Terminate the child with escalation: graceful signal first, then a
/// forceful kill if it has not confirmed exit within `grace`.
pub async fn kill_with_grace(child: &mut Child, grace: Duration) {
    terminate_gracefully(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(?status, "child exited after graceful signal");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for child after graceful signal");
            let _ = child.kill().await;
        }
        Err(_) => {
            warn!("child did not exit within grace period, escalating to kill");
            let _ = child.kill().await;
        }
    }
}

/// Probe the generation tool by running `<command> --version`.
///
/// Maps spawn-not-found to `NotInstalled`, authentication complaints to
/// `AuthRequired`, other nonzero exits to `Error`, and success to `Ready`
/// with the reported version line.
pub async fn probe_tool_status(command: &str) -> ToolStatus {
    let output = Command::new(command)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ToolStatus {
                state: ToolState::NotInstalled,
                version: None,
                message: Some(format!("{} not found on PATH", command)),
            };
        }
        Err(e) => {
            return ToolStatus {
                state: ToolState::Error,
                version: None,
                message: Some(e.to_string()),
            };
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        let version = stdout.lines().next().map(|l| l.trim().to_string());
        return ToolStatus {
            state: ToolState::Ready,
            version,
            message: None,
        };
    }

    let combined = format!("{} {}", stdout, stderr).to_lowercase();
    if combined.contains("login") || combined.contains("auth") {
        ToolStatus {
            state: ToolState::AuthRequired,
            version: None,
            message: Some(stderr.trim().to_string()),
        }
    } else {
        ToolStatus {
            state: ToolState::Error,
            version: None,
            message: Some(stderr.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_missing_binary_reports_not_installed() {
        let status = probe_tool_status("definitely-not-a-real-binary-a8f3").await;
        assert_eq!(status.state, ToolState::NotInstalled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_ready_tool_reports_version() {
        // `sh` is not the generation tool, but any binary that accepts
        // --version-style probing exercises the success path. Use `true`
        // which exits 0 ignoring arguments.
        let status = probe_tool_status("true").await;
        assert_eq!(status.state, ToolState::Ready);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_with_grace_terminates_sleeper() {
        let mut child = build_command(
            "sleep",
            &["30".to_string()],
            &EnvPolicy::Restricted(vec!["PATH".to_string()]),
        )
        .spawn()
        .unwrap();
        kill_with_grace(&mut child, Duration::from_millis(500)).await;
        // Process is gone; wait returns immediately.
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[test]
    fn restricted_env_builds() {
        let cmd = build_command(
            "echo",
            &["hi".to_string()],
            &EnvPolicy::Restricted(vec!["PATH".to_string(), "HOME".to_string()]),
        );
        // Just exercising the builder; spawning is covered elsewhere.
        drop(cmd);
    }
}
