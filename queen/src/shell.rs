//! Remote shell execution on the boards
//!
//! Drone service units are started and stopped over SSH on the board that
//! hosts them. [`RemoteShell`] keeps the transport behind a trait so the
//! control and monitor logic can be tested with a recording stub.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run a command on the host at `addr`, failing on non-zero exit.
    async fn execute(&self, addr: &str, command: &str) -> Result<ShellOutput>;
}

/// SSH-backed shell. Requires key-based auth for the configured user;
/// BatchMode keeps a missing key from hanging on a password prompt.
pub struct SshShell {
    user: String,
}

impl SshShell {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn execute(&self, addr: &str, command: &str) -> Result<ShellOutput> {
        debug!(addr, command, "running remote command");
        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg(format!("{}@{}", self.user, addr))
            .arg(command)
            .output()
            .await
            .with_context(|| format!("spawning ssh to {addr}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            bail!(
                "remote command failed on {addr} ({}): {}",
                output.status,
                stderr.trim()
            );
        }

        Ok(ShellOutput { stdout, stderr })
    }
}
