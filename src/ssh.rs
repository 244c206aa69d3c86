//! Remote command execution against provisioned nodes.
//!
//! Shells out to `ssh` via `tokio::process::Command`. Authentication uses the
//! private key handed back by the provisioner; host keys are not checked
//! because the nodes are ephemeral.

use std::time::Duration;

use thiserror::Error;

use crate::provision::{NodeDescriptor, SshKey};

/// Errors from SSH operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// The ssh process could not be spawned.
    #[error("ssh spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// The remote command returned a non-zero exit code.
    #[error("ssh command failed on {host}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// The batch of commands did not finish within the deadline.
    #[error("ssh commands did not complete within {timeout:?}")]
    Timeout {
        /// Configured deadline for the whole batch.
        timeout: Duration,
    },
}

/// Result of executing a command over SSH.
#[derive(Debug, Clone)]
pub struct SshResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl SshResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Assemble the ssh argument vector for one command on one node.
fn ssh_args(node: &NodeDescriptor, key: &SshKey, cmd: &str) -> Vec<String> {
    vec![
        "-i".to_string(),
        key.path().display().to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "ConnectTimeout=30".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        format!("{}@{}", node.ssh_user, node.public_ip),
        cmd.to_string(),
    ]
}

/// Execute a command on a node.
///
/// Returns the raw result including exit code, stdout, and stderr.
/// Does NOT fail on non-zero exit — use [`exec_ok`] for that.
pub async fn exec(node: &NodeDescriptor, key: &SshKey, cmd: &str) -> Result<SshResult, SshError> {
    let output = tokio::process::Command::new("ssh")
        .args(ssh_args(node, key, cmd))
        .output()
        .await?;

    Ok(SshResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Execute a command on a node, failing on non-zero exit.
pub async fn exec_ok(
    node: &NodeDescriptor,
    key: &SshKey,
    cmd: &str,
) -> Result<SshResult, SshError> {
    let result = exec(node, key, cmd).await?;
    if !result.success() {
        return Err(SshError::CommandFailed {
            host: node.public_ip.clone(),
            exit_code: result.exit_code,
            stderr: result.stderr.clone(),
        });
    }
    Ok(result)
}

/// Run a batch of commands on every node, in order, under one deadline.
///
/// Commands run sequentially per node; the first failing command aborts the
/// batch. The deadline covers the whole batch, not each command.
pub async fn run_via_ssh(
    commands: &[&str],
    nodes: &[NodeDescriptor],
    key: &SshKey,
    timeout: Duration,
) -> Result<(), SshError> {
    let batch = async {
        for node in nodes {
            for cmd in commands {
                exec_ok(node, key, cmd).await?;
            }
        }
        Ok(())
    };

    match tokio::time::timeout(timeout, batch).await {
        Ok(result) => result,
        Err(_) => Err(SshError::Timeout { timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::NodeRole;

    fn node() -> NodeDescriptor {
        NodeDescriptor {
            id: "i-123".into(),
            hostname: "master-0".into(),
            public_ip: "198.51.100.7".into(),
            private_ip: "10.0.0.7".into(),
            ssh_user: "ubuntu".into(),
            role: NodeRole::Master,
        }
    }

    #[test]
    fn ssh_args_target_and_key() {
        let key = SshKey::new("/tmp/key.pem");
        let args = ssh_args(&node(), &key, "uptime");

        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/tmp/key.pem");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ubuntu@198.51.100.7".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("uptime"));
    }

    #[tokio::test]
    async fn run_via_ssh_empty_nodes_is_noop() {
        let key = SshKey::new("/tmp/key.pem");
        run_via_ssh(&["uptime"], &[], &key, Duration::from_secs(1))
            .await
            .expect("no nodes means nothing to run");
    }

    #[tokio::test]
    #[ignore = "requires a provisioned node"]
    async fn exec_ok_live_node() {
        let key = SshKey::new("/tmp/key.pem");
        let result = exec_ok(&node(), &key, "whoami").await.expect("ssh failed");
        assert_eq!(result.stdout.trim(), "ubuntu");
    }
}
