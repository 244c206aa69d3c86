//! Installer invocation collaborator.
//!
//! The installer is an opaque external command. The harness assembles its
//! arguments from the provisioned nodes and an option bag, runs it with
//! `tokio::process::Command`, and surfaces non-zero exits with stderr
//! attached. The installer writes the structural plan file into the working
//! directory as a side effect (see [`crate::plan`]).

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::info;

use crate::config;
use crate::provision::{NodeDescriptor, ProvisionedNodes, SshKey};

/// Errors from installer invocations.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// The installer binary could not be spawned.
    #[error("installer spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// The installer exited non-zero.
    #[error("installer {operation} failed: exit={exit_code}, stderr={stderr}")]
    Failed {
        /// Which installer operation was running.
        operation: String,
        /// Exit code from the command.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },
}

/// Option bag for an installation run.
///
/// Every field maps to an installer flag; `None`/`false`/empty means the flag
/// is omitted and the installer default applies.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// CNI provider selection (e.g. "calico", "weave").
    pub cni_provider: Option<String>,
    /// Cluster DNS provider selection (e.g. "coredns").
    pub dns_provider: Option<String>,
    /// Cloud provider integration flag (e.g. "aws").
    pub cloud_provider: Option<String>,
    /// Docker storage driver (e.g. "devicemapper", "overlay2").
    pub docker_storage_driver: Option<String>,
    /// Skip docker installation (docker must already be present).
    pub disable_docker_installation: bool,
    /// Skip CNI installation entirely.
    pub disable_cni: bool,
    /// Replica count for the metrics add-on.
    pub metrics_replicas: Option<u32>,
    /// Persistent volume claim backing the metrics store.
    pub metrics_pvc: Option<String>,
    /// Extra command-line options for the API server.
    pub api_server_options: BTreeMap<String, String>,
    /// Extra command-line options for the controller manager.
    pub controller_manager_options: BTreeMap<String, String>,
    /// Extra command-line options for the scheduler.
    pub scheduler_options: BTreeMap<String, String>,
    /// Extra command-line options for the service proxy.
    pub proxy_options: BTreeMap<String, String>,
    /// Extra command-line options for the node agent.
    pub agent_options: BTreeMap<String, String>,
}

impl InstallOptions {
    /// Render the option bag as installer flags.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(cni) = &self.cni_provider {
            args.push(format!("--cni-provider={cni}"));
        }
        if let Some(dns) = &self.dns_provider {
            args.push(format!("--dns-provider={dns}"));
        }
        if let Some(cloud) = &self.cloud_provider {
            args.push(format!("--cloud-provider={cloud}"));
        }
        if let Some(driver) = &self.docker_storage_driver {
            args.push(format!("--docker-storage-driver={driver}"));
        }
        if self.disable_docker_installation {
            args.push("--disable-docker-installation".to_string());
        }
        if self.disable_cni {
            args.push("--disable-cni".to_string());
        }
        if let Some(replicas) = self.metrics_replicas {
            args.push(format!("--metrics-replicas={replicas}"));
        }
        if let Some(pvc) = &self.metrics_pvc {
            args.push(format!("--metrics-pvc={pvc}"));
        }

        push_overrides(&mut args, "--api-server-opt", &self.api_server_options);
        push_overrides(
            &mut args,
            "--controller-manager-opt",
            &self.controller_manager_options,
        );
        push_overrides(&mut args, "--scheduler-opt", &self.scheduler_options);
        push_overrides(&mut args, "--proxy-opt", &self.proxy_options);
        push_overrides(&mut args, "--agent-opt", &self.agent_options);

        args
    }
}

fn push_overrides(args: &mut Vec<String>, flag: &str, overrides: &BTreeMap<String, String>) {
    for (key, value) in overrides {
        args.push(format!("{flag}={key}={value}"));
    }
}

fn node_arg(role: &str, node: &NodeDescriptor) -> String {
    format!(
        "--{role}-node={user}@{ip}",
        user = node.ssh_user,
        ip = node.public_ip
    )
}

/// Assemble the node and key arguments shared by install and validate.
fn target_args(nodes: &ProvisionedNodes, key: &SshKey) -> Vec<String> {
    let mut args = Vec::new();
    for node in &nodes.etcd {
        args.push(node_arg("etcd", node));
    }
    for node in &nodes.master {
        args.push(node_arg("master", node));
    }
    for node in &nodes.worker {
        args.push(node_arg("worker", node));
    }
    for node in &nodes.ingress {
        args.push(node_arg("ingress", node));
    }
    for node in &nodes.storage {
        args.push(node_arg("storage", node));
    }
    args.push(format!("--ssh-key={}", key.path().display()));
    args
}

async fn run_installer(operation: &[&str], args: &[String]) -> Result<String, InstallerError> {
    let bin = config::installer_bin();
    info!(installer = %bin.display(), operation = operation.join(" "), "invoking installer");

    let output = tokio::process::Command::new(&bin)
        .args(operation)
        .args(args)
        .output()
        .await?;

    if !output.status.success() {
        return Err(InstallerError::Failed {
            operation: operation.join(" "),
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Generate the default plan file template in the working directory.
///
/// Returns the installer's stdout so callers can assert on the summary it
/// prints.
pub async fn generate_plan() -> Result<String, InstallerError> {
    run_installer(&["install", "plan"], &[]).await
}

/// Run a full installation against the provisioned nodes.
pub async fn install_cluster(
    nodes: &ProvisionedNodes,
    options: &InstallOptions,
    key: &SshKey,
) -> Result<(), InstallerError> {
    let mut args = target_args(nodes, key);
    args.extend(options.to_args());
    run_installer(&["install", "apply"], &args).await?;
    Ok(())
}

/// Run the installer's preflight validation against the provisioned nodes.
pub async fn validate_cluster(
    nodes: &ProvisionedNodes,
    options: &InstallOptions,
    key: &SshKey,
) -> Result<(), InstallerError> {
    let mut args = target_args(nodes, key);
    args.extend(options.to_args());
    run_installer(&["install", "validate"], &args).await?;
    Ok(())
}

/// Reset one node, removing everything the installer put on it.
pub async fn reset_node(node: &NodeDescriptor, key: &SshKey) -> Result<(), InstallerError> {
    let args = vec![
        format!("--node={}@{}", node.ssh_user, node.public_ip),
        format!("--ssh-key={}", key.path().display()),
    ];
    run_installer(&["install", "reset"], &args).await?;
    Ok(())
}

/// Add a node to a running cluster with the given labels and extra roles.
pub async fn add_node_to_cluster(
    node: &NodeDescriptor,
    key: &SshKey,
    labels: &[&str],
    roles: &[&str],
) -> Result<(), InstallerError> {
    let mut args = vec![
        format!("--node={}@{}", node.ssh_user, node.public_ip),
        format!("--ssh-key={}", key.path().display()),
    ];
    for label in labels {
        args.push(format!("--label={label}"));
    }
    for role in roles {
        args.push(format!("--role={role}"));
    }
    run_installer(&["install", "add-node"], &args).await?;
    Ok(())
}
