//! Infrastructure shapes, node descriptors, and the provisioner seam.
//!
//! The harness never talks to a cloud API directly. Provisioning goes through
//! the [`InfrastructureProvisioner`] trait; the shipped [`CommandProvisioner`]
//! shells out to an external provisioning binary and decodes its JSON output.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors that can occur while provisioning or deprovisioning nodes.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The provisioner command could not be spawned.
    #[error("provisioner spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// The provisioner command exited non-zero.
    #[error("provisioner {operation} failed: exit={exit_code}, stderr={stderr}")]
    Failed {
        /// Which provisioner operation was running.
        operation: String,
        /// Exit code from the command.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// The provisioner output could not be decoded.
    #[error("could not decode provisioner output: {0}")]
    Decode(#[from] serde_json::Error),

    /// The provisioner returned fewer nodes than requested.
    ///
    /// A partial node set is never handed to a scenario body.
    #[error("provisioner returned {got} nodes, requested {requested}")]
    IncompleteNodeSet {
        /// Total nodes requested.
        requested: u32,
        /// Total nodes returned.
        got: u32,
    },

    /// The provisioner returned the right total with the wrong per-role
    /// distribution.
    #[error("provisioner returned {got} {role} nodes, requested {requested}")]
    RoleMismatch {
        /// Role whose count differs.
        role: &'static str,
        /// Nodes requested for the role.
        requested: u32,
        /// Nodes returned for the role.
        got: u32,
    },
}

/// Requested node counts per cluster role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCount {
    /// etcd nodes.
    pub etcd: u32,
    /// master nodes.
    pub master: u32,
    /// worker nodes.
    pub worker: u32,
    /// ingress nodes.
    pub ingress: u32,
    /// storage nodes.
    pub storage: u32,
}

impl NodeCount {
    /// Shape with one node per role.
    pub fn all_roles() -> Self {
        Self {
            etcd: 1,
            master: 1,
            worker: 1,
            ingress: 1,
            storage: 1,
        }
    }

    /// Shape with a single worker-role machine, used by the mini scopes
    /// where one node carries every role.
    pub fn single_node() -> Self {
        Self {
            etcd: 0,
            master: 0,
            worker: 1,
            ingress: 0,
            storage: 0,
        }
    }

    /// Total number of nodes in the shape.
    pub fn total(&self) -> u32 {
        self.etcd + self.master + self.worker + self.ingress + self.storage
    }
}

impl fmt::Display for NodeCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{etcd:{}, master:{}, worker:{}, ingress:{}, storage:{}}}",
            self.etcd, self.master, self.worker, self.ingress, self.storage
        )
    }
}

/// Operating system image to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingSystem {
    /// Ubuntu 16.04 LTS.
    Ubuntu1604,
    /// CentOS 7.
    CentOs7,
    /// Red Hat Enterprise Linux 7.
    RedHat7,
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingSystem::Ubuntu1604 => write!(f, "ubuntu-16.04"),
            OperatingSystem::CentOs7 => write!(f, "centos-7"),
            OperatingSystem::RedHat7 => write!(f, "rhel-7"),
        }
    }
}

/// Cluster role a node was provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// etcd member.
    Etcd,
    /// Control-plane node.
    Master,
    /// Worker node.
    Worker,
    /// Ingress node.
    Ingress,
    /// Storage node.
    Storage,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Etcd => write!(f, "etcd"),
            NodeRole::Master => write!(f, "master"),
            NodeRole::Worker => write!(f, "worker"),
            NodeRole::Ingress => write!(f, "ingress"),
            NodeRole::Storage => write!(f, "storage"),
        }
    }
}

/// Identity of one provisioned machine.
///
/// Read-only downstream of provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Provider-assigned node id, used for deprovisioning.
    pub id: String,
    /// Hostname.
    pub hostname: String,
    /// Public IP address (management channel).
    pub public_ip: String,
    /// Private IP address (cluster network).
    pub private_ip: String,
    /// SSH user.
    pub ssh_user: String,
    /// Role the node was provisioned for.
    pub role: NodeRole,
}

/// Reference to the SSH private key that unlocks the provisioned nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey(PathBuf);

impl SshKey {
    /// Wrap a key path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Path to the private key file.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Provisioned nodes grouped by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionedNodes {
    /// etcd nodes.
    pub etcd: Vec<NodeDescriptor>,
    /// master nodes.
    pub master: Vec<NodeDescriptor>,
    /// worker nodes.
    pub worker: Vec<NodeDescriptor>,
    /// ingress nodes.
    pub ingress: Vec<NodeDescriptor>,
    /// storage nodes.
    pub storage: Vec<NodeDescriptor>,
}

impl ProvisionedNodes {
    /// Iterate over every node, in role order.
    pub fn all(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.etcd
            .iter()
            .chain(self.master.iter())
            .chain(self.worker.iter())
            .chain(self.ingress.iter())
            .chain(self.storage.iter())
    }

    /// Total number of nodes.
    pub fn count(&self) -> u32 {
        self.all().count() as u32
    }

    /// The per-role counts of this set as a shape.
    pub fn role_counts(&self) -> NodeCount {
        NodeCount {
            etcd: self.etcd.len() as u32,
            master: self.master.len() as u32,
            worker: self.worker.len() as u32,
            ingress: self.ingress.len() as u32,
            storage: self.storage.len() as u32,
        }
    }

    /// Fail unless this set matches the requested shape role by role.
    ///
    /// A matching total with a skewed distribution is still a mismatch.
    pub fn verify_shape(&self, shape: &NodeCount) -> Result<(), ProvisionError> {
        let got = self.role_counts();
        if got == *shape {
            return Ok(());
        }
        if got.total() != shape.total() {
            return Err(ProvisionError::IncompleteNodeSet {
                requested: shape.total(),
                got: got.total(),
            });
        }
        let per_role = [
            ("etcd", shape.etcd, got.etcd),
            ("master", shape.master, got.master),
            ("worker", shape.worker, got.worker),
            ("ingress", shape.ingress, got.ingress),
            ("storage", shape.storage, got.storage),
        ];
        for (role, requested, got) in per_role {
            if requested != got {
                return Err(ProvisionError::RoleMismatch {
                    role,
                    requested,
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Result of provisioning: the nodes plus the key that unlocks them.
///
/// Owned exclusively by the infrastructure scope that created it; never
/// retained beyond scope exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedNodeSet {
    /// The provisioned nodes, grouped by role.
    pub nodes: ProvisionedNodes,
    /// SSH private key for the nodes.
    pub ssh_key: SshKey,
}

/// A provisioning request. Immutable once a scope begins.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest {
    /// Requested node counts per role.
    pub shape: NodeCount,
    /// Operating system image.
    pub os: OperatingSystem,
    /// Attach a raw block device to each node before handing it over.
    pub with_block_device: bool,
}

/// Capability to provision and deprovision cluster nodes.
///
/// Implementations must only return from `provision` once every requested
/// node is reachable over the management channel.
#[async_trait]
pub trait InfrastructureProvisioner: Send + Sync {
    /// Human-readable provider name, used in failure reports.
    fn name(&self) -> &str;

    /// Provision nodes matching the request.
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedNodeSet, ProvisionError>;

    /// Release one provisioned node.
    async fn deprovision(&self, node: &NodeDescriptor) -> Result<(), ProvisionError>;

    /// Forcibly terminate one node mid-scenario, simulating node loss.
    async fn terminate_node(&self, node: &NodeDescriptor) -> Result<(), ProvisionError>;
}

/// Provisioner adapter that shells out to an external provisioning binary.
///
/// `provision` runs `<command> provision --etcd N ... --os <os>` and decodes
/// a JSON [`ProvisionedNodeSet`] from stdout. Provider-specific mechanics
/// (API calls, reachability polling) live entirely in the external command.
pub struct CommandProvisioner {
    name: String,
    command: PathBuf,
}

impl CommandProvisioner {
    /// Create an adapter for the named provider.
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    async fn run(&self, operation: &str, args: &[String]) -> Result<String, ProvisionError> {
        let output = tokio::process::Command::new(&self.command)
            .arg(operation)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProvisionError::Failed {
                operation: operation.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl InfrastructureProvisioner for CommandProvisioner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedNodeSet, ProvisionError> {
        let shape = request.shape;
        let mut args = vec![
            format!("--etcd={}", shape.etcd),
            format!("--master={}", shape.master),
            format!("--worker={}", shape.worker),
            format!("--ingress={}", shape.ingress),
            format!("--storage={}", shape.storage),
            format!("--os={}", request.os),
        ];
        if request.with_block_device {
            args.push("--block-device".to_string());
        }

        info!(provider = %self.name, shape = %shape, os = %request.os, "requesting nodes");
        let stdout = self.run("provision", &args).await?;
        let set: ProvisionedNodeSet = serde_json::from_str(&stdout)?;
        set.nodes.verify_shape(&request.shape)?;
        info!(provider = %self.name, nodes = set.nodes.count(), "nodes provisioned and reachable");
        Ok(set)
    }

    async fn deprovision(&self, node: &NodeDescriptor) -> Result<(), ProvisionError> {
        self.run("deprovision", &[format!("--node={}", node.id)])
            .await?;
        Ok(())
    }

    async fn terminate_node(&self, node: &NodeDescriptor) -> Result<(), ProvisionError> {
        info!(provider = %self.name, node = %node.id, "terminating node");
        self.run("terminate", &[format!("--node={}", node.id)])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_total() {
        let shape = NodeCount {
            etcd: 3,
            master: 2,
            worker: 5,
            ingress: 2,
            storage: 2,
        };
        assert_eq!(shape.total(), 14);
        assert_eq!(NodeCount::all_roles().total(), 5);
        assert_eq!(NodeCount::single_node().total(), 1);
    }

    #[test]
    fn node_count_display() {
        let shape = NodeCount::all_roles();
        assert_eq!(
            shape.to_string(),
            "{etcd:1, master:1, worker:1, ingress:1, storage:1}"
        );
    }

    #[test]
    fn operating_system_display() {
        assert_eq!(OperatingSystem::Ubuntu1604.to_string(), "ubuntu-16.04");
        assert_eq!(OperatingSystem::CentOs7.to_string(), "centos-7");
        assert_eq!(OperatingSystem::RedHat7.to_string(), "rhel-7");
    }

    #[test]
    fn decode_provisioner_output() {
        let json = r#"{
            "nodes": {
                "etcd": [{
                    "id": "i-0abc",
                    "hostname": "etcd-0",
                    "public_ip": "198.51.100.10",
                    "private_ip": "10.0.0.10",
                    "ssh_user": "ubuntu",
                    "role": "etcd"
                }],
                "master": [],
                "worker": [],
                "ingress": [],
                "storage": []
            },
            "ssh_key": "/tmp/harness-key.pem"
        }"#;

        let set: ProvisionedNodeSet = serde_json::from_str(json).expect("decode");
        assert_eq!(set.nodes.count(), 1);
        assert_eq!(set.nodes.etcd[0].hostname, "etcd-0");
        assert_eq!(set.nodes.etcd[0].role, NodeRole::Etcd);
        assert_eq!(set.ssh_key.path().to_str(), Some("/tmp/harness-key.pem"));
    }

    fn worker(ip: &str) -> NodeDescriptor {
        NodeDescriptor {
            id: format!("n-{ip}"),
            hostname: "worker".into(),
            public_ip: ip.into(),
            private_ip: ip.into(),
            ssh_user: "root".into(),
            role: NodeRole::Worker,
        }
    }

    #[test]
    fn incomplete_node_set_rejected() {
        let nodes = ProvisionedNodes::default();

        let err = nodes
            .verify_shape(&NodeCount::all_roles())
            .expect_err("partial set must be rejected");
        match err {
            ProvisionError::IncompleteNodeSet { requested, got } => {
                assert_eq!(requested, 5);
                assert_eq!(got, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn complete_node_set_accepted() {
        let nodes = ProvisionedNodes {
            worker: vec![worker("10.0.0.1")],
            ..Default::default()
        };
        assert!(nodes.verify_shape(&NodeCount::single_node()).is_ok());
    }

    #[test]
    fn matching_total_with_skewed_roles_rejected() {
        // Right total, wrong distribution: two workers where the shape wants
        // one worker and one storage node.
        let shape = NodeCount {
            etcd: 0,
            master: 0,
            worker: 1,
            ingress: 0,
            storage: 1,
        };
        let nodes = ProvisionedNodes {
            worker: vec![worker("10.0.0.1"), worker("10.0.0.2")],
            ..Default::default()
        };

        let err = nodes
            .verify_shape(&shape)
            .expect_err("skewed set must be rejected");
        match err {
            ProvisionError::RoleMismatch {
                role,
                requested,
                got,
            } => {
                assert_eq!(role, "worker");
                assert_eq!(requested, 1);
                assert_eq!(got, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
