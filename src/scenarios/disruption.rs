//! Disruption scenarios: node loss behind stable DNS and fail-fast behavior
//! against unreachable infrastructure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config;
use crate::installer::{self, InstallOptions};
use crate::provision::{
    InfrastructureProvisioner, NodeCount, NodeDescriptor, NodeRole, OperatingSystem,
    ProvisionedNodes, SshKey,
};
use crate::scope::{with_infrastructure_and_dns, DnsRegistrar};
use crate::ssh;
use crate::suite::ScenarioError;
use crate::timing::completes_in_time;

/// Install an HA control plane behind DNS, kill one master, and verify the
/// cluster still answers through the survivor.
pub async fn ha_master_failover(
    provisioner: Arc<dyn InfrastructureProvisioner>,
    dns: Arc<dyn DnsRegistrar>,
) -> Result<(), ScenarioError> {
    let shape = NodeCount {
        etcd: 1,
        master: 2,
        worker: 1,
        ingress: 1,
        storage: 0,
    };
    let handle = Arc::clone(&provisioner);

    with_infrastructure_and_dns(
        shape,
        OperatingSystem::Ubuntu1604,
        provisioner.as_ref(),
        dns.as_ref(),
        move |nodes, key| async move {
            let options = InstallOptions::default();
            installer::install_cluster(&nodes, &options, &key).await?;
            installer::validate_cluster(&nodes, &options, &key).await?;

            let [lost, survivor] = nodes.master.as_slice() else {
                return Err(ScenarioError::assertion(
                    "master failover",
                    "expected exactly two masters",
                ));
            };

            handle.terminate_node(lost).await?;

            ssh::run_via_ssh(
                &["sudo kubectl --kubeconfig /etc/kubernetes/admin.conf get nodes"],
                std::slice::from_ref(survivor),
                &key,
                Duration::from_secs(config::SSH_COMMAND_TIMEOUT_SECS),
            )
            .await?;
            Ok(())
        },
    )
    .await?;
    Ok(())
}

/// Run the installer against unreachable addresses and require it to give up
/// within the configured deadline.
///
/// The install is expected to fail; the requirement is that it fails fast
/// instead of hanging on connection retries. Needs no real infrastructure.
pub async fn fails_fast_on_unreachable_node() -> Result<(), ScenarioError> {
    let deadline = Duration::from_secs(config::BAD_INFRA_DEADLINE_SECS);
    let nodes = unreachable_cluster();
    let key = SshKey::new("/nonexistent/key.pem");

    let started = Instant::now();
    let finished = completes_in_time(
        async move {
            let _ = installer::install_cluster(&nodes, &InstallOptions::default(), &key).await;
        },
        deadline,
    )
    .await;

    if !finished {
        return Err(ScenarioError::Timeout {
            deadline,
            elapsed: started.elapsed(),
        });
    }
    Ok(())
}

/// Node set pointing at non-routable addresses.
fn unreachable_cluster() -> ProvisionedNodes {
    let node = |role: NodeRole, ip: &str| NodeDescriptor {
        id: format!("unreachable-{role}"),
        hostname: format!("{role}-0"),
        public_ip: ip.into(),
        private_ip: ip.into(),
        ssh_user: "ubuntu".into(),
        role,
    };
    ProvisionedNodes {
        etcd: vec![node(NodeRole::Etcd, "10.0.4.10")],
        master: vec![node(NodeRole::Master, "10.0.4.11")],
        worker: vec![node(NodeRole::Worker, "10.0.4.12")],
        ingress: vec![],
        storage: vec![],
    }
}
