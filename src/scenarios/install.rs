//! Installation scenarios: full clusters, single-node clusters, option
//! variants, and the plan template.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config;
use crate::installer::{self, InstallOptions};
use crate::plan::ClusterPlan;
use crate::provision::{
    InfrastructureProvisioner, NodeCount, NodeDescriptor, OperatingSystem, ProvisionedNodes,
};
use crate::scope::{
    with_infrastructure, with_mini_infrastructure, with_mini_infrastructure_and_block_device,
};
use crate::ssh;
use crate::suite::ScenarioError;

const KUBECTL: &str = "sudo kubectl --kubeconfig /etc/kubernetes/admin.conf";

const DOCKER_INSTALL_CMDS: &[&str] = &[
    "curl -sSL https://get.docker.com/ -o /tmp/install-docker.sh",
    "sudo sh /tmp/install-docker.sh",
    "sudo systemctl enable --now docker",
];

/// A single machine carrying the etcd, master, and worker roles.
fn single_node_cluster(node: NodeDescriptor) -> ProvisionedNodes {
    ProvisionedNodes {
        etcd: vec![node.clone()],
        master: vec![node.clone()],
        worker: vec![node],
        ingress: vec![],
        storage: vec![],
    }
}

/// Install and validate a cluster with one node per role.
pub async fn all_roles_install(
    provisioner: Arc<dyn InfrastructureProvisioner>,
) -> Result<(), ScenarioError> {
    with_infrastructure(
        NodeCount::all_roles(),
        OperatingSystem::Ubuntu1604,
        provisioner.as_ref(),
        |nodes, key| async move {
            let options = InstallOptions::default();
            installer::install_cluster(&nodes, &options, &key).await?;
            installer::validate_cluster(&nodes, &options, &key).await?;
            Ok(())
        },
    )
    .await?;
    Ok(())
}

/// Install with CNI disabled; the API comes up but nodes stay NotReady.
pub async fn disabled_cni_install(
    provisioner: Arc<dyn InfrastructureProvisioner>,
) -> Result<(), ScenarioError> {
    let shape = NodeCount {
        etcd: 1,
        master: 1,
        worker: 1,
        ingress: 0,
        storage: 0,
    };
    with_infrastructure(
        shape,
        OperatingSystem::Ubuntu1604,
        provisioner.as_ref(),
        |nodes, key| async move {
            let options = InstallOptions {
                disable_cni: true,
                ..Default::default()
            };
            installer::install_cluster(&nodes, &options, &key).await?;

            let master = nodes.master.first().cloned().ok_or_else(|| {
                ScenarioError::assertion("disabled cni", "no master node provisioned")
            })?;
            let status = ssh::exec_ok(&master, &key, &format!("{KUBECTL} get nodes")).await?;
            if !status.stdout.contains("NotReady") {
                return Err(ScenarioError::assertion(
                    "disabled cni",
                    "nodes reported Ready without a network plugin",
                ));
            }
            Ok(())
        },
    )
    .await?;
    Ok(())
}

/// Install with cloud provider integration enabled and verify the plan the
/// installer wrote matches the requested shape.
pub async fn cloud_provider_install(
    provisioner: Arc<dyn InfrastructureProvisioner>,
    os: OperatingSystem,
) -> Result<(), ScenarioError> {
    let shape = NodeCount {
        etcd: 1,
        master: 1,
        worker: 2,
        ingress: 1,
        storage: 1,
    };
    with_infrastructure(
        shape,
        os,
        provisioner.as_ref(),
        move |nodes, key| async move {
            let options = InstallOptions {
                cloud_provider: Some("aws".into()),
                ..Default::default()
            };
            installer::install_cluster(&nodes, &options, &key).await?;
            installer::validate_cluster(&nodes, &options, &key).await?;

            let plan = ClusterPlan::load(config::PLAN_FILE)?;
            plan.verify_expected_counts(&shape)?;
            Ok(())
        },
    )
    .await?;
    Ok(())
}

/// Install against a machine where docker is already present.
///
/// Preflight validation must fail while docker is absent, then pass once
/// docker is installed out-of-band and the installer is told not to manage it.
pub async fn docker_preinstalled_install(
    provisioner: Arc<dyn InfrastructureProvisioner>,
) -> Result<(), ScenarioError> {
    with_mini_infrastructure(
        OperatingSystem::Ubuntu1604,
        provisioner.as_ref(),
        |node, key| async move {
            let options = InstallOptions {
                disable_docker_installation: true,
                ..Default::default()
            };
            let nodes = single_node_cluster(node.clone());

            if installer::validate_cluster(&nodes, &options, &key).await.is_ok() {
                return Err(ScenarioError::assertion(
                    "preflight without docker",
                    "validation passed before docker was installed",
                ));
            }

            ssh::run_via_ssh(
                DOCKER_INSTALL_CMDS,
                std::slice::from_ref(&node),
                &key,
                Duration::from_secs(config::SSH_COMMAND_TIMEOUT_SECS),
            )
            .await?;

            installer::install_cluster(&nodes, &options, &key).await?;
            installer::validate_cluster(&nodes, &options, &key).await?;
            Ok(())
        },
    )
    .await?;
    Ok(())
}

/// Install, validate, and reset a single node, then confirm the reset left no
/// cluster artifacts behind.
pub async fn mini_install_validate_reset(
    provisioner: Arc<dyn InfrastructureProvisioner>,
    os: OperatingSystem,
) -> Result<(), ScenarioError> {
    with_mini_infrastructure(os, provisioner.as_ref(), |node, key| async move {
        let options = InstallOptions::default();
        let nodes = single_node_cluster(node.clone());

        installer::install_cluster(&nodes, &options, &key).await?;
        installer::validate_cluster(&nodes, &options, &key).await?;
        installer::reset_node(&node, &key).await?;

        let leftover = ssh::exec(&node, &key, "test -e /etc/kubernetes").await?;
        if leftover.success() {
            return Err(ScenarioError::assertion(
                "reset",
                "cluster artifacts remained after reset",
            ));
        }
        Ok(())
    })
    .await?;
    Ok(())
}

/// Install on a node with a dedicated docker storage device and confirm the
/// expected storage driver is active.
pub async fn block_device_install(
    provisioner: Arc<dyn InfrastructureProvisioner>,
    os: OperatingSystem,
) -> Result<(), ScenarioError> {
    let driver = match os {
        OperatingSystem::Ubuntu1604 => "overlay2",
        OperatingSystem::CentOs7 | OperatingSystem::RedHat7 => "devicemapper",
    };

    with_mini_infrastructure_and_block_device(os, provisioner.as_ref(), |node, key| async move {
        let options = InstallOptions {
            docker_storage_driver: Some(driver.into()),
            ..Default::default()
        };
        let nodes = single_node_cluster(node.clone());

        installer::install_cluster(&nodes, &options, &key).await?;
        installer::validate_cluster(&nodes, &options, &key).await?;

        let docker_info = ssh::exec_ok(&node, &key, "sudo docker info").await?;
        if !docker_info.stdout.contains(driver) {
            return Err(ScenarioError::assertion(
                "docker storage driver",
                format!("docker info does not report {driver}"),
            ));
        }
        Ok(())
    })
    .await?;
    Ok(())
}

/// Generate the default plan template and verify its per-role counts.
///
/// Needs no infrastructure: only the installer binary.
pub async fn plan_defaults() -> Result<(), ScenarioError> {
    let stdout = installer::generate_plan().await?;
    info!(bytes = stdout.len(), "plan template generated");

    let plan = ClusterPlan::load(config::PLAN_FILE)?;
    plan.verify_expected_counts(&config::default_plan_shape())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::NodeRole;

    #[test]
    fn single_node_cluster_carries_three_roles() {
        let node = NodeDescriptor {
            id: "n-1".into(),
            hostname: "solo".into(),
            public_ip: "198.51.100.1".into(),
            private_ip: "10.0.0.1".into(),
            ssh_user: "ubuntu".into(),
            role: NodeRole::Worker,
        };

        let nodes = single_node_cluster(node);
        assert_eq!(nodes.etcd.len(), 1);
        assert_eq!(nodes.master.len(), 1);
        assert_eq!(nodes.worker.len(), 1);
        assert!(nodes.ingress.is_empty());
        assert!(nodes.storage.is_empty());
        // Same machine everywhere.
        assert_eq!(nodes.etcd[0].id, nodes.worker[0].id);
    }
}
