//! The cluster battery: one large install, many deferred checks.
//!
//! Provisioning a full multi-role cluster dominates the cost of everything
//! verified against it, so the battery installs once and then runs a batch of
//! deferred sub-checks: node additions, ingress traffic, metrics storage,
//! node labels, component overrides, and validation idempotency.

use std::sync::Arc;

use tracing::info;

use crate::installer::{self, InstallOptions};
use crate::provision::{
    InfrastructureProvisioner, NodeCount, NodeDescriptor, OperatingSystem, ProvisionedNodes,
    SshKey,
};
use crate::scope::with_infrastructure;
use crate::ssh;
use crate::subtests::run_with_checks;
use crate::suite::ScenarioError;

const KUBECTL: &str = "sudo kubectl --kubeconfig /etc/kubernetes/admin.conf";

/// Shape of the battery cluster. Three of the workers are held back from the
/// initial install so the add-node checks have machines to add.
const BATTERY_SHAPE: NodeCount = NodeCount {
    etcd: 3,
    master: 2,
    worker: 5,
    ingress: 2,
    storage: 2,
};

const RESERVED_WORKERS: usize = 3;

const TEST_LABEL: &str = "integration-test/worker=true";

/// Battery with calico, verbose component overrides, and a metrics volume.
pub async fn calico_battery(
    provisioner: Arc<dyn InfrastructureProvisioner>,
) -> Result<(), ScenarioError> {
    let mut options = InstallOptions {
        cni_provider: Some("calico".into()),
        metrics_replicas: Some(2),
        metrics_pvc: Some("metrics-pvc".into()),
        ..Default::default()
    };
    options.api_server_options.insert("v".into(), "3".into());
    options
        .controller_manager_options
        .insert("v".into(), "3".into());
    options.scheduler_options.insert("v".into(), "3".into());
    options.proxy_options.insert("v".into(), "3".into());
    options.agent_options.insert("v".into(), "3".into());

    run_battery(provisioner, options, "cluster battery (calico)").await
}

/// Battery with the weave CNI provider.
pub async fn weave_battery(
    provisioner: Arc<dyn InfrastructureProvisioner>,
) -> Result<(), ScenarioError> {
    let options = InstallOptions {
        cni_provider: Some("weave".into()),
        ..Default::default()
    };
    run_battery(provisioner, options, "cluster battery (weave)").await
}

/// Battery with the coredns cluster DNS provider.
pub async fn coredns_battery(
    provisioner: Arc<dyn InfrastructureProvisioner>,
) -> Result<(), ScenarioError> {
    let options = InstallOptions {
        dns_provider: Some("coredns".into()),
        ..Default::default()
    };
    run_battery(provisioner, options, "cluster battery (coredns)").await
}

async fn run_battery(
    provisioner: Arc<dyn InfrastructureProvisioner>,
    options: InstallOptions,
    label: &'static str,
) -> Result<(), ScenarioError> {
    with_infrastructure(
        BATTERY_SHAPE,
        OperatingSystem::Ubuntu1604,
        provisioner.as_ref(),
        move |mut nodes, key| async move {
            let reserved = nodes.worker.split_off(nodes.worker.len() - RESERVED_WORKERS);
            let [extra_worker, extra_ingress, extra_storage]: [NodeDescriptor; 3] =
                match reserved.try_into() {
                    Ok(pool) => pool,
                    Err(_) => {
                        return Err(ScenarioError::assertion(
                            label,
                            "reserved worker pool was not three nodes",
                        ))
                    }
                };

            installer::install_cluster(&nodes, &options, &key).await?;
            installer::validate_cluster(&nodes, &options, &key).await?;

            let aggregate = run_with_checks(label, move |sub| async move {
                register_checks(
                    &sub,
                    nodes,
                    key,
                    options,
                    extra_worker,
                    extra_ingress,
                    extra_storage,
                )?;
                Ok(())
            })
            .await?;

            info!(
                battery = label,
                checks = aggregate.outcomes().len(),
                "battery finished"
            );
            Ok(())
        },
    )
    .await?;
    Ok(())
}

fn register_checks(
    sub: &crate::subtests::SubDescribe,
    nodes: ProvisionedNodes,
    key: SshKey,
    options: InstallOptions,
    extra_worker: NodeDescriptor,
    extra_ingress: NodeDescriptor,
    extra_storage: NodeDescriptor,
) -> Result<(), ScenarioError> {
    let master = nodes
        .master
        .first()
        .cloned()
        .ok_or_else(|| ScenarioError::assertion("battery", "no master node provisioned"))?;
    let ingress = nodes
        .ingress
        .first()
        .cloned()
        .ok_or_else(|| ScenarioError::assertion("battery", "no ingress node provisioned"))?;

    {
        let (node, key) = (extra_worker, key.clone());
        sub.it("adds a worker node with the test label", move || async move {
            installer::add_node_to_cluster(&node, &key, &[TEST_LABEL], &[]).await?;
            Ok(())
        });
    }

    {
        let (node, key) = (extra_ingress, key.clone());
        sub.it("adds an ingress node", move || async move {
            installer::add_node_to_cluster(&node, &key, &[], &["ingress"]).await?;
            Ok(())
        });
    }

    {
        let (node, key) = (extra_storage, key.clone());
        sub.it("adds a storage node", move || async move {
            installer::add_node_to_cluster(&node, &key, &[], &["storage"]).await?;
            Ok(())
        });
    }

    {
        let (master, key) = (master.clone(), key.clone());
        sub.it("applies the test label to the added worker", move || async move {
            let listing =
                ssh::exec_ok(&master, &key, &format!("{KUBECTL} get nodes --show-labels"))
                    .await?;
            if !listing.stdout.contains(TEST_LABEL) {
                return Err(ScenarioError::assertion(
                    "node labels",
                    format!("added worker is missing label {TEST_LABEL}"),
                ));
            }
            Ok(())
        });
    }

    {
        let (ingress, key) = (ingress, key.clone());
        sub.it("serves traffic through the ingress node", move || async move {
            ssh::exec_ok(&ingress, &key, "curl -sS -o /dev/null http://127.0.0.1/").await?;
            Ok(())
        });
    }

    {
        let (master, key) = (master.clone(), key.clone());
        sub.it("enforces network policies", move || async move {
            let policy = r#"{"apiVersion":"networking.k8s.io/v1","kind":"NetworkPolicy","metadata":{"name":"deny-all","namespace":"default"},"spec":{"podSelector":{}}}"#;
            ssh::exec_ok(
                &master,
                &key,
                &format!("echo '{policy}' | {KUBECTL} apply -f -"),
            )
            .await?;
            ssh::exec_ok(
                &master,
                &key,
                &format!("{KUBECTL} -n default delete networkpolicy deny-all"),
            )
            .await?;
            Ok(())
        });
    }

    {
        let (master, key) = (master.clone(), key.clone());
        sub.it("installs the package manager", move || async move {
            ssh::exec_ok(&master, &key, "sudo helm version").await?;
            Ok(())
        });
    }

    {
        let (master, key) = (master.clone(), key.clone());
        sub.it("runs a healthy pod network", move || async move {
            let pods =
                ssh::exec_ok(&master, &key, &format!("{KUBECTL} get pods -n kube-system"))
                    .await?;
            if pods.stdout.contains("CrashLoopBackOff") || pods.stdout.contains("Error") {
                return Err(ScenarioError::assertion(
                    "pod network",
                    "unhealthy pods in kube-system",
                ));
            }
            Ok(())
        });
    }

    if options.metrics_pvc.is_some() {
        let (master, key) = (master.clone(), key.clone());
        sub.it("binds the metrics store to its volume claim", move || async move {
            let claims =
                ssh::exec_ok(&master, &key, &format!("{KUBECTL} get pvc -n kube-system"))
                    .await?;
            if !claims.stdout.contains("Bound") {
                return Err(ScenarioError::assertion(
                    "metrics pvc",
                    "no bound volume claim in kube-system",
                ));
            }
            Ok(())
        });
    }

    if !options.api_server_options.is_empty() {
        let (master, key) = (master.clone(), key.clone());
        let overrides = options.api_server_options.clone();
        sub.it("applies api server overrides", move || async move {
            let processes = ssh::exec_ok(
                &master,
                &key,
                "ps aux | grep kube-apiserver | grep -v grep",
            )
            .await?;
            for (flag, value) in &overrides {
                let rendered = format!("--{flag}={value}");
                if !processes.stdout.contains(&rendered) {
                    return Err(ScenarioError::assertion(
                        "component overrides",
                        format!("api server is not running with {rendered}"),
                    ));
                }
            }
            Ok(())
        });
    }

    sub.it("validates idempotently against the running cluster", move || async move {
        installer::validate_cluster(&nodes, &options, &key).await?;
        Ok(())
    });

    Ok(())
}
