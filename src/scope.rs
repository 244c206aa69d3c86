//! Infrastructure scopes: provision, hand off, and always tear down.
//!
//! A scope acquires nodes matching a requested shape, invokes a
//! caller-supplied workflow with them, and deprovisions every node on every
//! exit path — normal return, reported failure, or panic. Teardown is
//! best-effort per node: one node's failure never suppresses the rest, and
//! teardown failures surface as warnings on the scope report rather than
//! converting a passing scenario into a failing one.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::provision::{
    InfrastructureProvisioner, NodeCount, NodeDescriptor, OperatingSystem, ProvisionError,
    ProvisionRequest, ProvisionedNodeSet, ProvisionedNodes, SshKey,
};
use crate::suite::ScenarioError;

/// Errors from DNS record management.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The DNS command could not be spawned.
    #[error("dns command spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// A DNS operation exited non-zero.
    #[error("dns {operation} failed for {name}: exit={exit_code}, stderr={stderr}")]
    Failed {
        /// Which operation was running.
        operation: String,
        /// Record name involved.
        name: String,
        /// Exit code from the command.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },
}

/// One registered DNS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Record name.
    pub name: String,
    /// Address the record points at.
    pub ip: String,
}

/// The records a scope registered, kept for removal during teardown.
#[derive(Debug, Clone, Default)]
pub struct DnsRecordSet {
    /// Registered records, in registration order.
    pub records: Vec<DnsRecord>,
}

/// Capability to register and remove DNS records for provisioned nodes.
///
/// Registration is per node so the scope can track exactly which records
/// exist and remove them during teardown — including records created before
/// a mid-batch registration failure.
#[async_trait]
pub trait DnsRegistrar: Send + Sync {
    /// Register a record for one node.
    async fn register(&self, node: &NodeDescriptor) -> Result<DnsRecord, DnsError>;

    /// Remove previously registered records. Implementations should attempt
    /// every record even if one removal fails.
    async fn remove(&self, records: &DnsRecordSet) -> Result<(), DnsError>;
}

/// DNS registrar adapter that shells out to an external command.
pub struct CommandDnsRegistrar {
    command: PathBuf,
}

impl CommandDnsRegistrar {
    /// Create an adapter around the given command.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, operation: &str, name: &str, args: &[String]) -> Result<(), DnsError> {
        let output = tokio::process::Command::new(&self.command)
            .arg(operation)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(DnsError::Failed {
                operation: operation.to_string(),
                name: name.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DnsRegistrar for CommandDnsRegistrar {
    async fn register(&self, node: &NodeDescriptor) -> Result<DnsRecord, DnsError> {
        self.run(
            "register",
            &node.hostname,
            &[
                format!("--name={}", node.hostname),
                format!("--ip={}", node.public_ip),
            ],
        )
        .await?;
        Ok(DnsRecord {
            name: node.hostname.clone(),
            ip: node.public_ip.clone(),
        })
    }

    async fn remove(&self, records: &DnsRecordSet) -> Result<(), DnsError> {
        let mut first_error = None;
        for record in &records.records {
            let result = self
                .run("remove", &record.name, &[format!("--name={}", record.name)])
                .await;
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// What a completed scope hands back alongside the body's success.
#[derive(Debug, Default)]
pub struct ScopeReport {
    /// Teardown problems, already logged, attached for operator follow-up.
    /// Never converts a passing scenario into a failing one.
    pub teardown_warnings: Vec<String>,
}

/// Provision nodes matching `shape`, run `body`, and always tear down.
///
/// The body receives its own copy of the node set plus the SSH key; the
/// scope keeps the authoritative set and deprovisions every node it
/// provisioned — including nodes the body never used — on every exit path.
/// A body panic is re-raised after teardown completes.
pub async fn with_infrastructure<F, Fut>(
    shape: NodeCount,
    os: OperatingSystem,
    provisioner: &dyn InfrastructureProvisioner,
    body: F,
) -> Result<ScopeReport, ScenarioError>
where
    F: FnOnce(ProvisionedNodes, SshKey) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    let request = ProvisionRequest {
        shape,
        os,
        with_block_device: false,
    };
    run_scope(provisioner, request, None, move |set| {
        body(set.nodes, set.ssh_key)
    })
    .await
}

/// Single-node variant: one machine carries every role.
pub async fn with_mini_infrastructure<F, Fut>(
    os: OperatingSystem,
    provisioner: &dyn InfrastructureProvisioner,
    body: F,
) -> Result<ScopeReport, ScenarioError>
where
    F: FnOnce(NodeDescriptor, SshKey) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    let request = ProvisionRequest {
        shape: NodeCount::single_node(),
        os,
        with_block_device: false,
    };
    run_scope(provisioner, request, None, move |set| {
        run_mini_body(set, body)
    })
    .await
}

/// Single-node variant with a raw block device attached before the body runs.
pub async fn with_mini_infrastructure_and_block_device<F, Fut>(
    os: OperatingSystem,
    provisioner: &dyn InfrastructureProvisioner,
    body: F,
) -> Result<ScopeReport, ScenarioError>
where
    F: FnOnce(NodeDescriptor, SshKey) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    let request = ProvisionRequest {
        shape: NodeCount::single_node(),
        os,
        with_block_device: true,
    };
    run_scope(provisioner, request, None, move |set| {
        run_mini_body(set, body)
    })
    .await
}

/// DNS-enabled variant: registers a record per node before the body and
/// removes the records during teardown. Used by scenarios that need stable
/// hostnames, such as master replacement.
pub async fn with_infrastructure_and_dns<F, Fut>(
    shape: NodeCount,
    os: OperatingSystem,
    provisioner: &dyn InfrastructureProvisioner,
    dns: &dyn DnsRegistrar,
    body: F,
) -> Result<ScopeReport, ScenarioError>
where
    F: FnOnce(ProvisionedNodes, SshKey) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    let request = ProvisionRequest {
        shape,
        os,
        with_block_device: false,
    };
    run_scope(provisioner, request, Some(dns), move |set| {
        body(set.nodes, set.ssh_key)
    })
    .await
}

async fn run_mini_body<F, Fut>(set: ProvisionedNodeSet, body: F) -> Result<(), ScenarioError>
where
    F: FnOnce(NodeDescriptor, SshKey) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    match set.nodes.all().next().cloned() {
        Some(node) => body(node, set.ssh_key).await,
        None => Err(ScenarioError::assertion(
            "mini scope",
            "provisioner returned no nodes",
        )),
    }
}

async fn run_scope<F, Fut>(
    provisioner: &dyn InfrastructureProvisioner,
    request: ProvisionRequest,
    dns: Option<&dyn DnsRegistrar>,
    body: F,
) -> Result<ScopeReport, ScenarioError>
where
    F: FnOnce(ProvisionedNodeSet) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    let scope_id = Uuid::new_v4().as_simple().to_string();
    let setup_error = |source: ProvisionError| ScenarioError::Setup {
        shape: request.shape,
        provider: provisioner.name().to_string(),
        source,
    };

    info!(
        scope = %scope_id,
        shape = %request.shape,
        os = %request.os,
        provider = provisioner.name(),
        "acquiring infrastructure"
    );
    let set = provisioner.provision(&request).await.map_err(setup_error)?;

    // No partial node set is ever handed to the body: the per-role counts
    // must match, not just the total.
    if let Err(source) = set.nodes.verify_shape(&request.shape) {
        let warnings = teardown(provisioner, &set, None).await;
        log_warnings(&scope_id, &warnings);
        return Err(setup_error(source));
    }

    let dns_records = match dns {
        Some(registrar) => {
            let mut records = DnsRecordSet::default();
            let mut register_error = None;
            for node in set.nodes.all() {
                match registrar.register(node).await {
                    Ok(record) => records.records.push(record),
                    Err(err) => {
                        register_error = Some(err);
                        break;
                    }
                }
            }
            // A mid-batch failure still removes the records created so far.
            if let Some(err) = register_error {
                let warnings = teardown(provisioner, &set, Some((registrar, &records))).await;
                log_warnings(&scope_id, &warnings);
                return Err(ScenarioError::DnsSetup(err));
            }
            Some(records)
        }
        None => None,
    };

    let outcome = AssertUnwindSafe(body(set.clone())).catch_unwind().await;

    let dns_cleanup = dns.zip(dns_records.as_ref());
    let warnings = teardown(provisioner, &set, dns_cleanup).await;
    log_warnings(&scope_id, &warnings);
    info!(scope = %scope_id, "infrastructure released");

    match outcome {
        Err(payload) => std::panic::resume_unwind(payload),
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => Ok(ScopeReport {
            teardown_warnings: warnings,
        }),
    }
}

/// Best-effort teardown: attempt every node and every DNS record, collect
/// failures as warnings.
async fn teardown(
    provisioner: &dyn InfrastructureProvisioner,
    set: &ProvisionedNodeSet,
    dns: Option<(&dyn DnsRegistrar, &DnsRecordSet)>,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some((registrar, records)) = dns {
        if let Err(err) = registrar.remove(records).await {
            warnings.push(format!("failed to remove dns records: {err}"));
        }
    }

    for node in set.nodes.all() {
        if let Err(err) = provisioner.deprovision(node).await {
            warnings.push(format!("failed to deprovision node {}: {err}", node.id));
        }
    }

    warnings
}

fn log_warnings(scope_id: &str, warnings: &[String]) {
    for warning in warnings {
        warn!(scope = %scope_id, "{warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::NodeRole;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Fake provisioner that counts provision/deprovision calls.
    struct CountingProvisioner {
        provisioned: AtomicU32,
        deprovision_attempts: AtomicU32,
        fail_provision: bool,
        fail_first_deprovision: AtomicBool,
        short_by: u32,
        shift_workers_to_storage: u32,
        saw_block_device: AtomicBool,
    }

    impl CountingProvisioner {
        fn new() -> Self {
            Self {
                provisioned: AtomicU32::new(0),
                deprovision_attempts: AtomicU32::new(0),
                fail_provision: false,
                fail_first_deprovision: AtomicBool::new(false),
                short_by: 0,
                shift_workers_to_storage: 0,
                saw_block_device: AtomicBool::new(false),
            }
        }

        fn failing_provision() -> Self {
            Self {
                fail_provision: true,
                ..Self::new()
            }
        }

        fn node(role: NodeRole, index: u32) -> NodeDescriptor {
            NodeDescriptor {
                id: format!("{role}-{index}"),
                hostname: format!("{role}-{index}.test.internal"),
                public_ip: format!("198.51.100.{index}"),
                private_ip: format!("10.0.0.{index}"),
                ssh_user: "ubuntu".into(),
                role,
            }
        }
    }

    #[async_trait]
    impl InfrastructureProvisioner for CountingProvisioner {
        fn name(&self) -> &str {
            "counting"
        }

        async fn provision(
            &self,
            request: &ProvisionRequest,
        ) -> Result<ProvisionedNodeSet, ProvisionError> {
            if self.fail_provision {
                return Err(ProvisionError::Failed {
                    operation: "provision".into(),
                    exit_code: 1,
                    stderr: "quota exceeded".into(),
                });
            }
            self.saw_block_device
                .store(request.with_block_device, Ordering::SeqCst);

            let shape = request.shape;
            let mut index = 0;
            let mut group = |role: NodeRole, count: u32| -> Vec<NodeDescriptor> {
                (0..count)
                    .map(|_| {
                        index += 1;
                        Self::node(role, index)
                    })
                    .collect()
            };
            let mut nodes = ProvisionedNodes {
                etcd: group(NodeRole::Etcd, shape.etcd),
                master: group(NodeRole::Master, shape.master),
                worker: group(NodeRole::Worker, shape.worker),
                ingress: group(NodeRole::Ingress, shape.ingress),
                storage: group(NodeRole::Storage, shape.storage),
            };
            for _ in 0..self.short_by {
                nodes.worker.pop();
            }
            for _ in 0..self.shift_workers_to_storage {
                if let Some(node) = nodes.worker.pop() {
                    nodes.storage.push(node);
                }
            }
            self.provisioned.store(nodes.count(), Ordering::SeqCst);
            Ok(ProvisionedNodeSet {
                nodes,
                ssh_key: SshKey::new("/tmp/counting-key.pem"),
            })
        }

        async fn deprovision(&self, _node: &NodeDescriptor) -> Result<(), ProvisionError> {
            self.deprovision_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_deprovision.swap(false, Ordering::SeqCst) {
                return Err(ProvisionError::Failed {
                    operation: "deprovision".into(),
                    exit_code: 1,
                    stderr: "instance busy".into(),
                });
            }
            Ok(())
        }

        async fn terminate_node(&self, _node: &NodeDescriptor) -> Result<(), ProvisionError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn deprovisions_every_node_on_success() {
        let provisioner = CountingProvisioner::new();
        let report = with_infrastructure(
            NodeCount::all_roles(),
            OperatingSystem::Ubuntu1604,
            &provisioner,
            |nodes, _key| async move {
                assert_eq!(nodes.count(), 5);
                Ok(())
            },
        )
        .await
        .expect("scope passes");

        assert_eq!(provisioner.provisioned.load(Ordering::SeqCst), 5);
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 5);
        assert!(report.teardown_warnings.is_empty());
    }

    #[tokio::test]
    async fn deprovisions_every_node_when_body_fails() {
        let provisioner = CountingProvisioner::new();
        let err = with_infrastructure(
            NodeCount::all_roles(),
            OperatingSystem::Ubuntu1604,
            &provisioner,
            |_nodes, _key| async {
                Err(ScenarioError::assertion("install", "exit code 1"))
            },
        )
        .await
        .expect_err("body failure propagates");

        assert!(err.to_string().contains("install"));
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 5);
    }

    async fn exploding_body(
        _nodes: ProvisionedNodes,
        _key: SshKey,
    ) -> Result<(), ScenarioError> {
        panic!("body exploded")
    }

    #[tokio::test]
    async fn deprovisions_every_node_when_body_panics() {
        let provisioner = CountingProvisioner::new();
        let scope = with_infrastructure(
            NodeCount::all_roles(),
            OperatingSystem::Ubuntu1604,
            &provisioner,
            exploding_body,
        );

        let outcome = AssertUnwindSafe(scope).catch_unwind().await;
        assert!(outcome.is_err(), "panic must be re-raised");
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn provision_failure_aborts_before_body() {
        let provisioner = CountingProvisioner::failing_provision();
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_in_body = Arc::clone(&invoked);

        let err = with_infrastructure(
            NodeCount::all_roles(),
            OperatingSystem::Ubuntu1604,
            &provisioner,
            move |_nodes, _key| async move {
                invoked_in_body.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .expect_err("provision failure propagates");

        assert!(!invoked.load(Ordering::SeqCst), "body must not run");
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 0);
        match err {
            ScenarioError::Setup {
                shape, provider, ..
            } => {
                assert_eq!(shape, NodeCount::all_roles());
                assert_eq!(provider, "counting");
            }
            other => panic!("expected setup failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn one_failed_deprovision_does_not_suppress_the_rest() {
        let provisioner = CountingProvisioner::new();
        provisioner
            .fail_first_deprovision
            .store(true, Ordering::SeqCst);

        let report = with_infrastructure(
            NodeCount::all_roles(),
            OperatingSystem::Ubuntu1604,
            &provisioner,
            |_nodes, _key| async { Ok(()) },
        )
        .await
        .expect("teardown warnings never fail the scope");

        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 5);
        assert_eq!(report.teardown_warnings.len(), 1);
        assert!(report.teardown_warnings[0].contains("instance busy"));
    }

    #[tokio::test]
    async fn partial_node_set_is_torn_down_and_reported_as_setup_failure() {
        let provisioner = CountingProvisioner {
            short_by: 2,
            ..CountingProvisioner::new()
        };

        let err = with_infrastructure(
            NodeCount {
                etcd: 1,
                master: 1,
                worker: 3,
                ingress: 0,
                storage: 0,
            },
            OperatingSystem::Ubuntu1604,
            &provisioner,
            |_nodes, _key| async { Ok(()) },
        )
        .await
        .expect_err("partial set must abort");

        match err {
            ScenarioError::Setup {
                source: ProvisionError::IncompleteNodeSet { requested, got },
                ..
            } => {
                assert_eq!(requested, 5);
                assert_eq!(got, 3);
            }
            other => panic!("expected incomplete set, got {other}"),
        }
        // The nodes that did come back still get released.
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn skewed_role_distribution_is_a_setup_failure() {
        // Right total, wrong distribution: three of the requested workers
        // come back as storage nodes.
        let provisioner = CountingProvisioner {
            shift_workers_to_storage: 3,
            ..CountingProvisioner::new()
        };
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_in_body = Arc::clone(&invoked);

        let err = with_infrastructure(
            NodeCount {
                etcd: 3,
                master: 2,
                worker: 5,
                ingress: 2,
                storage: 2,
            },
            OperatingSystem::Ubuntu1604,
            &provisioner,
            move |_nodes, _key| async move {
                invoked_in_body.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .expect_err("skewed set must abort");

        assert!(!invoked.load(Ordering::SeqCst), "body must not run");
        match err {
            ScenarioError::Setup {
                source:
                    ProvisionError::RoleMismatch {
                        role,
                        requested,
                        got,
                    },
                ..
            } => {
                assert_eq!(role, "worker");
                assert_eq!(requested, 5);
                assert_eq!(got, 2);
            }
            other => panic!("expected role mismatch, got {other}"),
        }
        // Everything the provisioner returned still gets released.
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 14);
    }

    #[tokio::test]
    async fn mini_scope_hands_over_a_single_node() {
        let provisioner = CountingProvisioner::new();
        with_mini_infrastructure(
            OperatingSystem::CentOs7,
            &provisioner,
            |node, _key| async move {
                assert_eq!(node.role, NodeRole::Worker);
                Ok(())
            },
        )
        .await
        .expect("mini scope passes");

        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn block_device_scope_requests_a_volume() {
        let provisioner = CountingProvisioner::new();
        with_mini_infrastructure_and_block_device(
            OperatingSystem::RedHat7,
            &provisioner,
            |_node, _key| async { Ok(()) },
        )
        .await
        .expect("block device scope passes");

        assert!(provisioner.saw_block_device.load(Ordering::SeqCst));
    }

    /// DNS registrar that records event ordering.
    struct RecordingDns {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl DnsRegistrar for RecordingDns {
        async fn register(&self, node: &NodeDescriptor) -> Result<DnsRecord, DnsError> {
            self.events
                .lock()
                .expect("events poisoned")
                .push("register");
            Ok(DnsRecord {
                name: node.hostname.clone(),
                ip: node.public_ip.clone(),
            })
        }

        async fn remove(&self, _records: &DnsRecordSet) -> Result<(), DnsError> {
            self.events.lock().expect("events poisoned").push("remove");
            Ok(())
        }
    }

    #[tokio::test]
    async fn dns_scope_registers_before_body_and_removes_after() {
        let provisioner = CountingProvisioner::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let dns = RecordingDns {
            events: Arc::clone(&events),
        };
        let events_in_body = Arc::clone(&events);

        with_infrastructure_and_dns(
            NodeCount {
                etcd: 1,
                master: 2,
                worker: 1,
                ingress: 1,
                storage: 0,
            },
            OperatingSystem::Ubuntu1604,
            &provisioner,
            &dns,
            move |_nodes, _key| async move {
                events_in_body
                    .lock()
                    .expect("events poisoned")
                    .push("body");
                Ok(())
            },
        )
        .await
        .expect("dns scope passes");

        let order = events.lock().expect("events poisoned").clone();
        let mut expected = vec!["register"; 5];
        expected.extend(["body", "remove"]);
        assert_eq!(order, expected);
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 5);
    }

    /// DNS registrar that fails after a fixed number of registrations and
    /// records which record names get removed.
    struct FlakyDns {
        registrations_before_failure: usize,
        registered: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DnsRegistrar for FlakyDns {
        async fn register(&self, node: &NodeDescriptor) -> Result<DnsRecord, DnsError> {
            let mut registered = self.registered.lock().expect("registered poisoned");
            if registered.len() >= self.registrations_before_failure {
                return Err(DnsError::Failed {
                    operation: "register".into(),
                    name: node.hostname.clone(),
                    exit_code: 1,
                    stderr: "zone busy".into(),
                });
            }
            registered.push(node.hostname.clone());
            Ok(DnsRecord {
                name: node.hostname.clone(),
                ip: node.public_ip.clone(),
            })
        }

        async fn remove(&self, records: &DnsRecordSet) -> Result<(), DnsError> {
            let mut removed = self.removed.lock().expect("removed poisoned");
            for record in &records.records {
                removed.push(record.name.clone());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_dns_setup_removes_partially_registered_records() {
        let provisioner = CountingProvisioner::new();
        let dns = FlakyDns {
            registrations_before_failure: 1,
            registered: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        };

        let err = with_infrastructure_and_dns(
            NodeCount {
                etcd: 1,
                master: 1,
                worker: 0,
                ingress: 0,
                storage: 0,
            },
            OperatingSystem::Ubuntu1604,
            &provisioner,
            &dns,
            |_nodes, _key| async { Ok(()) },
        )
        .await
        .expect_err("second registration fails");

        assert!(matches!(err, ScenarioError::DnsSetup(_)));
        // The record created before the failure is removed, and the nodes
        // are still deprovisioned.
        let registered = dns.registered.lock().expect("registered poisoned").clone();
        let removed = dns.removed.lock().expect("removed poisoned").clone();
        assert_eq!(registered, removed);
        assert_eq!(removed.len(), 1);
        assert_eq!(provisioner.deprovision_attempts.load(Ordering::SeqCst), 2);
    }
}
