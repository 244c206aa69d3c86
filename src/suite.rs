//! Scenario model, capability-conditional registration, and the suite runner.
//!
//! Scenarios are registered against a [`ProviderCapability`]; if the
//! capability's environment is absent the scenario is recorded as skipped at
//! registration time and its body is never invoked. The suite executes active
//! scenarios sequentially, capturing panics so one scenario cannot abort the
//! run, and reduces everything to a single exit status.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tracing::{info, warn};

use crate::installer::InstallerError;
use crate::plan::PlanError;
use crate::provision::{InfrastructureProvisioner, NodeCount, ProvisionError};
use crate::scope::DnsError;
use crate::ssh::SshError;

/// Why a scenario failed.
///
/// The taxonomy separates infrastructure-setup failures from assertion
/// failures so that a quota problem never reads like a product bug.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Provisioning did not complete; the scenario body never ran.
    #[error("infrastructure setup failed for shape {shape} on {provider}: {source}")]
    Setup {
        /// Requested shape.
        shape: NodeCount,
        /// Provider name.
        provider: String,
        /// Underlying provisioning error.
        #[source]
        source: ProvisionError,
    },

    /// DNS record registration did not complete; the scenario body never ran.
    #[error("dns setup failed: {0}")]
    DnsSetup(#[source] DnsError),

    /// An operation expected to fail fast exceeded its deadline.
    #[error("operation did not complete within {deadline:?} (elapsed {elapsed:?})")]
    Timeout {
        /// Configured deadline.
        deadline: Duration,
        /// Observed elapsed time when the race was abandoned.
        elapsed: Duration,
    },

    /// A named check did not hold.
    #[error("check '{name}' failed: {reason}")]
    Assertion {
        /// Check name.
        name: String,
        /// Why it failed.
        reason: String,
    },

    /// One or more deferred sub-checks failed.
    #[error("sub-checks '{label}' failed: {summary}")]
    Checks {
        /// Aggregator label.
        label: String,
        /// Every failing check, by name and reason.
        summary: String,
    },

    /// Installer invocation failed.
    #[error(transparent)]
    Installer(#[from] InstallerError),

    /// Remote command execution failed.
    #[error(transparent)]
    Ssh(#[from] SshError),

    /// Plan artifact handling failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// A mid-scenario provisioner operation failed (e.g. terminate_node).
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl ScenarioError {
    /// Build an assertion failure.
    pub fn assertion(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Assertion {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// An externally available precondition gating whether a scenario can run,
/// bound to the provisioner handle scenarios receive when it holds.
pub struct ProviderCapability {
    name: String,
    required_env: Vec<String>,
    provisioner: Arc<dyn InfrastructureProvisioner>,
}

impl ProviderCapability {
    /// Create a capability requiring every listed env var to be present and
    /// non-empty.
    pub fn new(
        name: impl Into<String>,
        required_env: &[&str],
        provisioner: Arc<dyn InfrastructureProvisioner>,
    ) -> Self {
        Self {
            name: name.into(),
            required_env: required_env.iter().map(|s| s.to_string()).collect(),
            provisioner,
        }
    }

    /// Capability name, used in skip reasons.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which required env vars are missing or empty right now.
    pub fn missing_env(&self) -> Vec<String> {
        self.required_env
            .iter()
            .filter(|var| match std::env::var(var) {
                Ok(value) => value.is_empty(),
                Err(_) => true,
            })
            .cloned()
            .collect()
    }

    /// Whether the capability is available.
    pub fn available(&self) -> bool {
        self.missing_env().is_empty()
    }

    /// The provisioner handle, if the capability is available.
    pub fn acquire(&self) -> Option<Arc<dyn InfrastructureProvisioner>> {
        if self.available() {
            Some(Arc::clone(&self.provisioner))
        } else {
            None
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioStatus {
    /// Every assertion held.
    Passed,
    /// At least one failure, with reasons.
    Failed(Vec<String>),
    /// The scenario's capability was unavailable; the body never ran.
    Skipped(String),
}

/// Report for one executed (or skipped) scenario.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Scenario description.
    pub name: String,
    /// Outcome.
    pub status: ScenarioStatus,
    /// Wall-clock duration (zero for skips).
    pub duration: Duration,
}

type ScenarioBody = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ScenarioError>> + Send>;

enum Registered {
    Active { name: String, body: ScenarioBody },
    Skipped { name: String, reason: String },
}

/// A named collection of scenarios, executed sequentially.
pub struct Suite {
    name: String,
    scenarios: Vec<Registered>,
}

impl Suite {
    /// Create an empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenarios: Vec::new(),
        }
    }

    /// Number of registered scenarios (active and skipped).
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Whether the suite has no scenarios.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Register an unconditional scenario.
    pub fn it<F, Fut>(&mut self, description: &str, body: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), ScenarioError>> + Send + 'static,
    {
        self.scenarios.push(Registered::Active {
            name: description.to_string(),
            body: Box::new(move || body().boxed()),
        });
    }

    /// Register a scenario only if `capability` is available.
    ///
    /// When the capability's environment is absent the scenario is recorded
    /// as skipped — reported distinctly from pass and fail — and `body` is
    /// never invoked. Otherwise `body` receives the capability's provisioner
    /// handle at execution time.
    pub fn it_on<F, Fut>(&mut self, capability: &ProviderCapability, description: &str, body: F)
    where
        F: FnOnce(Arc<dyn InfrastructureProvisioner>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), ScenarioError>> + Send + 'static,
    {
        match capability.acquire() {
            Some(provisioner) => self.scenarios.push(Registered::Active {
                name: description.to_string(),
                body: Box::new(move || body(provisioner).boxed()),
            }),
            None => {
                let reason = format!(
                    "capability '{}' unavailable (missing env: {})",
                    capability.name(),
                    capability.missing_env().join(", ")
                );
                self.scenarios.push(Registered::Skipped {
                    name: description.to_string(),
                    reason,
                });
            }
        }
    }

    /// Execute every scenario sequentially and collect the outcomes.
    ///
    /// A panicking scenario is recorded as a failure; it does not abort the
    /// rest of the suite.
    pub async fn run(self) -> SuiteReport {
        info!(suite = %self.name, scenarios = self.scenarios.len(), "running suite");
        let mut reports = Vec::with_capacity(self.scenarios.len());

        for scenario in self.scenarios {
            match scenario {
                Registered::Skipped { name, reason } => {
                    info!(scenario = %name, %reason, "skipped");
                    reports.push(ScenarioReport {
                        name,
                        status: ScenarioStatus::Skipped(reason),
                        duration: Duration::ZERO,
                    });
                }
                Registered::Active { name, body } => {
                    info!(scenario = %name, "running");
                    let started = Instant::now();
                    let outcome = AssertUnwindSafe(body()).catch_unwind().await;
                    let duration = started.elapsed();

                    let status = match outcome {
                        Ok(Ok(())) => {
                            info!(scenario = %name, ?duration, "passed");
                            ScenarioStatus::Passed
                        }
                        Ok(Err(err)) => {
                            warn!(scenario = %name, ?duration, error = %err, "failed");
                            ScenarioStatus::Failed(vec![err.to_string()])
                        }
                        Err(payload) => {
                            let reason =
                                format!("scenario panicked: {}", panic_message(payload.as_ref()));
                            warn!(scenario = %name, ?duration, %reason, "failed");
                            ScenarioStatus::Failed(vec![reason])
                        }
                    };

                    reports.push(ScenarioReport {
                        name,
                        status,
                        duration,
                    });
                }
            }
        }

        SuiteReport {
            suite: self.name,
            reports,
        }
    }
}

/// Collected outcome of a suite run.
#[derive(Debug)]
pub struct SuiteReport {
    /// Suite name.
    pub suite: String,
    /// Per-scenario reports, in execution order.
    pub reports: Vec<ScenarioReport>,
}

impl SuiteReport {
    /// True when no scenario failed (skips do not count as failures).
    pub fn passed(&self) -> bool {
        !self
            .reports
            .iter()
            .any(|r| matches!(r.status, ScenarioStatus::Failed(_)))
    }

    /// Process exit code for the runner: non-zero iff any scenario failed.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Log a one-line summary plus every failure.
    pub fn log_summary(&self) {
        let passed = self
            .reports
            .iter()
            .filter(|r| r.status == ScenarioStatus::Passed)
            .count();
        let skipped = self
            .reports
            .iter()
            .filter(|r| matches!(r.status, ScenarioStatus::Skipped(_)))
            .count();
        let failed = self.reports.len() - passed - skipped;

        info!(suite = %self.suite, passed, failed, skipped, "suite finished");
        for report in &self.reports {
            if let ScenarioStatus::Failed(reasons) = &report.status {
                for reason in reasons {
                    warn!(scenario = %report.name, %reason, "scenario failure");
                }
            }
        }
    }
}
