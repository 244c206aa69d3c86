//! Deferred sub-test aggregator.
//!
//! Provisioning a multi-role cluster dominates a scenario's cost, so the
//! verifications that run against it are collected up front and executed as
//! one batch: every registered check runs, failures are reported together,
//! and nothing stops at the first failure. [`run_with_checks`] guarantees the
//! batch executes even when the scenario body errors or panics partway
//! through registering checks, so diagnostic yield from an expensive cluster
//! is never silently lost.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{info, warn};

use crate::suite::{panic_message, ScenarioError};

type CheckFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ScenarioError>> + Send>;

/// Outcome of one registered check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Check name.
    pub name: String,
    /// `None` on pass, the failure reason otherwise.
    pub failure: Option<String>,
}

/// Collected outcome of running every registered check, in registration
/// order.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    label: String,
    outcomes: Vec<CheckOutcome>,
}

impl AggregateResult {
    /// Aggregator label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Every outcome, in registration order.
    pub fn outcomes(&self) -> &[CheckOutcome] {
        &self.outcomes
    }

    /// The failing checks, in registration order.
    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| o.failure.is_some())
    }

    /// True when every check passed.
    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Convert a failing aggregate into a scenario error naming every
    /// failing check with its reason. Returns `Ok` if everything passed.
    pub fn into_result(self) -> Result<Self, ScenarioError> {
        if self.passed() {
            return Ok(self);
        }
        let summary = self
            .failures()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.name,
                    o.failure.as_deref().unwrap_or("unknown failure")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(ScenarioError::Checks {
            label: self.label,
            summary,
        })
    }
}

/// Collects named, deferred verification closures and runs them as a batch.
///
/// `it` registers without executing; `check` runs everything registered so
/// far, in order, isolating each check's outcome (including panics) from the
/// rest. Registration goes through `&self` so a scenario body can share one
/// aggregator handle across closures.
pub struct SubDescribe {
    label: String,
    checks: Mutex<Vec<(String, CheckFn)>>,
}

impl SubDescribe {
    /// Create an aggregator with a label for the batch.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            checks: Mutex::new(Vec::new()),
        }
    }

    /// Register a named check. Does not execute it.
    pub fn it<F, Fut>(&self, name: &str, check: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ScenarioError>> + Send + 'static,
    {
        self.checks
            .lock()
            .expect("sub-check registry poisoned")
            .push((name.to_string(), Box::new(move || check().boxed())));
    }

    /// Execute every registered check, in registration order.
    ///
    /// Each outcome is captured independently: a failing or panicking check
    /// never prevents the remaining checks from running.
    pub async fn check(&self) -> AggregateResult {
        let checks: Vec<(String, CheckFn)> = {
            let mut registry = self.checks.lock().expect("sub-check registry poisoned");
            registry.drain(..).collect()
        };

        let mut outcomes = Vec::with_capacity(checks.len());
        for (name, make_check) in checks {
            let outcome = AssertUnwindSafe(make_check()).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => {
                    info!(batch = %self.label, check = %name, "sub-check passed");
                    None
                }
                Ok(Err(err)) => {
                    warn!(batch = %self.label, check = %name, error = %err, "sub-check failed");
                    Some(err.to_string())
                }
                Err(payload) => {
                    let reason = format!("check panicked: {}", panic_message(payload.as_ref()));
                    warn!(batch = %self.label, check = %name, %reason, "sub-check failed");
                    Some(reason)
                }
            };
            outcomes.push(CheckOutcome { name, failure });
        }

        AggregateResult {
            label: self.label.clone(),
            outcomes,
        }
    }
}

/// Run a scenario body with a shared aggregator, then always run the batch.
///
/// The batch executes on every exit path of `body` — normal return, error,
/// or panic — so checks registered before a mid-body failure still run and
/// report. A body panic is re-raised after the batch completes; a body error
/// takes precedence over check failures in the returned error.
pub async fn run_with_checks<F, Fut>(
    label: impl Into<String>,
    body: F,
) -> Result<AggregateResult, ScenarioError>
where
    F: FnOnce(Arc<SubDescribe>) -> Fut,
    Fut: Future<Output = Result<(), ScenarioError>>,
{
    let sub = Arc::new(SubDescribe::new(label));
    let outcome = AssertUnwindSafe(body(Arc::clone(&sub))).catch_unwind().await;
    let aggregate = sub.check().await;

    match outcome {
        Err(payload) => std::panic::resume_unwind(payload),
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => aggregate.into_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn all_checks_run_and_failures_are_named() {
        let sub = SubDescribe::new("using a running cluster");
        sub.it("A", || async { Ok(()) });
        sub.it("B", || async {
            Err(ScenarioError::assertion("B", "x"))
        });
        sub.it("C", || async { Ok(()) });

        let result = sub.check().await;
        assert_eq!(result.outcomes().len(), 3);
        assert!(!result.passed());

        let failing: Vec<&str> = result.failures().map(|o| o.name.as_str()).collect();
        assert_eq!(failing, vec!["B"]);

        let err = result.into_result().expect_err("aggregate must fail");
        let message = err.to_string();
        assert!(message.contains("B"), "got: {message}");
        assert!(message.contains("x"), "got: {message}");
        assert!(!message.contains("A:"), "got: {message}");
    }

    #[tokio::test]
    async fn failing_check_does_not_stop_later_checks() {
        static RAN: AtomicUsize = AtomicUsize::new(0);

        let sub = SubDescribe::new("batch");
        for i in 0..4 {
            sub.it(&format!("check-{i}"), move || async move {
                RAN.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Err(ScenarioError::assertion(format!("check-{i}"), "nope"))
                } else {
                    Ok(())
                }
            });
        }

        let result = sub.check().await;
        assert_eq!(RAN.load(Ordering::SeqCst), 4);
        assert_eq!(result.failures().count(), 1);
    }

    async fn panicking_check() -> Result<(), ScenarioError> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn panicking_check_is_isolated() {
        let sub = SubDescribe::new("batch");
        sub.it("panics", panicking_check);
        sub.it("still runs", || async { Ok(()) });

        let result = sub.check().await;
        assert_eq!(result.outcomes().len(), 2);
        assert!(result.outcomes()[0]
            .failure
            .as_deref()
            .is_some_and(|r| r.contains("kaboom")));
        assert!(result.outcomes()[1].failure.is_none());
    }

    #[tokio::test]
    async fn checks_preserve_registration_order() {
        let sub = SubDescribe::new("ordered");
        sub.it("first", || async { Ok(()) });
        sub.it("second", || async { Ok(()) });
        sub.it("third", || async { Ok(()) });

        let result = sub.check().await;
        let names: Vec<&str> = result.outcomes().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn body_error_still_runs_registered_checks() {
        static RAN: AtomicUsize = AtomicUsize::new(0);

        let result = run_with_checks("partial registration", |sub| async move {
            sub.it("registered before the failure", || async {
                RAN.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Err(ScenarioError::assertion("body", "failed mid-registration"))
        })
        .await;

        assert_eq!(RAN.load(Ordering::SeqCst), 1, "registered check must run");
        let err = result.expect_err("body error propagates");
        assert!(err.to_string().contains("failed mid-registration"));
    }

    #[tokio::test]
    async fn passing_batch_returns_aggregate() {
        let result = run_with_checks("all pass", |sub| async move {
            sub.it("a", || async { Ok(()) });
            sub.it("b", || async { Ok(()) });
            Ok(())
        })
        .await
        .expect("batch passes");

        assert!(result.passed());
        assert_eq!(result.outcomes().len(), 2);
    }

    #[tokio::test]
    async fn failing_batch_converts_to_scenario_error() {
        let err = run_with_checks("some fail", |sub| async move {
            sub.it("good", || async { Ok(()) });
            sub.it("bad", || async {
                Err(ScenarioError::assertion("bad", "broken"))
            });
            Ok(())
        })
        .await
        .expect_err("failing check fails the batch");

        let message = err.to_string();
        assert!(message.contains("bad: "), "got: {message}");
        assert!(message.contains("broken"), "got: {message}");
    }
}
