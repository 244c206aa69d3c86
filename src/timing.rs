//! Timeout race executor.
//!
//! Races a bounded-duration operation against a deadline and reports whether
//! it finished in time. Used for negative-path scenarios where the
//! requirement is "fails within N seconds" rather than "succeeds".

use std::future::Future;
use std::time::Duration;

/// Run `operation` as an independent task and race it against `deadline`.
///
/// Returns `true` if the task finishes (by returning or panicking) before the
/// deadline elapses, `false` otherwise. The caller is never blocked past the
/// deadline plus a small scheduling epsilon.
///
/// Known limitation: a `false` result does not cancel the operation. The
/// wrapped workflow offers no cooperative cancellation hook, so the losing
/// task is detached and keeps running in the background. Callers treat
/// `false` as the signal to fail the enclosing scenario.
pub async fn completes_in_time<F>(operation: F, deadline: Duration) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(operation);
    tokio::time::timeout(deadline, task).await.is_ok()
}

/// Blocking-closure variant of [`completes_in_time`].
///
/// The closure runs on the blocking thread pool; the same non-cancellation
/// limitation applies.
pub async fn completes_in_time_blocking<F>(operation: F, deadline: Duration) -> bool
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::task::spawn_blocking(operation);
    tokio::time::timeout(deadline, task).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn fast_operation_completes_in_time() {
        let done = completes_in_time(
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(done);
    }

    #[tokio::test]
    async fn slow_operation_misses_deadline() {
        let started = Instant::now();
        let done = completes_in_time(
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            },
            Duration::from_millis(100),
        )
        .await;
        assert!(!done);
        // The race must return at the deadline, not wait for the sleeper.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn panicking_operation_counts_as_finished() {
        let done = completes_in_time(
            async {
                panic!("operation blew up quickly");
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(done);
    }

    #[tokio::test]
    async fn blocking_variant_fast_and_slow() {
        assert!(completes_in_time_blocking(|| {}, Duration::from_secs(1)).await);

        let started = Instant::now();
        let done = completes_in_time_blocking(
            || std::thread::sleep(Duration::from_secs(10)),
            Duration::from_millis(100),
        )
        .await;
        assert!(!done);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
