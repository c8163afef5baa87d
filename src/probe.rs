// Recovery-Time Prober
//
// Generic polling loop that repeatedly evaluates a health predicate until it
// first succeeds or a timeout elapses, and reports how long recovery took.
//
// Elapsed time is wall-clock since fault injection, not since polling start,
// so any settling delay before the first poll is captured. A timeout is a
// reportable outcome, never an error: a failed recovery is an expected
// testable result, not a bug in the harness.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Outcome of one recovery measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryMeasurement {
    pub succeeded: bool,
    /// Wall-clock time from injection to first predicate success, or exactly
    /// the timeout on failure.
    pub elapsed: Duration,
}

impl RecoveryMeasurement {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Poll `predicate` at `interval` until it returns true or `timeout` has
/// elapsed since `injected_at`.
///
/// A predicate returning `Err` counts as "not yet recovered": transient
/// errors such as connection-refused while a pod restarts are part of normal
/// recovery, not hard failures. Cancellation on a global run deadline is the
/// caller's concern (the orchestrator wraps this future in a timeout).
pub async fn measure_recovery<F, Fut>(
    injected_at: Instant,
    timeout: Duration,
    interval: Duration,
    mut predicate: F,
) -> RecoveryMeasurement
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = injected_at + timeout;

    loop {
        match predicate().await {
            Ok(true) => {
                let elapsed = injected_at.elapsed().min(timeout);
                return RecoveryMeasurement {
                    succeeded: true,
                    elapsed,
                };
            }
            Ok(false) => {}
            Err(err) => {
                debug!("recovery predicate not yet satisfiable: {}", err);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return RecoveryMeasurement {
                succeeded: false,
                elapsed: timeout,
            };
        }
        // Never sleep past the deadline, so the reported timeout is exact.
        sleep_until((now + interval).min(deadline)).await;
    }
}
