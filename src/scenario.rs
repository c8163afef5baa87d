// Scenario Orchestrator
//
// Runs fault scenarios strictly one at a time so recovery measurements are
// never polluted by a concurrent fault. Each scenario moves through
// Pending -> Injected -> Recovering and terminates as Passed, Failed or
// Skipped; every scenario always produces a result, including the ones a
// global deadline or a fatal control-plane failure prevented from running.
// Cleanup (rolling back network policies, uncordoning nodes) happens at the
// end of the run regardless of how it ended.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::error::HarnessError;
use crate::fault::FaultInjector;
use crate::integrity::IntegrityProbe;
use crate::probe::measure_recovery;
use crate::report::{RecoveryResult, RunReport};

/// Lifecycle of a single scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Pending,
    Injected,
    Recovering,
    Passed,
    Failed,
    Skipped,
}

/// One named fault plus its recovery bounds.
pub struct Scenario {
    pub name: String,
    pub injector: Box<dyn FaultInjector>,
    /// Optional marker probe written before injection and verified after
    /// recovery.
    pub integrity: Option<Box<dyn IntegrityProbe>>,
    /// Hard bound on recovery measurement.
    pub timeout: Duration,
    /// Service-level objective. Breaches are surfaced in the report's
    /// target-vs-actual table; they never change the verdict.
    pub sla: Duration,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        injector: Box<dyn FaultInjector>,
        timeout: Duration,
        sla: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            injector,
            integrity: None,
            timeout,
            sla,
        }
    }

    pub fn with_integrity(mut self, probe: Box<dyn IntegrityProbe>) -> Self {
        self.integrity = Some(probe);
        self
    }
}

/// Result of a whole run: the report plus the fatal error that ended it
/// early, if any.
pub struct RunOutcome {
    pub report: RunReport,
    pub fatal: Option<HarnessError>,
}

impl RunOutcome {
    /// 0 all passed, 1 at least one failure, 2 the run itself broke.
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            2
        } else if self.report.overall_passed() {
            0
        } else {
            1
        }
    }
}

pub struct Orchestrator {
    scenarios: Vec<Scenario>,
    poll_interval: Duration,
    cooldown: Duration,
    global_deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(scenarios: Vec<Scenario>, poll_interval: Duration, cooldown: Duration) -> Self {
        Self {
            scenarios,
            poll_interval,
            cooldown,
            global_deadline: None,
        }
    }

    pub fn with_global_deadline(mut self, deadline: Duration) -> Self {
        self.global_deadline = Some(deadline);
        self
    }

    /// Run every scenario in order, then roll everything back.
    pub async fn run(self) -> RunOutcome {
        let started = Instant::now();
        let mut report = RunReport::new();
        let mut fatal: Option<HarnessError> = None;

        let total = self.scenarios.len();
        for (idx, scenario) in self.scenarios.iter().enumerate() {
            if let Some(fatal_err) = &fatal {
                report.record(RecoveryResult::skipped(
                    &scenario.name,
                    format!("run aborted: {}", fatal_err),
                ));
                continue;
            }

            let remaining = self.remaining(started);
            if remaining == Some(Duration::ZERO) {
                report.record(RecoveryResult::failed(
                    &scenario.name,
                    "global run deadline exceeded before scenario started",
                ));
                continue;
            }

            info!("scenario {}/{}: {}", idx + 1, total, scenario.name);
            let result = self.run_one(scenario, remaining).await;
            match result {
                Ok(record) => report.record(record),
                Err(err) => {
                    // Only fatal errors escape run_one.
                    error!("aborting run: {}", err);
                    report.record(RecoveryResult::failed(
                        &scenario.name,
                        format!("aborted: {}", err),
                    ));
                    fatal = Some(err);
                }
            }

            let last = idx + 1 == total;
            if !last && fatal.is_none() && !self.cooldown.is_zero() {
                info!("cooldown {}s before next scenario", self.cooldown.as_secs());
                sleep(self.cooldown).await;
            }
        }

        self.cleanup().await;
        report.finish();
        RunOutcome { report, fatal }
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.global_deadline
            .map(|d| d.saturating_sub(started.elapsed()))
    }

    /// Drive one scenario to a terminal state. `Err` is returned only for
    /// fatal errors; everything else becomes a RecoveryResult.
    async fn run_one(
        &self,
        scenario: &Scenario,
        remaining: Option<Duration>,
    ) -> Result<RecoveryResult, HarnessError> {
        let target = match scenario.injector.identify_target().await {
            Ok(target) => target,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                info!("skipping {}: {}", scenario.name, err);
                return Ok(RecoveryResult::skipped(&scenario.name, err.to_string()));
            }
        };

        if let Some(probe) = &scenario.integrity {
            if let Err(err) = probe.write_marker().await {
                if err.is_fatal() {
                    return Err(err);
                }
                info!("skipping {}: {}", scenario.name, err);
                return Ok(RecoveryResult::skipped(&scenario.name, err.to_string()));
            }
        }

        if let Err(err) = scenario.injector.inject(&target).await {
            if err.is_fatal() {
                return Err(err);
            }
            warn!("injection failed for {}: {}", scenario.name, err);
            return Ok(RecoveryResult::failed(&scenario.name, err.to_string()));
        }
        let injected_at = Instant::now();
        info!(
            "{} -> {:?}: fault injected against {}",
            scenario.name,
            ScenarioState::Injected,
            target.name
        );

        // The scenario timeout never outlives the global run deadline.
        let timeout = match remaining {
            Some(remaining) => scenario.timeout.min(remaining),
            None => scenario.timeout,
        };

        info!("{} -> {:?}", scenario.name, ScenarioState::Recovering);
        let measurement = measure_recovery(injected_at, timeout, self.poll_interval, || {
            scenario.injector.recovered(&target)
        })
        .await;

        if !measurement.succeeded {
            info!("{} -> {:?}", scenario.name, ScenarioState::Failed);
            return Ok(RecoveryResult::failed(
                &scenario.name,
                format!("did not recover within {:.0}s", timeout.as_secs_f64()),
            )
            .with_timing(measurement.elapsed_secs(), scenario.sla.as_secs_f64()));
        }

        if let Some(probe) = &scenario.integrity {
            let outcome = match probe.verify().await {
                Ok(outcome) => outcome,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    return Ok(RecoveryResult::failed(
                        &scenario.name,
                        format!("recovered, but integrity could not be verified: {}", err),
                    )
                    .with_timing(measurement.elapsed_secs(), scenario.sla.as_secs_f64()));
                }
            };
            if !outcome.is_intact() {
                info!("{} -> {:?}", scenario.name, ScenarioState::Failed);
                return Ok(RecoveryResult::failed(&scenario.name, outcome.describe())
                    .with_timing(measurement.elapsed_secs(), scenario.sla.as_secs_f64()));
            }
        }

        info!("{} -> {:?}", scenario.name, ScenarioState::Passed);
        let mut result = RecoveryResult::passed(
            &scenario.name,
            measurement.elapsed_secs(),
            scenario.sla.as_secs_f64(),
        );
        // Recovery within the timeout passes; the objective only shapes the
        // report, where target-vs-actual makes the breach visible.
        if measurement.elapsed > scenario.sla {
            result.message = format!(
                "recovered in {:.1}s, exceeding the {:.0}s objective",
                measurement.elapsed_secs(),
                scenario.sla.as_secs_f64()
            );
            warn!("{}: {}", scenario.name, result.message);
        }
        Ok(result)
    }

    /// Best-effort rollback of every injector, fatal or not. Failures are
    /// logged, never propagated.
    async fn cleanup(&self) {
        for scenario in &self.scenarios {
            if let Err(err) = scenario.injector.rollback().await {
                warn!("cleanup for {} failed: {}", scenario.name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::TargetIdentity;
    use crate::integrity::IntegrityOutcome;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted injector: configurable identify/inject results and a number
    /// of "not yet" polls before recovery.
    struct ScriptedFault {
        identify: Option<HarnessError>,
        inject: Option<HarnessError>,
        polls_until_recovered: usize,
        polls: AtomicUsize,
        rolled_back: Arc<AtomicBool>,
    }

    impl ScriptedFault {
        fn recovers_after(polls: usize) -> Self {
            Self {
                identify: None,
                inject: None,
                polls_until_recovered: polls,
                polls: AtomicUsize::new(0),
                rolled_back: Arc::new(AtomicBool::new(false)),
            }
        }

        fn identify_fails(err: HarnessError) -> Self {
            Self {
                identify: Some(err),
                ..Self::recovers_after(0)
            }
        }

        fn inject_fails(err: HarnessError) -> Self {
            Self {
                inject: Some(err),
                ..Self::recovers_after(0)
            }
        }
    }

    #[async_trait]
    impl FaultInjector for ScriptedFault {
        async fn identify_target(&self) -> Result<TargetIdentity, HarnessError> {
            match &self.identify {
                Some(HarnessError::TargetNotFound(msg)) => {
                    Err(HarnessError::TargetNotFound(msg.clone()))
                }
                Some(HarnessError::InjectionFailed(msg)) => {
                    Err(HarnessError::InjectionFailed(msg.clone()))
                }
                Some(HarnessError::ControlPlane(msg)) => {
                    Err(HarnessError::ControlPlane(msg.clone()))
                }
                None => Ok(TargetIdentity::pod("victim-0", "prod", None)),
            }
        }

        async fn inject(&self, _target: &TargetIdentity) -> Result<(), HarnessError> {
            match &self.inject {
                Some(HarnessError::InjectionFailed(msg)) => {
                    Err(HarnessError::InjectionFailed(msg.clone()))
                }
                Some(HarnessError::ControlPlane(msg)) => {
                    Err(HarnessError::ControlPlane(msg.clone()))
                }
                Some(HarnessError::TargetNotFound(msg)) => {
                    Err(HarnessError::TargetNotFound(msg.clone()))
                }
                None => Ok(()),
            }
        }

        async fn recovered(&self, _pre_fault: &TargetIdentity) -> Result<bool> {
            Ok(self.polls.fetch_add(1, Ordering::SeqCst) >= self.polls_until_recovered)
        }

        async fn rollback(&self) -> Result<()> {
            self.rolled_back.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Integrity probe scripted to report a fixed outcome.
    struct ScriptedProbe {
        write_err: Option<HarnessError>,
        outcome: IntegrityOutcome,
    }

    #[async_trait]
    impl IntegrityProbe for ScriptedProbe {
        async fn write_marker(&self) -> Result<(), HarnessError> {
            match &self.write_err {
                Some(HarnessError::TargetNotFound(msg)) => {
                    Err(HarnessError::TargetNotFound(msg.clone()))
                }
                Some(other) => Err(HarnessError::InjectionFailed(other.to_string())),
                None => Ok(()),
            }
        }

        async fn verify(&self) -> Result<IntegrityOutcome, HarnessError> {
            Ok(self.outcome.clone())
        }
    }

    fn fast(scenario: Scenario) -> Orchestrator {
        Orchestrator::new(vec![scenario], Duration::from_millis(5), Duration::ZERO)
    }

    fn quick_scenario(name: &str, fault: ScriptedFault) -> Scenario {
        Scenario::new(
            name,
            Box::new(fault),
            Duration::from_millis(200),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_recovered_scenario_passes() {
        let outcome = fast(quick_scenario("db", ScriptedFault::recovers_after(2)))
            .run()
            .await;
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.report.results[0].scenario, "db");
        assert!(outcome.report.results[0].elapsed_secs.is_some());
    }

    #[tokio::test]
    async fn test_missing_target_is_skipped_not_failed() {
        let fault = ScriptedFault::identify_fails(HarnessError::TargetNotFound("gone".into()));
        let outcome = fast(quick_scenario("db", fault)).run().await;
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(
            outcome.report.results[0].outcome,
            crate::report::Outcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_injection_failure_fails_without_measurement() {
        let fault = ScriptedFault::inject_fails(HarnessError::InjectionFailed("forbidden".into()));
        let outcome = fast(quick_scenario("db", fault)).run().await;
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.report.results[0].elapsed_secs.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_reported_not_thrown() {
        let fault = ScriptedFault::recovers_after(usize::MAX);
        let outcome = fast(quick_scenario("db", fault)).run().await;
        assert_eq!(outcome.exit_code(), 1);
        let result = &outcome.report.results[0];
        assert!(result.message.contains("did not recover"));
        assert_eq!(result.elapsed_secs, Some(0.2));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_and_skips_rest() {
        let fatal = ScriptedFault::identify_fails(HarnessError::ControlPlane("refused".into()));
        let healthy = ScriptedFault::recovers_after(0);
        let rolled_back = Arc::clone(&healthy.rolled_back);

        let orchestrator = Orchestrator::new(
            vec![
                quick_scenario("db", fatal),
                quick_scenario("cache", healthy),
            ],
            Duration::from_millis(5),
            Duration::ZERO,
        );
        let outcome = orchestrator.run().await;

        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(outcome.report.results.len(), 2);
        assert!(outcome.report.results[1].message.contains("run aborted"));
        // Cleanup still runs for scenarios that never started.
        assert!(rolled_back.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_global_deadline_fails_remaining_scenarios() {
        let slow = ScriptedFault::recovers_after(usize::MAX);
        let never_ran = ScriptedFault::recovers_after(0);

        let orchestrator = Orchestrator::new(
            vec![
                Scenario::new(
                    "slow",
                    Box::new(slow),
                    Duration::from_secs(60),
                    Duration::from_secs(5),
                ),
                quick_scenario("starved", never_ran),
            ],
            Duration::from_millis(5),
            Duration::ZERO,
        )
        .with_global_deadline(Duration::from_millis(100));
        let outcome = orchestrator.run().await;

        // The in-flight scenario was cut off at the global deadline and the
        // remaining one still got a result.
        assert_eq!(outcome.report.results.len(), 2);
        assert_eq!(
            outcome.report.results[0].outcome,
            crate::report::Outcome::Failed
        );
        assert_eq!(
            outcome.report.results[1].outcome,
            crate::report::Outcome::Failed
        );
        assert!(outcome.report.results[1].message.contains("deadline"));
    }

    #[tokio::test]
    async fn test_lost_marker_fails_recovered_scenario() {
        let scenario = quick_scenario("cache", ScriptedFault::recovers_after(0)).with_integrity(
            Box::new(ScriptedProbe {
                write_err: None,
                outcome: IntegrityOutcome::Lost {
                    key: "integrity-marker-1".into(),
                    expected: "v1".into(),
                    actual: None,
                },
            }),
        );
        let outcome = fast(scenario).run().await;

        assert_eq!(outcome.exit_code(), 1);
        let result = &outcome.report.results[0];
        // Distinct from a recovery-time failure: recovery succeeded but data
        // did not survive.
        assert!(result.message.contains("lost"));
        assert!(result.elapsed_secs.is_some());
    }

    #[tokio::test]
    async fn test_marker_write_failure_skips_scenario() {
        let scenario = quick_scenario("cache", ScriptedFault::recovers_after(0)).with_integrity(
            Box::new(ScriptedProbe {
                write_err: Some(HarnessError::TargetNotFound("no master".into())),
                outcome: IntegrityOutcome::Intact,
            }),
        );
        let outcome = fast(scenario).run().await;
        assert_eq!(
            outcome.report.results[0].outcome,
            crate::report::Outcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_sla_breach_is_reported_but_passes() {
        let scenario = Scenario::new(
            "db",
            Box::new(ScriptedFault::recovers_after(3)),
            Duration::from_secs(5),
            // Objective far below the three 20ms polls recovery will take.
            Duration::from_millis(1),
        );
        let orchestrator =
            Orchestrator::new(vec![scenario], Duration::from_millis(20), Duration::ZERO);
        let outcome = orchestrator.run().await;

        // Recovery inside the timeout passes; the missed objective only
        // shows up in the report message and the target-vs-actual column.
        assert_eq!(outcome.exit_code(), 0);
        let result = &outcome.report.results[0];
        assert_eq!(result.outcome, crate::report::Outcome::Passed);
        assert!(result.message.contains("exceeding"));
        assert!(result.elapsed_secs.is_some());
    }
}
