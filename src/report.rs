// Report Emitter
//
// Collects per-scenario outcomes plus the optional load-test summary into a
// single run report, rendered as a markdown table for humans and saved as a
// timestamped JSON artifact for machines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::loadtest::LoadTestSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Passed => "PASSED",
            Outcome::Failed => "FAILED",
            Outcome::Skipped => "SKIPPED",
        }
    }
}

/// One scenario's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub scenario: String,
    pub outcome: Outcome,
    /// Seconds from injection to the recovery predicate passing. Absent for
    /// skipped scenarios and for failures before measurement began.
    pub elapsed_secs: Option<f64>,
    /// The service-level objective this scenario was held to.
    pub sla_secs: Option<f64>,
    pub message: String,
}

impl RecoveryResult {
    pub fn passed(scenario: impl Into<String>, elapsed_secs: f64, sla_secs: f64) -> Self {
        Self {
            scenario: scenario.into(),
            outcome: Outcome::Passed,
            elapsed_secs: Some(elapsed_secs),
            sla_secs: Some(sla_secs),
            message: format!("recovered in {:.1}s", elapsed_secs),
        }
    }

    pub fn failed(scenario: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            outcome: Outcome::Failed,
            elapsed_secs: None,
            sla_secs: None,
            message: message.into(),
        }
    }

    pub fn skipped(scenario: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            outcome: Outcome::Skipped,
            elapsed_secs: None,
            sla_secs: None,
            message: message.into(),
        }
    }

    pub fn with_timing(mut self, elapsed_secs: f64, sla_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self.sla_secs = Some(sla_secs);
        self
    }
}

/// The full record of one harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<RecoveryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_test: Option<LoadTestSummary>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            load_test: None,
        }
    }

    pub fn record(&mut self, result: RecoveryResult) {
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Skips never fail a run; everything else must have passed.
    pub fn overall_passed(&self) -> bool {
        self.results
            .iter()
            .filter(|r| r.outcome != Outcome::Skipped)
            .all(|r| r.outcome == Outcome::Passed)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Resilience Validation Report");
        let _ = writeln!(out);
        let _ = writeln!(out, "Run `{}`, started {}", self.run_id, self.started_at);
        let _ = writeln!(out);
        let _ = writeln!(out, "| Scenario | Outcome | Recovery | SLA | Notes |");
        let _ = writeln!(out, "|----------|---------|----------|-----|-------|");
        for r in &self.results {
            let elapsed = r
                .elapsed_secs
                .map(|s| format!("{:.1}s", s))
                .unwrap_or_else(|| "-".to_string());
            let sla = r
                .sla_secs
                .map(|s| format!("{:.0}s", s))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                r.scenario,
                r.outcome.label(),
                elapsed,
                sla,
                r.message
            );
        }

        if let Some(load) = &self.load_test {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Load & Autoscaling");
            let _ = writeln!(out);
            out.push_str(&load.to_markdown());
        }

        let _ = writeln!(out);
        let verdict = if self.overall_passed() { "PASSED" } else { "FAILED" };
        let _ = writeln!(out, "Overall: **{}**", verdict);
        out
    }

    /// Write the JSON artifact, returning its path.
    pub fn save_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating report directory {}", dir.display()))?;
        let name = format!(
            "resilience_report_{}.json",
            self.started_at.format("%Y%m%dT%H%M%SZ")
        );
        let path = dir.join(name);
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, body)
            .with_context(|| format!("writing report to {}", path.display()))?;
        Ok(path)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_passed_ignores_skips() {
        let mut report = RunReport::new();
        report.record(RecoveryResult::passed("database-primary", 12.0, 30.0));
        report.record(RecoveryResult::skipped("node-drain", "disabled"));
        assert!(report.overall_passed());

        report.record(RecoveryResult::failed("cache-primary", "marker lost"));
        assert!(!report.overall_passed());
    }

    #[test]
    fn test_markdown_contains_sla_table() {
        let mut report = RunReport::new();
        report.record(RecoveryResult::passed("database-primary", 12.3, 30.0));
        report.record(RecoveryResult::skipped("node-drain", "disabled in config"));
        let md = report.to_markdown();
        assert!(md.contains("| database-primary | PASSED | 12.3s | 30s |"));
        assert!(md.contains("| node-drain | SKIPPED | - | - | disabled in config |"));
        assert!(md.contains("Overall: **PASSED**"));
    }

    #[test]
    fn test_save_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new();
        report.record(RecoveryResult::failed("network-partition", "stayed dark"));
        report.finish();

        let path = report.save_json(dir.path()).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: RunReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.run_id, report.run_id);
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].outcome, Outcome::Failed);
    }
}
