//! Run reports.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::assertion::{Mismatch, Outcome, Verdict};
use crate::state::{RunOutcome, RunState};

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    /// Position in the scenario.
    pub index: usize,
    /// Probe label, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Issuing actor.
    pub actor: String,
    /// Operation name.
    pub operation: &'static str,
    /// Operation target.
    pub target: String,
    /// Expected outcome, rendered.
    pub expected: String,
    /// Observed outcome.
    pub actual: Outcome,
    /// Failure detail; absent on pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<Mismatch>,
}

impl ProbeRecord {
    /// Returns true if the probe passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatch.is_none()
    }

    pub(crate) fn set_verdict(&mut self, verdict: Verdict) {
        self.mismatch = match verdict {
            Verdict::Pass => None,
            Verdict::Fail(mismatch) => Some(mismatch),
        };
    }
}

/// Report of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Scenario name.
    pub scenario: String,
    /// Run namespace, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// When provisioning started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run.
    #[serde(serialize_with = "millis")]
    pub elapsed: Duration,
    /// Final state.
    pub state: RunState,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// One record per executed probe.
    pub records: Vec<ProbeRecord>,
    /// Non-fatal problems, mostly from teardown.
    pub warnings: Vec<String>,
}

fn millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl Report {
    /// Number of failed probes.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| !r.passed()).count()
    }

    /// Returns true if the run completed and every probe passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.failures() == 0
    }

    /// Process exit code: 0 all passed, 1 probe failures, 2 setup failure, 3 aborted.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            RunOutcome::Completed if self.failures() == 0 => 0,
            RunOutcome::Completed => 1,
            RunOutcome::SetupFailed { .. } => 2,
            RunOutcome::Aborted { .. } => 3,
        }
    }

    /// Serializes the report to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scenario {}", self.scenario)?;
        if let Some(ns) = &self.namespace {
            write!(f, " [{ns}]")?;
        }
        writeln!(f, " ({})", self.started_at.to_rfc3339())?;

        for r in &self.records {
            let status = if r.passed() { "PASS" } else { "FAIL" };
            write!(f, "  {status} #{:<3} {:<12} {:<22}", r.index, r.actor, r.operation)?;
            if !r.target.is_empty() {
                write!(f, " {}", r.target)?;
            }
            write!(f, "  expect {}", r.expected)?;
            if let Some(label) = &r.label {
                write!(f, "  ({label})")?;
            }
            writeln!(f)?;
            if let Some(mismatch) = &r.mismatch {
                writeln!(f, "         {mismatch}")?;
            }
        }

        for w in &self.warnings {
            writeln!(f, "  warning: {w}")?;
        }

        let passed = self.records.len() - self.failures();
        write!(
            f,
            "{}: {passed}/{} probes passed, {} in {:.2}s, state {}",
            if self.passed() { "ok" } else { "FAILED" },
            self.records.len(),
            self.outcome,
            self.elapsed.as_secs_f64(),
            self.state
        )
    }
}
