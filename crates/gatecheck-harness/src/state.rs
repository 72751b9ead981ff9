//! Run lifecycle.

use std::fmt;

use gatecheck_core::AdapterError;
use serde::{Serialize, Serializer};

/// State of a scenario run.
///
/// ```text
/// Created -> Provisioning -> Running -> Verified -> TornDown
///                 |             |
///                 +-> Aborted <-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// Nothing has happened yet.
    Created,
    /// Principals and setup buckets are being created.
    Provisioning,
    /// Probes are executing.
    Running,
    /// Every probe produced a classified outcome.
    Verified,
    /// Provisioned principals were removed.
    TornDown,
    /// An infrastructure or setup failure stopped the run.
    Aborted,
}

impl RunState {
    /// Returns whether `next` directly follows this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Provisioning)
                | (Self::Provisioning, Self::Running)
                | (Self::Running, Self::Verified)
                | (Self::Verified, Self::TornDown)
                | (Self::Provisioning | Self::Running, Self::Aborted)
        )
    }

    /// Returns true for states with no successor.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TornDown | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Verified => "verified",
            Self::TornDown => "torn-down",
            Self::Aborted => "aborted",
        })
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Every probe executed and was classified.
    Completed,
    /// A principal, bucket, payload or policy could not be provisioned.
    SetupFailed {
        /// What was being provisioned.
        step: String,
        /// Why it failed.
        error: String,
    },
    /// An infrastructure failure stopped the run.
    Aborted {
        /// State the run was in.
        phase: RunState,
        /// Index of the probe in flight, if any.
        probe: Option<usize>,
        /// The failure.
        #[serde(serialize_with = "display")]
        error: AdapterError,
    },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::SetupFailed { step, error } => write!(f, "setup failed at {step}: {error}"),
            Self::Aborted { phase, probe: Some(index), error } => {
                write!(f, "aborted while {phase} at probe {index}: {error}")
            }
            Self::Aborted { phase, probe: None, error } => {
                write!(f, "aborted while {phase}: {error}")
            }
        }
    }
}

fn display<S: Serializer, T: fmt::Display>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
