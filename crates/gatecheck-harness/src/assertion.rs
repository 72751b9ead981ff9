//! Outcome classification and verdicts.
//!
//! Adapter results are classified into [`Outcome`]s. Expected denials and
//! quota rejections are ordinary values here; only infrastructure failures
//! leave this module as errors.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use gatecheck_core::{AdapterError, AdapterResult};
use serde::{Deserialize, Serialize};

/// What a probe expects to observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expectation {
    /// The call succeeds.
    Allow,
    /// The call is refused for any reason other than quota.
    Deny,
    /// The call is refused because the owner's quota would be exceeded.
    QuotaExceeded,
    /// The call succeeds and returns exactly these names, in any order.
    Set(BTreeSet<String>),
}

impl Expectation {
    /// Builds a set expectation.
    pub fn set<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(names.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
            Self::QuotaExceeded => f.write_str("quota-exceeded"),
            Self::Set(names) => write!(f, "allow with {}", render_set(names)),
        }
    }
}

/// Why a call was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    /// The caller lacks permission.
    AccessDenied,
    /// The target does not exist (or is hidden from the caller).
    NotFound,
    /// Another protocol-level refusal, by error code.
    Rejected(String),
}

/// A classified probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The call succeeded.
    Allow,
    /// The call was refused.
    Deny(DenyReason),
    /// The call was refused by the quota.
    QuotaExceeded,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny(DenyReason::AccessDenied) => f.write_str("deny (access denied)"),
            Self::Deny(DenyReason::NotFound) => f.write_str("deny (not found)"),
            Self::Deny(DenyReason::Rejected(code)) => write!(f, "deny ({code})"),
            Self::QuotaExceeded => f.write_str("quota-exceeded"),
        }
    }
}

/// Classifies an adapter result.
///
/// # Errors
///
/// Returns the adapter error unchanged when it is an infrastructure failure.
pub fn classify<T>(result: &AdapterResult<T>) -> Result<Outcome, AdapterError> {
    match result {
        Ok(_) => Ok(Outcome::Allow),
        Err(e) if e.is_infrastructure() => Err(e.clone()),
        Err(AdapterError::QuotaExceeded(_)) => Ok(Outcome::QuotaExceeded),
        Err(AdapterError::PermissionDenied(_)) => Ok(Outcome::Deny(DenyReason::AccessDenied)),
        Err(AdapterError::NotFound(_)) => Ok(Outcome::Deny(DenyReason::NotFound)),
        Err(AdapterError::Rejected { code, .. }) => {
            Ok(Outcome::Deny(DenyReason::Rejected(code.clone())))
        }
        Err(e) => Err(e.clone()),
    }
}

/// Content returned by a read, paired with the last allowed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCheck {
    /// Bytes of the last allowed write in this run, if one happened.
    pub expected: Option<Bytes>,
    /// Bytes actually returned.
    pub actual: Bytes,
}

/// Everything observed for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Classified result.
    pub outcome: Outcome,
    /// Names returned by a listing call.
    pub listing: Option<BTreeSet<String>>,
    /// Content returned by a read call.
    pub content: Option<ContentCheck>,
}

impl Observation {
    /// An observation carrying only an outcome.
    #[must_use]
    pub fn outcome(outcome: Outcome) -> Self {
        Self { outcome, listing: None, content: None }
    }
}

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Mismatch {
    /// The classified outcome differs from the expectation.
    Outcome {
        /// Expected outcome, rendered.
        expected: String,
        /// Observed outcome.
        actual: Outcome,
    },
    /// A listing returned a different set of names.
    Listing {
        /// Expected names that were absent.
        missing: BTreeSet<String>,
        /// Names present that were not expected.
        unexpected: BTreeSet<String>,
    },
    /// A read returned different bytes than the last allowed write.
    Content {
        /// Length of the written object.
        expected_len: usize,
        /// Length of the returned object.
        actual_len: usize,
        /// First differing offset, if the common prefix differs.
        first_difference: Option<usize>,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outcome { expected, actual } => write!(f, "expected {expected}, got {actual}"),
            Self::Listing { missing, unexpected } => write!(
                f,
                "listing differs: missing {}, unexpected {}",
                render_set(missing),
                render_set(unexpected)
            ),
            Self::Content { expected_len, actual_len, first_difference } => {
                write!(f, "content differs: wrote {expected_len} bytes, read {actual_len} bytes")?;
                if let Some(offset) = first_difference {
                    write!(f, ", first difference at offset {offset}")?;
                }
                Ok(())
            }
        }
    }
}

/// The result of comparing an observation with an expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The observation matches.
    Pass,
    /// The observation does not match.
    Fail(Mismatch),
}

impl Verdict {
    /// Returns true for [`Verdict::Pass`].
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Compares an observation with what the probe expects.
#[must_use]
pub fn assert_outcome(expected: &Expectation, observed: &Observation) -> Verdict {
    let outcome_matches = match expected {
        Expectation::Allow | Expectation::Set(_) => observed.outcome == Outcome::Allow,
        Expectation::Deny => matches!(observed.outcome, Outcome::Deny(_)),
        Expectation::QuotaExceeded => observed.outcome == Outcome::QuotaExceeded,
    };
    if !outcome_matches {
        return Verdict::Fail(Mismatch::Outcome {
            expected: expected.to_string(),
            actual: observed.outcome.clone(),
        });
    }

    if let Expectation::Set(names) = expected {
        let empty = BTreeSet::new();
        let actual = observed.listing.as_ref().unwrap_or(&empty);
        if actual != names {
            return Verdict::Fail(Mismatch::Listing {
                missing: names.difference(actual).cloned().collect(),
                unexpected: actual.difference(names).cloned().collect(),
            });
        }
    }

    if let Some(ContentCheck { expected: Some(written), actual }) = &observed.content {
        if written != actual {
            let first_difference = written.iter().zip(actual.iter()).position(|(a, b)| a != b);
            return Verdict::Fail(Mismatch::Content {
                expected_len: written.len(),
                actual_len: actual.len(),
                first_difference,
            });
        }
    }

    Verdict::Pass
}

fn render_set(names: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = names.iter().map(String::as_str).collect();
    format!("{{{}}}", joined.join(", "))
}
