//! Declarative access-control conformance scenarios.
//!
//! A [`Scenario`] declares principals, resources and an ordered list of
//! probes. The [`Runner`] provisions the principals through an
//! [`IdentityAdmin`](gatecheck_core::IdentityAdmin), issues every probe through
//! an [`ObjectStoreGateway`](gatecheck_core::ObjectStoreGateway), classifies the
//! results and produces a [`Report`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod assertion;
pub mod builtin;
pub mod error;
pub mod namespace;
pub mod payload;
pub mod policy;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod state;

pub use assertion::{assert_outcome, classify, Expectation, Mismatch, Observation, Outcome, Verdict};
pub use builtin::{builtin, builtin_names};
pub use error::ScenarioError;
pub use namespace::Namespace;
pub use report::{ProbeRecord, Report};
pub use runner::{RunOptions, Runner};
pub use scenario::{Actor, Operation, PrincipalSpec, Probe, Scenario};
pub use state::{RunOutcome, RunState};
