//! Scenario declaration errors.

use thiserror::Error;

/// A scenario that cannot be run as declared.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The scenario file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The scenario file is not valid TOML or does not match the schema.
    #[error("invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),

    /// The scenario has no name.
    #[error("scenario name must not be empty")]
    MissingName,

    /// Two principals share a name.
    #[error("principal {0:?} is declared twice")]
    DuplicatePrincipal(String),

    /// A principal uses a name reserved for built-in actors.
    #[error("{0:?} is reserved and cannot name a principal")]
    ReservedName(String),

    /// A sub-identity names a parent that is missing or is itself a sub-identity.
    #[error("sub-identity {sub:?} needs a root parent, {parent:?} is not one")]
    InvalidParent {
        /// The sub-identity.
        sub: String,
        /// The named parent.
        parent: String,
    },

    /// A reference to a principal that is not declared.
    #[error("{context} refers to undeclared principal {name:?}")]
    UnknownPrincipal {
        /// Where the reference appears.
        context: String,
        /// The missing name.
        name: String,
    },

    /// A reference to a payload that is not declared.
    #[error("probe {probe} refers to undeclared payload {payload:?}")]
    UnknownPayload {
        /// Probe index.
        probe: usize,
        /// The missing payload.
        payload: String,
    },

    /// A reference to a policy that is not declared.
    #[error("probe {probe} refers to undeclared policy {policy:?}")]
    UnknownPolicy {
        /// Probe index.
        probe: usize,
        /// The missing policy.
        policy: String,
    },

    /// A set expectation on an operation that returns no listing.
    #[error("probe {probe}: {op} returns no listing, a set expectation is meaningless")]
    StructuralExpectation {
        /// Probe index.
        probe: usize,
        /// Operation name.
        op: &'static str,
    },

    /// An operation issued by an actor that cannot issue it.
    #[error("probe {probe}: {op} cannot be issued by {actor}")]
    WrongActor {
        /// Probe index.
        probe: usize,
        /// Operation name.
        op: &'static str,
        /// The offending actor.
        actor: String,
    },

    /// A policy declaration that cannot be rendered.
    #[error("policy {name:?}: {reason}")]
    InvalidPolicy {
        /// Policy name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A payload that cannot be resolved.
    #[error("payload {name:?}: {reason}")]
    Payload {
        /// Payload name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// No built-in scenario has this name.
    #[error("unknown built-in scenario {0:?}")]
    UnknownBuiltin(String),

    /// A namespace that would produce invalid bucket names.
    #[error("invalid namespace {0:?}: use lowercase letters, digits and '-'")]
    InvalidNamespace(String),
}
