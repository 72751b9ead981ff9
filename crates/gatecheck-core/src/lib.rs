//! Core types for the gatecheck authorization conformance harness.
//!
//! This crate provides the building blocks shared by the harness and the
//! adapters:
//! - Configuration management
//! - The adapter error taxonomy and S3 error codes
//! - Principals, credentials, bucket limits and access levels
//! - The bucket policy document model
//! - The object store and admin control plane traits

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use adapter::{IdentityAdmin, ObjectStore, ObjectStoreGateway};
pub use config::{
    AdminConfig, Config, EndpointConfig, LogFormat, LoggingConfig, RunConfig, TlsMode,
};
pub use error::{AdapterError, AdapterResult, ConfigError, S3ErrorCode, QUOTA_EXCEEDED_MARKER};
pub use policy::{BucketPolicy, PolicyDecision, PolicyError, S3Action};
pub use types::{AccessLevel, BucketLimit, Credentials};
