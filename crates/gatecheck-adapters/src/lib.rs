//! Adapter implementations for gatecheck.
//!
//! - [`S3Gateway`]: the storage protocol over `aws-sdk-s3`, plus
//!   unauthenticated fetches over plain HTTP
//! - [`RadosgwAdmin`]: the admin control plane through the `radosgw-admin` CLI
//! - [`MemoryGateway`]: an in-process model of both, used for rehearsals and tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anonymous;
pub mod memory;
pub mod radosgw;
pub mod s3;

pub use anonymous::AnonymousClient;
pub use memory::{MemoryGateway, MemoryStore};
pub use radosgw::{CommandOutput, CommandRunner, ProcessRunner, RadosgwAdmin};
pub use s3::{S3Gateway, S3Store};
