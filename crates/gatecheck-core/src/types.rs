// Copyright 2024 The Gatecheck Authors
// SPDX-License-Identifier: Apache-2.0

//! Common types used throughout gatecheck.

use serde::{Deserialize, Serialize};

/// An S3 access key pair issued by the admin control plane.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// The user id the key belongs to (`user` or `user:sub`).
    pub user: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
}

impl Credentials {
    /// Creates a new credential pair.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self { user: user.into(), access_key: access_key.into(), secret_key: secret_key.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("access_key", &self.access_key)
            .field("secret_key", &mask_secret(&self.secret_key))
            .finish()
    }
}

/// Masks all but the first four characters of a secret.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        "*".repeat(secret.len())
    } else {
        format!("{}****", &secret[..4])
    }
}

/// How many buckets a principal may create.
///
/// Serialized as the integer the admin plane understands: `0` means
/// unlimited, `-1` disables bucket creation, a positive value is a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum BucketLimit {
    /// No limit on bucket creation.
    #[default]
    Unlimited,
    /// Bucket creation is disabled.
    Disabled,
    /// At most this many buckets.
    Max(u32),
}

impl BucketLimit {
    /// Returns the value passed to `--max-buckets`.
    #[must_use]
    pub const fn as_flag(&self) -> i64 {
        match self {
            Self::Unlimited => 0,
            Self::Disabled => -1,
            Self::Max(n) => *n as i64,
        }
    }

    /// Returns true if a principal owning `owned` buckets may create another.
    #[must_use]
    pub const fn allows_another(&self, owned: usize) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Disabled => false,
            Self::Max(n) => owned < *n as usize,
        }
    }
}

impl TryFrom<i64> for BucketLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unlimited),
            -1 => Ok(Self::Disabled),
            n if n > 0 && n <= i64::from(u32::MAX) => Ok(Self::Max(n as u32)),
            n => Err(format!("invalid bucket limit {n}: expected -1, 0 or a positive count")),
        }
    }
}

impl From<BucketLimit> for i64 {
    fn from(limit: BucketLimit) -> Self {
        limit.as_flag()
    }
}

/// Access level granted to a sub-identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Read objects and listings.
    Read,
    /// Write and delete objects.
    Write,
    /// Read and write.
    ReadWrite,
    /// Everything the parent can do.
    Full,
}

impl AccessLevel {
    /// Returns the value passed to `--access`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
            Self::Full => "full",
        }
    }

    /// Returns true if the level includes read access.
    #[must_use]
    pub const fn can_read(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite | Self::Full)
    }

    /// Returns true if the level includes write access.
    #[must_use]
    pub const fn can_write(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite | Self::Full)
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the user id of a sub-identity (`parent:sub`).
#[must_use]
pub fn sub_user_id(parent: &str, sub: &str) -> String {
    format!("{parent}:{sub}")
}

/// Returns the IAM principal ARN of a user id.
#[must_use]
pub fn principal_arn(user: &str) -> String {
    format!("arn:aws:iam:::user/{user}")
}

/// Returns the ARN of a bucket, or of the objects matching `key_pattern` in it.
#[must_use]
pub fn bucket_arn(bucket: &str, key_pattern: Option<&str>) -> String {
    match key_pattern {
        Some(pattern) => format!("arn:aws:s3:::{bucket}/{pattern}"),
        None => format!("arn:aws:s3:::{bucket}"),
    }
}
