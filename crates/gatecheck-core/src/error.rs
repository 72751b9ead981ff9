// Copyright 2024 The Gatecheck Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the adapters and the harness.
//!
//! Adapters never leak their own error representation. Every call either
//! succeeds or fails with an [`AdapterError`], which the harness classifies
//! into an authorization outcome or an infrastructure failure.

use thiserror::Error;

/// A specialized `Result` type for adapter calls.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Marker the storage protocol uses to signal an exhausted quota.
pub const QUOTA_EXCEEDED_MARKER: &str = "QuotaExceeded";

/// S3 error codes the harness knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3ErrorCode {
    /// Access denied.
    AccessDenied,
    /// The AWS access key ID you provided does not exist in our records.
    InvalidAccessKeyId,
    /// The request signature we calculated does not match the signature you provided.
    SignatureDoesNotMatch,
    /// The specified bucket already exists.
    BucketAlreadyExists,
    /// The bucket already exists and is owned by the caller.
    BucketAlreadyOwnedByYou,
    /// The bucket you tried to delete is not empty.
    BucketNotEmpty,
    /// The caller may not create any more buckets.
    TooManyBuckets,
    /// The specified bucket does not exist.
    NoSuchBucket,
    /// The specified key does not exist.
    NoSuchKey,
    /// The bucket has no policy attached.
    NoSuchBucketPolicy,
    /// The policy document is not valid.
    MalformedPolicy,
    /// The owner's storage quota would be exceeded.
    QuotaExceeded,
    /// The specified argument is not valid.
    InvalidArgument,
    /// Internal server error.
    InternalError,
}

impl S3ErrorCode {
    /// Returns the HTTP status code the protocol associates with this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::AccessDenied
            | Self::InvalidAccessKeyId
            | Self::SignatureDoesNotMatch
            | Self::QuotaExceeded => 403,
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchBucketPolicy => 404,
            Self::BucketAlreadyExists | Self::BucketAlreadyOwnedByYou | Self::BucketNotEmpty => {
                409
            }
            Self::TooManyBuckets | Self::MalformedPolicy | Self::InvalidArgument => 400,
            Self::InternalError => 500,
        }
    }

    /// Returns the S3 error code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::BucketAlreadyOwnedByYou => "BucketAlreadyOwnedByYou",
            Self::BucketNotEmpty => "BucketNotEmpty",
            Self::TooManyBuckets => "TooManyBuckets",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchBucketPolicy => "NoSuchBucketPolicy",
            Self::MalformedPolicy => "MalformedPolicy",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::InvalidArgument => "InvalidArgument",
            Self::InternalError => "InternalError",
        }
    }

    /// Parses an error code string as returned in an S3 error body.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "AccessDenied" => Some(Self::AccessDenied),
            "InvalidAccessKeyId" => Some(Self::InvalidAccessKeyId),
            "SignatureDoesNotMatch" => Some(Self::SignatureDoesNotMatch),
            "BucketAlreadyExists" => Some(Self::BucketAlreadyExists),
            "BucketAlreadyOwnedByYou" => Some(Self::BucketAlreadyOwnedByYou),
            "BucketNotEmpty" => Some(Self::BucketNotEmpty),
            "TooManyBuckets" => Some(Self::TooManyBuckets),
            "NoSuchBucket" => Some(Self::NoSuchBucket),
            "NoSuchKey" => Some(Self::NoSuchKey),
            "NoSuchBucketPolicy" => Some(Self::NoSuchBucketPolicy),
            "MalformedPolicy" => Some(Self::MalformedPolicy),
            "QuotaExceeded" => Some(Self::QuotaExceeded),
            "InvalidArgument" => Some(Self::InvalidArgument),
            "InternalError" => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl std::fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified adapter failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The principal, bucket, or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller is not authorized for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The owner's quota would be exceeded by the operation.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The collaborator answered with a protocol-level refusal of another kind.
    #[error("{code}: {message}")]
    Rejected {
        /// Error code reported by the collaborator.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The collaborator could not be reached or the call timed out.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The collaborator answered with something that could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AdapterError {
    /// Creates a rejection with the given code and message.
    #[must_use]
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected { code: code.into(), message: message.into() }
    }

    /// Classifies an S3 error response.
    ///
    /// `code` is the `<Code>` element of the error body (absent for bodiless
    /// responses such as HEAD), `status` the HTTP status.
    #[must_use]
    pub fn from_s3_response(code: Option<&str>, message: Option<&str>, status: u16) -> Self {
        let message = message.unwrap_or_default().to_string();

        if code == Some(QUOTA_EXCEEDED_MARKER) || message.contains(QUOTA_EXCEEDED_MARKER) {
            return Self::QuotaExceeded(message);
        }

        if status >= 500 {
            return Self::Transport(match code {
                Some(code) => format!("HTTP {status} {code}: {message}"),
                None => format!("HTTP {status}"),
            });
        }

        match code.and_then(S3ErrorCode::parse) {
            Some(known) => Self::from_code(known, message),
            None => match (code, status) {
                (Some(code), _) => Self::rejected(code, message),
                (None, 403) => Self::PermissionDenied(format!("HTTP {status}")),
                (None, 404) => Self::NotFound(format!("HTTP {status}")),
                (None, s) => Self::rejected(format!("HTTP {s}"), message),
            },
        }
    }

    /// Maps a known S3 error code onto the classified taxonomy.
    #[must_use]
    pub fn from_code(code: S3ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            S3ErrorCode::AccessDenied
            | S3ErrorCode::InvalidAccessKeyId
            | S3ErrorCode::SignatureDoesNotMatch => Self::PermissionDenied(message),
            S3ErrorCode::NoSuchBucket
            | S3ErrorCode::NoSuchKey
            | S3ErrorCode::NoSuchBucketPolicy => Self::NotFound(message),
            S3ErrorCode::QuotaExceeded => Self::QuotaExceeded(message),
            S3ErrorCode::InternalError => Self::Transport(format!("{code}: {message}")),
            other => Self::rejected(other.as_str(), message),
        }
    }

    /// Returns true for failures after which no further result is meaningful.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Malformed(_))
    }

    /// Returns true if the error reports a missing principal or resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
