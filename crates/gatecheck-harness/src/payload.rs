//! Object payloads used by put probes.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;

/// Content type used when a payload does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A named payload declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSpec {
    /// Where the bytes come from.
    #[serde(flatten)]
    pub source: PayloadSource,
    /// Content type sent with the upload.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

/// Source of payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadSource {
    /// Literal UTF-8 text.
    Inline(String),
    /// A file, relative paths resolved against the run's payload directory.
    File(PathBuf),
    /// Deterministic pseudo-random bytes.
    Generated {
        /// Length in bytes.
        size: u64,
        /// RNG seed.
        #[serde(default)]
        seed: u64,
    },
}

impl PayloadSpec {
    /// Inline text payload.
    #[must_use]
    pub fn inline(text: impl Into<String>) -> Self {
        Self { source: PayloadSource::Inline(text.into()), content_type: default_content_type() }
    }

    /// Generated payload of `size` bytes.
    #[must_use]
    pub fn generated(size: u64, seed: u64) -> Self {
        Self {
            source: PayloadSource::Generated { size, seed },
            content_type: default_content_type(),
        }
    }

    /// File payload.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { source: PayloadSource::File(path.into()), content_type: default_content_type() }
    }

    /// Overrides the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Produces the payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Payload`] if a file cannot be read.
    pub async fn resolve(&self, name: &str, base_dir: &Path) -> Result<Payload, ScenarioError> {
        let body = match &self.source {
            PayloadSource::Inline(text) => Bytes::from(text.clone()),
            PayloadSource::File(path) => {
                let full = if path.is_absolute() { path.clone() } else { base_dir.join(path) };
                let data = tokio::fs::read(&full).await.map_err(|e| ScenarioError::Payload {
                    name: name.to_string(),
                    reason: format!("{}: {e}", full.display()),
                })?;
                Bytes::from(data)
            }
            PayloadSource::Generated { size, seed } => {
                let len = usize::try_from(*size).map_err(|_| ScenarioError::Payload {
                    name: name.to_string(),
                    reason: format!("size {size} does not fit in memory"),
                })?;
                let mut data = vec![0u8; len];
                StdRng::seed_from_u64(*seed).fill_bytes(&mut data);
                Bytes::from(data)
            }
        };
        Ok(Payload { body, content_type: self.content_type.clone() })
    }
}

/// Resolved payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Object content.
    pub body: Bytes,
    /// Content type.
    pub content_type: String,
}
