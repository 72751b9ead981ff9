//! Configuration management for gatecheck.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration for a conformance run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// S3 endpoint under test.
    pub endpoint: EndpointConfig,
    /// Admin control plane.
    pub admin: AdminConfig,
    /// Run behaviour.
    pub run: RunConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks values that parse but cannot drive a run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.url.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint.url must not be empty".to_string()));
        }
        if !self.endpoint.url.starts_with("http://") && !self.endpoint.url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "endpoint.url must start with http:// or https://, got {}",
                self.endpoint.url
            )));
        }
        if self.endpoint.max_attempts == 0 {
            return Err(ConfigError::Invalid("endpoint.max_attempts must be at least 1".into()));
        }
        if self.run.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("run.call_timeout_ms must be positive".into()));
        }
        if self.admin.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid("admin.command must name a program".into()));
        }
        Ok(())
    }
}

/// S3 endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the gateway, e.g. `http://127.0.0.1:8080`.
    pub url: String,
    /// Signing region.
    pub region: String,
    /// Address buckets as path segments rather than virtual hosts.
    pub force_path_style: bool,
    /// SDK attempts per call. 1 disables retries.
    pub max_attempts: u32,
    /// Server certificate verification.
    pub tls: TlsMode,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            region: "us-east-1".to_string(),
            force_path_style: true,
            max_attempts: 1,
            tls: TlsMode::System,
        }
    }
}

/// How the gateway's certificate is verified.
///
/// Verification cannot be switched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// The platform trust store.
    #[default]
    System,
    /// Only the certificates in this PEM bundle.
    CaBundle(PathBuf),
}

/// Admin control plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Program and leading arguments, e.g. `["sudo", "radosgw-admin"]`.
    pub command: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { command: vec!["radosgw-admin".to_string()] }
    }
}

/// Run behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Deadline for every adapter call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Remove provisioned principals after the run.
    pub teardown: bool,
    /// Suffix appended to every principal id and bucket name.
    pub namespace: Option<String>,
    /// Base directory for file payloads.
    pub payload_dir: PathBuf,
}

impl RunConfig {
    /// Returns the per-call deadline.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            teardown: true,
            namespace: None,
            payload_dir: PathBuf::from("."),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}
