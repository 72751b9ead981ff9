//! Unauthenticated object fetches.
//!
//! Anonymous reads bypass the SDK entirely: a plain `GET` against the
//! path-style object URL with no signature.

use std::time::Duration;

use bytes::Bytes;
use gatecheck_core::{AdapterError, AdapterResult};
use reqwest::{Certificate, Client};
use serde::Deserialize;
use tracing::debug;

/// The `<Error>` document S3 returns with a failed request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "Error", rename_all = "PascalCase")]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for unsigned object reads.
#[derive(Debug, Clone)]
pub struct AnonymousClient {
    http: Client,
    base_url: String,
}

impl AnonymousClient {
    /// Creates a client for the gateway at `base_url`.
    ///
    /// With `ca_bundle` set, only the certificates in that PEM bundle are trusted.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] if the TLS setup is rejected.
    pub fn new(base_url: &str, ca_bundle: Option<&[u8]>, timeout: Duration) -> AdapterResult<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(pem) = ca_bundle {
            let cert = Certificate::from_pem(pem)
                .map_err(|e| AdapterError::Transport(format!("invalid CA bundle: {e}")))?;
            builder = builder.tls_built_in_root_certs(false).add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| AdapterError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Returns the object URL for `bucket/key`.
    #[must_use]
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, bucket, key)
    }

    /// Fetches an object without credentials.
    ///
    /// Every answer other than success is an authorization outcome, including
    /// server errors. Only a failure to get any answer is infrastructure.
    ///
    /// # Errors
    ///
    /// Returns the classified refusal, or [`AdapterError::Transport`] if the
    /// gateway could not be reached.
    pub async fn get_object(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        let url = self.object_url(bucket, key);
        let response = self.http.get(&url).send().await.map_err(transport)?;
        let status = response.status();
        debug!(%url, status = status.as_u16(), "anonymous GET");

        if status.is_success() {
            return response.bytes().await.map_err(transport);
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_refusal(status.as_u16(), &text))
    }
}

fn transport(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Transport(format!("request timed out: {err}"))
    } else {
        AdapterError::Transport(err.to_string())
    }
}

fn classify_refusal(status: u16, body: &str) -> AdapterError {
    let parsed: ErrorBody = quick_xml::de::from_str(body).unwrap_or_default();
    let err =
        AdapterError::from_s3_response(parsed.code.as_deref(), parsed.message.as_deref(), status);
    if err.is_infrastructure() {
        let code = parsed.code.unwrap_or_else(|| format!("HTTP {status}"));
        return AdapterError::rejected(code, parsed.message.unwrap_or_default());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_access_denied_body() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>"#;
        assert_eq!(
            classify_refusal(403, body),
            AdapterError::PermissionDenied("Access Denied".to_string())
        );
    }

    #[test]
    fn test_classify_server_error_is_a_refusal() {
        let err = classify_refusal(503, "");
        assert_eq!(err, AdapterError::rejected("HTTP 503", ""));
        assert!(!err.is_infrastructure());

        let body = "<Error><Code>InternalError</Code><Message>boom</Message></Error>";
        assert_eq!(classify_refusal(500, body), AdapterError::rejected("InternalError", "boom"));
    }

    #[test]
    fn test_object_url() {
        let client =
            AnonymousClient::new("http://gw.local:8080/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.object_url("b1", "o1"), "http://gw.local:8080/b1/o1");
    }
}
