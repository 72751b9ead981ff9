// Copyright 2024 The Gatecheck Authors
// SPDX-License-Identifier: Apache-2.0

//! Storage protocol adapter over `aws-sdk-s3`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials as SdkCredentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{
    RequestChecksumCalculation, ResponseChecksumValidation, SharedHttpClient,
};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_http_client::tls;
use bytes::Bytes;
use gatecheck_core::{
    AdapterError, AdapterResult, Credentials, EndpointConfig, ObjectStore, ObjectStoreGateway,
    S3ErrorCode, TlsMode,
};
use tracing::debug;

use crate::anonymous::AnonymousClient;

/// Produces SDK clients for the configured gateway.
pub struct S3Gateway {
    endpoint: EndpointConfig,
    call_timeout: Duration,
    http_client: Option<SharedHttpClient>,
    anonymous: AnonymousClient,
}

impl S3Gateway {
    /// Creates a gateway for `endpoint`. Every call is bounded by `call_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] if the CA bundle cannot be loaded.
    pub fn new(endpoint: &EndpointConfig, call_timeout: Duration) -> AdapterResult<Self> {
        let ca_bundle = match &endpoint.tls {
            TlsMode::System => None,
            TlsMode::CaBundle(path) => Some(std::fs::read(path).map_err(|e| {
                AdapterError::Transport(format!("failed to read {}: {e}", path.display()))
            })?),
        };

        let http_client = ca_bundle.as_deref().map(https_client).transpose()?;
        let anonymous = AnonymousClient::new(&endpoint.url, ca_bundle.as_deref(), call_timeout)?;

        Ok(Self { endpoint: endpoint.clone(), call_timeout, http_client, anonymous })
    }

    fn client(&self, credentials: &Credentials) -> Client {
        let provider = SdkCredentials::new(
            &credentials.access_key,
            &credentials.secret_key,
            None,
            None,
            "gatecheck",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.endpoint.region.clone()))
            .endpoint_url(&self.endpoint.url)
            .credentials_provider(provider)
            .force_path_style(self.endpoint.force_path_style)
            .retry_config(RetryConfig::standard().with_max_attempts(self.endpoint.max_attempts))
            .timeout_config(TimeoutConfig::builder().operation_timeout(self.call_timeout).build())
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired);

        if let Some(http_client) = &self.http_client {
            builder = builder.http_client(http_client.clone());
        }

        Client::from_conf(builder.build())
    }
}

fn https_client(pem: &[u8]) -> AdapterResult<SharedHttpClient> {
    let trust_store =
        tls::TrustStore::empty().with_native_roots(false).with_pem_certificate(pem.to_vec());
    let context = tls::TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .map_err(|e| AdapterError::Transport(format!("invalid CA bundle: {e}")))?;

    Ok(aws_smithy_http_client::Builder::new()
        .tls_provider(tls::Provider::Rustls(tls::rustls_provider::CryptoMode::Ring))
        .tls_context(context)
        .build_https())
}

#[async_trait]
impl ObjectStoreGateway for S3Gateway {
    async fn connect(&self, credentials: &Credentials) -> AdapterResult<Arc<dyn ObjectStore>> {
        debug!(user = %credentials.user, endpoint = %self.endpoint.url, "Creating S3 client");
        Ok(Arc::new(S3Store { client: self.client(credentials), user: credentials.user.clone() }))
    }

    async fn get_object_anonymous(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        self.anonymous.get_object(bucket, key).await
    }
}

/// An SDK client bound to one principal's credentials.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    user: String,
}

impl S3Store {
    /// The user id the client signs as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Maps an SDK failure onto the adapter taxonomy.
fn classify<E>(err: SdkError<E>) -> AdapterError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(ctx) => AdapterError::from_s3_response(
            ctx.err().code(),
            ctx.err().message(),
            ctx.raw().status().as_u16(),
        ),
        SdkError::TimeoutError(_) => AdapterError::Transport("operation timed out".to_string()),
        SdkError::ResponseError(_) => {
            AdapterError::Malformed(DisplayErrorContext(&err).to_string())
        }
        _ => AdapterError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn make_bucket(&self, bucket: &str) -> AdapterResult<()> {
        self.client.create_bucket().bucket(bucket).send().await.map_err(classify)?;
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> AdapterResult<()> {
        self.client.delete_bucket().bucket(bucket).send().await.map_err(classify)?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> AdapterResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        let output =
            self.client.get_object().bucket(bucket).key(key).send().await.map_err(classify)?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| AdapterError::Transport(format!("failed to read body: {e}")))?;
        Ok(body.into_bytes())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> AdapterResult<()> {
        self.client.delete_object().bucket(bucket).key(key).send().await.map_err(classify)?;
        Ok(())
    }

    async fn set_bucket_policy(&self, bucket: &str, document: &str) -> AdapterResult<()> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(document)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> AdapterResult<Option<String>> {
        match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => Ok(output.policy().map(str::to_string)),
            Err(err)
                if err.as_service_error().and_then(ProvideErrorMetadata::code)
                    == Some(S3ErrorCode::NoSuchBucketPolicy.as_str()) =>
            {
                Ok(None)
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn list_buckets(&self) -> AdapterResult<BTreeSet<String>> {
        let output = self.client.list_buckets().send().await.map_err(classify)?;
        Ok(output.buckets().iter().filter_map(|b| b.name().map(str::to_string)).collect())
    }

    async fn list_objects(&self, bucket: &str) -> AdapterResult<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(classify)?;

            keys.extend(output.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match output.next_continuation_token() {
                Some(next) if output.is_truncated() == Some(true) => token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn gateway(url: &str) -> S3Gateway {
        let endpoint = EndpointConfig { url: url.to_string(), ..Default::default() };
        S3Gateway::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    fn error_xml(code: &str, message: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Error><Code>{code}</Code><Message>{message}</Message>\
             <RequestId>tx0</RequestId></Error>"
        )
    }

    async fn store(server: &MockServer) -> Arc<dyn ObjectStore> {
        gateway(&server.uri())
            .connect(&Credentials::new("alice", "AKIAALICE", "alice-secret"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_access_denied_is_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b1/o1"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(error_xml("AccessDenied", "Access Denied")),
            )
            .mount(&server)
            .await;

        let err = store(&server).await.get_object("b1", "o1").await.unwrap_err();
        assert!(matches!(err, AdapterError::PermissionDenied(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/b1/big"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(error_xml("QuotaExceeded", "")),
            )
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .put_object("b1", "big", Bytes::from_static(b"data"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::QuotaExceeded(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_list_buckets() {
        let server = MockServer::start().await;
        let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
            <ListAllMyBucketsResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
            <Owner><ID>alice</ID><DisplayName>alice</DisplayName></Owner>\
            <Buckets>\
            <Bucket><Name>b1</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>\
            <Bucket><Name>b2</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>\
            </Buckets></ListAllMyBucketsResult>";
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let buckets = store(&server).await.list_buckets().await.unwrap();
        assert_eq!(buckets, BTreeSet::from(["b1".to_string(), "b2".to_string()]));
    }

    #[tokio::test]
    async fn test_missing_policy_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b1"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(error_xml("NoSuchBucketPolicy", "no policy")),
            )
            .mount(&server)
            .await;

        assert_eq!(store(&server).await.get_bucket_policy("b1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_service_unavailable_is_infrastructure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b1/o1"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(error_xml("ServiceUnavailable", "try later")),
            )
            .mount(&server)
            .await;

        let err = store(&server).await.get_object("b1", "o1").await.unwrap_err();
        assert!(err.is_infrastructure(), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport() {
        let gw = gateway("http://127.0.0.1:1");
        let store = gw.connect(&Credentials::new("alice", "AK", "SK")).await.unwrap();
        let err = store.list_buckets().await.unwrap_err();
        assert!(err.is_infrastructure(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_anonymous_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private/o1"))
            .respond_with(ResponseTemplate::new(403).set_body_string(error_xml("AccessDenied", "")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken/o1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gw = gateway(&server.uri());
        assert_eq!(gw.get_object_anonymous("public", "o1").await.unwrap(), Bytes::from("hello"));
        assert!(matches!(
            gw.get_object_anonymous("private", "o1").await.unwrap_err(),
            AdapterError::PermissionDenied(_)
        ));
        let err = gw.get_object_anonymous("broken", "o1").await.unwrap_err();
        assert!(!err.is_infrastructure(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_missing_ca_bundle_fails() {
        let endpoint = EndpointConfig {
            url: "https://gw.local".to_string(),
            tls: TlsMode::CaBundle("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let err = S3Gateway::new(&endpoint, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, AdapterError::Transport(_)));
    }
}
