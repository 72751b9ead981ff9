//! Narrow interfaces over the external collaborators.
//!
//! The harness only ever talks to the object store and the admin control
//! plane through these traits. Implementations translate their native
//! failures into [`AdapterError`](crate::AdapterError) before returning.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AdapterResult;
use crate::types::{AccessLevel, BucketLimit, Credentials};

/// Data-plane operations issued with one principal's credentials.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates a bucket owned by the caller.
    async fn make_bucket(&self, bucket: &str) -> AdapterResult<()>;

    /// Removes an empty bucket.
    async fn remove_bucket(&self, bucket: &str) -> AdapterResult<()>;

    /// Uploads an object, replacing any existing one under the same key.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> AdapterResult<()>;

    /// Downloads an object's full content.
    async fn get_object(&self, bucket: &str, key: &str) -> AdapterResult<Bytes>;

    /// Removes an object.
    async fn remove_object(&self, bucket: &str, key: &str) -> AdapterResult<()>;

    /// Attaches a policy document, replacing any previous one.
    async fn set_bucket_policy(&self, bucket: &str, document: &str) -> AdapterResult<()>;

    /// Returns the attached policy document, or `None` if the bucket has none.
    async fn get_bucket_policy(&self, bucket: &str) -> AdapterResult<Option<String>>;

    /// Lists the names of the buckets the caller owns.
    async fn list_buckets(&self) -> AdapterResult<BTreeSet<String>>;

    /// Lists the object keys in a bucket.
    async fn list_objects(&self, bucket: &str) -> AdapterResult<BTreeSet<String>>;
}

/// Produces [`ObjectStore`] handles and serves unauthenticated fetches.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// Returns a client bound to the given credentials.
    async fn connect(&self, credentials: &Credentials) -> AdapterResult<Arc<dyn ObjectStore>>;

    /// Fetches an object without credentials. Any non-success answer is an error.
    async fn get_object_anonymous(&self, bucket: &str, key: &str) -> AdapterResult<Bytes>;
}

/// Identity and quota administration.
#[async_trait]
pub trait IdentityAdmin: Send + Sync {
    /// Creates a principal and returns its credentials.
    async fn create_principal(&self, user: &str, limit: BucketLimit)
        -> AdapterResult<Credentials>;

    /// Creates a sub-identity of `parent` with its own key pair.
    async fn create_sub_principal(
        &self,
        parent: &str,
        sub: &str,
        access: AccessLevel,
    ) -> AdapterResult<Credentials>;

    /// Removes a principal, its sub-identities and everything it owns.
    ///
    /// Fails with [`AdapterError::NotFound`](crate::AdapterError::NotFound)
    /// when the principal does not exist.
    async fn remove_principal(&self, user: &str) -> AdapterResult<()>;

    /// Transfers ownership of a bucket.
    async fn link_bucket(&self, bucket: &str, owner: &str) -> AdapterResult<()>;

    /// Sets the per-owner quota ceiling in bytes. Takes effect once enabled.
    async fn set_bucket_quota(&self, owner: &str, max_size: u64) -> AdapterResult<()>;

    /// Enables the per-owner quota.
    async fn enable_bucket_quota(&self, owner: &str) -> AdapterResult<()>;
}
