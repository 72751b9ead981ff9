// Copyright 2024 The Gatecheck Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory reference gateway.
//!
//! Models the collaborator closely enough to rehearse scenarios without a
//! cluster: root principals with bucket limits, sub-identities scoped by
//! access level, bucket ownership and transfer, per-owner aggregate quota,
//! bucket policies and anonymous reads. Faults can be injected to exercise
//! the harness's abort paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gatecheck_core::policy::{BucketPolicy, PolicyDecision, RequestContext, S3Action};
use gatecheck_core::types::{principal_arn, sub_user_id};
use gatecheck_core::{
    AccessLevel, AdapterError, AdapterResult, BucketLimit, Credentials, IdentityAdmin,
    ObjectStore, ObjectStoreGateway, S3ErrorCode,
};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct Quota {
    max_size: Option<u64>,
    enabled: bool,
}

#[derive(Debug)]
struct User {
    limit: BucketLimit,
    quota: Quota,
}

#[derive(Debug)]
struct SubUser {
    parent: String,
    access: AccessLevel,
}

#[derive(Debug)]
struct Key {
    user: String,
    secret: String,
}

#[derive(Debug)]
struct Bucket {
    owner: String,
    objects: BTreeMap<String, Bytes>,
    policy: Option<(String, BucketPolicy)>,
}

/// Who is issuing a data-plane request.
#[derive(Debug, Clone)]
struct Caller {
    id: String,
    root: String,
    access: AccessLevel,
}

#[derive(Debug, Default)]
struct World {
    users: HashMap<String, User>,
    subusers: HashMap<String, SubUser>,
    keys: HashMap<String, Key>,
    buckets: BTreeMap<String, Bucket>,
    issued: u64,
}

fn denied(action: S3Action, resource: &str) -> AdapterError {
    AdapterError::PermissionDenied(format!("{action} on {resource}"))
}

fn no_such_bucket(bucket: &str) -> AdapterError {
    AdapterError::from_code(S3ErrorCode::NoSuchBucket, bucket)
}

fn no_such_user(user: &str) -> AdapterError {
    AdapterError::NotFound(format!("user {user} does not exist"))
}

impl World {
    fn issue_key(&mut self, user: &str) -> Credentials {
        self.issued += 1;
        let access_key = format!("MEM{:017}", self.issued);
        let secret = format!("{user}-secret-{:04}", self.issued);
        let key = Key { user: user.to_string(), secret: secret.clone() };
        self.keys.insert(access_key.clone(), key);
        Credentials::new(user, access_key, secret)
    }

    fn caller(&self, access_key: &str, secret: &str) -> AdapterResult<Caller> {
        let key = self
            .keys
            .get(access_key)
            .ok_or_else(|| AdapterError::from_code(S3ErrorCode::InvalidAccessKeyId, access_key))?;
        if key.secret != secret {
            return Err(AdapterError::from_code(S3ErrorCode::SignatureDoesNotMatch, access_key));
        }

        if let Some(sub) = self.subusers.get(&key.user) {
            return Ok(Caller {
                id: key.user.clone(),
                root: sub.parent.clone(),
                access: sub.access,
            });
        }
        Ok(Caller { id: key.user.clone(), root: key.user.clone(), access: AccessLevel::Full })
    }

    fn bucket(&self, name: &str) -> AdapterResult<&Bucket> {
        self.buckets.get(name).ok_or_else(|| no_such_bucket(name))
    }

    fn owned_by(&self, owner: &str) -> impl Iterator<Item = (&String, &Bucket)> + '_ {
        let owner = owner.to_string();
        self.buckets.iter().filter(move |(_, b)| b.owner == owner)
    }

    fn usage(&self, owner: &str) -> u64 {
        self.owned_by(owner)
            .flat_map(|(_, b)| b.objects.values())
            .map(|body| body.len() as u64)
            .sum()
    }

    /// Decides whether `caller` may take `action` on `bucket`/`key`.
    ///
    /// The caller's access level masks everything. An explicit policy deny
    /// beats ownership, which beats a policy allow.
    fn authorize(
        &self,
        caller: Option<&Caller>,
        action: S3Action,
        bucket: &str,
        key: Option<&str>,
    ) -> AdapterResult<()> {
        let record = self.bucket(bucket)?;
        let ctx = RequestContext::new(caller.map(|c| principal_arn(&c.id)), action, bucket, key);

        if let Some(caller) = caller {
            let permitted = if action.is_administrative() {
                caller.access == AccessLevel::Full
            } else if action.is_read() {
                caller.access.can_read()
            } else {
                caller.access.can_write()
            };
            if !permitted {
                return Err(denied(action, &ctx.resource));
            }
        }

        let decision =
            record.policy.as_ref().map_or(PolicyDecision::DefaultDeny, |(_, p)| p.evaluate(&ctx));
        let owner = caller.is_some_and(|c| c.root == record.owner);

        match decision {
            PolicyDecision::Deny => Err(denied(action, &ctx.resource)),
            _ if owner => Ok(()),
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::DefaultDeny => Err(denied(action, &ctx.resource)),
        }
    }

    fn purge(&mut self, user: &str) {
        let subs: Vec<String> = self
            .subusers
            .iter()
            .filter(|(_, s)| s.parent == user)
            .map(|(id, _)| id.clone())
            .collect();
        for sub in &subs {
            self.subusers.remove(sub);
        }
        self.keys.retain(|_, k| k.user != user && !subs.contains(&k.user));
        self.buckets.retain(|_, b| b.owner != user);
        self.users.remove(user);
    }
}

#[derive(Debug, Default)]
struct Inner {
    world: Mutex<World>,
    unreachable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

/// In-memory gateway implementing both the admin plane and the data plane.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Inner>,
}

impl MemoryGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(Some(latency));
        self
    }

    /// Sets or clears the per-call delay.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// While set, every call fails with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Root principals currently provisioned.
    #[must_use]
    pub fn principals(&self) -> BTreeSet<String> {
        self.inner.world.lock().users.keys().cloned().collect()
    }

    /// Current owner of a bucket.
    #[must_use]
    pub fn bucket_owner(&self, bucket: &str) -> Option<String> {
        self.inner.world.lock().buckets.get(bucket).map(|b| b.owner.clone())
    }

    /// Total bytes stored in buckets owned by `owner`.
    #[must_use]
    pub fn usage(&self, owner: &str) -> u64 {
        self.inner.world.lock().usage(owner)
    }

    async fn gate(&self) -> AdapterResult<()> {
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(AdapterError::Transport("gateway unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityAdmin for MemoryGateway {
    async fn create_principal(
        &self,
        user: &str,
        limit: BucketLimit,
    ) -> AdapterResult<Credentials> {
        self.gate().await?;
        let mut world = self.inner.world.lock();
        if world.users.contains_key(user) {
            return Err(AdapterError::rejected("UserAlreadyExists", format!("user {user} exists")));
        }
        world.users.insert(user.to_string(), User { limit, quota: Quota::default() });
        debug!(user, max_buckets = limit.as_flag(), "Created principal");
        Ok(world.issue_key(user))
    }

    async fn create_sub_principal(
        &self,
        parent: &str,
        sub: &str,
        access: AccessLevel,
    ) -> AdapterResult<Credentials> {
        self.gate().await?;
        let mut world = self.inner.world.lock();
        if !world.users.contains_key(parent) {
            return Err(no_such_user(parent));
        }
        let id = sub_user_id(parent, sub);
        if world.subusers.contains_key(&id) {
            return Err(AdapterError::rejected("SubuserExists", format!("subuser {id} exists")));
        }
        world.subusers.insert(id.clone(), SubUser { parent: parent.to_string(), access });
        debug!(user = %id, %access, "Created sub-principal");
        Ok(world.issue_key(&id))
    }

    async fn remove_principal(&self, user: &str) -> AdapterResult<()> {
        self.gate().await?;
        let mut world = self.inner.world.lock();
        if !world.users.contains_key(user) {
            return Err(no_such_user(user));
        }
        world.purge(user);
        debug!(user, "Removed principal");
        Ok(())
    }

    async fn link_bucket(&self, bucket: &str, owner: &str) -> AdapterResult<()> {
        self.gate().await?;
        let mut world = self.inner.world.lock();
        if !world.users.contains_key(owner) {
            return Err(no_such_user(owner));
        }
        let record = world.buckets.get_mut(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        record.owner = owner.to_string();
        Ok(())
    }

    async fn set_bucket_quota(&self, owner: &str, max_size: u64) -> AdapterResult<()> {
        self.gate().await?;
        let mut world = self.inner.world.lock();
        let user = world.users.get_mut(owner).ok_or_else(|| no_such_user(owner))?;
        user.quota.max_size = Some(max_size);
        Ok(())
    }

    async fn enable_bucket_quota(&self, owner: &str) -> AdapterResult<()> {
        self.gate().await?;
        let mut world = self.inner.world.lock();
        let user = world.users.get_mut(owner).ok_or_else(|| no_such_user(owner))?;
        user.quota.enabled = true;
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreGateway for MemoryGateway {
    async fn connect(&self, credentials: &Credentials) -> AdapterResult<Arc<dyn ObjectStore>> {
        self.gate().await?;
        Ok(Arc::new(MemoryStore {
            gateway: self.clone(),
            access_key: credentials.access_key.clone(),
            secret_key: credentials.secret_key.clone(),
        }))
    }

    async fn get_object_anonymous(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        self.gate().await?;
        let world = self.inner.world.lock();
        world.authorize(None, S3Action::GetObject, bucket, Some(key))?;
        world
            .bucket(bucket)?
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| AdapterError::from_code(S3ErrorCode::NoSuchKey, key))
    }
}

/// A data-plane handle bound to one key pair of a [`MemoryGateway`].
///
/// The key is resolved on every call, so a handle outlives its principal
/// and fails with an access error afterwards.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    gateway: MemoryGateway,
    access_key: String,
    secret_key: String,
}

impl MemoryStore {
    async fn with_world<T>(
        &self,
        f: impl FnOnce(&mut World, &Caller) -> AdapterResult<T>,
    ) -> AdapterResult<T> {
        self.gateway.gate().await?;
        let mut world = self.gateway.inner.world.lock();
        let caller = world.caller(&self.access_key, &self.secret_key)?;
        f(&mut world, &caller)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn make_bucket(&self, bucket: &str) -> AdapterResult<()> {
        self.with_world(|world, caller| {
            if !caller.access.can_write() {
                return Err(denied(S3Action::CreateBucket, bucket));
            }
            if let Some(existing) = world.buckets.get(bucket) {
                let code = if existing.owner == caller.root {
                    S3ErrorCode::BucketAlreadyOwnedByYou
                } else {
                    S3ErrorCode::BucketAlreadyExists
                };
                return Err(AdapterError::from_code(code, bucket));
            }

            let limit = world.users.get(&caller.root).map_or(BucketLimit::Disabled, |u| u.limit);
            if !limit.allows_another(world.owned_by(&caller.root).count()) {
                return Err(AdapterError::from_code(
                    S3ErrorCode::TooManyBuckets,
                    format!("{} may not create more buckets", caller.root),
                ));
            }

            world.buckets.insert(
                bucket.to_string(),
                Bucket { owner: caller.root.clone(), objects: BTreeMap::new(), policy: None },
            );
            Ok(())
        })
        .await
    }

    async fn remove_bucket(&self, bucket: &str) -> AdapterResult<()> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::DeleteBucket, bucket, None)?;
            if !world.bucket(bucket)?.objects.is_empty() {
                return Err(AdapterError::from_code(S3ErrorCode::BucketNotEmpty, bucket));
            }
            world.buckets.remove(bucket);
            Ok(())
        })
        .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> AdapterResult<()> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::PutObject, bucket, Some(key))?;

            let record = world.bucket(bucket)?;
            let quota = world.users.get(&record.owner).map(|u| u.quota).unwrap_or_default();
            if let (true, Some(max_size)) = (quota.enabled, quota.max_size) {
                let replaced = record.objects.get(key).map_or(0, |b| b.len() as u64);
                let after = world.usage(&record.owner) - replaced + body.len() as u64;
                if after > max_size {
                    return Err(AdapterError::from_code(
                        S3ErrorCode::QuotaExceeded,
                        format!("{after} bytes exceeds quota of {max_size}"),
                    ));
                }
            }

            if let Some(record) = world.buckets.get_mut(bucket) {
                record.objects.insert(key.to_string(), body);
            }
            Ok(())
        })
        .await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::GetObject, bucket, Some(key))?;
            world
                .bucket(bucket)?
                .objects
                .get(key)
                .cloned()
                .ok_or_else(|| AdapterError::from_code(S3ErrorCode::NoSuchKey, key))
        })
        .await
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> AdapterResult<()> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::DeleteObject, bucket, Some(key))?;
            if let Some(record) = world.buckets.get_mut(bucket) {
                record.objects.remove(key);
            }
            Ok(())
        })
        .await
    }

    async fn set_bucket_policy(&self, bucket: &str, document: &str) -> AdapterResult<()> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::PutBucketPolicy, bucket, None)?;
            let policy = BucketPolicy::from_json(document)
                .and_then(|p| p.validate().map(|()| p))
                .map_err(|e| AdapterError::from_code(S3ErrorCode::MalformedPolicy, e.to_string()))?;
            if let Some(record) = world.buckets.get_mut(bucket) {
                record.policy = Some((document.to_string(), policy));
            }
            Ok(())
        })
        .await
    }

    async fn get_bucket_policy(&self, bucket: &str) -> AdapterResult<Option<String>> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::GetBucketPolicy, bucket, None)?;
            Ok(world.bucket(bucket)?.policy.as_ref().map(|(doc, _)| doc.clone()))
        })
        .await
    }

    async fn list_buckets(&self) -> AdapterResult<BTreeSet<String>> {
        self.with_world(|world, caller| {
            Ok(world.owned_by(&caller.root).map(|(name, _)| name.clone()).collect())
        })
        .await
    }

    async fn list_objects(&self, bucket: &str) -> AdapterResult<BTreeSet<String>> {
        self.with_world(|world, caller| {
            world.authorize(Some(caller), S3Action::ListBucket, bucket, None)?;
            Ok(world.bucket(bucket)?.objects.keys().cloned().collect())
        })
        .await
    }
}
