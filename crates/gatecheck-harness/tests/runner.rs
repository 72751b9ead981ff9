// Copyright 2024 The Gatecheck Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end runs against the in-memory reference gateway.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gatecheck_adapters::MemoryGateway;
use gatecheck_core::{
    AccessLevel, AdapterError, AdapterResult, BucketLimit, Credentials, IdentityAdmin,
    ObjectStore, ObjectStoreGateway,
};
use gatecheck_harness::payload::PayloadSpec;
use gatecheck_harness::{
    builtin, builtin_names, Actor, Expectation, Mismatch, Operation, Outcome, PrincipalSpec, Probe,
    RunOptions, RunOutcome, RunState, Runner, Scenario,
};
use tempfile::TempDir;

fn runner(gw: &MemoryGateway, options: RunOptions) -> Runner {
    Runner::new(Arc::new(gw.clone()), Arc::new(gw.clone()), options)
}

fn probe(actor: &str, operation: Operation, expect: Expectation) -> Probe {
    Probe::new(Actor::from(actor.to_string()), operation, expect)
}

fn make_bucket(bucket: &str) -> Operation {
    Operation::MakeBucket { bucket: bucket.to_string() }
}

fn put(bucket: &str, key: &str, payload: &str) -> Operation {
    Operation::PutObject {
        bucket: bucket.to_string(),
        key: key.to_string(),
        payload: payload.to_string(),
    }
}

fn get(bucket: &str, key: &str) -> Operation {
    Operation::GetObject { bucket: bucket.to_string(), key: key.to_string() }
}

// =============================================================================
// Built-in scenarios
// =============================================================================

#[tokio::test]
async fn test_builtins_pass_against_reference_gateway() {
    for name in builtin_names() {
        let gw = MemoryGateway::new();
        let scenario = builtin(name).unwrap();
        let report = runner(&gw, RunOptions::default()).run(&scenario).await;

        assert!(report.passed(), "{name} failed:\n{report}");
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.state, RunState::TornDown);
        assert_eq!(report.records.len(), scenario.probes().len());
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(gw.principals().is_empty(), "{name} left {:?}", gw.principals());
    }
}

#[tokio::test]
async fn test_quota_probe_reports_quota_exceeded() {
    let gw = MemoryGateway::new();
    let report = runner(&gw, RunOptions::default()).run(&builtin("subuser-access").unwrap()).await;

    let quota = report
        .records
        .iter()
        .find(|r| r.label.as_deref() == Some("2 MiB upload against a 1 MiB quota"))
        .unwrap();
    assert_eq!(quota.actual, Outcome::QuotaExceeded);
    assert!(quota.passed());
}

#[tokio::test]
async fn test_namespaced_run_without_teardown() {
    let gw = MemoryGateway::new();
    let options = RunOptions {
        namespace: Some("ci-7".to_string()),
        teardown: false,
        ..RunOptions::default()
    };
    let report = runner(&gw, options).run(&builtin("ownership-transfer").unwrap()).await;

    assert!(report.passed(), "{report}");
    assert_eq!(report.namespace.as_deref(), Some("ci-7"));
    assert_eq!(report.state, RunState::Verified);
    assert!(gw.principals().contains("lxdadmin-ci-7"));
    assert!(gw.principals().contains("testwrite-ci-7"));
}

#[tokio::test]
async fn test_leftover_principals_are_replaced() {
    let gw = MemoryGateway::new();
    let stale = gw.create_principal("lxdadmin", BucketLimit::Unlimited).await.unwrap();
    gw.connect(&stale).await.unwrap().make_bucket("b1").await.unwrap();

    let scenario = builtin("ownership-transfer").unwrap();
    let report = runner(&gw, RunOptions::default()).run(&scenario).await;
    assert!(report.passed(), "{report}");
}

#[tokio::test]
async fn test_invalid_namespace_is_setup_failure() {
    let gw = MemoryGateway::new();
    let options = RunOptions { namespace: Some("Bad_NS".to_string()), ..RunOptions::default() };
    let report = runner(&gw, options).run(&builtin("ownership-transfer").unwrap()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::SetupFailed { ref step, .. } if step == "namespace"
    ));
    assert_eq!(report.exit_code(), 2);
}

// =============================================================================
// Assertion failures
// =============================================================================

#[tokio::test]
async fn test_wrong_expectation_is_recorded_and_run_continues() {
    let scenario = Scenario::builder("wrong")
        .principal(PrincipalSpec::admin("admin"))
        .payload("p", PayloadSpec::inline("x"))
        .probe(probe("admin", make_bucket("b1"), Expectation::Deny))
        .probe(probe("admin", put("b1", "o1", "p"), Expectation::Allow))
        .probe(probe("admin", get("b1", "o1"), Expectation::Allow))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let report = runner(&gw, RunOptions::default()).run(&scenario).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.records.len(), 3);
    assert_eq!(report.failures(), 1);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.records[0].actual, Outcome::Allow);
    assert!(report.records[1].passed());
    assert!(report.records[2].passed());
    assert!(report.to_string().contains("expected deny, got allow"));
}

#[tokio::test]
async fn test_listing_mismatch() {
    let scenario = Scenario::builder("listing")
        .principal(PrincipalSpec::admin("admin"))
        .bucket("b1", "admin", None)
        .probe(probe("admin", Operation::ListBuckets, Expectation::set(["b2"])))
        .build()
        .unwrap();

    let report = runner(&MemoryGateway::new(), RunOptions::default()).run(&scenario).await;
    assert_eq!(report.failures(), 1);
    assert!(report.to_string().contains("missing {b2}, unexpected {b1}"), "{report}");
}

// =============================================================================
// Setup
// =============================================================================

#[tokio::test]
async fn test_setup_buckets_are_created_and_linked() {
    let scenario = Scenario::builder("setup")
        .principal(PrincipalSpec::admin("admin"))
        .principal(PrincipalSpec::writer("writer"))
        .bucket("shared", "admin", Some("writer"))
        .probe(probe("writer", Operation::ListBuckets, Expectation::set(["shared"])))
        .probe(probe("admin", Operation::ListBuckets, Expectation::set(Vec::<String>::new())))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let options = RunOptions { namespace: Some("t1".to_string()), ..RunOptions::default() };
    let report = runner(&gw, options).run(&scenario).await;
    assert!(report.passed(), "{report}");
}

#[tokio::test]
async fn test_file_payload() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("body.bin"), b"from disk").unwrap();

    let scenario = Scenario::builder("file-payload")
        .principal(PrincipalSpec::admin("admin"))
        .bucket("b1", "admin", None)
        .payload("disk", PayloadSpec::file("body.bin"))
        .probe(probe("admin", put("b1", "o1", "disk"), Expectation::Allow))
        .probe(probe("admin", get("b1", "o1"), Expectation::Allow))
        .build()
        .unwrap();

    let options = RunOptions { payload_dir: dir.path().to_path_buf(), ..RunOptions::default() };
    let report = runner(&MemoryGateway::new(), options).run(&scenario).await;
    assert!(report.passed(), "{report}");
}

#[tokio::test]
async fn test_missing_payload_file_is_setup_failure() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::builder("missing-payload")
        .principal(PrincipalSpec::admin("admin"))
        .payload("big", PayloadSpec::file("missing.bin"))
        .probe(probe("admin", make_bucket("b1"), Expectation::Allow))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let options = RunOptions { payload_dir: dir.path().to_path_buf(), ..RunOptions::default() };
    let report = runner(&gw, options).run(&scenario).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::SetupFailed { ref step, .. } if step == "payload big"
    ));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.state, RunState::Aborted);
    assert!(report.records.is_empty());
}

#[tokio::test]
async fn test_rejected_provisioning_is_setup_failure() {
    let scenario = Scenario::builder("bad-setup")
        .principal(PrincipalSpec::writer("writer"))
        .bucket("b1", "writer", None)
        .probe(probe("writer", Operation::ListBuckets, Expectation::set(["b1"])))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let report = runner(&gw, RunOptions::default()).run(&scenario).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::SetupFailed { ref step, .. } if step == "bucket b1"
    ));
    assert_eq!(report.exit_code(), 2);
    assert!(gw.principals().is_empty(), "teardown still runs after a setup failure");
}

// =============================================================================
// Infrastructure failures
// =============================================================================

#[tokio::test]
async fn test_unreachable_gateway_aborts() {
    let gw = MemoryGateway::new();
    gw.set_unreachable(true);
    let scenario = builtin("ownership-transfer").unwrap();
    let report = runner(&gw, RunOptions::default()).run(&scenario).await;

    match &report.outcome {
        RunOutcome::Aborted { phase, probe, error } => {
            assert_eq!(*phase, RunState::Provisioning);
            assert_eq!(*probe, None);
            assert!(error.is_infrastructure());
        }
        other => panic!("expected abort, got {other}"),
    }
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.state, RunState::Aborted);
}

#[tokio::test(start_paused = true)]
async fn test_slow_gateway_hits_call_deadline() {
    let gw = MemoryGateway::new().with_latency(Duration::from_secs(5));
    let options = RunOptions { call_timeout: Duration::from_secs(1), ..RunOptions::default() };
    let report = runner(&gw, options).run(&builtin("explicit-policy").unwrap()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted { error: AdapterError::Transport(_), .. }
    ));
    assert_eq!(report.exit_code(), 3);
}

/// Serves the data plane from a [`MemoryGateway`] but cannot reach it anonymously.
struct AnonymousOutage(MemoryGateway);

#[async_trait]
impl ObjectStoreGateway for AnonymousOutage {
    async fn connect(&self, credentials: &Credentials) -> AdapterResult<Arc<dyn ObjectStore>> {
        self.0.connect(credentials).await
    }

    async fn get_object_anonymous(&self, _bucket: &str, _key: &str) -> AdapterResult<Bytes> {
        Err(AdapterError::Transport("connection reset by peer".to_string()))
    }
}

#[tokio::test]
async fn test_mid_run_outage_stops_at_probe() {
    let gw = MemoryGateway::new();
    let scenario = builtin("ownership-transfer").unwrap();
    let first_anonymous = scenario
        .probes()
        .iter()
        .position(|p| matches!(p.operation, Operation::GetObjectAnonymous { .. }))
        .unwrap();

    let gateway = AnonymousOutage(gw.clone());
    let runner = Runner::new(Arc::new(gw.clone()), Arc::new(gateway), RunOptions::default());
    let report = runner.run(&scenario).await;

    match &report.outcome {
        RunOutcome::Aborted { phase, probe, .. } => {
            assert_eq!(*phase, RunState::Running);
            assert_eq!(*probe, Some(first_anonymous));
        }
        other => panic!("expected abort, got {other}"),
    }
    assert_eq!(report.records.len(), first_anonymous);
    assert!(report.records.iter().all(|r| r.passed()));
    assert_eq!(report.state, RunState::Aborted);
    assert!(gw.principals().is_empty());
}

#[tokio::test]
async fn test_teardown_failures_become_warnings() {
    let gw = MemoryGateway::new();
    let scenario = Scenario::builder("teardown")
        .principal(PrincipalSpec::admin("admin"))
        .probe(probe("admin", make_bucket("b1"), Expectation::Allow))
        .build()
        .unwrap();

    // Remove the principal behind the runner's back so teardown finds nothing.
    struct Vanishing(MemoryGateway);

    #[async_trait]
    impl ObjectStoreGateway for Vanishing {
        async fn connect(&self, credentials: &Credentials) -> AdapterResult<Arc<dyn ObjectStore>> {
            let store = self.0.connect(credentials).await?;
            self.0.remove_principal(&credentials.user).await?;
            Ok(store)
        }

        async fn get_object_anonymous(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
            self.0.get_object_anonymous(bucket, key).await
        }
    }

    let runner =
        Runner::new(Arc::new(gw.clone()), Arc::new(Vanishing(gw.clone())), RunOptions::default());
    let report = runner.run(&scenario).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.failures(), 1, "{report}");
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("admin"));
    assert_eq!(report.state, RunState::TornDown);
}

#[tokio::test]
async fn test_server_error_with_code_aborts_instead_of_denying() {
    let gw = MemoryGateway::new();
    let scenario = Scenario::builder("outage")
        .principal(PrincipalSpec::admin("admin"))
        .bucket("b1", "admin", None)
        .probe(probe("admin", get("b1", "o1"), Expectation::Deny))
        .build()
        .unwrap();

    let report = interfering_runner(&gw, Interference::Unavailable).run(&scenario).await;

    match &report.outcome {
        RunOutcome::Aborted { phase, probe, error } => {
            assert_eq!(*phase, RunState::Running);
            assert_eq!(*probe, Some(0));
            assert!(error.to_string().contains("ServiceUnavailable"), "{error}");
        }
        other => panic!("expected abort, got {other}"),
    }
    assert!(report.records.is_empty());
    assert_eq!(report.exit_code(), 3);
}

// =============================================================================
// Pre-clean
// =============================================================================

/// Admin plane that refuses to remove anyone and counts creations.
struct LockedAdmin {
    gw: MemoryGateway,
    created: AtomicUsize,
}

#[async_trait]
impl IdentityAdmin for LockedAdmin {
    async fn create_principal(&self, user: &str, limit: BucketLimit) -> AdapterResult<Credentials> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.gw.create_principal(user, limit).await
    }

    async fn create_sub_principal(
        &self,
        parent: &str,
        sub: &str,
        access: AccessLevel,
    ) -> AdapterResult<Credentials> {
        self.gw.create_sub_principal(parent, sub, access).await
    }

    async fn remove_principal(&self, user: &str) -> AdapterResult<()> {
        Err(AdapterError::PermissionDenied(format!("may not remove {user}")))
    }

    async fn link_bucket(&self, bucket: &str, owner: &str) -> AdapterResult<()> {
        self.gw.link_bucket(bucket, owner).await
    }

    async fn set_bucket_quota(&self, owner: &str, max_size: u64) -> AdapterResult<()> {
        self.gw.set_bucket_quota(owner, max_size).await
    }

    async fn enable_bucket_quota(&self, owner: &str) -> AdapterResult<()> {
        self.gw.enable_bucket_quota(owner).await
    }
}

#[tokio::test]
async fn test_pre_clean_refusal_is_setup_failure() {
    let gw = MemoryGateway::new();
    let admin = Arc::new(LockedAdmin { gw: gw.clone(), created: AtomicUsize::new(0) });
    let scenario = Scenario::builder("locked")
        .principal(PrincipalSpec::admin("admin"))
        .probe(probe("admin", make_bucket("b1"), Expectation::Allow))
        .build()
        .unwrap();

    let runner = Runner::new(admin.clone(), Arc::new(gw.clone()), RunOptions::default());
    let report = runner.run(&scenario).await;

    assert!(
        matches!(
            report.outcome,
            RunOutcome::SetupFailed { ref step, .. } if step == "pre-clean of admin"
        ),
        "{}",
        report.outcome
    );
    assert_eq!(report.exit_code(), 2);
    assert_eq!(admin.created.load(Ordering::SeqCst), 0);
    assert!(report.records.is_empty());
    assert!(gw.principals().is_empty());
}

// =============================================================================
// Content verification
// =============================================================================

const REWRITTEN: &[u8] = b"written elsewhere";

/// How a wrapped store departs from the gateway behind it.
#[derive(Clone, Copy)]
enum Interference {
    /// Reads come back with the last byte flipped.
    CorruptReads,
    /// Successful removals are followed by a write of [`REWRITTEN`] to the same key.
    RewriteAfterRemove,
    /// Reads fail with a coded 503.
    Unavailable,
}

struct InterferingStore {
    inner: Arc<dyn ObjectStore>,
    mode: Interference,
}

#[async_trait]
impl ObjectStore for InterferingStore {
    async fn make_bucket(&self, bucket: &str) -> AdapterResult<()> {
        self.inner.make_bucket(bucket).await
    }

    async fn remove_bucket(&self, bucket: &str) -> AdapterResult<()> {
        let Interference::RewriteAfterRemove = self.mode else {
            return self.inner.remove_bucket(bucket).await;
        };
        let keys = self.inner.list_objects(bucket).await?;
        for key in &keys {
            self.inner.remove_object(bucket, key).await?;
        }
        self.inner.remove_bucket(bucket).await?;
        self.inner.make_bucket(bucket).await?;
        for key in &keys {
            self.inner.put_object(bucket, key, Bytes::from_static(REWRITTEN), "text/plain").await?;
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> AdapterResult<()> {
        self.inner.put_object(bucket, key, body, content_type).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        match self.mode {
            Interference::CorruptReads => {
                let mut body = self.inner.get_object(bucket, key).await?.to_vec();
                if let Some(last) = body.last_mut() {
                    *last ^= 0xff;
                }
                Ok(Bytes::from(body))
            }
            Interference::Unavailable => Err(AdapterError::from_s3_response(
                Some("ServiceUnavailable"),
                Some("try later"),
                503,
            )),
            Interference::RewriteAfterRemove => self.inner.get_object(bucket, key).await,
        }
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> AdapterResult<()> {
        self.inner.remove_object(bucket, key).await?;
        if let Interference::RewriteAfterRemove = self.mode {
            self.inner.put_object(bucket, key, Bytes::from_static(REWRITTEN), "text/plain").await?;
        }
        Ok(())
    }

    async fn set_bucket_policy(&self, bucket: &str, document: &str) -> AdapterResult<()> {
        self.inner.set_bucket_policy(bucket, document).await
    }

    async fn get_bucket_policy(&self, bucket: &str) -> AdapterResult<Option<String>> {
        self.inner.get_bucket_policy(bucket).await
    }

    async fn list_buckets(&self) -> AdapterResult<BTreeSet<String>> {
        self.inner.list_buckets().await
    }

    async fn list_objects(&self, bucket: &str) -> AdapterResult<BTreeSet<String>> {
        self.inner.list_objects(bucket).await
    }
}

struct InterferingGateway {
    gw: MemoryGateway,
    mode: Interference,
}

#[async_trait]
impl ObjectStoreGateway for InterferingGateway {
    async fn connect(&self, credentials: &Credentials) -> AdapterResult<Arc<dyn ObjectStore>> {
        let inner = self.gw.connect(credentials).await?;
        Ok(Arc::new(InterferingStore { inner, mode: self.mode }))
    }

    async fn get_object_anonymous(&self, bucket: &str, key: &str) -> AdapterResult<Bytes> {
        self.gw.get_object_anonymous(bucket, key).await
    }
}

fn interfering_runner(gw: &MemoryGateway, mode: Interference) -> Runner {
    let gateway = InterferingGateway { gw: gw.clone(), mode };
    Runner::new(Arc::new(gw.clone()), Arc::new(gateway), RunOptions::default())
}

fn remove(bucket: &str, key: &str) -> Operation {
    Operation::RemoveObject { bucket: bucket.to_string(), key: key.to_string() }
}

#[tokio::test]
async fn test_read_of_different_bytes_is_content_mismatch() {
    let scenario = Scenario::builder("corrupt")
        .principal(PrincipalSpec::admin("admin"))
        .bucket("b1", "admin", None)
        .payload("p", PayloadSpec::inline("hello"))
        .probe(probe("admin", put("b1", "o1", "p"), Expectation::Allow))
        .probe(probe("admin", get("b1", "o1"), Expectation::Allow))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let report = interfering_runner(&gw, Interference::CorruptReads).run(&scenario).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.exit_code(), 1);
    assert!(report.records[0].passed());
    assert_eq!(report.records[1].actual, Outcome::Allow);
    assert_eq!(
        report.records[1].mismatch,
        Some(Mismatch::Content { expected_len: 5, actual_len: 5, first_difference: Some(4) })
    );
}

#[tokio::test]
async fn test_quota_refused_put_keeps_previous_content() {
    let scenario = Scenario::builder("quota-content")
        .principal(PrincipalSpec::admin("admin"))
        .bucket("b1", "admin", None)
        .payload("small", PayloadSpec::inline("abc"))
        .payload("big", PayloadSpec::generated(2048, 1))
        .probe(probe("admin", put("b1", "o1", "small"), Expectation::Allow))
        .probe(probe(
            "@admin",
            Operation::SetQuota { owner: "admin".to_string(), max_size: 1024 },
            Expectation::Allow,
        ))
        .probe(probe(
            "@admin",
            Operation::EnableQuota { owner: "admin".to_string() },
            Expectation::Allow,
        ))
        .probe(probe("admin", put("b1", "o1", "big"), Expectation::QuotaExceeded))
        .probe(probe("admin", get("b1", "o1"), Expectation::Allow))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let report = runner(&gw, RunOptions::default()).run(&scenario).await;

    assert!(report.passed(), "{report}");
    assert_eq!(report.records[3].actual, Outcome::QuotaExceeded);
}

#[tokio::test]
async fn test_removal_forgets_written_content() {
    let scenario = Scenario::builder("forget")
        .principal(PrincipalSpec::admin("admin"))
        .bucket("b1", "admin", None)
        .payload("p", PayloadSpec::inline("hello"))
        .probe(probe("admin", put("b1", "o1", "p"), Expectation::Allow))
        .probe(probe("admin", remove("b1", "o1"), Expectation::Allow))
        .probe(probe("admin", get("b1", "o1"), Expectation::Allow))
        .probe(probe("admin", put("b1", "o2", "p"), Expectation::Allow))
        .probe(probe(
            "admin",
            Operation::RemoveBucket { bucket: "b1".to_string() },
            Expectation::Allow,
        ))
        .probe(probe("admin", get("b1", "o2"), Expectation::Allow))
        .build()
        .unwrap();

    let gw = MemoryGateway::new();
    let report = interfering_runner(&gw, Interference::RewriteAfterRemove).run(&scenario).await;

    assert!(report.passed(), "{report}");
    assert_eq!(report.records.len(), 6);
}
