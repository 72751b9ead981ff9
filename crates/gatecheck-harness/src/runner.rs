// Copyright 2024 The Gatecheck Authors
// SPDX-License-Identifier: Apache-2.0

//! Scenario execution.
//!
//! A [`Runner`] drives one scenario at a time through
//! `Created -> Provisioning -> Running -> Verified -> TornDown`. Probes run
//! strictly in declaration order, each bound to the configured call deadline.
//! Denials and quota rejections are recorded and execution continues; an
//! infrastructure failure stops the run.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use gatecheck_core::config::RunConfig;
use gatecheck_core::{AdapterError, AdapterResult, IdentityAdmin, ObjectStore, ObjectStoreGateway};
use tracing::{debug, info, warn};

use crate::assertion::{assert_outcome, classify, ContentCheck, Observation};
use crate::namespace::Namespace;
use crate::payload::Payload;
use crate::report::{ProbeRecord, Report};
use crate::scenario::{Actor, Operation, Probe, Scenario, Tier};
use crate::state::{RunOutcome, RunState};

/// Options that apply to every run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Deadline for every adapter call.
    pub call_timeout: Duration,
    /// Remove provisioned principals after the run.
    pub teardown: bool,
    /// Suffix for physical principal and bucket names.
    pub namespace: Option<String>,
    /// Base directory for file payloads.
    pub payload_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            teardown: config.teardown,
            namespace: config.namespace.clone(),
            payload_dir: config.payload_dir.clone(),
        }
    }
}

/// Runs scenarios against a pair of adapters.
pub struct Runner {
    admin: Arc<dyn IdentityAdmin>,
    gateway: Arc<dyn ObjectStoreGateway>,
    options: RunOptions,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner").field("options", &self.options).finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        admin: Arc<dyn IdentityAdmin>,
        gateway: Arc<dyn ObjectStoreGateway>,
        options: RunOptions,
    ) -> Self {
        Self { admin, gateway, options }
    }

    /// Runs a scenario to completion and reports on it.
    ///
    /// Never fails: setup and infrastructure failures are part of the report.
    pub async fn run(&self, scenario: &Scenario) -> Report {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut run = Run {
            runner: self,
            scenario,
            ns: Namespace::default(),
            state: RunState::Created,
            provisioned: Vec::new(),
            actors: HashMap::new(),
            payloads: HashMap::new(),
            policies: HashMap::new(),
            ledger: HashMap::new(),
            records: Vec::with_capacity(scenario.probes().len()),
            warnings: Vec::new(),
        };

        let outcome = run.drive().await;

        if self.options.teardown {
            run.teardown().await;
            if run.state == RunState::Verified {
                run.transition(RunState::TornDown);
            }
        } else if !run.provisioned.is_empty() {
            info!(scenario = scenario.name(), "teardown disabled, leaving principals in place");
        }

        let report = Report {
            scenario: scenario.name().to_string(),
            namespace: self.options.namespace.clone(),
            started_at,
            elapsed: clock.elapsed(),
            state: run.state,
            outcome,
            records: run.records,
            warnings: run.warnings,
        };

        info!(
            scenario = scenario.name(),
            probes = report.records.len(),
            failures = report.failures(),
            outcome = %report.outcome,
            "scenario finished"
        );
        report
    }
}

/// Why a run stopped before verifying every probe.
enum Halt {
    Setup { step: String, error: String },
    Infrastructure { probe: Option<usize>, error: AdapterError },
}

impl Halt {
    fn setup(step: impl Into<String>, error: impl fmt::Display) -> Self {
        Self::Setup { step: step.into(), error: error.to_string() }
    }

    /// Provisioning failures are setup errors unless the collaborator itself failed.
    fn provisioning(step: impl Into<String>, error: AdapterError) -> Self {
        if error.is_infrastructure() {
            Self::Infrastructure { probe: None, error }
        } else {
            Self::setup(step, error)
        }
    }

    fn into_outcome(self, phase: RunState) -> RunOutcome {
        match self {
            Self::Setup { step, error } => RunOutcome::SetupFailed { step, error },
            Self::Infrastructure { probe, error } => RunOutcome::Aborted { phase, probe, error },
        }
    }
}

/// Bounds an adapter call by the run deadline. Expiry is a transport failure.
async fn deadline<T, F>(limit: Duration, call: F) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Transport(format!(
            "no response within {}ms",
            limit.as_millis()
        ))),
    }
}

/// State of one scenario run.
struct Run<'a> {
    runner: &'a Runner,
    scenario: &'a Scenario,
    ns: Namespace,
    state: RunState,
    /// Physical ids of created root principals, in creation order.
    provisioned: Vec<String>,
    /// Client handles by logical principal name.
    actors: HashMap<String, Arc<dyn ObjectStore>>,
    payloads: HashMap<String, Payload>,
    /// Rendered policy documents by name.
    policies: HashMap<String, String>,
    /// Last allowed write per logical (bucket, key).
    ledger: HashMap<(String, String), Bytes>,
    records: Vec<ProbeRecord>,
    warnings: Vec<String>,
}

impl Run<'_> {
    fn transition(&mut self, next: RunState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        info!(scenario = self.scenario.name(), from = %self.state, to = %next, "run state changed");
        self.state = next;
    }

    async fn drive(&mut self) -> RunOutcome {
        self.transition(RunState::Provisioning);
        if let Err(halt) = self.provision().await {
            self.transition(RunState::Aborted);
            return halt.into_outcome(RunState::Provisioning);
        }

        self.transition(RunState::Running);
        if let Err(halt) = self.execute().await {
            self.transition(RunState::Aborted);
            return halt.into_outcome(RunState::Running);
        }

        self.transition(RunState::Verified);
        RunOutcome::Completed
    }

    async fn provision(&mut self) -> Result<(), Halt> {
        let runner = self.runner;
        let scenario = self.scenario;
        let limit = runner.options.call_timeout;

        self.ns = Namespace::new(runner.options.namespace.clone())
            .map_err(|e| Halt::setup("namespace", e))?;

        for (name, spec) in scenario.payloads() {
            let payload = spec
                .resolve(name, &runner.options.payload_dir)
                .await
                .map_err(|e| Halt::setup(format!("payload {name}"), e))?;
            self.payloads.insert(name.clone(), payload);
        }

        self.policies =
            scenario.render_policies(&self.ns).map_err(|e| Halt::setup("policies", e))?;

        let mut credentials = Vec::with_capacity(scenario.principals().len());

        for spec in scenario.principals() {
            let Some(max_buckets) = spec.bucket_limit() else { continue };
            let user = self.ns.user(&spec.name);

            match deadline(limit, runner.admin.remove_principal(&user)).await {
                Ok(()) => debug!(principal = %user, "removed leftover principal"),
                Err(e) if e.is_not_found() => debug!(principal = %user, "no leftover principal"),
                Err(e) => return Err(Halt::provisioning(format!("pre-clean of {user}"), e)),
            }

            let creds = deadline(limit, runner.admin.create_principal(&user, max_buckets))
                .await
                .map_err(|e| Halt::provisioning(format!("principal {}", spec.name), e))?;
            info!(principal = %user, max_buckets = max_buckets.as_flag(), "created principal");
            self.provisioned.push(user);
            credentials.push((spec.name.as_str(), creds));
        }

        for spec in scenario.principals() {
            let Tier::Sub { parent, access, .. } = &spec.tier else { continue };
            let sub = spec.subuser().unwrap_or(&spec.name);
            let parent_id = self.ns.user(parent);

            let creds = deadline(limit, runner.admin.create_sub_principal(&parent_id, sub, *access))
                .await
                .map_err(|e| Halt::provisioning(format!("sub-identity {}", spec.name), e))?;
            info!(principal = %creds.user, access = %access, "created sub-identity");
            credentials.push((spec.name.as_str(), creds));
        }

        for (name, creds) in credentials {
            let store = deadline(limit, runner.gateway.connect(&creds))
                .await
                .map_err(|e| Halt::provisioning(format!("client for {name}"), e))?;
            self.actors.insert(name.to_string(), store);
        }

        for bucket in scenario.buckets() {
            let physical = self.ns.bucket(&bucket.name);
            let store = self.actors.get(&bucket.creator).cloned().ok_or_else(|| {
                Halt::setup(format!("bucket {}", bucket.name), "creator has no client")
            })?;

            deadline(limit, store.make_bucket(&physical))
                .await
                .map_err(|e| Halt::provisioning(format!("bucket {}", bucket.name), e))?;

            if let Some(owner) = &bucket.owner {
                deadline(limit, runner.admin.link_bucket(&physical, &self.ns.user(owner)))
                    .await
                    .map_err(|e| {
                        Halt::provisioning(format!("link of {} to {owner}", bucket.name), e)
                    })?;
            }
            debug!(bucket = %physical, creator = %bucket.creator, "created setup bucket");
        }

        Ok(())
    }

    async fn execute(&mut self) -> Result<(), Halt> {
        let scenario = self.scenario;

        for (index, probe) in scenario.probes().iter().enumerate() {
            debug!(
                scenario = scenario.name(),
                probe = index,
                actor = %probe.actor,
                op = probe.operation.name(),
                target = %probe.operation.target(),
                "issuing probe"
            );

            let observation = match self.observe(probe).await {
                Ok(observation) => observation,
                Err(error) => {
                    warn!(probe = index, error = %error, "infrastructure failure, stopping run");
                    return Err(Halt::Infrastructure { probe: Some(index), error });
                }
            };

            let verdict = assert_outcome(&probe.expect, &observation);
            let mut record = ProbeRecord {
                index,
                label: probe.label.clone(),
                actor: probe.actor.to_string(),
                operation: probe.operation.name(),
                target: probe.operation.target(),
                expected: probe.expect.to_string(),
                actual: observation.outcome,
                mismatch: None,
            };
            record.set_verdict(verdict);

            match &record.mismatch {
                None => debug!(probe = index, outcome = %record.actual, "probe passed"),
                Some(mismatch) => warn!(probe = index, %mismatch, "probe failed"),
            }
            self.records.push(record);
        }

        Ok(())
    }

    fn store(&self, actor: &Actor) -> AdapterResult<Arc<dyn ObjectStore>> {
        match actor {
            Actor::Principal(name) => self
                .actors
                .get(name)
                .cloned()
                .ok_or_else(|| AdapterError::Malformed(format!("no client for {name}"))),
            other => Err(AdapterError::Malformed(format!("{other} has no data-plane client"))),
        }
    }

    /// Issues one probe and classifies what came back.
    async fn observe(&mut self, probe: &Probe) -> AdapterResult<Observation> {
        let limit = self.runner.options.call_timeout;
        let admin = &self.runner.admin;

        match &probe.operation {
            Operation::MakeBucket { bucket } => {
                let store = self.store(&probe.actor)?;
                outcome_only(&deadline(limit, store.make_bucket(&self.ns.bucket(bucket))).await)
            }
            Operation::RemoveBucket { bucket } => {
                let store = self.store(&probe.actor)?;
                let result = deadline(limit, store.remove_bucket(&self.ns.bucket(bucket))).await;
                if result.is_ok() {
                    self.ledger.retain(|(b, _), _| b != bucket);
                }
                outcome_only(&result)
            }
            Operation::PutObject { bucket, key, payload } => {
                let store = self.store(&probe.actor)?;
                let payload = self
                    .payloads
                    .get(payload)
                    .cloned()
                    .ok_or_else(|| AdapterError::Malformed(format!("payload {payload} missing")))?;
                let result = deadline(
                    limit,
                    store.put_object(
                        &self.ns.bucket(bucket),
                        key,
                        payload.body.clone(),
                        &payload.content_type,
                    ),
                )
                .await;
                if result.is_ok() {
                    self.ledger.insert((bucket.clone(), key.clone()), payload.body);
                }
                outcome_only(&result)
            }
            Operation::GetObject { bucket, key } => {
                let store = self.store(&probe.actor)?;
                let result = deadline(limit, store.get_object(&self.ns.bucket(bucket), key)).await;
                self.read(bucket, key, result)
            }
            Operation::GetObjectAnonymous { bucket, key } => {
                let result = deadline(
                    limit,
                    self.runner.gateway.get_object_anonymous(&self.ns.bucket(bucket), key),
                )
                .await;
                self.read(bucket, key, result)
            }
            Operation::RemoveObject { bucket, key } => {
                let store = self.store(&probe.actor)?;
                let result =
                    deadline(limit, store.remove_object(&self.ns.bucket(bucket), key)).await;
                if result.is_ok() {
                    self.ledger.remove(&(bucket.clone(), key.clone()));
                }
                outcome_only(&result)
            }
            Operation::SetPolicy { bucket, policy } => {
                let store = self.store(&probe.actor)?;
                let document = self
                    .policies
                    .get(policy)
                    .ok_or_else(|| AdapterError::Malformed(format!("policy {policy} missing")))?;
                outcome_only(
                    &deadline(limit, store.set_bucket_policy(&self.ns.bucket(bucket), document))
                        .await,
                )
            }
            Operation::GetPolicy { bucket } => {
                let store = self.store(&probe.actor)?;
                outcome_only(
                    &deadline(limit, store.get_bucket_policy(&self.ns.bucket(bucket))).await,
                )
            }
            Operation::ListBuckets => {
                let store = self.store(&probe.actor)?;
                let result = deadline(limit, store.list_buckets()).await.map(|names| {
                    names.iter().map(|n| self.ns.logical_bucket(n)).collect()
                });
                listing(result)
            }
            Operation::ListObjects { bucket } => {
                let store = self.store(&probe.actor)?;
                listing(deadline(limit, store.list_objects(&self.ns.bucket(bucket))).await)
            }
            Operation::LinkBucket { bucket, owner } => outcome_only(
                &deadline(limit, admin.link_bucket(&self.ns.bucket(bucket), &self.ns.user(owner)))
                    .await,
            ),
            Operation::SetQuota { owner, max_size } => outcome_only(
                &deadline(limit, admin.set_bucket_quota(&self.ns.user(owner), *max_size)).await,
            ),
            Operation::EnableQuota { owner } => outcome_only(
                &deadline(limit, admin.enable_bucket_quota(&self.ns.user(owner))).await,
            ),
        }
    }

    fn read(
        &self,
        bucket: &str,
        key: &str,
        result: AdapterResult<Bytes>,
    ) -> AdapterResult<Observation> {
        let mut observation = Observation::outcome(classify(&result)?);
        if let Ok(actual) = result {
            let expected = self.ledger.get(&(bucket.to_string(), key.to_string())).cloned();
            observation.content = Some(ContentCheck { expected, actual });
        }
        Ok(observation)
    }

    async fn teardown(&mut self) {
        let runner = self.runner;
        let limit = runner.options.call_timeout;

        for user in self.provisioned.iter().rev() {
            match deadline(limit, runner.admin.remove_principal(user)).await {
                Ok(()) => info!(principal = %user, "removed principal"),
                Err(e) => {
                    warn!(principal = %user, error = %e, "teardown failed");
                    self.warnings.push(format!("failed to remove principal {user}: {e}"));
                }
            }
        }
    }
}

fn outcome_only<T>(result: &AdapterResult<T>) -> AdapterResult<Observation> {
    Ok(Observation::outcome(classify(result)?))
}

fn listing(result: AdapterResult<BTreeSet<String>>) -> AdapterResult<Observation> {
    let mut observation = Observation::outcome(classify(&result)?);
    observation.listing = result.ok();
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let ok = deadline(Duration::from_secs(1), async { Ok::<_, AdapterError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let denied = deadline(Duration::from_secs(1), async {
            Err::<(), _>(AdapterError::PermissionDenied("no".into()))
        })
        .await;
        assert_eq!(denied, Err(AdapterError::PermissionDenied("no".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_transport() {
        let slow = deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AdapterError>(())
        })
        .await;
        assert!(matches!(slow, Err(AdapterError::Transport(_))));
    }

    #[test]
    fn test_options_from_config() {
        let config = RunConfig {
            call_timeout_ms: 250,
            teardown: false,
            namespace: Some("ns".to_string()),
            payload_dir: PathBuf::from("/tmp"),
        };
        let options = RunOptions::from(&config);
        assert_eq!(options.call_timeout, Duration::from_millis(250));
        assert!(!options.teardown);
        assert_eq!(options.namespace.as_deref(), Some("ns"));
    }
}
