//! The scenario model.
//!
//! A scenario declares principals, setup buckets, payloads and policies, and
//! an ordered list of probes. Scenarios are validated when built or loaded
//! and are immutable afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use gatecheck_core::types::sub_user_id;
use gatecheck_core::{AccessLevel, BucketLimit};
use serde::{Deserialize, Serialize};

use crate::assertion::Expectation;
use crate::error::ScenarioError;
use crate::namespace::Namespace;
use crate::payload::PayloadSpec;
use crate::policy::{PolicySpec, WILDCARD};

/// Actor name for the admin control plane.
pub const ADMIN_ACTOR: &str = "@admin";
/// Actor name for unauthenticated requests.
pub const ANONYMOUS_ACTOR: &str = "@anonymous";

/// Who issues a probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Actor {
    /// The admin control plane.
    Admin,
    /// An unauthenticated caller.
    Anonymous,
    /// A declared principal, by logical name.
    Principal(String),
}

impl Actor {
    /// A declared principal.
    #[must_use]
    pub fn principal(name: impl Into<String>) -> Self {
        Self::Principal(name.into())
    }
}

impl From<String> for Actor {
    fn from(name: String) -> Self {
        match name.as_str() {
            ADMIN_ACTOR => Self::Admin,
            ANONYMOUS_ACTOR => Self::Anonymous,
            _ => Self::Principal(name),
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.to_string()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str(ADMIN_ACTOR),
            Self::Anonymous => f.write_str(ANONYMOUS_ACTOR),
            Self::Principal(name) => f.write_str(name),
        }
    }
}

/// A principal declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSpec {
    /// Logical name, used as the actor name and as the user id.
    pub name: String,
    /// Access tier.
    #[serde(flatten)]
    pub tier: Tier,
}

/// Access tier of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "kebab-case")]
pub enum Tier {
    /// Full control, may create buckets.
    Admin {
        /// Bucket creation limit.
        #[serde(default)]
        max_buckets: BucketLimit,
    },
    /// May write into buckets it owns but not create them.
    Writer {
        /// Bucket creation limit.
        #[serde(default = "disabled")]
        max_buckets: BucketLimit,
    },
    /// A sub-identity sharing its parent's authorization scope.
    Sub {
        /// Logical name of the root parent.
        parent: String,
        /// Sub-user id; defaults to the principal name.
        #[serde(default)]
        subuser: Option<String>,
        /// Declared access level.
        access: AccessLevel,
    },
}

fn disabled() -> BucketLimit {
    BucketLimit::Disabled
}

impl PrincipalSpec {
    /// An admin-like principal that may create buckets without limit.
    #[must_use]
    pub fn admin(name: impl Into<String>) -> Self {
        Self { name: name.into(), tier: Tier::Admin { max_buckets: BucketLimit::Unlimited } }
    }

    /// A write-capable principal that may not create buckets.
    #[must_use]
    pub fn writer(name: impl Into<String>) -> Self {
        Self { name: name.into(), tier: Tier::Writer { max_buckets: BucketLimit::Disabled } }
    }

    /// A sub-identity of `parent`.
    #[must_use]
    pub fn sub(name: impl Into<String>, parent: impl Into<String>, access: AccessLevel) -> Self {
        Self { name: name.into(), tier: Tier::Sub { parent: parent.into(), subuser: None, access } }
    }

    /// Returns the parent of a sub-identity.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        match &self.tier {
            Tier::Sub { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Returns the sub-user id of a sub-identity.
    #[must_use]
    pub fn subuser(&self) -> Option<&str> {
        match &self.tier {
            Tier::Sub { subuser, .. } => Some(subuser.as_deref().unwrap_or(&self.name)),
            _ => None,
        }
    }

    /// Returns the bucket limit of a root principal.
    #[must_use]
    pub fn bucket_limit(&self) -> Option<BucketLimit> {
        match &self.tier {
            Tier::Admin { max_buckets } | Tier::Writer { max_buckets } => Some(*max_buckets),
            Tier::Sub { .. } => None,
        }
    }
}

/// A bucket created during provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    /// Logical bucket name.
    pub name: String,
    /// Principal that creates the bucket.
    pub creator: String,
    /// Root principal the bucket is linked to after creation.
    #[serde(default)]
    pub owner: Option<String>,
}

/// A probe operation and its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    /// Create a bucket.
    MakeBucket {
        /// Bucket.
        bucket: String,
    },
    /// Remove a bucket.
    RemoveBucket {
        /// Bucket.
        bucket: String,
    },
    /// Upload a declared payload.
    PutObject {
        /// Bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Payload name.
        payload: String,
    },
    /// Download an object.
    GetObject {
        /// Bucket.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// Remove an object.
    RemoveObject {
        /// Bucket.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// Attach a declared policy.
    SetPolicy {
        /// Bucket.
        bucket: String,
        /// Policy name.
        policy: String,
    },
    /// Read the attached policy.
    GetPolicy {
        /// Bucket.
        bucket: String,
    },
    /// List the caller's buckets.
    ListBuckets,
    /// List the keys in a bucket.
    ListObjects {
        /// Bucket.
        bucket: String,
    },
    /// Fetch an object without credentials.
    GetObjectAnonymous {
        /// Bucket.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// Transfer bucket ownership.
    LinkBucket {
        /// Bucket.
        bucket: String,
        /// New owner, a root principal.
        owner: String,
    },
    /// Set the owner's quota ceiling.
    SetQuota {
        /// Root principal.
        owner: String,
        /// Ceiling in bytes.
        max_size: u64,
    },
    /// Enable the owner's quota.
    EnableQuota {
        /// Root principal.
        owner: String,
    },
}

impl Operation {
    /// Operation name as written in scenario files.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MakeBucket { .. } => "make-bucket",
            Self::RemoveBucket { .. } => "remove-bucket",
            Self::PutObject { .. } => "put-object",
            Self::GetObject { .. } => "get-object",
            Self::RemoveObject { .. } => "remove-object",
            Self::SetPolicy { .. } => "set-policy",
            Self::GetPolicy { .. } => "get-policy",
            Self::ListBuckets => "list-buckets",
            Self::ListObjects { .. } => "list-objects",
            Self::GetObjectAnonymous { .. } => "get-object-anonymous",
            Self::LinkBucket { .. } => "link-bucket",
            Self::SetQuota { .. } => "set-quota",
            Self::EnableQuota { .. } => "enable-quota",
        }
    }

    /// Returns true for operations served by the admin control plane.
    #[must_use]
    pub const fn is_admin_plane(&self) -> bool {
        matches!(self, Self::LinkBucket { .. } | Self::SetQuota { .. } | Self::EnableQuota { .. })
    }

    /// Returns true for operations whose result is a set of names.
    #[must_use]
    pub const fn is_listing(&self) -> bool {
        matches!(self, Self::ListBuckets | Self::ListObjects { .. })
    }

    /// Human-readable target, e.g. `mybucket/myobject`.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::MakeBucket { bucket }
            | Self::RemoveBucket { bucket }
            | Self::GetPolicy { bucket }
            | Self::ListObjects { bucket } => bucket.clone(),
            Self::PutObject { bucket, key, .. }
            | Self::GetObject { bucket, key }
            | Self::RemoveObject { bucket, key }
            | Self::GetObjectAnonymous { bucket, key } => format!("{bucket}/{key}"),
            Self::SetPolicy { bucket, policy } => format!("{bucket} <- {policy}"),
            Self::ListBuckets => String::new(),
            Self::LinkBucket { bucket, owner } => format!("{bucket} -> {owner}"),
            Self::SetQuota { owner, max_size } => format!("{owner} = {max_size} bytes"),
            Self::EnableQuota { owner } => owner.clone(),
        }
    }
}

/// One authorization probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Optional description shown in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Who issues the operation.
    pub actor: Actor,
    /// What is issued.
    #[serde(flatten)]
    pub operation: Operation,
    /// What should happen.
    pub expect: Expectation,
}

impl Probe {
    /// Creates a probe.
    #[must_use]
    pub fn new(actor: Actor, operation: Operation, expect: Expectation) -> Self {
        Self { label: None, actor, operation, expect }
    }

    /// Attaches a label.
    #[must_use]
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A validated, immutable scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    principals: Vec<PrincipalSpec>,
    #[serde(default)]
    buckets: Vec<BucketSpec>,
    #[serde(default)]
    payloads: BTreeMap<String, PayloadSpec>,
    #[serde(default)]
    policies: BTreeMap<String, PolicySpec>,
    #[serde(default)]
    probes: Vec<Probe>,
}

impl Scenario {
    /// Starts building a scenario.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            scenario: Self {
                name: name.into(),
                description: String::new(),
                principals: Vec::new(),
                buckets: Vec::new(),
                payloads: BTreeMap::new(),
                policies: BTreeMap::new(),
                probes: Vec::new(),
            },
        }
    }

    /// Loads and validates a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ScenarioError::Io { path: path.display().to_string(), source })?;
        Self::parse(&content)
    }

    /// Parses and validates a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Scenario name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Principals in declaration order.
    #[must_use]
    pub fn principals(&self) -> &[PrincipalSpec] {
        &self.principals
    }

    /// Setup buckets in declaration order.
    #[must_use]
    pub fn buckets(&self) -> &[BucketSpec] {
        &self.buckets
    }

    /// Named payloads.
    #[must_use]
    pub fn payloads(&self) -> &BTreeMap<String, PayloadSpec> {
        &self.payloads
    }

    /// Named policies.
    #[must_use]
    pub fn policies(&self) -> &BTreeMap<String, PolicySpec> {
        &self.policies
    }

    /// Probes in execution order.
    #[must_use]
    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Returns a declared principal by name.
    #[must_use]
    pub fn principal(&self, name: &str) -> Option<&PrincipalSpec> {
        self.principals.iter().find(|p| p.name == name)
    }

    /// Physical user id of a declared principal (`user` or `parent:sub`).
    #[must_use]
    pub fn user_id(&self, name: &str, ns: &Namespace) -> Option<String> {
        let spec = self.principal(name)?;
        match (spec.parent(), spec.subuser()) {
            (Some(parent), Some(sub)) => Some(sub_user_id(&ns.user(parent), sub)),
            _ => Some(ns.user(&spec.name)),
        }
    }

    /// Renders every declared policy into its JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::InvalidPolicy`] for the first policy that cannot be rendered.
    pub fn render_policies(
        &self,
        ns: &Namespace,
    ) -> Result<HashMap<String, String>, ScenarioError> {
        self.policies
            .iter()
            .map(|(name, spec)| {
                let doc = spec.render(name, ns, |p| self.user_id(p, ns))?;
                Ok((name.clone(), doc))
            })
            .collect()
    }

    /// Checks every cross-reference in the scenario.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::MissingName);
        }

        let mut roots = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for p in &self.principals {
            if p.name.is_empty() || p.name.starts_with('@') || p.name == WILDCARD {
                return Err(ScenarioError::ReservedName(p.name.clone()));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ScenarioError::DuplicatePrincipal(p.name.clone()));
            }
            if p.parent().is_none() {
                roots.insert(p.name.as_str());
            }
        }
        for p in &self.principals {
            if let Some(parent) = p.parent() {
                if !roots.contains(parent) {
                    return Err(ScenarioError::InvalidParent {
                        sub: p.name.clone(),
                        parent: parent.to_string(),
                    });
                }
            }
        }

        let require_root = |context: String, name: &str| -> Result<(), ScenarioError> {
            if roots.contains(name) {
                Ok(())
            } else {
                Err(ScenarioError::UnknownPrincipal { context, name: name.to_string() })
            }
        };

        for b in &self.buckets {
            if !seen.contains(b.creator.as_str()) {
                return Err(ScenarioError::UnknownPrincipal {
                    context: format!("bucket {:?}", b.name),
                    name: b.creator.clone(),
                });
            }
            if let Some(owner) = &b.owner {
                require_root(format!("bucket {:?}", b.name), owner)?;
            }
        }

        for (name, policy) in &self.policies {
            for p in policy.principals() {
                if !seen.contains(p) {
                    return Err(ScenarioError::UnknownPrincipal {
                        context: format!("policy {name:?}"),
                        name: p.to_string(),
                    });
                }
            }
        }

        for (index, probe) in self.probes.iter().enumerate() {
            let op = probe.operation.name();
            let wrong_actor =
                || ScenarioError::WrongActor { probe: index, op, actor: probe.actor.to_string() };

            match (&probe.actor, &probe.operation) {
                (Actor::Admin, o) if o.is_admin_plane() => {}
                (Actor::Anonymous, Operation::GetObjectAnonymous { .. }) => {}
                (Actor::Principal(name), o)
                    if !o.is_admin_plane()
                        && !matches!(o, Operation::GetObjectAnonymous { .. }) =>
                {
                    if !seen.contains(name.as_str()) {
                        return Err(ScenarioError::UnknownPrincipal {
                            context: format!("probe {index}"),
                            name: name.clone(),
                        });
                    }
                }
                _ => return Err(wrong_actor()),
            }

            match &probe.operation {
                Operation::PutObject { payload, .. } if !self.payloads.contains_key(payload) => {
                    return Err(ScenarioError::UnknownPayload {
                        probe: index,
                        payload: payload.clone(),
                    });
                }
                Operation::SetPolicy { policy, .. } if !self.policies.contains_key(policy) => {
                    return Err(ScenarioError::UnknownPolicy {
                        probe: index,
                        policy: policy.clone(),
                    });
                }
                Operation::LinkBucket { owner, .. }
                | Operation::SetQuota { owner, .. }
                | Operation::EnableQuota { owner } => {
                    require_root(format!("probe {index}"), owner)?;
                }
                _ => {}
            }

            if matches!(probe.expect, Expectation::Set(_)) && !probe.operation.is_listing() {
                return Err(ScenarioError::StructuralExpectation { probe: index, op });
            }
        }

        Ok(())
    }
}

/// Builder for [`Scenario`].
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.scenario.description = description.into();
        self
    }

    /// Declares a principal.
    #[must_use]
    pub fn principal(mut self, principal: PrincipalSpec) -> Self {
        self.scenario.principals.push(principal);
        self
    }

    /// Declares a setup bucket.
    #[must_use]
    pub fn bucket(mut self, name: &str, creator: &str, owner: Option<&str>) -> Self {
        self.scenario.buckets.push(BucketSpec {
            name: name.to_string(),
            creator: creator.to_string(),
            owner: owner.map(str::to_string),
        });
        self
    }

    /// Declares a payload.
    #[must_use]
    pub fn payload(mut self, name: impl Into<String>, payload: PayloadSpec) -> Self {
        self.scenario.payloads.insert(name.into(), payload);
        self
    }

    /// Declares a policy.
    #[must_use]
    pub fn policy(mut self, name: impl Into<String>, policy: PolicySpec) -> Self {
        self.scenario.policies.insert(name.into(), policy);
        self
    }

    /// Appends a probe.
    #[must_use]
    pub fn probe(mut self, probe: Probe) -> Self {
        self.scenario.probes.push(probe);
        self
    }

    /// Validates and returns the scenario.
    ///
    /// # Errors
    ///
    /// Returns the first validation problem.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }
}
