//! Policy declarations written against logical names.

use gatecheck_core::policy::{BucketPolicy, Effect, Statement};
use gatecheck_core::types::{bucket_arn, principal_arn};
use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;
use crate::namespace::Namespace;

/// The principal reference that matches everyone, including anonymous callers.
pub const WILDCARD: &str = "*";

/// A named bucket policy declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Statements in evaluation order.
    pub statements: Vec<StatementSpec>,
}

/// One statement of a [`PolicySpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSpec {
    /// Allow or deny.
    #[serde(default = "allow")]
    pub effect: Effect,
    /// Logical principal names, or `"*"`.
    pub principals: Vec<String>,
    /// Actions, with or without the `s3:` prefix.
    pub actions: Vec<String>,
    /// `bucket` or `bucket/<key pattern>`, with logical bucket names.
    pub resources: Vec<String>,
}

fn allow() -> Effect {
    Effect::Allow
}

impl StatementSpec {
    /// An Allow statement.
    pub fn allow<P, A, R>(principals: P, actions: A, resources: R) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            principals: principals.into_iter().map(Into::into).collect(),
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// Turns the statement into a Deny.
    #[must_use]
    pub fn deny(mut self) -> Self {
        self.effect = Effect::Deny;
        self
    }
}

impl PolicySpec {
    /// A policy with the given statements.
    #[must_use]
    pub fn new(statements: Vec<StatementSpec>) -> Self {
        Self { statements }
    }

    /// Logical principal names referenced by the policy, excluding the wildcard.
    pub fn principals(&self) -> impl Iterator<Item = &str> + '_ {
        self.statements
            .iter()
            .flat_map(|s| s.principals.iter())
            .map(String::as_str)
            .filter(|p| *p != WILDCARD)
    }

    /// Renders the JSON document sent to the store.
    ///
    /// `user_id` maps a logical principal name to its physical user id.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::InvalidPolicy`] for unknown principals, empty
    /// statements, or a document the policy model rejects.
    pub fn render<F>(&self, name: &str, ns: &Namespace, user_id: F) -> Result<String, ScenarioError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invalid =
            |reason: String| ScenarioError::InvalidPolicy { name: name.to_string(), reason };

        let mut builder = BucketPolicy::builder();
        for stmt in &self.statements {
            if stmt.principals.is_empty() || stmt.actions.is_empty() || stmt.resources.is_empty() {
                return Err(invalid(
                    "every statement needs principals, actions and resources".to_string(),
                ));
            }

            let principals = if stmt.principals.iter().any(|p| p == WILDCARD) {
                None
            } else {
                let arns = stmt
                    .principals
                    .iter()
                    .map(|p| {
                        user_id(p)
                            .map(|id| principal_arn(&id))
                            .ok_or_else(|| invalid(format!("unknown principal {p:?}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Some(arns)
            };

            let actions = stmt
                .actions
                .iter()
                .map(|a| if a.contains(':') || a == "*" { a.clone() } else { format!("s3:{a}") })
                .collect();

            let resources = stmt
                .resources
                .iter()
                .map(|r| match r.split_once('/') {
                    Some((bucket, pattern)) => bucket_arn(&ns.bucket(bucket), Some(pattern)),
                    None => bucket_arn(&ns.bucket(r), None),
                })
                .collect();

            let statement = Statement::new(stmt.effect, principals, actions, resources);
            builder = builder.statement(statement);
        }

        let policy = builder.build();
        policy.validate().map_err(|e| invalid(e.to_string()))?;
        policy.to_json().map_err(|e| invalid(e.to_string()))
    }
}
