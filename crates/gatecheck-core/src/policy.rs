//! Bucket policy documents.
//!
//! The harness renders these documents from scenario declarations and sends
//! them to the store as JSON. The in-memory reference gateway parses and
//! evaluates them with the same types, so the evaluation here follows the
//! IAM rules that matter for probes: explicit deny wins, then explicit allow,
//! otherwise implicit deny.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The policy language version written into every rendered document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Errors raised while parsing or validating a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The document is not valid JSON or does not match the schema.
    #[error("invalid policy JSON: {0}")]
    Json(String),
    /// The document parsed but is semantically invalid.
    #[error("malformed policy: {0}")]
    Malformed(String),
}

/// The result of policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// An explicit Allow from a policy statement.
    Allow,
    /// An explicit Deny from a policy statement.
    Deny,
    /// No matching statement found (implicit deny).
    DefaultDeny,
}

/// A bucket policy document following the IAM policy format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketPolicy {
    /// The policy language version.
    pub version: String,
    /// An optional identifier for the policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The policy statements.
    pub statement: Vec<Statement>,
}

/// A single policy statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// An optional identifier for the statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Whether this statement allows or denies access.
    pub effect: Effect,
    /// The principal(s) this statement applies to.
    pub principal: Principal,
    /// The action(s) this statement covers.
    pub action: StringOrArray,
    /// The resource(s) this statement covers.
    pub resource: StringOrArray,
    /// Conditions are carried through untouched; statements with conditions
    /// never match during local evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

/// The effect of a policy statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action.
    Allow,
    /// Deny the action.
    Deny,
}

/// The principal(s) a policy statement applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// Wildcard - applies to everyone, including anonymous callers.
    Wildcard(WildcardPrincipal),
    /// Specific principals.
    Specific(PrincipalSpec),
}

/// Represents a wildcard principal "*".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPrincipal;

impl Serialize for WildcardPrincipal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("*")
    }
}

impl<'de> Deserialize<'de> for WildcardPrincipal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "*" {
            Ok(WildcardPrincipal)
        } else {
            Err(serde::de::Error::custom("expected \"*\""))
        }
    }
}

/// Specific principal specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSpec {
    /// User ARNs.
    #[serde(default, rename = "AWS", skip_serializing_if = "Option::is_none")]
    pub aws: Option<StringOrArray>,
}

/// Either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    /// A single string.
    Single(String),
    /// An array of strings.
    Array(Vec<String>),
}

impl StringOrArray {
    /// Returns an iterator over the values.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        let values: &[String] = match self {
            StringOrArray::Single(s) => std::slice::from_ref(s),
            StringOrArray::Array(v) => v,
        };
        values.iter().map(String::as_str)
    }

    /// Returns true if the given value matches any of the patterns.
    pub fn matches(&self, value: &str) -> bool {
        self.iter().any(|pattern| wildcard_match(pattern, value))
    }
}

impl From<Vec<String>> for StringOrArray {
    fn from(values: Vec<String>) -> Self {
        Self::Array(values)
    }
}

/// Actions the harness issues and the reference gateway authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3Action {
    /// s3:GetObject
    GetObject,
    /// s3:GetObjectVersion
    GetObjectVersion,
    /// s3:PutObject
    PutObject,
    /// s3:DeleteObject
    DeleteObject,
    /// s3:ListBucket
    ListBucket,
    /// s3:CreateBucket
    CreateBucket,
    /// s3:DeleteBucket
    DeleteBucket,
    /// s3:GetBucketPolicy
    GetBucketPolicy,
    /// s3:PutBucketPolicy
    PutBucketPolicy,
}

impl S3Action {
    /// Returns the action string (e.g., "s3:GetObject").
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetObject => "s3:GetObject",
            Self::GetObjectVersion => "s3:GetObjectVersion",
            Self::PutObject => "s3:PutObject",
            Self::DeleteObject => "s3:DeleteObject",
            Self::ListBucket => "s3:ListBucket",
            Self::CreateBucket => "s3:CreateBucket",
            Self::DeleteBucket => "s3:DeleteBucket",
            Self::GetBucketPolicy => "s3:GetBucketPolicy",
            Self::PutBucketPolicy => "s3:PutBucketPolicy",
        }
    }

    /// Returns true for actions that only read state.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(
            self,
            Self::GetObject | Self::GetObjectVersion | Self::ListBucket | Self::GetBucketPolicy
        )
    }

    /// Returns true for actions that manage access control rather than data.
    ///
    /// Sub-identities need full access for these.
    #[must_use]
    pub const fn is_administrative(&self) -> bool {
        matches!(self, Self::PutBucketPolicy | Self::GetBucketPolicy)
    }
}

impl std::fmt::Display for S3Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Context for policy evaluation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The principal making the request (ARN), or `None` for anonymous.
    pub principal: Option<String>,
    /// The S3 action being performed.
    pub action: S3Action,
    /// The resource ARN (e.g., "arn:aws:s3:::bucket/key").
    pub resource: String,
}

impl RequestContext {
    /// Creates a new request context.
    #[must_use]
    pub fn new(
        principal: Option<String>,
        action: S3Action,
        bucket: &str,
        key: Option<&str>,
    ) -> Self {
        Self { principal, action, resource: crate::types::bucket_arn(bucket, key) }
    }
}

impl BucketPolicy {
    /// Starts an empty policy document with the current language version.
    #[must_use]
    pub fn builder() -> BucketPolicyBuilder {
        BucketPolicyBuilder { statements: Vec::new() }
    }

    /// Parses a bucket policy from JSON.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid or doesn't match the policy schema.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(json).map_err(|e| PolicyError::Json(e.to_string()))
    }

    /// Serializes the policy to JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        serde_json::to_string(self).map_err(|e| PolicyError::Json(e.to_string()))
    }

    /// Validates the policy structure.
    ///
    /// # Errors
    /// Returns an error if the policy is invalid.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version != POLICY_VERSION && self.version != "2008-10-17" {
            return Err(PolicyError::Malformed(format!(
                "invalid policy version: {}. Must be \"{POLICY_VERSION}\"",
                self.version
            )));
        }

        if self.statement.is_empty() {
            return Err(PolicyError::Malformed(
                "policy must contain at least one statement".to_string(),
            ));
        }

        for (i, stmt) in self.statement.iter().enumerate() {
            stmt.validate().map_err(|e| PolicyError::Malformed(format!("statement {i}: {e}")))?;
        }

        Ok(())
    }

    /// Evaluates the policy for a given request context.
    #[must_use]
    pub fn evaluate(&self, ctx: &RequestContext) -> PolicyDecision {
        let mut has_allow = false;

        for stmt in &self.statement {
            match stmt.evaluate(ctx) {
                PolicyDecision::Deny => return PolicyDecision::Deny,
                PolicyDecision::Allow => has_allow = true,
                PolicyDecision::DefaultDeny => {}
            }
        }

        if has_allow {
            PolicyDecision::Allow
        } else {
            PolicyDecision::DefaultDeny
        }
    }
}

/// Incremental construction of a [`BucketPolicy`].
#[derive(Debug, Clone)]
pub struct BucketPolicyBuilder {
    statements: Vec<Statement>,
}

impl BucketPolicyBuilder {
    /// Appends a statement.
    #[must_use]
    pub fn statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Finishes the document.
    #[must_use]
    pub fn build(self) -> BucketPolicy {
        BucketPolicy { version: POLICY_VERSION.to_string(), id: None, statement: self.statements }
    }
}

impl Statement {
    /// Creates a statement with the given effect.
    ///
    /// `principals` of `None` produces the wildcard principal.
    #[must_use]
    pub fn new(
        effect: Effect,
        principals: Option<Vec<String>>,
        actions: Vec<String>,
        resources: Vec<String>,
    ) -> Self {
        let principal = match principals {
            None => Principal::Wildcard(WildcardPrincipal),
            Some(arns) => Principal::Specific(PrincipalSpec { aws: Some(arns.into()) }),
        };
        Self {
            sid: None,
            effect,
            principal,
            action: actions.into(),
            resource: resources.into(),
            condition: None,
        }
    }

    fn validate(&self) -> Result<(), String> {
        for resource in self.resource.iter() {
            if !resource.starts_with("arn:aws:s3:::") && resource != "*" {
                return Err(format!("invalid S3 resource ARN: {resource}"));
            }
        }

        for action in self.action.iter() {
            if !action.starts_with("s3:") && action != "*" {
                return Err(format!("invalid S3 action: {action}"));
            }
        }

        if let Principal::Specific(PrincipalSpec { aws: None }) = &self.principal {
            return Err("principal must name at least one user or be \"*\"".to_string());
        }

        Ok(())
    }

    fn evaluate(&self, ctx: &RequestContext) -> PolicyDecision {
        if self.condition.is_some()
            || !self.matches_principal(ctx)
            || !self.matches_action(ctx.action)
            || !self.resource.iter().any(|p| p == "*" || wildcard_match(p, &ctx.resource))
        {
            return PolicyDecision::DefaultDeny;
        }

        match self.effect {
            Effect::Allow => PolicyDecision::Allow,
            Effect::Deny => PolicyDecision::Deny,
        }
    }

    fn matches_principal(&self, ctx: &RequestContext) -> bool {
        match (&self.principal, &ctx.principal) {
            (Principal::Wildcard(_), _) => true,
            (Principal::Specific(spec), Some(caller)) => {
                spec.aws.as_ref().is_some_and(|aws| aws.iter().any(|p| p == "*" || p == caller))
            }
            (Principal::Specific(spec), None) => {
                spec.aws.as_ref().is_some_and(|aws| aws.iter().any(|p| p == "*"))
            }
        }
    }

    fn matches_action(&self, action: S3Action) -> bool {
        let action_str = action.as_str();
        self.action.iter().any(|pattern| {
            pattern == "*" || pattern == "s3:*" || wildcard_match(pattern, action_str)
        })
    }
}

/// Matches a string against a wildcard pattern (supports * and ?).
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                p += 1;
                backtrack = Some((p, t));
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_read(bucket: &str) -> BucketPolicy {
        BucketPolicy::builder()
            .statement(Statement::new(
                Effect::Allow,
                None,
                vec!["s3:GetObject".to_string(), "s3:GetObjectVersion".to_string()],
                vec![format!("arn:aws:s3:::{bucket}/*")],
            ))
            .build()
    }

    #[test]
    fn test_parse_wildcard_policy() {
        let json = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": "*",
                "Action": ["s3:GetObject", "s3:GetObjectVersion"],
                "Resource": ["arn:aws:s3:::mybucket/*"]
            }]
        }"#;

        let policy = BucketPolicy::from_json(json).unwrap();
        assert_eq!(policy, public_read("mybucket"));
        policy.validate().unwrap();
    }

    #[test]
    fn test_parse_named_principal_policy() {
        let json = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"AWS": ["arn:aws:iam:::user/testwrite"]},
                "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                "Resource": ["arn:aws:s3:::mybucket/*"]
            }]
        }"#;

        let policy = BucketPolicy::from_json(json).unwrap();
        let ctx = |who: &str| {
            RequestContext::new(
                Some(who.to_string()),
                S3Action::PutObject,
                "mybucket",
                Some("myobject"),
            )
        };
        assert_eq!(policy.evaluate(&ctx("arn:aws:iam:::user/testwrite")), PolicyDecision::Allow);
        assert_eq!(
            policy.evaluate(&ctx("arn:aws:iam:::user/testread")),
            PolicyDecision::DefaultDeny
        );
    }

    #[test]
    fn test_roundtrip_serialization() {
        let policy = public_read("b1");
        let json = policy.to_json().unwrap();
        assert!(json.contains(r#""Principal":"*""#));
        assert_eq!(BucketPolicy::from_json(&json).unwrap(), policy);
    }

    #[test]
    fn test_invalid_version() {
        let mut policy = public_read("b1");
        policy.version = "2020-01-01".to_string();
        assert!(matches!(policy.validate(), Err(PolicyError::Malformed(_))));
    }

    #[test]
    fn test_empty_statement() {
        let policy = BucketPolicy::builder().build();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_invalid_resource() {
        let policy = BucketPolicy::builder()
            .statement(Statement::new(
                Effect::Allow,
                None,
                vec!["s3:GetObject".to_string()],
                vec!["mybucket/*".to_string()],
            ))
            .build();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_wildcard_admits_anonymous() {
        let policy = public_read("b1");
        let anon = RequestContext::new(None, S3Action::GetObject, "b1", Some("o1"));
        assert_eq!(policy.evaluate(&anon), PolicyDecision::Allow);

        let other_bucket = RequestContext::new(None, S3Action::GetObject, "b2", Some("o1"));
        assert_eq!(policy.evaluate(&other_bucket), PolicyDecision::DefaultDeny);

        let delete = RequestContext::new(None, S3Action::DeleteObject, "b1", Some("o1"));
        assert_eq!(policy.evaluate(&delete), PolicyDecision::DefaultDeny);
    }

    #[test]
    fn test_deny_overrides_allow() {
        let policy = BucketPolicy::builder()
            .statement(Statement::new(
                Effect::Allow,
                None,
                vec!["s3:*".to_string()],
                vec!["arn:aws:s3:::b1/*".to_string()],
            ))
            .statement(Statement::new(
                Effect::Deny,
                Some(vec!["arn:aws:iam:::user/mallory".to_string()]),
                vec!["s3:GetObject".to_string()],
                vec!["arn:aws:s3:::b1/*".to_string()],
            ))
            .build();

        let mallory = RequestContext::new(
            Some("arn:aws:iam:::user/mallory".to_string()),
            S3Action::GetObject,
            "b1",
            Some("o1"),
        );
        assert_eq!(policy.evaluate(&mallory), PolicyDecision::Deny);
    }

    #[test]
    fn test_conditional_statement_never_matches() {
        let json = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": "*",
                "Action": "s3:GetObject",
                "Resource": "arn:aws:s3:::b1/*",
                "Condition": {"Bool": {"aws:SecureTransport": "true"}}
            }]
        }"#;
        let policy = BucketPolicy::from_json(json).unwrap();
        let anon = RequestContext::new(None, S3Action::GetObject, "b1", Some("o1"));
        assert_eq!(policy.evaluate(&anon), PolicyDecision::DefaultDeny);
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("arn:aws:s3:::b1/*", "arn:aws:s3:::b1/dir/obj"));
        assert!(wildcard_match("s3:Get*", "s3:GetObjectVersion"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(wildcard_match("*b*d", "abcbd"));
        assert!(!wildcard_match("arn:aws:s3:::b1/*", "arn:aws:s3:::b10"));
        assert!(!wildcard_match("a?c", "ac"));
    }
}
