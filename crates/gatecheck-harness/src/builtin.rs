//! Built-in scenarios.
//!
//! These encode the access-control experiments the harness was first written
//! for: bucket ownership transfer, sub-identity scope with quotas, and
//! explicit bucket policies for independent users.

use gatecheck_core::AccessLevel;

use crate::assertion::Expectation::{self, Allow, Deny, QuotaExceeded};
use crate::error::ScenarioError;
use crate::payload::PayloadSpec;
use crate::policy::{PolicySpec, StatementSpec};
use crate::scenario::{Actor, Operation, PrincipalSpec, Probe, Scenario};

const MIB: u64 = 1024 * 1024;

/// Names of the built-in scenarios.
#[must_use]
pub fn builtin_names() -> &'static [&'static str] {
    &["ownership-transfer", "subuser-access", "explicit-policy"]
}

/// Returns a built-in scenario by name.
///
/// # Errors
///
/// Returns [`ScenarioError::UnknownBuiltin`] for an unknown name.
pub fn builtin(name: &str) -> Result<Scenario, ScenarioError> {
    match name {
        "ownership-transfer" => ownership_transfer(),
        "subuser-access" => subuser_access(),
        "explicit-policy" => explicit_policy(),
        other => Err(ScenarioError::UnknownBuiltin(other.to_string())),
    }
}

fn probe(actor: &str, operation: Operation, expect: Expectation) -> Probe {
    Probe::new(Actor::from(actor.to_string()), operation, expect)
}

fn make_bucket(bucket: &str) -> Operation {
    Operation::MakeBucket { bucket: bucket.into() }
}

fn remove_bucket(bucket: &str) -> Operation {
    Operation::RemoveBucket { bucket: bucket.into() }
}

fn put(bucket: &str, key: &str, payload: &str) -> Operation {
    Operation::PutObject { bucket: bucket.into(), key: key.into(), payload: payload.into() }
}

fn get(bucket: &str, key: &str) -> Operation {
    Operation::GetObject { bucket: bucket.into(), key: key.into() }
}

fn get_anonymous(bucket: &str, key: &str) -> Operation {
    Operation::GetObjectAnonymous { bucket: bucket.into(), key: key.into() }
}

fn remove(bucket: &str, key: &str) -> Operation {
    Operation::RemoveObject { bucket: bucket.into(), key: key.into() }
}

fn set_policy(bucket: &str, policy: &str) -> Operation {
    Operation::SetPolicy { bucket: bucket.into(), policy: policy.into() }
}

fn link(bucket: &str, owner: &str) -> Operation {
    Operation::LinkBucket { bucket: bucket.into(), owner: owner.into() }
}

fn read_access(principals: &[&str], bucket: &str) -> StatementSpec {
    StatementSpec::allow(
        principals.iter().copied(),
        ["GetObject", "GetObjectVersion"],
        [format!("{bucket}/*")],
    )
}

/// Admin creates a bucket, hands it to a writer, and the writer opens it up.
pub fn ownership_transfer() -> Result<Scenario, ScenarioError> {
    Scenario::builder("ownership-transfer")
        .description("bucket ownership transfer, per-owner visibility and anonymous access")
        .principal(PrincipalSpec::admin("lxdadmin"))
        .principal(PrincipalSpec::writer("testwrite"))
        .payload("object", PayloadSpec::inline("gatecheck ownership probe\n"))
        .policy("public-read", PolicySpec::new(vec![read_access(&["*"], "b1")]))
        .probe(probe("lxdadmin", make_bucket("b1"), Allow))
        .probe(probe("@admin", link("b1", "testwrite"), Allow))
        .probe(
            probe("testwrite", Operation::ListBuckets, Expectation::set(["b1"]))
                .labelled("new owner lists exactly the transferred bucket"),
        )
        .probe(
            probe("lxdadmin", Operation::ListBuckets, Expectation::set(Vec::<String>::new()))
                .labelled("prior owner no longer lists it"),
        )
        .probe(probe("testwrite", put("b1", "o1", "object"), Allow))
        .probe(probe("lxdadmin", get("b1", "o1"), Deny))
        .probe(probe("testwrite", get("b1", "o1"), Allow))
        .probe(probe("@anonymous", get_anonymous("b1", "o1"), Deny))
        .probe(probe("testwrite", set_policy("b1", "public-read"), Allow))
        .probe(probe("@anonymous", get_anonymous("b1", "o1"), Allow))
        .probe(probe("testwrite", remove("b1", "o1"), Allow))
        .probe(probe("testwrite", remove_bucket("b1"), Allow))
        .build()
}

/// A writer with two sub-identities, bucket quota and an anonymous policy.
pub fn subuser_access() -> Result<Scenario, ScenarioError> {
    Scenario::builder("subuser-access")
        .description("sub-identities share their parent's scope within their access level")
        .principal(PrincipalSpec::admin("lxdadmin"))
        .principal(PrincipalSpec::writer("testwrite2"))
        .principal(PrincipalSpec::sub("write", "testwrite2", AccessLevel::Full))
        .principal(PrincipalSpec::sub("read", "testwrite2", AccessLevel::Read))
        .payload("upload", PayloadSpec::generated(2 * MIB, 1))
        .policy("anonymous-read", PolicySpec::new(vec![read_access(&["*"], "mybucket")]))
        .probe(probe("write", make_bucket("mybucket"), Deny))
        .probe(probe("read", make_bucket("mybucket"), Deny))
        .probe(probe("lxdadmin", make_bucket("mybucket"), Allow))
        .probe(probe("lxdadmin", make_bucket("mybucket2"), Allow))
        .probe(probe("@admin", link("mybucket", "testwrite2"), Allow))
        .probe(probe("write", Operation::ListBuckets, Expectation::set(["mybucket"])))
        .probe(probe(
            "@admin",
            Operation::SetQuota { owner: "testwrite2".into(), max_size: MIB },
            Allow,
        ))
        .probe(probe("@admin", Operation::EnableQuota { owner: "testwrite2".into() }, Allow))
        .probe(probe("write", make_bucket("mybucket3"), Deny))
        .probe(
            probe("write", put("mybucket", "myobject", "upload"), QuotaExceeded)
                .labelled("2 MiB upload against a 1 MiB quota"),
        )
        .probe(probe(
            "@admin",
            Operation::SetQuota { owner: "testwrite2".into(), max_size: 20 * MIB },
            Allow,
        ))
        .probe(probe("@admin", Operation::EnableQuota { owner: "testwrite2".into() }, Allow))
        .probe(probe("write", put("mybucket", "myobject", "upload"), Allow))
        .probe(probe("lxdadmin", put("mybucket", "myobject", "upload"), Deny))
        .probe(probe("lxdadmin", put("mybucket2", "myobject", "upload"), Allow))
        .probe(probe("write", get("mybucket", "myobject"), Allow))
        .probe(probe("write", get("mybucket2", "myobject"), Deny))
        .probe(probe("read", get("mybucket2", "myobject"), Deny))
        .probe(probe("@anonymous", get_anonymous("mybucket2", "myobject"), Deny))
        .probe(probe("write", put("mybucket2", "myobject", "upload"), Deny))
        .probe(probe("read", put("mybucket2", "myobject", "upload"), Deny))
        .probe(probe("write", put("mybucket", "myobject", "upload"), Allow))
        .probe(probe("write", get("mybucket", "myobject"), Allow))
        .probe(
            probe("read", get("mybucket", "myobject"), Allow)
                .labelled("read sub-identity sees its parent's object without a policy"),
        )
        .probe(probe("@anonymous", get_anonymous("mybucket", "myobject"), Deny))
        .probe(probe("read", set_policy("mybucket", "anonymous-read"), Deny))
        .probe(probe("write", set_policy("mybucket", "anonymous-read"), Allow))
        .probe(probe("write", get("mybucket", "myobject"), Allow))
        .probe(probe("read", get("mybucket", "myobject"), Allow))
        .probe(probe("@anonymous", get_anonymous("mybucket", "myobject"), Allow))
        .probe(probe("read", remove("mybucket", "myobject"), Deny))
        .probe(probe("write", remove("mybucket", "myobject"), Allow))
        .probe(probe("read", remove_bucket("mybucket"), Deny))
        .probe(probe("write", remove_bucket("mybucket"), Allow))
        .probe(probe("write", remove_bucket("mybucket2"), Deny))
        .build()
}

/// Three independent users; access is granted only through bucket policies.
pub fn explicit_policy() -> Result<Scenario, ScenarioError> {
    let writer_grant = StatementSpec::allow(
        ["testwrite"],
        ["GetObject", "GetObjectVersion", "PutObject", "DeleteObject"],
        ["mybucket/*"],
    );

    Scenario::builder("explicit-policy")
        .description("named-principal and wildcard bucket policies for unrelated users")
        .principal(PrincipalSpec::admin("lxdadmin"))
        .principal(PrincipalSpec::writer("testread"))
        .principal(PrincipalSpec::writer("testwrite"))
        .payload(
            "upload",
            PayloadSpec::generated(64 * 1024, 2).with_content_type("image/jpeg"),
        )
        .policy("writer-only", PolicySpec::new(vec![writer_grant.clone()]))
        .policy(
            "writer-and-reader",
            PolicySpec::new(vec![writer_grant.clone(), read_access(&["testread"], "mybucket")]),
        )
        .policy(
            "writer-and-public",
            PolicySpec::new(vec![writer_grant, read_access(&["*"], "mybucket")]),
        )
        .probe(probe("testwrite", make_bucket("mybucket"), Deny))
        .probe(probe("lxdadmin", make_bucket("mybucket"), Allow))
        .probe(probe("lxdadmin", make_bucket("mybucket2"), Allow))
        .probe(probe("lxdadmin", set_policy("mybucket", "writer-only"), Allow))
        .probe(probe("lxdadmin", Operation::GetPolicy { bucket: "mybucket".into() }, Allow))
        .probe(probe("testread", Operation::GetPolicy { bucket: "mybucket".into() }, Deny))
        .probe(probe("lxdadmin", put("mybucket", "myobject", "upload"), Allow))
        .probe(probe("lxdadmin", put("mybucket2", "myobject", "upload"), Allow))
        .probe(probe(
            "lxdadmin",
            Operation::ListObjects { bucket: "mybucket2".into() },
            Expectation::set(["myobject"]),
        ))
        .probe(probe("testwrite", get("mybucket", "myobject"), Allow))
        .probe(probe("testwrite", get("mybucket2", "myobject"), Deny))
        .probe(probe("testread", get("mybucket2", "myobject"), Deny))
        .probe(probe("@anonymous", get_anonymous("mybucket2", "myobject"), Deny))
        .probe(probe("testwrite", put("mybucket2", "myobject", "upload"), Deny))
        .probe(probe("testread", put("mybucket2", "myobject", "upload"), Deny))
        .probe(probe("testwrite", put("mybucket", "myobject", "upload"), Allow))
        .probe(probe("testwrite", get("mybucket", "myobject"), Allow))
        .probe(probe("testread", get("mybucket", "myobject"), Deny))
        .probe(probe("@anonymous", get_anonymous("mybucket", "myobject"), Deny))
        .probe(probe("lxdadmin", set_policy("mybucket", "writer-and-reader"), Allow))
        .probe(probe("testread", get("mybucket", "myobject"), Allow))
        .probe(probe("@anonymous", get_anonymous("mybucket", "myobject"), Deny))
        .probe(probe("lxdadmin", set_policy("mybucket", "writer-and-public"), Allow))
        .probe(probe("testwrite", get("mybucket", "myobject"), Allow))
        .probe(probe("testread", get("mybucket", "myobject"), Allow))
        .probe(probe("@anonymous", get_anonymous("mybucket", "myobject"), Allow))
        .probe(probe("testread", remove("mybucket", "myobject"), Deny))
        .probe(probe("testwrite", remove("mybucket", "myobject"), Allow))
        .build()
}
