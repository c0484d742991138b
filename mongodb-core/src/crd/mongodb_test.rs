use anyhow::Result;
use maplit::btreemap;

use crate::crd::{AuthMode, LdapSpec, MongoDB, MongoDBStatus, ResourceType};
use crate::error::AppError;
use crate::fixtures;

fn validate(mdb: &MongoDB) -> Result<Vec<String>> {
    mdb.spec.validate(mdb.status.as_ref())
}

fn assert_invalid(mdb: &MongoDB, needle: &str) {
    let err = validate(mdb).expect_err("expected validation to fail");
    match err.downcast_ref::<AppError>() {
        Some(AppError::Invalid(msg)) => assert!(msg.contains(needle), "message {:?} does not contain {:?}", msg, needle),
        other => panic!("expected AppError::Invalid, got {:?}", other),
    }
}

fn ldap() -> LdapSpec {
    LdapSpec {
        servers: vec!["ldap.example.com:636".into()],
        bind_query_user: "cn=admin,dc=example,dc=com".into(),
        bind_query_password_secret_ref: crate::crd::SecretKeyRef {
            name: "ldap-bind".into(),
            key: "password".into(),
        },
        ..Default::default()
    }
}

#[test]
fn plain_replica_set_is_valid() -> Result<()> {
    let warnings = validate(&fixtures::replica_set("rs", 3))?;
    assert!(warnings.is_empty());
    Ok(())
}

#[test]
fn resource_type_is_immutable() {
    let mdb = fixtures::with_status(
        fixtures::replica_set("rs", 3),
        MongoDBStatus {
            last_applied_type: Some(ResourceType::Standalone),
            ..Default::default()
        },
    );
    assert_invalid(&mdb, "Changing type is not currently supported");
}

#[test]
fn replica_set_needs_members() {
    assert_invalid(&fixtures::replica_set("rs", 0), "spec.members must be at least 1");
}

#[test]
fn sharded_fields_are_rejected_on_replica_sets() {
    let mut mdb = fixtures::replica_set("rs", 3);
    mdb.spec.mongos_count = 2;
    assert_invalid(&mdb, "spec.mongosCount is only valid for ShardedCluster resources");
}

#[test]
fn sharded_cluster_needs_every_count() {
    assert!(validate(&fixtures::sharded_cluster("sc", 2, 3, 3, 2)).is_ok());
    assert_invalid(&fixtures::sharded_cluster("sc", 2, 3, 0, 2), "must all be at least 1");
}

#[test]
fn unparseable_version_is_invalid() {
    assert_invalid(&fixtures::with_version(fixtures::replica_set("rs", 1), "latest"), "invalid MongoDB version");
}

#[test]
fn horizons_need_tls_and_one_entry_per_member() {
    let horizons = vec![
        btreemap! {"external".to_string() => "rs-0.example.com:27017".to_string()},
        btreemap! {"external".to_string() => "rs-1.example.com:27017".to_string()},
    ];
    let mdb = fixtures::with_horizons(fixtures::replica_set("rs", 2), horizons.clone());
    assert_invalid(&mdb, "TLS must be enabled");

    let mdb = fixtures::with_horizons(fixtures::with_tls(fixtures::replica_set("rs", 3)), horizons.clone());
    assert_invalid(&mdb, "Number of horizons must be equal to number of members");

    let mdb = fixtures::with_horizons(fixtures::with_tls(fixtures::replica_set("rs", 2)), horizons);
    assert!(validate(&mdb).is_ok());
}

#[test]
fn extra_member_config_is_a_warning() -> Result<()> {
    let mut mdb = fixtures::replica_set("rs", 1);
    mdb.spec.member_config = vec![Default::default(), Default::default()];
    let warnings = validate(&mdb)?;
    assert_eq!(warnings.len(), 1);
    Ok(())
}

#[test]
fn x509_requires_tls() {
    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::X509], None);
    assert_invalid(&mdb, "Cannot have a non-tls deployment when x509 authentication is enabled");

    let mdb = fixtures::with_tls(mdb);
    assert!(validate(&mdb).is_ok());
}

#[test]
fn several_modes_need_an_agent_mode() {
    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::ScramSha256, AuthMode::ScramSha1], None);
    assert_invalid(&mdb, "agents.mode must be specified");

    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::ScramSha256, AuthMode::ScramSha1], Some(AuthMode::ScramSha1));
    assert!(validate(&mdb).is_ok());
}

#[test]
fn agent_mode_must_be_an_enabled_mode() {
    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::ScramSha256], Some(AuthMode::X509));
    assert_invalid(&mdb, "not specified in authentication modes: X509");
}

#[test]
fn enabled_auth_needs_a_mode() {
    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[], None);
    assert_invalid(&mdb, "at least one mode must be set");
}

#[test]
fn ldap_mode_needs_ldap_settings() {
    let mut mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::Ldap], None);
    assert_invalid(&mdb, "spec.security.authentication.ldap must be set");

    if let Some(auth) = mdb.spec.security.as_mut().and_then(|s| s.authentication.as_mut()) {
        auth.ldap = Some(ldap());
    }
    assert!(validate(&mdb).is_ok());
}

#[test]
fn internal_cluster_x509_needs_x509_mode() {
    let mdb = fixtures::with_tls(fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::ScramSha256], None));
    let mdb = fixtures::with_internal_cluster_x509(mdb);
    assert_invalid(&mdb, "x509 internal cluster authentication");

    let mdb = fixtures::with_tls(fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::X509], None));
    assert!(validate(&fixtures::with_internal_cluster_x509(mdb)).is_ok());
}

#[test]
fn disabled_auth_skips_mode_checks() {
    let mdb = fixtures::with_auth_disabled(fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::X509], None));
    assert!(validate(&mdb).is_ok());
}

#[test]
fn agent_mode_defaults_to_the_single_mode() {
    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::ScramSha256], None);
    assert_eq!(mdb.spec.agent_mode(), Some(AuthMode::ScramSha256));

    let mdb = fixtures::with_auth(fixtures::replica_set("rs", 3), &[AuthMode::ScramSha256, AuthMode::X509], None);
    assert_eq!(mdb.spec.agent_mode(), None);

    assert_eq!(fixtures::replica_set("rs", 3).spec.agent_mode(), None);
}

#[test]
fn major_version_accepts_short_and_enterprise_forms() -> Result<()> {
    assert_eq!(fixtures::with_version(fixtures::replica_set("rs", 1), "6.0.5-ent").spec.major_version()?, 6);
    assert_eq!(fixtures::with_version(fixtures::replica_set("rs", 1), "4.4").spec.major_version()?, 4);
    Ok(())
}

#[test]
fn spec_hash_is_stable_and_tracks_changes() {
    let first = fixtures::replica_set("rs", 3);
    let again = fixtures::replica_set("rs", 3);
    assert_eq!(first.spec.spec_hash(), again.spec.spec_hash());
    assert_ne!(first.spec.spec_hash(), fixtures::replica_set("rs", 4).spec.spec_hash());
}

#[test]
fn secret_key_refs_default_to_the_password_key() -> Result<()> {
    assert_eq!(LdapSpec::default().bind_query_password_secret_ref.key, "password");
    let parsed: crate::crd::SecretKeyRef = serde_json::from_value(serde_json::json!({"name": "ldap-bind"}))?;
    assert_eq!(parsed, crate::crd::SecretKeyRef { name: "ldap-bind".into(), ..Default::default() });
    Ok(())
}
