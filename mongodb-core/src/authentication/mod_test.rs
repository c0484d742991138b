use anyhow::Result;

use crate::authentication::{
    plan, reconcile, AgentSubjects, AuthOptions, LdapAgentUser, MechanismName, MechanismTransition, TlsState, DOWNGRADE_ERROR,
};
use crate::crd::AuthMode;
use crate::deployment::{Deployment, Ldap, MongoDbUser, AUTOMATION_AGENT_NAME, EXTERNAL_DB};
use crate::error::AppError;
use crate::fixtures;

const SUBJECT: &str = "CN=mms-automation-agent,OU=mongodb-kubernetes,O=cluster.local-agent,L=NY,ST=NY,C=US";

fn options(modes: &[AuthMode], agent_mode: Option<AuthMode>, major_version: u64) -> AuthOptions {
    AuthOptions {
        configured: true,
        enabled: true,
        modes: modes.to_vec(),
        agent_mode,
        major_version,
        authoritative_set: true,
        require_client_certificates: false,
        agent_subjects: AgentSubjects {
            automation: Some(SUBJECT.into()),
            monitoring: None,
            backup: None,
        },
        ldap: None,
        ldap_agent: None,
        delete_users: false,
    }
}

fn ldap() -> Ldap {
    Ldap {
        servers: "ldap.example.com:636".into(),
        transport_security: "tls".into(),
        validate_ldap_server_config: true,
        bind_method: "simple".into(),
        bind_query_user: "cn=admin,dc=example,dc=org".into(),
        bind_query_password: "secret".into(),
        bind_sasl_mechanisms: None,
        ca_file_contents: None,
        authz_query_template: None,
        user_to_dn_mapping: None,
        timeout_ms: 10_000,
        user_cache_invalidation_interval: 30,
    }
}

fn apply(deployment: &mut Deployment, opts: &AuthOptions) -> Result<bool> {
    let tls = TlsState::of(deployment);
    Ok(reconcile(deployment, opts, tls)?.multi_stage)
}

fn scram_deployment(mechanism: MechanismName) -> Deployment {
    let mut deployment = Deployment::default();
    deployment.auth.enable();
    deployment.auth.add_deployment_mechanism(mechanism.as_str());
    deployment.auth.set_agent_mechanism(mechanism.as_str());
    deployment
}

#[test]
fn scram_resolves_by_major_version() -> Result<()> {
    let mut modern = Deployment::default();
    apply(&mut modern, &options(&[AuthMode::Scram], None, 6))?;
    assert!(modern.auth.is_enabled());
    assert_eq!(modern.auth.deployment_auth_mechanisms, vec!["SCRAM-SHA-256".to_string()]);
    assert_eq!(modern.auth.auto_auth_mechanisms, vec!["SCRAM-SHA-256".to_string()]);
    assert_eq!(modern.auth.auto_user, AUTOMATION_AGENT_NAME);
    assert!(!modern.auth.auto_pwd.is_empty(), "expected an agent password to be generated");
    assert!(!modern.auth.key.is_empty(), "expected a keyfile to be generated");
    assert!(modern.auth.authoritative_set);

    let mut legacy = Deployment::default();
    apply(&mut legacy, &options(&[AuthMode::Scram], None, 3))?;
    assert_eq!(legacy.auth.deployment_auth_mechanisms, vec!["MONGODB-CR".to_string()]);
    assert_eq!(legacy.auth.auto_auth_mechanisms, vec!["MONGODB-CR".to_string()]);
    Ok(())
}

#[test]
fn agents_already_on_mongodb_cr_keep_it() -> Result<()> {
    let mut deployment = scram_deployment(MechanismName::MongoDbCr);
    apply(&mut deployment, &options(&[AuthMode::Scram], None, 4))?;
    assert_eq!(deployment.auth.deployment_auth_mechanisms, vec!["MONGODB-CR".to_string()]);
    assert_eq!(deployment.auth.agent_mechanism(), Some("MONGODB-CR"));
    Ok(())
}

#[test]
fn existing_credentials_are_kept_on_enable() -> Result<()> {
    let mut deployment = scram_deployment(MechanismName::ScramSha256);
    deployment.auth.auto_user = "custom-agent".into();
    let (pwd, key) = (deployment.auth.auto_pwd.clone(), deployment.auth.key.clone());
    apply(&mut deployment, &options(&[AuthMode::Scram], None, 6))?;
    assert_eq!(deployment.auth.auto_user, "custom-agent");
    assert_eq!(deployment.auth.auto_pwd, pwd);
    assert_eq!(deployment.auth.key, key);
    Ok(())
}

#[test]
fn scram_sha_256_is_never_downgraded() {
    let mut deployment = scram_deployment(MechanismName::ScramSha256);
    let before = deployment.auth.clone();
    let err = apply(&mut deployment, &options(&[AuthMode::Scram], None, 3)).unwrap_err();
    assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Invalid(msg)) if msg == DOWNGRADE_ERROR), "unexpected error {:?}", err);
    assert_eq!(deployment.auth, before, "auth must be left untouched");

    let err = apply(&mut deployment, &options(&[AuthMode::ScramSha1], None, 6)).unwrap_err();
    assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Invalid(_))));
    assert_eq!(deployment.auth, before);
}

#[test]
fn downgrade_is_rejected_even_when_x509_would_be_deferred() {
    let mut deployment = fixtures::replica_set_deployment("my-rs", 3, false);
    deployment.auth.enable();
    deployment.auth.add_deployment_mechanism(MechanismName::ScramSha256.as_str());
    deployment.auth.set_agent_mechanism(MechanismName::ScramSha256.as_str());
    let before = deployment.clone();

    let err = apply(&mut deployment, &options(&[AuthMode::ScramSha1, AuthMode::X509], Some(AuthMode::ScramSha1), 6)).unwrap_err();
    assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Invalid(msg)) if msg == DOWNGRADE_ERROR), "unexpected error {:?}", err);
    assert_eq!(deployment, before);
}

#[test]
fn x509_is_deferred_while_processes_lack_tls() -> Result<()> {
    let mut deployment = fixtures::replica_set_deployment("my-rs", 3, false);
    let before = deployment.clone();
    let multi_stage = apply(&mut deployment, &options(&[AuthMode::X509], None, 6))?;
    assert!(multi_stage, "expected the x509 transition to be deferred");
    assert!(!deployment.auth.is_enabled());
    assert_eq!(deployment, before, "nothing may be applied while deferred");
    Ok(())
}

#[test]
fn x509_applies_on_an_empty_or_fully_tls_document() -> Result<()> {
    for mut deployment in [Deployment::default(), fixtures::replica_set_deployment("my-rs", 3, true)] {
        let multi_stage = apply(&mut deployment, &options(&[AuthMode::X509], None, 6))?;
        assert!(!multi_stage);
        assert!(deployment.auth.is_enabled());
        assert_eq!(deployment.auth.deployment_auth_mechanisms, vec!["MONGODB-X509".to_string()]);
        assert_eq!(deployment.auth.auto_auth_mechanisms, vec!["MONGODB-X509".to_string()]);
        assert_eq!(deployment.auth.auto_user, SUBJECT);
        assert!(deployment.auth.auto_pwd.is_empty(), "x509 agents carry no password");
        assert_eq!(deployment.monitoring_agent_config.username.as_deref(), Some(SUBJECT));
        assert!(deployment.monitoring_agent_config.ssl_pem_key_file.is_some());
        assert_eq!(deployment.backup_agent_config.username.as_deref(), Some(SUBJECT));
        let tls = deployment.tls.clone().unwrap_or_default();
        assert_eq!(tls.client_certificate_mode.as_deref(), Some("OPTIONAL"));
        assert!(tls.auto_pem_key_file_path.is_some());
    }
    Ok(())
}

#[test]
fn x509_agents_need_a_certificate_subject() {
    let mut opts = options(&[AuthMode::X509], None, 6);
    opts.agent_subjects = AgentSubjects::default();
    let mut deployment = Deployment::default();
    let err = apply(&mut deployment, &opts).unwrap_err();
    assert!(AppError::is_not_found(&err), "expected NotFound, got {:?}", err);
    assert!(!deployment.auth.is_enabled());
}

#[test]
fn multiple_modes_advertise_all_and_agents_use_one() -> Result<()> {
    let mut deployment = Deployment::default();
    apply(&mut deployment, &options(&[AuthMode::Scram, AuthMode::X509], Some(AuthMode::Scram), 6))?;
    assert_eq!(deployment.auth.deployment_auth_mechanisms, vec!["SCRAM-SHA-256".to_string(), "MONGODB-X509".to_string()]);
    assert_eq!(deployment.auth.auto_auth_mechanisms, vec!["SCRAM-SHA-256".to_string()]);
    assert_eq!(deployment.auth.auto_user, AUTOMATION_AGENT_NAME);
    assert!(deployment.monitoring_agent_config.username.is_none(), "scram agents need no x509 user");
    Ok(())
}

#[test]
fn switching_agents_from_x509_to_scram_resets_the_agent_user() -> Result<()> {
    let mut deployment = Deployment::default();
    apply(&mut deployment, &options(&[AuthMode::X509], None, 6))?;
    apply(&mut deployment, &options(&[AuthMode::Scram, AuthMode::X509], Some(AuthMode::Scram), 6))?;
    assert_eq!(deployment.auth.auto_user, AUTOMATION_AGENT_NAME);
    assert!(!deployment.auth.auto_pwd.is_empty());
    assert_eq!(deployment.auth.auto_auth_mechanisms, vec!["SCRAM-SHA-256".to_string()]);
    assert!(deployment.monitoring_agent_config.ssl_pem_key_file.is_none());
    Ok(())
}

#[test]
fn undesired_mechanisms_are_removed() -> Result<()> {
    let mut deployment = Deployment::default();
    apply(&mut deployment, &options(&[AuthMode::Scram, AuthMode::X509], Some(AuthMode::Scram), 6))?;
    apply(&mut deployment, &options(&[AuthMode::Scram], None, 6))?;
    assert_eq!(deployment.auth.deployment_auth_mechanisms, vec!["SCRAM-SHA-256".to_string()]);
    assert!(deployment.tls.is_none(), "x509 client certificate settings must be removed");
    Ok(())
}

#[test]
fn ldap_populates_the_ldap_section() -> Result<()> {
    let mut opts = options(&[AuthMode::Ldap], None, 6);
    opts.ldap = Some(ldap());
    opts.ldap_agent = Some(LdapAgentUser {
        username: "mms-automation-agent".into(),
        password: "agent-password".into(),
        group_dn: Some("cn=agents,dc=example,dc=org".into()),
    });
    let mut deployment = Deployment::default();
    apply(&mut deployment, &opts)?;
    assert_eq!(deployment.auth.deployment_auth_mechanisms, vec!["PLAIN".to_string()]);
    assert_eq!(deployment.auth.auto_auth_mechanisms, vec!["PLAIN".to_string()]);
    assert_eq!(deployment.auth.auto_user, "mms-automation-agent");
    assert_eq!(deployment.auth.auto_pwd, "agent-password");
    assert_eq!(deployment.auth.auto_ldap_group_dn.as_deref(), Some("cn=agents,dc=example,dc=org"));
    assert_eq!(deployment.ldap, Some(ldap()));
    assert_eq!(deployment.monitoring_agent_config.password.as_deref(), Some("agent-password"));

    // Dropping LDAP removes the section again.
    apply(&mut deployment, &options(&[AuthMode::Scram], None, 6))?;
    assert!(deployment.ldap.is_none());
    assert_eq!(deployment.auth.deployment_auth_mechanisms, vec!["SCRAM-SHA-256".to_string()]);
    Ok(())
}

#[test]
fn ldap_without_settings_is_invalid() {
    let mut deployment = Deployment::default();
    let err = apply(&mut deployment, &options(&[AuthMode::Ldap], None, 6)).unwrap_err();
    assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Invalid(_))));
}

fn user(username: &str, database: &str) -> MongoDbUser {
    MongoDbUser {
        username: username.into(),
        database: database.into(),
        roles: vec![],
        authentication_restrictions: vec![],
        mechanisms: vec![],
        scram_sha1_creds: None,
        scram_sha256_creds: None,
    }
}

#[test]
fn disabling_clears_mechanisms_and_agent_users_but_keeps_keys() -> Result<()> {
    let mut deployment = Deployment::default();
    apply(&mut deployment, &options(&[AuthMode::X509], None, 6))?;
    deployment.auth.upsert_user(user(SUBJECT, EXTERNAL_DB));
    deployment.auth.upsert_user(user("app", "admin"));
    let key = deployment.auth.key.clone();

    let mut opts = options(&[], None, 6);
    opts.enabled = false;
    apply(&mut deployment, &opts)?;
    assert!(!deployment.auth.is_enabled());
    assert!(deployment.auth.deployment_auth_mechanisms.is_empty());
    assert!(deployment.auth.auto_auth_mechanisms.is_empty());
    assert!(deployment.auth.user(SUBJECT, EXTERNAL_DB).is_none(), "agent user must be removed");
    assert_eq!(deployment.auth.users_deleted.len(), 1);
    assert_eq!(deployment.auth.auto_user, AUTOMATION_AGENT_NAME);
    assert_eq!(deployment.auth.key, key);
    assert!(deployment.monitoring_agent_config.username.is_none());
    Ok(())
}

#[test]
fn disabling_keeps_application_users() -> Result<()> {
    let mut deployment = scram_deployment(MechanismName::ScramSha256);
    deployment.auth.upsert_user(user("app", "admin"));

    let mut opts = options(&[AuthMode::Scram], None, 6);
    opts.enabled = false;
    apply(&mut deployment, &opts)?;
    assert!(!deployment.auth.is_enabled());
    assert!(deployment.auth.user("app", "admin").is_some(), "expected user app/admin to survive disabling authentication");
    assert!(deployment.auth.users_deleted.is_empty(), "unexpected deleted users {:?}", deployment.auth.users_deleted);
    Ok(())
}

#[test]
fn disabling_with_user_deletion_removes_every_user() -> Result<()> {
    let mut deployment = scram_deployment(MechanismName::ScramSha256);
    deployment.auth.upsert_user(user("app", "admin"));
    deployment.auth.upsert_user(user("reporting", "metrics"));

    let opts = AuthOptions {
        configured: true,
        delete_users: true,
        ..Default::default()
    };
    apply(&mut deployment, &opts)?;
    assert!(!deployment.auth.is_enabled());
    assert!(deployment.auth.users_wanted.is_empty());
    assert_eq!(deployment.auth.users_deleted.len(), 2);
    Ok(())
}

#[test]
fn unconfigured_or_already_disabled_is_a_no_op() -> Result<()> {
    let mut deployment = fixtures::replica_set_deployment("my-rs", 1, false);
    let before = deployment.clone();
    let unconfigured = AuthOptions::default();
    assert_eq!(plan(&unconfigured, &deployment.auth), vec![MechanismTransition::NoOp]);
    apply(&mut deployment, &unconfigured)?;
    assert_eq!(deployment, before);

    let mut disabled = options(&[AuthMode::Scram], None, 6);
    disabled.enabled = false;
    assert_eq!(plan(&disabled, &deployment.auth), vec![MechanismTransition::NoOp]);
    apply(&mut deployment, &disabled)?;
    assert_eq!(deployment, before);
    Ok(())
}

#[test]
fn plan_deduplicates_resolved_mechanisms() {
    let deployment = Deployment::default();
    let opts = options(&[AuthMode::Scram, AuthMode::ScramSha256, AuthMode::X509], Some(AuthMode::X509), 6);
    assert_eq!(
        plan(&opts, &deployment.auth),
        vec![MechanismTransition::EnableScram(MechanismName::ScramSha256), MechanismTransition::EnableX509]
    );
}
