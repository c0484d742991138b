//! Authentication mechanism transitions.
//!
//! A pass resolves the resource's authentication settings into `AuthOptions`, plans the set of
//! `MechanismTransition`s to apply against the document, and then either applies all of them or
//! none. Enabling x509 while non-TLS processes exist is deferred to a later pass: agents could
//! not authenticate against processes which do not present certificates yet.

mod scram;
#[cfg(test)]
mod mod_test;

use std::collections::BTreeSet;

use anyhow::{bail, Result};

pub use scram::{compute_creds, compute_creds_with_salt, creds_match, ScramVariant};

use crate::crd::AuthMode;
use crate::deployment::{
    random_secret, Auth, Deployment, Ldap, AUTOMATION_AGENT_NAME, AUTOMATION_AGENT_PEM_PATH, BACKUP_AGENT_PEM_PATH, EXTERNAL_DB,
    MONITORING_AGENT_PEM_PATH,
};
use crate::error::AppError;

/// The error reported when a SCRAM-SHA-256 deployment is asked to fall back to SCRAM-SHA-1.
pub const DOWNGRADE_ERROR: &str = "Unable to downgrade to SCRAM-SHA-1 when SCRAM-SHA-256 has been enabled";

/// Mechanism names as written to the automation config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MechanismName {
    ScramSha256,
    ScramSha1,
    /// The legacy name under which agents use SCRAM-SHA-1.
    MongoDbCr,
    X509,
    Plain,
}

impl MechanismName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::MongoDbCr => "MONGODB-CR",
            Self::X509 => "MONGODB-X509",
            Self::Plain => "PLAIN",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SCRAM-SHA-256" => Some(Self::ScramSha256),
            "SCRAM-SHA-1" => Some(Self::ScramSha1),
            "MONGODB-CR" => Some(Self::MongoDbCr),
            "MONGODB-X509" => Some(Self::X509),
            "PLAIN" => Some(Self::Plain),
            _ => None,
        }
    }

    pub fn is_scram(&self) -> bool {
        matches!(self, Self::ScramSha256 | Self::ScramSha1 | Self::MongoDbCr)
    }

    /// Resolve a resource authentication mode against the document's current state.
    ///
    /// Plain `SCRAM` becomes SCRAM-SHA-256 from MongoDB 4 onwards and MONGODB-CR below. A
    /// document whose agents already use MONGODB-CR keeps it.
    pub fn resolve(mode: AuthMode, major_version: u64, auth: &Auth) -> Self {
        match mode {
            AuthMode::Scram => {
                let uses_cr = auth.is_enabled()
                    && (auth.agent_mechanism() == Some(Self::MongoDbCr.as_str()) || auth.has_deployment_mechanism(Self::MongoDbCr.as_str()));
                if uses_cr || major_version < 4 {
                    Self::MongoDbCr
                } else {
                    Self::ScramSha256
                }
            }
            AuthMode::ScramSha1 => Self::ScramSha1,
            AuthMode::ScramSha256 => Self::ScramSha256,
            AuthMode::MongoDbCr => Self::MongoDbCr,
            AuthMode::X509 => Self::X509,
            AuthMode::Ldap => Self::Plain,
        }
    }
}

/// A single step of the authentication state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MechanismTransition {
    NoOp,
    EnableScram(MechanismName),
    EnableX509,
    EnableLdap,
    Disable,
}

impl MechanismTransition {
    fn mechanism(&self) -> Option<MechanismName> {
        match self {
            Self::EnableScram(name) => Some(*name),
            Self::EnableX509 => Some(MechanismName::X509),
            Self::EnableLdap => Some(MechanismName::Plain),
            Self::NoOp | Self::Disable => None,
        }
    }
}

/// Client certificate subjects of the agents, read from their certificates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentSubjects {
    pub automation: Option<String>,
    pub monitoring: Option<String>,
    pub backup: Option<String>,
}

impl AgentSubjects {
    fn all(&self) -> impl Iterator<Item = &String> {
        self.automation.iter().chain(self.monitoring.iter()).chain(self.backup.iter())
    }
}

/// The LDAP identity used by the agents when LDAP is their mechanism.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapAgentUser {
    pub username: String,
    pub password: String,
    pub group_dn: Option<String>,
}

/// Authentication settings of a resource, with every external input already resolved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthOptions {
    /// False when the resource has no authentication section at all.
    pub configured: bool,
    pub enabled: bool,
    pub modes: Vec<AuthMode>,
    pub agent_mode: Option<AuthMode>,
    /// The lowest MongoDB major version among the processes being configured.
    pub major_version: u64,
    pub authoritative_set: bool,
    pub require_client_certificates: bool,
    pub agent_subjects: AgentSubjects,
    pub ldap: Option<Ldap>,
    pub ldap_agent: Option<LdapAgentUser>,
    /// Remove every user from the document when disabling. Only set when the last resource goes.
    pub delete_users: bool,
}

/// The TLS state of the document as it was read, before this pass merged anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsState {
    pub all_processes_tls: bool,
    pub process_count: usize,
}

impl TlsState {
    pub fn of(deployment: &Deployment) -> Self {
        Self {
            all_processes_tls: deployment.all_processes_tls_enabled(),
            process_count: deployment.processes.len(),
        }
    }

    fn allows_x509(&self) -> bool {
        self.all_processes_tls || self.process_count == 0
    }
}

/// The result of an authentication pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthOutcome {
    pub transitions: Vec<MechanismTransition>,
    /// Nothing was applied; the transitions must be retried in a later pass.
    pub multi_stage: bool,
}

/// Plan the transitions which take `auth` to the state described by `opts`.
pub fn plan(opts: &AuthOptions, auth: &Auth) -> Vec<MechanismTransition> {
    if !opts.configured {
        return vec![MechanismTransition::NoOp];
    }
    if !opts.enabled {
        return match auth.is_enabled() {
            true => vec![MechanismTransition::Disable],
            false => vec![MechanismTransition::NoOp],
        };
    }
    let mut seen = BTreeSet::new();
    let mut transitions = vec![];
    for mode in opts.modes.iter() {
        let name = MechanismName::resolve(*mode, opts.major_version, auth);
        if !seen.insert(name) {
            continue;
        }
        transitions.push(match name {
            MechanismName::X509 => MechanismTransition::EnableX509,
            MechanismName::Plain => MechanismTransition::EnableLdap,
            scram => MechanismTransition::EnableScram(scram),
        });
    }
    if transitions.is_empty() {
        transitions.push(MechanismTransition::NoOp);
    }
    transitions
}

/// Apply the authentication settings in `opts` to the document.
///
/// Either every planned transition is applied or none is. `tls` must describe the document as it
/// was before this pass merged its processes.
pub fn reconcile(deployment: &mut Deployment, opts: &AuthOptions, tls: TlsState) -> Result<AuthOutcome> {
    let transitions = plan(opts, &deployment.auth);
    check_downgrade(&transitions, &deployment.auth)?;
    let enabling_x509 = transitions.contains(&MechanismTransition::EnableX509) && !deployment.auth.has_deployment_mechanism(MechanismName::X509.as_str());
    if enabling_x509 && !tls.allows_x509() {
        tracing::info!(processes = tls.process_count, "deferring x509 authentication until all processes have TLS enabled");
        return Ok(AuthOutcome {
            transitions,
            multi_stage: true,
        });
    }

    let agent_mechanism = opts
        .agent_mode
        .or_else(|| opts.modes.first().copied())
        .map(|mode| MechanismName::resolve(mode, opts.major_version, &deployment.auth));
    check_transitions(&transitions, opts, agent_mechanism)?;

    for transition in transitions.iter() {
        let is_agent = transition.mechanism().is_some() && transition.mechanism() == agent_mechanism;
        match transition {
            MechanismTransition::NoOp => (),
            MechanismTransition::EnableScram(name) => enable_scram(deployment, opts, *name, is_agent),
            MechanismTransition::EnableX509 => enable_x509(deployment, opts, is_agent),
            MechanismTransition::EnableLdap => enable_ldap(deployment, opts, is_agent),
            MechanismTransition::Disable => disable(deployment, opts),
        }
    }
    if opts.configured && opts.enabled {
        let desired: BTreeSet<MechanismName> = transitions.iter().filter_map(MechanismTransition::mechanism).collect();
        remove_undesired(deployment, &desired);
    }
    Ok(AuthOutcome {
        transitions,
        multi_stage: false,
    })
}

/// SCRAM-SHA-256 deployments never fall back to SCRAM-SHA-1, deferred or not.
fn check_downgrade(transitions: &[MechanismTransition], auth: &Auth) -> Result<()> {
    let desired: Vec<MechanismName> = transitions.iter().filter_map(MechanismTransition::mechanism).collect();
    let wants_sha1 = desired.iter().any(|m| matches!(m, MechanismName::ScramSha1 | MechanismName::MongoDbCr));
    if auth.has_deployment_mechanism(MechanismName::ScramSha256.as_str()) && wants_sha1 && !desired.contains(&MechanismName::ScramSha256) {
        bail!(AppError::Invalid(DOWNGRADE_ERROR.into()));
    }
    Ok(())
}

/// Reject transitions which cannot be applied, before anything is mutated.
fn check_transitions(transitions: &[MechanismTransition], opts: &AuthOptions, agent: Option<MechanismName>) -> Result<()> {
    let desired: Vec<MechanismName> = transitions.iter().filter_map(MechanismTransition::mechanism).collect();
    if desired.contains(&MechanismName::Plain) && opts.ldap.is_none() {
        bail!(AppError::Invalid("LDAP authentication requires LDAP settings".into()));
    }
    match agent {
        Some(MechanismName::X509) if desired.contains(&MechanismName::X509) && opts.agent_subjects.automation.is_none() => {
            bail!(AppError::NotFound("automation agent client certificate".into()))
        }
        Some(MechanismName::Plain) if desired.contains(&MechanismName::Plain) && opts.ldap_agent.is_none() => {
            bail!(AppError::Invalid("LDAP agent authentication requires an automation user name and password".into()))
        }
        _ => Ok(()),
    }
}

fn enable_common(deployment: &mut Deployment, opts: &AuthOptions) {
    deployment.auth.enable();
    deployment.auth.authoritative_set = opts.authoritative_set;
}

fn enable_scram(deployment: &mut Deployment, opts: &AuthOptions, name: MechanismName, is_agent: bool) {
    enable_common(deployment, opts);
    let auth = &mut deployment.auth;
    auth.add_deployment_mechanism(name.as_str());
    if !is_agent {
        return;
    }
    let previous = auth.agent_mechanism().and_then(MechanismName::parse);
    if matches!(previous, Some(MechanismName::X509) | Some(MechanismName::Plain)) {
        // The agent user was an external identity.
        auth.auto_user = AUTOMATION_AGENT_NAME.into();
        auth.auto_pwd = random_secret(24);
    }
    auth.auto_ldap_group_dn = None;
    auth.set_agent_mechanism(name.as_str());
    for config in [&mut deployment.monitoring_agent_config, &mut deployment.backup_agent_config] {
        config.disable_x509();
        config.disable_ldap();
    }
    let client_mode = deployment.tls.as_ref().and_then(|tls| tls.client_certificate_mode.clone());
    deployment.configure_agent_tls(client_mode.as_deref(), None);
}

fn enable_x509(deployment: &mut Deployment, opts: &AuthOptions, is_agent: bool) {
    enable_common(deployment, opts);
    deployment.auth.add_deployment_mechanism(MechanismName::X509.as_str());
    let client_mode = if opts.require_client_certificates { "REQUIRE" } else { "OPTIONAL" };
    if !is_agent {
        let pem = deployment.tls.as_ref().and_then(|tls| tls.auto_pem_key_file_path.clone());
        deployment.configure_agent_tls(Some(client_mode), pem.as_deref());
        return;
    }
    let automation = opts.agent_subjects.automation.clone().unwrap_or_default();
    let auth = &mut deployment.auth;
    auth.auto_user = automation.clone();
    auth.auto_pwd = String::new();
    auth.auto_ldap_group_dn = None;
    auth.set_agent_mechanism(MechanismName::X509.as_str());
    deployment.configure_agent_tls(Some(client_mode), Some(AUTOMATION_AGENT_PEM_PATH));

    let monitoring = opts.agent_subjects.monitoring.as_deref().unwrap_or(&automation);
    deployment.monitoring_agent_config.disable_ldap();
    deployment.monitoring_agent_config.enable_x509(monitoring, MONITORING_AGENT_PEM_PATH);
    let backup = opts.agent_subjects.backup.as_deref().unwrap_or(&automation);
    deployment.backup_agent_config.disable_ldap();
    deployment.backup_agent_config.enable_x509(backup, BACKUP_AGENT_PEM_PATH);
}

fn enable_ldap(deployment: &mut Deployment, opts: &AuthOptions, is_agent: bool) {
    enable_common(deployment, opts);
    deployment.auth.add_deployment_mechanism(MechanismName::Plain.as_str());
    deployment.ldap = opts.ldap.clone();
    let agent = match (is_agent, opts.ldap_agent.as_ref()) {
        (true, Some(agent)) => agent,
        _ => return,
    };
    let auth = &mut deployment.auth;
    auth.auto_user = agent.username.clone();
    auth.auto_pwd = agent.password.clone();
    auth.auto_ldap_group_dn = agent.group_dn.clone();
    auth.set_agent_mechanism(MechanismName::Plain.as_str());
    let client_mode = deployment.tls.as_ref().and_then(|tls| tls.client_certificate_mode.clone());
    deployment.configure_agent_tls(client_mode.as_deref(), None);
    for config in [&mut deployment.monitoring_agent_config, &mut deployment.backup_agent_config] {
        config.disable_x509();
        config.enable_ldap(&agent.username, &agent.password);
        config.ldap_group_dn = agent.group_dn.clone();
    }
}

fn disable(deployment: &mut Deployment, opts: &AuthOptions) {
    for subject in opts.agent_subjects.all() {
        deployment.auth.remove_user(subject, EXTERNAL_DB);
    }
    for config in [&mut deployment.monitoring_agent_config, &mut deployment.backup_agent_config] {
        config.disable_x509();
        config.disable_ldap();
    }
    deployment.ldap = None;
    deployment.configure_agent_tls(None, None);
    deployment.auth.disable(opts.delete_users);
}

/// Drop mechanisms which are no longer desired along with the settings which only they use.
fn remove_undesired(deployment: &mut Deployment, desired: &BTreeSet<MechanismName>) {
    let current: Vec<String> = deployment.auth.deployment_auth_mechanisms.clone();
    for name in current.iter() {
        let parsed = MechanismName::parse(name);
        if parsed.map(|m| desired.contains(&m)).unwrap_or(false) {
            continue;
        }
        tracing::debug!(mechanism = %name, "removing authentication mechanism");
        deployment.auth.remove_deployment_mechanism(name);
        deployment.auth.clear_agent_mechanism(name);
        match parsed {
            Some(MechanismName::X509) => deployment.configure_agent_tls(None, None),
            Some(MechanismName::Plain) => deployment.ldap = None,
            _ => (),
        }
    }
}
