//! MongoDB CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See `mongodb-core/examples/crd.rs`.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Phase, SecretKeyRef};
use crate::deployment::Role;
use crate::error::AppError;

pub type MongoDB = MongoDBCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the MongoDB resource.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "MongoDBCRD",
    status = "MongoDBStatus",
    group = "mongodb.com",
    version = "v1",
    kind = "MongoDB",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "mdb",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Members","type":"integer","jsonPath":".status.members"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBSpec {
    /// The kind of deployment described by this resource. Immutable once applied.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// The MongoDB server version, e.g. `6.0.5` or `6.0.5-ent`.
    pub version: String,
    #[serde(default)]
    pub feature_compatibility_version: Option<String>,

    /// Replica set members. Scaled one member per reconciliation.
    #[serde(default)]
    pub members: u32,
    /// Per-member votes, priority and tags, matched by position.
    #[serde(default)]
    pub member_config: Vec<MemberConfig>,

    /// Sharded cluster topology.
    #[serde(default)]
    pub shard_count: u32,
    #[serde(default)]
    pub mongods_per_shard_count: u32,
    #[serde(default)]
    pub config_server_count: u32,
    #[serde(default)]
    pub mongos_count: u32,

    #[serde(default)]
    pub connectivity: Option<Connectivity>,
    #[serde(default)]
    pub security: Option<Security>,
    /// Extra mongod configuration, merged into every process.
    #[serde(default)]
    pub additional_mongod_config: Option<serde_json::Value>,
    #[serde(default)]
    pub prometheus: Option<PrometheusSpec>,
    /// Override of the cluster domain used for process hostnames.
    #[serde(default)]
    pub cluster_domain: Option<String>,
}

/// The deployment kinds.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ResourceType {
    ReplicaSet,
    ShardedCluster,
    Standalone,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::ReplicaSet => "ReplicaSet",
                Self::ShardedCluster => "ShardedCluster",
                Self::Standalone => "Standalone",
            }
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberConfig {
    #[serde(default)]
    pub votes: Option<u32>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    /// One entry per replica set member, mapping horizon names to `host:port`.
    #[serde(default)]
    pub replica_set_horizons: Vec<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    #[serde(default)]
    pub tls: Option<TlsSpec>,
    #[serde(default)]
    pub authentication: Option<Authentication>,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Prefix of the secrets holding member and agent certificates.
    #[serde(default)]
    pub cert_secret_prefix: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Name of the configmap holding the CA bundle under `ca-pem`.
    #[serde(default)]
    pub ca: Option<String>,
}

/// Authentication settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub modes: Vec<AuthMode>,
    /// Internal cluster authentication mode. Only `X509` is supported.
    #[serde(default)]
    pub internal_cluster: Option<String>,
    #[serde(default)]
    pub agents: Option<AgentAuthentication>,
    #[serde(default)]
    pub ldap: Option<LdapSpec>,
    #[serde(default)]
    pub require_client_tls_authentication: bool,
    #[serde(default)]
    pub ignore_unknown_users: bool,
}

/// Authentication modes accepted in resource specs.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
pub enum AuthMode {
    #[serde(rename = "SCRAM")]
    Scram,
    #[serde(rename = "SCRAM-SHA-1")]
    ScramSha1,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "MONGODB-CR")]
    MongoDbCr,
    #[serde(rename = "X509")]
    X509,
    #[serde(rename = "LDAP")]
    Ldap,
}

impl AuthMode {
    pub fn is_scram(&self) -> bool {
        matches!(self, Self::Scram | Self::ScramSha1 | Self::ScramSha256 | Self::MongoDbCr)
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Scram => "SCRAM",
                Self::ScramSha1 => "SCRAM-SHA-1",
                Self::ScramSha256 => "SCRAM-SHA-256",
                Self::MongoDbCr => "MONGODB-CR",
                Self::X509 => "X509",
                Self::Ldap => "LDAP",
            }
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthentication {
    /// The mechanism used by the agents. Required when several modes are enabled.
    #[serde(default)]
    pub mode: Option<AuthMode>,
    /// Secret holding the agent client certificates when agents use x509.
    #[serde(default)]
    pub client_certificate_secret_ref: Option<String>,
    /// The LDAP user of the automation agent.
    #[serde(default)]
    pub automation_user_name: Option<String>,
    #[serde(default)]
    pub automation_password_secret_ref: Option<SecretKeyRef>,
    #[serde(default, rename = "automationLdapGroupDN")]
    pub automation_ldap_group_dn: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LdapSpec {
    pub servers: Vec<String>,
    /// `tls` or `none`.
    #[serde(default)]
    pub transport_security: Option<String>,
    #[serde(default, rename = "validateLDAPServerConfig")]
    pub validate_ldap_server_config: bool,
    pub bind_query_user: String,
    pub bind_query_password_secret_ref: SecretKeyRef,
    #[serde(default)]
    pub ca_config_map_ref: Option<ConfigMapKeyRef>,
    #[serde(default)]
    pub authz_query_template: Option<String>,
    #[serde(default)]
    pub user_to_dn_mapping: Option<String>,
    #[serde(default, rename = "timeoutMS")]
    pub timeout_ms: Option<u32>,
    #[serde(default)]
    pub user_cache_invalidation_interval: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct ConfigMapKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    pub username: String,
    pub password_secret_ref: SecretKeyRef,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub metrics_path: Option<String>,
    /// Serve metrics over TLS using this PEM path inside the container.
    #[serde(default)]
    pub tls_pem_path: Option<String>,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBStatus {
    #[serde(default)]
    pub phase: Phase,
    /// The member count declared for the current pass of a replica set.
    #[serde(default)]
    pub members: u32,
    #[serde(default)]
    pub shard_count: u32,
    #[serde(default)]
    pub mongods_per_shard_count: u32,
    #[serde(default)]
    pub config_server_count: u32,
    #[serde(default)]
    pub mongos_count: u32,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub last_applied_spec_hash: Option<String>,
    /// The resource type recorded by the first successful pass.
    #[serde(default)]
    pub last_applied_type: Option<ResourceType>,
    /// The additional mongod config applied by the last pass.
    #[serde(default)]
    pub last_applied_additional_mongod_config: Option<serde_json::Value>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

const SHARDED_ONLY_FIELDS_MSG: &str = "is only valid for ShardedCluster resources";

impl MongoDBSpec {
    pub fn tls(&self) -> Option<&TlsSpec> {
        self.security.as_ref().and_then(|s| s.tls.as_ref())
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls().map(|tls| tls.enabled).unwrap_or(false)
    }

    /// The CA configmap name, if a custom CA is configured.
    pub fn tls_ca(&self) -> Option<&str> {
        self.tls().and_then(|tls| tls.ca.as_deref()).filter(|ca| !ca.is_empty())
    }

    pub fn authentication(&self) -> Option<&Authentication> {
        self.security.as_ref().and_then(|s| s.authentication.as_ref())
    }

    pub fn is_auth_enabled(&self) -> bool {
        self.authentication().map(|a| a.enabled).unwrap_or(false)
    }

    pub fn auth_modes(&self) -> &[AuthMode] {
        self.authentication().map(|a| a.modes.as_slice()).unwrap_or(&[])
    }

    /// The mechanism the agents use: the explicit agent mode, or the single configured mode.
    pub fn agent_mode(&self) -> Option<AuthMode> {
        let auth = self.authentication()?;
        match auth.agents.as_ref().and_then(|a| a.mode) {
            Some(mode) => Some(mode),
            None if auth.modes.len() == 1 => auth.modes.first().copied(),
            None => None,
        }
    }

    pub fn is_internal_cluster_x509(&self) -> bool {
        self.authentication()
            .and_then(|a| a.internal_cluster.as_deref())
            .map(|mode| mode.eq_ignore_ascii_case("x509"))
            .unwrap_or(false)
    }

    pub fn horizons(&self) -> &[BTreeMap<String, String>] {
        self.connectivity.as_ref().map(|c| c.replica_set_horizons.as_slice()).unwrap_or(&[])
    }

    pub fn roles(&self) -> &[Role] {
        self.security.as_ref().map(|s| s.roles.as_slice()).unwrap_or(&[])
    }

    /// The major component of `version`.
    pub fn major_version(&self) -> Result<u64> {
        if let Ok(version) = semver::Version::parse(&self.version) {
            return Ok(version.major);
        }
        // Accept short forms such as `4.4`.
        match self.version.split('.').next().and_then(|major| major.parse().ok()) {
            Some(major) => Ok(major),
            None => bail!(AppError::Invalid(format!("invalid MongoDB version {:?}", self.version))),
        }
    }

    /// A stable digest of this spec, recorded once a pass applies it.
    pub fn spec_hash(&self) -> String {
        let raw = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&raw))
    }

    /// Validate this spec against itself and the last applied status.
    ///
    /// Returns non-fatal warnings. Structural errors are returned as `AppError::Invalid`.
    pub fn validate(&self, status: Option<&MongoDBStatus>) -> Result<Vec<String>> {
        let mut warnings = vec![];
        let invalid = |msg: String| -> Result<Vec<String>> { Err(AppError::Invalid(msg).into()) };

        if let Some(last) = status.and_then(|s| s.last_applied_type) {
            if last != self.resource_type {
                return invalid(format!("Changing type is not currently supported, resource was {} and is now {}", last, self.resource_type));
            }
        }
        self.major_version()?;

        match self.resource_type {
            ResourceType::ReplicaSet => {
                if self.members == 0 {
                    return invalid("spec.members must be at least 1 for a ReplicaSet".into());
                }
                for (field, value) in [
                    ("spec.shardCount", self.shard_count),
                    ("spec.mongodsPerShardCount", self.mongods_per_shard_count),
                    ("spec.configServerCount", self.config_server_count),
                    ("spec.mongosCount", self.mongos_count),
                ] {
                    if value != 0 {
                        return invalid(format!("{} {}", field, SHARDED_ONLY_FIELDS_MSG));
                    }
                }
            }
            ResourceType::ShardedCluster => {
                if self.shard_count == 0 || self.mongods_per_shard_count == 0 || self.config_server_count == 0 || self.mongos_count == 0 {
                    return invalid("shardCount, mongodsPerShardCount, configServerCount and mongosCount must all be at least 1".into());
                }
                if !self.horizons().is_empty() {
                    return invalid("replica set horizons are not supported for ShardedCluster resources".into());
                }
            }
            ResourceType::Standalone => {
                if self.members > 1 {
                    return invalid("spec.members is not valid for Standalone resources".into());
                }
            }
        }

        let horizons = self.horizons();
        if !horizons.is_empty() {
            if !self.is_tls_enabled() {
                return invalid("TLS must be enabled in order to use replica set horizons".into());
            }
            if horizons.len() != self.members as usize {
                return invalid("Number of horizons must be equal to number of members in replica set".into());
            }
        }
        if self.member_config.len() > self.members as usize && self.resource_type == ResourceType::ReplicaSet {
            warnings.push("spec.memberConfig has more entries than spec.members, extra entries are ignored".into());
        }

        if let Some(auth) = self.authentication() {
            let modes = &auth.modes;
            if auth.enabled && modes.is_empty() {
                return invalid("at least one mode must be set in spec.security.authentication.modes when authentication is enabled".into());
            }
            if modes.contains(&AuthMode::X509) && auth.enabled && !self.is_tls_enabled() {
                return invalid("Cannot have a non-tls deployment when x509 authentication is enabled".into());
            }
            let agent_mode = auth.agents.as_ref().and_then(|a| a.mode);
            if modes.len() > 1 && agent_mode.is_none() {
                return invalid(
                    "spec.security.authentication.agents.mode must be specified if more than one entry is present in spec.security.authentication.modes"
                        .into(),
                );
            }
            if let Some(agent_mode) = agent_mode {
                if !modes.contains(&agent_mode) {
                    return invalid(format!("Cannot configure an Agent authentication mechanism that is not specified in authentication modes: {}", agent_mode));
                }
            }
            if modes.contains(&AuthMode::Ldap) && auth.ldap.is_none() {
                return invalid("spec.security.authentication.ldap must be set when LDAP authentication is enabled".into());
            }
            if self.is_internal_cluster_x509() && !modes.contains(&AuthMode::X509) {
                return invalid("Cannot enable x509 internal cluster authentication if x509 authentication is not enabled".into());
            }
        }
        Ok(warnings)
    }
}
