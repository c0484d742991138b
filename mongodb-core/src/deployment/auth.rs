use rand::RngCore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The default user of the automation agent.
pub const AUTOMATION_AGENT_NAME: &str = "mms-automation";
/// The database holding users authenticated by an external source (x509, LDAP).
pub const EXTERNAL_DB: &str = "$external";
/// The location of the keyfile on Linux hosts.
pub const KEYFILE_PATH: &str = "/var/lib/mongodb-mms-automation/authentication/keyfile";
/// The location of the keyfile on Windows hosts.
pub const KEYFILE_PATH_WINDOWS: &str = "%SystemDrive%\\MMSAutomation\\versions\\keyfile";

/// The authentication section of the automation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    #[serde(default = "Auth::default_disabled")]
    pub disabled: bool,
    #[serde(default)]
    pub authoritative_set: bool,
    /// Mechanisms client drivers may use.
    #[serde(default)]
    pub deployment_auth_mechanisms: Vec<String>,
    /// The mechanism used by the agents themselves. Holds at most one element.
    #[serde(default)]
    pub auto_auth_mechanisms: Vec<String>,
    /// Legacy single-valued form of `auto_auth_mechanisms`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auto_auth_mechanism: String,
    #[serde(default)]
    pub auto_user: String,
    #[serde(default)]
    pub auto_pwd: String,
    #[serde(default, rename = "autoLdapGroupDN", skip_serializing_if = "Option::is_none")]
    pub auto_ldap_group_dn: Option<String>,
    #[serde(default)]
    pub key: String,
    #[serde(default, rename = "keyfile")]
    pub key_file: String,
    #[serde(default, rename = "keyfileWindows")]
    pub key_file_windows: String,
    #[serde(default)]
    pub users_wanted: Vec<MongoDbUser>,
    #[serde(default)]
    pub users_deleted: Vec<DeletedUser>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            disabled: true,
            authoritative_set: false,
            deployment_auth_mechanisms: vec![],
            auto_auth_mechanisms: vec![],
            auto_auth_mechanism: "MONGODB-CR".into(),
            auto_user: String::new(),
            auto_pwd: String::new(),
            auto_ldap_group_dn: None,
            key: String::new(),
            key_file: String::new(),
            key_file_windows: String::new(),
            users_wanted: vec![],
            users_deleted: vec![],
            other: Map::new(),
        }
    }
}

impl Auth {
    fn default_disabled() -> bool {
        true
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Enable authentication, generating the agent credentials and keyfile if absent.
    ///
    /// An existing non-default agent user is kept.
    pub fn enable(&mut self) {
        self.disabled = false;
        if self.auto_user.is_empty() {
            self.auto_user = AUTOMATION_AGENT_NAME.into();
        }
        if self.auto_pwd.is_empty() {
            self.auto_pwd = random_secret(24);
        }
        if self.key.is_empty() {
            self.key = random_secret(384);
        }
        self.key_file = KEYFILE_PATH.into();
        self.key_file_windows = KEYFILE_PATH_WINDOWS.into();
    }

    /// Disable authentication entirely. Keys and the agent password are retained.
    ///
    /// Users stay in the document unless `delete_users` is set.
    pub fn disable(&mut self, delete_users: bool) {
        self.disabled = true;
        self.deployment_auth_mechanisms.clear();
        self.auto_auth_mechanisms.clear();
        self.auto_auth_mechanism = String::new();
        self.auto_user = AUTOMATION_AGENT_NAME.into();
        self.auto_ldap_group_dn = None;
        if !delete_users {
            return;
        }
        for user in self.users_wanted.drain(..) {
            push_deleted(&mut self.users_deleted, &user.username, &user.database);
        }
    }

    pub fn has_deployment_mechanism(&self, mechanism: &str) -> bool {
        self.deployment_auth_mechanisms.iter().any(|m| m == mechanism)
    }

    pub fn add_deployment_mechanism(&mut self, mechanism: &str) {
        if !self.has_deployment_mechanism(mechanism) {
            self.deployment_auth_mechanisms.push(mechanism.into());
        }
    }

    pub fn remove_deployment_mechanism(&mut self, mechanism: &str) {
        self.deployment_auth_mechanisms.retain(|m| m != mechanism);
    }

    /// The mechanism currently used by the agents, if any.
    pub fn agent_mechanism(&self) -> Option<&str> {
        self.auto_auth_mechanisms.first().map(String::as_str)
    }

    /// Set the single mechanism used by the agents.
    pub fn set_agent_mechanism(&mut self, mechanism: &str) {
        self.auto_auth_mechanisms = vec![mechanism.into()];
        self.auto_auth_mechanism = mechanism.into();
    }

    pub fn clear_agent_mechanism(&mut self, mechanism: &str) {
        self.auto_auth_mechanisms.retain(|m| m != mechanism);
        if self.auto_auth_mechanism == mechanism {
            self.auto_auth_mechanism = String::new();
        }
    }

    pub fn user(&self, username: &str, database: &str) -> Option<&MongoDbUser> {
        self.users_wanted.iter().find(|u| u.username == username && u.database == database)
    }

    /// Insert or replace a user. Returns true when the document changed.
    pub fn upsert_user(&mut self, user: MongoDbUser) -> bool {
        // A re-created user must not be scheduled for deletion anymore.
        for deleted in self.users_deleted.iter_mut().filter(|d| d.user == user.username) {
            deleted.dbs.retain(|db| db != &user.database);
        }
        self.users_deleted.retain(|d| !d.dbs.is_empty());
        match self.users_wanted.iter_mut().find(|u| u.username == user.username && u.database == user.database) {
            Some(existing) if *existing == user => false,
            Some(existing) => {
                *existing = user;
                true
            }
            None => {
                self.users_wanted.push(user);
                true
            }
        }
    }

    /// Remove a user, recording it in `usersDeleted`. Returns true when the user existed.
    pub fn remove_user(&mut self, username: &str, database: &str) -> bool {
        let before = self.users_wanted.len();
        self.users_wanted.retain(|u| !(u.username == username && u.database == database));
        let removed = self.users_wanted.len() != before;
        if removed {
            push_deleted(&mut self.users_deleted, username, database);
        }
        removed
    }
}

fn push_deleted(deleted: &mut Vec<DeletedUser>, username: &str, database: &str) {
    match deleted.iter_mut().find(|d| d.user == username) {
        Some(entry) if entry.dbs.iter().any(|db| db == database) => (),
        Some(entry) => entry.dbs.push(database.into()),
        None => deleted.push(DeletedUser {
            user: username.into(),
            dbs: vec![database.into()],
        }),
    }
}

/// Generate a random base64 secret from `len` random bytes.
pub(crate) fn random_secret(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::encode(&buf)
}

/// A database user managed through the automation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoDbUser {
    #[serde(rename = "user")]
    pub username: String,
    #[serde(rename = "db")]
    pub database: String,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub authentication_restrictions: Vec<AuthenticationRestriction>,
    #[serde(default)]
    pub mechanisms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram_sha1_creds: Option<ScramCreds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram_sha256_creds: Option<ScramCreds>,
}

/// Salted SCRAM credentials for one hash function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScramCreds {
    pub iteration_count: u32,
    pub salt: String,
    pub server_key: String,
    pub stored_key: String,
}

/// A user scheduled for removal from the listed databases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedUser {
    pub user: String,
    pub dbs: Vec<String>,
}

/// A reference to a role in a given database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RoleRef {
    pub role: String,
    pub db: String,
}

/// A custom role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub role: String,
    pub db: String,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub authentication_restrictions: Vec<AuthenticationRestriction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Privilege {
    pub resource: PrivilegeResource,
    pub actions: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PrivilegeResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRestriction {
    #[serde(default)]
    pub client_source: Vec<String>,
    #[serde(default)]
    pub server_address: Vec<String>,
}

/// The LDAP section of the automation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ldap {
    /// Comma separated list of `host:port` servers.
    pub servers: String,
    pub transport_security: String,
    #[serde(rename = "validateLDAPServerConfig")]
    pub validate_ldap_server_config: bool,
    pub bind_method: String,
    pub bind_query_user: String,
    pub bind_query_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_sasl_mechanisms: Option<String>,
    #[serde(default, rename = "CAFileContents", skip_serializing_if = "Option::is_none")]
    pub ca_file_contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authz_query_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_to_dn_mapping: Option<String>,
    #[serde(rename = "timeoutMS")]
    pub timeout_ms: u32,
    pub user_cache_invalidation_interval: u32,
}
