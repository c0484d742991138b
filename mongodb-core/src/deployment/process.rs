use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::options::OptionsOverlay;

/// The default port used by all managed processes.
pub const DEFAULT_PORT: u16 = 27017;
/// The path at which agents find the process certificate.
pub const PEM_KEY_FILE_PATH: &str = "/mongodb-automation/server.pem";
/// The path at which agents find the internal cluster authentication certificate.
pub const CLUSTER_FILE_PATH: &str = "/mongodb-automation/cluster-auth/cluster.pem";
/// The data directory of managed mongod processes.
pub const DATA_PATH: &str = "/data";
/// The log file of managed processes.
pub const LOG_PATH: &str = "/var/log/mongodb-mms-automation/mongodb.log";

const ARG_REPL_SET_NAME: &str = "replication.replSetName";
const ARG_TLS_MODE: &str = "net.tls.mode";
const ARG_TLS_CERT_FILE: &str = "net.tls.certificateKeyFile";
const ARG_TLS_CA_FILE: &str = "net.tls.CAFile";
const ARG_TLS_CLUSTER_FILE: &str = "net.tls.clusterFile";
const ARG_CLUSTER_AUTH_MODE: &str = "security.clusterAuthMode";
const ARG_CLUSTER_ROLE: &str = "sharding.clusterRole";

/// The kind of a managed process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Mongod,
    Mongos,
}

/// The TLS mode of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "allowTLS")]
    Allow,
    #[serde(rename = "preferTLS")]
    Prefer,
    #[serde(rename = "requireTLS")]
    Require,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Allow => "allowTLS",
            Self::Prefer => "preferTLS",
            Self::Require => "requireTLS",
        }
    }

    fn parse(val: &str) -> Self {
        match val {
            "allowTLS" | "allowSSL" => Self::Allow,
            "preferTLS" | "preferSSL" => Self::Prefer,
            "requireTLS" | "requireSSL" => Self::Require,
            _ => Self::Disabled,
        }
    }
}

/// TLS settings applied to processes owned by a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessTls {
    pub mode: TlsMode,
    pub certificate_key_file: String,
    /// A custom CA bundle processes use to verify peers.
    pub ca_file: Option<String>,
}

impl ProcessTls {
    pub fn disabled() -> Self {
        Self {
            mode: TlsMode::Disabled,
            certificate_key_file: String::new(),
            ca_file: None,
        }
    }

    pub fn required() -> Self {
        Self {
            mode: TlsMode::Require,
            certificate_key_file: PEM_KEY_FILE_PATH.into(),
            ca_file: None,
        }
    }

    pub fn with_ca_file(mut self, path: &str) -> Self {
        self.ca_file = Some(path.into());
        self
    }
}

/// A single mongod/mongos instance described by the automation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    pub hostname: String,
    pub process_type: ProcessType,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_compatibility_version: Option<String>,
    #[serde(default = "Process::default_auth_schema_version")]
    pub auth_schema_version: u32,
    #[serde(default)]
    pub disabled: bool,
    /// The sharded cluster a mongos belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(rename = "args2_6", default)]
    pub args: OptionsOverlay,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Process {
    fn default_auth_schema_version() -> u32 {
        5
    }

    /// A mongod process, optionally a member of the given replica set.
    pub fn new_mongod(name: &str, hostname: &str, version: &str, replica_set: Option<&str>) -> Self {
        let mut args = OptionsOverlay::new();
        args.set("net.port", DEFAULT_PORT);
        args.set("storage.dbPath", DATA_PATH);
        args.set("systemLog.destination", "file");
        args.set("systemLog.path", LOG_PATH);
        if let Some(rs) = replica_set {
            args.set(ARG_REPL_SET_NAME, rs);
        }
        Self::new(name, hostname, ProcessType::Mongod, version, args, None)
    }

    /// A mongos process routing for the given sharded cluster.
    pub fn new_mongos(name: &str, hostname: &str, version: &str, cluster: &str) -> Self {
        let mut args = OptionsOverlay::new();
        args.set("net.port", DEFAULT_PORT);
        args.set("systemLog.destination", "file");
        args.set("systemLog.path", LOG_PATH);
        Self::new(name, hostname, ProcessType::Mongos, version, args, Some(cluster.to_string()))
    }

    fn new(name: &str, hostname: &str, process_type: ProcessType, version: &str, args: OptionsOverlay, cluster: Option<String>) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            process_type,
            version: version.into(),
            feature_compatibility_version: None,
            auth_schema_version: Self::default_auth_schema_version(),
            disabled: false,
            cluster,
            args,
            other: Map::new(),
        }
    }

    pub fn replica_set_name(&self) -> Option<&str> {
        self.args.get_str(ARG_REPL_SET_NAME)
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.args.get_str(ARG_TLS_MODE).map(TlsMode::parse).unwrap_or(TlsMode::Disabled)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls_mode() != TlsMode::Disabled
    }

    pub fn configure_tls(&mut self, tls: &ProcessTls) {
        self.args.set(ARG_TLS_MODE, tls.mode.as_str());
        if tls.mode == TlsMode::Disabled || tls.certificate_key_file.is_empty() {
            self.args.remove(ARG_TLS_CERT_FILE);
        } else {
            self.args.set(ARG_TLS_CERT_FILE, tls.certificate_key_file.as_str());
        }
        match tls.ca_file.as_deref() {
            Some(ca_file) if tls.mode != TlsMode::Disabled => self.args.set(ARG_TLS_CA_FILE, ca_file),
            _ => self.args.remove(ARG_TLS_CA_FILE),
        }
    }

    pub fn cluster_auth_mode(&self) -> Option<&str> {
        self.args.get_str(ARG_CLUSTER_AUTH_MODE)
    }

    /// Set or clear the internal cluster authentication mode.
    ///
    /// `x509` additionally points the process at the cluster certificate file.
    pub fn set_cluster_auth_mode(&mut self, mode: Option<&str>) {
        match mode {
            Some(mode) => {
                self.args.set(ARG_CLUSTER_AUTH_MODE, mode);
                if mode == "x509" {
                    self.args.set(ARG_TLS_CLUSTER_FILE, CLUSTER_FILE_PATH);
                } else {
                    self.args.remove(ARG_TLS_CLUSTER_FILE);
                }
            }
            None => {
                self.args.remove(ARG_CLUSTER_AUTH_MODE);
                self.args.remove(ARG_TLS_CLUSTER_FILE);
            }
        }
    }

    pub fn set_cluster_role(&mut self, role: &str) {
        self.args.set(ARG_CLUSTER_ROLE, role);
    }

    /// Overwrite the fields managed by the operator with those of `desired`.
    ///
    /// Argument keys set by a previous version of the resource's additional options and no longer
    /// present in `desired` are dropped. Keys set by other actors are preserved.
    pub fn merge_from(&mut self, desired: &Process, previous_additional: &OptionsOverlay) {
        self.hostname = desired.hostname.clone();
        self.process_type = desired.process_type;
        self.version = desired.version.clone();
        self.cluster = desired.cluster.clone();
        self.disabled = desired.disabled;
        if desired.feature_compatibility_version.is_some() {
            self.feature_compatibility_version = desired.feature_compatibility_version.clone();
        }
        let mut args = self.args.with_additional_options(previous_additional, &desired.args);
        // Security args are fully owned by the resource.
        for managed in [ARG_TLS_CERT_FILE, ARG_TLS_CA_FILE, ARG_TLS_CLUSTER_FILE, ARG_CLUSTER_AUTH_MODE] {
            if desired.args.get(managed).is_none() {
                args.remove(managed);
            }
        }
        self.args = args;
    }
}
