use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where the monitoring agent finds its client certificate.
pub const MONITORING_AGENT_PEM_PATH: &str = "/mongodb-automation/agent-certs/mms-monitoring-agent-pem";
/// Where the backup agent finds its client certificate.
pub const BACKUP_AGENT_PEM_PATH: &str = "/mongodb-automation/agent-certs/mms-backup-agent-pem";
/// Where the automation agent finds its client certificate.
pub const AUTOMATION_AGENT_PEM_PATH: &str = "/mongodb-automation/agent-certs/mms-automation-agent-pem";
/// The CA bundle path used by processes and agents.
pub const CA_FILE_PATH: &str = "/mongodb-automation/tls/ca/ca-pem";

/// Monitoring or backup agent sub-config.
///
/// Unknown keys written by the management plane are carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, rename = "sslPEMKeyFile", skip_serializing_if = "Option::is_none")]
    pub ssl_pem_key_file: Option<String>,
    #[serde(default, rename = "ldapGroupDN", skip_serializing_if = "Option::is_none")]
    pub ldap_group_dn: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl AgentConfig {
    pub fn enable_x509(&mut self, subject: &str, pem_path: &str) {
        self.username = Some(subject.into());
        self.ssl_pem_key_file = Some(pem_path.into());
    }

    pub fn disable_x509(&mut self) {
        self.username = None;
        self.ssl_pem_key_file = None;
    }

    pub fn enable_ldap(&mut self, username: &str, password: &str) {
        self.username = Some(username.into());
        self.password = Some(password.into());
    }

    pub fn disable_ldap(&mut self) {
        self.username = None;
        self.password = None;
        self.ldap_group_dn = None;
    }
}

/// A monitoring or backup agent assignment to a host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentVersion {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_params: Map<String, Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl AgentVersion {
    pub fn new(hostname: &str, tls: bool) -> Self {
        let mut version = Self {
            hostname: hostname.into(),
            name: None,
            additional_params: Map::new(),
            other: Map::new(),
        };
        version.set_tls(tls);
        version
    }

    /// Point the agent at TLS connections. Returns true when anything changed.
    pub fn set_tls(&mut self, tls: bool) -> bool {
        let before = self.additional_params.clone();
        if tls {
            self.additional_params.insert("useSslForAllConnections".into(), Value::String("true".into()));
            self.additional_params.insert("sslTrustedServerCertificates".into(), Value::String(CA_FILE_PATH.into()));
        } else {
            self.additional_params.remove("useSslForAllConnections");
            self.additional_params.remove("sslTrustedServerCertificates");
        }
        before != self.additional_params
    }
}

/// Deployment wide TLS settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTls {
    #[serde(default, rename = "CAFilePath", skip_serializing_if = "Option::is_none")]
    pub ca_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_mode: Option<String>,
    /// The automation agent's client certificate, set while agents authenticate with x509.
    #[serde(default, rename = "autoPEMKeyFilePath", skip_serializing_if = "Option::is_none")]
    pub auto_pem_key_file_path: Option<String>,
}

impl DeploymentTls {
    pub(crate) fn is_empty(&self) -> bool {
        self.ca_file_path.is_none() && self.client_certificate_mode.is_none() && self.auto_pem_key_file_path.is_none()
    }
}

/// Prometheus endpoint exposed by the agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prometheus {
    pub enabled: bool,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_pem_path: Option<String>,
    pub metrics_path: String,
    pub listen_address: String,
}
