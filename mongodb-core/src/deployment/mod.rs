//! The shared deployment document.
//!
//! A single automation config is shared by every resource of a management-plane project. Each
//! resource only ever adds or removes the processes, replica sets and sharded clusters it owns;
//! everything else in the document, including keys this crate does not model, is carried through
//! read-modify-write cycles untouched.

mod agents;
mod auth;
mod ids;
#[cfg(test)]
mod ids_test;
mod merge;
#[cfg(test)]
mod mod_test;
mod options;
mod process;
mod replica_set;
mod sharded;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use agents::{
    AgentConfig, AgentVersion, DeploymentTls, Prometheus, AUTOMATION_AGENT_PEM_PATH, BACKUP_AGENT_PEM_PATH, CA_FILE_PATH,
    MONITORING_AGENT_PEM_PATH,
};
pub use auth::{
    Auth, AuthenticationRestriction, DeletedUser, Ldap, MongoDbUser, Privilege, PrivilegeResource, Role, RoleRef, ScramCreds,
    AUTOMATION_AGENT_NAME, EXTERNAL_DB,
};
pub(crate) use auth::random_secret;
pub use ids::allocate_ids;
pub use merge::{DesiredReplicaSet, DesiredShardedCluster, MemberSettings};
pub use options::{KeyPath, OptionsOverlay};
pub use process::{Process, ProcessTls, ProcessType, TlsMode, DEFAULT_PORT, PEM_KEY_FILE_PATH};
pub use replica_set::{Horizons, ReplicaSet, ReplicaSetMember};
pub use sharded::{Shard, ShardedCluster};

/// The deployment document: processes, topology and security settings of a project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSet>,
    #[serde(default)]
    pub sharding: Vec<ShardedCluster>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub ldap: Option<Ldap>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub monitoring_agent_config: AgentConfig,
    #[serde(default)]
    pub backup_agent_config: AgentConfig,
    #[serde(default)]
    pub monitoring_versions: Vec<AgentVersion>,
    #[serde(default)]
    pub backup_versions: Vec<AgentVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<DeploymentTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<Prometheus>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            processes: vec![],
            replica_sets: vec![],
            sharding: vec![],
            auth: Auth::default(),
            ldap: None,
            roles: vec![],
            monitoring_agent_config: AgentConfig::default(),
            backup_agent_config: AgentConfig::default(),
            monitoring_versions: vec![],
            backup_versions: vec![],
            tls: None,
            prometheus: None,
            other: Map::new(),
        }
    }
}

impl Deployment {
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name == name)
    }

    pub fn process_mut(&mut self, name: &str) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.name == name)
    }

    pub fn replica_set(&self, name: &str) -> Option<&ReplicaSet> {
        self.replica_sets.iter().find(|rs| rs.id == name)
    }

    pub fn replica_set_mut(&mut self, name: &str) -> Option<&mut ReplicaSet> {
        self.replica_sets.iter_mut().find(|rs| rs.id == name)
    }

    pub fn sharded_cluster(&self, name: &str) -> Option<&ShardedCluster> {
        self.sharding.iter().find(|sc| sc.name == name)
    }

    /// The processes backing the given replica set, in member order.
    pub fn replica_set_processes(&self, name: &str) -> Vec<&Process> {
        match self.replica_set(name) {
            Some(rs) => rs.members.iter().filter_map(|m| self.process(&m.host)).collect(),
            None => vec![],
        }
    }

    /// Check whether every process is TLS enabled. Trivially true for an empty document.
    pub fn all_processes_tls_enabled(&self) -> bool {
        self.processes.iter().all(Process::is_tls_enabled)
    }

    /// The hostnames of the named processes, skipping unknown names.
    pub fn hostnames(&self, process_names: &[String]) -> Vec<String> {
        process_names.iter().filter_map(|n| self.process(n)).map(|p| p.hostname.clone()).collect()
    }

    /// Remove the named processes along with their monitoring and backup assignments.
    pub fn remove_processes(&mut self, names: &BTreeSet<String>) {
        let hostnames: BTreeSet<String> = self
            .processes
            .iter()
            .filter(|p| names.contains(&p.name))
            .map(|p| p.hostname.clone())
            .collect();
        self.processes.retain(|p| !names.contains(&p.name));
        self.remove_monitoring_and_backup(&hostnames);
    }

    /// Remove a replica set and all of its processes.
    pub fn remove_replica_set(&mut self, name: &str) -> bool {
        let members: BTreeSet<String> = match self.replica_set(name) {
            Some(rs) => rs.member_names().into_iter().collect(),
            None => return false,
        };
        self.replica_sets.retain(|rs| rs.id != name);
        let mut owned: BTreeSet<String> = self
            .processes
            .iter()
            .filter(|p| p.replica_set_name() == Some(name))
            .map(|p| p.name.clone())
            .collect();
        owned.extend(members);
        self.remove_processes(&owned);
        true
    }

    /// Remove a sharded cluster with its shards, config servers and mongos processes.
    pub fn remove_sharded_cluster(&mut self, name: &str) -> bool {
        let cluster = match self.sharded_cluster(name) {
            Some(cluster) => cluster.clone(),
            None => return false,
        };
        for rs in cluster.replica_set_names() {
            self.remove_replica_set(&rs);
        }
        let mongos: BTreeSet<String> = self
            .processes
            .iter()
            .filter(|p| p.cluster.as_deref() == Some(name))
            .map(|p| p.name.clone())
            .collect();
        self.remove_processes(&mongos);
        self.sharding.retain(|sc| sc.name != name);
        true
    }

    /// Zero votes and priority of the named members of a replica set.
    pub fn mark_rs_members_unvoted(&mut self, rs_name: &str, process_names: &BTreeSet<String>) -> bool {
        match self.replica_set_mut(rs_name) {
            Some(rs) => rs.mark_unvoted(process_names),
            None => false,
        }
    }

    /// Mark the named processes as disabled.
    pub fn disable_processes(&mut self, process_names: &BTreeSet<String>) -> bool {
        let mut changed = false;
        for process in self.processes.iter_mut().filter(|p| process_names.contains(&p.name)) {
            if !process.disabled {
                process.disabled = true;
                changed = true;
            }
        }
        changed
    }

    /// Ensure monitoring and backup assignments exist for the given hosts.
    ///
    /// Returns true when the document changed.
    pub fn add_monitoring_and_backup(&mut self, hostnames: &[String], tls: bool) -> bool {
        let mut changed = false;
        for versions in [&mut self.monitoring_versions, &mut self.backup_versions] {
            for hostname in hostnames {
                match versions.iter_mut().find(|v| &v.hostname == hostname) {
                    Some(version) => changed |= version.set_tls(tls),
                    None => {
                        versions.push(AgentVersion::new(hostname, tls));
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    pub fn remove_monitoring_and_backup(&mut self, hostnames: &BTreeSet<String>) {
        self.monitoring_versions.retain(|v| !hostnames.contains(&v.hostname));
        self.backup_versions.retain(|v| !hostnames.contains(&v.hostname));
    }

    /// Set or clear the client certificate settings used by agents authenticating with x509.
    pub fn configure_agent_tls(&mut self, client_certificate_mode: Option<&str>, pem_key_file: Option<&str>) {
        self.update_tls(|tls| {
            tls.client_certificate_mode = client_certificate_mode.map(String::from);
            tls.auto_pem_key_file_path = pem_key_file.map(String::from);
        });
    }

    fn update_tls(&mut self, f: impl FnOnce(&mut DeploymentTls)) {
        let mut tls = self.tls.take().unwrap_or_default();
        f(&mut tls);
        self.tls = if tls.is_empty() { None } else { Some(tls) };
    }

    /// Replace the custom roles. Returns true when the document changed.
    pub fn ensure_roles(&mut self, roles: &[Role]) -> bool {
        if self.roles.as_slice() == roles {
            return false;
        }
        self.roles = roles.to_vec();
        true
    }
}

/// The superset document: the deployment plus the write version maintained by the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub version: i64,
    #[serde(flatten)]
    pub deployment: Deployment,
}

/// Goal state progress reported by the agents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    pub goal_version: i64,
    #[serde(default)]
    pub processes: Vec<ProcessStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub name: String,
    pub last_goal_version_achieved: i64,
    #[serde(default)]
    pub plan: Vec<String>,
}

impl AutomationStatus {
    /// Names among `process_names` whose agents lag behind the goal version.
    ///
    /// Processes without a status entry have not been picked up by an agent yet and are not
    /// considered lagging.
    pub fn lagging_processes(&self, process_names: &[String]) -> Vec<String> {
        self.processes
            .iter()
            .filter(|p| process_names.contains(&p.name))
            .filter(|p| p.last_goal_version_achieved < self.goal_version)
            .map(|p| p.name.clone())
            .collect()
    }
}
