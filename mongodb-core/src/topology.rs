//! Naming of the processes backing a resource, and the desired topology derived from its spec.
//!
//! Every resource runs on one workload per replica set, named after the replica set, with pods
//! `<set>-<ordinal>` behind a headless service. Process names equal pod names.

use std::collections::BTreeSet;

use crate::crd::{MongoDB, MongoDBSpec, RequiredMetadata};
use crate::deployment::{
    DesiredReplicaSet, DesiredShardedCluster, Deployment, MemberSettings, OptionsOverlay, Process, ProcessTls, ProcessType, CA_FILE_PATH,
};
use crate::store::Workload;

/// Component counts of a sharded cluster for one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardedCounts {
    pub shard_count: u32,
    pub mongods_per_shard: u32,
    pub config_servers: u32,
    pub mongos: u32,
}

impl ShardedCounts {
    pub fn from_spec(spec: &MongoDBSpec) -> Self {
        Self {
            shard_count: spec.shard_count,
            mongods_per_shard: spec.mongods_per_shard_count,
            config_servers: spec.config_server_count,
            mongos: spec.mongos_count,
        }
    }
}

pub fn service_name(name: &str) -> String {
    format!("{}-svc", name)
}

pub fn shard_name(name: &str, idx: u32) -> String {
    format!("{}-{}", name, idx)
}

pub fn shard_service_name(name: &str) -> String {
    format!("{}-sh", name)
}

pub fn config_server_name(name: &str) -> String {
    format!("{}-config", name)
}

pub fn config_server_service_name(name: &str) -> String {
    format!("{}-cs", name)
}

pub fn mongos_name(name: &str) -> String {
    format!("{}-mongos", name)
}

/// Pod names of a workload, in ordinal order.
pub fn pod_names(set_name: &str, count: u32) -> Vec<String> {
    (0..count).map(|idx| format!("{}-{}", set_name, idx)).collect()
}

/// The stable DNS name of a pod behind a headless service.
pub fn hostname(pod: &str, service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{}.{}.{}.svc.{}", pod, service, namespace, cluster_domain)
}

/// Settings shared by every process of a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessTemplate {
    pub version: String,
    pub feature_compatibility_version: Option<String>,
    pub tls: ProcessTls,
    pub cluster_auth_mode: Option<String>,
    /// User supplied mongod options.
    pub additional: OptionsOverlay,
}

impl ProcessTemplate {
    pub fn from_spec(spec: &MongoDBSpec) -> Self {
        Self {
            version: spec.version.clone(),
            feature_compatibility_version: spec.feature_compatibility_version.clone(),
            tls: match (spec.is_tls_enabled(), spec.tls_ca()) {
                (true, Some(_)) => ProcessTls::required().with_ca_file(CA_FILE_PATH),
                (true, None) => ProcessTls::required(),
                (false, _) => ProcessTls::disabled(),
            },
            cluster_auth_mode: if spec.is_internal_cluster_x509() { Some("x509".into()) } else { None },
            additional: spec.additional_mongod_config.as_ref().map(OptionsOverlay::flatten).unwrap_or_default(),
        }
    }

    fn mongod(&self, pod: &str, hostname: &str, replica_set: Option<&str>) -> Process {
        let mut process = Process::new_mongod(pod, hostname, &self.version, replica_set);
        self.apply_security(&mut process);
        process.args = OptionsOverlay::merge(&process.args, &self.additional);
        process
    }

    fn mongos(&self, pod: &str, hostname: &str, cluster: &str) -> Process {
        let mut process = Process::new_mongos(pod, hostname, &self.version, cluster);
        self.apply_security(&mut process);
        process
    }

    fn apply_security(&self, process: &mut Process) {
        process.feature_compatibility_version = self.feature_compatibility_version.clone();
        process.configure_tls(&self.tls);
        process.set_cluster_auth_mode(self.cluster_auth_mode.as_deref());
    }
}

/// Build the desired replica set of a `ReplicaSet` resource with `members` members.
pub fn desired_replica_set(mdb: &MongoDB, members: u32, cluster_domain: &str) -> DesiredReplicaSet {
    let template = ProcessTemplate::from_spec(&mdb.spec);
    let name = mdb.name();
    let service = service_name(name);
    let mut desired = replica_set_of(&template, name, &service, mdb.namespace(), members, cluster_domain);
    desired.member_settings = mdb.spec.member_config.iter().take(members as usize).map(member_settings).collect();
    desired.horizons = mdb.spec.horizons().to_vec();
    desired
}

/// Build the desired sharded cluster of a `ShardedCluster` resource.
pub fn desired_sharded_cluster(mdb: &MongoDB, counts: &ShardedCounts, cluster_domain: &str) -> DesiredShardedCluster {
    let template = ProcessTemplate::from_spec(&mdb.spec);
    let name = mdb.name();
    let namespace = mdb.namespace();

    let shard_service = shard_service_name(name);
    let shards = (0..counts.shard_count)
        .map(|idx| {
            let mut shard = replica_set_of(&template, &shard_name(name, idx), &shard_service, namespace, counts.mongods_per_shard, cluster_domain);
            shard.processes.iter_mut().for_each(|p| p.set_cluster_role("shardsvr"));
            shard
        })
        .collect();

    let config_name = config_server_name(name);
    let mut config_server = replica_set_of(&template, &config_name, &config_server_service_name(name), namespace, counts.config_servers, cluster_domain);
    config_server.processes.iter_mut().for_each(|p| p.set_cluster_role("configsvr"));

    let service = service_name(name);
    let mongos = pod_names(&mongos_name(name), counts.mongos)
        .iter()
        .map(|pod| template.mongos(pod, &hostname(pod, &service, namespace, cluster_domain), name))
        .collect();

    DesiredShardedCluster {
        name: name.to_string(),
        shards,
        config_server,
        mongos,
    }
}

/// Build the single process of a `Standalone` resource.
pub fn desired_standalone(mdb: &MongoDB, cluster_domain: &str) -> Process {
    let template = ProcessTemplate::from_spec(&mdb.spec);
    let name = mdb.name();
    let pod = format!("{}-0", name);
    let host = hostname(&pod, &service_name(name), mdb.namespace(), cluster_domain);
    template.mongod(name, &host, None)
}

fn replica_set_of(template: &ProcessTemplate, name: &str, service: &str, namespace: &str, members: u32, cluster_domain: &str) -> DesiredReplicaSet {
    let processes = pod_names(name, members)
        .iter()
        .map(|pod| template.mongod(pod, &hostname(pod, service, namespace, cluster_domain), Some(name)))
        .collect();
    DesiredReplicaSet {
        name: name.to_string(),
        processes,
        member_settings: vec![],
        horizons: vec![],
    }
}

fn member_settings(config: &crate::crd::MemberConfig) -> MemberSettings {
    let defaults = MemberSettings::default();
    MemberSettings {
        votes: config.votes.unwrap_or(defaults.votes),
        priority: config.priority.as_deref().and_then(|p| p.parse().ok()).unwrap_or(defaults.priority),
        tags: config.tags.clone(),
    }
}

/// The workloads of a sharded cluster with the given counts.
pub fn sharded_workloads(name: &str, counts: &ShardedCounts, certificate_hash: Option<&str>) -> Vec<Workload> {
    let workload = |name: String, replicas: u32| Workload {
        name,
        replicas,
        certificate_hash: certificate_hash.map(String::from),
    };
    let mut workloads: Vec<Workload> = (0..counts.shard_count).map(|idx| workload(shard_name(name, idx), counts.mongods_per_shard)).collect();
    workloads.push(workload(config_server_name(name), counts.config_servers));
    workloads.push(workload(mongos_name(name), counts.mongos));
    workloads
}

/// Processes which follow the naming scheme of `resource` but are not part of its desired state.
///
/// These usually belong to an earlier resource of the same name and are reported, never removed.
pub fn excess_processes(deployment: &Deployment, resource: &str, sharded: bool, desired: &BTreeSet<String>) -> Vec<String> {
    deployment
        .processes
        .iter()
        .filter(|p| !desired.contains(&p.name))
        .filter(|p| follows_naming_scheme(p, resource, sharded))
        .map(|p| p.name.clone())
        .collect()
}

/// The name must fit a member slot of `resource` and the process must be of the kind the slot
/// holds. A standalone called `a-5` is its own resource and never a member of `a`.
fn follows_naming_scheme(process: &Process, resource: &str, sharded: bool) -> bool {
    let rest = match process.name.strip_prefix(resource).and_then(|rest| rest.strip_prefix('-')) {
        Some(rest) => rest,
        None => return false,
    };
    let is_member = process.process_type == ProcessType::Mongod && process.replica_set_name().is_some();
    if !sharded {
        return is_ordinal(rest) && is_member;
    }
    match rest.split_once('-') {
        Some(("mongos", ordinal)) => is_ordinal(ordinal) && process.process_type == ProcessType::Mongos,
        Some(("config", ordinal)) => is_ordinal(ordinal) && is_member,
        Some((shard, ordinal)) => is_ordinal(shard) && is_ordinal(ordinal) && is_member,
        None => false,
    }
}

fn is_ordinal(val: &str) -> bool {
    !val.is_empty() && val.chars().all(|c| c.is_ascii_digit())
}
