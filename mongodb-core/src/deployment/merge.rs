//! Merging desired topologies into the shared document.
//!
//! Every merge replaces the entities owned by one resource and nothing else. Ownership is
//! derived from the document itself: a mongod belongs to the replica set named in its
//! `replication.replSetName` argument, a mongos to the sharded cluster named in `cluster`.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};

use super::{allocate_ids, Deployment, Horizons, OptionsOverlay, Process, ProcessType, ReplicaSet, ReplicaSetMember, ShardedCluster};
use crate::error::AppError;

/// Per-member settings of a desired replica set, matched to processes by position.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberSettings {
    pub votes: u32,
    pub priority: f64,
    pub tags: BTreeMap<String, String>,
}

impl Default for MemberSettings {
    fn default() -> Self {
        Self {
            votes: 1,
            priority: 1.0,
            tags: BTreeMap::new(),
        }
    }
}

/// The desired state of one replica set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredReplicaSet {
    pub name: String,
    /// Member processes in member order.
    pub processes: Vec<Process>,
    /// Optional per-member settings. Members beyond the end of this list use the defaults.
    pub member_settings: Vec<MemberSettings>,
    /// Optional split-horizon addresses, one entry per member.
    pub horizons: Vec<Horizons>,
}

/// The desired state of a sharded cluster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredShardedCluster {
    pub name: String,
    pub shards: Vec<DesiredReplicaSet>,
    pub config_server: DesiredReplicaSet,
    pub mongos: Vec<Process>,
}

impl Deployment {
    /// Merge a replica set and its member processes into the document.
    ///
    /// Member ids of existing members are preserved; new members are allocated fresh ids.
    /// Processes previously owned by the replica set which are no longer desired are removed.
    /// Returns the names of the removed processes.
    pub fn merge_replica_set(&mut self, desired: &DesiredReplicaSet, previous_additional: &OptionsOverlay) -> Result<Vec<String>> {
        for process in desired.processes.iter() {
            self.check_ownership(process)?;
        }

        let names: Vec<String> = desired.processes.iter().map(|p| p.name.clone()).collect();
        let existing_ids = self.replica_set(&desired.name).map(ReplicaSet::member_ids).unwrap_or_default();
        let ids = allocate_ids(&names, &existing_ids);

        let mut rs = ReplicaSet::new(&desired.name);
        for (idx, name) in names.iter().enumerate() {
            let id = ids.get(name).copied().unwrap_or(idx as u32);
            let mut member = ReplicaSetMember::new(id, name);
            if let Some(settings) = desired.member_settings.get(idx) {
                member.votes = settings.votes;
                member.priority = settings.priority;
                member.tags = settings.tags.clone();
            }
            rs.members.push(member);
        }
        rs.set_horizons(&desired.horizons);

        // Processes owned by this replica set before the merge.
        let mut previously_owned: BTreeSet<String> = self
            .processes
            .iter()
            .filter(|p| p.process_type == ProcessType::Mongod && p.replica_set_name() == Some(desired.name.as_str()))
            .map(|p| p.name.clone())
            .collect();
        if let Some(current) = self.replica_set(&desired.name) {
            previously_owned.extend(current.member_names());
        }
        let desired_names: BTreeSet<String> = names.iter().cloned().collect();
        let removed: BTreeSet<String> = previously_owned.difference(&desired_names).cloned().collect();

        self.upsert_processes(&desired.processes, previous_additional);
        self.remove_processes(&removed);
        match self.replica_set_mut(&desired.name) {
            Some(current) => current.merge_from(&rs),
            None => self.replica_sets.push(rs),
        }
        Ok(removed.into_iter().collect())
    }

    /// Merge a sharded cluster: each shard, the config server replica set and the mongos list.
    pub fn merge_sharded_cluster(&mut self, desired: &DesiredShardedCluster, previous_additional: &OptionsOverlay) -> Result<Vec<String>> {
        for process in desired.mongos.iter() {
            self.check_ownership(process)?;
        }
        let mut removed = vec![];
        for shard in desired.shards.iter() {
            removed.extend(self.merge_replica_set(shard, previous_additional)?);
        }
        removed.extend(self.merge_replica_set(&desired.config_server, previous_additional)?);

        // Shards dropped from the desired topology are removed wholesale.
        let desired_shards: BTreeSet<&str> = desired.shards.iter().map(|s| s.name.as_str()).collect();
        if let Some(current) = self.sharded_cluster(&desired.name) {
            let dropped: Vec<String> = current.shards.iter().filter(|s| !desired_shards.contains(s.rs.as_str())).map(|s| s.rs.clone()).collect();
            for rs in dropped {
                removed.extend(self.replica_set(&rs).map(ReplicaSet::member_names).unwrap_or_default());
                self.remove_replica_set(&rs);
            }
        }

        let desired_mongos: BTreeSet<String> = desired.mongos.iter().map(|p| p.name.clone()).collect();
        let stale_mongos: BTreeSet<String> = self
            .processes
            .iter()
            .filter(|p| p.process_type == ProcessType::Mongos && p.cluster.as_deref() == Some(desired.name.as_str()))
            .filter(|p| !desired_mongos.contains(&p.name))
            .map(|p| p.name.clone())
            .collect();
        self.upsert_processes(&desired.mongos, previous_additional);
        self.remove_processes(&stale_mongos);
        removed.extend(stale_mongos);

        let shard_names: Vec<String> = desired.shards.iter().map(|s| s.name.clone()).collect();
        let cluster = ShardedCluster::new(&desired.name, &desired.config_server.name, &shard_names);
        match self.sharding.iter_mut().find(|sc| sc.name == desired.name) {
            Some(current) => current.merge_from(&cluster),
            None => self.sharding.push(cluster),
        }
        Ok(removed)
    }

    /// Merge a standalone process.
    pub fn merge_standalone(&mut self, desired: &Process, previous_additional: &OptionsOverlay) -> Result<()> {
        self.check_ownership(desired)?;
        self.upsert_processes(std::slice::from_ref(desired), previous_additional);
        Ok(())
    }

    fn upsert_processes(&mut self, desired: &[Process], previous_additional: &OptionsOverlay) {
        for want in desired {
            match self.process_mut(&want.name) {
                Some(have) => have.merge_from(want, previous_additional),
                None => self.processes.push(want.clone()),
            }
        }
    }

    /// Fail if a process of the same name is owned by a different resource.
    fn check_ownership(&self, desired: &Process) -> Result<()> {
        let existing = match self.process(&desired.name) {
            Some(existing) => existing,
            None => return Ok(()),
        };
        let same_owner = existing.process_type == desired.process_type
            && existing.replica_set_name() == desired.replica_set_name()
            && existing.cluster == desired.cluster;
        if !same_owner {
            bail!(AppError::InvalidTopology(format!(
                "process {} already exists and belongs to {}",
                desired.name,
                describe_owner(existing)
            )));
        }
        Ok(())
    }
}

fn describe_owner(process: &Process) -> String {
    match (process.process_type, process.replica_set_name(), process.cluster.as_deref()) {
        (ProcessType::Mongos, _, Some(cluster)) => format!("sharded cluster {}", cluster),
        (_, Some(rs), _) => format!("replica set {}", rs),
        _ => "a standalone deployment".into(),
    }
}
