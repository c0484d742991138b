use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Split-horizon addresses advertised by a member, keyed by horizon name.
pub type Horizons = BTreeMap<String, String>;

/// A member of a replica set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    /// The stable member id, distinct from the member's position.
    #[serde(rename = "_id")]
    pub id: u32,
    /// The name of the process backing this member.
    pub host: String,
    #[serde(default = "ReplicaSetMember::default_votes")]
    pub votes: u32,
    #[serde(default = "ReplicaSetMember::default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub arbiter_only: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizons: Option<Horizons>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ReplicaSetMember {
    fn default_votes() -> u32 {
        1
    }

    fn default_priority() -> f64 {
        1.0
    }

    pub fn new(id: u32, host: &str) -> Self {
        Self {
            id,
            host: host.into(),
            votes: Self::default_votes(),
            priority: Self::default_priority(),
            arbiter_only: false,
            hidden: false,
            horizons: None,
            tags: BTreeMap::new(),
            other: Map::new(),
        }
    }

    pub fn is_voting(&self) -> bool {
        self.votes > 0
    }
}

/// A replica set described by the automation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    /// The replica set name.
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default = "ReplicaSet::default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub members: Vec<ReplicaSetMember>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ReplicaSet {
    fn default_protocol_version() -> String {
        "1".into()
    }

    pub fn new(name: &str) -> Self {
        Self {
            id: name.into(),
            protocol_version: Self::default_protocol_version(),
            members: vec![],
            other: Map::new(),
        }
    }

    pub fn member(&self, process_name: &str) -> Option<&ReplicaSetMember> {
        self.members.iter().find(|m| m.host == process_name)
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.host.clone()).collect()
    }

    /// The current process name to member id mapping.
    pub fn member_ids(&self) -> BTreeMap<String, u32> {
        self.members.iter().map(|m| (m.host.clone(), m.id)).collect()
    }

    /// Assign horizons to members by position.
    ///
    /// Nothing is assigned when fewer horizon entries than members are given; a member count
    /// change is still in progress in that case.
    pub fn set_horizons(&mut self, horizons: &[Horizons]) {
        if horizons.is_empty() || horizons.len() < self.members.len() {
            return;
        }
        for (member, horizon) in self.members.iter_mut().zip(horizons.iter()) {
            member.horizons = Some(horizon.clone());
        }
    }

    /// Zero the votes and priority of the named members.
    pub fn mark_unvoted(&mut self, process_names: &BTreeSet<String>) -> bool {
        let mut changed = false;
        for member in self.members.iter_mut().filter(|m| process_names.contains(&m.host)) {
            if member.votes != 0 || member.priority != 0.0 {
                member.votes = 0;
                member.priority = 0.0;
                changed = true;
            }
        }
        changed
    }

    /// Merge the desired member list into this replica set.
    ///
    /// Members absent from `desired` are removed. Fields set by other actors on surviving members
    /// are preserved, everything the resource manages is overwritten.
    pub fn merge_from(&mut self, desired: &ReplicaSet) {
        self.protocol_version = desired.protocol_version.clone();
        let mut existing: BTreeMap<String, ReplicaSetMember> = self.members.drain(..).map(|m| (m.host.clone(), m)).collect();
        self.members = desired
            .members
            .iter()
            .map(|want| match existing.remove(&want.host) {
                Some(mut have) => {
                    have.id = want.id;
                    have.votes = want.votes;
                    have.priority = want.priority;
                    have.arbiter_only = want.arbiter_only;
                    have.hidden = want.hidden;
                    have.tags = want.tags.clone();
                    have.horizons = want.horizons.clone();
                    have
                }
                None => want.clone(),
            })
            .collect();
    }
}
