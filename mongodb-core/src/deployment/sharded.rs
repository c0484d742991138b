use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A shard of a sharded cluster, backed by one replica set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    #[serde(rename = "_id")]
    pub id: String,
    /// The backing replica set name.
    pub rs: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A sharded cluster described by the automation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardedCluster {
    pub name: String,
    #[serde(default)]
    pub shards: Vec<Shard>,
    /// The config server replica set name.
    pub config_server_replica: String,
    #[serde(default)]
    pub collections: Vec<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ShardedCluster {
    pub fn new(name: &str, config_server_replica: &str, shard_replica_sets: &[String]) -> Self {
        Self {
            name: name.into(),
            shards: shard_replica_sets
                .iter()
                .map(|rs| Shard {
                    id: rs.clone(),
                    rs: rs.clone(),
                    tags: vec![],
                })
                .collect(),
            config_server_replica: config_server_replica.into(),
            collections: vec![],
            other: Map::new(),
        }
    }

    /// The names of all replica sets owned by this cluster, config server included.
    pub fn replica_set_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shards.iter().map(|s| s.rs.clone()).collect();
        names.push(self.config_server_replica.clone());
        names
    }

    /// Merge the desired shard list, keeping tags and collections set by other actors.
    pub fn merge_from(&mut self, desired: &ShardedCluster) {
        self.config_server_replica = desired.config_server_replica.clone();
        let existing = std::mem::take(&mut self.shards);
        self.shards = desired
            .shards
            .iter()
            .map(|want| match existing.iter().find(|have| have.id == want.id) {
                Some(have) => Shard {
                    id: want.id.clone(),
                    rs: want.rs.clone(),
                    tags: have.tags.clone(),
                },
                None => want.clone(),
            })
            .collect();
    }
}
