//! Test fixtures.
//!
//! Every builder takes its input by value and returns a new value, so fixtures compose without
//! shared mutable state.

use std::collections::BTreeMap;

use crate::crd::{
    AgentAuthentication, AuthMode, Authentication, Connectivity, MongoDB, MongoDBSpec, MongoDBStatus, ResourceType, Security, TlsSpec,
};
use crate::deployment::{Deployment, OptionsOverlay, ProcessTls};
use crate::topology;

pub const NAMESPACE: &str = "default";
pub const VERSION: &str = "6.0.5";

/// A resource of the given type with no members and no security settings.
pub fn mongodb(name: &str, resource_type: ResourceType) -> MongoDB {
    let mut mdb = MongoDB::new(
        name,
        MongoDBSpec {
            resource_type,
            version: VERSION.into(),
            feature_compatibility_version: None,
            members: 0,
            member_config: vec![],
            shard_count: 0,
            mongods_per_shard_count: 0,
            config_server_count: 0,
            mongos_count: 0,
            connectivity: None,
            security: None,
            additional_mongod_config: None,
            prometheus: None,
            cluster_domain: None,
        },
    );
    mdb.metadata.namespace = Some(NAMESPACE.into());
    mdb
}

pub fn replica_set(name: &str, members: u32) -> MongoDB {
    let mut mdb = mongodb(name, ResourceType::ReplicaSet);
    mdb.spec.members = members;
    mdb
}

pub fn sharded_cluster(name: &str, shards: u32, mongods_per_shard: u32, config_servers: u32, mongos: u32) -> MongoDB {
    let mut mdb = mongodb(name, ResourceType::ShardedCluster);
    mdb.spec.shard_count = shards;
    mdb.spec.mongods_per_shard_count = mongods_per_shard;
    mdb.spec.config_server_count = config_servers;
    mdb.spec.mongos_count = mongos;
    mdb
}

pub fn with_members(mut mdb: MongoDB, members: u32) -> MongoDB {
    mdb.spec.members = members;
    mdb
}

pub fn with_version(mut mdb: MongoDB, version: &str) -> MongoDB {
    mdb.spec.version = version.into();
    mdb
}

pub fn with_status(mut mdb: MongoDB, status: MongoDBStatus) -> MongoDB {
    mdb.status = Some(status);
    mdb
}

/// A status recording `members` as the last observed member count.
pub fn observed(mdb: MongoDB, members: u32) -> MongoDB {
    let resource_type = mdb.spec.resource_type;
    with_status(
        mdb,
        MongoDBStatus {
            members,
            last_applied_type: Some(resource_type),
            ..Default::default()
        },
    )
}

pub fn with_tls(mdb: MongoDB) -> MongoDB {
    update_security(mdb, |security| {
        security.tls = Some(TlsSpec { enabled: true, ca: None });
    })
}

pub fn with_ca(mdb: MongoDB, ca: &str) -> MongoDB {
    update_security(mdb, |security| {
        let tls = security.tls.get_or_insert_with(TlsSpec::default);
        tls.enabled = true;
        tls.ca = Some(ca.into());
    })
}

pub fn with_auth(mdb: MongoDB, modes: &[AuthMode], agent_mode: Option<AuthMode>) -> MongoDB {
    update_security(mdb, |security| {
        security.authentication = Some(Authentication {
            enabled: true,
            modes: modes.to_vec(),
            agents: agent_mode.map(|mode| AgentAuthentication {
                mode: Some(mode),
                ..Default::default()
            }),
            ..Default::default()
        });
    })
}

/// Keep the authentication section but switch it off.
pub fn with_auth_disabled(mdb: MongoDB) -> MongoDB {
    update_security(mdb, |security| {
        let auth = security.authentication.get_or_insert_with(Authentication::default);
        auth.enabled = false;
    })
}

pub fn with_internal_cluster_x509(mdb: MongoDB) -> MongoDB {
    update_security(mdb, |security| {
        let auth = security.authentication.get_or_insert_with(Authentication::default);
        auth.internal_cluster = Some("X509".into());
    })
}

pub fn with_horizons(mut mdb: MongoDB, horizons: Vec<BTreeMap<String, String>>) -> MongoDB {
    mdb.spec.connectivity = Some(Connectivity {
        replica_set_horizons: horizons,
    });
    mdb
}

pub fn with_additional_config(mut mdb: MongoDB, config: serde_json::Value) -> MongoDB {
    mdb.spec.additional_mongod_config = Some(config);
    mdb
}

fn update_security(mut mdb: MongoDB, f: impl FnOnce(&mut Security)) -> MongoDB {
    let security = mdb.spec.security.get_or_insert_with(Security::default);
    f(security);
    mdb
}

/// Hostnames of the first `members` pods of a replica set resource.
pub fn replica_set_hostnames(name: &str, members: u32) -> Vec<String> {
    let service = topology::service_name(name);
    topology::pod_names(name, members)
        .iter()
        .map(|pod| topology::hostname(pod, &service, NAMESPACE, "cluster.local"))
        .collect()
}

/// A document holding a replica set of `members` processes, as a previous pass would leave it.
pub fn replica_set_deployment(name: &str, members: u32, tls: bool) -> Deployment {
    let mut deployment = Deployment::default();
    let mut desired = topology::desired_replica_set(&replica_set(name, members), members, "cluster.local");
    let process_tls = if tls { ProcessTls::required() } else { ProcessTls::disabled() };
    desired.processes.iter_mut().for_each(|p| p.configure_tls(&process_tls));
    // Building a fresh replica set never conflicts.
    let _ = deployment.merge_replica_set(&desired, &OptionsOverlay::new());
    let hostnames: Vec<String> = desired.processes.iter().map(|p| p.hostname.clone()).collect();
    deployment.add_monitoring_and_backup(&hostnames, tls);
    deployment
}

/// A self signed EC certificate with subject
/// `CN=mms-automation-agent,OU=mongodb-kubernetes,O=cluster.local-agent,L=NY,ST=NY,C=US`.
pub const AGENT_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIICWzCCAgGgAwIBAgIUEoQPF3F5ed0bd9qSc5RwdFFWJI8wCgYIKoZIzj0EAwIw
gYExCzAJBgNVBAYTAlVTMQswCQYDVQQIDAJOWTELMAkGA1UEBwwCTlkxHDAaBgNV
BAoME2NsdXN0ZXIubG9jYWwtYWdlbnQxGzAZBgNVBAsMEm1vbmdvZGIta3ViZXJu
ZXRlczEdMBsGA1UEAwwUbW1zLWF1dG9tYXRpb24tYWdlbnQwIBcNMjYxMDE2MTUw
NTUwWhgPMjEyNjA5MjIxNTA1NTBaMIGBMQswCQYDVQQGEwJVUzELMAkGA1UECAwC
TlkxCzAJBgNVBAcMAk5ZMRwwGgYDVQQKDBNjbHVzdGVyLmxvY2FsLWFnZW50MRsw
GQYDVQQLDBJtb25nb2RiLWt1YmVybmV0ZXMxHTAbBgNVBAMMFG1tcy1hdXRvbWF0
aW9uLWFnZW50MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE1NWXt7d/RZ+pxtc2
42uSZ+ZkuCW6ApgAIzEBRz/p/QFl2p2wCbbrTS/j9va+tH4ghusDTQMCv+KswQrG
vZTMoqNTMFEwHQYDVR0OBBYEFFvnMZXjbISE4Z860fDc/otZLT79MB8GA1UdIwQY
MBaAFFvnMZXjbISE4Z860fDc/otZLT79MA8GA1UdEwEB/wQFMAMBAf8wCgYIKoZI
zj0EAwIDSAAwRQIgeeik51COcO/oqbWdBjkoqDwFdXLfIQe9Ic+Put9t5tcCIQDE
or2zC/i+j5yhnehwELnAw1eoGPqpDMls4uBZQqAFJg==
-----END CERTIFICATE-----
";
