use std::collections::BTreeSet;

use serde_json::json;

use crate::deployment::{AutomationConfig, AutomationStatus, Deployment, ProcessStatus, Role};
use crate::fixtures;

fn names(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn unknown_keys_survive_a_read_modify_write() {
    let raw = json!({
        "version": 7,
        "processes": [],
        "replicaSets": [],
        "sharding": [],
        "auth": {"disabled": true, "autoAuthMechanisms": [], "usersWanted": [], "usersDeleted": [], "customField": 1},
        "options": {"downloadBase": "/var/lib/mongodb-mms-automation"},
        "mongoDbVersions": [{"name": "6.0.5"}],
    });
    let mut config: AutomationConfig = serde_json::from_value(raw).expect("parse automation config");
    assert_eq!(config.version, 7);
    config.deployment.roles.push(Role {
        role: "reader".into(),
        db: "admin".into(),
        privileges: vec![],
        roles: vec![],
        authentication_restrictions: vec![],
    });

    let written = serde_json::to_value(&config).expect("serialize automation config");
    assert_eq!(written["options"], json!({"downloadBase": "/var/lib/mongodb-mms-automation"}));
    assert_eq!(written["mongoDbVersions"], json!([{"name": "6.0.5"}]));
    assert_eq!(written["auth"]["customField"], json!(1));
    assert_eq!(written["roles"][0]["role"], json!("reader"));
}

#[test]
fn removing_a_replica_set_removes_its_processes() {
    let mut deployment = fixtures::replica_set_deployment("rs-a", 2, false);
    let other = fixtures::replica_set_deployment("rs-b", 1, false);
    deployment.processes.extend(other.processes);
    deployment.replica_sets.extend(other.replica_sets);

    assert!(deployment.remove_replica_set("rs-a"));
    assert!(!deployment.remove_replica_set("rs-a"), "second removal is a no-op");
    assert_eq!(deployment.processes.len(), 1);
    assert_eq!(deployment.processes[0].name, "rs-b-0");
    assert!(deployment.monitoring_versions.is_empty(), "agent entries of removed hosts must go");
}

#[test]
fn unvoting_and_disabling_report_changes() {
    let mut deployment = fixtures::replica_set_deployment("rs", 3, false);
    let leaving = names(&["rs-2"]);

    assert!(deployment.mark_rs_members_unvoted("rs", &leaving));
    assert!(!deployment.mark_rs_members_unvoted("rs", &leaving));
    assert!(!deployment.mark_rs_members_unvoted("missing", &leaving));
    let rs = deployment.replica_set("rs").expect("rs");
    assert!(!rs.member("rs-2").expect("rs-2").is_voting());
    assert!(rs.member("rs-1").expect("rs-1").is_voting());

    assert!(deployment.disable_processes(&leaving));
    assert!(!deployment.disable_processes(&leaving));
    assert!(deployment.process("rs-2").expect("rs-2").disabled);
}

#[test]
fn monitoring_entries_follow_tls() {
    let mut deployment = Deployment::default();
    let hosts = fixtures::replica_set_hostnames("rs", 2);
    assert!(deployment.add_monitoring_and_backup(&hosts, false));
    assert!(!deployment.add_monitoring_and_backup(&hosts, false));
    assert!(deployment.add_monitoring_and_backup(&hosts, true), "switching TLS on changes the entries");
    assert_eq!(deployment.monitoring_versions.len(), 2);
    assert_eq!(deployment.backup_versions.len(), 2);
}

#[test]
fn agent_tls_section_disappears_once_empty() {
    let mut deployment = Deployment::default();
    deployment.configure_agent_tls(Some("REQUIRE"), Some("/mongodb-automation/agent-certs/mms-automation-agent-pem"));
    let tls = deployment.tls.as_ref().expect("tls section");
    assert_eq!(tls.client_certificate_mode.as_deref(), Some("REQUIRE"));

    deployment.configure_agent_tls(None, None);
    assert!(deployment.tls.is_none());
}

#[test]
fn roles_are_only_written_when_different() {
    let mut deployment = Deployment::default();
    let roles = vec![Role {
        role: "reader".into(),
        db: "admin".into(),
        privileges: vec![],
        roles: vec![],
        authentication_restrictions: vec![],
    }];
    assert!(deployment.ensure_roles(&roles));
    assert!(!deployment.ensure_roles(&roles));
}

#[test]
fn processes_behind_the_goal_version_are_lagging() {
    let status = AutomationStatus {
        goal_version: 4,
        processes: vec![
            ProcessStatus {
                name: "rs-0".into(),
                last_goal_version_achieved: 4,
                plan: vec![],
            },
            ProcessStatus {
                name: "rs-1".into(),
                last_goal_version_achieved: 3,
                plan: vec!["WaitRsInit".into()],
            },
        ],
    };
    let wanted = vec!["rs-0".to_string(), "rs-1".to_string(), "rs-2".to_string()];
    assert_eq!(status.lagging_processes(&wanted), vec!["rs-1".to_string()]);
}
