//! The automation config held in a Kubernetes Secret.
//!
//! The document lives under the `cluster-config.json` key of a single Secret. Writes bump the
//! document `version` and replace the Secret at the `resourceVersion` it was read at, so a write
//! racing another writer fails with `AppError::Conflict` instead of overwriting its changes.
//!
//! Agent progress is read from annotations the agents maintain on their pods.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, ObjectMeta, PostParams};
use kube::client::Client;
use maplit::btreemap;
use tokio::time::timeout;

use crate::config::Config;
use crate::k8s::{is_conflict, is_not_found, API_TIMEOUT};
use mongodb_core::deployment::{AutomationConfig, AutomationStatus, ProcessStatus};
use mongodb_core::error::AppError;
use mongodb_core::store::{AgentPage, AgentStatus, ConfigMutator, DocumentStore, ManagementVersion};
use mongodb_core::{topology, OPERATOR_LABEL_SELECTORS};

/// The Secret key holding the automation config.
pub const AUTOMATION_CONFIG_KEY: &str = "cluster-config.json";
/// The pod annotation carrying the version of the agent running in the pod.
pub const ANNOTATION_AGENT_VERSION: &str = "agent.mongodb.com/version";
/// The pod annotation carrying the last automation config version the agent reached.
pub const ANNOTATION_GOAL_VERSION: &str = "agent.mongodb.com/last-goal-version-achieved";

/// A `DocumentStore` backed by a Secret in the operator's namespace.
pub struct SecretDocumentStore {
    client: Client,
    namespace: String,
    secret_name: String,
    cluster_domain: String,
    /// Only agents reporting this version count as registered, when set.
    agent_version: Option<String>,
    version: ManagementVersion,
}

impl SecretDocumentStore {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            secret_name: config.automation_config_secret.clone(),
            cluster_domain: config.cluster_domain.clone(),
            agent_version: config.automation_agent_version.clone(),
            version: config.management_version(),
        }
    }

    /// Fetch the Secret holding the automation config, if it exists.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_secret(&self) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let res = timeout(API_TIMEOUT, api.get(&self.secret_name))
            .await
            .context("timeout while fetching automation config secret")?;
        match res {
            Ok(secret) => Ok(Some(secret)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context("error fetching automation config secret"),
        }
    }

    /// Write the automation config, either replacing `current` or creating a new Secret.
    #[tracing::instrument(level = "debug", skip(self, current, raw))]
    async fn write_secret(&self, current: Option<Secret>, raw: Vec<u8>) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = PostParams::default();
        let res = match current {
            Some(mut secret) => {
                secret.data.get_or_insert_with(BTreeMap::new).insert(AUTOMATION_CONFIG_KEY.into(), ByteString(raw));
                secret.metadata.managed_fields = None;
                // The resourceVersion read with the secret makes this replace conditional.
                timeout(API_TIMEOUT, api.replace(&self.secret_name, &params, &secret))
                    .await
                    .context("timeout while replacing automation config secret")?
            }
            None => {
                tracing::info!(name = %self.secret_name, "creating automation config secret");
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(self.secret_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        labels: Some(canonical_labels()),
                        ..Default::default()
                    },
                    data: Some(btreemap! {AUTOMATION_CONFIG_KEY.into() => ByteString(raw)}),
                    ..Default::default()
                };
                timeout(API_TIMEOUT, api.create(&params, &secret))
                    .await
                    .context("timeout while creating automation config secret")?
            }
        };
        match res {
            Ok(_) => Ok(()),
            Err(err) if is_conflict(&err) => Err(AppError::Conflict.into()),
            Err(err) => Err(err).context("error writing automation config secret"),
        }
    }

    /// List the pods running managed processes.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = ListParams {
            label_selector: Some(OPERATOR_LABEL_SELECTORS.into()),
            ..Default::default()
        };
        let pods = timeout(API_TIMEOUT, api.list(&params))
            .await
            .context("timeout while listing pods")?
            .context("error listing pods")?;
        Ok(pods.items)
    }

    /// The hostname under which the agent of `pod` registers.
    fn pod_hostname(&self, pod: &Pod) -> Option<String> {
        let name = pod.metadata.name.as_deref()?;
        let spec = pod.spec.as_ref()?;
        let service = spec.subdomain.as_deref()?;
        let host = spec.hostname.as_deref().unwrap_or(name);
        Some(topology::hostname(host, service, &self.namespace, &self.cluster_domain))
    }

    /// Check whether the agent of `pod` has reported in with an acceptable version.
    fn agent_registered(&self, pod: &Pod) -> bool {
        match (pod_annotation(pod, ANNOTATION_AGENT_VERSION), self.agent_version.as_deref()) {
            (Some(reported), Some(expected)) => reported == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[async_trait]
impl DocumentStore for SecretDocumentStore {
    async fn read_automation_config(&self) -> Result<AutomationConfig> {
        match self.get_secret().await? {
            Some(secret) => parse_automation_config(&secret),
            None => Ok(AutomationConfig::default()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, mutator))]
    async fn read_update_automation_config(&self, mutator: &mut ConfigMutator<'_>) -> Result<AutomationConfig> {
        let current = self.get_secret().await?;
        let stored = match current.as_ref() {
            Some(secret) => parse_automation_config(secret)?,
            None => AutomationConfig::default(),
        };
        let mut config = stored.clone();
        mutator(&mut config)?;
        // The version is owned by the store.
        config.version = stored.version;
        if config == stored {
            return Ok(config);
        }
        config.version += 1;
        let raw = serde_json::to_vec(&config).context("error serializing automation config")?;
        self.write_secret(current, raw).await?;
        tracing::info!(version = config.version, "automation config updated");
        Ok(config)
    }

    async fn read_automation_status(&self) -> Result<AutomationStatus> {
        let goal_version = self.read_automation_config().await?.version;
        let processes = self
            .list_pods()
            .await?
            .iter()
            .filter_map(|pod| {
                let name = pod.metadata.name.clone()?;
                // Pods whose agent has not reported yet have reached no goal state.
                let achieved = pod_annotation(pod, ANNOTATION_GOAL_VERSION).and_then(|v| v.parse().ok()).unwrap_or(0);
                Some(ProcessStatus {
                    name,
                    last_goal_version_achieved: achieved,
                    plan: vec![],
                })
            })
            .collect();
        Ok(AutomationStatus { goal_version, processes })
    }

    async fn read_agent_page(&self, page: u32) -> Result<AgentPage> {
        // All agents are returned on the first page.
        if page > 1 {
            return Ok(AgentPage::default());
        }
        let results = self
            .list_pods()
            .await?
            .iter()
            .filter(|pod| self.agent_registered(pod))
            .filter_map(|pod| self.pod_hostname(pod))
            .map(|hostname| AgentStatus {
                hostname,
                state_name: Some("ACTIVE".into()),
            })
            .collect();
        Ok(AgentPage { results, next_page: None })
    }

    async fn read_version(&self) -> Result<ManagementVersion> {
        Ok(self.version.clone())
    }
}

/// Parse the automation config out of its Secret. A Secret without the key holds an empty config.
fn parse_automation_config(secret: &Secret) -> Result<AutomationConfig> {
    if let Some(raw) = secret.data.as_ref().and_then(|data| data.get(AUTOMATION_CONFIG_KEY)) {
        return serde_json::from_slice(&raw.0).context("error parsing automation config");
    }
    if let Some(raw) = secret.string_data.as_ref().and_then(|data| data.get(AUTOMATION_CONFIG_KEY)) {
        return serde_json::from_str(raw).context("error parsing automation config");
    }
    Ok(AutomationConfig::default())
}

fn pod_annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata.annotations.as_ref().and_then(|annotations| annotations.get(key)).map(String::as_str)
}

/// The canonical labels of objects created by this operator.
pub(super) fn canonical_labels() -> BTreeMap<String, String> {
    btreemap! {
        "app".into() => "mongodb".into(),
        "mongodb.com/controlled-by".into() => "mongodb-operator".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(raw: &str) -> Secret {
        Secret {
            data: Some(btreemap! {AUTOMATION_CONFIG_KEY.into() => ByteString(raw.as_bytes().to_vec())}),
            ..Default::default()
        }
    }

    #[test]
    fn automation_config_parses_from_secret_data() -> Result<()> {
        let config = parse_automation_config(&secret(r#"{"version": 3, "processes": [], "options": {"downloadBase": "/tmp"}}"#))?;
        assert_eq!(config.version, 3);
        assert!(config.deployment.other.contains_key("options"), "unknown keys must be preserved");
        Ok(())
    }

    #[test]
    fn missing_key_is_an_empty_config() -> Result<()> {
        let config = parse_automation_config(&Secret::default())?;
        assert_eq!(config, AutomationConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(parse_automation_config(&secret("{not json")).is_err());
    }

    #[test]
    fn canonical_labels_match_the_operator_selector() {
        let selector: Vec<String> = canonical_labels().iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        assert_eq!(selector.join(","), OPERATOR_LABEL_SELECTORS);
    }
}
