//! Collaborator seams of the engine.
//!
//! The driver never talks to the management plane or Kubernetes directly. Everything it reads or
//! writes goes through the traits in this module, which are handed to it at construction time.

#[cfg(test)]
mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
pub use memory::{EventLog, InMemoryResources, InMemoryStore, RecordingWorkloads};

use crate::certs::MountedVolumes;
use crate::deployment::{AutomationConfig, AutomationStatus, Deployment};
use crate::error::AppError;

/// A mutation applied to the automation config during a read-modify-write.
pub type ConfigMutator<'a> = dyn FnMut(&mut AutomationConfig) -> Result<()> + Send + 'a;
/// A mutation applied to the deployment during a read-modify-write.
pub type DeploymentMutator<'a> = dyn FnMut(&mut Deployment) -> Result<()> + Send + 'a;

/// The shared automation config of a management-plane project.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_automation_config(&self) -> Result<AutomationConfig>;

    /// Read the config, apply `mutator` and write the result back with a single optimistic write.
    ///
    /// A failing mutator aborts the call without writing anything. Implementations skip the write
    /// when the mutator left the config unchanged.
    async fn read_update_automation_config(&self, mutator: &mut ConfigMutator<'_>) -> Result<AutomationConfig>;

    /// Goal state progress of the agents.
    async fn read_automation_status(&self) -> Result<AutomationStatus>;

    /// One page of the agents registered with the project. Pages start at 1.
    async fn read_agent_page(&self, page: u32) -> Result<AgentPage>;

    /// The version of the management plane.
    async fn read_version(&self) -> Result<ManagementVersion>;

    async fn read_deployment(&self) -> Result<Deployment> {
        Ok(self.read_automation_config().await?.deployment)
    }

    async fn read_update_deployment(&self, mutator: &mut DeploymentMutator<'_>) -> Result<Deployment> {
        let mut inner = |config: &mut AutomationConfig| mutator(&mut config.deployment);
        Ok(self.read_update_automation_config(&mut inner).await?.deployment)
    }
}

/// A page of registered agents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPage {
    pub results: Vec<AgentStatus>,
    /// The next page to read, if any.
    #[serde(default)]
    pub next_page: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub hostname: String,
    #[serde(default)]
    pub state_name: Option<String>,
}

/// The version reported by the management plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementVersion {
    /// A dotted version such as `6.0.11.100`.
    pub version: String,
    /// True for the hosted management plane, which always runs the latest version.
    #[serde(default)]
    pub cloud: bool,
}

impl ManagementVersion {
    /// The `(major, minor)` pair of the version, if it parses.
    pub fn major_minor(&self) -> Option<(u64, u64)> {
        let mut parts = self.version.split('.').map(|part| part.parse::<u64>().ok());
        match (parts.next().flatten(), parts.next().flatten()) {
            (Some(major), Some(minor)) => Some((major, minor)),
            (Some(major), None) => Some((major, 0)),
            _ => None,
        }
    }

    /// Prometheus endpoints are available from 5.9 onwards and always in the cloud.
    pub fn supports_prometheus(&self) -> bool {
        self.cloud || self.major_minor().map(|version| version >= (5, 9)).unwrap_or(false)
    }
}

/// Reads secrets in a namespace.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Read all keys of a secret. A missing secret is `AppError::NotFound`.
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    async fn read_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let mut data = self.read_secret(namespace, name).await?;
        data.remove(key)
            .ok_or_else(|| AppError::NotFound(format!("key {} of secret {}/{}", key, namespace, name)).into())
    }
}

/// Reads configmaps in a namespace.
#[async_trait]
pub trait ConfigMapReader: Send + Sync {
    /// Read all keys of a configmap. A missing configmap is `AppError::NotFound`.
    async fn read_config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    async fn read_config_map_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let mut data = self.read_config_map(namespace, name).await?;
        data.remove(key)
            .ok_or_else(|| AppError::NotFound(format!("key {} of configmap {}/{}", key, namespace, name)).into())
    }
}

/// The desired state of one workload backing a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub replicas: u32,
    /// Hash of the certificates the workload must mount, rolled into the pod template.
    pub certificate_hash: Option<String>,
}

/// Applies replica counts and certificate changes to the workloads running the processes.
#[async_trait]
pub trait WorkloadUpdater: Send + Sync {
    /// What the named workload currently mounts, or `None` when it does not exist yet.
    async fn mounted_volumes(&self, namespace: &str, name: &str) -> Result<Option<MountedVolumes>>;

    async fn update_workload(&self, namespace: &str, workload: &Workload) -> Result<()>;
}
