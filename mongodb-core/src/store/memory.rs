//! In-memory collaborators for tests of the engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AgentPage, AgentStatus, ConfigMapReader, ConfigMutator, DocumentStore, ManagementVersion, SecretReader, Workload, WorkloadUpdater};
use crate::certs::MountedVolumes;
use crate::deployment::{AutomationConfig, AutomationStatus, Deployment, ProcessStatus};
use crate::error::AppError;

const DEFAULT_AGENT_PAGE_SIZE: usize = 500;

/// A shared, ordered log of collaborator side effects.
pub type EventLog = Arc<std::sync::Mutex<Vec<String>>>;

/// An automation config held in memory.
///
/// Agents are simulated: every process reaches goal state as soon as it is written, unless it was
/// marked as lagging. Only explicitly registered hostnames appear in the agent list.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    events: Option<EventLog>,
}

struct StoreState {
    config: AutomationConfig,
    registered: BTreeSet<String>,
    lagging: BTreeSet<String>,
    version: ManagementVersion,
    agent_page_size: usize,
    writes: u32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Deployment::default())
    }
}

impl InMemoryStore {
    pub fn new(deployment: Deployment) -> Self {
        Self {
            state: Mutex::new(StoreState {
                config: AutomationConfig { version: 1, deployment },
                registered: BTreeSet::new(),
                lagging: BTreeSet::new(),
                version: ManagementVersion {
                    version: "6.0.0".into(),
                    cloud: false,
                },
                agent_page_size: DEFAULT_AGENT_PAGE_SIZE,
                writes: 0,
            }),
            events: None,
        }
    }

    pub fn with_registered_hosts<I: IntoIterator<Item = String>>(mut self, hostnames: I) -> Self {
        self.state.get_mut().registered.extend(hostnames);
        self
    }

    /// Processes whose agents never reach goal state.
    pub fn with_lagging_processes<I: IntoIterator<Item = String>>(mut self, names: I) -> Self {
        self.state.get_mut().lagging.extend(names);
        self
    }

    pub fn with_version(mut self, version: ManagementVersion) -> Self {
        self.state.get_mut().version = version;
        self
    }

    pub fn with_agent_page_size(mut self, size: usize) -> Self {
        self.state.get_mut().agent_page_size = size.max(1);
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn register_hosts<I: IntoIterator<Item = String>>(&self, hostnames: I) {
        self.state.lock().await.registered.extend(hostnames);
    }

    pub async fn set_lagging_processes<I: IntoIterator<Item = String>>(&self, names: I) {
        let mut state = self.state.lock().await;
        state.lagging = names.into_iter().collect();
    }

    /// A snapshot of the current deployment.
    pub async fn deployment(&self) -> Deployment {
        self.state.lock().await.config.deployment.clone()
    }

    /// The number of writes which actually changed the config.
    pub async fn write_count(&self) -> u32 {
        self.state.lock().await.writes
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read_automation_config(&self) -> Result<AutomationConfig> {
        Ok(self.state.lock().await.config.clone())
    }

    async fn read_update_automation_config(&self, mutator: &mut ConfigMutator<'_>) -> Result<AutomationConfig> {
        let mut state = self.state.lock().await;
        let mut config = state.config.clone();
        mutator(&mut config)?;
        // The version is owned by the store.
        config.version = state.config.version;
        if config == state.config {
            return Ok(config);
        }
        config.version += 1;
        state.config = config.clone();
        state.writes += 1;
        if let Some(events) = self.events.as_ref() {
            if let Ok(mut events) = events.lock() {
                events.push(format!("document-write:{}", config.version));
            }
        }
        Ok(config)
    }

    async fn read_automation_status(&self) -> Result<AutomationStatus> {
        let state = self.state.lock().await;
        let goal_version = state.config.version;
        let processes = state
            .config
            .deployment
            .processes
            .iter()
            .map(|process| ProcessStatus {
                name: process.name.clone(),
                last_goal_version_achieved: if state.lagging.contains(&process.name) { goal_version - 1 } else { goal_version },
                plan: vec![],
            })
            .collect();
        Ok(AutomationStatus { goal_version, processes })
    }

    async fn read_agent_page(&self, page: u32) -> Result<AgentPage> {
        let state = self.state.lock().await;
        let size = state.agent_page_size;
        let skip = (page.max(1) as usize - 1) * size;
        let results: Vec<AgentStatus> = state
            .registered
            .iter()
            .skip(skip)
            .take(size)
            .map(|hostname| AgentStatus {
                hostname: hostname.clone(),
                state_name: Some("ACTIVE".into()),
            })
            .collect();
        let next_page = if skip + results.len() < state.registered.len() { Some(page.max(1) + 1) } else { None };
        Ok(AgentPage { results, next_page })
    }

    async fn read_version(&self) -> Result<ManagementVersion> {
        Ok(self.state.lock().await.version.clone())
    }
}

/// Secrets and configmaps held in memory, keyed by namespace and name.
#[derive(Clone, Debug, Default)]
pub struct InMemoryResources {
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    config_maps: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> Self {
        self.secrets.insert((namespace.into(), name.into()), data);
        self
    }

    pub fn with_config_map(mut self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> Self {
        self.config_maps.insert((namespace.into(), name.into()), data);
        self
    }
}

#[async_trait]
impl SecretReader for InMemoryResources {
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("secret {}/{}", namespace, name)).into())
    }
}

#[async_trait]
impl ConfigMapReader for InMemoryResources {
    async fn read_config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("configmap {}/{}", namespace, name)).into())
    }
}

/// A workload updater which records every update and tracks mounted volumes.
#[derive(Default)]
pub struct RecordingWorkloads {
    mounted: Mutex<BTreeMap<(String, String), MountedVolumes>>,
    updates: Mutex<Vec<Workload>>,
    events: Option<EventLog>,
}

impl RecordingWorkloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mounted(mut self, namespace: &str, name: &str, volumes: MountedVolumes) -> Self {
        self.mounted.get_mut().insert((namespace.into(), name.into()), volumes);
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn updates(&self) -> Vec<Workload> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl WorkloadUpdater for RecordingWorkloads {
    async fn mounted_volumes(&self, namespace: &str, name: &str) -> Result<Option<MountedVolumes>> {
        Ok(self.mounted.lock().await.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn update_workload(&self, namespace: &str, workload: &Workload) -> Result<()> {
        let mut mounted = self.mounted.lock().await;
        let entry = mounted.entry((namespace.to_string(), workload.name.clone())).or_default();
        entry.replicas = workload.replicas;
        self.updates.lock().await.push(workload.clone());
        if let Some(events) = self.events.as_ref() {
            if let Ok(mut events) = events.lock() {
                events.push(format!("workload-update:{}:{}", workload.name, workload.replicas));
            }
        }
        Ok(())
    }
}
