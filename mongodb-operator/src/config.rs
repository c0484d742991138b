//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use tracing_subscriber::EnvFilter;

use mongodb_core::config::{EngineConfig, RequeueIntervals, ScaleDownPolicy};
use mongodb_core::retry::RetryParams;
use mongodb_core::store::ManagementVersion;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The operator's logging config, as `tracing_subscriber::EnvFilter` directives.
    pub rust_log: String,
    /// The Kubernetes namespace watched by this operator.
    pub namespace: String,
    /// The cluster domain used to build process hostnames.
    #[serde(default = "Config::default_cluster_domain")]
    pub cluster_domain: String,

    /// The name of the Secret holding the automation config.
    pub automation_config_secret: String,
    /// When set, only agents reporting this version are considered registered.
    #[serde(default)]
    pub automation_agent_version: Option<String>,
    /// The version of the management plane the agents talk to.
    #[serde(default = "Config::default_management_version", deserialize_with = "Config::parse_management_version")]
    pub management_version: String,
    /// Set when the agents are managed by the hosted management plane.
    #[serde(default)]
    pub management_cloud: bool,

    /// The number of checks performed while waiting on agents.
    #[serde(default = "Config::default_agent_wait_retries")]
    pub agent_wait_retries: u32,
    /// The pause between two checks while waiting on agents.
    #[serde(default = "Config::default_agent_wait_seconds")]
    pub agent_wait_seconds: u64,
    /// The requeue interval used while more work is pending.
    #[serde(default = "Config::default_requeue_short_seconds")]
    pub requeue_short_seconds: u64,
    /// The requeue interval used once a resource has converged.
    #[serde(default = "Config::default_requeue_long_seconds")]
    pub requeue_long_seconds: u64,
    /// Disable processes before removing them on scale down.
    #[serde(default)]
    pub scale_down_disable_processes: bool,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The tracing filter built from `RUST_LOG` directives.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.rust_log).with_context(|| format!("invalid RUST_LOG directives {:?}", self.rust_log))
    }

    /// The engine configuration derived from this config.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            agent_wait: RetryParams::new(self.agent_wait_retries, self.agent_wait_seconds),
            requeue: RequeueIntervals {
                short: Duration::from_secs(self.requeue_short_seconds.max(1)),
                long: Duration::from_secs(self.requeue_long_seconds.max(1)),
            },
            scale_down: ScaleDownPolicy {
                disable_processes: self.scale_down_disable_processes,
            },
            cluster_domain: self.cluster_domain.clone(),
        }
    }

    /// The management plane version reported to the engine.
    pub fn management_version(&self) -> ManagementVersion {
        ManagementVersion {
            version: self.management_version.clone(),
            cloud: self.management_cloud,
        }
    }

    fn default_cluster_domain() -> String {
        "cluster.local".into()
    }

    fn default_management_version() -> String {
        "6.0.0".into()
    }

    fn default_agent_wait_retries() -> u32 {
        5
    }

    fn default_agent_wait_seconds() -> u64 {
        3
    }

    fn default_requeue_short_seconds() -> u64 {
        10
    }

    fn default_requeue_long_seconds() -> u64 {
        24 * 60 * 60
    }

    /// Parse a dotted management plane version such as `6.0.11`.
    fn parse_management_version<'de, D: Deserializer<'de>>(val: D) -> Result<String, D::Error> {
        let version: String = Deserialize::deserialize(val).map_err(|err| DeError::custom(format!("error parsing MANAGEMENT_VERSION: {}", err)))?;
        let parsed = ManagementVersion {
            version: version.clone(),
            cloud: false,
        };
        match parsed.major_minor() {
            Some(_) => Ok(version),
            None => Err(DeError::custom(format!("invalid MANAGEMENT_VERSION {:?}, expected a dotted version", version))),
        }
    }
}
