//! Engine tuning knobs.
//!
//! The engine itself never reads the environment. Binaries build an `EngineConfig` from their own
//! runtime config and hand it to the driver.

use std::time::Duration;

use crate::retry::RetryParams;

/// The requeue interval used while more work is pending.
pub const DEFAULT_REQUEUE_SHORT: Duration = Duration::from_secs(10);
/// The requeue interval used once a resource has fully converged.
pub const DEFAULT_REQUEUE_LONG: Duration = Duration::from_secs(24 * 60 * 60);

/// Requeue intervals returned by every reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeueIntervals {
    pub short: Duration,
    pub long: Duration,
}

impl Default for RequeueIntervals {
    fn default() -> Self {
        Self {
            short: DEFAULT_REQUEUE_SHORT,
            long: DEFAULT_REQUEUE_LONG,
        }
    }
}

/// Policy applied to members which are about to be removed by a scale down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScaleDownPolicy {
    /// Also mark the removed processes as `disabled` before the member count is reduced.
    pub disable_processes: bool,
}

/// Runtime configuration of the convergence engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Bounded wait used for agent registration and goal state checks.
    pub agent_wait: RetryParams,
    pub requeue: RequeueIntervals,
    pub scale_down: ScaleDownPolicy,
    /// The cluster domain used to build process hostnames.
    pub cluster_domain: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_wait: RetryParams::default(),
            requeue: RequeueIntervals::default(),
            scale_down: ScaleDownPolicy::default(),
            cluster_domain: "cluster.local".into(),
        }
    }
}
