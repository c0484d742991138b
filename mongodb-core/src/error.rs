//! Engine error abstractions.

use thiserror::Error;

/// Application error variants.
///
/// These are attached to `anyhow::Error` chains and recovered with `downcast_ref` when a pass maps
/// a failure onto a workflow status.
#[derive(Debug, Error)]
pub enum AppError {
    /// The desired topology conflicts with processes owned by a different resource.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// A desired-state change which is structurally disallowed.
    #[error("{0}")]
    Invalid(String),
    /// The management plane does not support the requested feature.
    #[error("{0}")]
    Unsupported(String),
    /// A collaborator object (secret, configmap, document) does not exist yet.
    #[error("{0} not found")]
    NotFound(String),
    /// A precondition owned by another resource does not hold yet.
    #[error("{0}")]
    Pending(String),
    /// Agents did not reach the expected state within the bounded wait.
    #[error("agents not ready: {0}")]
    AgentsNotReady(String),
    /// A concurrent writer updated the automation config between read and write.
    #[error("the automation config was modified concurrently")]
    Conflict,
}

impl AppError {
    /// Check whether the given error chain carries a `NotFound` error.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<AppError>(), Some(AppError::NotFound(_)))
    }
}
