//! Bounded waits on external state.
//!
//! Every wait in the engine is expressed as a `(retries, wait)` pair. Exhausting the retries
//! produces an `AppError::AgentsNotReady` rather than blocking the pass indefinitely.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::error::AppError;

/// Retry parameters for a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryParams {
    /// The number of checks performed before giving up.
    pub retries: u32,
    /// The pause between two checks.
    pub wait: Duration,
}

impl RetryParams {
    pub fn new(retries: u32, wait_seconds: u64) -> Self {
        Self {
            retries,
            wait: Duration::from_secs(wait_seconds),
        }
    }
}

impl Default for RetryParams {
    fn default() -> Self {
        Self::new(5, 3)
    }
}

/// The outcome of a single readiness check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet, with a description of what is still missing.
    NotReady(String),
}

/// Run `check` until it reports ready, sleeping `params.wait` between attempts.
///
/// Errors returned by `check` abort the wait immediately. When all attempts are used up, the last
/// not-ready message is returned as `AppError::AgentsNotReady`.
pub async fn wait_until<F, Fut>(params: RetryParams, operation: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness>>,
{
    let attempts = params.retries.max(1);
    let mut last_msg = String::new();
    for attempt in 1..=attempts {
        match check().await? {
            Readiness::Ready => return Ok(()),
            Readiness::NotReady(msg) => {
                tracing::debug!(operation, attempt, reason = %msg, "not ready yet");
                last_msg = msg;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(params.wait).await;
        }
    }
    tracing::warn!(operation, attempts, reason = %last_msg, "bounded wait exhausted");
    Err(AppError::AgentsNotReady(format!("{}: {}", operation, last_msg)).into())
}
