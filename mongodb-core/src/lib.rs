pub mod agents;
pub mod authentication;
pub mod certs;
pub mod config;
pub mod crd;
pub mod deployment;
pub mod driver;
pub mod error;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod prometheus;
pub mod retry;
pub mod scale;
pub mod store;
pub mod topology;
pub mod users;
pub mod workflow;

pub use driver::{ConvergenceDriver, ReconcileOutcome, UserOutcome};
pub use error::AppError;

/// Comma-separated list of canonical label selectors which match the operator's labelling scheme.
pub const OPERATOR_LABEL_SELECTORS: &str = "app=mongodb,mongodb.com/controlled-by=mongodb-operator";
