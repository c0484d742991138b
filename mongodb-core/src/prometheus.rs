//! The Prometheus endpoint exposed by the automation agents.

use sha2::{Digest, Sha256};

use crate::crd::PrometheusSpec;
use crate::deployment::{random_secret, Prometheus};

pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

const SALT_LEN: usize = 16;

/// The salted SHA-256 digest of `password`, base64 encoded.
pub fn password_hash(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    base64::encode(hasher.finalize())
}

/// Build the `prometheus` section for `spec`.
///
/// The salt of `existing` is reused while the username and password are unchanged, so a pass
/// which changes nothing leaves the section untouched.
pub fn desired_prometheus(spec: &PrometheusSpec, password: &str, existing: Option<&Prometheus>) -> Prometheus {
    let salt = match existing {
        Some(current) if current.username == spec.username && password_hash(&current.password_salt, password) == current.password_hash => {
            current.password_salt.clone()
        }
        _ => random_secret(SALT_LEN),
    };
    Prometheus {
        enabled: true,
        username: spec.username.clone(),
        password_hash: password_hash(&salt, password),
        password_salt: salt,
        scheme: if spec.tls_pem_path.is_some() { "https" } else { "http" }.into(),
        tls_pem_path: spec.tls_pem_path.clone(),
        metrics_path: spec.metrics_path.clone().unwrap_or_else(|| DEFAULT_METRICS_PATH.into()),
        listen_address: format!(":{}", spec.port.unwrap_or(DEFAULT_PORT)),
    }
}
