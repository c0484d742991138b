//! Certificate hashing, subject extraction and publish ordering.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::AppError;

/// PEM entries of a certificate bundle, keyed by entry name (usually the pod hostname).
pub type PemBundle = BTreeMap<String, String>;

/// A stable digest over the entries of a PEM bundle.
///
/// The digest does not depend on the order in which entries were collected. It is only used as a
/// change detector which triggers a rolling restart downstream.
pub fn certificate_hash(bundle: &PemBundle) -> String {
    let mut hasher = Sha256::new();
    for (name, pem) in bundle.iter() {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(pem.trim().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Combine a `kubernetes.io/tls` secret into the single PEM file expected by the agents.
pub fn combine_tls_secret(data: &BTreeMap<String, String>) -> Result<String> {
    let crt = data.get("tls.crt").ok_or_else(|| AppError::NotFound("tls.crt entry of the certificate secret".into()))?;
    let key = data.get("tls.key").ok_or_else(|| AppError::NotFound("tls.key entry of the certificate secret".into()))?;
    Ok(format!("{}\n{}", crt.trim_end(), key.trim_end()))
}

/// The RFC 2253 subject of the first certificate found in `pem_data`.
pub fn certificate_subject(pem_data: &str) -> Result<String> {
    let blocks = ::pem::parse_many(pem_data.as_bytes()).context("error parsing PEM data")?;
    let block = blocks
        .iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .ok_or_else(|| AppError::Invalid("no certificate found in PEM data".into()))?;
    let (_, cert) = parse_x509_certificate(block.contents()).map_err(|err| AppError::Invalid(format!("error parsing certificate: {}", err)))?;

    let mut parts = vec![];
    // RFC 2253 lists the most specific RDN first.
    let rdns: Vec<_> = cert.subject().iter_rdn().collect();
    for rdn in rdns.into_iter().rev() {
        for attr in rdn.iter() {
            let oid = attr.attr_type().to_id_string();
            let label = match oid.as_str() {
                "2.5.4.3" => "CN",
                "2.5.4.11" => "OU",
                "2.5.4.10" => "O",
                "2.5.4.7" => "L",
                "2.5.4.8" => "ST",
                "2.5.4.6" => "C",
                "2.5.4.9" => "STREET",
                "0.9.2342.19200300.100.1.25" => "DC",
                "0.9.2342.19200300.100.1.1" => "UID",
                other => other,
            }
            .to_string();
            let value = attr
                .as_str()
                .map_err(|err| AppError::Invalid(format!("unsupported value in certificate subject for {}: {}", label, err)))?;
            parts.push(format!("{}={}", label, escape_rdn_value(value)));
        }
    }
    Ok(parts.join(","))
}

fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Security settings the resource asks for in this pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredSecurity {
    pub tls_enabled: bool,
    pub ca_configured: bool,
    /// The agents authenticate with client certificates.
    pub agents_use_x509: bool,
    pub replicas: u32,
}

/// What the running workload currently mounts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MountedVolumes {
    pub tls_secret: bool,
    pub ca_config_map: bool,
    pub agent_certs: bool,
    pub replicas: u32,
}

/// Decide whether the automation config must be published before the workload is touched.
///
/// True whenever a security requirement is being removed while the material satisfying it is still
/// mounted, or when the workload is scaling down. Agents would otherwise keep waiting for
/// material which no longer exists. A workload which does not exist yet never needs this ordering.
pub fn needs_publish_first(desired: &DesiredSecurity, current: Option<&MountedVolumes>) -> bool {
    let current = match current {
        Some(current) => current,
        None => return false,
    };
    if !desired.tls_enabled && current.tls_secret {
        tracing::debug!("publishing automation config first, TLS is being disabled");
        return true;
    }
    if !desired.ca_configured && current.ca_config_map {
        tracing::debug!("publishing automation config first, CA is being removed");
        return true;
    }
    if !desired.agents_use_x509 && current.agent_certs {
        tracing::debug!("publishing automation config first, agents are moving away from x509");
        return true;
    }
    if desired.replicas < current.replicas {
        tracing::debug!(from = current.replicas, to = desired.replicas, "publishing automation config first, scaling down");
        return true;
    }
    false
}
