//! MongoDB CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns

mod mongodb;
#[cfg(test)]
mod mongodb_test;
mod user;

use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use mongodb::{
    AgentAuthentication, AuthMode, Authentication, ConfigMapKeyRef, Connectivity, LdapSpec, MemberConfig, MongoDB, MongoDBSpec,
    MongoDBStatus, PrometheusSpec, ResourceType, Security, TlsSpec,
};
pub use user::{MongoDBResourceRef, MongoDBUser, MongoDBUserSpec, MongoDBUserStatus};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;
}

impl RequiredMetadata for MongoDB {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

impl RequiredMetadata for MongoDBUser {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

/// The lifecycle phase reported in resource status.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    Pending,
    Failed,
    Running,
    Unsupported,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Pending => "Pending",
                Self::Failed => "Failed",
                Self::Running => "Running",
                Self::Unsupported => "Unsupported",
            }
        )
    }
}

/// A reference to a key of a secret in the resource's namespace.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    #[serde(default = "SecretKeyRef::default_key")]
    pub key: String,
}

impl SecretKeyRef {
    fn default_key() -> String {
        "password".into()
    }
}

impl Default for SecretKeyRef {
    fn default() -> Self {
        Self {
            name: String::new(),
            key: Self::default_key(),
        }
    }
}
