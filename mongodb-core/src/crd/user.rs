//! MongoDBUser CRD.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Phase, SecretKeyRef};
use crate::deployment::{RoleRef, EXTERNAL_DB};

pub type MongoDBUser = MongoDBUserCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the MongoDBUser resource.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "MongoDBUserCRD",
    status = "MongoDBUserStatus",
    group = "mongodb.com",
    version = "v1",
    kind = "MongoDBUser",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "mdbu",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Username","type":"string","jsonPath":".spec.username"}"#,
    printcolumn = r#"{"name":"Database","type":"string","jsonPath":".spec.db"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBUserSpec {
    pub username: String,
    pub db: String,
    /// The secret holding the user's password. Not used for `$external` users.
    #[serde(default)]
    pub password_secret_key_ref: Option<SecretKeyRef>,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    /// The MongoDB resource this user belongs to.
    pub mongodb_resource_ref: MongoDBResourceRef,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct MongoDBResourceRef {
    pub name: String,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBUserStatus {
    #[serde(default)]
    pub phase: Phase,
    /// The username applied by the last successful pass.
    #[serde(default)]
    pub username: Option<String>,
    /// The database applied by the last successful pass.
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl MongoDBUserSpec {
    /// Users in `$external` are authenticated by x509 or LDAP and carry no password.
    pub fn is_external(&self) -> bool {
        self.db == EXTERNAL_DB
    }
}
