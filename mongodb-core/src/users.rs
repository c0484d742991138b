//! Database users declared through `MongoDBUser` resources.

use anyhow::{bail, Result};

use crate::authentication::{compute_creds, creds_match, ScramVariant};
use crate::deployment::{Deployment, MongoDbUser, RoleRef, ScramCreds, EXTERNAL_DB};
use crate::error::AppError;

/// A user as requested by its resource, with the password already read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredUser {
    pub username: String,
    pub database: String,
    pub roles: Vec<RoleRef>,
    /// None for `$external` users.
    pub password: Option<String>,
}

impl DesiredUser {
    pub fn is_external(&self) -> bool {
        self.database == EXTERNAL_DB
    }
}

/// Build the document entry of a user.
///
/// Existing SCRAM credentials are kept as long as they still match the password, so an unchanged
/// user produces an unchanged document.
pub fn build_user(desired: &DesiredUser, existing: Option<&MongoDbUser>) -> Result<MongoDbUser> {
    let mut user = MongoDbUser {
        username: desired.username.clone(),
        database: desired.database.clone(),
        roles: desired.roles.clone(),
        authentication_restrictions: existing.map(|u| u.authentication_restrictions.clone()).unwrap_or_default(),
        mechanisms: vec![],
        scram_sha1_creds: None,
        scram_sha256_creds: None,
    };
    if desired.is_external() {
        return Ok(user);
    }
    let password = match desired.password.as_deref() {
        Some(password) => password,
        None => bail!(AppError::Invalid(format!("user {} requires a password", desired.username))),
    };
    user.scram_sha1_creds = Some(creds_for(
        ScramVariant::Sha1,
        &desired.username,
        password,
        existing.and_then(|u| u.scram_sha1_creds.as_ref()),
    )?);
    user.scram_sha256_creds = Some(creds_for(
        ScramVariant::Sha256,
        &desired.username,
        password,
        existing.and_then(|u| u.scram_sha256_creds.as_ref()),
    )?);
    Ok(user)
}

fn creds_for(variant: ScramVariant, username: &str, password: &str, existing: Option<&ScramCreds>) -> Result<ScramCreds> {
    if let Some(existing) = existing {
        if creds_match(existing, variant, username, password)? {
            return Ok(existing.clone());
        }
    }
    compute_creds(variant, username, password)
}

/// Add or update a user in the document.
///
/// When the user's identity changed since the last pass, the previous identity is removed
/// explicitly. Users are only accepted while authentication is enabled.
pub fn apply_user(deployment: &mut Deployment, desired: &DesiredUser, previous: Option<(&str, &str)>) -> Result<()> {
    if !deployment.auth.is_enabled() {
        bail!(AppError::Pending("authentication is not enabled on the deployment".into()));
    }
    if let Some((username, database)) = previous {
        if username != desired.username || database != desired.database {
            tracing::info!(from = %username, to = %desired.username, "user identity changed, removing previous user");
            deployment.auth.remove_user(username, database);
        }
    }
    let existing = deployment.auth.user(&desired.username, &desired.database).cloned();
    let user = build_user(desired, existing.as_ref())?;
    deployment.auth.upsert_user(user);
    Ok(())
}
