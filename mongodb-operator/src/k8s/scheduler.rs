//! Reconciliation passes driven by the controller.
//!
//! ## Overview
//! Every change to a resource's spec, and every elapsed requeue interval, becomes a scheduler
//! task. Tasks are processed one at a time, so at most one pass per resource is ever in flight.
//! A pass runs the convergence engine against the cached object, writes the resulting status
//! through the status subresource and schedules the next pass after the interval reported by the
//! engine.
//!
//! ## Requeues
//! Each completed pass issues a fresh requeue ticket for its resource. A requeue task whose ticket
//! is no longer the latest one is dropped, so spec changes arriving between two requeues never
//! leave a trail of redundant passes behind.

use std::sync::Arc;

use anyhow::{Context, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use serde_json::json;
use tokio::time::timeout;

use crate::k8s::{Controller, API_TIMEOUT, APP_NAME, RESCHEDULE_TIMEOUT};
use mongodb_core::crd::{MongoDB, MongoDBStatus, MongoDBUser, MongoDBUserStatus, RequiredMetadata};
use mongodb_core::workflow::Status;

/// A scheduling task to be performed.
#[derive(Debug)]
#[allow(clippy::large_enum_variant)] // Arcs vs deleted objects.
pub enum SchedulerTask {
    MongoDBUpdated(Arc<String>),
    MongoDBRequeue(Arc<String>, u64),
    MongoDBDeleted(Arc<String>, MongoDB),
    UserUpdated(Arc<String>),
    UserRequeue(Arc<String>, u64),
    UserDeleted(Arc<String>, MongoDBUser),
}

impl Controller {
    /// Handle scheduler tasks.
    pub(super) async fn handle_scheduler_task(&mut self, task: SchedulerTask) {
        match task {
            SchedulerTask::MongoDBUpdated(name) => self.scheduler_mongodb_updated(name).await,
            SchedulerTask::MongoDBRequeue(name, ticket) => {
                if self.mongodb_requeues.get(&name) == Some(&ticket) {
                    self.scheduler_mongodb_updated(name).await;
                }
            }
            SchedulerTask::MongoDBDeleted(name, mdb) => self.scheduler_mongodb_deleted(name, mdb).await,
            SchedulerTask::UserUpdated(name) => self.scheduler_user_updated(name).await,
            SchedulerTask::UserRequeue(name, ticket) => {
                if self.user_requeues.get(&name) == Some(&ticket) {
                    self.scheduler_user_updated(name).await;
                }
            }
            SchedulerTask::UserDeleted(name, user) => self.scheduler_user_deleted(name, user).await,
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// MongoDB Reconciliation ////////////////////////////////////////////////////
impl Controller {
    #[tracing::instrument(level = "debug", skip(self, name), fields(resource = %name))]
    async fn scheduler_mongodb_updated(&mut self, name: Arc<String>) {
        tracing::debug!("handling scheduler mongodb updated");
        let mdb = match self.mongodbs.get(&name) {
            Some(mdb) => mdb.clone(),
            None => return,
        };

        let outcome = self.driver.reconcile(&mdb).await;
        match &outcome.status {
            Status::Ok => tracing::info!(members = outcome.resource_status.members, multi_stage = outcome.multi_stage, "resource reconciled"),
            Status::Failed(_) => {} // Already logged with full context by the engine.
            status => tracing::warn!(phase = %status.phase(), message = status.message().unwrap_or_default(), "resource not reconciled"),
        }

        if mdb.status.as_ref() != Some(&outcome.resource_status) {
            match self.patch_mongodb_status(&mdb, &outcome.resource_status).await {
                Ok(updated) => {
                    self.mongodbs.insert(name.clone(), updated);
                }
                Err(err) => {
                    // The observed member count lives in the status.
                    tracing::error!(error = ?err, "error updating MongoDB status");
                    self.spawn_scheduler_task(SchedulerTask::MongoDBUpdated(name), Some(RESCHEDULE_TIMEOUT));
                    return;
                }
            }
        }

        let ticket = self.issue_ticket();
        self.mongodb_requeues.insert(name.clone(), ticket);
        tracing::debug!(requeue_after = ?outcome.requeue_after, "requeueing resource");
        self.spawn_scheduler_task(SchedulerTask::MongoDBRequeue(name, ticket), Some(outcome.requeue_after));
    }

    #[tracing::instrument(level = "debug", skip(self, name, mdb), fields(resource = %name))]
    async fn scheduler_mongodb_deleted(&mut self, name: Arc<String>, mdb: MongoDB) {
        tracing::debug!("handling scheduler mongodb deleted");
        // A resource recreated under the same name owns its entities again.
        if self.mongodbs.contains_key(&name) {
            return;
        }
        if let Err(err) = self.driver.delete(&mdb).await {
            tracing::error!(error = ?err, "error removing deleted resource from automation config");
            self.spawn_scheduler_task(SchedulerTask::MongoDBDeleted(name, mdb), Some(RESCHEDULE_TIMEOUT));
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// MongoDBUser Reconciliation ////////////////////////////////////////////////
impl Controller {
    #[tracing::instrument(level = "debug", skip(self, name), fields(user = %name))]
    async fn scheduler_user_updated(&mut self, name: Arc<String>) {
        tracing::debug!("handling scheduler user updated");
        let user = match self.users.get(&name) {
            Some(user) => user.clone(),
            None => return,
        };

        let outcome = self.driver.reconcile_user(&user).await;
        match &outcome.status {
            Status::Ok => tracing::info!(username = %user.spec.username, db = %user.spec.db, "user reconciled"),
            Status::Failed(_) => {}
            status => tracing::warn!(phase = %status.phase(), message = status.message().unwrap_or_default(), "user not reconciled"),
        }

        if user.status.as_ref() != Some(&outcome.resource_status) {
            match self.patch_user_status(&user, &outcome.resource_status).await {
                Ok(updated) => {
                    self.users.insert(name.clone(), updated);
                }
                Err(err) => {
                    // The applied identity lives in the status.
                    tracing::error!(error = ?err, "error updating MongoDBUser status");
                    self.spawn_scheduler_task(SchedulerTask::UserUpdated(name), Some(RESCHEDULE_TIMEOUT));
                    return;
                }
            }
        }

        let ticket = self.issue_ticket();
        self.user_requeues.insert(name.clone(), ticket);
        self.spawn_scheduler_task(SchedulerTask::UserRequeue(name, ticket), Some(outcome.requeue_after));
    }

    #[tracing::instrument(level = "debug", skip(self, name, user), fields(user = %name))]
    async fn scheduler_user_deleted(&mut self, name: Arc<String>, user: MongoDBUser) {
        tracing::debug!("handling scheduler user deleted");
        if self.users.contains_key(&name) {
            return;
        }
        if let Err(err) = self.driver.delete_user(&user).await {
            tracing::error!(error = ?err, "error removing deleted user from automation config");
            self.spawn_scheduler_task(SchedulerTask::UserDeleted(name, user), Some(RESCHEDULE_TIMEOUT));
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// K8s API Methods ///////////////////////////////////////////////////////////
impl Controller {
    /// Patch the status of the given MongoDB in K8s using Server-Side Apply.
    #[tracing::instrument(level = "debug", skip(self, mdb, status))]
    async fn patch_mongodb_status(&self, mdb: &MongoDB, status: &MongoDBStatus) -> Result<MongoDB> {
        tracing::debug!(name = mdb.name(), phase = %status.phase, "patching MongoDB status");
        let api: Api<MongoDB> = Api::namespaced(self.client.clone(), mdb.namespace());
        let mut params = PatchParams::apply(APP_NAME);
        params.force = true; // This will still be blocked by the server if we do not have the most up-to-date object info.
        let patch = json!({
            "apiVersion": MongoDB::api_version(&()),
            "kind": MongoDB::kind(&()),
            "status": status,
        });
        timeout(API_TIMEOUT, api.patch_status(mdb.name(), &params, &Patch::Apply(&patch)))
            .await
            .context("timeout while updating MongoDB status")?
            .context("error updating MongoDB status")
    }

    /// Patch the status of the given MongoDBUser in K8s using Server-Side Apply.
    #[tracing::instrument(level = "debug", skip(self, user, status))]
    async fn patch_user_status(&self, user: &MongoDBUser, status: &MongoDBUserStatus) -> Result<MongoDBUser> {
        tracing::debug!(name = user.name(), phase = %status.phase, "patching MongoDBUser status");
        let api: Api<MongoDBUser> = Api::namespaced(self.client.clone(), user.namespace());
        let mut params = PatchParams::apply(APP_NAME);
        params.force = true;
        let patch = json!({
            "apiVersion": MongoDBUser::api_version(&()),
            "kind": MongoDBUser::kind(&()),
            "status": status,
        });
        timeout(API_TIMEOUT, api.patch_status(user.name(), &params, &Patch::Apply(&patch)))
            .await
            .context("timeout while updating MongoDBUser status")?
            .context("error updating MongoDBUser status")
    }
}
