//! Kubernetes controller.
//!
//! This controller observes `MongoDB` and `MongoDBUser` resources, caches them, and runs a
//! convergence pass of the engine whenever a resource's spec changes or its requeue interval
//! elapses. Passes run one at a time on the controller task, so a resource never has two passes
//! in flight.

mod data;
pub mod resources;
mod scheduler;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::prelude::*;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use crate::config::Config;
use crate::k8s::scheduler::SchedulerTask;
use mongodb_core::crd::{MongoDB, MongoDBUser};
use mongodb_core::ConvergenceDriver;

/// The app name used by the operator.
const APP_NAME: &str = "mongodb-operator";
/// The timeout duration used before rescheduling a failed scheduler task.
const RESCHEDULE_TIMEOUT: Duration = Duration::from_secs(5);
/// The default timeout to use for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(5);

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// Kubernetes controller for watching MongoDB CRs.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// The engine driving resources toward their desired state.
    driver: Arc<ConvergenceDriver>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// A channel of scheduler tasks.
    scheduler_tasks_tx: mpsc::Sender<SchedulerTask>,
    /// A channel of scheduler tasks.
    scheduler_tasks_rx: ReceiverStream<SchedulerTask>,

    /// All known MongoDB objects in the watched namespace.
    mongodbs: HashMap<Arc<String>, MongoDB>,
    /// All known MongoDBUser objects in the watched namespace.
    users: HashMap<Arc<String>, MongoDBUser>,
    /// The latest requeue ticket issued per MongoDB object. Older tickets are dropped on arrival.
    mongodb_requeues: HashMap<Arc<String>, u64>,
    /// The latest requeue ticket issued per MongoDBUser object.
    user_requeues: HashMap<Arc<String>, u64>,
    /// The next requeue ticket.
    next_ticket: u64,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, driver: Arc<ConvergenceDriver>, shutdown_tx: broadcast::Sender<()>) -> Self {
        let (scheduler_tasks_tx, scheduler_tasks_rx) = mpsc::channel(1000);
        Self {
            client,
            config,
            driver,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            scheduler_tasks_tx,
            scheduler_tasks_rx: ReceiverStream::new(scheduler_tasks_rx),
            mongodbs: Default::default(),
            users: Default::default(),
            mongodb_requeues: Default::default(),
            user_requeues: Default::default(),
            next_ticket: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        // Build watcher streams.
        let params_spec = ListParams::default();
        let mongodbs: Api<MongoDB> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let mongodbs_watcher = watcher(mongodbs, params_spec.clone());
        let users: Api<MongoDBUser> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let users_watcher = watcher(users, params_spec);
        tokio::pin!(mongodbs_watcher, users_watcher);

        tracing::info!("k8s controller initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = mongodbs_watcher.next() => self.handle_mongodb_event(k8s_event_res).await,
                Some(k8s_event_res) = users_watcher.next() => self.handle_user_event(k8s_event_res).await,
                Some(scheduler_task) = self.scheduler_tasks_rx.next() => self.handle_scheduler_task(scheduler_task).await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    /// Spawn a task which emits a new scheduler task, optionally after a delay.
    ///
    /// This indirection keeps the scheduler queue bounded without blocking the controller when
    /// the queue is full: pending sends pile up as tasks on the runtime instead.
    fn spawn_scheduler_task(&self, task: SchedulerTask, delay: Option<Duration>) {
        let tx = self.scheduler_tasks_tx.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _res = tx.send(task).await;
        });
    }

    /// Issue a new requeue ticket.
    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.next_ticket
    }
}

/// Check whether the given K8s error is a 404.
fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Check whether the given K8s error is a 409.
fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}
