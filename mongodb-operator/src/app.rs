use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::k8s::resources::K8sResources;
use crate::k8s::store::SecretDocumentStore;
use crate::k8s::Controller;
use mongodb_core::ConvergenceDriver;

/// The application object of the operator.
///
/// Wires the convergence engine to its Kubernetes-backed collaborators and runs the controller
/// until a signal arrives or the controller stops on its own.
pub struct App {
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// The join handle of the K8s controller.
    controller: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;

        let store = Arc::new(SecretDocumentStore::new(client.clone(), &config));
        let resources = Arc::new(K8sResources::new(client.clone()));
        let engine_config = config.to_engine_config();
        tracing::debug!(?engine_config, "convergence engine configured");
        let driver = Arc::new(ConvergenceDriver::new(store, resources.clone(), resources.clone(), resources, engine_config));

        let controller = Controller::new(client, config, driver, shutdown_tx.clone()).spawn();
        Ok(Self {
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            controller,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        let stopped_early = tokio::select! {
            Some((_, sig)) = signals.next() => {
                tracing::info!(signal = ?sig, "signal received, stopping reconciliation");
                None
            }
            _ = self.shutdown_rx.next() => None,
            res = &mut self.controller => Some(res),
        };
        let _ = self.shutdown_tx.send(());

        // A controller which stopped on its own has nothing left to drain.
        let res = match stopped_early {
            Some(res) => {
                tracing::error!("k8s controller stopped unexpectedly");
                res
            }
            None => self.controller.await,
        };
        res.context("error joining k8s controller handle")?.context("error from k8s controller")?;
        tracing::info!("MongoDB Operator stopped");
        Ok(())
    }
}
