//! The MongoDB operator.

mod app;
mod config;
mod k8s;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Arc::new(Config::new()?);

    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the configured RUST_LOG directives.
        .with(cfg.env_filter()?)
        // Send a copy of all spans to stdout in compact form.
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_ansi(true))
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    tracing::info!(
        namespace = %cfg.namespace,
        automation_config_secret = %cfg.automation_config_secret,
        management_version = %cfg.management_version,
        "starting MongoDB Operator",
    );
    let res = App::new(cfg).await?.spawn().await.context("error joining app handle").and_then(|res| res);
    if let Err(err) = &res {
        tracing::error!(error = ?err, "MongoDB Operator failed");
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}
