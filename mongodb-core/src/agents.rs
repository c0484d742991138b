//! Bounded waits on the automation agents.

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::retry::{wait_until, Readiness, RetryParams};
use crate::store::DocumentStore;

/// Read every page of registered agents and collect their hostnames.
pub async fn registered_hostnames(store: &dyn DocumentStore) -> Result<BTreeSet<String>> {
    let mut hostnames = BTreeSet::new();
    let mut page = Some(1);
    while let Some(current) = page {
        let res = store.read_agent_page(current).await.context("error reading registered agents")?;
        hostnames.extend(res.results.into_iter().map(|agent| agent.hostname));
        page = res.next_page;
    }
    Ok(hostnames)
}

/// Wait until an agent is registered for every given hostname.
#[tracing::instrument(level = "debug", skip(store, hostnames, params), fields(hosts = hostnames.len()))]
pub async fn wait_until_registered(store: &dyn DocumentStore, hostnames: &[String], params: RetryParams) -> Result<()> {
    if hostnames.is_empty() {
        return Ok(());
    }
    wait_until(params, "waiting for agents to register", || async move {
        let registered = registered_hostnames(store).await?;
        let missing: Vec<&str> = hostnames.iter().filter(|h| !registered.contains(*h)).map(String::as_str).collect();
        Ok::<_, anyhow::Error>(match missing.is_empty() {
            true => Readiness::Ready,
            false => Readiness::NotReady(format!("agents not registered for {}", missing.join(", "))),
        })
    })
    .await
}

/// Wait until the agents of every given process have reached the current goal version.
#[tracing::instrument(level = "debug", skip(store, process_names, params), fields(processes = process_names.len()))]
pub async fn wait_for_ready_state(store: &dyn DocumentStore, process_names: &[String], params: RetryParams) -> Result<()> {
    if process_names.is_empty() {
        return Ok(());
    }
    wait_until(params, "waiting for agents to reach goal state", || async move {
        let status = store.read_automation_status().await.context("error reading automation status")?;
        let lagging = status.lagging_processes(process_names);
        Ok::<_, anyhow::Error>(match lagging.is_empty() {
            true => Readiness::Ready,
            false => Readiness::NotReady(format!("processes not in goal state: {}", lagging.join(", "))),
        })
    })
    .await
}
