//! Secrets, configmaps and StatefulSets read or updated on behalf of the engine.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use serde_json::json;
use tokio::time::timeout;

use crate::k8s::{is_not_found, API_TIMEOUT};
use mongodb_core::certs::MountedVolumes;
use mongodb_core::error::AppError;
use mongodb_core::store::{ConfigMapReader, SecretReader, Workload, WorkloadUpdater};

/// The pod template annotation rolled whenever mounted certificates change.
pub const ANNOTATION_CERTIFICATE_HASH: &str = "mongodb.com/certificate-hash";
/// The pod volume holding the member certificates.
pub const VOLUME_TLS_SECRET: &str = "tls-secret";
/// The pod volume holding the CA bundle.
pub const VOLUME_TLS_CA: &str = "tls-ca";
/// The pod volume holding the agent client certificates.
pub const VOLUME_AGENT_CERTS: &str = "agent-certs";

/// K8s collaborators of the engine.
pub struct K8sResources {
    client: Client,
}

impl K8sResources {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let res = timeout(API_TIMEOUT, api.get(name)).await.context("timeout while fetching StatefulSet")?;
        match res {
            Ok(sts) => Ok(Some(sts)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context("error fetching StatefulSet"),
        }
    }
}

#[async_trait]
impl SecretReader for K8sResources {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let res = timeout(API_TIMEOUT, api.get(name)).await.context("timeout while fetching secret")?;
        let secret = match res {
            Ok(secret) => secret,
            Err(err) if is_not_found(&err) => return Err(AppError::NotFound(format!("secret {}/{}", namespace, name)).into()),
            Err(err) => return Err(err).context("error fetching secret"),
        };
        let mut data = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(value.0).with_context(|| format!("key {} of secret {}/{} is not valid UTF-8", key, namespace, name))?;
            data.insert(key, value);
        }
        data.extend(secret.string_data.unwrap_or_default());
        Ok(data)
    }
}

#[async_trait]
impl ConfigMapReader for K8sResources {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn read_config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let res = timeout(API_TIMEOUT, api.get(name)).await.context("timeout while fetching configmap")?;
        match res {
            Ok(config_map) => Ok(config_map.data.unwrap_or_default()),
            Err(err) if is_not_found(&err) => Err(AppError::NotFound(format!("configmap {}/{}", namespace, name)).into()),
            Err(err) => Err(err).context("error fetching configmap"),
        }
    }
}

#[async_trait]
impl WorkloadUpdater for K8sResources {
    async fn mounted_volumes(&self, namespace: &str, name: &str) -> Result<Option<MountedVolumes>> {
        Ok(self.get_statefulset(namespace, name).await?.map(|sts| mounted_volumes(&sts)))
    }

    #[tracing::instrument(level = "debug", skip(self, workload), fields(workload = %workload.name))]
    async fn update_workload(&self, namespace: &str, workload: &Workload) -> Result<()> {
        let sts = match self.get_statefulset(namespace, &workload.name).await? {
            Some(sts) => sts,
            None => return Err(AppError::NotFound(format!("StatefulSet {}/{}", namespace, workload.name)).into()),
        };
        let replicas = sts.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let hash = certificate_hash_annotation(&sts);
        let wanted_hash = workload.certificate_hash.as_deref();
        if replicas == workload.replicas as i32 && (wanted_hash.is_none() || hash == wanted_hash) {
            return Ok(());
        }

        tracing::info!(replicas = workload.replicas, certificate_hash = ?wanted_hash, "patching StatefulSet");
        let mut patch = json!({"spec": {"replicas": workload.replicas}});
        if let Some(wanted_hash) = wanted_hash {
            patch["spec"]["template"] = json!({"metadata": {"annotations": {ANNOTATION_CERTIFICATE_HASH: wanted_hash}}});
        }
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        timeout(API_TIMEOUT, api.patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await
            .context("timeout while patching StatefulSet")?
            .context("error patching StatefulSet")?;
        Ok(())
    }
}

/// Inspect which security material the pods of `sts` mount.
fn mounted_volumes(sts: &StatefulSet) -> MountedVolumes {
    let spec = sts.spec.as_ref();
    let volumes: Vec<&str> = spec
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.volumes.as_ref())
        .map(|volumes| volumes.iter().map(|v| v.name.as_str()).collect())
        .unwrap_or_default();
    MountedVolumes {
        tls_secret: volumes.contains(&VOLUME_TLS_SECRET),
        ca_config_map: volumes.contains(&VOLUME_TLS_CA),
        agent_certs: volumes.contains(&VOLUME_AGENT_CERTS),
        replicas: spec.and_then(|spec| spec.replicas).unwrap_or(1).max(0) as u32,
    }
}

fn certificate_hash_annotation(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.annotations.as_ref())
        .and_then(|annotations| annotations.get(ANNOTATION_CERTIFICATE_HASH))
        .map(String::as_str)
}
