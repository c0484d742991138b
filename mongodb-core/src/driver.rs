//! The convergence driver.
//!
//! One call to `ConvergenceDriver::reconcile` runs a full pass for a `MongoDB` resource: validate,
//! plan the next scaling step, gather certificates and credentials, update workloads, merge the
//! resource into the shared automation config with a single read-modify-write, and report the
//! resulting status along with the interval after which the resource must be reconciled again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::agents;
use crate::authentication::{self, AgentSubjects, AuthOptions, LdapAgentUser, TlsState};
use crate::certs::{self, DesiredSecurity, PemBundle};
use crate::config::EngineConfig;
use crate::crd::{
    AgentAuthentication, AuthMode, LdapSpec, MongoDB, MongoDBStatus, MongoDBUser, MongoDBUserStatus, PrometheusSpec, RequiredMetadata,
    ResourceType,
};
use crate::deployment::{Deployment, DesiredReplicaSet, DesiredShardedCluster, Ldap, OptionsOverlay, Process};
use crate::error::AppError;
use crate::prometheus;
use crate::scale::next_member_count;
use crate::store::{ConfigMapReader, DocumentStore, ManagementVersion, SecretReader, Workload, WorkloadUpdater};
use crate::topology::{self, ShardedCounts};
use crate::users::{self, DesiredUser};
use crate::workflow::Status;

/// The oldest management plane release able to run the automation config written here.
pub const MINIMUM_MANAGEMENT_VERSION: (u64, u64) = (5, 0);
/// The secret holding the agents' client certificates, unless overridden on the resource.
pub const DEFAULT_AGENT_CERTS_SECRET: &str = "agent-certs";
pub const AUTOMATION_AGENT_CERT_KEY: &str = "mms-automation-agent-pem";
pub const MONITORING_AGENT_CERT_KEY: &str = "mms-monitoring-agent-pem";
pub const BACKUP_AGENT_CERT_KEY: &str = "mms-backup-agent-pem";
/// The configmap key holding a custom CA bundle.
pub const CA_KEY: &str = "ca-pem";

const LDAP_DEFAULT_TRANSPORT_SECURITY: &str = "tls";
const LDAP_DEFAULT_TIMEOUT_MS: u32 = 10_000;
const LDAP_DEFAULT_CACHE_INVALIDATION_INTERVAL: u32 = 30;

/// The result of a reconciliation pass over a `MongoDB` resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileOutcome {
    pub status: Status,
    /// The status to write back to the resource.
    pub resource_status: MongoDBStatus,
    pub requeue_after: Duration,
    /// An authentication change was deferred to a later pass.
    pub multi_stage: bool,
}

/// The result of a reconciliation pass over a `MongoDBUser` resource.
#[derive(Clone, Debug, PartialEq)]
pub struct UserOutcome {
    pub status: Status,
    pub resource_status: MongoDBUserStatus,
    pub requeue_after: Duration,
}

/// Drives resources toward their desired state in the shared automation config.
pub struct ConvergenceDriver {
    store: Arc<dyn DocumentStore>,
    secrets: Arc<dyn SecretReader>,
    config_maps: Arc<dyn ConfigMapReader>,
    workloads: Arc<dyn WorkloadUpdater>,
    config: EngineConfig,
}

/// The member counts applied by one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ScalePlan {
    members: u32,
    sharded: ShardedCounts,
    needs_another_pass: bool,
    /// Processes leaving their topology in this pass, keyed by replica set. Mongos processes
    /// belong to no replica set.
    leaving: Vec<(Option<String>, BTreeSet<String>)>,
}

/// The desired topology of one resource.
enum DesiredTopology {
    ReplicaSet(DesiredReplicaSet),
    ShardedCluster(DesiredShardedCluster),
    Standalone(Process),
}

impl DesiredTopology {
    fn processes(&self) -> Vec<&Process> {
        match self {
            Self::ReplicaSet(rs) => rs.processes.iter().collect(),
            Self::ShardedCluster(sc) => sc
                .shards
                .iter()
                .chain(std::iter::once(&sc.config_server))
                .flat_map(|rs| rs.processes.iter())
                .chain(sc.mongos.iter())
                .collect(),
            Self::Standalone(process) => vec![process],
        }
    }

    fn process_names(&self) -> Vec<String> {
        self.processes().into_iter().map(|p| p.name.clone()).collect()
    }

    fn hostnames(&self) -> Vec<String> {
        self.processes().into_iter().map(|p| p.hostname.clone()).collect()
    }

    fn merge(&self, deployment: &mut Deployment, previous_additional: &OptionsOverlay) -> Result<Vec<String>> {
        match self {
            Self::ReplicaSet(rs) => deployment.merge_replica_set(rs, previous_additional),
            Self::ShardedCluster(sc) => deployment.merge_sharded_cluster(sc, previous_additional),
            Self::Standalone(process) => deployment.merge_standalone(process, previous_additional).map(|_| vec![]),
        }
    }
}

impl ConvergenceDriver {
    pub fn new(
        store: Arc<dyn DocumentStore>, secrets: Arc<dyn SecretReader>, config_maps: Arc<dyn ConfigMapReader>, workloads: Arc<dyn WorkloadUpdater>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            secrets,
            config_maps,
            workloads,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one reconciliation pass for the given resource.
    #[tracing::instrument(level = "debug", skip(self, mdb), fields(resource = %mdb.name(), namespace = %mdb.namespace()))]
    pub async fn reconcile(&self, mdb: &MongoDB) -> ReconcileOutcome {
        let previous = mdb.status.clone().unwrap_or_default();
        let plan = scale_plan(mdb);
        let mut warnings = vec![];

        let (status, multi_stage) = match self.converge(mdb, &plan, &mut warnings).await {
            Ok(multi_stage) => (Status::Ok, multi_stage),
            Err(err) => {
                let status = Status::from_error(&err);
                match &status {
                    Status::Failed(_) => tracing::error!(error = ?err, "reconciliation pass failed"),
                    _ => tracing::info!(phase = %status.phase(), error = %format!("{:#}", err), "reconciliation pass did not complete"),
                }
                (status, false)
            }
        };
        let requeue_after = status.requeue_after(&self.config.requeue, plan.needs_another_pass || multi_stage);

        let mut resource_status = previous;
        resource_status.phase = status.phase();
        resource_status.message = status.message().map(String::from);
        resource_status.warnings = warnings;
        if status.is_ok() {
            resource_status.members = plan.members;
            resource_status.shard_count = plan.sharded.shard_count;
            resource_status.mongods_per_shard_count = plan.sharded.mongods_per_shard;
            resource_status.config_server_count = plan.sharded.config_servers;
            resource_status.mongos_count = plan.sharded.mongos;
            resource_status.last_applied_type = Some(mdb.spec.resource_type);
            resource_status.last_applied_additional_mongod_config = mdb.spec.additional_mongod_config.clone();
            resource_status.last_applied_spec_hash = Some(mdb.spec.spec_hash());
            resource_status.observed_generation = mdb.metadata.generation;
            tracing::info!(members = plan.members, multi_stage, requeue_after = ?requeue_after, "reconciliation pass complete");
        }
        ReconcileOutcome {
            status,
            resource_status,
            requeue_after,
            multi_stage,
        }
    }

    /// Run the fallible steps of a pass. Returns true when an authentication change was deferred.
    async fn converge(&self, mdb: &MongoDB, plan: &ScalePlan, warnings: &mut Vec<String>) -> Result<bool> {
        let name = mdb.name();
        let namespace = mdb.namespace();
        warnings.extend(mdb.spec.validate(mdb.status.as_ref()).context("error validating resource")?);

        let version = self.check_management_version().await?;
        let prometheus_auth = self.prometheus_password(mdb, &version, warnings).await?;
        let desired = desired_topology(mdb, plan, &self.config.cluster_domain);
        let workloads = self.desired_workloads(mdb, plan).await?;
        let auth_opts = self.auth_options(mdb).await?;
        let publish_first = self.needs_publish_first(mdb, &workloads).await?;

        self.prepare_scale_down(&plan.leaving).await?;
        if !publish_first {
            self.update_workloads(namespace, &workloads).await?;
            agents::wait_until_registered(self.store.as_ref(), &desired.hostnames(), self.config.agent_wait)
                .await
                .context("error waiting for agents to register")?;
        }

        // Authentication changes require every process of this resource to be in goal state.
        let current = self.store.read_deployment().await.context("error reading automation config")?;
        let running: Vec<String> = desired.process_names().into_iter().filter(|n| current.process(n).is_some()).collect();
        agents::wait_for_ready_state(self.store.as_ref(), &running, self.config.agent_wait)
            .await
            .context("error waiting for processes to reach goal state")?;

        let previous_additional = mdb
            .status
            .as_ref()
            .and_then(|s| s.last_applied_additional_mongod_config.as_ref())
            .map(OptionsOverlay::flatten)
            .unwrap_or_default();
        let hostnames = desired.hostnames();
        let tls_enabled = mdb.spec.is_tls_enabled();
        let roles = mdb.spec.roles();
        let mut multi_stage = false;
        let mut mutator = |deployment: &mut Deployment| -> Result<()> {
            let tls = TlsState::of(deployment);
            let removed = desired.merge(deployment, &previous_additional)?;
            if !removed.is_empty() {
                tracing::info!(removed = ?removed, "removing processes no longer part of the resource");
            }
            let outcome = authentication::reconcile(deployment, &auth_opts, tls)?;
            multi_stage = outcome.multi_stage;
            deployment.add_monitoring_and_backup(&hostnames, tls_enabled);
            if let Some((spec, password)) = prometheus_auth.as_ref() {
                deployment.prometheus = Some(prometheus::desired_prometheus(spec, password, deployment.prometheus.as_ref()));
            }
            if !roles.is_empty() {
                deployment.ensure_roles(roles);
            }
            Ok(())
        };
        let deployment = self
            .store
            .read_update_deployment(&mut mutator)
            .await
            .context("error updating automation config")?;

        if publish_first {
            self.update_workloads(namespace, &workloads).await?;
        }

        let desired_names: BTreeSet<String> = desired.process_names().into_iter().collect();
        let excess = topology::excess_processes(&deployment, name, mdb.spec.resource_type == ResourceType::ShardedCluster, &desired_names);
        if !excess.is_empty() {
            tracing::warn!(excess = ?excess, "automation config holds processes of a previous resource with the same name");
            warnings.push(format!(
                "The automation config contains processes which are not part of this resource and may belong to an earlier resource with the same name: {}",
                excess.join(", ")
            ));
        }
        Ok(multi_stage)
    }

    /// Reject management planes which are too old, and fail on versions which do not parse.
    async fn check_management_version(&self) -> Result<ManagementVersion> {
        let version = self.store.read_version().await.context("error reading management plane version")?;
        if version.cloud {
            return Ok(version);
        }
        match version.major_minor() {
            Some(found) if found < MINIMUM_MANAGEMENT_VERSION => bail!(AppError::Unsupported(format!(
                "management plane version {} is not supported, the minimum is {}.{}",
                version.version, MINIMUM_MANAGEMENT_VERSION.0, MINIMUM_MANAGEMENT_VERSION.1
            ))),
            Some(_) => Ok(version),
            None => bail!("unable to parse management plane version {:?}", version.version),
        }
    }

    async fn prometheus_password<'a>(
        &self, mdb: &'a MongoDB, version: &ManagementVersion, warnings: &mut Vec<String>,
    ) -> Result<Option<(&'a PrometheusSpec, String)>> {
        let spec = match mdb.spec.prometheus.as_ref() {
            Some(spec) => spec,
            None => return Ok(None),
        };
        if !version.supports_prometheus() {
            tracing::warn!(version = %version.version, "prometheus is not supported by the management plane, skipping");
            warnings.push(format!("Prometheus is not supported by management plane version {}, spec.prometheus is ignored", version.version));
            return Ok(None);
        }
        let secret = &spec.password_secret_ref;
        let password = self
            .secrets
            .read_secret_key(mdb.namespace(), &secret.name, &secret.key)
            .await
            .context("error reading prometheus password")?;
        Ok(Some((spec, password)))
    }

    /// The workloads of the resource, with their certificate hash.
    async fn desired_workloads(&self, mdb: &MongoDB, plan: &ScalePlan) -> Result<Vec<Workload>> {
        let name = mdb.name();
        let mut workloads = match mdb.spec.resource_type {
            ResourceType::ReplicaSet => vec![Workload {
                name: name.to_string(),
                replicas: plan.members,
                certificate_hash: None,
            }],
            ResourceType::Standalone => vec![Workload {
                name: name.to_string(),
                replicas: 1,
                certificate_hash: None,
            }],
            ResourceType::ShardedCluster => topology::sharded_workloads(name, &plan.sharded, None),
        };
        let hash = self.certificate_hash(mdb, &workloads).await?;
        workloads.iter_mut().for_each(|w| w.certificate_hash = hash.clone());
        Ok(workloads)
    }

    async fn certificate_hash(&self, mdb: &MongoDB, workloads: &[Workload]) -> Result<Option<String>> {
        if !mdb.spec.is_tls_enabled() {
            return Ok(None);
        }
        let namespace = mdb.namespace();
        let prefix = mdb
            .spec
            .security
            .as_ref()
            .and_then(|s| s.cert_secret_prefix.as_deref())
            .map(|prefix| format!("{}-", prefix))
            .unwrap_or_default();
        let mut bundle = PemBundle::new();
        for workload in workloads {
            let secret = format!("{}{}-cert", prefix, workload.name);
            let data = self
                .secrets
                .read_secret(namespace, &secret)
                .await
                .with_context(|| format!("error reading certificate secret {}", secret))?;
            bundle.insert(workload.name.clone(), certs::combine_tls_secret(&data)?);
        }
        if let Some(ca) = mdb.spec.tls_ca() {
            let pem = self
                .config_maps
                .read_config_map_key(namespace, ca, CA_KEY)
                .await
                .with_context(|| format!("error reading CA configmap {}", ca))?;
            bundle.insert(CA_KEY.into(), pem);
        }
        Ok(Some(certs::certificate_hash(&bundle)))
    }

    /// Resolve the resource's authentication settings, reading every referenced secret.
    async fn auth_options(&self, mdb: &MongoDB) -> Result<AuthOptions> {
        let auth = match mdb.spec.authentication() {
            Some(auth) => auth,
            None => return Ok(AuthOptions::default()),
        };
        let namespace = mdb.namespace();
        let agent_mode = mdb.spec.agent_mode();
        let mut opts = AuthOptions {
            configured: true,
            enabled: auth.enabled,
            modes: auth.modes.clone(),
            agent_mode,
            major_version: mdb.spec.major_version()?,
            authoritative_set: !auth.ignore_unknown_users,
            require_client_certificates: auth.require_client_tls_authentication,
            agent_subjects: self.agent_subjects(namespace, auth.agents.as_ref()).await?,
            ldap: None,
            ldap_agent: None,
            delete_users: false,
        };
        if !auth.enabled {
            return Ok(opts);
        }
        if auth.modes.contains(&AuthMode::Ldap) {
            if let Some(ldap) = auth.ldap.as_ref() {
                opts.ldap = Some(self.ldap_settings(namespace, ldap).await?);
            }
        }
        if agent_mode == Some(AuthMode::Ldap) {
            opts.ldap_agent = Some(self.ldap_agent(namespace, auth.agents.as_ref()).await?);
        }
        Ok(opts)
    }

    /// Read the agents' client certificate subjects. A missing secret yields no subjects.
    async fn agent_subjects(&self, namespace: &str, agents: Option<&AgentAuthentication>) -> Result<AgentSubjects> {
        let secret = agents
            .and_then(|a| a.client_certificate_secret_ref.as_deref())
            .unwrap_or(DEFAULT_AGENT_CERTS_SECRET);
        let data = match self.secrets.read_secret(namespace, secret).await {
            Ok(data) => data,
            Err(err) if AppError::is_not_found(&err) => {
                tracing::debug!(secret, "agent certificate secret not found");
                return Ok(AgentSubjects::default());
            }
            Err(err) => return Err(err.context("error reading agent certificates")),
        };
        let subject = |key: &str| -> Result<Option<String>> {
            data.get(key)
                .map(|pem| certs::certificate_subject(pem).with_context(|| format!("error reading subject of {}", key)))
                .transpose()
        };
        Ok(AgentSubjects {
            automation: subject(AUTOMATION_AGENT_CERT_KEY)?,
            monitoring: subject(MONITORING_AGENT_CERT_KEY)?,
            backup: subject(BACKUP_AGENT_CERT_KEY)?,
        })
    }

    async fn ldap_settings(&self, namespace: &str, spec: &LdapSpec) -> Result<Ldap> {
        let secret = &spec.bind_query_password_secret_ref;
        // Retried on the next pass rather than reported as a missing prerequisite.
        let bind_query_password = self
            .secrets
            .read_secret_key(namespace, &secret.name, &secret.key)
            .await
            .map_err(|err| anyhow!("error reading LDAP bind query password: {:#}", err))?;
        let ca_file_contents = match spec.ca_config_map_ref.as_ref() {
            Some(ca) => Some(
                self.config_maps
                    .read_config_map_key(namespace, &ca.name, &ca.key)
                    .await
                    .context("error reading LDAP CA")?,
            ),
            None => None,
        };
        Ok(Ldap {
            servers: spec.servers.join(","),
            transport_security: spec.transport_security.clone().unwrap_or_else(|| LDAP_DEFAULT_TRANSPORT_SECURITY.into()),
            validate_ldap_server_config: spec.validate_ldap_server_config,
            bind_method: "simple".into(),
            bind_query_user: spec.bind_query_user.clone(),
            bind_query_password,
            bind_sasl_mechanisms: None,
            ca_file_contents,
            authz_query_template: spec.authz_query_template.clone(),
            user_to_dn_mapping: spec.user_to_dn_mapping.clone(),
            timeout_ms: spec.timeout_ms.unwrap_or(LDAP_DEFAULT_TIMEOUT_MS),
            user_cache_invalidation_interval: spec.user_cache_invalidation_interval.unwrap_or(LDAP_DEFAULT_CACHE_INVALIDATION_INTERVAL),
        })
    }

    async fn ldap_agent(&self, namespace: &str, agents: Option<&AgentAuthentication>) -> Result<LdapAgentUser> {
        let missing = || AppError::Invalid("automationUserName and automationPasswordSecretRef are required when agents use LDAP".into());
        let agents = agents.ok_or_else(missing)?;
        let username = agents.automation_user_name.clone().ok_or_else(missing)?;
        let secret = agents.automation_password_secret_ref.as_ref().ok_or_else(missing)?;
        let password = self
            .secrets
            .read_secret_key(namespace, &secret.name, &secret.key)
            .await
            .context("error reading automation agent LDAP password")?;
        Ok(LdapAgentUser {
            username,
            password,
            group_dn: agents.automation_ldap_group_dn.clone(),
        })
    }

    async fn needs_publish_first(&self, mdb: &MongoDB, workloads: &[Workload]) -> Result<bool> {
        let security = DesiredSecurity {
            tls_enabled: mdb.spec.is_tls_enabled(),
            ca_configured: mdb.spec.tls_ca().is_some(),
            agents_use_x509: mdb.spec.is_auth_enabled() && mdb.spec.agent_mode() == Some(AuthMode::X509),
            replicas: 0,
        };
        for workload in workloads {
            let mounted = self
                .workloads
                .mounted_volumes(mdb.namespace(), &workload.name)
                .await
                .with_context(|| format!("error reading workload {}", workload.name))?;
            let desired = DesiredSecurity {
                replicas: workload.replicas,
                ..security.clone()
            };
            if certs::needs_publish_first(&desired, mounted.as_ref()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Unvote the members about to be removed, persist, and wait for the agents to apply it.
    async fn prepare_scale_down(&self, leaving: &[(Option<String>, BTreeSet<String>)]) -> Result<()> {
        if leaving.is_empty() {
            return Ok(());
        }
        let disable = self.config.scale_down.disable_processes;
        let mut mutator = |deployment: &mut Deployment| -> Result<()> {
            for (rs, names) in leaving.iter() {
                if let Some(rs) = rs {
                    deployment.mark_rs_members_unvoted(rs, names);
                }
                if disable {
                    deployment.disable_processes(names);
                }
            }
            Ok(())
        };
        self.store
            .read_update_deployment(&mut mutator)
            .await
            .context("error persisting scale down pre-step")?;
        let names: Vec<String> = leaving.iter().flat_map(|(_, names)| names.iter().cloned()).collect();
        tracing::info!(processes = ?names, disable, "members marked for removal");
        agents::wait_for_ready_state(self.store.as_ref(), &names, self.config.agent_wait)
            .await
            .context("error waiting for scale down pre-step")
    }

    async fn update_workloads(&self, namespace: &str, workloads: &[Workload]) -> Result<()> {
        for workload in workloads {
            self.workloads
                .update_workload(namespace, workload)
                .await
                .with_context(|| format!("error updating workload {}", workload.name))?;
            tracing::debug!(workload = %workload.name, replicas = workload.replicas, "workload updated");
        }
        Ok(())
    }

    /// Remove everything the resource owns from the automation config.
    ///
    /// Authentication is reset once no process is left in the document.
    #[tracing::instrument(level = "debug", skip(self, mdb), fields(resource = %mdb.name(), namespace = %mdb.namespace()))]
    pub async fn delete(&self, mdb: &MongoDB) -> Result<()> {
        let name = mdb.name();
        let resource_type = mdb.spec.resource_type;
        let mut mutator = |deployment: &mut Deployment| -> Result<()> {
            let removed = match resource_type {
                ResourceType::ReplicaSet => deployment.remove_replica_set(name),
                ResourceType::ShardedCluster => deployment.remove_sharded_cluster(name),
                ResourceType::Standalone => {
                    let found = deployment.process(name).is_some();
                    deployment.remove_processes(&std::iter::once(name.to_string()).collect());
                    found
                }
            };
            if !removed {
                tracing::debug!("resource not present in the automation config");
            }
            if deployment.processes.is_empty() && deployment.auth.is_enabled() {
                tracing::info!("no processes left, resetting authentication");
                let reset = AuthOptions {
                    configured: true,
                    delete_users: true,
                    ..Default::default()
                };
                let tls = TlsState::of(deployment);
                authentication::reconcile(deployment, &reset, tls)?;
            }
            Ok(())
        };
        self.store
            .read_update_deployment(&mut mutator)
            .await
            .context("error removing resource from automation config")?;
        tracing::info!("resource removed from automation config");
        Ok(())
    }

    /// Run one reconciliation pass for a database user.
    #[tracing::instrument(level = "debug", skip(self, user), fields(user = %user.name(), namespace = %user.namespace()))]
    pub async fn reconcile_user(&self, user: &MongoDBUser) -> UserOutcome {
        let status = match self.apply_user(user).await {
            Ok(()) => Status::Ok,
            Err(err) => {
                let status = Status::from_error(&err);
                match &status {
                    Status::Failed(_) => tracing::error!(error = ?err, "user reconciliation failed"),
                    _ => tracing::info!(phase = %status.phase(), error = %format!("{:#}", err), "user reconciliation did not complete"),
                }
                status
            }
        };
        let mut resource_status = user.status.clone().unwrap_or_default();
        resource_status.phase = status.phase();
        resource_status.message = status.message().map(String::from);
        if status.is_ok() {
            resource_status.username = Some(user.spec.username.clone());
            resource_status.db = Some(user.spec.db.clone());
        }
        let requeue_after = status.requeue_after(&self.config.requeue, false);
        UserOutcome {
            status,
            resource_status,
            requeue_after,
        }
    }

    async fn apply_user(&self, user: &MongoDBUser) -> Result<()> {
        let desired = self.desired_user(user).await?;
        let previous = user
            .status
            .as_ref()
            .and_then(|s| s.username.as_deref().zip(s.db.as_deref()));
        let mut mutator = |deployment: &mut Deployment| users::apply_user(deployment, &desired, previous);
        self.store
            .read_update_deployment(&mut mutator)
            .await
            .context("error updating user in automation config")?;
        Ok(())
    }

    async fn desired_user(&self, user: &MongoDBUser) -> Result<DesiredUser> {
        let spec = &user.spec;
        let password = match spec.is_external() {
            true => None,
            false => {
                let secret = spec
                    .password_secret_key_ref
                    .as_ref()
                    .ok_or_else(|| AppError::Invalid(format!("user {} requires spec.passwordSecretKeyRef", spec.username)))?;
                let password = self
                    .secrets
                    .read_secret_key(user.namespace(), &secret.name, &secret.key)
                    .await
                    .context("error reading user password")?;
                Some(password)
            }
        };
        Ok(DesiredUser {
            username: spec.username.clone(),
            database: spec.db.clone(),
            roles: spec.roles.clone(),
            password,
        })
    }

    /// Remove a database user, under both its current and its last applied identity.
    #[tracing::instrument(level = "debug", skip(self, user), fields(user = %user.name(), namespace = %user.namespace()))]
    pub async fn delete_user(&self, user: &MongoDBUser) -> Result<()> {
        let mut identities = vec![(user.spec.username.clone(), user.spec.db.clone())];
        if let Some((username, db)) = user.status.as_ref().and_then(|s| s.username.clone().zip(s.db.clone())) {
            if !identities.contains(&(username.clone(), db.clone())) {
                identities.push((username, db));
            }
        }
        let mut mutator = |deployment: &mut Deployment| -> Result<()> {
            for (username, db) in identities.iter() {
                deployment.auth.remove_user(username, db);
            }
            Ok(())
        };
        self.store
            .read_update_deployment(&mut mutator)
            .await
            .context("error removing user from automation config")?;
        Ok(())
    }
}

/// Move every component of the resource one step toward its desired size.
fn scale_plan(mdb: &MongoDB) -> ScalePlan {
    let last = mdb.status.clone().unwrap_or_default();
    let name = mdb.name();
    match mdb.spec.resource_type {
        ResourceType::Standalone => ScalePlan {
            members: 1,
            ..Default::default()
        },
        ResourceType::ReplicaSet => {
            let step = next_member_count(mdb.spec.members, last.members);
            let mut leaving = vec![];
            if step.is_scaling_down(last.members) {
                leaving.push((Some(name.to_string()), leaving_pods(name, step.next, last.members)));
            }
            ScalePlan {
                members: step.next,
                sharded: ShardedCounts::default(),
                needs_another_pass: step.needs_another_pass,
                leaving,
            }
        }
        ResourceType::ShardedCluster => {
            let desired = ShardedCounts::from_spec(&mdb.spec);
            let per_shard = next_member_count(desired.mongods_per_shard, last.mongods_per_shard_count);
            let config_servers = next_member_count(desired.config_servers, last.config_server_count);
            let mongos = next_member_count(desired.mongos, last.mongos_count);

            let mut leaving = vec![];
            if per_shard.is_scaling_down(last.mongods_per_shard_count) {
                for idx in 0..desired.shard_count.min(last.shard_count) {
                    let shard = topology::shard_name(name, idx);
                    let pods = leaving_pods(&shard, per_shard.next, last.mongods_per_shard_count);
                    leaving.push((Some(shard), pods));
                }
            }
            if config_servers.is_scaling_down(last.config_server_count) {
                let config = topology::config_server_name(name);
                let pods = leaving_pods(&config, config_servers.next, last.config_server_count);
                leaving.push((Some(config), pods));
            }
            if mongos.is_scaling_down(last.mongos_count) {
                leaving.push((None, leaving_pods(&topology::mongos_name(name), mongos.next, last.mongos_count)));
            }
            ScalePlan {
                members: 0,
                sharded: ShardedCounts {
                    shard_count: desired.shard_count,
                    mongods_per_shard: per_shard.next,
                    config_servers: config_servers.next,
                    mongos: mongos.next,
                },
                needs_another_pass: per_shard.needs_another_pass || config_servers.needs_another_pass || mongos.needs_another_pass,
                leaving,
            }
        }
    }
}

fn leaving_pods(set_name: &str, next: u32, last: u32) -> BTreeSet<String> {
    (next..last).map(|idx| format!("{}-{}", set_name, idx)).collect()
}

fn desired_topology(mdb: &MongoDB, plan: &ScalePlan, cluster_domain: &str) -> DesiredTopology {
    let cluster_domain = mdb.spec.cluster_domain.as_deref().unwrap_or(cluster_domain);
    match mdb.spec.resource_type {
        ResourceType::ReplicaSet => DesiredTopology::ReplicaSet(topology::desired_replica_set(mdb, plan.members, cluster_domain)),
        ResourceType::ShardedCluster => DesiredTopology::ShardedCluster(topology::desired_sharded_cluster(mdb, &plan.sharded, cluster_domain)),
        ResourceType::Standalone => DesiredTopology::Standalone(topology::desired_standalone(mdb, cluster_domain)),
    }
}
