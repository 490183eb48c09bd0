use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::error::ApiError;
use crate::core::inventory::ClusterInventory;
use crate::core::model::{Cluster, ClusterStatus, ExecutionStatus, PlaybookExecution};
use crate::core::playbook::PlaybookLauncher;
use crate::core::secrets::SecretSource;
use crate::core::store::{ClusterLock, Store};
use crate::core::validation::{CreateClusterRequest, UpdateServiceAccountRequest};

pub const CREATE_PLAYBOOK: &str = "create_cluster.yml";
pub const UPDATE_SERVICE_ACCOUNT_PLAYBOOK: &str = "update_service_account.yml";

/// Vault path holding shared cluster credentials for service-account updates.
const CLUSTER_CONFIG_SECRET: &str = "kubernetes/cluster-config";

/// Per-request provisioning lifecycle for one cluster name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionState {
    Absent,
    LockHeld,
    Validating,
    ProvisioningRecord,
    Launching,
    Launched,
    Failed,
}

impl ProvisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionState::Absent => "absent",
            ProvisionState::LockHeld => "lock_held",
            ProvisionState::Validating => "validating",
            ProvisionState::ProvisioningRecord => "provisioning_record",
            ProvisionState::Launching => "launching",
            ProvisionState::Launched => "launched",
            ProvisionState::Failed => "failed",
        }
    }
}

pub fn can_transition(from: ProvisionState, to: ProvisionState) -> bool {
    // Any state before launch may fail terminally.
    if to == ProvisionState::Failed {
        return from != ProvisionState::Launched && from != ProvisionState::Failed;
    }
    match from {
        ProvisionState::Absent => to == ProvisionState::LockHeld,
        ProvisionState::LockHeld => to == ProvisionState::Validating,
        ProvisionState::Validating => to == ProvisionState::ProvisioningRecord,
        ProvisionState::ProvisioningRecord => to == ProvisionState::Launching,
        ProvisionState::Launching => to == ProvisionState::Launched,
        ProvisionState::Launched | ProvisionState::Failed => false,
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ClusterCreated {
    pub cluster: Cluster,
    pub execution: PlaybookExecution,
}

#[derive(Debug, serde::Serialize)]
pub struct ClusterStatusView {
    pub name: String,
    pub status: ClusterStatus,
    pub created_at: String,
    pub updated_at: String,
    pub service_account: String,
    pub playbook_status: Option<ExecutionStatus>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub lock_wait: Duration,
    pub lock_ttl: Duration,
}

/// Ties the collaborators together: validate, lock, check inventory, resolve
/// credentials, persist, launch, unlock. Collaborators come in through
/// narrow trait objects so tests can substitute doubles.
pub struct Orchestrator {
    store: Store,
    lock: Arc<dyn ClusterLock>,
    inventory: Arc<dyn ClusterInventory>,
    secrets: Arc<dyn SecretSource>,
    runner: Arc<dyn PlaybookLauncher>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        lock: Arc<dyn ClusterLock>,
        inventory: Arc<dyn ClusterInventory>,
        secrets: Arc<dyn SecretSource>,
        runner: Arc<dyn PlaybookLauncher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            lock,
            inventory,
            secrets,
            runner,
            config,
        }
    }

    fn advance(&self, name: &str, from: ProvisionState, to: ProvisionState) -> ProvisionState {
        debug_assert!(can_transition(from, to), "{:?} -> {:?}", from, to);
        debug!(cluster = %name, from = from.as_str(), to = to.as_str(), "Provision state");
        to
    }

    /// Create (or force-recreate) a cluster record and start provisioning.
    /// Every outcome, success or failure, leaves an audit entry.
    pub async fn create_cluster(
        &self,
        user_id: &str,
        req: CreateClusterRequest,
    ) -> Result<ClusterCreated, ApiError> {
        let result = self.create_inner(&req).await;
        match &result {
            Ok(created) => {
                let mut details = format!("Created cluster {}", req.name);
                if req.force {
                    details.push_str(" (force=true)");
                }
                self.audit(
                    user_id,
                    "create_cluster",
                    &details,
                    "success",
                    Some(created.cluster.id),
                )
                .await;
            }
            Err(e) => {
                self.audit(
                    user_id,
                    "create_cluster",
                    &format!("Failed to create cluster {}: {}", req.name, e),
                    "error",
                    None,
                )
                .await;
            }
        }
        result
    }

    async fn create_inner(&self, req: &CreateClusterRequest) -> Result<ClusterCreated, ApiError> {
        // Everything client-fixable is rejected before the lock is taken or
        // any external service is touched.
        req.validate()?;

        let mut state = ProvisionState::Absent;
        let acquired = self
            .lock
            .acquire(&req.name, self.config.lock_wait, self.config.lock_ttl)
            .await?;
        if !acquired {
            return Err(ApiError::Conflict(format!(
                "Cluster {} creation already in progress",
                req.name
            )));
        }
        state = self.advance(&req.name, state, ProvisionState::LockHeld);

        let outcome = self.create_locked(req, &mut state).await;

        if outcome.is_err() {
            self.advance(&req.name, state, ProvisionState::Failed);
        }
        // The lock is released on every path, success or failure.
        if let Err(e) = self.lock.release(&req.name).await {
            warn!(cluster = %req.name, "Failed to release creation lock: {}", e);
        }
        outcome
    }

    async fn create_locked(
        &self,
        req: &CreateClusterRequest,
        state: &mut ProvisionState,
    ) -> Result<ClusterCreated, ApiError> {
        *state = self.advance(&req.name, *state, ProvisionState::Validating);

        if let Some(existing) = self.store.get_cluster_by_name(&req.name).await? {
            if !req.force {
                return Err(ApiError::Conflict(format!(
                    "Cluster {} already exists. Use force=true to recreate",
                    req.name
                )));
            }
            warn!(cluster = %req.name, "Force recreating existing cluster");
            self.store.delete_cluster_for_recreate(existing.id).await?;
        }

        // Creation requires the name to be pre-registered in inventory.
        let record = self.inventory.lookup(&req.name).await?.ok_or_else(|| {
            ApiError::NotFound(format!("Cluster {} not found in inventory", req.name))
        })?;

        let kubeconfig = match (&req.kubeconfig, &req.kubeconfig_vault_path) {
            (Some(inline), None) => inline.clone(),
            (None, Some(path)) => {
                let secret = self.secrets.read_secret(path).await?;
                secret.get("kubeconfig").cloned().ok_or_else(|| {
                    ApiError::Validation(format!("No kubeconfig found at Vault path: {}", path))
                })?
            }
            // Guarded by validate(); kept as a hard failure rather than a panic.
            _ => {
                return Err(ApiError::Validation(
                    "Exactly one kubeconfig source must be provided".to_string(),
                ));
            }
        };

        *state = self.advance(&req.name, *state, ProvisionState::ProvisioningRecord);

        let mut extra_vars: Vec<(String, String)> = vec![
            ("cluster_name".to_string(), req.name.clone()),
            ("service_account".to_string(), req.service_account.clone()),
            ("namespace".to_string(), req.namespace.clone()),
            ("kubeconfig".to_string(), kubeconfig),
            ("force".to_string(), req.force.to_string()),
            // Overwrite tracks the force flag.
            ("overwrite".to_string(), req.force.to_string()),
        ];
        if let Some(id) = &record.id {
            extra_vars.push(("inventory_id".to_string(), json_to_plain(id)));
        }
        if !record.metadata.is_null() {
            extra_vars.push((
                "inventory_metadata".to_string(),
                record.metadata.to_string(),
            ));
        }

        let cluster = self
            .store
            .insert_cluster(
                &req.name,
                &req.service_account,
                &req.namespace,
                ClusterStatus::Creating,
            )
            .await?;
        let extra_vars_json = serialize_extra_vars(&extra_vars);
        let mut execution = self
            .store
            .insert_execution(cluster.id, CREATE_PLAYBOOK, &extra_vars_json)
            .await?;

        *state = self.advance(&req.name, *state, ProvisionState::Launching);

        let launched = self.runner.launch(CREATE_PLAYBOOK, &extra_vars).await?;
        self.store
            .mark_execution_launched(execution.id, &launched.command, launched.pid)
            .await?;
        execution.command = Some(launched.command);
        execution.pid = launched.pid;
        if let Some(exit) = launched.exit {
            spawn_reaper(self.store.clone(), execution.id, exit);
        }

        *state = self.advance(&req.name, *state, ProvisionState::Launched);
        info!(cluster = %req.name, execution_id = execution.id, "Cluster provisioning started");

        Ok(ClusterCreated { cluster, execution })
    }

    /// Change the service account on an existing cluster and run the
    /// matching playbook against it.
    pub async fn update_service_account(
        &self,
        user_id: &str,
        req: UpdateServiceAccountRequest,
    ) -> Result<PlaybookExecution, ApiError> {
        let result = self.update_inner(&req).await;
        match &result {
            Ok(execution) => {
                self.audit(
                    user_id,
                    "update_service_account",
                    &format!("Updated service account for cluster {}", req.cluster_name),
                    "success",
                    Some(execution.cluster_id),
                )
                .await;
            }
            Err(e) => {
                self.audit(
                    user_id,
                    "update_service_account",
                    &format!(
                        "Failed to update service account for cluster {}: {}",
                        req.cluster_name, e
                    ),
                    "error",
                    None,
                )
                .await;
            }
        }
        result
    }

    async fn update_inner(
        &self,
        req: &UpdateServiceAccountRequest,
    ) -> Result<PlaybookExecution, ApiError> {
        req.validate()?;

        let cluster = self
            .store
            .get_cluster_by_name(&req.cluster_name)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Cluster {} not found", req.cluster_name)))?;

        // The shared cluster credentials must be readable before anything is
        // mutated; the playbook authenticates with them.
        let secret = self.secrets.read_secret(CLUSTER_CONFIG_SECRET).await?;

        self.store
            .update_cluster_service_account(cluster.id, &req.service_account)
            .await?;

        let mut extra_vars: Vec<(String, String)> = vec![
            ("cluster_name".to_string(), req.cluster_name.clone()),
            ("service_account".to_string(), req.service_account.clone()),
            // Updates always overwrite the existing binding.
            ("overwrite".to_string(), "true".to_string()),
        ];
        if let Some(token) = secret.get("token") {
            extra_vars.push(("vault_token".to_string(), token.clone()));
        }

        let extra_vars_json = serialize_extra_vars(&extra_vars);
        let mut execution = self
            .store
            .insert_execution(cluster.id, UPDATE_SERVICE_ACCOUNT_PLAYBOOK, &extra_vars_json)
            .await?;

        let launched = self
            .runner
            .launch(UPDATE_SERVICE_ACCOUNT_PLAYBOOK, &extra_vars)
            .await?;
        self.store
            .mark_execution_launched(execution.id, &launched.command, launched.pid)
            .await?;
        execution.command = Some(launched.command);
        execution.pid = launched.pid;
        if let Some(exit) = launched.exit {
            spawn_reaper(self.store.clone(), execution.id, exit);
        }

        info!(cluster = %req.cluster_name, execution_id = execution.id, "Service account update started");
        Ok(execution)
    }

    pub async fn cluster_status(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<ClusterStatusView, ApiError> {
        let result = self.cluster_status_inner(name).await;
        if let Err(e) = &result {
            self.audit(
                user_id,
                "check_status",
                &format!("Failed to check cluster status: {}", e),
                "error",
                None,
            )
            .await;
        }
        result
    }

    async fn cluster_status_inner(&self, name: &str) -> Result<ClusterStatusView, ApiError> {
        let cluster = self
            .store
            .get_cluster_by_name(name)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Cluster {} not found", name)))?;
        let latest = self.store.latest_execution(cluster.id).await?;
        Ok(ClusterStatusView {
            name: cluster.name,
            status: cluster.status,
            created_at: cluster.created_at.to_rfc3339(),
            updated_at: cluster.updated_at.to_rfc3339(),
            service_account: cluster.service_account,
            playbook_status: latest.map(|e| e.status),
        })
    }

    pub async fn all_statuses(&self, user_id: &str) -> Result<Vec<ClusterStatusView>, ApiError> {
        let result = self.all_statuses_inner().await;
        if let Err(e) = &result {
            self.audit(
                user_id,
                "check_status",
                &format!("Failed to check status: {}", e),
                "error",
                None,
            )
            .await;
        }
        result
    }

    async fn all_statuses_inner(&self) -> Result<Vec<ClusterStatusView>, ApiError> {
        let clusters = self.store.list_clusters().await?;
        let mut views = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let latest = self.store.latest_execution(cluster.id).await?;
            views.push(ClusterStatusView {
                name: cluster.name,
                status: cluster.status,
                created_at: cluster.created_at.to_rfc3339(),
                updated_at: cluster.updated_at.to_rfc3339(),
                service_account: cluster.service_account,
                playbook_status: latest.map(|e| e.status),
            });
        }
        Ok(views)
    }

    /// Audit writes must not mask the orchestration outcome; failures are
    /// logged and swallowed.
    async fn audit(
        &self,
        user_id: &str,
        action: &str,
        details: &str,
        status: &str,
        cluster_id: Option<i64>,
    ) {
        if let Err(e) = self
            .store
            .append_audit(user_id, action, details, status, cluster_id)
            .await
        {
            warn!(action = %action, "Failed to write audit entry: {}", e);
        }
    }
}

/// Updates the execution row once the playbook process exits. Runs detached
/// from the request that launched the process.
pub fn spawn_reaper(store: Store, execution_id: i64, exit: oneshot::Receiver<Option<i32>>) {
    tokio::spawn(async move {
        // A dropped sender means the waiter died without observing an exit;
        // the execution stays `running` for an operator to inspect.
        let Ok(code) = exit.await else { return };
        debug!(execution_id, return_code = ?code, "Playbook process exited");
        if let Err(e) = store.complete_execution(execution_id, code).await {
            warn!(execution_id, "Failed to record playbook exit: {}", e);
        }
    });
}

fn json_to_plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn serialize_extra_vars(vars: &[(String, String)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = vars
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests;
