use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use pxbackup_runner::config::Config;
use pxbackup_runner::core::auth::IdentityVerifier;
use pxbackup_runner::core::inventory::{ClusterInventory, InventoryClient};
use pxbackup_runner::core::orchestrator::{Orchestrator, OrchestratorConfig};
use pxbackup_runner::core::playbook::{AnsibleRunner, PlaybookLauncher};
use pxbackup_runner::core::secrets::{SecretSource, VaultClient};
use pxbackup_runner::core::store::{ClusterLock, DbLock, Store};
use pxbackup_runner::interfaces::web::{ApiServer, AppState};
use pxbackup_runner::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config);
    info!(
        database = %config.database_path.display(),
        playbooks = %config.playbooks_dir.display(),
        "Starting pxbackup-runner"
    );

    let store = Store::open(&config.database_path)
        .map_err(|e| anyhow::anyhow!("Cannot open database: {}", e))?;

    let verifier = Arc::new(IdentityVerifier::from_config(&config));
    let secrets: Arc<dyn SecretSource> = Arc::new(VaultClient::from_config(&config));
    let inventory: Arc<dyn ClusterInventory> = Arc::new(InventoryClient::from_config(&config));
    let runner: Arc<dyn PlaybookLauncher> =
        Arc::new(AnsibleRunner::new(config.playbooks_dir.clone()));
    let lock: Arc<dyn ClusterLock> = Arc::new(DbLock::new(store.get_db()));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        lock,
        inventory.clone(),
        secrets.clone(),
        runner,
        OrchestratorConfig {
            lock_wait: config.lock_wait,
            lock_ttl: config.lock_ttl,
        },
    ));

    let state = AppState {
        orchestrator,
        verifier,
        store,
        secrets,
        inventory,
    };

    ApiServer::new(state, &config).serve().await
}
