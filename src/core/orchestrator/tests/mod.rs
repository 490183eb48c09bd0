mod state_machine;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::error::ApiError;
use crate::core::inventory::{ClusterInventory, InventoryRecord};
use crate::core::playbook::{Launched, PlaybookLauncher};
use crate::core::secrets::SecretSource;
use crate::core::store::{ClusterLock, DbLock, Store};

use super::{Orchestrator, OrchestratorConfig};

pub(crate) enum InventoryBehavior {
    Found,
    Missing,
    Unavailable,
}

pub(crate) struct FakeInventory {
    behavior: InventoryBehavior,
    pub lookups: AtomicUsize,
}

impl FakeInventory {
    pub fn new(behavior: InventoryBehavior) -> Self {
        Self {
            behavior,
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClusterInventory for FakeInventory {
    async fn lookup(&self, _name: &str) -> Result<Option<InventoryRecord>, ApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            InventoryBehavior::Found => Ok(Some(InventoryRecord {
                id: Some(serde_json::json!(42)),
                metadata: serde_json::json!({"region": "eu-west-1"}),
            })),
            InventoryBehavior::Missing => Ok(None),
            InventoryBehavior::Unavailable => {
                Err(ApiError::external("inventory", "Inventory API timed out"))
            }
        }
    }

    async fn health(&self) -> Result<(), String> {
        Ok(())
    }
}

pub(crate) enum SecretBehavior {
    WithKubeconfig,
    MissingKey,
    Unavailable,
}

pub(crate) struct FakeSecrets {
    behavior: SecretBehavior,
}

impl FakeSecrets {
    pub fn new(behavior: SecretBehavior) -> Self {
        Self { behavior }
    }
}

#[async_trait]
impl SecretSource for FakeSecrets {
    async fn read_secret(&self, _path: &str) -> Result<HashMap<String, String>, ApiError> {
        match self.behavior {
            SecretBehavior::WithKubeconfig => Ok(HashMap::from([
                ("kubeconfig".to_string(), "dmF1bHQ=".to_string()),
                ("token".to_string(), "s.vault-token".to_string()),
            ])),
            SecretBehavior::MissingKey => {
                Ok(HashMap::from([("other".to_string(), "x".to_string())]))
            }
            SecretBehavior::Unavailable => Err(ApiError::external("vault", "connection refused")),
        }
    }

    async fn health(&self) -> Result<(), String> {
        Ok(())
    }
}

pub(crate) struct FakeRunner {
    pub launches: Mutex<Vec<(String, Vec<(String, String)>)>>,
    fail: bool,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl PlaybookLauncher for FakeRunner {
    async fn launch(
        &self,
        playbook_name: &str,
        extra_vars: &[(String, String)],
    ) -> Result<Launched, ApiError> {
        if self.fail {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "Failed to start ansible-playbook"
            )));
        }
        self.launches
            .lock()
            .await
            .push((playbook_name.to_string(), extra_vars.to_vec()));
        Ok(Launched {
            pid: Some(4321),
            command: format!("ansible-playbook /playbooks/{}", playbook_name),
            exit: None,
        })
    }
}

/// Wraps the real DB lock, counting acquisitions so tests can assert that
/// validation failures never reach the lock.
pub(crate) struct CountingLock {
    inner: DbLock,
    pub acquires: AtomicUsize,
}

impl CountingLock {
    pub fn new(store: &Store) -> Self {
        Self {
            inner: DbLock::new(store.get_db()),
            acquires: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClusterLock for CountingLock {
    async fn acquire(&self, key: &str, wait: Duration, ttl: Duration) -> crate::core::error::Result<bool> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire(key, wait, ttl).await
    }

    async fn release(&self, key: &str) -> crate::core::error::Result<()> {
        self.inner.release(key).await
    }
}

pub(crate) struct Harness {
    pub store: Store,
    pub lock: Arc<CountingLock>,
    pub inventory: Arc<FakeInventory>,
    pub runner: Arc<FakeRunner>,
    pub orchestrator: Orchestrator,
}

pub(crate) fn harness_with(
    inventory: FakeInventory,
    secrets: FakeSecrets,
    runner: FakeRunner,
) -> Harness {
    let store = Store::open_in_memory().expect("store");
    let lock = Arc::new(CountingLock::new(&store));
    let inventory = Arc::new(inventory);
    let runner = Arc::new(runner);
    let orchestrator = Orchestrator::new(
        store.clone(),
        lock.clone(),
        inventory.clone(),
        Arc::new(secrets),
        runner.clone(),
        OrchestratorConfig {
            lock_wait: Duration::from_millis(50),
            lock_ttl: Duration::from_secs(600),
        },
    );
    Harness {
        store,
        lock,
        inventory,
        runner,
        orchestrator,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(
        FakeInventory::new(InventoryBehavior::Found),
        FakeSecrets::new(SecretBehavior::WithKubeconfig),
        FakeRunner::new(),
    )
}
