use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::core::auth::IdentityVerifier;
use crate::core::inventory::ClusterInventory;
use crate::core::secrets::SecretSource;
use crate::core::store::Store;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, serde::Serialize)]
pub struct DependencyHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    fn healthy(started: Instant) -> Self {
        Self {
            status: "healthy",
            latency_ms: Some((started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy",
            latency_ms: None,
            error: Some(error),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub services: Services,
}

#[derive(Debug, serde::Serialize)]
pub struct Services {
    pub database: DependencyHealth,
    pub vault: DependencyHealth,
    pub inventory: DependencyHealth,
    pub identity_provider: DependencyHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.services.database.is_healthy()
            && self.services.vault.is_healthy()
            && self.services.inventory.is_healthy()
            && self.services.identity_provider.is_healthy()
    }
}

async fn timed_check<F>(check: F) -> DependencyHealth
where
    F: Future<Output = Result<(), String>>,
{
    let started = Instant::now();
    match tokio::time::timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => DependencyHealth::healthy(started),
        Ok(Err(e)) => DependencyHealth::unhealthy(e),
        Err(_) => DependencyHealth::unhealthy("health check timed out".to_string()),
    }
}

/// Probe every dependency the request path relies on. Degrades to
/// `unhealthy` when any collaborator fails its check.
pub async fn system_health(
    store: &Store,
    secrets: &Arc<dyn SecretSource>,
    inventory: &Arc<dyn ClusterInventory>,
    verifier: &Arc<IdentityVerifier>,
) -> HealthReport {
    let database = timed_check(async { store.ping().await.map_err(|e| e.to_string()) }).await;
    let vault = timed_check(secrets.health()).await;
    let inventory = timed_check(inventory.health()).await;
    let identity_provider = timed_check(verifier.health()).await;

    let services = Services {
        database,
        vault,
        inventory,
        identity_provider,
    };
    let status = if services.database.is_healthy()
        && services.vault.is_healthy()
        && services.inventory.is_healthy()
        && services.identity_provider.is_healthy()
    {
        "healthy"
    } else {
        "unhealthy"
    };

    HealthReport {
        status,
        timestamp: Utc::now().to_rfc3339(),
        services,
    }
}
