use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::Config;
use crate::core::error::ApiError;

/// What the inventory service knows about a registered cluster; passed
/// through to the playbook untouched.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct InventoryRecord {
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Confirms a cluster name is a pre-registered target before creation is
/// allowed.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// `Ok(None)` means the inventory answered 404: the name is not
    /// registered. Every other non-200 outcome is an external-service error
    /// tagged `inventory`.
    async fn lookup(&self, name: &str) -> Result<Option<InventoryRecord>, ApiError>;

    async fn health(&self) -> Result<(), String>;
}

pub struct InventoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl InventoryClient {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.inventory_api_url.clone(), config.inventory_timeout)
    }

    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ClusterInventory for InventoryClient {
    async fn lookup(&self, name: &str) -> Result<Option<InventoryRecord>, ApiError> {
        let url = format!("{}/clusters/{}", self.base_url.trim_end_matches('/'), name);
        debug!(cluster = %name, "Checking inventory registration");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::external("inventory", e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status != StatusCode::OK {
            return Err(ApiError::external(
                "inventory",
                format!("Inventory API returned status {}", status.as_u16()),
            ));
        }
        let record: InventoryRecord = response
            .json()
            .await
            .map_err(|e| ApiError::external("inventory", e.to_string()))?;
        Ok(Some(record))
    }

    async fn health(&self) -> Result<(), String> {
        let response = self
            .http
            .get(self.base_url.trim_end_matches('/'))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_server_error() {
            Err(format!(
                "Inventory API returned status {}",
                response.status().as_u16()
            ))
        } else {
            Ok(())
        }
    }
}
