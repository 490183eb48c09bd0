use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::core::error::ApiError;

/// Narrow interface over the secret store so the orchestrator can take a
/// test double.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Read the secret map at `path`. Transport and non-2xx failures are
    /// external-service errors tagged `vault`.
    async fn read_secret(&self, path: &str) -> Result<HashMap<String, String>, ApiError>;

    async fn health(&self) -> Result<(), String>;
}

/// Vault KV v2 client over plain HTTP. The token comes from a local token
/// file when configured, falling back to the environment-supplied value.
pub struct VaultClient {
    addr: String,
    mount: String,
    token_file: Option<PathBuf>,
    token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, serde::Deserialize)]
struct KvData {
    data: HashMap<String, String>,
}

impl VaultClient {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.vault_addr.clone(),
            config.vault_mount.clone(),
            config.vault_token_file.clone(),
            config.vault_token.clone(),
        )
    }

    pub fn new(
        addr: String,
        mount: String,
        token_file: Option<PathBuf>,
        token: Option<String>,
    ) -> Self {
        Self {
            addr,
            mount,
            token_file,
            token,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn resolve_token(&self) -> Result<String, ApiError> {
        if let Some(path) = &self.token_file {
            let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                ApiError::external("vault", format!("Cannot read token file: {}", e))
            })?;
            return Ok(token.trim().to_string());
        }
        self.token
            .clone()
            .ok_or_else(|| ApiError::external("vault", "No vault token configured"))
    }
}

#[async_trait]
impl SecretSource for VaultClient {
    async fn read_secret(&self, path: &str) -> Result<HashMap<String, String>, ApiError> {
        let token = self.resolve_token().await?;
        let url = format!(
            "{}/v1/{}/data/{}",
            self.addr.trim_end_matches('/'),
            self.mount,
            path.trim_start_matches('/')
        );
        debug!(path = %path, "Reading secret from vault");

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|e| ApiError::external("vault", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::external(
                "vault",
                format!("Vault returned status {}", status.as_u16()),
            ));
        }

        let body: KvReadResponse = response
            .json()
            .await
            .map_err(|e| ApiError::external("vault", e.to_string()))?;
        Ok(body.data.data)
    }

    async fn health(&self) -> Result<(), String> {
        let url = format!("{}/v1/sys/health", self.addr.trim_end_matches('/'));
        let response = self.http.get(&url).send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!(
                "Vault returned status {}",
                response.status().as_u16()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_a_vault_error() {
        let client = VaultClient::new(
            "http://localhost:8200".to_string(),
            "secret".to_string(),
            None,
            None,
        );
        let err = client.read_secret("clusters/demo").await.unwrap_err();
        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR_VAULT");
    }

    #[tokio::test]
    async fn token_file_wins_over_env_token() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "file-token\n").unwrap();
        let client = VaultClient::new(
            "http://localhost:8200".to_string(),
            "secret".to_string(),
            Some(token_path),
            Some("env-token".to_string()),
        );
        assert_eq!(client.resolve_token().await.unwrap(), "file-token");
    }

    #[tokio::test]
    async fn unreadable_token_file_is_a_vault_error() {
        let client = VaultClient::new(
            "http://localhost:8200".to_string(),
            "secret".to_string(),
            Some(PathBuf::from("/nonexistent/token")),
            Some("env-token".to_string()),
        );
        let err = client.resolve_token().await.unwrap_err();
        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR_VAULT");
    }
}
