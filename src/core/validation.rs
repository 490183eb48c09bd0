use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;

use crate::core::error::ApiError;

/// DNS-label shape shared by cluster names, service accounts and namespaces.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("valid name regex"));

const NAME_MIN: usize = 3;
const NAME_MAX: usize = 63;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub service_account: String,
    pub namespace: String,
    /// Base64-encoded kubeconfig. Exactly one of this and
    /// `kubeconfig_vault_path` must be supplied.
    pub kubeconfig: Option<String>,
    pub kubeconfig_vault_path: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UpdateServiceAccountRequest {
    pub cluster_name: String,
    pub service_account: String,
}

/// Rejects empty/oversized names, anything outside the DNS-label alphabet,
/// and consecutive hyphens. The `--` check is the guard against smuggling
/// option-looking values into the playbook command line.
fn validate_name(field: &str, value: &str) -> Result<(), ApiError> {
    if value.len() < NAME_MIN || value.len() > NAME_MAX {
        return Err(ApiError::Validation(format!(
            "{} must be between {} and {} characters",
            field, NAME_MIN, NAME_MAX
        )));
    }
    if value.contains("--") {
        return Err(ApiError::Validation(format!(
            "{} cannot contain consecutive hyphens",
            field
        )));
    }
    if !NAME_RE.is_match(value) {
        return Err(ApiError::Validation(format!(
            "{} must start and end with an alphanumeric character and contain only lowercase letters, numbers, and hyphens",
            field
        )));
    }
    Ok(())
}

impl CreateClusterRequest {
    /// Runs before any lock is taken or external call is made.
    pub fn validate(&self) -> Result<(), ApiError> {
        validate_name("name", &self.name)?;
        validate_name("service_account", &self.service_account)?;
        validate_name("namespace", &self.namespace)?;

        match (&self.kubeconfig, &self.kubeconfig_vault_path) {
            (None, None) => {
                return Err(ApiError::Validation(
                    "Either kubeconfig or kubeconfig_vault_path must be provided".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ApiError::Validation(
                    "Only one of kubeconfig or kubeconfig_vault_path should be provided"
                        .to_string(),
                ));
            }
            _ => {}
        }

        if let Some(kubeconfig) = &self.kubeconfig
            && base64::engine::general_purpose::STANDARD
                .decode(kubeconfig)
                .is_err()
        {
            return Err(ApiError::Validation(
                "Kubeconfig must be a valid base64 encoded string".to_string(),
            ));
        }

        Ok(())
    }
}

impl UpdateServiceAccountRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        validate_name("cluster_name", &self.cluster_name)?;
        validate_name("service_account", &self.service_account)?;
        Ok(())
    }
}
