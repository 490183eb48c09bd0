use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Pending,
    Creating,
    Active,
    Failed,
}

impl ClusterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Pending => "pending",
            ClusterStatus::Creating => "creating",
            ClusterStatus::Active => "active",
            ClusterStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ClusterStatus::Pending),
            "creating" => Some(ClusterStatus::Creating),
            "active" => Some(ClusterStatus::Active),
            "failed" => Some(ClusterStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(ExecutionStatus::Running),
            "succeeded" => Some(ExecutionStatus::Succeeded),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// A Kubernetes target environment tracked by this service, not the
/// Kubernetes API object itself.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub service_account: String,
    pub namespace: String,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One launched ansible-playbook process. `pid`, `command`, `return_code` and
/// `completed_at` fill in as the process is started and reaped.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlaybookExecution {
    pub id: i64,
    pub cluster_id: i64,
    pub playbook_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub command: Option<String>,
    pub pid: Option<u32>,
    pub return_code: Option<i32>,
    /// Serialized extra-vars payload, kept for audit/replay.
    pub extra_vars: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: String,
    pub details: String,
    pub status: String,
    pub cluster_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_status_round_trips_through_str() {
        for status in [
            ClusterStatus::Pending,
            ClusterStatus::Creating,
            ClusterStatus::Active,
            ClusterStatus::Failed,
        ] {
            assert_eq!(ClusterStatus::from_status(status.as_str()), Some(status));
        }
        assert_eq!(ClusterStatus::from_status("unknown"), None);
    }

    #[test]
    fn execution_status_round_trips_through_str() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(ExecutionStatus::from_status(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::from_status(""), None);
    }
}
