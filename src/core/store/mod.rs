mod lock;

pub use lock::{ClusterLock, DbLock};

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;

use crate::core::error::Result;
use crate::core::model::{AuditLog, Cluster, ClusterStatus, ExecutionStatus, PlaybookExecution};

/// Durable records for clusters, playbook executions and audit entries.
/// All access goes through one connection behind an async mutex; the
/// force-recreate path uses an explicit transaction.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA foreign_keys = ON;")?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                service_account TEXT NOT NULL,
                namespace TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS playbook_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster_id INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
                playbook_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                command TEXT,
                pid INTEGER,
                return_code INTEGER,
                extra_vars TEXT NOT NULL DEFAULT '{}'
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                cluster_id INTEGER REFERENCES clusters(id) ON DELETE CASCADE
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS cluster_locks (
                key TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    /// `SELECT 1` liveness probe for the health/readiness endpoints.
    pub async fn ping(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // --- clusters ---

    pub async fn insert_cluster(
        &self,
        name: &str,
        service_account: &str,
        namespace: &str,
        status: ClusterStatus,
    ) -> Result<Cluster> {
        let now = Utc::now();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO clusters (name, service_account, namespace, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                service_account,
                namespace,
                status.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        let id = db.last_insert_rowid();
        Ok(Cluster {
            id,
            name: name.to_string(),
            service_account: service_account.to_string(),
            namespace: namespace.to_string(),
            status,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_cluster_by_name(&self, name: &str) -> Result<Option<Cluster>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, service_account, namespace, status, created_at, updated_at
             FROM clusters WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![name])?;
        match rows.next()? {
            Some(row) => Ok(Some(cluster_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, service_account, namespace, status, created_at, updated_at
             FROM clusters ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([], cluster_from_row)?;
        let mut clusters = Vec::new();
        for row in rows {
            clusters.push(row?);
        }
        Ok(clusters)
    }

    pub async fn update_cluster_service_account(
        &self,
        cluster_id: i64,
        service_account: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE clusters SET service_account = ?1, updated_at = ?2 WHERE id = ?3",
            params![service_account, Utc::now().to_rfc3339(), cluster_id],
        )?;
        Ok(())
    }

    /// Remove an existing cluster so it can be recreated under `force`.
    /// Executions are deleted and the cluster row follows inside one
    /// transaction; audit rows referencing the cluster go with it via
    /// cascade. A reader never observes the half-deleted state.
    pub async fn delete_cluster_for_recreate(&self, cluster_id: i64) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM playbook_executions WHERE cluster_id = ?1",
            params![cluster_id],
        )?;
        tx.execute("DELETE FROM clusters WHERE id = ?1", params![cluster_id])?;
        tx.commit()?;
        Ok(())
    }

    // --- playbook executions ---

    pub async fn insert_execution(
        &self,
        cluster_id: i64,
        playbook_name: &str,
        extra_vars: &str,
    ) -> Result<PlaybookExecution> {
        self.insert_execution_at(cluster_id, playbook_name, extra_vars, Utc::now())
            .await
    }

    async fn insert_execution_at(
        &self,
        cluster_id: i64,
        playbook_name: &str,
        extra_vars: &str,
        started_at: DateTime<Utc>,
    ) -> Result<PlaybookExecution> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO playbook_executions (cluster_id, playbook_name, status, started_at, extra_vars)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cluster_id,
                playbook_name,
                ExecutionStatus::Running.as_str(),
                started_at.to_rfc3339(),
                extra_vars
            ],
        )?;
        Ok(PlaybookExecution {
            id: db.last_insert_rowid(),
            cluster_id,
            playbook_name: playbook_name.to_string(),
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            command: None,
            pid: None,
            return_code: None,
            extra_vars: extra_vars.to_string(),
        })
    }

    /// Record the resolved command line and process id once the playbook
    /// process has been started.
    pub async fn mark_execution_launched(
        &self,
        execution_id: i64,
        command: &str,
        pid: Option<u32>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE playbook_executions SET command = ?1, pid = ?2 WHERE id = ?3",
            params![command, pid, execution_id],
        )?;
        Ok(())
    }

    /// Record process exit. Written by the reaper task, never by the request
    /// path.
    pub async fn complete_execution(
        &self,
        execution_id: i64,
        return_code: Option<i32>,
    ) -> Result<()> {
        let status = match return_code {
            Some(0) => ExecutionStatus::Succeeded,
            _ => ExecutionStatus::Failed,
        };
        let db = self.db.lock().await;
        db.execute(
            "UPDATE playbook_executions SET status = ?1, return_code = ?2, completed_at = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                return_code,
                Utc::now().to_rfc3339(),
                execution_id
            ],
        )?;
        Ok(())
    }

    /// The execution used for status reporting: max `started_at`, ties broken
    /// by max id.
    pub async fn latest_execution(&self, cluster_id: i64) -> Result<Option<PlaybookExecution>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, cluster_id, playbook_name, status, started_at, completed_at,
                    command, pid, return_code, extra_vars
             FROM playbook_executions WHERE cluster_id = ?1
             ORDER BY started_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![cluster_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(execution_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn count_executions(&self, cluster_id: i64) -> Result<i64> {
        let db = self.db.lock().await;
        let count = db.query_row(
            "SELECT COUNT(*) FROM playbook_executions WHERE cluster_id = ?1",
            params![cluster_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- audit log ---

    pub async fn append_audit(
        &self,
        user_id: &str,
        action: &str,
        details: &str,
        status: &str,
        cluster_id: Option<i64>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO audit_log (timestamp, user_id, action, details, status, cluster_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Utc::now().to_rfc3339(),
                user_id,
                action,
                details,
                status,
                cluster_id
            ],
        )?;
        Ok(())
    }

    pub async fn list_audit_for_cluster(&self, cluster_id: i64) -> Result<Vec<AuditLog>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, timestamp, user_id, action, details, status, cluster_id
             FROM audit_log WHERE cluster_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![cluster_id], audit_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn cluster_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Cluster> {
    let status_raw: String = row.get(4)?;
    let status = ClusterStatus::from_status(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown cluster status: {}", status_raw).into(),
        )
    })?;
    let created_raw: String = row.get(5)?;
    let updated_raw: String = row.get(6)?;
    Ok(Cluster {
        id: row.get(0)?,
        name: row.get(1)?,
        service_account: row.get(2)?,
        namespace: row.get(3)?,
        status,
        created_at: parse_timestamp(5, &created_raw)?,
        updated_at: parse_timestamp(6, &updated_raw)?,
    })
}

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlaybookExecution> {
    let status_raw: String = row.get(3)?;
    let status = ExecutionStatus::from_status(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown execution status: {}", status_raw).into(),
        )
    })?;
    let started_raw: String = row.get(4)?;
    let completed_raw: Option<String> = row.get(5)?;
    let completed_at = match completed_raw {
        Some(raw) => Some(parse_timestamp(5, &raw)?),
        None => None,
    };
    Ok(PlaybookExecution {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        playbook_name: row.get(2)?,
        status,
        started_at: parse_timestamp(4, &started_raw)?,
        completed_at,
        command: row.get(6)?,
        pid: row.get(7)?,
        return_code: row.get(8)?,
        extra_vars: row.get(9)?,
    })
}

fn audit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditLog> {
    let ts_raw: String = row.get(1)?;
    Ok(AuditLog {
        id: row.get(0)?,
        timestamp: parse_timestamp(1, &ts_raw)?,
        user_id: row.get(2)?,
        action: row.get(3)?,
        details: row.get(4)?,
        status: row.get(5)?,
        cluster_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn test_store() -> Store {
        Store::open_in_memory().expect("in-memory store")
    }

    #[tokio::test]
    async fn insert_and_fetch_cluster() {
        let store = test_store().await;
        let created = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let fetched = store.get_cluster_by_name("demo").await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, ClusterStatus::Creating);
        assert_eq!(fetched.namespace, "ns1");
    }

    #[tokio::test]
    async fn duplicate_cluster_name_is_rejected() {
        let store = test_store().await;
        store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let dup = store
            .insert_cluster("demo", "sa2", "ns2", ClusterStatus::Creating)
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn deleting_a_cluster_cascades_to_executions_and_audit() {
        let store = test_store().await;
        let kept = store
            .insert_cluster("kept", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let doomed = store
            .insert_cluster("doomed", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        store
            .insert_execution(kept.id, "create_cluster.yml", "{}")
            .await
            .unwrap();
        store
            .insert_execution(doomed.id, "create_cluster.yml", "{}")
            .await
            .unwrap();
        store
            .append_audit("alice", "create_cluster", "ok", "success", Some(doomed.id))
            .await
            .unwrap();

        {
            let db = store.get_db();
            let db = db.lock().await;
            db.execute("DELETE FROM clusters WHERE id = ?1", params![doomed.id])
                .unwrap();
        }

        assert_eq!(store.count_executions(doomed.id).await.unwrap(), 0);
        assert!(
            store
                .list_audit_for_cluster(doomed.id)
                .await
                .unwrap()
                .is_empty()
        );
        // Rows owned by the other cluster are untouched.
        assert_eq!(store.count_executions(kept.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn force_recreate_delete_is_atomic_and_scoped() {
        let store = test_store().await;
        let old = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let other = store
            .insert_cluster("other", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        store
            .insert_execution(old.id, "create_cluster.yml", "{}")
            .await
            .unwrap();
        store
            .insert_execution(other.id, "create_cluster.yml", "{}")
            .await
            .unwrap();

        store.delete_cluster_for_recreate(old.id).await.unwrap();

        assert!(store.get_cluster_by_name("demo").await.unwrap().is_none());
        assert_eq!(store.count_executions(old.id).await.unwrap(), 0);
        assert_eq!(store.count_executions(other.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_execution_prefers_max_start_time() {
        let store = test_store().await;
        let cluster = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let base = Utc::now();
        let newer = store
            .insert_execution_at(cluster.id, "create_cluster.yml", "{}", base)
            .await
            .unwrap();
        // An execution inserted later but started earlier must not win.
        store
            .insert_execution_at(
                cluster.id,
                "update_service_account.yml",
                "{}",
                base - ChronoDuration::seconds(60),
            )
            .await
            .unwrap();

        let latest = store.latest_execution(cluster.id).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn latest_execution_breaks_timestamp_ties_by_id() {
        let store = test_store().await;
        let cluster = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let ts = Utc::now();
        store
            .insert_execution_at(cluster.id, "create_cluster.yml", "{}", ts)
            .await
            .unwrap();
        let second = store
            .insert_execution_at(cluster.id, "create_cluster.yml", "{}", ts)
            .await
            .unwrap();

        let latest = store.latest_execution(cluster.id).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn execution_launch_and_completion_updates() {
        let store = test_store().await;
        let cluster = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let execution = store
            .insert_execution(cluster.id, "create_cluster.yml", "{\"force\":false}")
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.pid.is_none());

        store
            .mark_execution_launched(
                execution.id,
                "ansible-playbook create_cluster.yml",
                Some(4242),
            )
            .await
            .unwrap();
        store
            .complete_execution(execution.id, Some(0))
            .await
            .unwrap();

        let latest = store.latest_execution(cluster.id).await.unwrap().unwrap();
        assert_eq!(latest.pid, Some(4242));
        assert_eq!(latest.status, ExecutionStatus::Succeeded);
        assert_eq!(latest.return_code, Some(0));
        assert!(latest.completed_at.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_marks_execution_failed() {
        let store = test_store().await;
        let cluster = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        let execution = store
            .insert_execution(cluster.id, "create_cluster.yml", "{}")
            .await
            .unwrap();
        store
            .complete_execution(execution.id, Some(2))
            .await
            .unwrap();
        let latest = store.latest_execution(cluster.id).await.unwrap().unwrap();
        assert_eq!(latest.status, ExecutionStatus::Failed);
        assert_eq!(latest.return_code, Some(2));
    }

    #[tokio::test]
    async fn update_service_account_touches_updated_at() {
        let store = test_store().await;
        let cluster = store
            .insert_cluster("demo", "sa1", "ns1", ClusterStatus::Creating)
            .await
            .unwrap();
        store
            .update_cluster_service_account(cluster.id, "sa2")
            .await
            .unwrap();
        let fetched = store.get_cluster_by_name("demo").await.unwrap().unwrap();
        assert_eq!(fetched.service_account, "sa2");
        assert!(fetched.updated_at >= cluster.updated_at);
    }
}
