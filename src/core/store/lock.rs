use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::warn;

use crate::core::error::Result;

/// Named TTL'd mutual exclusion keyed by cluster name. One orchestrator holds
/// a given key at a time, across processes sharing the store.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Try to take the lock, retrying until `wait` elapses. Returns false if
    /// the key stayed held for the whole window.
    async fn acquire(&self, key: &str, wait: Duration, ttl: Duration) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<()>;
}

/// Lock rows live in the shared `cluster_locks` table; an expired row can be
/// taken over atomically by the conflict clause. The TTL must outlive the
/// worst-case request, which is a tuning concern, not a guarantee.
pub struct DbLock {
    db: Arc<Mutex<Connection>>,
    holder: String,
}

const RETRY_INTERVAL: Duration = Duration::from_millis(200);

impl DbLock {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl.as_millis() as i64;
        let db = self.db.lock().await;
        let changed = db.execute(
            "INSERT INTO cluster_locks (key, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
             WHERE cluster_locks.expires_at <= ?4",
            params![key, self.holder, expires_at, now],
        )?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl ClusterLock for DbLock {
    async fn acquire(&self, key: &str, wait: Duration, ttl: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.try_acquire(key, ttl).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() + RETRY_INTERVAL > deadline {
                warn!(key = %key, "Lock acquisition timed out");
                return Ok(false);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        // Scoped to our holder id so a post-expiry takeover is not clobbered.
        db.execute(
            "DELETE FROM cluster_locks WHERE key = ?1 AND holder = ?2",
            params![key, self.holder],
        )?;
        Ok(())
    }
}
