use std::sync::Arc;

use tickwork_core::TenantId;
use tickwork_store::Store;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::paths;
use crate::types::LogEntry;

/// Append-only per-tenant run history under `tenants/{tenant}/logs`.
///
/// Entry keys are UUIDv7, so key order is append order.
#[derive(Clone)]
pub struct ExecutionLog {
    store: Arc<dyn Store>,
    /// Newest entries kept per tenant; 0 keeps everything.
    retention: usize,
}

impl ExecutionLog {
    pub fn new(store: Arc<dyn Store>, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Append an entry and prune past the retention limit. Returns the entry id.
    pub async fn append(&self, tenant: &TenantId, entry: &LogEntry) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let mut entry = entry.clone();
        entry.id = id.clone();
        self.store
            .set(&paths::log_entry(tenant, &id), serde_json::to_value(&entry)?)
            .await?;

        if self.retention > 0 {
            if let Err(e) = self.prune(tenant).await {
                warn!(tenant = %tenant, "log pruning failed: {e}");
            }
        }
        Ok(id)
    }

    /// Newest-first entries, at most `limit`.
    pub async fn recent(&self, tenant: &TenantId, limit: usize) -> Result<Vec<LogEntry>> {
        let children = self.store.children(&paths::logs(tenant)).await?;
        let entries = children
            .into_iter()
            .rev()
            .filter_map(|(key, value)| match serde_json::from_value::<LogEntry>(value) {
                Ok(mut entry) => {
                    entry.id = key;
                    Some(entry)
                }
                Err(e) => {
                    warn!(tenant = %tenant, key = %key, "skipping malformed log entry: {e}");
                    None
                }
            })
            .take(limit)
            .collect();
        Ok(entries)
    }

    async fn prune(&self, tenant: &TenantId) -> Result<()> {
        let children = self.store.children(&paths::logs(tenant)).await?;
        if children.len() <= self.retention {
            return Ok(());
        }
        let excess = children.len() - self.retention;
        for (key, _) in children.into_iter().take(excess) {
            self.store.remove(&paths::log_entry(tenant, &key)).await?;
        }
        debug!(tenant = %tenant, pruned = excess, "old log entries pruned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobKind, RunStatus};
    use chrono::Utc;
    use tickwork_core::JobId;
    use tickwork_store::SqliteStore;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            id: String::new(),
            job_id: JobId::from("j"),
            job_name: "job".into(),
            kind: JobKind::Ping,
            status: RunStatus::Success,
            message: message.into(),
            duration_ms: 5,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let log = ExecutionLog::new(Arc::new(SqliteStore::open_in_memory().unwrap()), 0);
        let t = TenantId::from("t");
        for m in ["one", "two", "three"] {
            log.append(&t, &entry(m)).await.unwrap();
        }
        let recent = log.recent(&t, 2).await.unwrap();
        let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two"]);
        assert!(!recent[0].id.is_empty());
    }

    #[tokio::test]
    async fn retention_prunes_oldest_entries() {
        let log = ExecutionLog::new(Arc::new(SqliteStore::open_in_memory().unwrap()), 2);
        let t = TenantId::from("t");
        for m in ["one", "two", "three"] {
            log.append(&t, &entry(m)).await.unwrap();
        }
        let recent = log.recent(&t, 10).await.unwrap();
        let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two"]);
    }
}
