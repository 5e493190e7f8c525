//! Shared per-tenant cipher queue and its claim protocol.
//!
//! Any number of workers may drain the same tenant's queue concurrently.
//! Ownership of an item is decided by a single store transaction that moves
//! it from `pending` to `processing`; whoever commits that transaction owns
//! the item, everyone else skips it. There is no other lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tickwork_core::{config::QueueConfig, QueueItemId, TenantId};
use tickwork_store::{Store, TxAction};
use tracing::{debug, info, warn};

use crate::cipher::{Cipher, CipherError};
use crate::error::{Result, SchedulerError};
use crate::paths;
use crate::schedule::Clock;
use crate::types::{CipherAction, QueueItem, QueueStatus};

/// Counts from one or more drain passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Pending items visible at read time.
    pub fetched: usize,
    /// Items this worker claimed and completed.
    pub processed: usize,
    /// Items this worker claimed and marked failed.
    pub errors: usize,
}

impl DrainReport {
    /// True when this worker did no work at all.
    pub fn is_idle(&self) -> bool {
        self.processed == 0 && self.errors == 0
    }

    fn absorb(&mut self, other: DrainReport) {
        self.fetched += other.fetched;
        self.processed += other.processed;
        self.errors += other.errors;
    }
}

/// Result of one claim attempt.
#[derive(Debug)]
enum Claim {
    Won(QueueItem),
    /// Another worker moved the item on first, or it is gone.
    Lost,
    /// The item could not be decoded and was failed in place.
    Rejected(String),
}

pub struct QueueProcessor {
    store: Arc<dyn Store>,
    cipher: Arc<dyn Cipher>,
    clock: Arc<dyn Clock>,
    /// Tenant secrets, read through from the store and dropped on tenant removal.
    secrets: DashMap<TenantId, String>,
    batch_size: usize,
    burst_iterations: usize,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: Arc<dyn Cipher>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            store,
            cipher,
            clock,
            secrets: DashMap::new(),
            batch_size: config.batch_size.max(1),
            burst_iterations: config.burst_iterations.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn cipher(&self) -> &dyn Cipher {
        self.cipher.as_ref()
    }

    /// The tenant's secret, cached after the first successful read.
    pub async fn secret(&self, tenant: &TenantId) -> Result<Option<String>> {
        if let Some(secret) = self.secrets.get(tenant) {
            return Ok(Some(secret.clone()));
        }
        let value = self.store.get(&paths::secret(tenant)).await?;
        match value.as_ref().and_then(Value::as_str) {
            Some(secret) if !secret.is_empty() => {
                self.secrets.insert(tenant.clone(), secret.to_string());
                Ok(Some(secret.to_string()))
            }
            _ => Ok(None),
        }
    }

    pub fn forget_secret(&self, tenant: &TenantId) {
        self.secrets.remove(tenant);
    }

    /// Write a new `pending` item.
    pub async fn enqueue(
        &self,
        tenant: &TenantId,
        id: &QueueItemId,
        action: CipherAction,
        payload: &str,
    ) -> Result<QueueItem> {
        let mut item = QueueItem::pending(id.clone(), action, payload);
        item.created_at = self.clock.now();
        self.store
            .set(&paths::queue_item(tenant, id), serde_json::to_value(&item)?)
            .await?;
        debug!(tenant = %tenant, item = %id, %action, "queue item enqueued");
        Ok(item)
    }

    pub async fn item(&self, tenant: &TenantId, id: &QueueItemId) -> Result<Option<QueueItem>> {
        match self.store.get(&paths::queue_item(tenant, id)).await? {
            Some(value) => Ok(Some(QueueItem::from_value(id.clone(), value)?)),
            None => Ok(None),
        }
    }

    /// Try to take ownership of one item.
    ///
    /// Returns `Ok(None)` when the item is no longer `pending`: another worker
    /// got there first, which is the normal outcome of losing a race. An item
    /// that does not decode is moved to `failed` instead of being claimed.
    pub async fn claim(&self, tenant: &TenantId, id: &QueueItemId) -> Result<Option<QueueItem>> {
        match self.try_claim(tenant, id).await? {
            Claim::Won(item) => Ok(Some(item)),
            Claim::Lost | Claim::Rejected(_) => Ok(None),
        }
    }

    async fn try_claim(&self, tenant: &TenantId, id: &QueueItemId) -> Result<Claim> {
        let now = self.clock.now();
        let mut claim = Claim::Lost;
        self.store
            .transaction(&paths::queue_item(tenant, id), &mut |current| {
                claim = Claim::Lost;
                let Some(value) = current.filter(|v| status_is(v, QueueStatus::Pending)) else {
                    return TxAction::Abort;
                };
                let mut next = value.clone();
                match QueueItem::from_value(id.clone(), value.clone()) {
                    Ok(mut item) => {
                        item.status = QueueStatus::Processing;
                        item.claimed_at = Some(now);
                        next["status"] = json!(QueueStatus::Processing);
                        next["claimed_at"] = json!(now);
                        claim = Claim::Won(item);
                    }
                    Err(e) => {
                        let reason = format!("malformed queue item: {e}");
                        next["status"] = json!(QueueStatus::Failed);
                        next["error"] = json!(reason);
                        next["processed_at"] = json!(now);
                        claim = Claim::Rejected(reason);
                    }
                }
                TxAction::Commit(next)
            })
            .await?;
        Ok(claim)
    }

    /// Move a claimed item to its terminal state. Items not in `processing`
    /// are left alone so terminal states are never rewritten.
    async fn resolve(
        &self,
        tenant: &TenantId,
        id: &QueueItemId,
        result: std::result::Result<String, CipherError>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let outcome = self
            .store
            .transaction(&paths::queue_item(tenant, id), &mut |current| {
                match current {
                    Some(value) if status_is(value, QueueStatus::Processing) => {
                        let mut next = value.clone();
                        match &result {
                            Ok(output) => {
                                next["status"] = json!(QueueStatus::Completed);
                                next["result"] = json!(output);
                            }
                            Err(e) => {
                                next["status"] = json!(QueueStatus::Failed);
                                next["error"] = json!(e.to_string());
                            }
                        }
                        next["processed_at"] = json!(now);
                        TxAction::Commit(next)
                    }
                    _ => TxAction::Abort,
                }
            })
            .await?;
        if !outcome.committed {
            warn!(tenant = %tenant, item = %id, "claimed item changed state before it was resolved");
        }
        Ok(outcome.committed)
    }

    /// One pass: read up to `batch_size` pending items, claim each, run the
    /// cipher, and resolve.
    pub async fn drain_once(&self, tenant: &TenantId) -> Result<DrainReport> {
        let secret = self
            .secret(tenant)
            .await?
            .ok_or_else(|| SchedulerError::MissingSecret {
                tenant: tenant.clone(),
            })?;

        let pending = self
            .store
            .query_children(
                &paths::queue(tenant),
                "status",
                &json!(QueueStatus::Pending),
                self.batch_size,
            )
            .await?;

        let mut report = DrainReport {
            fetched: pending.len(),
            ..DrainReport::default()
        };

        for (key, _) in pending {
            let id = QueueItemId::from(key);
            match self.process(tenant, &id, &secret).await {
                Ok(Some(true)) => report.processed += 1,
                Ok(Some(false)) => report.errors += 1,
                Ok(None) => debug!(tenant = %tenant, item = %id, "item already claimed elsewhere"),
                Err(e) => {
                    warn!(tenant = %tenant, item = %id, "queue item not processed: {e}");
                    report.errors += 1;
                }
            }
        }

        if !report.is_idle() {
            info!(
                tenant = %tenant,
                processed = report.processed,
                errors = report.errors,
                "queue drained"
            );
        }
        Ok(report)
    }

    /// Claim, run and resolve one item. `Some(succeeded)` when this worker
    /// handled it, `None` when someone else did.
    async fn process(
        &self,
        tenant: &TenantId,
        id: &QueueItemId,
        secret: &str,
    ) -> Result<Option<bool>> {
        let item = match self.try_claim(tenant, id).await? {
            Claim::Won(item) => item,
            Claim::Lost => return Ok(None),
            Claim::Rejected(reason) => {
                warn!(tenant = %tenant, item = %id, "{reason}");
                return Ok(Some(false));
            }
        };
        let result = self.cipher.apply(item.action, &item.payload, secret);
        let succeeded = result.is_ok();
        if self.resolve(tenant, id, result).await? {
            Ok(Some(succeeded))
        } else {
            Ok(None)
        }
    }

    /// Repeated drain after a request is enqueued. Stops when a pass sees
    /// less than a full batch; anything left waits for the next scheduled
    /// queue-worker firing.
    pub async fn burst_drain(&self, tenant: &TenantId) -> DrainReport {
        let mut total = DrainReport::default();
        for _ in 0..self.burst_iterations {
            match self.drain_once(tenant).await {
                Ok(pass) => {
                    total.absorb(pass);
                    if pass.fetched < self.batch_size {
                        break;
                    }
                }
                Err(e) => {
                    warn!(tenant = %tenant, "burst drain stopped: {e}");
                    break;
                }
            }
        }
        total
    }

    /// Return `processing` items claimed before `older_than` to `pending`.
    ///
    /// Workers that die mid-item leave it in `processing`; nothing reclaims
    /// those automatically. This is the operator's tool for doing so.
    pub async fn reclaim_stranded(
        &self,
        tenant: &TenantId,
        older_than: DateTime<Utc>,
    ) -> Result<usize> {
        let processing = self
            .store
            .query_children(
                &paths::queue(tenant),
                "status",
                &json!(QueueStatus::Processing),
                i64::MAX as usize,
            )
            .await?;

        let mut reclaimed = 0;
        for (key, _) in processing {
            let id = QueueItemId::from(key);
            let outcome = self
                .store
                .transaction(&paths::queue_item(tenant, &id), &mut |current| match current {
                    Some(value)
                        if status_is(value, QueueStatus::Processing)
                            && claimed_before(value, older_than) =>
                    {
                        let mut next = value.clone();
                        next["status"] = json!(QueueStatus::Pending);
                        if let Some(obj) = next.as_object_mut() {
                            obj.remove("claimed_at");
                        }
                        TxAction::Commit(next)
                    }
                    _ => TxAction::Abort,
                })
                .await?;
            if outcome.committed {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            warn!(tenant = %tenant, reclaimed, "stranded queue items returned to pending");
        }
        Ok(reclaimed)
    }
}

fn status_is(value: &Value, status: QueueStatus) -> bool {
    value.get("status") == Some(&json!(status))
}

/// Items without a claim timestamp count as stranded.
fn claimed_before(value: &Value, cutoff: DateTime<Utc>) -> bool {
    value
        .get("claimed_at")
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
        .map_or(true, |at| at < cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AeadCipher;
    use chrono::TimeZone;
    use tickwork_store::SqliteStore;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
    }

    async fn processor(batch_size: usize) -> (Arc<SqliteStore>, QueueProcessor, TenantId) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let t = TenantId::from("t");
        store.set("tenants/t/secret", json!("s")).await.unwrap();
        let config = QueueConfig {
            batch_size,
            burst_iterations: 20,
        };
        let q = QueueProcessor::new(
            store.clone(),
            Arc::new(AeadCipher),
            Arc::new(FixedClock(noon())),
            &config,
        );
        (store, q, t)
    }

    #[tokio::test]
    async fn drain_completes_pending_encrypt() {
        let (_store, q, t) = processor(50).await;
        let id = QueueItemId::new();
        q.enqueue(&t, &id, CipherAction::Encrypt, "hello").await.unwrap();

        let report = q.drain_once(&t).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 0);

        let item = q.item(&t, &id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert!(item.processed_at.is_some());
        let ct = item.result.unwrap();
        assert_eq!(AeadCipher.decrypt(&ct, "s").unwrap(), "hello");
    }

    #[tokio::test]
    async fn bad_ciphertext_marks_item_failed() {
        let (_store, q, t) = processor(50).await;
        let id = QueueItemId::new();
        q.enqueue(&t, &id, CipherAction::Decrypt, "garbage").await.unwrap();

        let report = q.drain_once(&t).await.unwrap();
        assert_eq!((report.processed, report.errors), (0, 1));
        let item = q.item(&t, &id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert!(item.error.unwrap().contains("decryption failed"));
    }

    #[tokio::test]
    async fn second_claim_loses() {
        let (_store, q, t) = processor(50).await;
        let id = QueueItemId::new();
        q.enqueue(&t, &id, CipherAction::Encrypt, "x").await.unwrap();

        assert!(q.claim(&t, &id).await.unwrap().is_some());
        assert!(q.claim(&t, &id).await.unwrap().is_none());
        assert!(q.claim(&t, &QueueItemId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let (_store, q, t) = processor(50).await;
        let report = q.drain_once(&t).await.unwrap();
        assert!(report.is_idle());
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn missing_secret_leaves_items_pending() {
        let (store, q, t) = processor(50).await;
        store.remove("tenants/t/secret").await.unwrap();
        let id = QueueItemId::new();
        q.enqueue(&t, &id, CipherAction::Encrypt, "x").await.unwrap();

        assert!(matches!(
            q.drain_once(&t).await,
            Err(SchedulerError::MissingSecret { .. })
        ));
        assert_eq!(q.item(&t, &id).await.unwrap().unwrap().status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn burst_drain_stops_on_short_batch() {
        let (_store, q, t) = processor(2).await;
        for i in 0..5 {
            q.enqueue(&t, &QueueItemId::new(), CipherAction::Encrypt, &format!("m{i}"))
                .await
                .unwrap();
        }
        let total = q.burst_drain(&t).await;
        assert_eq!(total.processed, 5);
        // 2 + 2 + 1: the short third pass ends the burst.
        assert_eq!(total.fetched, 5);
    }

    #[tokio::test]
    async fn burst_drain_respects_iteration_cap() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let t = TenantId::from("t");
        store.set("tenants/t/secret", json!("s")).await.unwrap();
        let q = QueueProcessor::new(
            store.clone(),
            Arc::new(AeadCipher),
            Arc::new(FixedClock(noon())),
            &QueueConfig {
                batch_size: 1,
                burst_iterations: 3,
            },
        );
        for _ in 0..5 {
            q.enqueue(&t, &QueueItemId::new(), CipherAction::Encrypt, "m").await.unwrap();
        }
        let total = q.burst_drain(&t).await;
        assert_eq!(total.processed, 3);
        let pending = store
            .query_children("tenants/t/queue", "status", &json!("pending"), 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn stranded_items_can_be_reclaimed() {
        let (_store, q, t) = processor(50).await;
        let id = QueueItemId::new();
        q.enqueue(&t, &id, CipherAction::Encrypt, "x").await.unwrap();
        let claimed = q.claim(&t, &id).await.unwrap().unwrap();
        assert_eq!(claimed.claimed_at, Some(noon()));

        // Claimed exactly at the cutoff is not yet stranded.
        assert_eq!(q.reclaim_stranded(&t, noon()).await.unwrap(), 0);

        let later = noon() + chrono::Duration::seconds(1);
        assert_eq!(q.reclaim_stranded(&t, later).await.unwrap(), 1);
        let item = q.item(&t, &id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(item.claimed_at.is_none());
    }

    #[tokio::test]
    async fn malformed_item_fails_without_blocking_the_batch() {
        let (store, q, t) = processor(50).await;
        // Sorts before any generated id and lacks `created_at`.
        store
            .set(
                "tenants/t/queue/0-broken",
                json!({"action": "encrypt", "payload": "x", "status": "pending"}),
            )
            .await
            .unwrap();
        let good = QueueItemId::new();
        q.enqueue(&t, &good, CipherAction::Encrypt, "hello").await.unwrap();

        let report = q.drain_once(&t).await.unwrap();
        assert_eq!((report.processed, report.errors), (1, 1));
        assert_eq!(q.item(&t, &good).await.unwrap().unwrap().status, QueueStatus::Completed);

        let broken = store.get("tenants/t/queue/0-broken").await.unwrap().unwrap();
        assert_eq!(broken["status"], "failed");
        assert!(broken["error"].as_str().unwrap().contains("malformed queue item"));

        // Nothing left to retry.
        assert!(q.drain_once(&t).await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_on_claim() {
        let (store, q, t) = processor(50).await;
        store
            .set(
                "tenants/t/queue/odd",
                json!({"action": "rot13", "payload": "x", "status": "pending", "created_at": noon()}),
            )
            .await
            .unwrap();
        assert!(q.claim(&t, &QueueItemId::from("odd")).await.unwrap().is_none());
        let odd = store.get("tenants/t/queue/odd").await.unwrap().unwrap();
        assert_eq!(odd["status"], "failed");
        assert_eq!(odd["processed_at"], json!(noon()));
    }
}
