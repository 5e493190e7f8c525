//! The long-lived scheduler service and its request-facing operations.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tickwork_core::{JobId, QueueItemId, TenantId, TickworkConfig};
use tickwork_store::{Store, TxAction};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::cipher::{AeadCipher, Cipher, CipherError};
use crate::error::{Result, SchedulerError};
use crate::executor::TaskExecutor;
use crate::history::ExecutionLog;
use crate::ledger::CreditLedger;
use crate::paths;
use crate::queue::QueueProcessor;
use crate::rate::RateLimiter;
use crate::registry::{FireFn, JobRegistry};
use crate::runners::{AdminTarget, HttpProber, Prober, Runners, StoreAdminTarget};
use crate::schedule::{Clock, CronSchedule, SystemClock};
use crate::types::{
    CipherAction, Job, JobDraft, LogEntry, Outcome, QueueItem, QueueStatus, Submission, Usage,
};
use crate::watcher::{ReconciliationWatcher, TeardownFn};

/// Wires the collaborators together. Anything left unset gets the
/// production implementation.
pub struct SchedulerServiceBuilder {
    store: Arc<dyn Store>,
    config: TickworkConfig,
    clock: Option<Arc<dyn Clock>>,
    prober: Option<Arc<dyn Prober>>,
    admin: Option<Arc<dyn AdminTarget>>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl SchedulerServiceBuilder {
    pub fn config(mut self, config: TickworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn admin(mut self, admin: Arc<dyn AdminTarget>) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn build(self) -> Result<SchedulerService> {
        let store = self.store;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let prober: Arc<dyn Prober> = match self.prober {
            Some(prober) => prober,
            None => Arc::new(HttpProber::new().map_err(|e| {
                SchedulerError::External(format!("failed to build HTTP client: {e}"))
            })?),
        };
        let admin = self
            .admin
            .unwrap_or_else(|| Arc::new(StoreAdminTarget::new(store.clone())));
        let cipher = self.cipher.unwrap_or_else(|| Arc::new(AeadCipher));

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let queue = Arc::new(QueueProcessor::new(
            store.clone(),
            cipher,
            clock.clone(),
            &config.queue,
        ));
        let executor = Arc::new(TaskExecutor::new(
            store.clone(),
            queue.clone(),
            Runners { prober, admin },
            clock.clone(),
            &config,
        ));
        let background = TaskTracker::new();

        let fire_executor = executor.clone();
        let fire_tracker = background.clone();
        let on_fire: FireFn = Arc::new(move |key| {
            let executor = fire_executor.clone();
            fire_tracker.spawn(async move {
                executor.fire(key).await;
            });
        });
        let registry = Arc::new(JobRegistry::new(clock.clone(), on_fire));

        let teardown_limiter = limiter.clone();
        let teardown_queue = queue.clone();
        let teardown: TeardownFn = Arc::new(move |tenant| {
            teardown_limiter.forget(tenant);
            teardown_queue.forget_secret(tenant);
        });
        let watcher = Arc::new(ReconciliationWatcher::new(
            store.clone(),
            registry.clone(),
            teardown,
        ));

        Ok(SchedulerService {
            ledger: CreditLedger::new(store.clone()),
            history: ExecutionLog::new(store.clone(), config.logs.retention),
            store,
            config,
            clock,
            limiter,
            queue,
            executor,
            registry,
            watcher,
            background,
        })
    }
}

/// Process-scoped owner of every registry, cache and background task.
///
/// Create one per process with [`SchedulerService::builder`], drive it with
/// [`run`](Self::run), and stop it through the shutdown channel.
pub struct SchedulerService {
    store: Arc<dyn Store>,
    config: TickworkConfig,
    clock: Arc<dyn Clock>,
    ledger: CreditLedger,
    history: ExecutionLog,
    limiter: Arc<RateLimiter>,
    queue: Arc<QueueProcessor>,
    executor: Arc<TaskExecutor>,
    registry: Arc<JobRegistry>,
    watcher: Arc<ReconciliationWatcher>,
    /// Fired executions, fast-path persistence and burst drains.
    background: TaskTracker,
}

impl SchedulerService {
    pub fn builder(store: Arc<dyn Store>) -> SchedulerServiceBuilder {
        SchedulerServiceBuilder {
            store,
            config: TickworkConfig::default(),
            clock: None,
            prober: None,
            admin: None,
            cipher: None,
        }
    }

    /// Watch tenants until `shutdown` flips to true, then retire every
    /// trigger and wait for in-flight work to finish.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("scheduler service started");
        self.watcher.run(shutdown).await;
        self.registry.disarm_everything();
        self.background.close();
        self.background.wait().await;
        info!("scheduler service stopped");
    }

    // --- tenant lifecycle ----------------------------------------------------

    /// Start reconciling `tenant`. Idempotent.
    pub fn on_tenant_added(&self, tenant: &TenantId) -> Result<bool> {
        validate_tenant(tenant)?;
        Ok(self.watcher.on_tenant_added(tenant))
    }

    /// Stop reconciling `tenant` and drop its in-memory state. Idempotent.
    pub async fn on_tenant_removed(&self, tenant: &TenantId) -> bool {
        self.watcher.on_tenant_removed(tenant).await
    }

    /// Create the tenant record (and optionally its secret and opening
    /// balance) and start watching it.
    pub async fn register_tenant(
        &self,
        tenant: &TenantId,
        secret: Option<&str>,
        credits: u64,
    ) -> Result<()> {
        validate_tenant(tenant)?;
        self.store
            .set(
                &paths::tenant(tenant),
                json!({ "created_at": self.clock.now() }),
            )
            .await?;
        if let Some(secret) = secret {
            self.set_secret(tenant, secret).await?;
        }
        if credits > 0 {
            self.ledger.grant(tenant, credits).await?;
        }
        self.watcher.on_tenant_added(tenant);
        info!(tenant = %tenant, "tenant registered");
        Ok(())
    }

    /// Tear the tenant down, then delete everything stored for it.
    pub async fn remove_tenant(&self, tenant: &TenantId) -> Result<()> {
        validate_tenant(tenant)?;
        self.watcher.on_tenant_removed(tenant).await;
        self.store.remove(&paths::tenant(tenant)).await?;
        info!(tenant = %tenant, "tenant removed");
        Ok(())
    }

    pub async fn set_secret(&self, tenant: &TenantId, secret: &str) -> Result<()> {
        validate_tenant(tenant)?;
        self.store.set(&paths::secret(tenant), json!(secret)).await?;
        self.queue.forget_secret(tenant);
        Ok(())
    }

    // --- jobs ----------------------------------------------------------------

    /// Store a new job. Jobs beyond the tenant's free allowance are billed
    /// per run. The watcher arms it from the resulting change event.
    pub async fn create_job(&self, tenant: &TenantId, draft: JobDraft) -> Result<Job> {
        validate_tenant(tenant)?;
        CronSchedule::parse(&draft.schedule)?;

        let existing = self.store.children(&paths::jobs(tenant)).await?.len();
        let job = Job {
            id: JobId::new(),
            name: draft.name,
            task: draft.task,
            schedule: draft.schedule,
            enabled: draft.enabled,
            is_billed: existing >= self.config.billing.free_job_limit,
            run_count: 0,
            last_run_at: None,
            last_status: None,
            created_at: Some(self.clock.now()),
        };
        self.store
            .set(&paths::job(tenant, &job.id), serde_json::to_value(&job)?)
            .await?;
        info!(tenant = %tenant, job = %job.id, kind = %job.kind(), billed = job.is_billed, "job created");
        Ok(job)
    }

    pub async fn set_job_enabled(&self, tenant: &TenantId, id: &JobId, enabled: bool) -> Result<()> {
        let outcome = self
            .store
            .transaction(&paths::job(tenant, id), &mut |current| match current {
                Some(Value::Object(fields)) => {
                    let mut next = fields.clone();
                    next.insert("enabled".into(), json!(enabled));
                    TxAction::Commit(Value::Object(next))
                }
                _ => TxAction::Abort,
            })
            .await?;
        if !outcome.committed {
            return Err(job_not_found(tenant, id));
        }
        debug!(tenant = %tenant, job = %id, enabled, "job toggled");
        Ok(())
    }

    pub async fn delete_job(&self, tenant: &TenantId, id: &JobId) -> Result<()> {
        let path = paths::job(tenant, id);
        if self.store.get(&path).await?.is_none() {
            return Err(job_not_found(tenant, id));
        }
        self.store.remove(&path).await?;
        info!(tenant = %tenant, job = %id, "job deleted");
        Ok(())
    }

    pub async fn job(&self, tenant: &TenantId, id: &JobId) -> Result<Job> {
        self.executor
            .load_job(tenant, id)
            .await?
            .ok_or_else(|| job_not_found(tenant, id))
    }

    /// Every decodable job of the tenant, in key order.
    pub async fn jobs(&self, tenant: &TenantId) -> Result<Vec<Job>> {
        let children = self.store.children(&paths::jobs(tenant)).await?;
        Ok(children
            .into_iter()
            .filter_map(|(key, value)| Job::from_value(JobId::from(key), value).ok())
            .collect())
    }

    /// Run a job immediately, outside its schedule. Counts against the
    /// tenant's request window.
    #[instrument(skip_all, fields(tenant = %tenant, job = %id))]
    pub async fn run_job_now(&self, tenant: &TenantId, id: &JobId) -> Result<Outcome> {
        self.limiter.check(tenant)?;
        let job = self.job(tenant, id).await?;
        Ok(self.executor.execute(tenant, &job).await)
    }

    // --- cipher requests -------------------------------------------------------

    /// Encrypt or decrypt `payload` for the tenant.
    ///
    /// With a secret on hand the result is computed and returned at once;
    /// the completed queue item, the credit deduction and the usage count
    /// are written afterwards in the background. Otherwise the request is
    /// queued and a burst drain is started.
    #[instrument(skip_all, fields(tenant = %tenant, %action))]
    pub async fn submit_queue_item(
        &self,
        tenant: &TenantId,
        action: CipherAction,
        payload: &str,
    ) -> Result<Submission> {
        validate_tenant(tenant)?;
        self.limiter.check(tenant)?;
        let cost = self.config.billing.request_cost;
        self.ledger.ensure_available(tenant, cost).await?;

        let id = QueueItemId::new();
        let secret = match self.queue.secret(tenant).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(tenant = %tenant, "secret lookup failed, queueing request: {e}");
                None
            }
        };

        if let Some(secret) = secret {
            match self.queue.cipher().apply(action, payload, &secret) {
                Ok(result) => {
                    self.persist_completed(tenant, &id, action, payload, &result);
                    return Ok(Submission::completed(id, result));
                }
                Err(CipherError::Decrypt(msg)) => return Err(SchedulerError::Decryption(msg)),
                Err(e) => warn!(tenant = %tenant, "immediate {action} failed, queueing: {e}"),
            }
        }

        self.ledger.check_and_deduct(tenant, cost).await?;
        self.queue.enqueue(tenant, &id, action, payload).await?;
        if let Err(e) = bump_usage(self.store.as_ref(), tenant, action).await {
            warn!(tenant = %tenant, "usage update failed: {e}");
        }

        let queue = self.queue.clone();
        let drain_tenant = tenant.clone();
        self.background.spawn(async move {
            let report = queue.burst_drain(&drain_tenant).await;
            debug!(tenant = %drain_tenant, ?report, "burst drain finished");
        });
        Ok(Submission::queued(id))
    }

    /// Background half of the immediate path. Errors are logged only; the
    /// caller already has its result. A tenant removed in the meantime gets
    /// nothing written back.
    fn persist_completed(
        &self,
        tenant: &TenantId,
        id: &QueueItemId,
        action: CipherAction,
        payload: &str,
        result: &str,
    ) {
        let now = self.clock.now();
        let item = QueueItem {
            id: id.clone(),
            action,
            payload: payload.to_string(),
            status: QueueStatus::Completed,
            result: Some(result.to_string()),
            error: None,
            created_at: now,
            claimed_at: None,
            processed_at: Some(now),
        };
        let store = self.store.clone();
        let ledger = self.ledger.clone();
        let cost = self.config.billing.request_cost;
        let tenant = tenant.clone();

        self.background.spawn(async move {
            match store.get(&paths::tenant(&tenant)).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(tenant = %tenant, item = %item.id, "tenant removed, completed item not recorded");
                    return;
                }
                Err(e) => warn!(tenant = %tenant, "tenant lookup failed: {e}"),
            }
            let written = match serde_json::to_value(&item) {
                Ok(value) => store
                    .set(&paths::queue_item(&tenant, &item.id), value)
                    .await
                    .map_err(SchedulerError::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                warn!(tenant = %tenant, item = %item.id, "failed to record completed item: {e}");
            }
            if let Err(e) = ledger.check_and_deduct(&tenant, cost).await {
                warn!(tenant = %tenant, item = %item.id, "post-response credit deduction failed: {e}");
            }
            if let Err(e) = bump_usage(store.as_ref(), &tenant, action).await {
                warn!(tenant = %tenant, "usage update failed: {e}");
            }
        });
    }

    #[instrument(skip_all, fields(tenant = %tenant, item = %id))]
    pub async fn queue_item(&self, tenant: &TenantId, id: &QueueItemId) -> Result<QueueItem> {
        self.queue
            .item(tenant, id)
            .await?
            .ok_or_else(|| SchedulerError::QueueItemNotFound {
                tenant: tenant.clone(),
                id: id.clone(),
            })
    }

    /// Return items stuck in `processing` for longer than `older_than`
    /// to `pending`.
    pub async fn reclaim_stranded(&self, tenant: &TenantId, older_than: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| SchedulerError::External(e.to_string()))?;
        self.queue.reclaim_stranded(tenant, self.clock.now() - age).await
    }

    // --- credits, history, usage ---------------------------------------------

    pub async fn grant_credits(&self, tenant: &TenantId, amount: u64) -> Result<u64> {
        validate_tenant(tenant)?;
        let balance = self.ledger.grant(tenant, amount).await?;
        info!(tenant = %tenant, amount, balance, "credits granted");
        Ok(balance)
    }

    pub async fn balance(&self, tenant: &TenantId) -> Result<u64> {
        self.ledger.balance(tenant).await
    }

    pub async fn recent_logs(&self, tenant: &TenantId, limit: usize) -> Result<Vec<LogEntry>> {
        self.history.recent(tenant, limit).await
    }

    pub async fn usage(&self, tenant: &TenantId) -> Result<Usage> {
        match self.store.get(&paths::usage(tenant)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Usage::default()),
        }
    }

    // --- introspection ---------------------------------------------------------

    /// Wait for every background task started so far (fired executions,
    /// post-response persistence, burst drains).
    pub async fn flush_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn watcher(&self) -> &ReconciliationWatcher {
        &self.watcher
    }

    pub fn config(&self) -> &TickworkConfig {
        &self.config
    }
}

fn validate_tenant(tenant: &TenantId) -> Result<()> {
    if tenant.is_valid() {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTenant(tenant.to_string()))
    }
}

fn job_not_found(tenant: &TenantId, id: &JobId) -> SchedulerError {
    SchedulerError::JobNotFound {
        tenant: tenant.clone(),
        id: id.clone(),
    }
}

async fn bump_usage(store: &dyn Store, tenant: &TenantId, action: CipherAction) -> Result<()> {
    store
        .transaction(&paths::usage(tenant), &mut |current| {
            let mut usage: Usage = current
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            usage.requests += 1;
            match action {
                CipherAction::Encrypt => usage.encrypt += 1,
                CipherAction::Decrypt => usage.decrypt += 1,
            }
            match serde_json::to_value(&usage) {
                Ok(value) => TxAction::Commit(value),
                Err(_) => TxAction::Abort,
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tickwork_store::SqliteStore;

    use crate::testing::FailingWrites;
    use crate::types::JobTask;

    struct Always200;

    #[async_trait]
    impl Prober for Always200 {
        async fn probe(&self, _url: &str, _timeout: Duration) -> std::result::Result<u16, String> {
            Ok(200)
        }
    }

    fn service() -> (Arc<SqliteStore>, SchedulerService) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = SchedulerService::builder(store.clone())
            .prober(Arc::new(Always200))
            .build()
            .unwrap();
        (store, service)
    }

    fn ping_draft() -> JobDraft {
        JobDraft {
            name: "home".into(),
            task: JobTask::Ping {
                url: "http://x".into(),
                expected_status: None,
            },
            schedule: "* * * * *".into(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn jobs_past_the_free_limit_are_billed() {
        let (_store, service) = service();
        let t = TenantId::from("t");
        for _ in 0..5 {
            assert!(!service.create_job(&t, ping_draft()).await.unwrap().is_billed);
        }
        assert!(service.create_job(&t, ping_draft()).await.unwrap().is_billed);
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected_on_create() {
        let (_store, service) = service();
        let mut draft = ping_draft();
        draft.schedule = "every tuesday".into();
        let err = service.create_job(&"t".into(), draft).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEDULE");
    }

    #[tokio::test]
    async fn immediate_path_answers_and_persists_in_background() {
        let (_store, service) = service();
        let t = TenantId::from("t");
        service.register_tenant(&t, Some("s"), 3).await.unwrap();

        let sub = service
            .submit_queue_item(&t, CipherAction::Encrypt, "hello")
            .await
            .unwrap();
        assert_eq!(sub.status, QueueStatus::Completed);
        let ciphertext = sub.result.clone().unwrap();

        service.flush_background().await;
        let item = service.queue_item(&t, &sub.id).await.unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert_eq!(item.result.as_deref(), Some(ciphertext.as_str()));
        assert_eq!(service.balance(&t).await.unwrap(), 2);
        let usage = service.usage(&t).await.unwrap();
        assert_eq!((usage.requests, usage.encrypt), (1, 1));

        let back = service
            .submit_queue_item(&t, CipherAction::Decrypt, &ciphertext)
            .await
            .unwrap();
        assert_eq!(back.result.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn corrupt_ciphertext_is_returned_to_the_caller() {
        let (_store, service) = service();
        let t = TenantId::from("t");
        service.register_tenant(&t, Some("s"), 3).await.unwrap();

        let err = service
            .submit_queue_item(&t, CipherAction::Decrypt, "not base64!")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DECRYPTION_ERROR");
        service.flush_background().await;
        assert_eq!(service.balance(&t).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn without_secret_requests_are_queued() {
        let (store, service) = service();
        let t = TenantId::from("t");
        service.register_tenant(&t, None, 1).await.unwrap();

        let sub = service
            .submit_queue_item(&t, CipherAction::Encrypt, "hello")
            .await
            .unwrap();
        assert_eq!(sub.status, QueueStatus::Pending);
        assert!(sub.result.is_none());
        service.flush_background().await;

        assert_eq!(service.queue_item(&t, &sub.id).await.unwrap().status, QueueStatus::Pending);
        assert_eq!(service.balance(&t).await.unwrap(), 0);

        // Once a secret exists, the queued item drains.
        service.set_secret(&t, "s").await.unwrap();
        let report = service.queue.drain_once(&t).await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(store.get(&paths::queue_item(&t, &sub.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn requests_need_credit() {
        let (_store, service) = service();
        let t = TenantId::from("t");
        service.register_tenant(&t, Some("s"), 0).await.unwrap();
        let err = service
            .submit_queue_item(&t, CipherAction::Encrypt, "x")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PAYMENT_REQUIRED");
    }

    #[tokio::test]
    async fn run_job_now_reports_missing_jobs() {
        let (_store, service) = service();
        let err = service
            .run_job_now(&"t".into(), &JobId::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn toggling_and_deleting_unknown_jobs_fail() {
        let (_store, service) = service();
        let t = TenantId::from("t");
        let missing = JobId::from("missing");
        assert!(service.set_job_enabled(&t, &missing, false).await.is_err());
        assert!(service.delete_job(&t, &missing).await.is_err());

        let job = service.create_job(&t, ping_draft()).await.unwrap();
        service.set_job_enabled(&t, &job.id, false).await.unwrap();
        assert!(!service.job(&t, &job.id).await.unwrap().enabled);
        service.delete_job(&t, &job.id).await.unwrap();
        assert!(service.jobs(&t).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slashes_in_tenant_ids_are_rejected() {
        let (_store, service) = service();
        let err = service
            .register_tenant(&TenantId::from("a/b"), None, 0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TENANT");
    }

    #[tokio::test]
    async fn failed_background_write_does_not_retract_the_answer() {
        let store = FailingWrites::new(&["/queue/"]);
        let service = SchedulerService::builder(store.clone())
            .prober(Arc::new(Always200))
            .build()
            .unwrap();
        let t = TenantId::from("t");
        service.register_tenant(&t, Some("s"), 3).await.unwrap();

        let sub = service
            .submit_queue_item(&t, CipherAction::Encrypt, "hello")
            .await
            .unwrap();
        assert_eq!(sub.status, QueueStatus::Completed);
        let ciphertext = sub.result.clone().unwrap();
        assert_eq!(AeadCipher.decrypt(&ciphertext, "s").unwrap(), "hello");

        service.flush_background().await;
        assert!(service.queue_item(&t, &sub.id).await.is_err());
        // The rest of the bookkeeping still happened.
        assert_eq!(service.balance(&t).await.unwrap(), 2);
        assert_eq!(service.usage(&t).await.unwrap().requests, 1);
    }

    #[tokio::test]
    async fn removed_tenant_gets_no_background_writes() {
        let (store, service) = service();
        let t = TenantId::from("t");
        service.register_tenant(&t, Some("s"), 3).await.unwrap();

        let sub = service
            .submit_queue_item(&t, CipherAction::Encrypt, "hello")
            .await
            .unwrap();
        assert!(sub.result.is_some());
        // Gone before the background half gets to run.
        store.remove("tenants/t").await.unwrap();
        service.flush_background().await;

        assert!(store.children("tenants/t/queue").await.unwrap().is_empty());
        assert!(store.get("tenants/t/credits").await.unwrap().is_none());
        assert!(store.get("tenants/t/usage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclaim_uses_the_service_clock() {
        struct At(chrono::DateTime<chrono::Utc>);
        impl Clock for At {
            fn now(&self) -> chrono::DateTime<chrono::Utc> {
                self.0
            }
        }
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let claimed = chrono::DateTime::parse_from_rfc3339("2026-03-04T11:50:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let service = SchedulerService::builder(store.clone())
            .prober(Arc::new(Always200))
            .clock(Arc::new(At(claimed + chrono::Duration::minutes(10))))
            .build()
            .unwrap();
        let t = TenantId::from("t");
        store
            .set(
                "tenants/t/queue/a",
                json!({"action": "encrypt", "payload": "x", "status": "processing",
                       "created_at": claimed, "claimed_at": claimed}),
            )
            .await
            .unwrap();

        // Claimed exactly ten minutes ago: not older than ten minutes.
        assert_eq!(service.reclaim_stranded(&t, Duration::from_secs(600)).await.unwrap(), 0);
        assert_eq!(service.reclaim_stranded(&t, Duration::from_secs(599)).await.unwrap(), 1);
    }
}
