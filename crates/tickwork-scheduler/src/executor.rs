use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{json, Value};
use tickwork_core::{JobId, TenantId, TickworkConfig};
use tickwork_store::{Store, TxAction};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::history::ExecutionLog;
use crate::ledger::CreditLedger;
use crate::paths;
use crate::queue::QueueProcessor;
use crate::registry::JobKey;
use crate::runners::{ping::run_ping, RunReport, Runners};
use crate::schedule::Clock;
use crate::types::{Job, JobKind, JobTask, LogEntry, Outcome};

pub const NO_CREDITS_MESSAGE: &str = "No credits remaining";
const SUCCESS_PLACEHOLDER: &str = "Completed successfully";
const FAILURE_PLACEHOLDER: &str = "Execution failed";

/// Runs one job: billing, dispatch, normalisation, history.
pub struct TaskExecutor {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    history: ExecutionLog,
    queue: Arc<QueueProcessor>,
    runners: Runners,
    clock: Arc<dyn Clock>,
    run_cost: u64,
    ping_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<QueueProcessor>,
        runners: Runners,
        clock: Arc<dyn Clock>,
        config: &TickworkConfig,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(store.clone()),
            history: ExecutionLog::new(store.clone(), config.logs.retention),
            store,
            queue,
            runners,
            clock,
            run_cost: config.billing.run_cost,
            ping_timeout: Duration::from_secs(config.ping.effective_timeout_secs()),
        }
    }

    /// Current stored definition of a job, if it still exists.
    pub async fn load_job(&self, tenant: &TenantId, id: &JobId) -> Result<Option<Job>> {
        match self.store.get(&paths::job(tenant, id)).await? {
            Some(value) => Ok(Some(Job::from_value(id.clone(), value)?)),
            None => Ok(None),
        }
    }

    /// Scheduled-trigger entry point.
    ///
    /// The definition is re-read at fire time; a job deleted or disabled
    /// since it was armed does nothing.
    pub async fn fire(&self, key: JobKey) -> Option<Outcome> {
        let job = match self.load_job(&key.tenant, &key.job).await {
            Ok(Some(job)) if job.enabled => job,
            Ok(Some(_)) => {
                debug!(job = %key, "fired job is disabled, skipping");
                return None;
            }
            Ok(None) => {
                debug!(job = %key, "fired job no longer exists, skipping");
                return None;
            }
            Err(e) => {
                warn!(job = %key, "could not reload fired job: {e}");
                return None;
            }
        };
        Some(self.execute(&key.tenant, &job).await)
    }

    /// Run `job` now and record the result.
    ///
    /// Never fails: every problem becomes a failed [`Outcome`].
    pub async fn execute(&self, tenant: &TenantId, job: &Job) -> Outcome {
        let started = Instant::now();

        let report = match self.charge(tenant, job).await {
            Ok(()) => self.dispatch_guarded(tenant, job).await,
            Err(SchedulerError::InsufficientCredit { .. }) => RunReport::failed(NO_CREDITS_MESSAGE),
            Err(e) => RunReport::failed(format!("Credit check failed: {e}")),
        };

        let outcome = normalize(report, started.elapsed());

        if outcome.success && outcome.idle {
            debug!(tenant = %tenant, job = %job.id, "idle run, nothing recorded");
            return outcome;
        }

        info!(
            tenant = %tenant,
            job = %job.id,
            kind = %job.kind(),
            success = outcome.success,
            duration_ms = outcome.duration_ms,
            "job executed"
        );
        self.record(tenant, job, &outcome).await;
        outcome
    }

    async fn charge(&self, tenant: &TenantId, job: &Job) -> Result<()> {
        if !job.is_billed || job.kind() == JobKind::QueueWorker {
            return Ok(());
        }
        self.ledger.check_and_deduct(tenant, self.run_cost).await?;
        Ok(())
    }

    async fn dispatch_guarded(&self, tenant: &TenantId, job: &Job) -> RunReport {
        match AssertUnwindSafe(self.dispatch(tenant, job))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(tenant = %tenant, job = %job.id, "runner panicked: {reason}");
                RunReport::failed(format!("Runner panicked: {reason}"))
            }
        }
    }

    async fn dispatch(&self, tenant: &TenantId, job: &Job) -> RunReport {
        match &job.task {
            JobTask::Ping {
                url,
                expected_status,
            } => {
                run_ping(
                    self.runners.prober.as_ref(),
                    url,
                    *expected_status,
                    self.ping_timeout,
                )
                .await
            }
            JobTask::AdminOp { operation } => {
                match self.runners.admin.run(tenant, operation).await {
                    Ok(summary) => RunReport::ok(summary),
                    Err(e) => RunReport::failed(e.to_string()),
                }
            }
            JobTask::QueueWorker => match self.queue.drain_once(tenant).await {
                Ok(report) => RunReport::from_drain(&report),
                Err(e) => RunReport::failed(e.to_string()),
            },
        }
    }

    /// Bump the job's counters, then append history. Nothing is logged for
    /// a job (or tenant) removed while it ran. Failures here are reported
    /// and swallowed so the job keeps its schedule.
    async fn record(&self, tenant: &TenantId, job: &Job, outcome: &Outcome) {
        let now = self.clock.now();
        let status = outcome.status();
        let updated = self
            .store
            .transaction(&paths::job(tenant, &job.id), &mut |current| match current {
                Some(Value::Object(fields)) => {
                    let mut next = fields.clone();
                    let runs = next.get("run_count").and_then(Value::as_u64).unwrap_or(0);
                    next.insert("run_count".into(), json!(runs + 1));
                    next.insert("last_run_at".into(), json!(now));
                    next.insert("last_status".into(), json!(status));
                    TxAction::Commit(Value::Object(next))
                }
                _ => TxAction::Abort,
            })
            .await;
        match updated {
            Ok(tx) if !tx.committed => {
                debug!(tenant = %tenant, job = %job.id, "job removed while running, not recorded");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(tenant = %tenant, job = %job.id, "failed to update job counters: {e}");
            }
        }

        let entry = LogEntry {
            id: String::new(),
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            kind: job.kind(),
            status,
            message: outcome.message.clone(),
            duration_ms: outcome.duration_ms,
            timestamp: now,
        };
        if let Err(e) = self.history.append(tenant, &entry).await {
            error!(tenant = %tenant, job = %job.id, "failed to write execution log: {e}");
        }
    }
}

fn normalize(report: RunReport, elapsed: Duration) -> Outcome {
    let message = if report.message.trim().is_empty() {
        if report.success {
            SUCCESS_PLACEHOLDER
        } else {
            FAILURE_PLACEHOLDER
        }
        .to_string()
    } else {
        report.message
    };
    Outcome {
        success: report.success,
        message,
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        idle: report.idle,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
