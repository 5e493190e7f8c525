//! Live trigger handles, one per armed job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tickwork_core::{JobId, TenantId};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::schedule::{Clock, CronSchedule};
use crate::types::Job;

/// A fire time missed by more than this (process suspended, clock jump) is
/// skipped instead of fired late.
const MAX_LATENESS: Duration = Duration::from_secs(30);

/// Registry key: one handle per `(tenant, job)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub tenant: TenantId,
    pub job: JobId,
}

impl JobKey {
    pub fn new(tenant: TenantId, job: JobId) -> Self {
        Self { tenant, job }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.job)
    }
}

/// Called on every schedule tick. Must return quickly; the execution itself
/// belongs on a separate task so retiring a handle never cancels a run.
pub type FireFn = Arc<dyn Fn(JobKey) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmResult {
    /// A new trigger was installed (any previous one retired first).
    Armed,
    /// A trigger for the same schedule was already live.
    Unchanged,
    /// The schedule did not parse; no trigger remains for the key.
    Invalid,
}

struct ArmedHandle {
    schedule: String,
    retired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ArmedHandle {
    /// Stop future firings. An execution already handed to `on_fire` keeps running.
    fn retire(self) {
        self.retired.store(true, Ordering::Release);
        self.task.abort();
    }
}

pub struct JobRegistry {
    handles: DashMap<JobKey, ArmedHandle>,
    clock: Arc<dyn Clock>,
    on_fire: FireFn,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>, on_fire: FireFn) -> Self {
        Self {
            handles: DashMap::new(),
            clock,
            on_fire,
        }
    }

    /// Install a trigger for the job's current schedule.
    ///
    /// Retire-then-install happens under the key's map entry, so concurrent
    /// calls for one key never leave two live triggers. Must be called from
    /// within a Tokio runtime.
    pub fn arm(&self, tenant: &TenantId, job: &Job) -> ArmResult {
        let key = JobKey::new(tenant.clone(), job.id.clone());

        let schedule = match CronSchedule::parse(&job.schedule) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(job = %key, "job left unscheduled: {e}");
                self.disarm(tenant, &job.id);
                return ArmResult::Invalid;
            }
        };

        match self.handles.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().schedule == job.schedule && !occupied.get().task.is_finished() {
                    return ArmResult::Unchanged;
                }
                let fresh = self.spawn_trigger(key.clone(), schedule);
                occupied.insert(fresh).retire();
                info!(job = %key, schedule = %job.schedule, "job re-armed");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.spawn_trigger(key.clone(), schedule));
                info!(job = %key, schedule = %job.schedule, "job armed");
            }
        }
        ArmResult::Armed
    }

    /// Retire the key's trigger, if any.
    pub fn disarm(&self, tenant: &TenantId, job: &JobId) -> bool {
        let key = JobKey::new(tenant.clone(), job.clone());
        match self.handles.remove(&key) {
            Some((_, handle)) => {
                handle.retire();
                debug!(job = %key, "job disarmed");
                true
            }
            None => false,
        }
    }

    /// Retire every trigger belonging to `tenant`. Returns how many were live.
    pub fn disarm_all(&self, tenant: &TenantId) -> usize {
        let mut retired = Vec::new();
        self.handles.retain(|key, handle| {
            if &key.tenant == tenant {
                retired.push((handle.retired.clone(), handle.task.abort_handle()));
                false
            } else {
                true
            }
        });
        for (flag, task) in &retired {
            flag.store(true, Ordering::Release);
            task.abort();
        }
        if !retired.is_empty() {
            info!(tenant = %tenant, count = retired.len(), "tenant jobs disarmed");
        }
        retired.len()
    }

    /// Retire everything; used on service shutdown.
    pub fn disarm_everything(&self) {
        let keys: Vec<JobKey> = self.handles.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.handles.remove(&key) {
                handle.retire();
            }
        }
    }

    /// Job ids currently armed for `tenant`.
    pub fn armed_for(&self, tenant: &TenantId) -> Vec<JobId> {
        self.handles
            .iter()
            .filter(|e| &e.key().tenant == tenant)
            .map(|e| e.key().job.clone())
            .collect()
    }

    pub fn is_armed(&self, tenant: &TenantId, job: &JobId) -> bool {
        self.handles
            .contains_key(&JobKey::new(tenant.clone(), job.clone()))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn spawn_trigger(&self, key: JobKey, schedule: CronSchedule) -> ArmedHandle {
        let retired = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(trigger_loop(
            key,
            schedule.clone(),
            self.clock.clone(),
            retired.clone(),
            self.on_fire.clone(),
        ));
        ArmedHandle {
            schedule: schedule.expression().to_string(),
            retired,
            task,
        }
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        self.disarm_everything();
    }
}

/// Sleep until each upcoming fire time and hand the key to `on_fire`.
///
/// Fire times come from the wall clock once, at arm time; after that the
/// loop walks the schedule on the monotonic clock, so a wall-clock jump
/// cannot fire the same tick twice.
async fn trigger_loop(
    key: JobKey,
    schedule: CronSchedule,
    clock: Arc<dyn Clock>,
    retired: Arc<AtomicBool>,
    on_fire: FireFn,
) {
    let mut cursor = clock.now();
    let mut anchor = Instant::now();

    loop {
        let Some(next) = schedule.next_after(cursor) else {
            debug!(job = %key, "schedule has no further fire times");
            return;
        };
        let wait = (next - cursor).to_std().unwrap_or_default();
        let deadline = anchor + wait;
        tokio::time::sleep_until(deadline).await;

        let late = Instant::now().saturating_duration_since(deadline);
        if late > MAX_LATENESS {
            warn!(job = %key, late_secs = late.as_secs(), "fire time missed, skipping");
            cursor = clock.now();
            anchor = Instant::now();
            continue;
        }
        cursor = next;
        anchor = deadline;

        if retired.load(Ordering::Acquire) {
            return;
        }
        debug!(job = %key, at = %next, "job fired");
        on_fire(key.clone());
    }
}
