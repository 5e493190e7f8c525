//! Keeps the [`JobRegistry`] in step with the stored job definitions.
//!
//! Each watched tenant gets one task holding a subscription on
//! `tenants/{tenant}/jobs` (never the whole tenant record, which also holds
//! logs and queue items). Every notification triggers a full-snapshot
//! reconcile; a burst of notifications is coalesced into one. A tenant's
//! reconciles run on its own task, so they never interleave with each
//! other, while different tenants reconcile independently.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tickwork_core::{JobId, TenantId};
use tickwork_store::{ChangeKind, Notification, Store, Subscription};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::paths;
use crate::registry::{ArmResult, JobRegistry};
use crate::types::Job;

/// Drops tenant-local state (rate window, cached secret) after teardown.
pub type TeardownFn = Arc<dyn Fn(&TenantId) + Send + Sync>;

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub armed: usize,
    pub unchanged: usize,
    pub disarmed: usize,
    pub invalid: usize,
}

pub struct ReconciliationWatcher {
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    tenants: DashMap<TenantId, JoinHandle<()>>,
    teardown: TeardownFn,
}

impl ReconciliationWatcher {
    pub fn new(store: Arc<dyn Store>, registry: Arc<JobRegistry>, teardown: TeardownFn) -> Self {
        Self {
            store,
            registry,
            tenants: DashMap::new(),
            teardown,
        }
    }

    /// Start watching `tenant`. Returns false if it was already watched.
    ///
    /// The subscription is opened before the initial snapshot is read, so a
    /// change landing in between is still seen.
    pub fn on_tenant_added(&self, tenant: &TenantId) -> bool {
        if !tenant.is_valid() {
            warn!(tenant = %tenant, "ignoring invalid tenant id");
            return false;
        }
        match self.tenants.entry(tenant.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_finished() {
                    return false;
                }
                let subscription = self.store.subscribe(&paths::jobs(tenant));
                occupied.insert(self.spawn_watch(tenant.clone(), subscription));
            }
            Entry::Vacant(vacant) => {
                let subscription = self.store.subscribe(&paths::jobs(tenant));
                vacant.insert(self.spawn_watch(tenant.clone(), subscription));
            }
        }
        info!(tenant = %tenant, "tenant watch started");
        true
    }

    /// Stop watching `tenant`, retire its triggers and drop its local state.
    /// Returns false if it was not watched.
    pub async fn on_tenant_removed(&self, tenant: &TenantId) -> bool {
        let Some((_, task)) = self.tenants.remove(tenant) else {
            return false;
        };
        task.abort();
        // Wait for the task to unwind so its subscription is dropped and
        // no reconcile can arm anything after disarm_all below.
        let _ = task.await;

        let disarmed = self.registry.disarm_all(tenant);
        (self.teardown)(tenant);
        info!(tenant = %tenant, disarmed, "tenant watch torn down");
        true
    }

    pub fn is_watching(&self, tenant: &TenantId) -> bool {
        self.tenants.contains_key(tenant)
    }

    pub fn watched_tenants(&self) -> Vec<TenantId> {
        self.tenants.iter().map(|e| e.key().clone()).collect()
    }

    /// Follow tenant additions and removals under `tenants` until `shutdown`
    /// flips to true, then tear every watch down.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tenants = self.store.subscribe(paths::TENANTS);
        self.resync().await;
        info!(tenants = self.tenants.len(), "reconciliation watcher started");

        loop {
            tokio::select! {
                notification = tenants.next() => match notification {
                    Some(Notification::Change(event)) => {
                        let tenant = TenantId::from(event.key);
                        match event.kind {
                            ChangeKind::Added => {
                                self.on_tenant_added(&tenant);
                            }
                            ChangeKind::Removed => {
                                self.on_tenant_removed(&tenant).await;
                            }
                            ChangeKind::Changed => {}
                        }
                    }
                    Some(Notification::Lagged(n)) => {
                        warn!(missed = n, "tenant feed lagged, resyncing");
                        self.resync().await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop_all().await;
        info!("reconciliation watcher stopped");
    }

    /// Bring the watched set in line with the stored tenant list.
    pub async fn resync(&self) {
        let stored = match self.store.children(paths::TENANTS).await {
            Ok(children) => children,
            Err(e) => {
                warn!("tenant resync failed: {e}");
                return;
            }
        };
        let present: HashSet<TenantId> = stored
            .into_iter()
            .map(|(key, _)| TenantId::from(key))
            .collect();

        for tenant in &present {
            self.on_tenant_added(tenant);
        }
        for tenant in self.watched_tenants() {
            if !present.contains(&tenant) {
                self.on_tenant_removed(&tenant).await;
            }
        }
    }

    async fn stop_all(&self) {
        for tenant in self.watched_tenants() {
            if let Some((_, task)) = self.tenants.remove(&tenant) {
                task.abort();
                let _ = task.await;
            }
        }
    }

    fn spawn_watch(&self, tenant: TenantId, subscription: Subscription) -> JoinHandle<()> {
        tokio::spawn(watch_tenant(
            tenant,
            subscription,
            self.store.clone(),
            self.registry.clone(),
        ))
    }
}

async fn watch_tenant(
    tenant: TenantId,
    mut subscription: Subscription,
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
) {
    run_reconcile(&tenant, store.as_ref(), &registry).await;

    while let Some(first) = subscription.next().await {
        let mut coalesced = 1;
        if let Notification::Lagged(n) = first {
            debug!(tenant = %tenant, missed = n, "job feed lagged");
        }
        while subscription.try_next().is_some() {
            coalesced += 1;
        }
        debug!(tenant = %tenant, coalesced, "job definitions changed");
        run_reconcile(&tenant, store.as_ref(), &registry).await;
    }
    debug!(tenant = %tenant, "job feed closed");
}

async fn run_reconcile(tenant: &TenantId, store: &dyn Store, registry: &JobRegistry) {
    match reconcile(tenant, store, registry).await {
        Ok(summary) => debug!(tenant = %tenant, ?summary, "reconciled"),
        Err(e) => warn!(tenant = %tenant, "reconcile failed: {e}"),
    }
}

/// Full-snapshot diff of the tenant's stored jobs against its armed triggers.
pub async fn reconcile(
    tenant: &TenantId,
    store: &dyn Store,
    registry: &JobRegistry,
) -> Result<ReconcileSummary> {
    let snapshot = store.children(&paths::jobs(tenant)).await?;
    let mut summary = ReconcileSummary::default();
    let mut present = HashSet::with_capacity(snapshot.len());

    for (key, value) in snapshot {
        let id = JobId::from(key);
        present.insert(id.clone());
        match Job::from_value(id.clone(), value) {
            Ok(job) if job.enabled => match registry.arm(tenant, &job) {
                ArmResult::Armed => summary.armed += 1,
                ArmResult::Unchanged => summary.unchanged += 1,
                ArmResult::Invalid => summary.invalid += 1,
            },
            Ok(_) => {
                if registry.disarm(tenant, &id) {
                    summary.disarmed += 1;
                }
            }
            Err(e) => {
                warn!(tenant = %tenant, job = %id, "malformed job definition: {e}");
                summary.invalid += 1;
                if registry.disarm(tenant, &id) {
                    summary.disarmed += 1;
                }
            }
        }
    }

    for id in registry.armed_for(tenant) {
        if !present.contains(&id) && registry.disarm(tenant, &id) {
            summary.disarmed += 1;
        }
    }
    Ok(summary)
}
