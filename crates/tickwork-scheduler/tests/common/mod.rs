// Shared fixtures for the scheduler integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tickwork_scheduler::runners::Prober;
use tickwork_scheduler::{Clock, JobDraft, JobTask, SchedulerService};
use tickwork_store::SqliteStore;

/// Wall clock the test moves by hand.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Answers every probe with the same status and counts calls.
pub struct StaticProber {
    pub status: u16,
    pub calls: AtomicUsize,
}

impl StaticProber {
    pub fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, _url: &str, _timeout: Duration) -> Result<u16, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

/// 2026-03-04 12:00:30 UTC, half-way through a minute.
pub fn half_past_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 30).unwrap()
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub prober: Arc<StaticProber>,
    pub service: Arc<SchedulerService>,
}

pub fn harness() -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let prober = StaticProber::new(200);
    let service = SchedulerService::builder(store.clone())
        .prober(prober.clone())
        .clock(ManualClock::at(half_past_noon()))
        .build()
        .unwrap();
    Harness {
        store,
        prober,
        service: Arc::new(service),
    }
}

/// Let spawned tasks (watchers, reconciles) run without moving time.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn ping_every_minute(name: &str) -> JobDraft {
    JobDraft {
        name: name.to_string(),
        task: JobTask::Ping {
            url: "https://example.com/health".to_string(),
            expected_status: None,
        },
        schedule: "* * * * *".to_string(),
        enabled: true,
    }
}

pub fn queue_worker() -> JobDraft {
    JobDraft {
        name: "worker".to_string(),
        task: JobTask::QueueWorker,
        schedule: "* * * * *".to_string(),
        enabled: true,
    }
}
