// End-to-end scenarios across watcher, registry, executor and queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tickwork_core::config::QueueConfig;
use tickwork_core::{QueueItemId, TenantId};
use tickwork_scheduler::cipher::{AeadCipher, Cipher};
use tickwork_scheduler::queue::QueueProcessor;
use tickwork_scheduler::{CipherAction, QueueStatus, RunStatus, SystemClock};
use tickwork_store::{SqliteStore, Store};

use common::{harness, ping_every_minute, settle};

#[tokio::test(start_paused = true)]
async fn scenario_a_one_tick_runs_the_ping_once() {
    let h = harness();
    let t = TenantId::from("t");
    h.service.register_tenant(&t, None, 0).await.unwrap();
    let job = h.service.create_job(&t, ping_every_minute("home")).await.unwrap();
    settle().await;
    assert!(h.service.registry().is_armed(&t, &job.id));

    // Clock reads 12:00:30; the next tick is 12:01:00.
    tokio::time::sleep(Duration::from_secs(31)).await;
    h.service.flush_background().await;

    assert_eq!(h.prober.calls(), 1);
    let stored = h.service.job(&t, &job.id).await.unwrap();
    assert_eq!(stored.run_count, 1);
    assert_eq!(stored.last_status, Some(RunStatus::Success));

    let logs = h.service.recent_logs(&t, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, RunStatus::Success);
    assert!(logs[0].message.starts_with("HTTP 200"));
}

#[tokio::test]
async fn scenario_b_drain_encrypts_deterministically() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let t = TenantId::from("t");
    store.set("tenants/t/secret", json!("s")).await.unwrap();
    let queue = QueueProcessor::new(
        store.clone(),
        Arc::new(AeadCipher),
        Arc::new(SystemClock),
        &QueueConfig::default(),
    );

    let id = QueueItemId::new();
    queue.enqueue(&t, &id, CipherAction::Encrypt, "hello").await.unwrap();
    let report = queue.drain_once(&t).await.unwrap();
    assert_eq!((report.processed, report.errors), (1, 0));

    let item = queue.item(&t, &id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    let ciphertext = item.result.unwrap();
    assert_eq!(ciphertext, AeadCipher.encrypt("hello", "s").unwrap());
    assert_eq!(AeadCipher.decrypt(&ciphertext, "s").unwrap(), "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_c_racing_drains_complete_the_item_once() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let t = TenantId::from("t");
    store.set("tenants/t/secret", json!("s")).await.unwrap();
    let queue = Arc::new(QueueProcessor::new(
        store.clone(),
        Arc::new(AeadCipher),
        Arc::new(SystemClock),
        &QueueConfig::default(),
    ));
    let id = QueueItemId::new();
    queue.enqueue(&t, &id, CipherAction::Encrypt, "hello").await.unwrap();

    let a = tokio::spawn({
        let (queue, t) = (queue.clone(), t.clone());
        async move { queue.drain_once(&t).await.unwrap() }
    });
    let b = tokio::spawn({
        let (queue, t) = (queue.clone(), t.clone());
        async move { queue.drain_once(&t).await.unwrap() }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.processed + b.processed, 1);
    let completed = store
        .query_children("tenants/t/queue", "status", &json!("completed"), 10)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
}

#[tokio::test]
async fn scenario_d_sixth_job_without_credit_fails_visibly() {
    let h = harness();
    let t = TenantId::from("t");
    h.service.register_tenant(&t, None, 0).await.unwrap();
    for i in 0..5 {
        let job = h
            .service
            .create_job(&t, ping_every_minute(&format!("free-{i}")))
            .await
            .unwrap();
        assert!(!job.is_billed);
    }
    let sixth = h.service.create_job(&t, ping_every_minute("paid")).await.unwrap();
    assert!(sixth.is_billed);

    let outcome = h.service.run_job_now(&t, &sixth.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "No credits remaining");
    assert_eq!(h.prober.calls(), 0);

    let logs = h.service.recent_logs(&t, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].job_id, sixth.id);
    assert_eq!(logs[0].status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn scenario_e_tenant_removal_clears_handles_and_subscription() {
    let h = harness();
    let t = TenantId::from("t");
    h.service.register_tenant(&t, None, 0).await.unwrap();
    h.service.create_job(&t, ping_every_minute("home")).await.unwrap();
    settle().await;
    assert_eq!(h.service.registry().armed_for(&t).len(), 1);
    assert_eq!(h.store.open_subscriptions("tenants/t/jobs"), 1);

    h.service.remove_tenant(&t).await.unwrap();

    assert!(h.service.registry().armed_for(&t).is_empty());
    assert_eq!(h.store.open_subscriptions("tenants/t/jobs"), 0);
    assert!(!h.service.watcher().is_watching(&t));

    // Nothing fires afterwards.
    tokio::time::sleep(Duration::from_secs(120)).await;
    h.service.flush_background().await;
    assert_eq!(h.prober.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_e_removal_seen_through_the_tenant_feed() {
    let h = harness();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = h.service.clone();
    let running = tokio::spawn(async move { runner.run(shutdown_rx).await });
    settle().await;

    let t = TenantId::from("t");
    h.store.set("tenants/t", json!({})).await.unwrap();
    settle().await;
    assert!(h.service.watcher().is_watching(&t));

    h.service.create_job(&t, ping_every_minute("home")).await.unwrap();
    settle().await;
    assert_eq!(h.service.registry().armed_for(&t).len(), 1);

    h.store.remove("tenants/t").await.unwrap();
    settle().await;
    assert!(h.service.registry().armed_for(&t).is_empty());
    assert_eq!(h.store.open_subscriptions("tenants/t/jobs"), 0);

    shutdown_tx.send(true).unwrap();
    running.await.unwrap();
    assert!(h.service.registry().is_empty());
}
