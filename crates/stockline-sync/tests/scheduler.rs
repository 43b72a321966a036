//! Background passes: connectivity, manual requests and backoff.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use common::{
    auto_config, local_stock, manual_config, memory_db, seed_stock, wait_for_status, Failure,
    RecordingEmitter, StubRemote,
};
use stockline_core::{ConnectivityState, InventoryAdjustment, MutationStatus, NetworkKind};
use stockline_sync::{NetworkMonitor, RemoteError, SyncConfig, SyncEngine, SyncEngineBuilder};

async fn build(
    config: SyncConfig,
    remote: Arc<StubRemote>,
    monitor: NetworkMonitor,
    emitter: Arc<RecordingEmitter>,
) -> SyncEngine {
    SyncEngineBuilder::new(config)
        .with_database(memory_db().await)
        .with_remote(remote)
        .with_monitor(monitor)
        .with_emitter(emitter)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn adjustment_made_offline_syncs_once_connectivity_returns() {
    let remote = StubRemote::new();
    remote.set_stock(42, 10);
    let monitor = NetworkMonitor::new(ConnectivityState::Offline);
    let engine = build(
        auto_config(),
        remote.clone(),
        monitor.clone(),
        Arc::new(RecordingEmitter::default()),
    )
    .await;
    seed_stock(engine.database(), 42, 10).await;
    engine.start().await;

    let mutation = engine
        .adjust_inventory(InventoryAdjustment::new(42, -3, "damage"))
        .await
        .unwrap();
    assert_eq!(local_stock(&engine, 42).await, Some(7));

    let mut status = engine.status_stream();
    assert_eq!(status.borrow().pending_count, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(remote.calls().is_empty());

    monitor.report(ConnectivityState::Online, NetworkKind::Wifi);

    let settled = wait_for_status(&mut status, |s| s.pending_count == 0 && !s.in_progress).await;
    assert!(settled.last_sync.is_some());
    assert_eq!(settled.connectivity, ConnectivityState::Online);

    assert_eq!(remote.stock(42), 7);
    assert_eq!(remote.applied(), vec![mutation.client_id.clone()]);

    let row = engine.database().mutations().get(mutation.id).await.unwrap().unwrap();
    assert_eq!(row.sync_state, MutationStatus::Synced);

    engine.shutdown().await;
    assert!(!engine.is_running().await);
}

#[tokio::test]
async fn requests_during_a_pass_coalesce_into_one_more_pass() {
    let gate = Arc::new(Semaphore::new(0));
    let remote = StubRemote::gated(gate.clone());
    let emitter = Arc::new(RecordingEmitter::default());
    let engine = build(
        manual_config(),
        remote.clone(),
        NetworkMonitor::new(ConnectivityState::Online),
        emitter.clone(),
    )
    .await;
    engine.start().await;

    engine
        .adjust_inventory(InventoryAdjustment::new(1, 1, "recount"))
        .await
        .unwrap();
    engine
        .adjust_inventory(InventoryAdjustment::new(2, 1, "recount"))
        .await
        .unwrap();

    engine.request_sync_now();
    remote.entered.notified().await;

    for _ in 0..3 {
        engine.request_sync_now();
    }
    gate.add_permits(100);

    let mut status = engine.status_stream();
    wait_for_status(&mut status, |s| s.pending_count == 0 && !s.in_progress).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let passes = emitter.passes.lock().unwrap().clone();
    assert_eq!(passes.len(), 2);
    assert_eq!(passes[0].processed, 2);
    assert_eq!(passes[1].total(), 0);
    assert_eq!(remote.calls().len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn deferred_work_is_retried_after_backoff() {
    let remote = StubRemote::new();
    let emitter = Arc::new(RecordingEmitter::default());
    let engine = build(
        auto_config(),
        remote.clone(),
        NetworkMonitor::new(ConnectivityState::Online),
        emitter.clone(),
    )
    .await;

    let mutation = engine
        .adjust_inventory(InventoryAdjustment::new(42, 2, "incoming"))
        .await
        .unwrap();
    remote.fail(
        &mutation.client_id,
        Failure::Once(RemoteError::from_status(429, "slow down")),
    );

    engine.start().await;

    let mut status = engine.status_stream();
    wait_for_status(&mut status, |s| s.pending_count == 0 && s.last_sync.is_some()).await;

    assert_eq!(remote.calls().len(), 2);
    assert_eq!(remote.applied(), vec![mutation.client_id.clone()]);
    assert!(emitter.passes.lock().unwrap().iter().any(|p| p.deferred == 1));

    let row = engine.database().mutations().get(mutation.id).await.unwrap().unwrap();
    assert_eq!(row.attempts, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn explicit_request_syncs_while_nominally_offline() {
    let remote = StubRemote::new();
    remote.set_stock(7, 3);
    let emitter = Arc::new(RecordingEmitter::default());
    let engine = build(
        manual_config(),
        remote.clone(),
        NetworkMonitor::new(ConnectivityState::Offline),
        emitter.clone(),
    )
    .await;
    engine.start().await;

    let mutation = engine
        .adjust_inventory(InventoryAdjustment::new(7, 1, "recount"))
        .await
        .unwrap();
    engine.request_sync_now();

    let mut status = engine.status_stream();
    let settled =
        wait_for_status(&mut status, |s| s.pending_count == 0 && s.last_sync.is_some()).await;
    assert_eq!(settled.connectivity, ConnectivityState::Offline);

    assert_eq!(emitter.pass_count(), 1);
    assert_eq!(remote.calls(), vec![mutation.client_id.clone()]);
    assert_eq!(remote.stock(7), 4);

    engine.shutdown().await;
}

#[tokio::test]
async fn enqueue_while_offline_waits_for_connectivity() {
    let remote = StubRemote::new();
    let emitter = Arc::new(RecordingEmitter::default());
    let engine = build(
        auto_config(),
        remote.clone(),
        NetworkMonitor::new(ConnectivityState::Offline),
        emitter.clone(),
    )
    .await;
    engine.start().await;

    engine
        .adjust_inventory(InventoryAdjustment::new(7, 1, "recount"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(emitter.pass_count(), 0);
    assert!(remote.calls().is_empty());
    assert_eq!(engine.sync_status().await.unwrap().pending_count, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn status_stream_follows_connectivity() {
    let monitor = NetworkMonitor::new(ConnectivityState::Offline);
    let engine = build(
        manual_config(),
        StubRemote::new(),
        monitor.clone(),
        Arc::new(RecordingEmitter::default()),
    )
    .await;
    engine.start().await;

    let mut status = engine.status_stream();
    monitor.report(ConnectivityState::Online, NetworkKind::Ethernet);
    wait_for_status(&mut status, |s| s.connectivity.is_online()).await;

    monitor.report(ConnectivityState::Offline, NetworkKind::None);
    wait_for_status(&mut status, |s| !s.connectivity.is_online()).await;

    engine.shutdown().await;
}
