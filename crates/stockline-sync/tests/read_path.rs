//! Cache reads, remote refreshes and staleness reporting.

mod common;

use std::time::Duration;

use common::{engine_with, local_stock, manual_config, memory_db, seed_stock, Failure, StubRemote};
use stockline_core::{
    ConnectivityState, EntityBatch, EntityFilter, EntityTable, InventoryAdjustment, NetworkKind,
    NewCustomer, Product,
};
use stockline_sync::{DataSource, Freshness, NetworkMonitor, RemoteError, SyncEngine};

async fn engine(remote: std::sync::Arc<StubRemote>, state: ConnectivityState) -> SyncEngine {
    engine_with(manual_config(), memory_db().await, remote, NetworkMonitor::new(state)).await
}

fn product(id: i64, name: &str) -> Product {
    Product {
        id,
        name: name.to_string(),
        sku: format!("SKU-{id}"),
        barcode: None,
        price_cents: 250,
        category_id: None,
        image_url: None,
        description: None,
        created_at: None,
        updated_at: None,
    }
}

#[tokio::test]
async fn offline_reads_come_from_cache_without_a_fetch_time() {
    let remote = StubRemote::new();
    remote.set_stock(42, 99);
    let engine = engine(remote, ConnectivityState::Offline).await;
    seed_stock(engine.database(), 42, 10).await;

    let result = engine
        .inventory(&EntityFilter::all(), Freshness::PreferFresh)
        .await
        .unwrap();

    assert_eq!(result.source, DataSource::Cache);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].quantity, 10);
    assert!(result.staleness.fetched_at.is_none());
    assert!(result.staleness.age.is_none());
}

#[tokio::test]
async fn refresh_keeps_unconfirmed_adjustments_visible() {
    let remote = StubRemote::new();
    remote.set_stock(42, 10);
    let engine = engine(remote.clone(), ConnectivityState::Offline).await;
    seed_stock(engine.database(), 42, 10).await;

    engine
        .adjust_inventory(InventoryAdjustment::new(42, -3, "damage"))
        .await
        .unwrap();

    engine
        .network()
        .report(ConnectivityState::Online, NetworkKind::Wifi);

    // Remote still says 10; the queued -3 is rebased on top of it
    let result = engine
        .inventory(&EntityFilter::all().product(42), Freshness::PreferFresh)
        .await
        .unwrap();
    assert_eq!(result.source, DataSource::Remote);
    assert_eq!(result.rows[0].quantity, 7);
    assert!(result.staleness.fetched_at.is_some());
    assert!(result.staleness.age.unwrap() < Duration::from_secs(5));

    engine.run_pass().await.unwrap();
    assert_eq!(remote.stock(42), 7);

    // Confirmed now, so a second refresh must not subtract it again
    let result = engine
        .inventory(&EntityFilter::all().product(42), Freshness::PreferFresh)
        .await
        .unwrap();
    assert_eq!(result.rows[0].quantity, 7);
}

#[tokio::test]
async fn refresh_after_a_lost_ack_counts_the_adjustment_once() {
    let remote = StubRemote::new();
    remote.set_stock(42, 10);
    let engine = engine(remote.clone(), ConnectivityState::Online).await;
    seed_stock(engine.database(), 42, 10).await;

    let mutation = engine
        .adjust_inventory(InventoryAdjustment::new(42, -3, "damage"))
        .await
        .unwrap();
    remote.fail(&mutation.client_id, Failure::LoseAck);

    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(remote.stock(42), 7);

    // The remote already holds the -3; it must not be applied again locally
    let result = engine
        .inventory(&EntityFilter::all().product(42), Freshness::PreferFresh)
        .await
        .unwrap();
    assert_eq!(result.source, DataSource::Remote);
    assert_eq!(result.rows[0].quantity, 7);
    assert!(result.staleness.fetched_at.is_none());

    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(remote.stock(42), 7);
    assert_eq!(local_stock(&engine, 42).await, Some(7));
    assert_eq!(engine.sync_status().await.unwrap().pending_count, 0);

    // Left stale, so the next bounded read fetches again and stamps
    let result = engine
        .inventory(
            &EntityFilter::all().product(42),
            Freshness::MaxAge(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    assert_eq!(result.source, DataSource::Remote);
    assert_eq!(result.rows[0].quantity, 7);
    assert!(result.staleness.fetched_at.is_some());
}

#[tokio::test]
async fn remote_failure_serves_the_cache() {
    let remote = StubRemote::new();
    remote.fail_fetch(Some(RemoteError::from_status(502, "bad gateway")));
    let engine = engine(remote, ConnectivityState::Online).await;
    seed_stock(engine.database(), 42, 10).await;

    let result = engine
        .query(EntityTable::Inventory, &EntityFilter::all(), Freshness::PreferFresh)
        .await
        .unwrap();

    assert_eq!(result.source, DataSource::Cache);
    assert!(matches!(result.rows, EntityBatch::Inventory(ref rows) if rows.len() == 1));
    assert!(result.staleness.fetched_at.is_none());
}

#[tokio::test]
async fn max_age_only_refreshes_stale_tables() {
    let remote = StubRemote::new();
    remote.add_product(product(1, "Espresso"));
    let engine = engine(remote.clone(), ConnectivityState::Online).await;

    let first = engine
        .products(&EntityFilter::all(), Freshness::MaxAge(Duration::from_secs(3600)))
        .await
        .unwrap();
    assert_eq!(first.source, DataSource::Remote);
    assert_eq!(first.rows.len(), 1);

    remote.add_product(product(2, "Cortado"));

    let second = engine
        .products(&EntityFilter::all(), Freshness::MaxAge(Duration::from_secs(3600)))
        .await
        .unwrap();
    assert_eq!(second.source, DataSource::Cache);
    assert_eq!(second.rows.len(), 1);
    assert_eq!(second.staleness.fetched_at, first.staleness.fetched_at);

    let third = engine
        .products(&EntityFilter::all(), Freshness::PreferFresh)
        .await
        .unwrap();
    assert_eq!(third.rows.len(), 2);
}

#[tokio::test]
async fn cache_only_never_contacts_the_remote() {
    let remote = StubRemote::new();
    remote.add_product(product(1, "Espresso"));
    let engine = engine(remote, ConnectivityState::Online).await;

    let result = engine
        .products(&EntityFilter::all(), Freshness::CacheOnly)
        .await
        .unwrap();
    assert_eq!(result.source, DataSource::Cache);
    assert!(result.rows.is_empty());
}

#[tokio::test]
async fn offline_customer_survives_a_refresh_and_links_after_sync() {
    let remote = StubRemote::new();
    let engine = engine(remote, ConnectivityState::Online).await;

    let customer = NewCustomer::new("Grace Hopper");
    engine.create_customer(customer.clone()).await.unwrap();

    let before = engine
        .customers(&EntityFilter::all(), Freshness::PreferFresh)
        .await
        .unwrap();
    assert_eq!(before.rows.len(), 1);
    assert_eq!(before.rows[0].id, customer.id);

    engine.run_pass().await.unwrap();

    // The remote now lists the same customer under its own id
    let after = engine
        .customers(&EntityFilter::all(), Freshness::PreferFresh)
        .await
        .unwrap();
    assert_eq!(after.rows.len(), 1);
    assert_eq!(after.rows[0].id, customer.id);
    assert_eq!(after.rows[0].remote_id, Some(100));
}
