//! In-process remote authority and engine fixtures for the integration
//! suites.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};

use stockline_core::{
    Customer, EntityBatch, EntityFilter, EntityTable, InventoryAdjustment, InventoryRecord,
    Mutation, NewCustomer, PassReport, Product, SyncStatus, CUSTOMER_CREATE, INVENTORY_ADJUST,
};
use stockline_db::{Database, DbConfig};
use stockline_sync::{
    Ack, NetworkMonitor, RemoteAuthority, RemoteError, SyncConfig, SyncEngine, SyncEngineBuilder,
    SyncEventEmitter,
};

/// What the stub does with one client mutation id.
#[derive(Debug, Clone)]
pub enum Failure {
    /// Fails the next submit only.
    Once(RemoteError),

    /// Fails every submit.
    Always(RemoteError),

    /// Applies the mutation, then reports a network error (lost ack).
    LoseAck,
}

#[derive(Default)]
struct ServerState {
    stock: HashMap<i64, i64>,
    products: Vec<Product>,
    customers: Vec<Customer>,
    next_customer_id: i64,
    acks: HashMap<String, serde_json::Value>,
    calls: Vec<String>,
    applied: Vec<String>,
    failures: HashMap<String, Failure>,
    fetch_error: Option<RemoteError>,
}

/// Remote authority that deduplicates on `client_mutation_id`.
pub struct StubRemote {
    state: Mutex<ServerState>,
    gate: Option<Arc<Semaphore>>,
    delay: Mutex<Option<Duration>>,

    /// Signalled each time a submit starts.
    pub entered: Notify,
}

impl StubRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Every submit waits for a permit on `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(Some(gate)))
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            state: Mutex::new(ServerState {
                next_customer_id: 100,
                ..ServerState::default()
            }),
            gate,
            delay: Mutex::new(None),
            entered: Notify::new(),
        }
    }

    pub fn set_stock(&self, product_id: i64, quantity: i64) {
        self.state.lock().unwrap().stock.insert(product_id, quantity);
    }

    pub fn stock(&self, product_id: i64) -> i64 {
        self.state.lock().unwrap().stock.get(&product_id).copied().unwrap_or(0)
    }

    pub fn add_product(&self, product: Product) {
        self.state.lock().unwrap().products.push(product);
    }

    pub fn fail(&self, client_id: &str, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(client_id.to_string(), failure);
    }

    pub fn fail_fetch(&self, error: Option<RemoteError>) {
        self.state.lock().unwrap().fetch_error = error;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Client ids in the order submits arrived, duplicates included.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Client ids that changed server state.
    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.state.lock().unwrap().customers.clone()
    }

    fn apply(state: &mut ServerState, action_type: &str, payload: &serde_json::Value) -> Result<serde_json::Value, RemoteError> {
        match action_type {
            INVENTORY_ADJUST => {
                let adjustment: InventoryAdjustment = serde_json::from_value(payload.clone())
                    .map_err(|e| RemoteError::from_status(422, e.to_string()))?;
                let quantity = state.stock.entry(adjustment.product_id).or_insert(0);
                *quantity += adjustment.quantity;
                Ok(json!({"product_id": adjustment.product_id, "quantity": *quantity}))
            }
            CUSTOMER_CREATE => {
                let customer: NewCustomer = serde_json::from_value(payload.clone())
                    .map_err(|e| RemoteError::from_status(422, e.to_string()))?;
                let id = state.next_customer_id;
                state.next_customer_id += 1;
                state.customers.push(Customer {
                    id: format!("remote-{id}"),
                    remote_id: Some(id),
                    name: customer.name,
                    email: customer.email,
                    phone: customer.phone,
                    loyalty_points: 0,
                });
                Ok(json!({"id": id}))
            }
            other => Err(RemoteError::from_status(404, format!("no route for {other}"))),
        }
    }
}

#[async_trait]
impl RemoteAuthority for StubRemote {
    async fn submit(
        &self,
        action_type: &str,
        payload: &serde_json::Value,
        client_mutation_id: &str,
    ) -> Result<Ack, RemoteError> {
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| RemoteError::network("gate closed"))?
                .forget();
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(client_mutation_id.to_string());

        let mut lose_ack = false;
        match state.failures.get(client_mutation_id).cloned() {
            Some(Failure::Once(e)) => {
                state.failures.remove(client_mutation_id);
                return Err(e);
            }
            Some(Failure::Always(e)) => return Err(e),
            Some(Failure::LoseAck) => {
                state.failures.remove(client_mutation_id);
                lose_ack = true;
            }
            None => {}
        }

        if let Some(body) = state.acks.get(client_mutation_id) {
            return Ok(Ack::new(body.clone()));
        }

        let body = Self::apply(&mut state, action_type, payload)?;
        state.acks.insert(client_mutation_id.to_string(), body.clone());
        state.applied.push(client_mutation_id.to_string());

        if lose_ack {
            return Err(RemoteError::network("connection reset before response"));
        }
        Ok(Ack::new(body))
    }

    async fn fetch(
        &self,
        table: EntityTable,
        _filter: &EntityFilter,
    ) -> Result<EntityBatch, RemoteError> {
        let state = self.state.lock().unwrap();
        if let Some(e) = &state.fetch_error {
            return Err(e.clone());
        }
        Ok(match table {
            EntityTable::Products => EntityBatch::Products(state.products.clone()),
            EntityTable::Inventory => EntityBatch::Inventory(
                state
                    .stock
                    .iter()
                    .map(|(&product_id, &quantity)| InventoryRecord {
                        product_id,
                        quantity,
                        low_stock_threshold: None,
                        last_updated: Utc::now(),
                    })
                    .collect(),
            ),
            EntityTable::Customers => EntityBatch::Customers(state.customers.clone()),
            EntityTable::Categories => EntityBatch::Categories(Vec::new()),
        })
    }
}

// =============================================================================
// Recording Emitter
// =============================================================================

/// Keeps every pass report and terminal failure it is handed.
#[derive(Default)]
pub struct RecordingEmitter {
    pub passes: Mutex<Vec<PassReport>>,
    pub failures: Mutex<Vec<(String, String)>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingEmitter {
    pub fn pass_count(&self) -> usize {
        self.passes.lock().unwrap().len()
    }
}

impl SyncEventEmitter for RecordingEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}

    fn emit_pass(&self, report: &PassReport) {
        self.passes.lock().unwrap().push(*report);
    }

    fn emit_mutation_failed(&self, mutation: &Mutation, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((mutation.client_id.clone(), reason.to_string()));
    }

    fn emit_error(&self, message: &str, _retryable: bool) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Config with the automatic triggers off and short timings.
pub fn manual_config() -> SyncConfig {
    let mut config = SyncConfig::new();
    config.sync.auto_sync = false;
    config.sync.dispatch_timeout_secs = 2;
    config.sync.initial_backoff_ms = 50;
    config.sync.max_backoff_secs = 1;
    config.sync.online_debounce_ms = 20;
    config
}

/// Config with every trigger on and short timings.
pub fn auto_config() -> SyncConfig {
    let mut config = manual_config();
    config.sync.auto_sync = true;
    config.sync.poll_interval_secs = 3600;
    config
}

pub async fn memory_db() -> Arc<Database> {
    Arc::new(Database::new(DbConfig::in_memory()).await.unwrap())
}

pub async fn engine_with(
    config: SyncConfig,
    db: Arc<Database>,
    remote: Arc<StubRemote>,
    monitor: NetworkMonitor,
) -> SyncEngine {
    SyncEngineBuilder::new(config)
        .with_database(db)
        .with_remote(remote)
        .with_monitor(monitor)
        .build()
        .await
        .unwrap()
}

/// Manual engine over a fresh in-memory store.
pub async fn manual_engine(remote: Arc<StubRemote>) -> SyncEngine {
    engine_with(manual_config(), memory_db().await, remote, NetworkMonitor::default()).await
}

pub async fn seed_stock(db: &Database, product_id: i64, quantity: i64) {
    db.upsert_entities(&EntityBatch::Inventory(vec![InventoryRecord {
        product_id,
        quantity,
        low_stock_threshold: Some(5),
        last_updated: Utc::now(),
    }]))
    .await
    .unwrap();
}

pub async fn local_stock(engine: &SyncEngine, product_id: i64) -> Option<i64> {
    engine
        .database()
        .inventory()
        .get(product_id)
        .await
        .unwrap()
        .map(|r| r.quantity)
}

/// Waits (bounded) for a published status matching `pred`.
pub async fn wait_for_status(
    rx: &mut watch::Receiver<SyncStatus>,
    pred: impl FnMut(&SyncStatus) -> bool,
) -> SyncStatus {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("status never matched")
        .expect("status channel closed")
        .clone()
}
