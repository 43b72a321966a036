//! # Sync Engine
//!
//! The owner object the UI collaborator talks to. It holds the store, the
//! action registry, the processor, the network monitor and the scheduler;
//! nothing in the crate is global.
//!
//! ## Two-Phase Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  enqueue_command(action_type, payload)                                  │
//! │      │                                                                  │
//! │      ├─ registry.require()         unknown type → UnknownAction        │
//! │      ├─ handler.local_effects()    bad payload  → InvalidPayload       │
//! │      ├─ db.commit_command()        effects + mutation, one transaction │
//! │      ├─ publish status                                                  │
//! │      └─ wake scheduler             returns here (phase one done)       │
//! │                                                                         │
//! │  ... later, in the scheduler task ...                                  │
//! │                                                                         │
//! │  pass → Synced / Failed  ──► status_stream() + SyncEventEmitter        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```ignore
//! let engine = SyncEngineBuilder::new(config)
//!     .with_monitor(monitor.clone())
//!     .build()
//!     .await?;
//! engine.start().await;
//!
//! engine.adjust_inventory(InventoryAdjustment::new(42, -3, "damage")).await?;
//! monitor.report(ConnectivityState::Online, NetworkKind::Wifi);
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stockline_core::{
    Category, Customer, EntityBatch, EntityFilter, EntityTable, InventoryAdjustment,
    InventoryRecord, Mutation, MutationId, NewCustomer, PassReport, Product, SyncStatus,
    CUSTOMER_CREATE, INVENTORY_ADJUST,
};
use stockline_db::{Database, DbConfig, DbError};

use crate::config::SyncConfig;
use crate::dispatch::ActionRegistry;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::http::HttpRemoteAuthority;
use crate::network::NetworkMonitor;
use crate::processor::SyncProcessor;
use crate::read::{CacheResolver, Freshness, QueryResult};
use crate::remote::RemoteAuthority;
use crate::scheduler::Scheduler;

/// How often a waiter re-checks the drain flag while a pass is running.
const IDLE_POLL: Duration = Duration::from_millis(50);

// =============================================================================
// Engine Core
// =============================================================================

/// State shared between the engine handle and the scheduler task.
pub(crate) struct EngineCore {
    config: Arc<SyncConfig>,
    db: Arc<Database>,
    registry: Arc<ActionRegistry>,
    processor: SyncProcessor,
    monitor: NetworkMonitor,
    emitter: Arc<dyn SyncEventEmitter>,
    status_tx: watch::Sender<SyncStatus>,
}

impl EngineCore {
    pub(crate) fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub(crate) fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub(crate) fn emitter(&self) -> &dyn SyncEventEmitter {
        self.emitter.as_ref()
    }

    /// Derives the aggregate status from the mutation log.
    pub(crate) async fn status(&self) -> SyncResult<SyncStatus> {
        let mutations = self.db.mutations();
        Ok(SyncStatus {
            pending_count: mutations.count_pending().await?,
            failed_count: mutations.count_failed().await?,
            last_sync: mutations.last_synced_at().await?,
            in_progress: self.processor.is_draining(),
            connectivity: self.monitor.current_state(),
        })
    }

    /// Recomputes the status and pushes it to watchers and the emitter.
    pub(crate) async fn publish_status(&self) {
        match self.status().await {
            Ok(status) => {
                self.emitter.emit_status(&status);
                self.status_tx.send_replace(status);
            }
            Err(e) => warn!(?e, "Could not derive sync status"),
        }
    }

    /// One pass through the single-drainer guard, with status updates on
    /// both edges.
    pub(crate) async fn run_pass(&self, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let guard = self.processor.try_begin()?;
        self.publish_status().await;

        let result = self.processor.drain(&guard, cancel).await;
        drop(guard);

        self.publish_status().await;
        if let Ok(report) = &result {
            self.emitter.emit_pass(report);
        }
        result
    }

    /// Returns once no pass is draining.
    pub(crate) async fn wait_until_idle(&self) {
        let mut rx = self.status_tx.subscribe();
        while self.processor.is_draining() {
            let _ = tokio::time::timeout(IDLE_POLL, rx.changed()).await;
        }
    }

    /// Drops old Synced rows per `synced_retention_days` (0 keeps them all).
    pub(crate) async fn prune_synced(&self) {
        let days = self.config.sync.synced_retention_days;
        if days == 0 {
            return;
        }
        match self.db.mutations().cleanup_synced(days).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, days, "Pruned synced mutations"),
            Err(e) => warn!(?e, "Could not prune synced mutations"),
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Handle to a running offline-first engine.
///
/// Dropping the handle cancels the scheduler; call [`SyncEngine::shutdown`]
/// to also wait for it.
pub struct SyncEngine {
    core: Arc<EngineCore>,
    resolver: CacheResolver,
    scheduler: Scheduler,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Starts the background scheduler. Idempotent.
    pub async fn start(&self) {
        self.scheduler.start(self.core.clone()).await;
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// Cancels any running pass and waits for the scheduler to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down sync engine");
        self.scheduler.shutdown().await;
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Applies a command locally and queues it for the remote authority.
    ///
    /// Returns once the optimistic write and the mutation are durable. The
    /// remote outcome is observed through [`SyncEngine::status_stream`].
    pub async fn enqueue_command(
        &self,
        action_type: &str,
        payload: serde_json::Value,
    ) -> SyncResult<Mutation> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }

        let handler = self.core.registry.require(action_type)?;
        let effects = handler.local_effects(&payload)?;

        let mutation = self
            .core
            .db
            .commit_command(action_type, &payload, &effects)
            .await?;

        self.core.publish_status().await;
        self.scheduler.wake();
        Ok(mutation)
    }

    /// Queues a signed stock adjustment.
    pub async fn adjust_inventory(&self, adjustment: InventoryAdjustment) -> SyncResult<Mutation> {
        let payload = serde_json::to_value(&adjustment)?;
        self.enqueue_command(INVENTORY_ADJUST, payload).await
    }

    /// Queues a customer creation. The row is visible locally under
    /// `customer.id` straight away.
    pub async fn create_customer(&self, customer: NewCustomer) -> SyncResult<Mutation> {
        let payload = serde_json::to_value(&customer)?;
        self.enqueue_command(CUSTOMER_CREATE, payload).await
    }

    // =========================================================================
    // Sync Control
    // =========================================================================

    /// Fresh status derived from the mutation log.
    pub async fn sync_status(&self) -> SyncResult<SyncStatus> {
        self.core.status().await
    }

    /// Receiver that sees every published status.
    pub fn status_stream(&self) -> watch::Receiver<SyncStatus> {
        self.core.status_tx.subscribe()
    }

    /// Asks the scheduler for a pass, even while the monitor reports
    /// Offline. Requests made while one is draining collapse into a single
    /// follow-up pass.
    pub fn request_sync_now(&self) {
        debug!("Sync requested");
        self.scheduler.request();
    }

    /// Runs one pass on the caller's task, regardless of connectivity.
    ///
    /// Fails with [`SyncError::PassInProgress`] when another pass is draining.
    pub async fn run_pass(&self) -> SyncResult<PassReport> {
        self.core.run_pass(&self.cancel.child_token()).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn query(
        &self,
        table: EntityTable,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<EntityBatch>> {
        self.resolver.query(table, filter, freshness).await
    }

    pub async fn products(
        &self,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<Vec<Product>>> {
        self.resolver.products(filter, freshness).await
    }

    pub async fn inventory(
        &self,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<Vec<InventoryRecord>>> {
        self.resolver.inventory(filter, freshness).await
    }

    pub async fn customers(
        &self,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<Vec<Customer>>> {
        self.resolver.customers(filter, freshness).await
    }

    pub async fn categories(&self, freshness: Freshness) -> SyncResult<QueryResult<Vec<Category>>> {
        self.resolver.categories(freshness).await
    }

    /// `MaxAge` from the `[cache]` settings.
    pub fn default_freshness(&self) -> Freshness {
        Freshness::MaxAge(self.core.config.cache.max_age())
    }

    // =========================================================================
    // Operator
    // =========================================================================

    /// Unconfirmed mutations (Pending, InFlight and Failed), oldest first.
    pub async fn pending_mutations(&self) -> SyncResult<Vec<Mutation>> {
        Ok(self.core.db.mutations().list_pending().await?)
    }

    pub async fn failed_mutations(&self) -> SyncResult<Vec<Mutation>> {
        Ok(self.core.db.mutations().list_failed().await?)
    }

    /// Newest mutations in any state.
    pub async fn recent_mutations(&self, limit: u32) -> SyncResult<Vec<Mutation>> {
        Ok(self.core.db.mutations().list_recent(limit).await?)
    }

    /// Puts a Failed mutation back in the queue.
    pub async fn retry_failed(&self, id: MutationId) -> SyncResult<Mutation> {
        let mutation = self.core.db.mutations().retry_failed(id).await?;
        self.core.publish_status().await;
        self.scheduler.wake();
        Ok(mutation)
    }

    /// Deletes a Failed mutation. Its optimistic effects stay in the cache
    /// until the next refresh of the table.
    pub async fn discard_failed(&self, id: MutationId) -> SyncResult<Mutation> {
        let mutation = self.core.db.mutations().discard_failed(id).await?;
        self.core.publish_status().await;
        Ok(mutation)
    }

    /// Drops every cached entity. Queued mutations are untouched.
    pub async fn clear_cache(&self) -> SyncResult<()> {
        Ok(self.core.db.clear_cache().await?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn network(&self) -> &NetworkMonitor {
        &self.core.monitor
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.core.db
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.core.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.core.config
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("device_id", &self.core.config.device_id())
            .field("registry", &self.core.registry)
            .field("monitor", &self.core.monitor)
            .finish()
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SyncEngine`]. Anything not supplied is created from the
/// config.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    db: Option<Arc<Database>>,
    remote: Option<Arc<dyn RemoteAuthority>>,
    registry: Option<ActionRegistry>,
    monitor: Option<NetworkMonitor>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            db: None,
            remote: None,
            registry: None,
            monitor: None,
            emitter: None,
        }
    }

    /// Uses an open store instead of opening `config.database_path()`.
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Uses a custom remote instead of HTTP against `config.remote`.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteAuthority>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replaces the built-in action handlers.
    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Shares a monitor the platform layer already reports into.
    pub fn with_monitor(mut self, monitor: NetworkMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Opens what is missing and reverts mutations a crash left InFlight.
    pub async fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let db = match self.db {
            Some(db) => db,
            None => {
                let path = self.config.database_path();
                info!(?path, "Opening local store");
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DbError::ConnectionFailed(format!("{}: {}", parent.display(), e))
                    })?;
                }
                Arc::new(Database::new(DbConfig::new(path)).await?)
            }
        };

        let remote: Arc<dyn RemoteAuthority> = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemoteAuthority::new(&self.config.remote)?),
        };

        let registry = Arc::new(self.registry.unwrap_or_else(ActionRegistry::with_defaults));
        let monitor = self.monitor.unwrap_or_default();
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        let recovered = db.mutations().recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "Reverted mutations left in flight by a previous run");
        }

        let config = Arc::new(self.config);
        let processor = SyncProcessor::new(
            db.clone(),
            registry.clone(),
            remote.clone(),
            emitter.clone(),
            config.sync.dispatch_timeout(),
        );

        let (status_tx, _) = watch::channel(SyncStatus {
            connectivity: monitor.current_state(),
            ..SyncStatus::default()
        });

        let core = Arc::new(EngineCore {
            config,
            db: db.clone(),
            registry: registry.clone(),
            processor,
            monitor: monitor.clone(),
            emitter,
            status_tx,
        });
        core.publish_status().await;

        let resolver = CacheResolver::new(db, remote, registry, monitor);
        let cancel = CancellationToken::new();

        info!(
            device_id = %core.config.device_id(),
            action_types = ?core.registry.action_types(),
            "Sync engine ready"
        );

        Ok(SyncEngine {
            core,
            resolver,
            scheduler: Scheduler::new(cancel.clone()),
            cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Ack, RemoteError};
    use async_trait::async_trait;
    use serde_json::json;

    struct Accepting;

    #[async_trait]
    impl RemoteAuthority for Accepting {
        async fn submit(
            &self,
            _action_type: &str,
            _payload: &serde_json::Value,
            _client_mutation_id: &str,
        ) -> Result<Ack, RemoteError> {
            Ok(Ack::new(json!({"id": 1})))
        }

        async fn fetch(
            &self,
            table: EntityTable,
            _filter: &EntityFilter,
        ) -> Result<EntityBatch, RemoteError> {
            Ok(EntityBatch::empty(table))
        }
    }

    async fn engine() -> SyncEngine {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        SyncEngineBuilder::new(SyncConfig::new())
            .with_database(db)
            .with_remote(Arc::new(Accepting))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_action() {
        let engine = engine().await;
        let err = engine.enqueue_command("refund", json!({})).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownAction(_)));
        assert_eq!(engine.sync_status().await.unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_payload_without_writing() {
        let engine = engine().await;
        let err = engine
            .adjust_inventory(InventoryAdjustment::new(42, 0, "recount"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(engine.pending_mutations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_stream_follows_enqueue_and_pass() {
        let engine = engine().await;
        let mut rx = engine.status_stream();

        engine
            .adjust_inventory(InventoryAdjustment::new(42, -3, "damage"))
            .await
            .unwrap();
        assert_eq!(rx.borrow_and_update().pending_count, 1);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.processed, 1);

        let status = rx.borrow_and_update().clone();
        assert_eq!(status.pending_count, 0);
        assert!(!status.in_progress);
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let mut config = SyncConfig::new();
        config.device.id.clear();
        let result = SyncEngineBuilder::new(config)
            .with_remote(Arc::new(Accepting))
            .build()
            .await;
        assert!(matches!(result, Err(SyncError::MissingDeviceId)));
    }
}
