//! # Sync Processor
//!
//! Drains the mutation log against the remote authority, one pass at a time.
//!
//! ## Pass Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          One Drain Pass                                 │
//! │                                                                         │
//! │  try_begin() ── already draining? ──► Err(PassInProgress)              │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  recover_in_flight()        stale InFlight → Pending                   │
//! │  list_dispatchable()        snapshot, ascending id                     │
//! │      │                                                                  │
//! │      ▼  for each mutation                                               │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │ cancelled?             → stop, report.cancelled                  │ │
//! │  │ no handler / bad JSON  → Failed                                   │ │
//! │  │ key blocked this pass  → deferred (not dispatched)               │ │
//! │  │ Pending → InFlight                                                │ │
//! │  │ dispatch (bounded by dispatch_timeout)                            │ │
//! │  │   Ok(ack)              → ack effects + Synced   (processed)      │ │
//! │  │   Err(retryable)       → Pending, attempts+1    (deferred, block) │ │
//! │  │   Err(terminal)        → Failed(reason)         (failed)          │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  PassReport { processed, failed, deferred, cancelled }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only storage errors and a [`SyncError::ConcurrencyViolation`] abort a
//! pass. A per-item remote error never does.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stockline_core::{Mutation, MutationStatus, PassReport};
use stockline_db::Database;

use crate::dispatch::{ActionHandler, ActionRegistry};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEventEmitter;
use crate::remote::{RemoteAuthority, RemoteError};

// =============================================================================
// Pass Guard
// =============================================================================

/// Proof that the holder is the only drainer. Released on drop.
#[derive(Debug)]
pub struct PassGuard {
    flag: Arc<AtomicBool>,
}

impl PassGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard { flag: flag.clone() })
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

enum Outcome {
    Synced,
    Deferred,
    Failed,
}

// =============================================================================
// Processor
// =============================================================================

/// Replays pending mutations in creation order.
pub struct SyncProcessor {
    db: Arc<Database>,
    registry: Arc<ActionRegistry>,
    remote: Arc<dyn RemoteAuthority>,
    emitter: Arc<dyn SyncEventEmitter>,
    dispatch_timeout: Duration,
    draining: Arc<AtomicBool>,
}

impl SyncProcessor {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ActionRegistry>,
        remote: Arc<dyn RemoteAuthority>,
        emitter: Arc<dyn SyncEventEmitter>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            remote,
            emitter,
            dispatch_timeout,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A pass is draining right now.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Claims the single drainer slot.
    pub fn try_begin(&self) -> SyncResult<PassGuard> {
        PassGuard::try_acquire(&self.draining).ok_or(SyncError::PassInProgress)
    }

    /// Runs one complete pass.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let guard = self.try_begin()?;
        self.drain(&guard, cancel).await
    }

    /// Drains the current snapshot of pending mutations.
    pub async fn drain(&self, _guard: &PassGuard, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let recovered = self.db.mutations().recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "Reverted interrupted in-flight mutations");
        }

        let snapshot = self.db.mutations().list_dispatchable().await?;
        let mut report = PassReport::default();
        if snapshot.is_empty() {
            debug!("No pending mutations");
            return Ok(report);
        }

        info!(count = snapshot.len(), "Sync pass started");

        let mut blocked: HashSet<String> = HashSet::new();

        for mutation in &snapshot {
            if cancel.is_cancelled() {
                info!(remaining = snapshot.len() as u32 - report.total(), "Sync pass cancelled");
                report.cancelled = true;
                break;
            }

            let Some(handler) = self.registry.get(&mutation.action_type) else {
                let err = SyncError::UnknownAction(mutation.action_type.clone());
                self.fail(mutation, &err.to_string()).await?;
                report.failed += 1;
                continue;
            };

            let checked = mutation
                .payload_json()
                .map_err(SyncError::from)
                .and_then(|payload| handler.validate(&payload).map(|_| payload));
            let payload = match checked {
                Ok(payload) => payload,
                Err(e) => {
                    self.fail(mutation, &e.to_string()).await?;
                    report.failed += 1;
                    continue;
                }
            };

            let key = handler.ordering_key(&payload);
            if let Some(key) = &key {
                if blocked.contains(key) {
                    debug!(id = %mutation.id, key = %key, "Deferred behind an earlier mutation");
                    report.deferred += 1;
                    continue;
                }
            }

            match self.process(handler.as_ref(), mutation, &payload).await? {
                Outcome::Synced => report.processed += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Deferred => {
                    report.deferred += 1;
                    if let Some(key) = key {
                        blocked.insert(key);
                    }
                }
            }
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            deferred = report.deferred,
            cancelled = report.cancelled,
            "Sync pass finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        handler: &dyn ActionHandler,
        mutation: &Mutation,
        payload: &serde_json::Value,
    ) -> SyncResult<Outcome> {
        if !self.db.mutations().mark_in_flight(mutation.id).await? {
            return Err(self.violation(mutation).await);
        }

        debug!(id = %mutation.id, action_type = %mutation.action_type, "Dispatching mutation");

        let result = tokio::time::timeout(
            self.dispatch_timeout,
            handler.dispatch(self.remote.as_ref(), mutation, payload),
        )
        .await
        .unwrap_or_else(|_| Err(RemoteError::timeout(self.dispatch_timeout)));

        match result {
            Ok(ack) => {
                let effects = handler.ack_effects(payload, &ack).unwrap_or_else(|e| {
                    warn!(id = %mutation.id, ?e, "Could not derive ack effects");
                    Vec::new()
                });
                if !self.db.confirm_mutation(mutation.id, &effects).await? {
                    return Err(self.violation(mutation).await);
                }
                debug!(id = %mutation.id, "Mutation confirmed");
                Ok(Outcome::Synced)
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    id = %mutation.id,
                    attempts = mutation.attempts + 1,
                    error = %e,
                    "Retryable dispatch failure"
                );
                self.db.mutations().requeue(mutation.id, &e.to_string()).await?;
                Ok(Outcome::Deferred)
            }
            Err(e) => {
                self.fail(mutation, &e.to_string()).await?;
                Ok(Outcome::Failed)
            }
        }
    }

    async fn fail(&self, mutation: &Mutation, reason: &str) -> SyncResult<()> {
        warn!(
            id = %mutation.id,
            action_type = %mutation.action_type,
            reason = %reason,
            "Mutation failed terminally"
        );
        self.db.mutations().mark_failed(mutation.id, reason).await?;
        self.emitter.emit_mutation_failed(mutation, reason);
        Ok(())
    }

    /// The row changed state under the single drainer.
    async fn violation(&self, mutation: &Mutation) -> SyncError {
        let state = match self.db.mutations().get(mutation.id).await {
            Ok(Some(row)) => row.sync_state,
            Ok(None) | Err(_) => MutationStatus::Failed,
        };
        error!(id = %mutation.id, %state, "Mutation changed state during a pass");
        debug_assert!(
            state == MutationStatus::InFlight,
            "mutation {} was {} under the single drainer",
            mutation.id,
            state
        );
        SyncError::ConcurrencyViolation {
            id: mutation.id,
            state,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEmitter;
    use crate::remote::Ack;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use stockline_core::{EntityBatch, EntityFilter, EntityTable, InventoryRecord, LocalEffect};
    use stockline_db::DbConfig;

    /// Answers each submit with the next scripted result, then succeeds.
    #[derive(Default)]
    struct Scripted {
        script: Mutex<Vec<Result<(), RemoteError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<(), RemoteError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteAuthority for Scripted {
        async fn submit(
            &self,
            _action_type: &str,
            _payload: &serde_json::Value,
            client_mutation_id: &str,
        ) -> Result<Ack, RemoteError> {
            self.seen.lock().unwrap().push(client_mutation_id.to_string());
            let next = self.script.lock().unwrap().pop().unwrap_or(Ok(()));
            next.map(|_| Ack::new(json!({"ok": true})))
        }

        async fn fetch(
            &self,
            table: EntityTable,
            _filter: &EntityFilter,
        ) -> Result<EntityBatch, RemoteError> {
            Ok(EntityBatch::empty(table))
        }
    }

    async fn setup(script: Vec<Result<(), RemoteError>>) -> (Arc<Database>, Arc<Scripted>, SyncProcessor) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let remote = Arc::new(Scripted::new(script));
        let processor = SyncProcessor::new(
            db.clone(),
            Arc::new(ActionRegistry::with_defaults()),
            remote.clone(),
            Arc::new(NoOpEmitter),
            Duration::from_secs(5),
        );
        (db, remote, processor)
    }

    async fn enqueue(db: &Database, product_id: i64, delta: i64) -> Mutation {
        db.commit_command(
            "inventory_adjust",
            &json!({"product_id": product_id, "quantity": delta, "reason": "recount"}),
            &[LocalEffect::AdjustStock { product_id, delta }],
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_pass_guard_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = PassGuard::try_acquire(&flag).unwrap();
        assert!(PassGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(PassGuard::try_acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_empty_queue_reports_nothing() {
        let (_db, _remote, processor) = setup(vec![]).await;
        let report = processor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, PassReport::default());
        assert!(!processor.is_draining());
    }

    #[tokio::test]
    async fn test_retryable_failure_blocks_same_key() {
        let (db, remote, processor) = setup(vec![Err(RemoteError::from_status(503, "busy"))]).await;
        db.upsert_entities(&EntityBatch::Inventory(vec![InventoryRecord {
            product_id: 42,
            quantity: 10,
            low_stock_threshold: None,
            last_updated: chrono::Utc::now(),
        }]))
        .await
        .unwrap();

        let first = enqueue(&db, 42, 5).await;
        let second = enqueue(&db, 42, -2).await;
        let other = enqueue(&db, 7, 1).await;

        let report = processor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.deferred, 2);

        // Only the first attempt and the unrelated product reached the remote
        assert_eq!(
            *remote.seen.lock().unwrap(),
            vec![first.client_id.clone(), other.client_id.clone()]
        );

        let first = db.mutations().get(first.id).await.unwrap().unwrap();
        assert_eq!(first.sync_state, MutationStatus::Pending);
        assert_eq!(first.attempts, 1);
        assert!(first.last_error.unwrap().contains("503"));

        let second = db.mutations().get(second.id).await.unwrap().unwrap();
        assert_eq!(second.attempts, 0);

        // Next pass drains both in order
        let report = processor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(db.mutations().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_and_bad_payload_fail() {
        let (db, remote, processor) = setup(vec![]).await;
        db.mutations().append("refund", &json!({"amount": 5})).await.unwrap();
        db.mutations()
            .append("inventory_adjust", &json!("not an object"))
            .await
            .unwrap();

        let report = processor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.processed, 0);
        assert!(remote.seen.lock().unwrap().is_empty());

        let failed = db.mutations().list_failed().await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("No handler registered"));
        assert!(failed[1]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("Invalid payload"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_dispatch() {
        let (db, remote, processor) = setup(vec![]).await;
        enqueue(&db, 42, 1).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = processor.run_pass(&cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.total(), 0);
        assert!(remote.seen.lock().unwrap().is_empty());
        assert_eq!(db.mutations().count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_in_flight_is_recovered() {
        let (db, _remote, processor) = setup(vec![]).await;
        let m = enqueue(&db, 42, 1).await;
        db.mutations().mark_in_flight(m.id).await.unwrap();

        let report = processor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.processed, 1);
    }
}
