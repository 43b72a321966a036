//! # Store Transactions
//!
//! Multi-row writes that must commit together.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Operation          │ One transaction contains                          │
//! │─────────────────────┼───────────────────────────────────────────────────│
//! │  commit_command     │ local effects + INSERT mutation (Pending)         │
//! │  confirm_mutation   │ ack effects   + mark Synced                       │
//! │  upsert_entities    │ rows of one table                                 │
//! │  refresh_table      │ fetched rows + pending overlay + fetch_log stamp  │
//! │  clear_cache        │ DELETE every entity table + fetch_log             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each one holds the write gate for its whole duration.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::category::CategoryRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::fetch_log::FetchLogRepository;
use crate::repository::inventory::InventoryRepository;
use crate::repository::mutation::MutationRepository;
use crate::repository::product::ProductRepository;
use stockline_core::mutation::canonical_payload;
use stockline_core::{EntityBatch, EntityTable, LocalEffect, Mutation, MutationId};

/// What a [`Database::refresh_table`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshOutcome {
    /// Fetched rows written.
    pub rows: usize,

    /// Never-dispatched mutations re-applied on top of them.
    pub rebased: usize,

    /// Dispatched-but-unacknowledged mutations left out. Non-zero means the
    /// table was not stamped as fresh.
    pub held_back: usize,
}

impl RefreshOutcome {
    pub fn is_stamped(&self) -> bool {
        self.held_back == 0
    }
}

impl Database {
    /// Replaces rows of one entity table by primary key.
    pub async fn upsert_entities(&self, batch: &EntityBatch) -> DbResult<usize> {
        let _guard = self.gate().acquire().await;
        let mut tx = self.pool().begin().await?;

        let count = upsert_batch(&mut tx, batch).await?;
        commit(tx).await?;

        debug!(table = %batch.table(), count, "Entities upserted");
        Ok(count)
    }

    /// Applies a command's optimistic effects and appends its mutation.
    ///
    /// Either both are durable when this returns `Ok`, or neither is.
    pub async fn commit_command(
        &self,
        action_type: &str,
        payload: &serde_json::Value,
        effects: &[LocalEffect],
    ) -> DbResult<Mutation> {
        let payload = canonical_payload(payload);

        let _guard = self.gate().acquire().await;
        let mut tx = self.pool().begin().await?;

        let now = Utc::now();
        for effect in effects {
            apply_effect(&mut tx, effect, now).await?;
        }
        let mutation = MutationRepository::insert(&mut tx, action_type, &payload).await?;

        commit(tx).await?;

        info!(
            id = %mutation.id,
            action_type = %action_type,
            effects = effects.len(),
            "Command committed locally"
        );
        Ok(mutation)
    }

    /// Marks a mutation synced and applies the effects derived from its ack.
    ///
    /// ## Returns
    /// * `Ok(true)` - Confirmed now
    /// * `Ok(false)` - Already terminal; nothing was applied
    pub async fn confirm_mutation(&self, id: MutationId, effects: &[LocalEffect]) -> DbResult<bool> {
        let _guard = self.gate().acquire().await;
        let mut tx = self.pool().begin().await?;

        if !MutationRepository::mark_synced_in(&mut tx, id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = Utc::now();
        for effect in effects {
            apply_effect(&mut tx, effect, now).await?;
        }

        commit(tx).await?;
        Ok(true)
    }

    /// Stores a fresh remote copy of a table and stamps its fetch time.
    ///
    /// `effects_of` maps an unconfirmed mutation to its optimistic local
    /// effects. Mutations never dispatched are re-applied on top of the
    /// fetched rows so optimistic state survives a refresh. Stock adjustments
    /// only touch products present in the batch; other cached rows already
    /// carry them.
    ///
    /// A mutation that was dispatched without an ack may or may not be part
    /// of the fetched rows, so it is held back instead. While anything is
    /// held back the table's fetch stamp is cleared, so the next fresh read
    /// fetches again once the outcome is known.
    pub async fn refresh_table<F>(
        &self,
        batch: &EntityBatch,
        fetched_at: DateTime<Utc>,
        effects_of: F,
    ) -> DbResult<RefreshOutcome>
    where
        F: Fn(&Mutation) -> Vec<LocalEffect> + Send,
    {
        let table = batch.table();
        let refreshed_products: HashSet<i64> = match batch {
            EntityBatch::Inventory(rows) => rows.iter().map(|r| r.product_id).collect(),
            _ => HashSet::new(),
        };
        let touches_cache = |effect: &LocalEffect| match effect {
            LocalEffect::AdjustStock { product_id, .. } => refreshed_products.contains(product_id),
            other => other.table() == table,
        };

        let _guard = self.gate().acquire().await;
        let mut tx = self.pool().begin().await?;

        let rows = upsert_batch(&mut tx, batch).await?;
        let unconfirmed = MutationRepository::unconfirmed_in(&mut tx).await?;

        let mut outcome = RefreshOutcome {
            rows,
            ..RefreshOutcome::default()
        };
        for mutation in &unconfirmed {
            let effects: Vec<LocalEffect> = effects_of(mutation)
                .into_iter()
                .filter(|e| e.table() == table && touches_cache(e))
                .collect();
            if effects.is_empty() {
                continue;
            }
            if mutation.dispatch_attempted() {
                outcome.held_back += 1;
                continue;
            }
            for effect in &effects {
                apply_effect(&mut tx, effect, fetched_at).await?;
            }
            outcome.rebased += 1;
        }

        if outcome.held_back == 0 {
            FetchLogRepository::stamp_in(&mut tx, table, fetched_at).await?;
        } else {
            FetchLogRepository::clear_in(&mut tx, table).await?;
        }
        commit(tx).await?;

        debug!(
            %table,
            rows = outcome.rows,
            rebased = outcome.rebased,
            held_back = outcome.held_back,
            "Table refreshed from remote"
        );
        Ok(outcome)
    }

    /// Drops every cached entity and the fetch log.
    ///
    /// The mutation log is never touched: unsynced work survives a cache
    /// clear unchanged.
    pub async fn clear_cache(&self) -> DbResult<()> {
        let _guard = self.gate().acquire().await;
        let mut tx = self.pool().begin().await?;

        for table in EntityTable::ALL {
            let sql = format!("DELETE FROM {}", table.as_str());
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM fetch_log").execute(&mut *tx).await?;

        commit(tx).await?;

        info!("Entity cache cleared");
        Ok(())
    }
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Sqlite>) -> DbResult<()> {
    tx.commit()
        .await
        .map_err(|e| DbError::TransactionFailed(e.to_string()))
}

async fn upsert_batch(conn: &mut SqliteConnection, batch: &EntityBatch) -> DbResult<usize> {
    match batch {
        EntityBatch::Products(rows) => ProductRepository::upsert_in(conn, rows).await,
        EntityBatch::Inventory(rows) => InventoryRepository::upsert_in(conn, rows).await,
        EntityBatch::Customers(rows) => CustomerRepository::upsert_in(conn, rows).await,
        EntityBatch::Categories(rows) => CategoryRepository::upsert_in(conn, rows).await,
    }
}

async fn apply_effect(
    conn: &mut SqliteConnection,
    effect: &LocalEffect,
    at: DateTime<Utc>,
) -> DbResult<()> {
    match effect {
        LocalEffect::AdjustStock { product_id, delta } => {
            InventoryRepository::adjust_in(conn, *product_id, *delta, at).await
        }
        LocalEffect::Upsert(batch) => upsert_batch(conn, batch).await.map(|_| ()),
        LocalEffect::LinkCustomer {
            local_id,
            remote_id,
        } => CustomerRepository::link_remote_in(conn, local_id, *remote_id).await,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
