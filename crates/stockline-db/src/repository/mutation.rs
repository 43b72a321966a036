//! # Mutation Repository
//!
//! The durable mutation log: the queue the sync processor drains.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  COMMAND (e.g., adjust inventory of product 42 by -3)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE inventory SET quantity = quantity - 3               │   │
//! │  │     WHERE product_id = 42                                      │   │
//! │  │                                                                 │   │
//! │  │  2. INSERT INTO mutations (client_id, action_type, payload)    │   │
//! │  │     VALUES (<uuid>, 'inventory_adjust', <payload JSON>)        │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  SYNC PROCESSOR PASS                            │   │
//! │  │                                                                 │   │
//! │  │  1. recover_in_flight()      stale InFlight → Pending          │   │
//! │  │  2. list_dispatchable()      snapshot, ascending id            │   │
//! │  │  3. For each row:                                              │   │
//! │  │     a. mark_in_flight(id)                                      │   │
//! │  │     b. submit to remote                                        │   │
//! │  │     c. success   → mark_synced(id)                             │   │
//! │  │        retryable → requeue(id, error)   attempts += 1          │   │
//! │  │        terminal  → mark_failed(id, reason)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • An intent is never lost once the command returned Ok                │
//! │  • Ids only grow, so id order is creation order                        │
//! │  • Only discard_failed() deletes unsynced work                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::WriteGate;
use stockline_core::mutation::{canonical_payload, new_client_id};
use stockline_core::{Mutation, MutationId, MutationStatus};

macro_rules! select_mutations {
    ($tail:literal) => {
        concat!(
            "SELECT id, client_id, action_type, payload, created_at, sync_state, ",
            "failure_reason, attempts, last_error, last_attempt_at, synced_at ",
            "FROM mutations ",
            $tail
        )
    };
}

/// Repository for the mutation log.
#[derive(Debug, Clone)]
pub struct MutationRepository {
    pool: SqlitePool,
    gate: WriteGate,
}

impl MutationRepository {
    /// Creates a new MutationRepository.
    pub fn new(pool: SqlitePool, gate: WriteGate) -> Self {
        MutationRepository { pool, gate }
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Appends a mutation without any local effect.
    ///
    /// Commands that also change cached entities go through
    /// `Database::commit_command` so both land in one transaction.
    pub async fn append(
        &self,
        action_type: &str,
        payload: &serde_json::Value,
    ) -> DbResult<Mutation> {
        let _guard = self.gate.acquire().await;
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, action_type, &canonical_payload(payload)).await
    }

    /// Inserts a Pending row on an existing connection or transaction.
    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        action_type: &str,
        payload: &str,
    ) -> DbResult<Mutation> {
        let client_id = new_client_id();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO mutations (client_id, action_type, payload, created_at, sync_state, attempts)
            VALUES (?1, ?2, ?3, ?4, 'pending', 0)
            "#,
        )
        .bind(&client_id)
        .bind(action_type)
        .bind(payload)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let id = MutationId(result.last_insert_rowid());
        debug!(%id, action_type = %action_type, "Mutation appended");

        Ok(Mutation {
            id,
            client_id,
            action_type: action_type.to_string(),
            payload: payload.to_string(),
            created_at: now,
            sync_state: MutationStatus::Pending,
            failure_reason: None,
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
            synced_at: None,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Gets a mutation by id.
    pub async fn get(&self, id: MutationId) -> DbResult<Option<Mutation>> {
        let mutation = sqlx::query_as::<_, Mutation>(select_mutations!("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(mutation)
    }

    /// Every unconfirmed mutation (Pending, InFlight, Failed), ascending by id.
    ///
    /// InFlight is a transient form of Pending and is listed with it so an
    /// observer never sees work vanish while a pass is running.
    pub async fn list_pending(&self) -> DbResult<Vec<Mutation>> {
        let rows = sqlx::query_as::<_, Mutation>(select_mutations!(
            "WHERE sync_state IN ('pending', 'in_flight', 'failed') ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Mutations a pass may dispatch: Pending only, ascending by id.
    pub async fn list_dispatchable(&self) -> DbResult<Vec<Mutation>> {
        let rows = sqlx::query_as::<_, Mutation>(select_mutations!(
            "WHERE sync_state = 'pending' ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Pending and InFlight mutations, ascending by id, read on `conn` so a
    /// caller holding the write gate sees a stable set.
    pub(crate) async fn unconfirmed_in(conn: &mut SqliteConnection) -> DbResult<Vec<Mutation>> {
        let rows = sqlx::query_as::<_, Mutation>(select_mutations!(
            "WHERE sync_state IN ('pending', 'in_flight') ORDER BY id ASC"
        ))
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Terminally failed mutations awaiting the operator, ascending by id.
    pub async fn list_failed(&self) -> DbResult<Vec<Mutation>> {
        let rows = sqlx::query_as::<_, Mutation>(select_mutations!(
            "WHERE sync_state = 'failed' ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The most recent mutations in any state, newest first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<Mutation>> {
        let rows =
            sqlx::query_as::<_, Mutation>(select_mutations!("ORDER BY id DESC LIMIT ?1"))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Queue depth: Pending plus InFlight.
    pub async fn count_pending(&self) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM mutations WHERE sync_state IN ('pending', 'in_flight')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    pub async fn count_failed(&self) -> DbResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mutations WHERE sync_state = 'failed'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    /// Newest `synced_at` in the log.
    pub async fn last_synced_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT synced_at FROM mutations
            WHERE synced_at IS NOT NULL
            ORDER BY synced_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(last)
    }

    // =========================================================================
    // Processor Transitions
    // =========================================================================

    /// Claims a Pending mutation for dispatch.
    ///
    /// ## Returns
    /// * `Ok(true)` - Row moved Pending → InFlight
    /// * `Ok(false)` - Row exists but wasn't Pending
    /// * `Err(NotFound)` - No such row
    pub async fn mark_in_flight(&self, id: MutationId) -> DbResult<bool> {
        let _guard = self.gate.acquire().await;
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE mutations SET
                sync_state = 'in_flight',
                last_attempt_at = ?2
            WHERE id = ?1 AND sync_state = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        Self::ensure_exists(&mut conn, id).await.map(|_| false)
    }

    /// Marks a mutation as acknowledged by the remote authority.
    ///
    /// Idempotent: an already Synced or Failed row is left alone and
    /// `Ok(false)` is returned.
    pub async fn mark_synced(&self, id: MutationId) -> DbResult<bool> {
        let _guard = self.gate.acquire().await;
        let mut conn = self.pool.acquire().await?;
        Self::mark_synced_in(&mut conn, id).await
    }

    pub(crate) async fn mark_synced_in(conn: &mut SqliteConnection, id: MutationId) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE mutations SET
                sync_state = 'synced',
                synced_at = ?2,
                last_attempt_at = ?2
            WHERE id = ?1 AND sync_state IN ('pending', 'in_flight')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            debug!(%id, "Mutation synced");
            return Ok(true);
        }
        Self::ensure_exists(conn, id).await.map(|_| false)
    }

    /// Marks a mutation as terminally failed.
    ///
    /// Idempotent like [`mark_synced`](Self::mark_synced); the first reason
    /// recorded wins.
    pub async fn mark_failed(&self, id: MutationId, reason: &str) -> DbResult<bool> {
        let _guard = self.gate.acquire().await;
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE mutations SET
                sync_state = 'failed',
                failure_reason = ?2,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1 AND sync_state IN ('pending', 'in_flight')
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            warn!(%id, reason = %reason, "Mutation failed terminally");
            return Ok(true);
        }
        Self::ensure_exists(&mut conn, id).await.map(|_| false)
    }

    /// Returns an InFlight mutation to Pending after a retryable failure.
    pub async fn requeue(&self, id: MutationId, error: &str) -> DbResult<bool> {
        let _guard = self.gate.acquire().await;
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE mutations SET
                sync_state = 'pending',
                attempts = attempts + 1,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1 AND sync_state = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            debug!(%id, error = %error, "Mutation requeued");
            return Ok(true);
        }
        Self::ensure_exists(&mut conn, id).await.map(|_| false)
    }

    /// Reverts every InFlight row to Pending.
    ///
    /// Only the single drainer creates InFlight rows, so any found outside a
    /// running pass were left by a crash or a dropped pass future.
    pub async fn recover_in_flight(&self) -> DbResult<u64> {
        let _guard = self.gate.acquire().await;

        let result = sqlx::query(
            "UPDATE mutations SET sync_state = 'pending' WHERE sync_state = 'in_flight'",
        )
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(count = recovered, "Recovered in-flight mutations");
        }
        Ok(recovered)
    }

    // =========================================================================
    // Operator Actions
    // =========================================================================

    /// Moves a Failed mutation back to Pending so the next pass replays it.
    pub async fn retry_failed(&self, id: MutationId) -> DbResult<Mutation> {
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;

        let current = Self::fetch_in(&mut tx, id).await?;
        if current.sync_state != MutationStatus::Failed {
            return Err(DbError::invalid_state(
                "Mutation",
                id,
                MutationStatus::Failed,
                current.sync_state,
            ));
        }

        sqlx::query(
            r#"
            UPDATE mutations SET
                sync_state = 'pending',
                failure_reason = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let updated = Self::fetch_in(&mut tx, id).await?;
        tx.commit().await?;

        info!(%id, "Failed mutation re-queued by operator");
        Ok(updated)
    }

    /// Deletes a Failed mutation. The only path that removes unsynced work.
    ///
    /// Optimistic effects already applied to the cache are not rolled back;
    /// the next refresh of the affected table replaces them.
    pub async fn discard_failed(&self, id: MutationId) -> DbResult<Mutation> {
        let _guard = self.gate.acquire().await;
        let mut tx = self.pool.begin().await?;

        let current = Self::fetch_in(&mut tx, id).await?;
        if current.sync_state != MutationStatus::Failed {
            return Err(DbError::invalid_state(
                "Mutation",
                id,
                MutationStatus::Failed,
                current.sync_state,
            ));
        }

        sqlx::query("DELETE FROM mutations WHERE id = ?1 AND sync_state = 'failed'")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        warn!(
            %id,
            action_type = %current.action_type,
            "Failed mutation discarded by operator"
        );
        Ok(current)
    }

    /// Deletes Synced rows older than `days_old` days.
    ///
    /// The newest Synced row is always kept so `last_synced_at` never moves
    /// backwards.
    pub async fn cleanup_synced(&self, days_old: u32) -> DbResult<u64> {
        let _guard = self.gate.acquire().await;
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days_old));

        let result = sqlx::query(
            r#"
            DELETE FROM mutations
            WHERE sync_state = 'synced'
            AND synced_at < ?1
            AND id != (
                SELECT id FROM mutations
                WHERE sync_state = 'synced'
                ORDER BY synced_at DESC, id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(count = deleted, days_old, "Cleaned up synced mutations");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn fetch_in(conn: &mut SqliteConnection, id: MutationId) -> DbResult<Mutation> {
        sqlx::query_as::<_, Mutation>(select_mutations!("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Mutation", id.get()))
    }

    async fn ensure_exists(conn: &mut SqliteConnection, id: MutationId) -> DbResult<MutationStatus> {
        let state: Option<MutationStatus> =
            sqlx::query_scalar("SELECT sync_state FROM mutations WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        state.ok_or_else(|| DbError::not_found("Mutation", id.get()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    async fn repo() -> MutationRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().mutations()
    }

    fn adjust(product_id: i64, quantity: i64) -> serde_json::Value {
        json!({"product_id": product_id, "quantity": quantity, "reason": "recount"})
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let repo = repo().await;

        let a = repo.append("inventory_adjust", &adjust(42, 5)).await.unwrap();
        let b = repo.append("inventory_adjust", &adjust(42, -2)).await.unwrap();

        assert!(b.id > a.id);
        assert_ne!(a.client_id, b.client_id);

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(pending[0].payload, a.payload);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_delete() {
        let repo = repo().await;

        let a = repo.append("inventory_adjust", &adjust(1, 1)).await.unwrap();
        repo.mark_failed(a.id, "rejected").await.unwrap();
        repo.discard_failed(a.id).await.unwrap();

        let b = repo.append("inventory_adjust", &adjust(1, 1)).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_mark_synced_is_idempotent() {
        let repo = repo().await;
        let m = repo.append("inventory_adjust", &adjust(42, -3)).await.unwrap();

        assert!(repo.mark_synced(m.id).await.unwrap());
        assert!(!repo.mark_synced(m.id).await.unwrap());
        assert!(!repo.mark_failed(m.id, "late").await.unwrap());

        let stored = repo.get(m.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, MutationStatus::Synced);
        assert!(stored.failure_reason.is_none());
        assert!(stored.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_first_reason() {
        let repo = repo().await;
        let m = repo.append("customer_create", &json!({"name": "Ada"})).await.unwrap();

        assert!(repo.mark_failed(m.id, "email already registered").await.unwrap());
        assert!(!repo.mark_failed(m.id, "second reason").await.unwrap());

        let stored = repo.get(m.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_reason.as_deref(), Some("email already registered"));
    }

    #[tokio::test]
    async fn test_mark_unknown_id_is_not_found() {
        let repo = repo().await;
        let err = repo.mark_synced(MutationId(999)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_in_flight_and_requeue() {
        let repo = repo().await;
        let m = repo.append("inventory_adjust", &adjust(7, 1)).await.unwrap();

        assert!(repo.mark_in_flight(m.id).await.unwrap());
        assert!(!repo.mark_in_flight(m.id).await.unwrap());
        assert!(repo.list_dispatchable().await.unwrap().is_empty());
        assert_eq!(repo.count_pending().await.unwrap(), 1);

        assert!(repo.requeue(m.id, "HTTP 503").await.unwrap());
        let stored = repo.get(m.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, MutationStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_recover_in_flight() {
        let repo = repo().await;
        let a = repo.append("inventory_adjust", &adjust(1, 1)).await.unwrap();
        let b = repo.append("inventory_adjust", &adjust(2, 1)).await.unwrap();
        repo.mark_in_flight(a.id).await.unwrap();
        repo.mark_in_flight(b.id).await.unwrap();

        assert_eq!(repo.recover_in_flight().await.unwrap(), 2);
        assert_eq!(repo.list_dispatchable().await.unwrap().len(), 2);
        assert_eq!(repo.recover_in_flight().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_and_discard_failed() {
        let repo = repo().await;
        let a = repo.append("inventory_adjust", &adjust(1, 1)).await.unwrap();
        let b = repo.append("inventory_adjust", &adjust(2, 1)).await.unwrap();

        // Only Failed rows accept operator actions
        assert!(matches!(
            repo.retry_failed(a.id).await.unwrap_err(),
            DbError::InvalidState { .. }
        ));

        repo.mark_failed(a.id, "bad product").await.unwrap();
        repo.mark_failed(b.id, "bad product").await.unwrap();
        assert_eq!(repo.count_failed().await.unwrap(), 2);

        let retried = repo.retry_failed(a.id).await.unwrap();
        assert_eq!(retried.sync_state, MutationStatus::Pending);
        assert!(retried.failure_reason.is_none());

        let discarded = repo.discard_failed(b.id).await.unwrap();
        assert_eq!(discarded.id, b.id);
        assert!(repo.get(b.id).await.unwrap().is_none());
        assert_eq!(repo.list_failed().await.unwrap().len(), 0);
        assert_eq!(repo.list_dispatchable().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_last_synced_and_cleanup_keeps_newest() {
        let repo = repo().await;
        assert!(repo.last_synced_at().await.unwrap().is_none());

        let a = repo.append("inventory_adjust", &adjust(1, 1)).await.unwrap();
        let b = repo.append("inventory_adjust", &adjust(1, 2)).await.unwrap();
        repo.mark_synced(a.id).await.unwrap();
        repo.mark_synced(b.id).await.unwrap();

        let last = repo.last_synced_at().await.unwrap().unwrap();
        let b_synced = repo.get(b.id).await.unwrap().unwrap().synced_at.unwrap();
        assert_eq!(last, b_synced);

        // Everything is "older than 0 days" except the newest, which is kept
        let deleted = repo.cleanup_synced(0).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get(a.id).await.unwrap().is_none());
        assert_eq!(repo.last_synced_at().await.unwrap(), Some(last));
    }
}
