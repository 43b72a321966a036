//! # Fetch Log
//!
//! Per-table watermark of the last successful remote fetch.
//!
//! Staleness of a cached table is `now - fetched_at`. A table that was never
//! fetched (or whose log was cleared with the cache) has no watermark and is
//! treated as infinitely stale.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use stockline_core::EntityTable;

#[derive(Debug, Clone)]
pub struct FetchLogRepository {
    pool: SqlitePool,
}

impl FetchLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        FetchLogRepository { pool }
    }

    /// When `table` was last refreshed from the remote authority.
    pub async fn last_fetched(&self, table: EntityTable) -> DbResult<Option<DateTime<Utc>>> {
        let fetched_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT fetched_at FROM fetch_log WHERE table_name = ?1")
                .bind(table.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(fetched_at)
    }

    /// Every watermark, in table order.
    pub async fn all(&self) -> DbResult<Vec<(EntityTable, Option<DateTime<Utc>>)>> {
        let mut entries = Vec::with_capacity(EntityTable::ALL.len());
        for table in EntityTable::ALL {
            entries.push((table, self.last_fetched(table).await?));
        }
        Ok(entries)
    }

    pub(crate) async fn stamp_in(
        conn: &mut SqliteConnection,
        table: EntityTable,
        fetched_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_log (table_name, fetched_at) VALUES (?1, ?2)
            ON CONFLICT(table_name) DO UPDATE SET fetched_at = excluded.fetched_at
            "#,
        )
        .bind(table.as_str())
        .bind(fetched_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub(crate) async fn clear_in(conn: &mut SqliteConnection, table: EntityTable) -> DbResult<()> {
        sqlx::query("DELETE FROM fetch_log WHERE table_name = ?1")
            .bind(table.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
