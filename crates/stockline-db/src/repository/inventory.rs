//! # Inventory Repository
//!
//! Cached stock levels, one row per product.
//!
//! Quantities here are optimistic: they include adjustments that are still
//! waiting in the mutation log.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::error::DbResult;
use stockline_core::{EntityFilter, InventoryRecord};

const INVENTORY_COLUMNS: &str =
    "SELECT product_id, quantity, low_stock_threshold, last_updated FROM inventory";

/// Repository for cached inventory.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Gets the stock level of one product.
    pub async fn get(&self, product_id: i64) -> DbResult<Option<InventoryRecord>> {
        let sql = format!("{INVENTORY_COLUMNS} WHERE product_id = ?1");
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Lists stock levels.
    ///
    /// Honours `product_id`, `low_stock_only` and `limit` from the filter.
    pub async fn list(&self, filter: &EntityFilter) -> DbResult<Vec<InventoryRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(INVENTORY_COLUMNS);
        qb.push(" WHERE 1 = 1");

        if let Some(product_id) = filter.product_id {
            qb.push(" AND product_id = ").push_bind(product_id);
        }

        if filter.low_stock_only {
            qb.push(" AND low_stock_threshold IS NOT NULL AND quantity <= low_stock_threshold");
        }

        qb.push(" ORDER BY product_id ASC");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb
            .build_query_as::<InventoryRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Adds `delta` to a product's quantity, creating the row at zero first
    /// when it isn't cached.
    pub(crate) async fn adjust_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        delta: i64,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, quantity, last_updated)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(product_id) DO UPDATE SET
                quantity = quantity + excluded.quantity,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(product_id)
        .bind(delta)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Replaces rows by product id inside the caller's transaction.
    pub(crate) async fn upsert_in(
        conn: &mut SqliteConnection,
        rows: &[InventoryRecord],
    ) -> DbResult<usize> {
        for record in rows {
            sqlx::query(
                r#"
                INSERT INTO inventory (product_id, quantity, low_stock_threshold, last_updated)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(product_id) DO UPDATE SET
                    quantity = excluded.quantity,
                    low_stock_threshold = excluded.low_stock_threshold,
                    last_updated = excluded.last_updated
                "#,
            )
            .bind(record.product_id)
            .bind(record.quantity)
            .bind(record.low_stock_threshold)
            .bind(record.last_updated)
            .execute(&mut *conn)
            .await?;
        }
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::{Database, DbConfig};
    use stockline_core::{EntityBatch, EntityFilter, InventoryRecord, LocalEffect};

    fn record(product_id: i64, quantity: i64, threshold: Option<i64>) -> InventoryRecord {
        InventoryRecord {
            product_id,
            quantity,
            low_stock_threshold: threshold,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_low_stock_filter() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.upsert_entities(&EntityBatch::Inventory(vec![
            record(1, 2, Some(5)),
            record(2, 50, Some(5)),
            record(3, 0, None),
        ]))
        .await
        .unwrap();

        let low = db.inventory().list(&EntityFilter::all().low_stock()).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product_id, 1);
        assert_eq!(db.inventory().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_adjust_uncached_product_starts_from_zero() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.commit_command(
            "inventory_adjust",
            &serde_json::json!({"product_id": 9, "quantity": -4, "reason": "damaged"}),
            &[LocalEffect::AdjustStock {
                product_id: 9,
                delta: -4,
            }],
        )
        .await
        .unwrap();

        let stored = db.inventory().get(9).await.unwrap().unwrap();
        assert_eq!(stored.quantity, -4);
        assert_eq!(stored.low_stock_threshold, None);
    }
}
