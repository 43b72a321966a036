//! # Product Repository
//!
//! Cached catalogue rows.
//!
//! ## Search
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How Product Search Works                             │
//! │                                                                         │
//! │  Operator types: "coke"                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LIKE '%coke%' across: name, sku, barcode                              │
//! │  + optional category filter                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ORDER BY name_asc | name_desc | price_asc | price_desc                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Results: [COKE-330, COKE-500]                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockline_core::{EntityFilter, Product, ProductSort};

const PRODUCT_COLUMNS: &str = "SELECT id, name, sku, barcode, price_cents, category_id, \
     image_url, description, created_at, updated_at FROM products";

/// Repository for cached products.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Lists products matching a filter.
    ///
    /// ## Filter Fields Used
    /// - `search` - substring of name, sku or barcode
    /// - `category_id`, `product_id`
    /// - `sort` - defaults to name ascending
    /// - `limit`
    pub async fn list(&self, filter: &EntityFilter) -> DbResult<Vec<Product>> {
        let mut qb = QueryBuilder::<Sqlite>::new(PRODUCT_COLUMNS);
        qb.push(" WHERE 1 = 1");

        if let Some(term) = filter.search_term() {
            let pattern = format!("%{}%", term);
            qb.push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR sku LIKE ")
                .push_bind(pattern.clone())
                .push(" OR barcode LIKE ")
                .push_bind(pattern)
                .push(")");
        }

        if let Some(category_id) = filter.category_id {
            qb.push(" AND category_id = ").push_bind(category_id);
        }

        if let Some(product_id) = filter.product_id {
            qb.push(" AND id = ").push_bind(product_id);
        }

        qb.push(match filter.sort.unwrap_or_default() {
            ProductSort::NameAsc => " ORDER BY name ASC, id ASC",
            ProductSort::NameDesc => " ORDER BY name DESC, id ASC",
            ProductSort::PriceAsc => " ORDER BY price_cents ASC, id ASC",
            ProductSort::PriceDesc => " ORDER BY price_cents DESC, id ASC",
        });

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let products = qb.build_query_as::<Product>().fetch_all(&self.pool).await?;

        debug!(count = products.len(), "Product query returned rows");
        Ok(products)
    }

    /// Gets a product by its server id.
    pub async fn get(&self, id: i64) -> DbResult<Option<Product>> {
        let sql = format!("{PRODUCT_COLUMNS} WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn count(&self) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Replaces rows by primary key inside the caller's transaction.
    pub(crate) async fn upsert_in(conn: &mut SqliteConnection, rows: &[Product]) -> DbResult<usize> {
        for product in rows {
            sqlx::query(
                r#"
                INSERT INTO products (
                    id, name, sku, barcode, price_cents, category_id,
                    image_url, description, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    sku = excluded.sku,
                    barcode = excluded.barcode,
                    price_cents = excluded.price_cents,
                    category_id = excluded.category_id,
                    image_url = excluded.image_url,
                    description = excluded.description,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(product.id)
            .bind(&product.name)
            .bind(&product.sku)
            .bind(&product.barcode)
            .bind(product.price_cents)
            .bind(product.category_id)
            .bind(&product.image_url)
            .bind(&product.description)
            .bind(product.created_at)
            .bind(product.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(rows.len())
    }
}
