//! # Customer Repository
//!
//! Cached customers, including ones created on this device that the remote
//! authority hasn't acknowledged yet.
//!
//! ## Identity
//! ```text
//! offline create ──► id = <uuid>, remote_id = NULL
//!        │
//!        ▼ ack { id: 17 }
//! LinkCustomer  ──► id = <uuid>, remote_id = 17
//!        │
//!        ▼ remote refresh returns customer 17
//! upsert        ──► matched on remote_id, keeps id = <uuid>
//! ```

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockline_core::{Customer, EntityFilter};

/// Search results are capped like the mobile client's customer lookup.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

const CUSTOMER_COLUMNS: &str =
    "SELECT id, remote_id, name, email, phone, loyalty_points FROM customers";

/// Repository for cached customers.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Gets a customer by local id.
    pub async fn get(&self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("{CUSTOMER_COLUMNS} WHERE id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    /// Gets a customer by the server's id.
    pub async fn get_by_remote_id(&self, remote_id: i64) -> DbResult<Option<Customer>> {
        let sql = format!("{CUSTOMER_COLUMNS} WHERE remote_id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    /// Searches customers by name, email or phone.
    ///
    /// A search term without an explicit limit returns at most
    /// [`DEFAULT_SEARCH_LIMIT`] rows; an empty filter lists everyone.
    pub async fn search(&self, filter: &EntityFilter) -> DbResult<Vec<Customer>> {
        let mut qb = QueryBuilder::<Sqlite>::new(CUSTOMER_COLUMNS);
        qb.push(" WHERE 1 = 1");

        let term = filter.search_term();
        if let Some(term) = term {
            let pattern = format!("%{}%", term);
            qb.push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR email LIKE ")
                .push_bind(pattern.clone())
                .push(" OR phone LIKE ")
                .push_bind(pattern)
                .push(")");
        }

        qb.push(" ORDER BY name ASC, id ASC");

        let limit = filter
            .limit
            .or(term.map(|_| DEFAULT_SEARCH_LIMIT));
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb.build_query_as::<Customer>().fetch_all(&self.pool).await?;
        debug!(count = rows.len(), "Customer query returned rows");
        Ok(rows)
    }

    pub async fn count(&self) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Replaces rows by id inside the caller's transaction.
    ///
    /// A row carrying a `remote_id` that is already linked to a local row
    /// updates that row instead of inserting a second one.
    pub(crate) async fn upsert_in(conn: &mut SqliteConnection, rows: &[Customer]) -> DbResult<usize> {
        for customer in rows {
            let mut local_id = customer.id.clone();

            if let Some(remote_id) = customer.remote_id {
                let linked: Option<String> =
                    sqlx::query_scalar("SELECT id FROM customers WHERE remote_id = ?1")
                        .bind(remote_id)
                        .fetch_optional(&mut *conn)
                        .await?;
                if let Some(existing) = linked {
                    local_id = existing;
                }
            }

            sqlx::query(
                r#"
                INSERT INTO customers (id, remote_id, name, email, phone, loyalty_points)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    remote_id = COALESCE(excluded.remote_id, customers.remote_id),
                    name = excluded.name,
                    email = excluded.email,
                    phone = excluded.phone,
                    loyalty_points = excluded.loyalty_points
                "#,
            )
            .bind(&local_id)
            .bind(customer.remote_id)
            .bind(&customer.name)
            .bind(&customer.email)
            .bind(&customer.phone)
            .bind(customer.loyalty_points)
            .execute(&mut *conn)
            .await?;
        }
        Ok(rows.len())
    }

    /// Attaches the server id to a locally created customer.
    ///
    /// A row fetched from the remote under that id before the ack arrived is
    /// folded into the local one. A missing local row (cache cleared) is
    /// not an error.
    pub(crate) async fn link_remote_in(
        conn: &mut SqliteConnection,
        local_id: &str,
        remote_id: i64,
    ) -> DbResult<()> {
        sqlx::query("DELETE FROM customers WHERE remote_id = ?1 AND id != ?2")
            .bind(remote_id)
            .bind(local_id)
            .execute(&mut *conn)
            .await?;

        let result = sqlx::query("UPDATE customers SET remote_id = ?2 WHERE id = ?1")
            .bind(local_id)
            .bind(remote_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            debug!(local_id = %local_id, remote_id, "No cached customer to link");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use stockline_core::{Customer, EntityBatch, EntityFilter};

    fn customer(id: &str, remote_id: Option<i64>, name: &str) -> Customer {
        Customer {
            id: id.to_string(),
            remote_id,
            name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: None,
            loyalty_points: 0,
        }
    }

    #[tokio::test]
    async fn test_search_limits_to_twenty() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let rows = (0..30)
            .map(|i| customer(&format!("c-{i:02}"), Some(i), &format!("Shopper{i:02}")))
            .collect();
        db.upsert_entities(&EntityBatch::Customers(rows)).await.unwrap();

        let found = db
            .customers()
            .search(&EntityFilter::all().search("shopper"))
            .await
            .unwrap();
        assert_eq!(found.len(), 20);

        let everyone = db.customers().search(&EntityFilter::all()).await.unwrap();
        assert_eq!(everyone.len(), 30);
    }

    #[tokio::test]
    async fn test_remote_refresh_keeps_local_identity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.upsert_entities(&EntityBatch::Customers(vec![customer("local-uuid", Some(17), "Ada")]))
            .await
            .unwrap();

        // Server copy arrives keyed by its own id
        let mut from_server = customer("17", Some(17), "Ada");
        from_server.loyalty_points = 120;
        db.upsert_entities(&EntityBatch::Customers(vec![from_server]))
            .await
            .unwrap();

        assert_eq!(db.customers().count().await.unwrap(), 1);
        let stored = db.customers().get_by_remote_id(17).await.unwrap().unwrap();
        assert_eq!(stored.id, "local-uuid");
        assert_eq!(stored.loyalty_points, 120);
    }
}
