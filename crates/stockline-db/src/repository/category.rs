//! Cached product categories.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use stockline_core::Category;

#[derive(Debug, Clone)]
pub struct CategoryRepository {
    pool: SqlitePool,
}

impl CategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CategoryRepository { pool }
    }

    /// All categories, by name.
    pub async fn list(&self) -> DbResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>(
            "SELECT id, name, description FROM categories ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Category>> {
        let row = sqlx::query_as::<_, Category>(
            "SELECT id, name, description FROM categories WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub(crate) async fn upsert_in(conn: &mut SqliteConnection, rows: &[Category]) -> DbResult<usize> {
        for category in rows {
            sqlx::query(
                r#"
                INSERT INTO categories (id, name, description)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description
                "#,
            )
            .bind(category.id)
            .bind(&category.name)
            .bind(&category.description)
            .execute(&mut *conn)
            .await?;
        }
        Ok(rows.len())
    }
}
