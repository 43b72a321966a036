//! # Read Path
//!
//! Every query is answered from the local store. A remote fetch, when one
//! is wanted and possible, only refreshes the store first.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  query(table, filter, freshness)                                        │
//! │      │                                                                  │
//! │      ├─ CacheOnly ─────────────────────────────────┐                    │
//! │      ├─ PreferFresh ─┐                             │                    │
//! │      └─ MaxAge(d) ───┤ stale or never fetched?     │                    │
//! │                      ▼                             │                    │
//! │              online? ── no ────────────────────────┤                    │
//! │                      │ yes                         │                    │
//! │                      ▼                             │                    │
//! │              remote.fetch ── error ── warn ────────┤                    │
//! │                      │ ok                          │                    │
//! │                      ▼                             │                    │
//! │   refresh_table(rows + never-dispatched overlay,   │                    │
//! │                 fetch_log stamp)  one transaction  │                    │
//! │                      │                             │                    │
//! │                      ▼                             ▼                    │
//! │            read local store  → QueryResult { rows, staleness, source } │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use stockline_core::{
    Category, Customer, EntityBatch, EntityFilter, EntityTable, InventoryRecord, Product,
};
use stockline_db::Database;

use crate::dispatch::ActionRegistry;
use crate::error::SyncResult;
use crate::network::NetworkMonitor;
use crate::remote::RemoteAuthority;

// =============================================================================
// Query Types
// =============================================================================

/// How fresh the caller wants the answer to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Never contact the remote.
    #[default]
    CacheOnly,

    /// Refresh from the remote whenever online.
    PreferFresh,

    /// Refresh only when the cached table is older than this.
    MaxAge(Duration),
}

/// Where the rows in a [`QueryResult`] were last refreshed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// The store was refreshed from the remote during this query.
    Remote,

    /// The store was read as it was.
    Cache,
}

/// Age of the cached copy of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Staleness {
    /// Last successful remote fetch, `None` if the table was never fetched.
    pub fetched_at: Option<DateTime<Utc>>,

    /// Time since `fetched_at`.
    pub age: Option<Duration>,
}

impl Staleness {
    pub fn since(fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            age: fetched_at.map(|at| (now - at).to_std().unwrap_or(Duration::ZERO)),
        }
    }

    /// Never fetched, or older than `max_age`.
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age.map_or(true, |age| age > max_age)
    }
}

/// Rows plus the metadata the UI needs to show how current they are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T> {
    pub rows: T,
    pub staleness: Staleness,
    pub source: DataSource,
}

impl<T> QueryResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryResult<U> {
        QueryResult {
            rows: f(self.rows),
            staleness: self.staleness,
            source: self.source,
        }
    }
}

// =============================================================================
// Cache Resolver
// =============================================================================

/// Answers entity queries from the local store, refreshing it when asked.
#[derive(Clone)]
pub struct CacheResolver {
    db: Arc<Database>,
    remote: Arc<dyn RemoteAuthority>,
    registry: Arc<ActionRegistry>,
    monitor: NetworkMonitor,
}

impl CacheResolver {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn RemoteAuthority>,
        registry: Arc<ActionRegistry>,
        monitor: NetworkMonitor,
    ) -> Self {
        Self {
            db,
            remote,
            registry,
            monitor,
        }
    }

    /// Reads one table.
    ///
    /// Remote rows are never returned directly: they are stored first and
    /// the answer is read back, so optimistic local state is always visible.
    pub async fn query(
        &self,
        table: EntityTable,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<EntityBatch>> {
        let before = Staleness::since(self.db.fetch_log().last_fetched(table).await?, Utc::now());

        let wants_remote = match freshness {
            Freshness::CacheOnly => false,
            Freshness::PreferFresh => true,
            Freshness::MaxAge(max_age) => before.is_older_than(max_age),
        };

        let mut source = DataSource::Cache;
        if wants_remote {
            if self.monitor.current_state().is_online() {
                if self.refresh(table, filter).await? {
                    source = DataSource::Remote;
                }
            } else {
                debug!(%table, "Offline, serving cached rows");
            }
        }

        let rows = self.read_local(table, filter).await?;
        let fetched_at = self.db.fetch_log().last_fetched(table).await?;

        Ok(QueryResult {
            rows,
            staleness: Staleness::since(fetched_at, Utc::now()),
            source,
        })
    }

    /// Fetches and stores one table. `Ok(false)` when the remote failed.
    async fn refresh(&self, table: EntityTable, filter: &EntityFilter) -> SyncResult<bool> {
        let batch = match self.remote.fetch(table, filter).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(%table, error = %e, "Remote fetch failed, serving cached rows");
                return Ok(false);
            }
        };

        let registry = &self.registry;
        let outcome = self
            .db
            .refresh_table(&batch, Utc::now(), |mutation| registry.effects_of(mutation))
            .await?;
        if !outcome.is_stamped() {
            debug!(%table, held_back = outcome.held_back, "Unacknowledged work pending, table left stale");
        }
        Ok(true)
    }

    async fn read_local(&self, table: EntityTable, filter: &EntityFilter) -> SyncResult<EntityBatch> {
        Ok(match table {
            EntityTable::Products => EntityBatch::Products(self.db.products().list(filter).await?),
            EntityTable::Inventory => EntityBatch::Inventory(self.db.inventory().list(filter).await?),
            EntityTable::Customers => {
                EntityBatch::Customers(self.db.customers().search(filter).await?)
            }
            EntityTable::Categories => {
                EntityBatch::Categories(self.db.categories().list().await?)
            }
        })
    }

    // =========================================================================
    // Typed Helpers
    // =========================================================================

    pub async fn products(
        &self,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<Vec<Product>>> {
        let result = self.query(EntityTable::Products, filter, freshness).await?;
        Ok(result.map(|rows| rows.into_products().unwrap_or_default()))
    }

    pub async fn inventory(
        &self,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<Vec<InventoryRecord>>> {
        let result = self.query(EntityTable::Inventory, filter, freshness).await?;
        Ok(result.map(|rows| rows.into_inventory().unwrap_or_default()))
    }

    pub async fn customers(
        &self,
        filter: &EntityFilter,
        freshness: Freshness,
    ) -> SyncResult<QueryResult<Vec<Customer>>> {
        let result = self.query(EntityTable::Customers, filter, freshness).await?;
        Ok(result.map(|rows| rows.into_customers().unwrap_or_default()))
    }

    pub async fn categories(&self, freshness: Freshness) -> SyncResult<QueryResult<Vec<Category>>> {
        let result = self
            .query(EntityTable::Categories, &EntityFilter::all(), freshness)
            .await?;
        Ok(result.map(|rows| rows.into_categories().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_age() {
        let now = Utc::now();
        let staleness = Staleness::since(Some(now - chrono::Duration::seconds(90)), now);
        assert_eq!(staleness.age, Some(Duration::from_secs(90)));
        assert!(staleness.is_older_than(Duration::from_secs(60)));
        assert!(!staleness.is_older_than(Duration::from_secs(120)));
    }

    #[test]
    fn test_never_fetched_is_stale() {
        let staleness = Staleness::since(None, Utc::now());
        assert_eq!(staleness.age, None);
        assert!(staleness.is_older_than(Duration::from_secs(3600)));
    }

    #[test]
    fn test_future_fetch_time_clamps_to_zero() {
        let now = Utc::now();
        let staleness = Staleness::since(Some(now + chrono::Duration::seconds(5)), now);
        assert_eq!(staleness.age, Some(Duration::ZERO));
    }
}
