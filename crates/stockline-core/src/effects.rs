//! # Local Effects
//!
//! Pure descriptions of writes to the entity cache.
//!
//! Action handlers compute effects from a payload; the local store applies
//! them inside the same transaction that appends (or confirms) the mutation.
//! Keeping the effect a value means handlers never touch SQL and the store
//! never has to know about action types.
//!
//! ```text
//! payload ──► ActionHandler::local_effects ──► [LocalEffect] ──► commit_command
//!                                                              (one transaction)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::types::{Category, Customer, InventoryRecord, Product};

// =============================================================================
// Entity Table
// =============================================================================

/// The cached entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTable {
    Products,
    Inventory,
    Customers,
    Categories,
}

impl EntityTable {
    pub const ALL: [EntityTable; 4] = [
        EntityTable::Products,
        EntityTable::Inventory,
        EntityTable::Customers,
        EntityTable::Categories,
    ];

    /// SQLite table name. Also the key used in the fetch log.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Products => "products",
            EntityTable::Inventory => "inventory",
            EntityTable::Customers => "customers",
            EntityTable::Categories => "categories",
        }
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityTable {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityTable::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "table".to_string(),
                allowed: EntityTable::ALL.iter().map(|t| t.to_string()).collect(),
            })
    }
}

// =============================================================================
// Entity Batch
// =============================================================================

/// Rows of a single entity table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "rows", rename_all = "snake_case")]
pub enum EntityBatch {
    Products(Vec<Product>),
    Inventory(Vec<InventoryRecord>),
    Customers(Vec<Customer>),
    Categories(Vec<Category>),
}

impl EntityBatch {
    /// An empty batch for the given table.
    pub fn empty(table: EntityTable) -> Self {
        match table {
            EntityTable::Products => EntityBatch::Products(Vec::new()),
            EntityTable::Inventory => EntityBatch::Inventory(Vec::new()),
            EntityTable::Customers => EntityBatch::Customers(Vec::new()),
            EntityTable::Categories => EntityBatch::Categories(Vec::new()),
        }
    }

    pub fn table(&self) -> EntityTable {
        match self {
            EntityBatch::Products(_) => EntityTable::Products,
            EntityBatch::Inventory(_) => EntityTable::Inventory,
            EntityBatch::Customers(_) => EntityTable::Customers,
            EntityBatch::Categories(_) => EntityTable::Categories,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntityBatch::Products(rows) => rows.len(),
            EntityBatch::Inventory(rows) => rows.len(),
            EntityBatch::Customers(rows) => rows.len(),
            EntityBatch::Categories(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes a JSON array of rows for the given table.
    pub fn from_json(table: EntityTable, rows: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match table {
            EntityTable::Products => EntityBatch::Products(serde_json::from_value(rows)?),
            EntityTable::Inventory => EntityBatch::Inventory(serde_json::from_value(rows)?),
            EntityTable::Customers => EntityBatch::Customers(serde_json::from_value(rows)?),
            EntityTable::Categories => EntityBatch::Categories(serde_json::from_value(rows)?),
        })
    }

    pub fn into_products(self) -> Option<Vec<Product>> {
        match self {
            EntityBatch::Products(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_inventory(self) -> Option<Vec<InventoryRecord>> {
        match self {
            EntityBatch::Inventory(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_customers(self) -> Option<Vec<Customer>> {
        match self {
            EntityBatch::Customers(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_categories(self) -> Option<Vec<Category>> {
        match self {
            EntityBatch::Categories(rows) => Some(rows),
            _ => None,
        }
    }
}

// =============================================================================
// Local Effect
// =============================================================================

/// One optimistic write to the entity cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalEffect {
    /// Add `delta` to a product's cached quantity.
    ///
    /// A product without a cached inventory row starts from zero.
    AdjustStock { product_id: i64, delta: i64 },

    /// Replace rows by primary key.
    Upsert(EntityBatch),

    /// Attach the server id to a customer created offline.
    LinkCustomer { local_id: String, remote_id: i64 },
}

impl LocalEffect {
    /// The entity table this effect writes to.
    pub fn table(&self) -> EntityTable {
        match self {
            LocalEffect::AdjustStock { .. } => EntityTable::Inventory,
            LocalEffect::Upsert(batch) => batch.table(),
            LocalEffect::LinkCustomer { .. } => EntityTable::Customers,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
