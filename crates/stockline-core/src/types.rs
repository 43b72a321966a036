//! # Cached Entities
//!
//! Domain rows the client keeps in its local cache.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Cached Entities                                 │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │ InventoryRecord │   │    Customer     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (server)    │   │  product_id (PK)│   │  id (client)    │       │
//! │  │  sku, barcode   │   │  quantity       │   │  remote_id      │       │
//! │  │  price_cents    │   │  low_stock_thr. │   │  name, email    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐                                                    │
//! │  │    Category     │   Entities are a cache of the remote authority.   │
//! │  │  id, name       │   They may be dropped by clear_cache at any time; │
//! │  └─────────────────┘   unsynced intent lives in the mutation log.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Products, inventory and categories are keyed by the server's integer id.
//! Customers can be created offline, so their primary key is a client
//! generated UUID and the server id is attached once the creation is
//! acknowledged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Product
// =============================================================================

/// A product as cached from the remote catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Server-assigned identifier.
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Stock Keeping Unit.
    pub sku: String,

    /// Barcode (EAN-13, UPC-A, etc.).
    pub barcode: Option<String>,

    /// Price in cents (smallest currency unit).
    pub price_cents: i64,

    /// Category this product belongs to.
    pub category_id: Option<i64>,

    pub image_url: Option<String>,

    pub description: Option<String>,

    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,

    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Inventory
// =============================================================================

/// Stock level for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryRecord {
    /// Product this stock level belongs to (primary key).
    pub product_id: i64,

    /// Units on hand. May go negative after optimistic adjustments.
    pub quantity: i64,

    /// Threshold at or below which the product counts as low stock.
    pub low_stock_threshold: Option<i64>,

    #[ts(as = "String")]
    pub last_updated: DateTime<Utc>,
}

impl InventoryRecord {
    /// Returns true when the quantity is at or below the configured threshold.
    pub fn is_low_stock(&self) -> bool {
        self.low_stock_threshold
            .map(|threshold| self.quantity <= threshold)
            .unwrap_or(false)
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A customer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    /// Client-side identifier (UUID v4 for customers created on this device).
    pub id: String,

    /// Server identifier, known once the remote authority accepted the record.
    pub remote_id: Option<i64>,

    pub name: String,

    pub email: Option<String>,

    pub phone: Option<String>,

    #[serde(default)]
    pub loyalty_points: i64,
}

impl Customer {
    /// Returns true once the remote authority has acknowledged this customer.
    pub fn is_confirmed(&self) -> bool {
        self.remote_id.is_some()
    }
}

// =============================================================================
// Category
// =============================================================================

/// A product category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

// =============================================================================
// Query Filters
// =============================================================================

/// Sort order for product listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ProductSort {
    #[default]
    NameAsc,
    NameDesc,
    PriceAsc,
    PriceDesc,
}

impl std::str::FromStr for ProductSort {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name_asc" => Ok(ProductSort::NameAsc),
            "name_desc" => Ok(ProductSort::NameDesc),
            "price_asc" => Ok(ProductSort::PriceAsc),
            "price_desc" => Ok(ProductSort::PriceDesc),
            _ => Err(crate::error::ValidationError::NotAllowed {
                field: "sort".to_string(),
                allowed: vec![
                    "name_asc".to_string(),
                    "name_desc".to_string(),
                    "price_asc".to_string(),
                    "price_desc".to_string(),
                ],
            }),
        }
    }
}

/// Filter applied to cache reads and remote fetches.
///
/// Fields that don't apply to a table are ignored (e.g. `category_id` for
/// customers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Free-text search over name/sku/barcode (products) or
    /// name/email/phone (customers).
    pub search: Option<String>,

    pub category_id: Option<i64>,

    pub product_id: Option<i64>,

    /// Only inventory rows at or below their low-stock threshold.
    #[serde(default)]
    pub low_stock_only: bool,

    pub sort: Option<ProductSort>,

    pub limit: Option<u32>,
}

impl EntityFilter {
    /// Filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn product(mut self, product_id: i64) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn low_stock(mut self) -> Self {
        self.low_stock_only = true;
        self
    }

    pub fn sorted(mut self, sort: ProductSort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the trimmed search term, or None when blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
