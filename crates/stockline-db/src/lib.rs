//! # stockline-db: Local Store
//!
//! Durable SQLite storage for the entity cache and the mutation log.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Data Flow                              │
//! │                                                                         │
//! │  SyncEngine (enqueue_command, run_pass, query)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   stockline-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ MutationRepo  │    │ 001_cache    │  │   │
//! │  │   │ SqlitePool    │◄───│ ProductRepo   │    │ 002_mutations│  │   │
//! │  │   │ WriteGate     │    │ InventoryRepo │    │              │  │   │
//! │  │   │ (store.rs tx) │    │ CustomerRepo  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, configuration and the write gate
//! - [`store`] - Multi-row transactions (commit, confirm, refresh, clear)
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Per-table repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/stockline.db")).await?;
//!
//! let mutation = db.commit_command("inventory_adjust", &payload, &effects).await?;
//! let pending = db.mutations().list_pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, WriteGate};
pub use store::RefreshOutcome;

pub use repository::category::CategoryRepository;
pub use repository::customer::CustomerRepository;
pub use repository::fetch_log::FetchLogRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::mutation::MutationRepository;
pub use repository::product::ProductRepository;
