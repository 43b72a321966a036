//! # Repository Module
//!
//! One repository per table.
//!
//! ## Reads and Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Reads   db.products().list(&filter)      → pool, any connection       │
//! │                                                                         │
//! │  Writes  db.mutations().mark_synced(id)   → WriteGate + connection     │
//! │          db.commit_command(..)            → WriteGate + transaction    │
//! │               │                                                         │
//! │               └── *Repository::upsert_in(&mut tx, ..)                   │
//! │                   helpers that run inside the caller's transaction     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`mutation::MutationRepository`] - The mutation log (queue)
//! - [`product::ProductRepository`] - Product search
//! - [`inventory::InventoryRepository`] - Stock levels
//! - [`customer::CustomerRepository`] - Customer search
//! - [`category::CategoryRepository`] - Categories
//! - [`fetch_log::FetchLogRepository`] - Per-table fetch watermark

pub mod category;
pub mod customer;
pub mod fetch_log;
pub mod inventory;
pub mod mutation;
pub mod product;
