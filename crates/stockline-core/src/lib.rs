//! # stockline-core: Pure Domain Types for the Sync Engine
//!
//! Everything the local store and the sync engine agree on, with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              UI collaborator (out of scope)                     │   │
//! │  │    enqueue_command ──► sync_status ──► query (cache + staleness)│   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  stockline-sync (engine)                        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockline-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ mutation  │  │  effects  │  │ validation│  │   │
//! │  │   │  Product  │  │ Mutation  │  │LocalEffect│  │  payload  │  │   │
//! │  │   │ Customer  │  │ SyncState │  │EntityBatch│  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockline-db (Local Store)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Cached entities (Product, InventoryRecord, Customer, Category)
//! - [`mutation`] - The durable Mutation record and its sync state
//! - [`effects`] - Optimistic local writes and entity batches
//! - [`actions`] - Built-in action types and their payloads
//! - [`status`] - Derived sync status and connectivity
//! - [`error`] - Domain error types
//! - [`validation`] - Payload validation

pub mod actions;
pub mod effects;
pub mod error;
pub mod mutation;
pub mod status;
pub mod types;
pub mod validation;

pub use actions::{InventoryAdjustment, NewCustomer, CUSTOMER_CREATE, INVENTORY_ADJUST};
pub use effects::{EntityBatch, EntityTable, LocalEffect};
pub use error::{CoreError, CoreResult, ValidationError};
pub use mutation::{Mutation, MutationId, MutationStatus, SyncState};
pub use status::{ConnectivityState, NetworkKind, PassReport, SyncStatus};
pub use types::*;

/// Maximum absolute stock delta accepted in a single adjustment.
///
/// Catches fat-fingered entries (10000 instead of 10) before they are
/// queued and replayed against the remote system.
pub const MAX_ADJUSTMENT_DELTA: i64 = 9_999;

/// Maximum length of a free-text field (reason, notes, names).
pub const MAX_TEXT_LEN: usize = 500;
