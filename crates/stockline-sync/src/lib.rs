//! # stockline-sync: Offline-First Sync Engine
//!
//! Lets the client keep working without connectivity: commands are applied
//! to the local store and queued as mutations in the same transaction, then
//! replayed in order against the remote authority once it can be reached.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (owner object)                     │  │
//! │  │                                                                  │  │
//! │  │  enqueue_command • sync_status • status_stream • query*          │  │
//! │  │  request_sync_now • run_pass • retry/discard failed • clear_cache│  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   Scheduler    │  │ SyncProcessor  │  │   CacheResolver        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Notify permit, │─►│ One drainer,   │  │ Local rows + staleness │    │
//! │  │ poll interval, │  │ ordered replay,│  │ Optional remote        │    │
//! │  │ backoff, net   │  │ retry/terminal │  │ refresh with overlay   │    │
//! │  └────────────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │                              │                       │                  │
//! │         ┌────────────────────┴───────────────────────┘                  │
//! │         ▼                                                               │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ ActionRegistry │  │ RemoteAuthority│  │   NetworkMonitor       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Handler per    │  │ submit / fetch │  │ report() from platform │    │
//! │  │ action type    │  │ (HTTP impl)    │  │ subscribe / changes    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS (to the UI collaborator via SyncEventEmitter):                 │
//! │  • status changes • pass reports • terminal mutation failures          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `SyncEngine` and its builder
//! - [`scheduler`] - When passes run (triggers, coalescing, backoff)
//! - [`processor`] - One drain pass over the mutation log
//! - [`dispatch`] - Action handlers and the registry
//! - [`read`] - Cache resolver, freshness and staleness
//! - [`network`] - Connectivity monitor
//! - [`remote`] - Remote authority contract and error classification
//! - [`http`] - HTTP remote authority
//! - [`events`] - Event emitter trait
//! - [`config`] - Engine configuration (TOML, environment)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_sync::{SyncConfig, SyncEngineBuilder, Freshness};
//!
//! let config = SyncConfig::load(None)?;
//! let engine = SyncEngineBuilder::new(config).build().await?;
//! engine.start().await;
//!
//! engine
//!     .adjust_inventory(InventoryAdjustment::new(42, -3, "damage"))
//!     .await?;
//!
//! let stock = engine.inventory(&EntityFilter::all(), Freshness::CacheOnly).await?;
//! println!("{} rows, age {:?}", stock.rows.len(), stock.staleness.age);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod network;
pub mod processor;
pub mod read;
pub mod remote;
mod scheduler;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{CacheSettings, DatabaseSettings, DeviceConfig, RemoteSettings, SyncConfig, SyncSettings};
pub use dispatch::{ActionHandler, ActionRegistry, CustomerCreateHandler, InventoryAdjustHandler};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{NoOpEmitter, SyncEventEmitter};
pub use http::{HttpRemoteAuthority, Route};
pub use network::{NetworkMonitor, Subscription};
pub use processor::{PassGuard, SyncProcessor};
pub use read::{CacheResolver, DataSource, Freshness, QueryResult, Staleness};
pub use remote::{Ack, RemoteAuthority, RemoteError, RetryClass};
