//! # stockline: Operator CLI
//!
//! Thin front over [`SyncEngine`] for operating a device from a terminal.
//! Results are printed as JSON on stdout; logs go to stderr.
//!
//! ## Usage
//! ```bash
//! # Queue a stock correction (applied to the local cache immediately)
//! stockline adjust 42 -3 damage
//!
//! # Queue any registered action with a raw JSON payload
//! stockline enqueue inventory_adjust '{"product_id":42,"quantity":5,"reason":"incoming"}'
//!
//! # Replay the queue once, then inspect what is left
//! stockline sync
//! stockline status
//! stockline failed
//!
//! # Operator actions on failed mutations
//! stockline retry 17
//! stockline discard 18
//!
//! # Read the cache, refreshing from the remote first
//! stockline query inventory --low-stock --fresh
//!
//! # Pin the generated device id by writing the config file once
//! stockline init
//! ```
//!
//! The CLI has no platform connectivity feed: it assumes the remote is
//! reachable unless `--offline` is given.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use stockline_core::{
    ConnectivityState, EntityFilter, EntityTable, InventoryAdjustment, MutationId, NewCustomer,
};
use stockline_sync::{Freshness, NetworkMonitor, SyncConfig, SyncEngine, SyncEngineBuilder};

// =============================================================================
// Arguments
// =============================================================================

/// Stockline offline sync engine operator tool
#[derive(Debug, Parser)]
#[command(name = "stockline", version)]
#[command(about = "Queue, replay and inspect offline mutations", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir/sync.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overrides the config
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Treat the remote as unreachable
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write the effective config to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Queue a command with a raw JSON payload
    Enqueue {
        action_type: String,
        #[arg(value_parser = parse_json)]
        payload: serde_json::Value,
    },
    /// Queue a stock adjustment
    Adjust {
        product_id: i64,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
        reason: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Queue a new customer
    Customer {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Show the derived sync status
    Status,
    /// Run one pass now
    Sync,
    /// List unconfirmed mutations
    Pending,
    /// List failed mutations
    Failed,
    /// List the newest mutations
    Recent {
        #[arg(default_value_t = 20)]
        limit: u32,
    },
    /// Re-queue a failed mutation
    Retry { id: i64 },
    /// Delete a failed mutation
    Discard { id: i64 },
    /// Drop cached entities (keeps the queue)
    ClearCache,
    /// Read products, inventory, customers or categories
    Query(QueryArgs),
}

#[derive(Debug, Args)]
struct QueryArgs {
    table: EntityTable,

    #[arg(long)]
    search: Option<String>,

    #[arg(long)]
    category: Option<i64>,

    #[arg(long)]
    product: Option<i64>,

    #[arg(long)]
    low_stock: bool,

    #[arg(long)]
    limit: Option<u32>,

    /// Refresh from the remote first
    #[arg(long, conflicts_with_all = ["cache_only", "max_age"])]
    fresh: bool,

    /// Never contact the remote
    #[arg(long, conflicts_with = "max_age")]
    cache_only: bool,

    /// Refresh when the cached table is older than this
    #[arg(long, value_name = "SECS")]
    max_age: Option<u64>,
}

impl QueryArgs {
    fn filter(&self) -> EntityFilter {
        let mut filter = EntityFilter::all();
        if let Some(term) = &self.search {
            filter = filter.search(term.clone());
        }
        if let Some(category) = self.category {
            filter = filter.category(category);
        }
        if let Some(product) = self.product {
            filter = filter.product(product);
        }
        if self.low_stock {
            filter = filter.low_stock();
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }

    /// `None` means the configured default.
    fn freshness(&self) -> Option<Freshness> {
        if self.fresh {
            Some(Freshness::PreferFresh)
        } else if self.cache_only {
            Some(Freshness::CacheOnly)
        } else {
            self.max_age
                .map(|secs| Freshness::MaxAge(Duration::from_secs(secs)))
        }
    }
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("payload is not JSON: {e}"))
}

// =============================================================================
// Execution
// =============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(engine: &SyncEngine, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Init { .. } => Err("init runs before the engine is built".into()),
        Commands::Enqueue {
            action_type,
            payload,
        } => print_json(&engine.enqueue_command(&action_type, payload).await?),
        Commands::Adjust {
            product_id,
            delta,
            reason,
            notes,
        } => {
            let mut adjustment = InventoryAdjustment::new(product_id, delta, reason);
            if let Some(notes) = notes {
                adjustment = adjustment.with_notes(notes);
            }
            print_json(&engine.adjust_inventory(adjustment).await?)
        }
        Commands::Customer { name, email, phone } => {
            let mut customer = NewCustomer::new(name);
            if let Some(email) = email {
                customer = customer.with_email(email);
            }
            if let Some(phone) = phone {
                customer = customer.with_phone(phone);
            }
            print_json(&engine.create_customer(customer).await?)
        }
        Commands::Status => print_json(&engine.sync_status().await?),
        Commands::Sync => {
            let report = engine.run_pass().await?;
            info!(
                processed = report.processed,
                failed = report.failed,
                deferred = report.deferred,
                "Pass complete"
            );
            print_json(&report)
        }
        Commands::Pending => print_json(&engine.pending_mutations().await?),
        Commands::Failed => print_json(&engine.failed_mutations().await?),
        Commands::Recent { limit } => print_json(&engine.recent_mutations(limit).await?),
        Commands::Retry { id } => print_json(&engine.retry_failed(MutationId(id)).await?),
        Commands::Discard { id } => print_json(&engine.discard_failed(MutationId(id)).await?),
        Commands::ClearCache => {
            engine.clear_cache().await?;
            print_json(&engine.sync_status().await?)
        }
        Commands::Query(query) => {
            let freshness = query
                .freshness()
                .unwrap_or_else(|| engine.default_freshness());
            print_json(&engine.query(query.table, &query.filter(), freshness).await?)
        }
    }
}

/// Saves the loaded config (file, env and `--db` applied) so the device id
/// stays the same across runs.
fn init_config(
    config: &SyncConfig,
    path: Option<PathBuf>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = path
        .or_else(SyncConfig::default_config_path)
        .ok_or("no config path available; pass --config")?;
    if path.exists() && !force {
        return Err(format!("{} already exists; use --force to overwrite", path.display()).into());
    }
    config.save(Some(path.clone()))?;
    println!("{}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockline=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = SyncConfig::load(cli.config.clone())?;
    if let Some(db) = cli.db {
        config.database.path = Some(db);
    }
    debug!(db = ?config.database_path(), remote = %config.remote.base_url, "Config loaded");

    if let Commands::Init { force } = cli.command {
        return init_config(&config, cli.config, force);
    }

    let connectivity = if cli.offline {
        ConnectivityState::Offline
    } else {
        ConnectivityState::Online
    };

    let engine = SyncEngineBuilder::new(config)
        .with_monitor(NetworkMonitor::new(connectivity))
        .build()
        .await?;

    let result = execute(&engine, cli.command).await;
    engine.shutdown().await;
    engine.database().close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("stockline").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_then_command() {
        let cli = parse(&["--db", "/tmp/x.db", "--offline", "status"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(cli.offline);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_adjust_accepts_negative_delta() {
        let cli = parse(&["adjust", "42", "-3", "damage", "--notes", "dropped"]).unwrap();
        match cli.command {
            Commands::Adjust {
                product_id,
                delta,
                reason,
                notes,
            } => {
                assert_eq!((product_id, delta), (42, -3));
                assert_eq!(reason, "damage");
                assert_eq!(notes.as_deref(), Some("dropped"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_query_flags() {
        let cli = parse(&["query", "inventory", "--low-stock", "--limit", "5", "--max-age", "60"])
            .unwrap();
        let Commands::Query(query) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(query.table, EntityTable::Inventory);
        assert_eq!(query.filter(), EntityFilter::all().low_stock().limit(5));
        assert_eq!(query.freshness(), Some(Freshness::MaxAge(Duration::from_secs(60))));
    }

    #[test]
    fn test_recent_defaults_to_twenty() {
        let cli = parse(&["recent"]).unwrap();
        assert!(matches!(cli.command, Commands::Recent { limit: 20 }));
    }

    #[test]
    fn test_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["retry", "abc"]).is_err());
        assert!(parse(&["query", "sales"]).is_err());
        assert!(parse(&["query", "products", "--fresh", "--cache-only"]).is_err());
        assert!(parse(&["enqueue", "inventory_adjust", "{not json"]).is_err());
    }

    #[test]
    fn test_init_writes_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        let config = SyncConfig::new();

        init_config(&config, Some(path.clone()), false).unwrap();
        assert!(init_config(&config, Some(path.clone()), false).is_err());
        init_config(&config, Some(path.clone()), true).unwrap();

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
    }
}
