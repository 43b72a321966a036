//! # Seed Data Generator
//!
//! Fills the local cache with sample catalogue data for development, so the
//! engine and the CLI can be exercised without a remote authority.
//!
//! ## Usage
//! ```bash
//! # Generate 500 products (default)
//! cargo run -p stockline-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p stockline-db --bin seed -- --count 2000
//!
//! # Specify database path
//! cargo run -p stockline-db --bin seed -- --db ./data/stockline.db
//! ```
//!
//! ## Generated Data
//! - 5 categories (beverages, snacks, dairy, frozen, grocery)
//! - Products `{CATEGORY}-{NAME}-{NNN}` with integer ids, prices $1.99 - $13.49
//! - One inventory row per product, threshold 5, stock 0 - 40
//! - A handful of confirmed customers
//!
//! Only cache tables are written. The mutation log is left empty.

use chrono::Utc;
use std::env;
use tracing_subscriber::EnvFilter;

use stockline_core::{Category, Customer, EntityBatch, InventoryRecord, Product};
use stockline_db::{Database, DbConfig};

/// Categories with sample product names.
const CATEGORIES: &[(&str, &str, &[&str])] = &[
    (
        "BEV",
        "Beverages",
        &[
            "Coca-Cola", "Pepsi", "Sprite", "Fanta", "Red Bull", "Gatorade", "Evian Water",
            "Orange Juice", "Iced Tea", "Cold Brew",
        ],
    ),
    (
        "SNK",
        "Snacks",
        &[
            "Lays Classic", "Doritos Nacho", "Pringles", "Snickers", "Kit Kat", "Twix",
            "Skittles", "Oreos", "Goldfish", "Pretzels",
        ],
    ),
    (
        "DRY",
        "Dairy",
        &[
            "Whole Milk", "Oat Milk", "Cheddar Cheese", "Mozzarella", "Butter", "Greek Yogurt",
            "Sour Cream", "Heavy Cream", "Eggs Dozen", "Parmesan",
        ],
    ),
    (
        "FRZ",
        "Frozen",
        &[
            "Vanilla Ice Cream", "Frozen Pizza", "Frozen Burrito", "Ice Cream Bars", "Popsicles",
            "Frozen Vegetables", "Frozen Waffles", "Fish Sticks", "Chicken Nuggets", "Sorbet",
        ],
    ),
    (
        "GRO",
        "Grocery",
        &[
            "White Bread", "Pasta Penne", "Rice White", "Canned Beans", "Canned Soup", "Oatmeal",
            "Peanut Butter", "Honey", "Flour", "Sugar",
        ],
    ),
];

/// Size variants with their price add-on in cents.
const SIZES: &[(&str, i64)] = &[
    ("Small", 0),
    ("Medium", 100),
    ("Large", 200),
    ("12oz", 0),
    ("2L", 150),
    ("6-Pack", 300),
    ("12-Pack", 500),
];

const CUSTOMERS: &[(&str, &str)] = &[
    ("Ada Lovelace", "ada@example.com"),
    ("Grace Hopper", "grace@example.com"),
    ("Alan Turing", "alan@example.com"),
    ("Katherine Johnson", "katherine@example.com"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,stockline=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut db_path = String::from("./stockline_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockline Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 500)");
                println!("  -d, --db <PATH>    Database file path (default: ./stockline_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Stockline Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database, migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid overwriting the cache.");
        println!("  Run `stockline clear-cache` to start over.");
        return Ok(());
    }

    let start = std::time::Instant::now();

    let categories: Vec<Category> = CATEGORIES
        .iter()
        .enumerate()
        .map(|(idx, (_, name, _))| Category {
            id: idx as i64 + 1,
            name: name.to_string(),
            description: None,
        })
        .collect();
    db.upsert_entities(&EntityBatch::Categories(categories)).await?;
    println!("✓ {} categories", CATEGORIES.len());

    let mut products = Vec::with_capacity(count);
    'outer: for (category_idx, (code, _, names)) in CATEGORIES.iter().enumerate() {
        for name in names.iter() {
            for (size, price_addon) in SIZES.iter() {
                if products.len() >= count {
                    break 'outer;
                }
                let seq = products.len() + 1;
                products.push(generate_product(
                    seq,
                    category_idx as i64 + 1,
                    code,
                    name,
                    size,
                    *price_addon,
                ));
            }
        }
    }

    let inventory: Vec<InventoryRecord> = products
        .iter()
        .map(|p| InventoryRecord {
            product_id: p.id,
            quantity: (p.id * 7) % 41,
            low_stock_threshold: Some(5),
            last_updated: Utc::now(),
        })
        .collect();

    for chunk in products.chunks(250) {
        db.upsert_entities(&EntityBatch::Products(chunk.to_vec())).await?;
    }
    db.upsert_entities(&EntityBatch::Inventory(inventory)).await?;
    println!("✓ {} products with inventory", products.len());

    let customers: Vec<Customer> = CUSTOMERS
        .iter()
        .enumerate()
        .map(|(idx, (name, email))| Customer {
            id: uuid::Uuid::new_v4().to_string(),
            remote_id: Some(idx as i64 + 1),
            name: name.to_string(),
            email: Some(email.to_string()),
            phone: None,
            loyalty_points: (idx as i64 + 1) * 25,
        })
        .collect();
    db.upsert_entities(&EntityBatch::Customers(customers)).await?;
    println!("✓ {} customers", CUSTOMERS.len());

    let elapsed = start.elapsed();
    println!();
    println!("✓ Seed complete in {:?}", elapsed);

    let low = db
        .inventory()
        .list(&stockline_core::EntityFilter::all().low_stock())
        .await?;
    println!("  Low stock products: {}", low.len());

    Ok(())
}

/// Generates a single product with deterministic sample data.
fn generate_product(
    id: usize,
    category_id: i64,
    code: &str,
    name: &str,
    size: &str,
    price_addon: i64,
) -> Product {
    let now = Utc::now();
    let short: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_uppercase();

    Product {
        id: id as i64,
        name: format!("{} {}", name, size),
        sku: format!("{}-{}-{:03}", code, short, id),
        // EAN-13 shaped, checksum not valid
        barcode: Some(format!("590{:010}", id)),
        price_cents: 199 + ((id as i64 * 17) % 650) + price_addon,
        category_id: Some(category_id),
        image_url: None,
        description: None,
        created_at: Some(now),
        updated_at: Some(now),
    }
}
