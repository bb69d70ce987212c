//! # Seed Data Generator
//!
//! Populates a development database with stock rows for a spirits catalogue.
//!
//! ## Usage
//! ```bash
//! # 3 warehouses (default), config from ./cellar.toml or environment
//! cargo run -p cellar-db --bin seed
//!
//! # Custom warehouse count and config file
//! cargo run -p cellar-db --bin seed -- --warehouses 5 --config ./dev.toml
//!
//! # Also reserve and pay a demo order
//! cargo run -p cellar-db --bin seed -- --demo-order
//! ```
//!
//! ## Generated Rows
//! Product ids are positions in [`CATALOGUE`] (1-based), warehouse ids run
//! from 1 to `--warehouses`. Quantities are deterministic so two runs against
//! fresh databases produce the same ledger.

use std::env;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use cellar_db::{CellarConfig, Database};

/// Spirits stocked by every warehouse.
const CATALOGUE: &[&str] = &[
    "Highland Single Malt 12yo",
    "Islay Single Malt 10yo",
    "Speyside Single Malt 15yo",
    "Blended Scotch Whisky",
    "Kentucky Straight Bourbon",
    "Tennessee Whiskey",
    "Rye Whiskey",
    "Irish Whiskey",
    "Japanese Blended Whisky",
    "London Dry Gin",
    "Navy Strength Gin",
    "Old Tom Gin",
    "Blanco Tequila",
    "Reposado Tequila",
    "Anejo Tequila",
    "Mezcal Espadin",
    "Wheat Vodka",
    "Potato Vodka",
    "White Rum",
    "Dark Rum",
    "Spiced Rum",
    "Rhum Agricole",
    "VS Cognac",
    "VSOP Cognac",
    "XO Armagnac",
    "Calvados",
    "Pisco",
    "Grappa",
    "Absinthe",
    "Amaretto",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut warehouses: i64 = 3;
    let mut config_path: Option<PathBuf> = None;
    let mut demo_order = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--warehouses" | "-w" => {
                if i + 1 < args.len() {
                    warehouses = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--demo-order" => demo_order = true,
            "--help" | "-h" => {
                println!("Cellar Stock Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -w, --warehouses <N>   Number of warehouses (default: 3)");
                println!("  -c, --config <PATH>    Config file (default: ./cellar.toml)");
                println!("      --demo-order       Reserve and pay a demo order");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = CellarConfig::load(config_path)?;

    println!("Cellar Stock Seed Data Generator");
    println!("================================");
    println!("Database:   {}", config.database.path.display());
    println!("Products:   {}", CATALOGUE.len());
    println!("Warehouses: {}", warehouses);
    println!();

    let db = Database::new(config.to_db_config()).await?;
    let ledger = db.ledger();

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    if !ledger.rows_for_product(1).await?.is_empty() {
        println!("⚠ Database already has stock rows");
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let mut created = 0;
    for (idx, name) in CATALOGUE.iter().enumerate() {
        let product_id = idx as i64 + 1;

        for warehouse_id in 1..=warehouses {
            let quantity = initial_quantity(product_id, warehouse_id);

            if let Err(e) = ledger.create_row(product_id, warehouse_id, quantity).await {
                eprintln!("Failed to stock {} in warehouse {}: {}", name, warehouse_id, e);
                continue;
            }
            created += 1;
        }
    }

    println!("✓ Created {} stock rows", created);

    if demo_order {
        run_demo_order(&db).await?;
    }

    let threshold = config.stock.low_stock_threshold;
    let low = ledger.low_stock(threshold).await?;
    println!();
    println!("Low stock (available <= {}): {} rows", threshold, low.len());
    for row in low.iter().take(10) {
        println!(
            "  {:<28} warehouse {}  available {}",
            product_name(row.product_id),
            row.warehouse_id,
            row.available()
        );
    }

    let broken = ledger.check_invariants().await?;
    println!();
    if broken.is_empty() {
        println!("✓ All rows satisfy 0 <= reserved <= quantity");
    } else {
        println!("✗ {} rows break 0 <= reserved <= quantity", broken.len());
        println!("{}", serde_json::to_string_pretty(&broken)?);
    }

    db.close().await;
    Ok(())
}

fn product_name(product_id: i64) -> &'static str {
    usize::try_from(product_id - 1)
        .ok()
        .and_then(|idx| CATALOGUE.get(idx).copied())
        .unwrap_or("unknown product")
}

/// Deterministic starting quantity; roughly one row in seven starts near empty.
fn initial_quantity(product_id: i64, warehouse_id: i64) -> i64 {
    let seed = product_id * 31 + warehouse_id * 17;
    if seed % 7 == 0 {
        seed % 4
    } else {
        12 + seed % 109
    }
}

/// Reserves and pays order 1 against product 1, printing the engine reports.
async fn run_demo_order(db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    let lines = db.order_lines();
    let Some(warehouse_id) = db.ledger().suggest_warehouse(1, 2).await? else {
        println!("⚠ No warehouse can cover the demo order");
        return Ok(());
    };

    lines.insert(1, 1, Some(warehouse_id), 2).await?;
    lines.insert(1, 2, None, 1).await?;

    let engine = db.reservations();
    let reserved = engine.reserve_order(1).await?;
    let confirmed = engine.confirm_order(1).await?;

    println!();
    println!("Demo order 1:");
    println!("{}", serde_json::to_string_pretty(&reserved)?);
    println!("{}", serde_json::to_string_pretty(&confirmed)?);
    Ok(())
}

/// Initializes the tracing subscriber for logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show all debug logs
/// - `RUST_LOG=cellar_db=trace` - Trace level for the stock crates only
/// - Default: `info,cellar=debug,sqlx=warn`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cellar=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
