//! Stockroom CLI - database migrations and operations tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! sr-cli migrate
//!
//! # Load products from a YAML catalog
//! sr-cli seed products catalog.yaml
//!
//! # Show stock per size
//! sr-cli stock show
//! sr-cli stock show --product 12
//!
//! # Move an order along fulfillment
//! sr-cli order advance ORD-LX3K9A2B-7QF0ZD processing
//! ```
//!
//! All commands read `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use stockroom_core::{OrderStatus, ProductId};

mod commands;

#[derive(Parser)]
#[command(name = "sr-cli")]
#[command(author, version, about = "Stockroom CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Seed the catalog
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
    /// Inspect stock levels
    Stock {
        #[command(subcommand)]
        action: StockAction,
    },
    /// Fulfillment operations on orders
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Insert products from a YAML file; existing slugs are skipped
    Products {
        /// Path to the YAML catalog
        file: String,
    },
}

#[derive(Subcommand)]
enum StockAction {
    /// Print stock for every size
    Show {
        /// Only this product
        #[arg(short, long)]
        product: Option<ProductId>,
    },
}

#[derive(Subcommand)]
enum OrderAction {
    /// Move an order to the next fulfillment status
    Advance {
        /// Order number, e.g. `ORD-LX3K9A2B-7QF0ZD`
        order_number: String,

        /// `processing`, `shipped` or `delivered`
        status: OrderStatus,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Seed { target } => match target {
            SeedTarget::Products { file } => commands::seed::products(&file).await?,
        },
        Commands::Stock { action } => match action {
            StockAction::Show { product } => commands::stock::show(product).await?,
        },
        Commands::Order { action } => match action {
            OrderAction::Advance {
                order_number,
                status,
            } => commands::order::advance(&order_number, status).await?,
        },
    }
    Ok(())
}
