//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! sr-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string for storefront
//!
//! # Migration Files
//!
//! Storefront migrations live in `crates/storefront/migrations/`:
//! schema and users, sessions, catalog, carts, orders.

use std::path::Path;

use sqlx::migrate::Migrator;
use tracing::info;

/// Run storefront database migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn storefront() -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to storefront database...");
    let store = super::connect().await?;

    info!("Running storefront migrations...");
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("../storefront/migrations");
    Migrator::new(migrations).await?.run(store.pool()).await?;

    info!("Storefront migrations complete!");
    Ok(())
}
