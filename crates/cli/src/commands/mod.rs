//! CLI command implementations.

pub mod migrate;
pub mod order;
pub mod seed;
pub mod stock;

use secrecy::SecretString;

use stockroom_storefront::db::{self, PgStore};

/// Connect to the storefront database named by the environment.
///
/// # Errors
///
/// Returns an error if no database URL is set or the connection fails.
pub async fn connect() -> Result<PgStore, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| "STOREFRONT_DATABASE_URL not set")?;

    let pool = db::create_pool(&database_url).await?;
    Ok(PgStore::new(pool))
}
