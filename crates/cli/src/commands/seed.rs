//! Seed the catalog from a YAML file.
//!
//! The file is a list of products:
//!
//! ```yaml
//! - name: Classic Tee
//!   slug: classic-tee
//!   currency: USD
//!   variants:
//!     - variantId: black
//!       color: Black
//!       sizes:
//!         - { size: M, sku: TEE-BLK-M, stock: 20, price: "20.00" }
//! ```
//!
//! Products whose slug already exists are skipped, so the command can be
//! re-run after adding entries.

use std::path::Path;

use tracing::{error, info, warn};

use stockroom_storefront::db::{ProductStore, RepositoryError};
use stockroom_storefront::models::NewProduct;

/// Parse and validate a catalog file's contents.
///
/// # Errors
///
/// Returns every validation problem found, or the YAML parse error.
pub fn parse_catalog(content: &str) -> Result<Vec<NewProduct>, Vec<String>> {
    let products: Vec<NewProduct> =
        serde_yaml::from_str(content).map_err(|e| vec![e.to_string()])?;
    let errors: Vec<String> = products.iter().flat_map(NewProduct::validate).collect();
    if errors.is_empty() {
        Ok(products)
    } else {
        Err(errors)
    }
}

/// Seed products from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation, or if
/// a database operation other than a duplicate slug fails.
pub async fn products(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading products from file");

    // Read and validate YAML before connecting to database
    let content = tokio::fs::read_to_string(path).await?;
    let catalog = match parse_catalog(&content) {
        Ok(catalog) => catalog,
        Err(errors) => {
            error!("Catalog validation failed:");
            for err in &errors {
                error!("  - {err}");
            }
            return Err(format!("{} validation errors found", errors.len()).into());
        }
    };

    info!(products = catalog.len(), "Catalog validated successfully");

    let store = super::connect().await?;
    let mut inserted = 0usize;
    let mut skipped = 0usize;

    for product in catalog {
        let slug = product.slug.clone();
        match store.insert_product(product).await {
            Ok(product) => {
                info!(id = %product.id, slug = %product.slug, "Inserted product");
                inserted += 1;
            }
            Err(RepositoryError::Conflict(_)) => {
                warn!(slug = %slug, "Product already exists, skipping");
                skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!("Seeding complete!");
    info!("  Products inserted: {inserted}");
    info!("  Products skipped (already exist): {skipped}");

    Ok(())
}
