//! Stock inspection.

use tracing::info;

use stockroom_core::ProductId;
use stockroom_storefront::db::ProductStore;
use stockroom_storefront::models::Product;

fn report(product: &Product) {
    info!(
        "{} {} ({}), {} units",
        product.id,
        product.name,
        product.slug,
        product.total_stock()
    );
    for variant in &product.variants {
        for size in &variant.sizes {
            info!(
                "  {}/{:<6} {:<14} {:>5} @ {}",
                variant.variant_id,
                size.size,
                size.sku,
                size.stock,
                product.currency.format(size.price)
            );
        }
    }
}

/// Print per-size stock for one product or the whole catalog.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the product does not
/// exist.
pub async fn show(product_id: Option<ProductId>) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::connect().await?;

    if let Some(id) = product_id {
        let product = store
            .get_product(id)
            .await?
            .ok_or_else(|| format!("Product {id} not found"))?;
        report(&product);
        return Ok(());
    }

    let products = store.list_products().await?;
    info!("Stock levels");
    info!("============");
    for product in &products {
        report(product);
    }
    info!("{} products", products.len());
    Ok(())
}
