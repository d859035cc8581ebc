//! Catalog and stock counters in `PostgreSQL`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};

use stockroom_core::{CurrencyCode, ProductId, StockKey};

use super::{PgStore, ProductStore, RepositoryError, conflict_on_unique, db_count, stored_count};
use crate::models::{NewProduct, Product, SizeStock, Variant};

#[derive(FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    slug: String,
    currency: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct VariantRow {
    product_id: ProductId,
    variant_id: String,
    color: String,
}

#[derive(FromRow)]
struct SizeRow {
    product_id: ProductId,
    variant_id: String,
    size: String,
    sku: String,
    stock: i32,
    price: Decimal,
}

/// Assemble products from their flat rows. Child rows must already be in
/// display order.
fn assemble(
    products: Vec<ProductRow>,
    variants: Vec<VariantRow>,
    sizes: Vec<SizeRow>,
) -> Result<Vec<Product>, RepositoryError> {
    let mut out = Vec::with_capacity(products.len());
    for row in products {
        let currency: CurrencyCode = row.currency.parse().map_err(|e: String| {
            RepositoryError::DataCorruption(format!("product {}: {e}", row.id))
        })?;
        let mut product_variants = Vec::new();
        for v in variants.iter().filter(|v| v.product_id == row.id) {
            let mut entries = Vec::new();
            for s in sizes
                .iter()
                .filter(|s| s.product_id == row.id && s.variant_id == v.variant_id)
            {
                entries.push(SizeStock {
                    size: s.size.clone(),
                    sku: s.sku.clone(),
                    stock: stored_count(s.stock, "stock")?,
                    price: s.price,
                });
            }
            product_variants.push(Variant {
                variant_id: v.variant_id.clone(),
                color: v.color.clone(),
                sizes: entries,
            });
        }
        out.push(Product {
            id: row.id,
            name: row.name,
            slug: row.slug,
            currency,
            variants: product_variants,
            created_at: row.created_at,
        });
    }
    Ok(out)
}

async fn load_products(
    conn: &mut PgConnection,
    ids: Option<&[i32]>,
) -> Result<Vec<Product>, RepositoryError> {
    let products: Vec<ProductRow> = sqlx::query_as(
        r"
        SELECT id, name, slug, currency, created_at
        FROM storefront.product
        WHERE $1::int4[] IS NULL OR id = ANY($1)
        ORDER BY id
        ",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let variants: Vec<VariantRow> = sqlx::query_as(
        r"
        SELECT product_id, variant_id, color
        FROM storefront.product_variant
        WHERE $1::int4[] IS NULL OR product_id = ANY($1)
        ORDER BY product_id, position
        ",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let sizes: Vec<SizeRow> = sqlx::query_as(
        r"
        SELECT product_id, variant_id, size, sku, stock, price
        FROM storefront.product_size
        WHERE $1::int4[] IS NULL OR product_id = ANY($1)
        ORDER BY product_id, variant_id, position
        ",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    assemble(products, variants, sizes)
}

/// Conditionally decrement one size entry.
///
/// The `stock >= $4` guard makes check and write one statement, so two
/// concurrent reservations can never both succeed against the same units.
pub(super) async fn reserve_in(
    conn: &mut PgConnection,
    key: &StockKey,
    quantity: u32,
) -> Result<u32, RepositoryError> {
    let remaining: Option<i32> = sqlx::query_scalar(
        r"
        UPDATE storefront.product_size
        SET stock = stock - $4, updated_at = NOW()
        WHERE product_id = $1 AND variant_id = $2 AND size = $3 AND stock >= $4
        RETURNING stock
        ",
    )
    .bind(key.product_id)
    .bind(&key.variant_id)
    .bind(&key.size)
    .bind(db_count(quantity)?)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(remaining) = remaining {
        return stored_count(remaining, "stock");
    }

    let available: Option<i32> = sqlx::query_scalar(
        r"
        SELECT stock FROM storefront.product_size
        WHERE product_id = $1 AND variant_id = $2 AND size = $3
        ",
    )
    .bind(key.product_id)
    .bind(&key.variant_id)
    .bind(&key.size)
    .fetch_optional(&mut *conn)
    .await?;

    match available {
        Some(available) => Err(RepositoryError::InsufficientStock {
            key: key.clone(),
            requested: quantity,
            available: stored_count(available, "stock")?,
        }),
        None => Err(RepositoryError::MissingStock(key.clone())),
    }
}

/// Increment one size entry.
pub(super) async fn release_in(
    conn: &mut PgConnection,
    key: &StockKey,
    quantity: u32,
) -> Result<u32, RepositoryError> {
    let stock: Option<i32> = sqlx::query_scalar(
        r"
        UPDATE storefront.product_size
        SET stock = stock + $4, updated_at = NOW()
        WHERE product_id = $1 AND variant_id = $2 AND size = $3
        RETURNING stock
        ",
    )
    .bind(key.product_id)
    .bind(&key.variant_id)
    .bind(&key.size)
    .bind(db_count(quantity)?)
    .fetch_optional(&mut *conn)
    .await?;

    match stock {
        Some(stock) => stored_count(stock, "stock"),
        None => Err(RepositoryError::MissingStock(key.clone())),
    }
}

impl ProductStore for PgStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let ids = [id.as_i32()];
        Ok(load_products(&mut conn, Some(&ids)).await?.pop())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_products(&mut conn, None).await
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let (id, created_at): (ProductId, DateTime<Utc>) = sqlx::query_as(
            r"
            INSERT INTO storefront.product (name, slug, currency)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            ",
        )
        .bind(&product.name)
        .bind(&product.slug)
        .bind(product.currency.code())
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict_on_unique("product slug"))?;

        for (v_pos, variant) in product.variants.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO storefront.product_variant (product_id, variant_id, color, position)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(id)
            .bind(&variant.variant_id)
            .bind(&variant.color)
            .bind(i32::try_from(v_pos).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(conflict_on_unique("variant"))?;

            for (s_pos, size) in variant.sizes.iter().enumerate() {
                sqlx::query(
                    r"
                    INSERT INTO storefront.product_size
                        (product_id, variant_id, size, sku, stock, price, position)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ",
                )
                .bind(id)
                .bind(&variant.variant_id)
                .bind(&size.size)
                .bind(&size.sku)
                .bind(db_count(size.stock)?)
                .bind(size.price)
                .bind(i32::try_from(s_pos).unwrap_or(i32::MAX))
                .execute(&mut *tx)
                .await
                .map_err(conflict_on_unique("size"))?;
            }
        }

        tx.commit().await?;
        Ok(product.into_product(id, created_at))
    }

    async fn reserve_stock(&self, key: &StockKey, quantity: u32) -> Result<u32, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        reserve_in(&mut conn, key, quantity).await
    }

    async fn release_stock(&self, key: &StockKey, quantity: u32) -> Result<u32, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        release_in(&mut conn, key, quantity).await
    }
}
