//! Carts in `PostgreSQL`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};

use stockroom_core::{CartId, ProductId, UserId};

use super::{CartStore, PgStore, RepositoryError, db_count, stored_count};
use crate::models::{Cart, CartItem};

#[derive(FromRow)]
struct CartRow {
    id: CartId,
    user_id: UserId,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CartItemRow {
    product_id: ProductId,
    variant_id: String,
    size: String,
    quantity: i32,
    price: Decimal,
}

async fn load_cart(conn: &mut PgConnection, user_id: UserId) -> Result<Option<Cart>, RepositoryError> {
    let row: Option<CartRow> = sqlx::query_as(
        r"
        SELECT id, user_id, updated_at
        FROM storefront.cart
        WHERE user_id = $1
        ",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let items: Vec<CartItemRow> = sqlx::query_as(
        r"
        SELECT product_id, variant_id, size, quantity, price
        FROM storefront.cart_item
        WHERE cart_id = $1
        ORDER BY position
        ",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    let items = items
        .into_iter()
        .map(|i| {
            Ok(CartItem {
                product_id: i.product_id,
                variant_id: i.variant_id,
                size: i.size,
                quantity: stored_count(i.quantity, "cart quantity")?,
                price: i.price,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

    Ok(Some(Cart::from_parts(row.id, row.user_id, items, row.updated_at)))
}

/// Empty the user's cart inside an open transaction.
pub(super) async fn clear_in(conn: &mut PgConnection, user_id: UserId) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        DELETE FROM storefront.cart_item
        WHERE cart_id = (SELECT id FROM storefront.cart WHERE user_id = $1)
        ",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r"
        UPDATE storefront.cart
        SET total_items = 0, total_price = 0, updated_at = NOW()
        WHERE user_id = $1
        ",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

impl CartStore for PgStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_cart(&mut conn, user_id).await
    }

    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            r"
            INSERT INTO storefront.cart (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO NOTHING
            ",
        )
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        load_cart(&mut conn, user_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn save_cart(&self, cart: &Cart) -> Result<(), RepositoryError> {
        let totals = cart.totals();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE storefront.cart
            SET total_items = $2, total_price = $3, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(cart.id)
        .bind(db_count(totals.total_items)?)
        .bind(totals.total_price)
        .bind(cart.updated_at)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query("DELETE FROM storefront.cart_item WHERE cart_id = $1")
            .bind(cart.id)
            .execute(&mut *tx)
            .await?;

        for (position, item) in cart.items().iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO storefront.cart_item
                    (cart_id, position, product_id, variant_id, size, quantity, price)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(cart.id)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(item.product_id)
            .bind(&item.variant_id)
            .bind(&item.size)
            .bind(db_count(item.quantity)?)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
