//! Orders in `PostgreSQL`.
//!
//! Placement and cancellation each run in a single transaction together with
//! their stock writes, so an order never exists without its reservations and
//! a cancelled order never keeps them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};

use stockroom_core::{OrderId, OrderStatus, PaymentMethod, PaymentStatus, ProductId, UserId};

use super::carts::clear_in;
use super::products::{release_in, reserve_in};
use super::{OrderStore, PgStore, RepositoryError, conflict_on_unique, db_count, stored_count};
use crate::models::{
    Cancellation, NewOrder, Order, OrderFilter, OrderItem, OrderNumber, OrderPage, Payment,
    ShippingAddress, TransitionOutcome,
};

const ORDER_COLUMNS: &str = r"
    id, order_number, user_id,
    ship_full_name, ship_address, ship_city, ship_postal_code, ship_country, ship_phone,
    payment_method, payment_status, transaction_id, paid_at,
    items_total, shipping_cost, tax, total_amount,
    status, notes, cancelled_at, cancellation_reason, delivered_at,
    created_at, updated_at
";

#[derive(FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    user_id: UserId,
    ship_full_name: String,
    ship_address: String,
    ship_city: String,
    ship_postal_code: String,
    ship_country: String,
    ship_phone: String,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    transaction_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    items_total: Decimal,
    shipping_cost: Decimal,
    tax: Decimal,
    total_amount: Decimal,
    status: OrderStatus,
    notes: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct OrderItemRow {
    order_id: OrderId,
    product_id: ProductId,
    variant_id: String,
    color: String,
    size: String,
    quantity: i32,
    price: Decimal,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        Order {
            id: self.id,
            order_number: OrderNumber::from_stored(self.order_number),
            user_id: self.user_id,
            items,
            shipping_address: ShippingAddress {
                full_name: self.ship_full_name,
                address: self.ship_address,
                city: self.ship_city,
                postal_code: self.ship_postal_code,
                country: self.ship_country,
                phone: self.ship_phone,
            },
            payment: Payment {
                method: self.payment_method,
                status: self.payment_status,
                transaction_id: self.transaction_id,
                paid_at: self.paid_at,
            },
            items_total: self.items_total,
            shipping_cost: self.shipping_cost,
            tax: self.tax,
            total_amount: self.total_amount,
            status: self.status,
            notes: self.notes,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            delivered_at: self.delivered_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Attach line items to a batch of order rows, keeping row order.
async fn with_items(
    conn: &mut PgConnection,
    rows: Vec<OrderRow>,
) -> Result<Vec<Order>, RepositoryError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i32> = rows.iter().map(|r| r.id.as_i32()).collect();
    let items: Vec<OrderItemRow> = sqlx::query_as(
        r"
        SELECT order_id, product_id, variant_id, color, size, quantity, price
        FROM storefront.order_item
        WHERE order_id = ANY($1)
        ORDER BY order_id, position
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut orders = Vec::with_capacity(rows.len());
    for row in rows {
        let lines = items
            .iter()
            .filter(|i| i.order_id == row.id)
            .map(|i| {
                Ok(OrderItem {
                    product_id: i.product_id,
                    variant_id: i.variant_id.clone(),
                    color: i.color.clone(),
                    size: i.size.clone(),
                    quantity: stored_count(i.quantity, "order quantity")?,
                    price: i.price,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        if lines.is_empty() {
            return Err(RepositoryError::DataCorruption(format!(
                "order {} has no items",
                row.id
            )));
        }
        orders.push(row.into_order(lines));
    }
    Ok(orders)
}

async fn fetch_one(
    conn: &mut PgConnection,
    row: Option<OrderRow>,
) -> Result<Option<Order>, RepositoryError> {
    match row {
        Some(row) => Ok(with_items(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

impl OrderStore for PgStore {
    async fn place_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let address = &order.shipping_address;
        let id: OrderId = sqlx::query_scalar(
            r"
            INSERT INTO storefront.order (
                order_number, user_id,
                ship_full_name, ship_address, ship_city, ship_postal_code, ship_country, ship_phone,
                payment_method, payment_status, transaction_id, paid_at,
                items_total, shipping_cost, tax, total_amount,
                status, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $19)
            RETURNING id
            ",
        )
        .bind(order.order_number.as_str())
        .bind(order.user_id)
        .bind(&address.full_name)
        .bind(&address.address)
        .bind(&address.city)
        .bind(&address.postal_code)
        .bind(&address.country)
        .bind(&address.phone)
        .bind(order.payment.method)
        .bind(order.payment.status)
        .bind(order.payment.transaction_id.as_deref())
        .bind(order.payment.paid_at)
        .bind(order.items_total)
        .bind(order.shipping_cost)
        .bind(order.tax)
        .bind(order.total_amount)
        .bind(order.status)
        .bind(order.notes.as_deref())
        .bind(order.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict_on_unique("order number"))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO storefront.order_item
                    (order_id, position, product_id, variant_id, color, size, quantity, price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(id)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(item.product_id)
            .bind(&item.variant_id)
            .bind(&item.color)
            .bind(&item.size)
            .bind(db_count(item.quantity)?)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;

            // An error here drops `tx`, rolling back the order and every
            // earlier reservation.
            reserve_in(&mut tx, &item.stock_key(), item.quantity).await?;
        }

        clear_in(&mut tx, order.user_id).await?;
        tx.commit().await?;

        Ok(order.into_order(id))
    }

    async fn get_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE id = $1 AND user_id = $2"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        fetch_one(&mut conn, row).await
    }

    async fn get_order_by_number(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE order_number = $1 AND user_id = $2"
        ))
        .bind(order_number)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        fetch_one(&mut conn, row).await
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        filter: OrderFilter,
    ) -> Result<OrderPage, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        let total: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM storefront.order
            WHERE user_id = $1 AND ($2::storefront.order_status IS NULL OR status = $2)
            ",
        )
        .bind(user_id)
        .bind(filter.status)
        .fetch_one(&mut *conn)
        .await?;

        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM storefront.order
            WHERE user_id = $1 AND ($2::storefront.order_status IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "
        ))
        .bind(user_id)
        .bind(filter.status)
        .bind(i64::from(filter.limit))
        .bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        Ok(OrderPage {
            orders: with_items(&mut conn, rows).await?,
            total: u64::try_from(total).unwrap_or_default(),
            page: filter.page,
            limit: filter.limit,
        })
    }

    async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
        cancellation: Cancellation,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Row lock: a concurrent cancel waits here, then sees `cancelled`.
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut order = fetch_one(&mut tx, row)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        if !order.status.is_cancellable() {
            return Ok(TransitionOutcome::Rejected(order.status));
        }

        for item in &order.items {
            let key = item.stock_key();
            match release_in(&mut tx, &key, item.quantity).await {
                Ok(_) => {}
                // Catalog entry was removed after purchase; nothing to return.
                Err(RepositoryError::MissingStock(_)) => {
                    tracing::warn!(%key, quantity = item.quantity, "Released stock for missing entry");
                }
                Err(err) => return Err(err),
            }
        }

        order.apply_cancellation(cancellation);
        sqlx::query(
            r"
            UPDATE storefront.order
            SET status = $2, payment_status = $3, cancelled_at = $4,
                cancellation_reason = $5, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(order.id)
        .bind(order.status)
        .bind(order.payment.status)
        .bind(order.cancelled_at)
        .bind(order.cancellation_reason.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied(order))
    }

    async fn advance_order(
        &self,
        order_number: &str,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order WHERE order_number = $1 FOR UPDATE"
        ))
        .bind(order_number)
        .fetch_optional(&mut *tx)
        .await?;

        let mut order = fetch_one(&mut tx, row)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        if !order.advance(next, at) {
            return Ok(TransitionOutcome::Rejected(order.status));
        }

        sqlx::query(
            r"
            UPDATE storefront.order
            SET status = $2, delivered_at = $3, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(order.id)
        .bind(order.status)
        .bind(order.delivered_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied(order))
    }
}
