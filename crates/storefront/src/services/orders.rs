//! Order history queries and fulfillment transitions.

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{OrderId, OrderStatus, UserId};

use crate::db::{OrderStore, RepositoryError};
use crate::models::{Order, OrderFilter, OrderPage, TransitionOutcome};

/// Default page size for order history.
pub const DEFAULT_LIMIT: u32 = 10;
/// Largest page size a client may request.
pub const MAX_LIMIT: u32 = 100;

/// Errors from order lookups, cancellation and status changes.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found")]
    NotFound,

    #[error(
        "Cannot cancel an order with status \"{status}\". Only pending or confirmed orders can be cancelled"
    )]
    InvalidTransition { status: OrderStatus },

    #[error("Cannot move an order from \"{from}\" to \"{to}\"")]
    IllegalStatusChange { from: OrderStatus, to: OrderStatus },

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for OrderError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            other => Self::Repository(other),
        }
    }
}

/// Build a filter from optional query parameters.
///
/// # Errors
///
/// Returns `Validation` if `page` is below 1 or `limit` is outside
/// `1..=100`.
pub fn order_filter(
    page: Option<u32>,
    limit: Option<u32>,
    status: Option<OrderStatus>,
) -> Result<OrderFilter, OrderError> {
    let page = page.unwrap_or(1);
    if page < 1 {
        return Err(OrderError::Validation(
            "Page must be a positive integer".to_owned(),
        ));
    }
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(OrderError::Validation(format!(
            "Limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    Ok(OrderFilter {
        page,
        limit,
        status,
    })
}

/// Order query service. Every lookup is scoped to the owning user.
pub struct OrderService<'a, S> {
    store: &'a S,
}

impl<'a, S: OrderStore> OrderService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Returns `NotFound` unless the order exists and belongs to the user.
    pub async fn get(&self, user_id: UserId, order_id: OrderId) -> Result<Order, OrderError> {
        self.store
            .get_order(user_id, order_id)
            .await?
            .ok_or(OrderError::NotFound)
    }

    /// # Errors
    ///
    /// Returns `NotFound` unless the order exists and belongs to the user.
    pub async fn get_by_number(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> Result<Order, OrderError> {
        self.store
            .get_order_by_number(user_id, order_number.trim())
            .await?
            .ok_or(OrderError::NotFound)
    }

    /// The user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if storage fails.
    pub async fn list(&self, user_id: UserId, filter: OrderFilter) -> Result<OrderPage, OrderError> {
        Ok(self.store.list_orders(user_id, filter).await?)
    }

    /// Move an order along a fulfillment edge.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for `cancelled` (use cancellation instead),
    /// `NotFound`, or `IllegalStatusChange` if the edge is not allowed from
    /// the order's current status.
    #[instrument(skip(self))]
    pub async fn advance(&self, order_number: &str, next: OrderStatus) -> Result<Order, OrderError> {
        if next == OrderStatus::Cancelled {
            return Err(OrderError::Validation(
                "Cancel orders through the cancellation flow so stock is released".to_owned(),
            ));
        }
        match self
            .store
            .advance_order(order_number, next, Utc::now())
            .await?
        {
            TransitionOutcome::Applied(order) => {
                tracing::info!(order_number, status = %order.status, "Order status changed");
                Ok(order)
            }
            TransitionOutcome::Rejected(from) => {
                Err(OrderError::IllegalStatusChange { from, to: next })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use stockroom_core::{PaymentMethod, ProductId};

    use super::*;
    use crate::db::{MemoryStore, ProductStore};
    use crate::models::{NewOrder, NewProduct, NewSize, NewVariant, OrderItem, ShippingAddress};

    fn new_order(user_id: UserId, minutes_ago: i64) -> NewOrder {
        NewOrder::new(
            user_id,
            vec![OrderItem {
                product_id: ProductId::new(1),
                variant_id: "black".to_owned(),
                color: "Black".to_owned(),
                size: "M".to_owned(),
                quantity: 1,
                price: Decimal::new(1000, 2),
            }],
            ShippingAddress {
                full_name: "Ada".to_owned(),
                address: "1 Row".to_owned(),
                city: "London".to_owned(),
                postal_code: "N1".to_owned(),
                country: "UK".to_owned(),
                phone: "123".to_owned(),
            },
            PaymentMethod::CreditCard,
            Decimal::ZERO,
            Decimal::ZERO,
            None,
            Utc::now() - Duration::minutes(minutes_ago),
        )
        .unwrap()
    }

    async fn store_with_orders(user: UserId, count: i64) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_product(NewProduct {
                name: "Tee".to_owned(),
                slug: "tee".to_owned(),
                currency: stockroom_core::CurrencyCode::USD,
                variants: vec![NewVariant {
                    variant_id: "black".to_owned(),
                    color: "Black".to_owned(),
                    sizes: vec![NewSize {
                        size: "M".to_owned(),
                        sku: "TEE-M".to_owned(),
                        stock: 100,
                        price: Decimal::new(1000, 2),
                    }],
                }],
            })
            .await
            .unwrap();
        for i in 0..count {
            store.place_order(new_order(user, count - i)).await.unwrap();
        }
        store
    }

    #[test]
    fn test_order_filter_bounds() {
        let filter = order_filter(None, None, None).unwrap();
        assert_eq!((filter.page, filter.limit), (1, DEFAULT_LIMIT));
        assert!(order_filter(Some(0), None, None).is_err());
        assert!(order_filter(None, Some(0), None).is_err());
        assert!(order_filter(None, Some(101), None).is_err());
        assert!(order_filter(Some(3), Some(100), None).is_ok());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paginated() {
        let user = UserId::new(7);
        let store = store_with_orders(user, 5).await;
        let orders = OrderService::new(&store);

        let page = orders
            .list(user, order_filter(Some(1), Some(2), None).unwrap())
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.orders.len(), 2);
        assert!(page.orders[0].created_at > page.orders[1].created_at);

        let last = orders
            .list(user, order_filter(Some(3), Some(2), None).unwrap())
            .await
            .unwrap();
        assert_eq!(last.orders.len(), 1);

        let cancelled = orders
            .list(
                user,
                order_filter(None, None, Some(OrderStatus::Cancelled)).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cancelled.total, 0);
    }

    #[tokio::test]
    async fn test_lookup_by_number_is_user_scoped() {
        let user = UserId::new(7);
        let store = store_with_orders(user, 1).await;
        let orders = OrderService::new(&store);
        let placed = orders
            .list(user, order_filter(None, None, None).unwrap())
            .await
            .unwrap()
            .orders
            .remove(0);

        let found = orders
            .get_by_number(user, placed.order_number.as_str())
            .await
            .unwrap();
        assert_eq!(found.id, placed.id);
        assert!(matches!(
            orders
                .get_by_number(UserId::new(8), placed.order_number.as_str())
                .await,
            Err(OrderError::NotFound)
        ));
        assert!(matches!(
            orders.get(user, OrderId::new(12345)).await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_advance_rejects_illegal_edges() {
        let user = UserId::new(7);
        let store = store_with_orders(user, 1).await;
        let orders = OrderService::new(&store);
        let number = orders
            .list(user, order_filter(None, None, None).unwrap())
            .await
            .unwrap()
            .orders
            .remove(0)
            .order_number;

        assert!(matches!(
            orders.advance(number.as_str(), OrderStatus::Delivered).await,
            Err(OrderError::IllegalStatusChange {
                from: OrderStatus::Confirmed,
                to: OrderStatus::Delivered
            })
        ));
        assert!(matches!(
            orders.advance(number.as_str(), OrderStatus::Cancelled).await,
            Err(OrderError::Validation(_))
        ));
        let order = orders
            .advance(number.as_str(), OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
    }
}
