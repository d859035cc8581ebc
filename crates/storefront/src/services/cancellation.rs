//! Order cancellation.
//!
//! Only `pending` and `confirmed` orders can be cancelled. The store
//! re-checks the status under its lock and releases every line's stock in
//! the same atomic step, so two concurrent cancels release stock once.

use tracing::instrument;

use stockroom_core::{OrderId, UserId};

use super::Clock;
use super::checkout::MAX_NOTES;
use super::orders::OrderError;
use crate::db::OrderStore;
use crate::models::{Cancellation, Order, TransitionOutcome};

/// Reason recorded when the shopper gives none.
pub const DEFAULT_REASON: &str = "Cancelled by user";

fn normalize_reason(reason: Option<&str>) -> Result<String, OrderError> {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(DEFAULT_REASON.to_owned()),
        Some(r) if r.chars().count() > MAX_NOTES => Err(OrderError::Validation(format!(
            "Reason must be at most {MAX_NOTES} characters"
        ))),
        Some(r) => Ok(r.to_owned()),
    }
}

/// Cancellation service.
pub struct CancellationService<'a, S> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S: OrderStore> CancellationService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Cancel one of the user's orders and return its stock.
    ///
    /// A paid order's payment status becomes `refunded`; no money moves.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user has no such order, `InvalidTransition`
    /// if its status no longer allows cancellation, or `Validation` for an
    /// over-long reason.
    #[instrument(skip(self, reason), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn cancel(
        &self,
        user_id: UserId,
        order_id: OrderId,
        reason: Option<&str>,
    ) -> Result<Order, OrderError> {
        let reason = normalize_reason(reason)?;

        // Cheap pre-check for a clear error; the store re-checks under lock.
        let order = self
            .store
            .get_order(user_id, order_id)
            .await?
            .ok_or(OrderError::NotFound)?;
        if !order.status.is_cancellable() {
            return Err(OrderError::InvalidTransition {
                status: order.status,
            });
        }

        let cancellation = Cancellation {
            cancelled_at: self.clock.now(),
            reason,
        };
        match self
            .store
            .cancel_order(user_id, order_id, cancellation)
            .await?
        {
            TransitionOutcome::Applied(order) => {
                tracing::info!(
                    order_number = %order.order_number,
                    payment_status = %order.payment.status,
                    "Order cancelled"
                );
                Ok(order)
            }
            TransitionOutcome::Rejected(status) => {
                tracing::warn!(%status, "Order changed state before cancellation");
                Err(OrderError::InvalidTransition { status })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use stockroom_core::{OrderStatus, PaymentMethod, PaymentStatus, StockKey};

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::ShippingAddress;
    use crate::services::SystemClock;
    use crate::services::cart::CartService;
    use crate::services::checkout::{CheckoutRequest, CheckoutService, PaymentRequest};
    use crate::services::orders::OrderService;
    use crate::services::testing::{seed_tee, seed_user, stock_of};

    async fn place(store: &MemoryStore, user: UserId, key: &StockKey, quantity: u32) -> Order {
        CartService::new(store)
            .add_item(user, key, quantity)
            .await
            .unwrap();
        CheckoutService::new(store, &SystemClock)
            .checkout(
                user,
                CheckoutRequest {
                    shipping_address: ShippingAddress {
                        full_name: "Ada Lovelace".to_owned(),
                        address: "12 Analytical Row".to_owned(),
                        city: "London".to_owned(),
                        postal_code: "N1 9GU".to_owned(),
                        country: "UK".to_owned(),
                        phone: "020 7946 0000".to_owned(),
                    },
                    payment: PaymentRequest {
                        method: PaymentMethod::DebitCard,
                    },
                    shipping_cost: None,
                    tax: None,
                    notes: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_and_refunds() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let key = StockKey::new(tee.id, "black", "M");
        let order = place(&store, user, &key, 3).await;
        assert_eq!(stock_of(&store, &tee, "M").await, 2);

        let cancelled = CancellationService::new(&store, &SystemClock)
            .cancel(user, order.id, None)
            .await
            .unwrap();

        assert_eq!(stock_of(&store, &tee, "M").await, 5);
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some(DEFAULT_REASON));
        assert_eq!(cancelled.payment.status, PaymentStatus::Refunded);
        assert!(cancelled.cancelled_at.is_some());
        // Snapshot fields never change.
        assert_eq!(cancelled.order_number, order.order_number);
        assert_eq!(cancelled.total_amount, order.total_amount);
        assert_eq!(cancelled.items, order.items);
    }

    #[tokio::test]
    async fn test_second_cancel_is_invalid_transition() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let key = StockKey::new(tee.id, "black", "L");
        let order = place(&store, user, &key, 2).await;
        let service = CancellationService::new(&store, &SystemClock);

        service
            .cancel(user, order.id, Some("  wrong size "))
            .await
            .unwrap();
        let err = service.cancel(user, order.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                status: OrderStatus::Cancelled
            }
        ));
        assert_eq!(stock_of(&store, &tee, "L").await, 5);
        let stored = store.get_order(user, order.id).await.unwrap().unwrap();
        assert_eq!(stored.cancellation_reason.as_deref(), Some("wrong size"));
    }

    #[tokio::test]
    async fn test_foreign_or_missing_order_is_not_found() {
        let store = MemoryStore::new();
        let owner = seed_user(&store, "owner@example.com").await;
        let other = seed_user(&store, "other@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let order = place(&store, owner, &StockKey::new(tee.id, "black", "M"), 1).await;
        let service = CancellationService::new(&store, &SystemClock);

        assert!(matches!(
            service.cancel(other, order.id, None).await,
            Err(OrderError::NotFound)
        ));
        assert!(matches!(
            service.cancel(owner, OrderId::new(9999), None).await,
            Err(OrderError::NotFound)
        ));
        assert_eq!(stock_of(&store, &tee, "M").await, 4);
    }

    #[tokio::test]
    async fn test_shipped_order_cannot_be_cancelled() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let order = place(&store, user, &StockKey::new(tee.id, "black", "M"), 2).await;
        let orders = OrderService::new(&store);
        orders
            .advance(order.order_number.as_str(), OrderStatus::Processing)
            .await
            .unwrap();
        orders
            .advance(order.order_number.as_str(), OrderStatus::Shipped)
            .await
            .unwrap();

        let err = CancellationService::new(&store, &SystemClock)
            .cancel(user, order.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                status: OrderStatus::Shipped
            }
        ));
        assert_eq!(
            err.to_string(),
            "Cannot cancel an order with status \"shipped\". Only pending or confirmed orders can be cancelled"
        );
        assert_eq!(stock_of(&store, &tee, "M").await, 3);
    }

    #[test]
    fn test_reason_normalization() {
        assert_eq!(normalize_reason(None).unwrap(), DEFAULT_REASON);
        assert_eq!(normalize_reason(Some("   ")).unwrap(), DEFAULT_REASON);
        assert!(normalize_reason(Some(&"x".repeat(501))).is_err());
    }
}
