//! Fulfillment operations.

use tracing::info;

use stockroom_core::OrderStatus;
use stockroom_storefront::services::OrderService;

/// Move an order along `confirmed -> processing -> shipped -> delivered`.
///
/// # Errors
///
/// Returns an error if the order does not exist or the transition is not
/// allowed from its current status. Cancellation is refused; shoppers
/// cancel through the API so stock is released.
pub async fn advance(
    order_number: &str,
    status: OrderStatus,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::connect().await?;
    let order = OrderService::new(&store)
        .advance(order_number, status)
        .await?;
    info!(
        order_number = %order.order_number,
        status = %order.status,
        "Order updated"
    );
    Ok(())
}
