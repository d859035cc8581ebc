//! Orders and their immutable line snapshots.
//!
//! An order is created once by checkout and afterwards only changes status,
//! payment status and cancellation metadata. Line items and monetary totals
//! are fixed at creation.

use core::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    OrderId, OrderStatus, PaymentMethod, PaymentStatus, ProductId, StockKey, UserId, line_total,
};

/// Human-facing order identifier, e.g. `ORD-LZ3K9QX1-4F7A2B`.
///
/// Generated once at checkout from the creation time (base-36 milliseconds)
/// and six random base-36 characters. Never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    const PREFIX: &'static str = "ORD";
    const SUFFIX_LEN: usize = 6;

    /// Generate a fresh order number.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        let mut rng = rand::rng();
        let suffix: String = (0..Self::SUFFIX_LEN)
            .map(|_| base36_digit(rng.random_range(0..36)))
            .collect();
        Self(format!("{}-{}-{suffix}", Self::PREFIX, to_base36(millis)))
    }

    /// Wrap a stored order number.
    #[must_use]
    pub const fn from_stored(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn base36_digit(value: u32) -> char {
    char::from_digit(value, 36).map_or('0', |c| c.to_ascii_uppercase())
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::new();
    while value > 0 {
        // value % 36 always fits in u32
        #[allow(clippy::cast_possible_truncation)]
        digits.push(base36_digit((value % 36) as u32));
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// Snapshot of a cart line at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub variant_id: String,
    pub color: String,
    pub size: String,
    pub quantity: u32,
    pub price: Decimal,
}

impl OrderItem {
    /// The stock counter this line was reserved from.
    #[must_use]
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.product_id, self.variant_id.clone(), self.size.clone())
    }
}

/// Delivery address captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub full_name: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

/// Payment details of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment: Payment,
    pub items_total: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Largest amount a `NUMERIC(12, 2)` money column holds (9,999,999,999.99).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Whether `value` can be stored in a money column without rounding.
#[must_use]
pub fn is_storable_amount(value: Decimal) -> bool {
    value >= Decimal::ZERO && value.normalize().scale() <= 2 && value <= MAX_AMOUNT
}

/// An order ready to be placed.
///
/// Built by checkout; [`NewOrder::new`] derives every monetary total from
/// the line snapshots so the stored figures always agree with the lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment: Payment,
    pub items_total: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Assemble a confirmed order from line snapshots.
    ///
    /// Returns `None` when a total would overflow or not fit a money column.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        shipping_cost: Decimal,
        tax: Decimal,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let items_total = items.iter().try_fold(Decimal::ZERO, |sum, item| {
            sum.checked_add(line_total(item.price, item.quantity))
        })?;
        let total_amount = items_total.checked_add(shipping_cost)?.checked_add(tax)?;
        if !is_storable_amount(items_total) || !is_storable_amount(total_amount) {
            return None;
        }
        let payment_status = payment_method.initial_status();
        Some(Self {
            order_number: OrderNumber::generate(now),
            user_id,
            items,
            shipping_address,
            payment: Payment {
                method: payment_method,
                status: payment_status,
                transaction_id: None,
                paid_at: (payment_status == PaymentStatus::Paid).then_some(now),
            },
            items_total,
            shipping_cost,
            tax,
            total_amount,
            status: OrderStatus::Confirmed,
            notes,
            created_at: now,
        })
    }

    /// Attach the id assigned by the store.
    #[must_use]
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            order_number: self.order_number,
            user_id: self.user_id,
            items: self.items,
            shipping_address: self.shipping_address,
            payment: self.payment,
            items_total: self.items_total,
            shipping_cost: self.shipping_cost,
            tax: self.tax,
            total_amount: self.total_amount,
            status: self.status,
            notes: self.notes,
            cancelled_at: None,
            cancellation_reason: None,
            delivered_at: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Cancellation metadata written together with the status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub cancelled_at: DateTime<Utc>,
    pub reason: String,
}

impl Order {
    /// Apply a cancellation in place.
    ///
    /// Callers must have checked [`OrderStatus::is_cancellable`] under the
    /// same lock or transaction.
    pub fn apply_cancellation(&mut self, cancellation: Cancellation) {
        self.status = OrderStatus::Cancelled;
        self.payment.status = self.payment.status.after_cancellation();
        self.cancelled_at = Some(cancellation.cancelled_at);
        self.cancellation_reason = Some(cancellation.reason);
        self.updated_at = cancellation.cancelled_at;
    }
}

/// Result of an atomic status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied; carries the updated order.
    Applied(Order),
    /// The status read under lock does not allow the transition.
    Rejected(OrderStatus),
}

impl Order {
    /// Move along a fulfillment edge (`confirmed -> processing -> shipped ->
    /// delivered`). Returns `false` and leaves the order untouched if the
    /// edge is not legal or is a cancellation.
    pub fn advance(&mut self, next: OrderStatus, at: DateTime<Utc>) -> bool {
        if next == OrderStatus::Cancelled || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == OrderStatus::Delivered {
            self.delivered_at = Some(at);
        }
        self.updated_at = at;
        true
    }
}

/// Paging and filtering for order history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFilter {
    pub page: u32,
    pub limit: u32,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    /// Rows to skip for this page.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.limit as u64
    }
}

/// One page of order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}
