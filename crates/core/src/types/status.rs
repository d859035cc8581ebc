//! Status enums for orders and payments.
//!
//! The order lifecycle is a small state machine:
//!
//! ```text
//! pending -> confirmed -> processing -> shipped -> delivered
//!    \           \
//!     +-----------+--> cancelled
//! ```
//!
//! `delivered` and `cancelled` are terminal. Customers may only cancel while
//! the order is `pending` or `confirmed`; everything past that belongs to
//! fulfillment tooling, which must respect the same terminal states.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether a customer cancellation is allowed from this status.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Confirmed)
            | (Self::Confirmed, Self::Processing)
            | (Self::Processing, Self::Shipped)
            | (Self::Shipped, Self::Delivered) => true,
            (from, Self::Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Payment bookkeeping status.
///
/// Recorded only; no gateway is contacted when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Status after the owning order is cancelled.
    ///
    /// Captured payments become refunded; anything else is left as is.
    #[must_use]
    pub const fn after_cancellation(self) -> Self {
        match self {
            Self::Paid => Self::Refunded,
            other => other,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.payment_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Paypal,
    CashOnDelivery,
}

impl PaymentMethod {
    /// Payment status recorded when the order is placed.
    ///
    /// Cash on delivery is collected later; every other method has already
    /// been captured by the client before checkout.
    #[must_use]
    pub const fn initial_status(self) -> PaymentStatus {
        match self {
            Self::CashOnDelivery => PaymentStatus::Pending,
            Self::CreditCard | Self::DebitCard | Self::Paypal => PaymentStatus::Paid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_and_confirmed_are_cancellable() {
        let cancellable: Vec<_> = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(OrderStatus::Cancelled))
        .collect();

        assert_eq!(cancellable, vec![OrderStatus::Pending, OrderStatus::Confirmed]);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(OrderStatus::Pending));
            assert!(!terminal.can_transition_to(OrderStatus::Cancelled));
        }
    }

    #[test]
    fn test_forward_fulfillment_edges() {
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn test_payment_after_cancellation() {
        assert_eq!(PaymentStatus::Paid.after_cancellation(), PaymentStatus::Refunded);
        assert_eq!(PaymentStatus::Pending.after_cancellation(), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::Failed.after_cancellation(), PaymentStatus::Failed);
    }

    #[test]
    fn test_initial_payment_status() {
        assert_eq!(PaymentMethod::CashOnDelivery.initial_status(), PaymentStatus::Pending);
        assert_eq!(PaymentMethod::Paypal.initial_status(), PaymentStatus::Paid);
        assert_eq!(PaymentMethod::CreditCard.initial_status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(OrderStatus::Cancelled.to_string(), "cancelled");
        assert_eq!(PaymentStatus::Refunded.to_string(), "refunded");
        assert_eq!(
            serde_json::to_value(PaymentStatus::Paid).ok(),
            Some(serde_json::json!(PaymentStatus::Paid.as_str()))
        );
        assert_eq!("shipped".parse::<OrderStatus>(), Ok(OrderStatus::Shipped));
        assert!("lost".parse::<OrderStatus>().is_err());
    }
}
