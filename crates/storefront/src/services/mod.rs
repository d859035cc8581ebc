//! Business logic services for storefront.
//!
//! # Services
//!
//! - `inventory` - Stock ledger over per-size counters
//! - `cart` - Cart mutations with stock capping
//! - `checkout` - Cart to order transition
//! - `cancellation` - Order cancellation and stock release
//! - `orders` - Order history queries
//! - `auth` - Registration, login and OTP password reset
//! - `email` - Transactional email delivery
//!
//! Services borrow the store (and, where needed, the clock and mailer) for
//! the duration of one request, like the repositories they wrap.

pub mod auth;
pub mod cancellation;
pub mod cart;
pub mod checkout;
pub mod email;
pub mod inventory;
pub mod orders;

use chrono::{DateTime, Utc};

pub use auth::{AuthService, PasswordResetService};
pub use cancellation::CancellationService;
pub use cart::CartService;
pub use checkout::CheckoutService;
pub use email::Mailer;
pub use inventory::StockLedger;
pub use orders::OrderService;

/// Source of the current time.
///
/// Injected wherever a timestamp is written or an expiry is checked, so
/// tests can move time forward.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
