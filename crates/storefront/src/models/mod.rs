//! Domain models for the storefront.
//!
//! Plain data plus the small invariant-keeping methods that belong to each
//! aggregate. Persistence lives in [`crate::db`], workflows in
//! [`crate::services`].

pub mod cart;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use cart::{Cart, CartItem, CartTotals};
pub use order::{
    Cancellation, NewOrder, Order, OrderFilter, OrderItem, OrderNumber, OrderPage, Payment,
    ShippingAddress, TransitionOutcome,
};
pub use product::{NewProduct, NewSize, NewVariant, Product, SizeStock, StockShortfall, Variant};
pub use session::{CurrentUser, keys as session_keys};
pub use user::{NewUser, ResetState, User};
