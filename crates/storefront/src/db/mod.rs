//! Persistence for the storefront.
//!
//! The workflows in [`crate::services`] talk to storage through the traits
//! defined here. Two implementations exist:
//!
//! - [`PgStore`] - `PostgreSQL`, used in production
//! - [`MemoryStore`] - a single in-process lock, used by tests and demos
//!
//! Every multi-record write that must be all-or-nothing is a single trait
//! method ([`OrderStore::place_order`], [`OrderStore::cancel_order`],
//! [`UserStore::complete_password_reset`]) so each implementation can make it
//! atomic in its own way: one transaction, or one write-lock critical section.
//!
//! # Database: `stockroom`
//!
//! ## Tables (schema `storefront`)
//!
//! - `user` - Accounts, password hashes, password-reset state
//! - `product`, `product_variant`, `product_size` - Catalog and stock counters
//! - `cart`, `cart_item` - One cart per user
//! - `order`, `order_item` - Placed orders and their line snapshots
//!
//! Sessions live in `tower_sessions.session`.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p stockroom-cli -- migrate
//! ```

mod carts;
pub mod memory;
mod orders;
mod products;
mod users;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use stockroom_core::{Email, OrderId, OrderStatus, ProductId, StockKey, UserId};

use crate::models::{
    Cancellation, Cart, NewOrder, NewProduct, NewUser, Order, OrderFilter, OrderPage, Product,
    ResetState, TransitionOutcome, User,
};

pub use memory::MemoryStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A conditional stock decrement found too few units.
    #[error("insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: StockKey,
        requested: u32,
        available: u32,
    },

    /// A stock key does not resolve to a size entry.
    #[error("no stock entry for {0}")]
    MissingStock(StockKey),
}

/// Map a unique-constraint violation to `Conflict`.
pub(crate) fn conflict_on_unique(what: &str) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return RepositoryError::Conflict(format!("{what} already exists"));
        }
        RepositoryError::Database(e)
    }
}

/// Convert a stored integer count back into a `u32`.
pub(crate) fn stored_count(value: i32, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative {column}: {value}")))
}

/// Convert a `u32` count into the `INTEGER` column type.
pub(crate) fn db_count(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Conflict(format!("count {value} out of range")))
}

// =============================================================================
// Store traits
// =============================================================================

/// Catalog reads and the stock ledger's atomic counters.
pub trait ProductStore: Send + Sync {
    /// Fetch a product with its full variant and size tree.
    fn get_product(
        &self,
        id: ProductId,
    ) -> impl Future<Output = Result<Option<Product>, RepositoryError>> + Send;

    /// All products, ordered by id.
    fn list_products(&self) -> impl Future<Output = Result<Vec<Product>, RepositoryError>> + Send;

    /// Insert a product definition.
    fn insert_product(
        &self,
        product: NewProduct,
    ) -> impl Future<Output = Result<Product, RepositoryError>> + Send;

    /// Conditionally take `quantity` units from one size entry.
    ///
    /// Succeeds only if at least `quantity` units are on hand at the moment
    /// of the write; otherwise nothing changes. Returns the remaining stock.
    fn reserve_stock(
        &self,
        key: &StockKey,
        quantity: u32,
    ) -> impl Future<Output = Result<u32, RepositoryError>> + Send;

    /// Return `quantity` units to one size entry. Returns the new stock.
    fn release_stock(
        &self,
        key: &StockKey,
        quantity: u32,
    ) -> impl Future<Output = Result<u32, RepositoryError>> + Send;
}

/// Cart persistence. One cart per user.
pub trait CartStore: Send + Sync {
    fn get_cart(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<Cart>, RepositoryError>> + Send;

    /// Fetch the user's cart, creating an empty one if none exists.
    fn get_or_create_cart(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Cart, RepositoryError>> + Send;

    /// Persist the cart's lines and totals, replacing what was stored.
    fn save_cart(&self, cart: &Cart) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Order persistence, including the two stock-touching transitions.
pub trait OrderStore: Send + Sync {
    /// Place an order in one atomic step.
    ///
    /// Inserts the order, conditionally reserves every line, and clears the
    /// user's cart. If any reservation fails the whole step is undone and
    /// [`RepositoryError::InsufficientStock`] or
    /// [`RepositoryError::MissingStock`] is returned.
    fn place_order(
        &self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;

    fn get_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    fn get_order_by_number(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// A page of the user's orders, newest first.
    fn list_orders(
        &self,
        user_id: UserId,
        filter: OrderFilter,
    ) -> impl Future<Output = Result<OrderPage, RepositoryError>> + Send;

    /// Cancel an order in one atomic step.
    ///
    /// Re-reads the status under lock; if it still allows cancellation,
    /// releases every line's stock and records the cancellation. Lines
    /// whose size entry no longer exists are skipped. Returns
    /// [`RepositoryError::NotFound`] if the user has no such order.
    fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
        cancellation: Cancellation,
    ) -> impl Future<Output = Result<TransitionOutcome, RepositoryError>> + Send;

    /// Move an order along a fulfillment edge, checked under lock.
    ///
    /// Used by operations tooling. Never cancels; cancellation must go
    /// through [`OrderStore::cancel_order`] so stock is released.
    fn advance_order(
        &self,
        order_number: &str,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<TransitionOutcome, RepositoryError>> + Send;
}

/// Accounts and password-reset state.
pub trait UserStore: Send + Sync {
    /// Create an account. Returns `Conflict` if the email is taken.
    fn create_user(
        &self,
        user: NewUser,
        password_hash: &str,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;

    fn get_user(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    fn get_user_by_email(
        &self,
        email: &Email,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// The user and their password hash, for login.
    fn get_password_hash(
        &self,
        email: &Email,
    ) -> impl Future<Output = Result<Option<(User, String)>, RepositoryError>> + Send;

    /// Overwrite all password-reset fields at once.
    fn save_reset_state(
        &self,
        user_id: UserId,
        state: &ResetState,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Set a new password hash and clear the reset fields in one write.
    fn complete_password_reset(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;
}

/// Everything the HTTP layer needs from storage.
pub trait Store:
    ProductStore + CartStore + OrderStore + UserStore + Clone + Send + Sync + 'static
{
    /// Readiness probe.
    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// `PostgreSQL`-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
