//! Cart workflows.
//!
//! Cart lines record intent only; nothing here touches stock. Adds and
//! quantity changes are still checked against live stock so a shopper can't
//! build a cart that could never be checked out.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{CartId, CurrencyCode, ProductId, StockKey, UserId, line_total};

use super::inventory::{InventoryError, StockLedger, ensure_available, locate};
use crate::db::{CartStore, ProductStore, RepositoryError};
use crate::models::Cart;

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Cannot add more. Only {available} available ({in_cart} already in cart)")]
    ExceedsStock { available: u32, in_cart: u32 },

    #[error("Item not found in cart")]
    ItemNotInCart,

    #[error("Cart not found")]
    CartNotFound,

    #[error("{0}")]
    InvalidQuantity(String),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Product fields joined into cart responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub name: String,
    pub slug: String,
    pub currency: CurrencyCode,
}

/// A cart line as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub product_id: ProductId,
    pub variant_id: String,
    pub size: String,
    pub quantity: u32,
    pub price: Decimal,
    pub line_total: Decimal,
    /// `None` when the product has since been removed from the catalog.
    pub product: Option<ProductSummary>,
}

/// A cart as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: CartId,
    pub items: Vec<CartLineView>,
    pub total_items: u32,
    pub total_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Cart service.
pub struct CartService<'a, S> {
    store: &'a S,
}

impl<'a, S: CartStore + ProductStore> CartService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// The user's cart, created empty on first access.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if storage fails.
    pub async fn get(&self, user_id: UserId) -> Result<Cart, CartError> {
        Ok(self.store.get_or_create_cart(user_id).await?)
    }

    /// Add `quantity` units of a size to the cart.
    ///
    /// Merges with an existing line for the same key. The merged total may
    /// not exceed live stock. The line's price is refreshed from the catalog.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` for zero, `Inventory` if the product,
    /// variant or size is gone or stock is short, and `ExceedsStock` if the
    /// merged quantity would pass live stock.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        key: &StockKey,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(
                "Quantity must be at least 1".to_owned(),
            ));
        }

        let product = StockLedger::new(self.store).product(key.product_id).await?;
        let (_, entry) = locate(&product, key)?;
        ensure_available(&product, key, entry, quantity)?;

        let mut cart = self.store.get_or_create_cart(user_id).await?;
        let in_cart = cart.line(key).map_or(0, |line| line.quantity);
        if in_cart > 0 && !entry.covers(in_cart.saturating_add(quantity)) {
            return Err(CartError::ExceedsStock {
                available: entry.stock,
                in_cart,
            });
        }

        cart.add(key, quantity, entry.price);
        self.store.save_cart(&cart).await?;
        tracing::debug!(total_items = cart.totals().total_items, "Cart item added");
        Ok(cart)
    }

    /// Set the quantity of an existing line. Zero or less removes it.
    ///
    /// Live stock is checked (and the price refreshed) only while the size
    /// still exists in the catalog.
    ///
    /// # Errors
    ///
    /// Returns `CartNotFound`, `ItemNotInCart`, or `Inventory` if stock is
    /// short.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn update_item(
        &self,
        user_id: UserId,
        key: &StockKey,
        quantity: i64,
    ) -> Result<Cart, CartError> {
        let mut cart = self
            .store
            .get_cart(user_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        if cart.line(key).is_none() {
            return Err(CartError::ItemNotInCart);
        }

        if quantity <= 0 {
            cart.remove(key);
        } else {
            let quantity = u32::try_from(quantity)
                .map_err(|_| CartError::InvalidQuantity("Quantity is too large".to_owned()))?;
            let mut price = None;
            if let Some(product) = self.store.get_product(key.product_id).await?
                && let Ok((_, entry)) = locate(&product, key)
            {
                ensure_available(&product, key, entry, quantity)?;
                price = Some(entry.price);
            }
            cart.set_quantity(key, quantity, price);
        }

        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    /// Remove one line.
    ///
    /// # Errors
    ///
    /// Returns `CartNotFound` or `ItemNotInCart`.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove_item(&self, user_id: UserId, key: &StockKey) -> Result<Cart, CartError> {
        let mut cart = self
            .store
            .get_cart(user_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        if !cart.remove(key) {
            return Err(CartError::ItemNotInCart);
        }
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    /// Drop every line, keeping the cart itself.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if storage fails.
    pub async fn clear(&self, user_id: UserId) -> Result<Cart, CartError> {
        let mut cart = self.store.get_or_create_cart(user_id).await?;
        cart.clear();
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    /// Join product summaries into a cart for display.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if a product lookup fails.
    pub async fn view(&self, cart: &Cart) -> Result<CartView, CartError> {
        let mut summaries: BTreeMap<ProductId, Option<ProductSummary>> = BTreeMap::new();
        for item in cart.items() {
            if !summaries.contains_key(&item.product_id) {
                let summary = self
                    .store
                    .get_product(item.product_id)
                    .await?
                    .map(|p| ProductSummary {
                        name: p.name,
                        slug: p.slug,
                        currency: p.currency,
                    });
                summaries.insert(item.product_id, summary);
            }
        }

        let totals = cart.totals();
        Ok(CartView {
            id: cart.id,
            items: cart
                .items()
                .iter()
                .map(|item| CartLineView {
                    product_id: item.product_id,
                    variant_id: item.variant_id.clone(),
                    size: item.size.clone(),
                    quantity: item.quantity,
                    price: item.price,
                    line_total: line_total(item.price, item.quantity),
                    product: summaries.get(&item.product_id).cloned().flatten(),
                })
                .collect(),
            total_items: totals.total_items,
            total_price: totals.total_price,
            updated_at: cart.updated_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::testing::{seed_tee, seed_user, stock_of};

    #[tokio::test]
    async fn test_get_creates_empty_cart() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cart@example.com").await;
        let cart = CartService::new(&store).get(user).await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.totals().total_items, 0);
    }

    #[tokio::test]
    async fn test_add_merges_and_caps_at_stock() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cart@example.com").await;
        let tee = seed_tee(&store, 3, 3).await;
        let carts = CartService::new(&store);
        let key = StockKey::new(tee.id, "black", "M");

        carts.add_item(user, &key, 2).await.unwrap();
        let err = carts.add_item(user, &key, 2).await.unwrap_err();
        assert!(matches!(
            err,
            CartError::ExceedsStock {
                available: 3,
                in_cart: 2
            }
        ));
        assert_eq!(
            err.to_string(),
            "Cannot add more. Only 3 available (2 already in cart)"
        );

        let cart = carts.add_item(user, &key, 1).await.unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.totals().total_items, 3);
        assert_eq!(cart.totals().total_price, Decimal::new(6000, 2));
        // Carts never touch stock.
        assert_eq!(stock_of(&store, &tee, "M").await, 3);
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_size_and_zero() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cart@example.com").await;
        let tee = seed_tee(&store, 3, 3).await;
        let carts = CartService::new(&store);

        assert!(matches!(
            carts
                .add_item(user, &StockKey::new(tee.id, "black", "XS"), 1)
                .await,
            Err(CartError::Inventory(InventoryError::SizeNotFound { .. }))
        ));
        assert!(matches!(
            carts
                .add_item(user, &StockKey::new(tee.id, "black", "M"), 0)
                .await,
            Err(CartError::InvalidQuantity(_))
        ));
        assert!(matches!(
            carts
                .add_item(user, &StockKey::new(tee.id, "black", "M"), 4)
                .await,
            Err(CartError::Inventory(InventoryError::InsufficientStock { .. }))
        ));
    }

    #[tokio::test]
    async fn test_update_to_zero_removes_line() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cart@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let carts = CartService::new(&store);
        let m = StockKey::new(tee.id, "black", "M");
        let l = StockKey::new(tee.id, "black", "L");

        carts.add_item(user, &m, 1).await.unwrap();
        carts.add_item(user, &l, 1).await.unwrap();

        let cart = carts.update_item(user, &m, 4).await.unwrap();
        assert_eq!(cart.totals().total_items, 5);
        assert!(matches!(
            carts.update_item(user, &m, 6).await,
            Err(CartError::Inventory(InventoryError::InsufficientStock { .. }))
        ));

        let cart = carts.update_item(user, &m, 0).await.unwrap();
        assert!(cart.line(&m).is_none());
        assert_eq!(cart.totals().total_items, 1);

        assert!(matches!(
            carts.update_item(user, &m, 1).await,
            Err(CartError::ItemNotInCart)
        ));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cart@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let carts = CartService::new(&store);
        let m = StockKey::new(tee.id, "black", "M");

        assert!(matches!(
            carts.remove_item(user, &m).await,
            Err(CartError::CartNotFound)
        ));
        carts.add_item(user, &m, 2).await.unwrap();
        assert!(carts.remove_item(user, &m).await.unwrap().is_empty());
        assert!(matches!(
            carts.remove_item(user, &m).await,
            Err(CartError::ItemNotInCart)
        ));

        carts.add_item(user, &m, 2).await.unwrap();
        let cart = carts.clear(user).await.unwrap();
        assert!(cart.is_empty());
        assert!(store.get_cart(user).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_view_joins_product_summary() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cart@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let carts = CartService::new(&store);

        let cart = carts
            .add_item(user, &StockKey::new(tee.id, "black", "L"), 2)
            .await
            .unwrap();
        let view = carts.view(&cart).await.unwrap();

        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].line_total, Decimal::new(4000, 2));
        assert_eq!(
            view.items[0].product.as_ref().map(|p| p.name.as_str()),
            Some("Classic Tee")
        );
    }
}
