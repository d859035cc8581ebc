//! Checkout: turn a cart into an order.
//!
//! Every line is re-validated against the live catalog and priced from the
//! live size entry. The store then places the order atomically: the order
//! row, a conditional decrement for every line, and clearing the cart
//! either all happen or none do. A checkout that loses a stock race to a
//! concurrent one fails with `InsufficientStock` and leaves the cart intact.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{PaymentMethod, ProductId, UserId};

use super::Clock;
use super::inventory::{InventoryError, StockLedger, ensure_available, locate};
use crate::db::{CartStore, OrderStore, ProductStore, RepositoryError};
use crate::models::order::MAX_AMOUNT;
use crate::models::{NewOrder, Order, OrderItem, Product, ShippingAddress};

/// Maximum length of name, city and country fields.
const MAX_SHORT_FIELD: usize = 100;
/// Maximum length of the street address.
const MAX_ADDRESS: usize = 200;
/// Maximum length of postal code and phone.
const MAX_CODE_FIELD: usize = 20;
/// Maximum length of free-text notes.
pub const MAX_NOTES: usize = 500;

/// Errors from checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty. Add items before placing an order")]
    EmptyCart,

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for CheckoutError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InsufficientStock { .. } | RepositoryError::MissingStock(_) => {
                Self::Inventory(err.into())
            }
            other => Self::Repository(other),
        }
    }
}

/// Payment choice submitted with an order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub method: PaymentMethod,
}

/// Everything a shopper submits to place an order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub shipping_address: ShippingAddress,
    pub payment: PaymentRequest,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub tax: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn require(value: &str, field: &str, max: usize) -> Result<(), CheckoutError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CheckoutError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(CheckoutError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

fn non_negative(value: Option<Decimal>, field: &str) -> Result<Decimal, CheckoutError> {
    let value = value.unwrap_or(Decimal::ZERO);
    if value.is_sign_negative() && !value.is_zero() {
        return Err(CheckoutError::Validation(format!(
            "{field} must be a non-negative number"
        )));
    }
    if value.normalize().scale() > 2 {
        return Err(CheckoutError::Validation(format!(
            "{field} must have at most 2 decimal places"
        )));
    }
    if value > MAX_AMOUNT {
        return Err(CheckoutError::Validation(format!(
            "{field} must be at most {MAX_AMOUNT}"
        )));
    }
    Ok(value.round_dp(2))
}

impl CheckoutRequest {
    /// Field validation, run before anything is read from storage.
    ///
    /// Returns the normalized `(shipping_cost, tax, notes)`.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` naming the first bad field.
    pub fn validate(&self) -> Result<(Decimal, Decimal, Option<String>), CheckoutError> {
        let a = &self.shipping_address;
        require(&a.full_name, "Full name", MAX_SHORT_FIELD)?;
        require(&a.address, "Address", MAX_ADDRESS)?;
        require(&a.city, "City", MAX_SHORT_FIELD)?;
        require(&a.postal_code, "Postal code", MAX_CODE_FIELD)?;
        require(&a.country, "Country", MAX_SHORT_FIELD)?;
        require(&a.phone, "Phone", MAX_CODE_FIELD)?;

        let shipping_cost = non_negative(self.shipping_cost, "Shipping cost")?;
        let tax = non_negative(self.tax, "Tax")?;

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned);
        if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES) {
            return Err(CheckoutError::Validation(format!(
                "Notes must be at most {MAX_NOTES} characters"
            )));
        }

        Ok((shipping_cost, tax, notes))
    }
}

fn trimmed(address: &ShippingAddress) -> ShippingAddress {
    ShippingAddress {
        full_name: address.full_name.trim().to_owned(),
        address: address.address.trim().to_owned(),
        city: address.city.trim().to_owned(),
        postal_code: address.postal_code.trim().to_owned(),
        country: address.country.trim().to_owned(),
        phone: address.phone.trim().to_owned(),
    }
}

/// Checkout service.
pub struct CheckoutService<'a, S> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S: CartStore + ProductStore + OrderStore> CheckoutService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Place an order from the user's cart.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed input
    /// - `EmptyCart` if the user has no cart or it has no lines
    /// - `Inventory` if a line's product, variant or size is gone, or stock
    ///   is short (including losing a race at commit time)
    /// - `Repository` for storage failures
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn checkout(
        &self,
        user_id: UserId,
        request: CheckoutRequest,
    ) -> Result<Order, CheckoutError> {
        let (shipping_cost, tax, notes) = request.validate()?;

        let cart = self
            .store
            .get_cart(user_id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(CheckoutError::EmptyCart)?;

        let ledger = StockLedger::new(self.store);
        let mut products: HashMap<ProductId, Product> = HashMap::new();
        let mut items = Vec::with_capacity(cart.items().len());

        for line in cart.items() {
            let key = line.stock_key();
            if !products.contains_key(&key.product_id) {
                let product = ledger.product(key.product_id).await?;
                products.insert(key.product_id, product);
            }
            let product = products
                .get(&key.product_id)
                .ok_or(InventoryError::ProductNotFound(key.product_id))?;

            let (variant, entry) = locate(product, &key)?;
            ensure_available(product, &key, entry, line.quantity)?;

            items.push(OrderItem {
                product_id: key.product_id,
                variant_id: key.variant_id,
                color: variant.color.clone(),
                size: key.size,
                quantity: line.quantity,
                price: entry.price,
            });
        }

        let new_order = NewOrder::new(
            user_id,
            items,
            trimmed(&request.shipping_address),
            request.payment.method,
            shipping_cost,
            tax,
            notes,
            self.clock.now(),
        )
        .ok_or_else(|| {
            CheckoutError::Validation(format!("Order total must be at most {MAX_AMOUNT}"))
        })?;

        let order = self.store.place_order(new_order).await.map_err(|e| {
            if let RepositoryError::InsufficientStock { ref key, .. } = e {
                tracing::warn!(key = %key, "Stock changed between validation and commit");
            }
            let err = CheckoutError::from(e);
            // Name the product the shopper saw rather than its id.
            match err {
                CheckoutError::Inventory(InventoryError::InsufficientStock {
                    key,
                    size,
                    requested,
                    available,
                    name,
                }) => CheckoutError::Inventory(InventoryError::InsufficientStock {
                    name: products
                        .get(&key.product_id)
                        .map_or(name, |p| p.name.clone()),
                    key,
                    size,
                    requested,
                    available,
                }),
                other => other,
            }
        })?;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            lines = order.items.len(),
            "Order placed"
        );
        Ok(order)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use stockroom_core::{OrderStatus, PaymentStatus, StockKey};

    use super::*;
    use crate::db::{MemoryStore, ProductStore};
    use crate::services::SystemClock;
    use crate::services::cart::CartService;
    use crate::services::testing::{seed_tee, seed_user, stock_of};

    fn request(method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            shipping_address: ShippingAddress {
                full_name: "Ada Lovelace".to_owned(),
                address: "12 Analytical Row".to_owned(),
                city: "London".to_owned(),
                postal_code: "N1 9GU".to_owned(),
                country: "UK".to_owned(),
                phone: "+44 20 7946 0000".to_owned(),
            },
            payment: PaymentRequest { method },
            shipping_cost: None,
            tax: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_checkout_reserves_stock_and_clears_cart() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let key = StockKey::new(tee.id, "black", "M");
        CartService::new(&store).add_item(user, &key, 3).await.unwrap();

        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_cost = Some(Decimal::new(500, 2));
        req.tax = Some(Decimal::new(120, 2));
        let order = CheckoutService::new(&store, &SystemClock)
            .checkout(user, req)
            .await
            .unwrap();

        assert_eq!(stock_of(&store, &tee, "M").await, 2);
        assert_eq!(order.items_total, Decimal::new(6000, 2));
        assert_eq!(order.total_amount, Decimal::new(6620, 2));
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment.status, PaymentStatus::Paid);
        assert_eq!(order.items[0].color, "Black");
        assert!(store.get_cart(user).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_uses_live_price() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let key = StockKey::new(tee.id, "black", "M");
        CartService::new(&store).add_item(user, &key, 1).await.unwrap();

        // Cart captured $20.00; a cart saved with a stale price must not
        // leak into the order.
        let mut cart = store.get_cart(user).await.unwrap().unwrap();
        cart.set_quantity(&key, 1, Some(Decimal::new(100, 2)));
        store.save_cart(&cart).await.unwrap();

        let order = CheckoutService::new(&store, &SystemClock)
            .checkout(user, request(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();
        assert_eq!(order.items[0].price, Decimal::new(2000, 2));
        assert_eq!(order.payment.status, PaymentStatus::Pending);
        assert!(order.payment.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_everything_unchanged() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 10, 5).await;
        let key = StockKey::new(tee.id, "black", "M");
        CartService::new(&store).add_item(user, &key, 10).await.unwrap();
        // Someone else buys half the stock after the cart was filled.
        store.reserve_stock(&key, 5).await.unwrap();
        let cart_before = store.get_cart(user).await.unwrap().unwrap();

        let err = CheckoutService::new(&store, &SystemClock)
            .checkout(user, request(PaymentMethod::CreditCard))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::Inventory(InventoryError::InsufficientStock {
                requested: 10,
                available: 5,
                ..
            })
        ));
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Classic Tee (M). Only 5 available"
        );
        assert_eq!(stock_of(&store, &tee, "M").await, 5);
        assert_eq!(store.get_cart(user).await.unwrap().unwrap(), cart_before);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let checkout = CheckoutService::new(&store, &SystemClock);

        assert!(matches!(
            checkout
                .checkout(user, request(PaymentMethod::CreditCard))
                .await,
            Err(CheckoutError::EmptyCart)
        ));

        CartService::new(&store).get(user).await.unwrap();
        assert!(matches!(
            checkout
                .checkout(user, request(PaymentMethod::CreditCard))
                .await,
            Err(CheckoutError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_oversized_charges_are_rejected() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let key = StockKey::new(tee.id, "black", "M");
        CartService::new(&store).add_item(user, &key, 1).await.unwrap();
        let checkout = CheckoutService::new(&store, &SystemClock);

        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_cost = Some(Decimal::MAX);
        req.tax = Some(Decimal::MAX);
        assert!(matches!(
            checkout.checkout(user, req).await,
            Err(CheckoutError::Validation(_))
        ));

        // Each charge fits a column on its own, the sum does not.
        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_cost = Some(MAX_AMOUNT);
        req.tax = Some(MAX_AMOUNT);
        assert!(matches!(
            checkout.checkout(user, req).await,
            Err(CheckoutError::Validation(m)) if m.starts_with("Order total must be at most")
        ));

        assert_eq!(stock_of(&store, &tee, "M").await, 5);
        assert!(!store.get_cart(user).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_product_fails_and_keeps_cart() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "buyer@example.com").await;
        let tee = seed_tee(&store, 5, 5).await;
        let mut cart = CartService::new(&store).get(user).await.unwrap();
        cart.add(
            &StockKey::new(ProductId::new(424_242), "black", "M"),
            1,
            Decimal::ONE,
        );
        cart.add(&StockKey::new(tee.id, "black", "M"), 1, Decimal::ONE);
        store.save_cart(&cart).await.unwrap();

        let err = CheckoutService::new(&store, &SystemClock)
            .checkout(user, request(PaymentMethod::CreditCard))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Inventory(InventoryError::ProductNotFound(_))
        ));
        assert_eq!(store.get_cart(user).await.unwrap().unwrap().items().len(), 2);
        assert_eq!(stock_of(&store, &tee, "M").await, 5);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_never_oversell() {
        let store = MemoryStore::new();
        let tee = seed_tee(&store, 1, 0).await;
        let key = StockKey::new(tee.id, "black", "M");

        let mut users = Vec::new();
        for i in 0..4 {
            let user = seed_user(&store, &format!("racer{i}@example.com")).await;
            CartService::new(&store).add_item(user, &key, 1).await.unwrap();
            users.push(user);
        }

        let mut tasks = Vec::new();
        for user in users {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                CheckoutService::new(&store, &SystemClock)
                    .checkout(user, request(PaymentMethod::CreditCard))
                    .await
                    .is_ok()
            }));
        }
        let mut placed = 0;
        for task in tasks {
            if task.await.unwrap() {
                placed += 1;
            }
        }

        assert_eq!(placed, 1);
        assert_eq!(stock_of(&store, &tee, "M").await, 0);
    }

    #[test]
    fn test_validation_rules() {
        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_address.city = "   ".to_owned();
        assert!(matches!(req.validate(), Err(CheckoutError::Validation(m)) if m == "City is required"));

        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_address.phone = "1".repeat(21);
        assert!(req.validate().is_err());

        let mut req = request(PaymentMethod::CreditCard);
        req.tax = Some(Decimal::new(-1, 2));
        assert!(req.validate().is_err());

        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_cost = Some(Decimal::new(4999, 3));
        assert!(matches!(
            req.validate(),
            Err(CheckoutError::Validation(m)) if m == "Shipping cost must have at most 2 decimal places"
        ));

        let mut req = request(PaymentMethod::CreditCard);
        req.tax = Some(Decimal::MAX);
        assert!(matches!(req.validate(), Err(CheckoutError::Validation(_))));

        let mut req = request(PaymentMethod::CreditCard);
        req.shipping_cost = Some(Decimal::new(5000, 3));
        let (shipping_cost, _, _) = req.validate().unwrap();
        assert_eq!(shipping_cost, Decimal::new(5, 0));

        let mut req = request(PaymentMethod::CreditCard);
        req.notes = Some("x".repeat(MAX_NOTES + 1));
        assert!(req.validate().is_err());

        let mut req = request(PaymentMethod::CreditCard);
        req.notes = Some("  leave at door ".to_owned());
        let (_, _, notes) = req.validate().unwrap();
        assert_eq!(notes.as_deref(), Some("leave at door"));
    }

    #[test]
    fn test_request_deserializes_from_camel_case() {
        let req: CheckoutRequest = serde_json::from_value(serde_json::json!({
            "shippingAddress": {
                "fullName": "Ada", "address": "1 Row", "city": "London",
                "postalCode": "N1", "country": "UK", "phone": "123"
            },
            "payment": { "method": "cash_on_delivery" },
            "shippingCost": "4.99"
        }))
        .unwrap();
        assert_eq!(req.payment.method, PaymentMethod::CashOnDelivery);
        assert_eq!(req.shipping_cost, Some(Decimal::new(499, 2)));
    }
}
