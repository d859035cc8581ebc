//! In-process store.
//!
//! All state sits behind one `tokio::sync::RwLock`. Each multi-record
//! operation takes the write lock once and validates everything before
//! mutating anything, which gives the same all-or-nothing behaviour as a
//! database transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use stockroom_core::{CartId, Email, OrderId, OrderStatus, ProductId, StockKey, UserId};

use super::{CartStore, OrderStore, ProductStore, RepositoryError, Store, UserStore};
use crate::models::{
    Cancellation, Cart, NewOrder, NewProduct, NewUser, Order, OrderFilter, OrderPage, Product,
    ResetState, TransitionOutcome, User,
};

/// A store that keeps everything in memory.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: BTreeMap<ProductId, Product>,
    carts: HashMap<UserId, Cart>,
    orders: BTreeMap<OrderId, Order>,
    users: BTreeMap<UserId, StoredUser>,
    next_id: i32,
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

impl MemoryState {
    const fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn size_entry_mut<'a>(
        products: &'a mut BTreeMap<ProductId, Product>,
        key: &StockKey,
    ) -> Result<&'a mut crate::models::SizeStock, RepositoryError> {
        products
            .get_mut(&key.product_id)
            .and_then(|p| p.size_entry_mut(key))
            .ok_or_else(|| RepositoryError::MissingStock(key.clone()))
    }

    fn user_by_email(&self, email: &Email) -> Option<&StoredUser> {
        self.users.values().find(|u| u.user.email == *email)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProductStore for MemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        Ok(self.state.read().await.products.values().cloned().collect())
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.slug == product.slug) {
            return Err(RepositoryError::Conflict("product slug already exists".to_owned()));
        }
        let id = ProductId::new(state.next_id());
        let product = product.into_product(id, Utc::now());
        state.products.insert(id, product.clone());
        Ok(product)
    }

    async fn reserve_stock(&self, key: &StockKey, quantity: u32) -> Result<u32, RepositoryError> {
        let mut state = self.state.write().await;
        let entry = MemoryState::size_entry_mut(&mut state.products, key)?;
        entry
            .reserve(quantity)
            .map_err(|shortfall| RepositoryError::InsufficientStock {
                key: key.clone(),
                requested: shortfall.requested,
                available: shortfall.available,
            })?;
        Ok(entry.stock)
    }

    async fn release_stock(&self, key: &StockKey, quantity: u32) -> Result<u32, RepositoryError> {
        let mut state = self.state.write().await;
        let entry = MemoryState::size_entry_mut(&mut state.products, key)?;
        entry.release(quantity);
        Ok(entry.stock)
    }
}

impl CartStore for MemoryStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.state.read().await.carts.get(&user_id).cloned())
    }

    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(cart) = state.carts.get(&user_id) {
            return Ok(cart.clone());
        }
        let cart = Cart::empty(CartId::new(state.next_id()), user_id, Utc::now());
        state.carts.insert(user_id, cart.clone());
        Ok(cart)
    }

    async fn save_cart(&self, cart: &Cart) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .carts
            .insert(cart.user_id, cart.clone());
        Ok(())
    }
}

impl OrderStore for MemoryStore {
    async fn place_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut state = self.state.write().await;

        // Reserve against a scratch copy so a failure part-way through
        // leaves the real catalog untouched.
        let mut products = state.products.clone();
        for item in &order.items {
            let key = item.stock_key();
            MemoryState::size_entry_mut(&mut products, &key)?
                .reserve(item.quantity)
                .map_err(|shortfall| RepositoryError::InsufficientStock {
                    key,
                    requested: shortfall.requested,
                    available: shortfall.available,
                })?;
        }

        let id = OrderId::new(state.next_id());
        let user_id = order.user_id;
        let order = order.into_order(id);
        state.products = products;
        state.orders.insert(id, order.clone());
        if let Some(cart) = state.carts.get_mut(&user_id) {
            cart.clear();
        }
        Ok(order)
    }

    async fn get_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned())
    }

    async fn get_order_by_number(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.user_id == user_id && o.order_number.as_str() == order_number)
            .cloned())
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        filter: OrderFilter,
    ) -> Result<OrderPage, RepositoryError> {
        let state = self.state.read().await;
        let mut matching: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let orders = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit as usize)
            .cloned()
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page: filter.page,
            limit: filter.limit,
        })
    }

    async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
        cancellation: Cancellation,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let order = state
            .orders
            .get_mut(&order_id)
            .filter(|o| o.user_id == user_id)
            .ok_or(RepositoryError::NotFound)?;
        if !order.status.is_cancellable() {
            return Ok(TransitionOutcome::Rejected(order.status));
        }

        for item in &order.items {
            let key = item.stock_key();
            match MemoryState::size_entry_mut(&mut state.products, &key) {
                Ok(entry) => entry.release(item.quantity),
                // Catalog entry was removed after purchase; nothing to return.
                Err(_) => {
                    tracing::warn!(%key, quantity = item.quantity, "Released stock for missing entry");
                }
            }
        }

        order.apply_cancellation(cancellation);
        Ok(TransitionOutcome::Applied(order.clone()))
    }

    async fn advance_order(
        &self,
        order_number: &str,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .values_mut()
            .find(|o| o.order_number.as_str() == order_number)
            .ok_or(RepositoryError::NotFound)?;
        if order.advance(next, at) {
            Ok(TransitionOutcome::Applied(order.clone()))
        } else {
            Ok(TransitionOutcome::Rejected(order.status))
        }
    }
}

impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser, password_hash: &str) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        if state.user_by_email(&user.email).is_some() {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }
        let now = Utc::now();
        let user = User {
            id: UserId::new(state.next_id()),
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password_reset: ResetState::Idle,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                password_hash: password_hash.to_owned(),
            },
        );
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .get(&id)
            .map(|u| u.user.clone()))
    }

    async fn get_user_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .user_by_email(email)
            .map(|u| u.user.clone()))
    }

    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .user_by_email(email)
            .map(|u| (u.user.clone(), u.password_hash.clone())))
    }

    async fn save_reset_state(
        &self,
        user_id: UserId,
        reset: &ResetState,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&user_id).ok_or(RepositoryError::NotFound)?;
        stored.user.password_reset = reset.clone();
        stored.user.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&user_id).ok_or(RepositoryError::NotFound)?;
        password_hash.clone_into(&mut stored.password_hash);
        stored.user.password_reset = ResetState::Idle;
        stored.user.updated_at = Utc::now();
        Ok(stored.user.clone())
    }
}

impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use stockroom_core::{PaymentMethod, ProductId};

    use super::*;
    use crate::models::{NewSize, NewVariant, OrderItem, ShippingAddress};

    fn tee(stock: u32) -> NewProduct {
        NewProduct {
            name: "Tee".to_owned(),
            slug: "tee".to_owned(),
            currency: stockroom_core::CurrencyCode::USD,
            variants: vec![NewVariant {
                variant_id: "black".to_owned(),
                color: "Black".to_owned(),
                sizes: vec![
                    NewSize {
                        size: "M".to_owned(),
                        sku: "TEE-BLK-M".to_owned(),
                        stock,
                        price: Decimal::new(2000, 2),
                    },
                    NewSize {
                        size: "L".to_owned(),
                        sku: "TEE-BLK-L".to_owned(),
                        stock,
                        price: Decimal::new(2000, 2),
                    },
                ],
            }],
        }
    }

    fn order_for(user_id: UserId, product: ProductId, lines: &[(&str, u32)]) -> NewOrder {
        let items = lines
            .iter()
            .map(|(size, quantity)| OrderItem {
                product_id: product,
                variant_id: "black".to_owned(),
                color: "Black".to_owned(),
                size: (*size).to_owned(),
                quantity: *quantity,
                price: Decimal::new(2000, 2),
            })
            .collect();
        NewOrder::new(
            user_id,
            items,
            ShippingAddress {
                full_name: "Grace Hopper".to_owned(),
                address: "1 Harbor Way".to_owned(),
                city: "Arlington".to_owned(),
                postal_code: "22201".to_owned(),
                country: "US".to_owned(),
                phone: "555-0100".to_owned(),
            },
            PaymentMethod::CreditCard,
            Decimal::ZERO,
            Decimal::ZERO,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    async fn stock_of(store: &MemoryStore, product: ProductId, size: &str) -> u32 {
        store
            .get_product(product)
            .await
            .unwrap()
            .unwrap()
            .variant("black")
            .unwrap()
            .size(size)
            .unwrap()
            .stock
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let store = MemoryStore::new();
        let product = store.insert_product(tee(3)).await.unwrap();
        let key = StockKey::new(product.id, "black", "M");

        assert_eq!(store.reserve_stock(&key, 2).await.unwrap(), 1);
        assert!(matches!(
            store.reserve_stock(&key, 2).await,
            Err(RepositoryError::InsufficientStock { available: 1, .. })
        ));
        assert_eq!(store.release_stock(&key, 2).await.unwrap(), 3);

        let missing = StockKey::new(product.id, "black", "XXL");
        assert!(matches!(
            store.reserve_stock(&missing, 1).await,
            Err(RepositoryError::MissingStock(_))
        ));
    }

    #[tokio::test]
    async fn test_place_order_is_all_or_nothing() {
        let store = MemoryStore::new();
        let product = store.insert_product(tee(2)).await.unwrap();
        let user = UserId::new(100);

        // Second line cannot be covered, so the first must not stick either.
        let err = store
            .place_order(order_for(user, product.id, &[("M", 1), ("L", 3)]))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InsufficientStock { .. }));
        assert_eq!(stock_of(&store, product.id, "M").await, 2);
        assert_eq!(stock_of(&store, product.id, "L").await, 2);
        assert!(
            store
                .list_orders(
                    user,
                    OrderFilter {
                        page: 1,
                        limit: 10,
                        status: None
                    }
                )
                .await
                .unwrap()
                .orders
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_duplicate_lines_share_one_counter() {
        let store = MemoryStore::new();
        let product = store.insert_product(tee(3)).await.unwrap();
        let result = store
            .place_order(order_for(UserId::new(1), product.id, &[("M", 2), ("M", 2)]))
            .await;
        assert!(result.is_err());
        assert_eq!(stock_of(&store, product.id, "M").await, 3);
    }

    #[tokio::test]
    async fn test_cancel_twice_releases_once() {
        let store = MemoryStore::new();
        let product = store.insert_product(tee(5)).await.unwrap();
        let user = UserId::new(1);
        let order = store
            .place_order(order_for(user, product.id, &[("M", 2)]))
            .await
            .unwrap();
        assert_eq!(stock_of(&store, product.id, "M").await, 3);

        let cancellation = Cancellation {
            cancelled_at: Utc::now(),
            reason: "test".to_owned(),
        };
        let first = store
            .cancel_order(user, order.id, cancellation.clone())
            .await
            .unwrap();
        assert!(matches!(first, TransitionOutcome::Applied(_)));
        let second = store
            .cancel_order(user, order.id, cancellation)
            .await
            .unwrap();
        assert_eq!(second, TransitionOutcome::Rejected(OrderStatus::Cancelled));
        assert_eq!(stock_of(&store, product.id, "M").await, 5);
    }

    #[tokio::test]
    async fn test_cancel_after_product_removed_from_catalog() {
        let store = MemoryStore::new();
        let product = store.insert_product(tee(5)).await.unwrap();
        let user = UserId::new(1);
        let order = store
            .place_order(order_for(user, product.id, &[("M", 2)]))
            .await
            .unwrap();
        store.state.write().await.products.remove(&product.id);

        let outcome = store
            .cancel_order(
                user,
                order.id,
                Cancellation {
                    cancelled_at: Utc::now(),
                    reason: "discontinued".to_owned(),
                },
            )
            .await
            .unwrap();
        let cancelled = match outcome {
            TransitionOutcome::Applied(order) => order,
            TransitionOutcome::Rejected(status) => panic!("cancellation rejected: {status}"),
        };
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(store.get_product(product.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orders_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let product = store.insert_product(tee(5)).await.unwrap();
        let order = store
            .place_order(order_for(UserId::new(1), product.id, &[("M", 1)]))
            .await
            .unwrap();

        assert!(store.get_order(UserId::new(2), order.id).await.unwrap().is_none());
        assert!(
            store
                .get_order_by_number(UserId::new(2), order.order_number.as_str())
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            store
                .cancel_order(
                    UserId::new(2),
                    order.id,
                    Cancellation {
                        cancelled_at: Utc::now(),
                        reason: "not mine".to_owned(),
                    }
                )
                .await,
            Err(RepositoryError::NotFound)
        ));
    }
}
