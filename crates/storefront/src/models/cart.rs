//! Shopping cart aggregate.
//!
//! A cart belongs to exactly one user and holds at most one line per
//! [`StockKey`]. `total_items` and `total_price` are derived data: every
//! mutator recomputes them before returning, so a cart handed to the store
//! is always self-consistent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use stockroom_core::{CartId, ProductId, StockKey, UserId, line_total};

/// One line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub variant_id: String,
    pub size: String,
    pub quantity: u32,
    /// Unit price captured when the line was last added or updated.
    pub price: Decimal,
}

impl CartItem {
    /// The stock counter this line draws from.
    #[must_use]
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.product_id, self.variant_id.clone(), self.size.clone())
    }

    fn matches(&self, key: &StockKey) -> bool {
        self.product_id == key.product_id && self.variant_id == key.variant_id && self.size == key.size
    }
}

/// Derived cart totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub total_items: u32,
    pub total_price: Decimal,
}

/// Recompute totals from a set of lines.
#[must_use]
pub fn recompute(items: &[CartItem]) -> CartTotals {
    items.iter().fold(CartTotals::default(), |acc, item| CartTotals {
        total_items: acc.total_items.saturating_add(item.quantity),
        total_price: acc.total_price + line_total(item.price, item.quantity),
    })
}

/// A user's cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    items: Vec<CartItem>,
    totals: CartTotals,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn empty(id: CartId, user_id: UserId, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            items: Vec::new(),
            totals: CartTotals {
                total_items: 0,
                total_price: Decimal::ZERO,
            },
            updated_at,
        }
    }

    /// Rebuild a cart from stored lines. Totals are recomputed, never trusted.
    #[must_use]
    pub fn from_parts(
        id: CartId,
        user_id: UserId,
        items: Vec<CartItem>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let totals = recompute(&items);
        Self {
            id,
            user_id,
            items,
            totals,
            updated_at,
        }
    }

    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    #[must_use]
    pub const fn totals(&self) -> CartTotals {
        self.totals
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The line for a stock key, if any.
    #[must_use]
    pub fn line(&self, key: &StockKey) -> Option<&CartItem> {
        self.items.iter().find(|item| item.matches(key))
    }

    /// Add `quantity` units of `key` at `price`.
    ///
    /// Merges into an existing line for the same key (refreshing its price)
    /// or appends a new one.
    pub fn add(&mut self, key: &StockKey, quantity: u32, price: Decimal) {
        if let Some(item) = self.items.iter_mut().find(|item| item.matches(key)) {
            item.quantity = item.quantity.saturating_add(quantity);
            item.price = price;
        } else {
            self.items.push(CartItem {
                product_id: key.product_id,
                variant_id: key.variant_id.clone(),
                size: key.size.clone(),
                quantity,
                price,
            });
        }
        self.touch();
    }

    /// Set the quantity of an existing line, optionally refreshing its price.
    ///
    /// Returns `false` if the cart has no such line.
    pub fn set_quantity(&mut self, key: &StockKey, quantity: u32, price: Option<Decimal>) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.matches(key)) else {
            return false;
        };
        item.quantity = quantity;
        if let Some(price) = price {
            item.price = price;
        }
        self.touch();
        true
    }

    /// Remove the line for `key`. Returns `false` if there was none.
    pub fn remove(&mut self, key: &StockKey) -> bool {
        let before = self.items.len();
        self.items.retain(|item| !item.matches(key));
        let removed = self.items.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.items.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.totals = recompute(&self.items);
        self.updated_at = Utc::now();
    }
}
