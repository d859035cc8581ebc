//! Product catalog and per-size stock.
//!
//! A product owns an ordered list of variants (usually colors), each with an
//! ordered list of sizes. Every size carries its own unit price and stock
//! count, so a [`StockKey`] addresses exactly one counter.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{CurrencyCode, ProductId, StockKey};

/// A product with its full variant and size tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub currency: CurrencyCode,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
}

/// A purchasable variant of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub variant_id: String,
    pub color: String,
    pub sizes: Vec<SizeStock>,
}

/// Stock and price for one size of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStock {
    pub size: String,
    pub sku: String,
    pub stock: u32,
    pub price: Decimal,
}

/// Not enough units on hand to cover a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("requested {requested}, only {available} available")]
pub struct StockShortfall {
    pub requested: u32,
    pub available: u32,
}

impl SizeStock {
    /// Whether `quantity` units can be taken right now.
    #[must_use]
    pub const fn covers(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }

    /// Take `quantity` units.
    ///
    /// Either the whole quantity is taken or nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`StockShortfall`] if fewer than `quantity` units remain.
    pub const fn reserve(&mut self, quantity: u32) -> Result<(), StockShortfall> {
        match self.stock.checked_sub(quantity) {
            Some(remaining) => {
                self.stock = remaining;
                Ok(())
            }
            None => Err(StockShortfall {
                requested: quantity,
                available: self.stock,
            }),
        }
    }

    /// Return `quantity` units. There is no upper bound.
    pub const fn release(&mut self, quantity: u32) {
        self.stock = self.stock.saturating_add(quantity);
    }
}

impl Variant {
    /// Look up one of this variant's sizes.
    #[must_use]
    pub fn size(&self, size: &str) -> Option<&SizeStock> {
        self.sizes.iter().find(|s| s.size == size)
    }

    fn size_mut(&mut self, size: &str) -> Option<&mut SizeStock> {
        self.sizes.iter_mut().find(|s| s.size == size)
    }
}

impl Product {
    /// Look up a variant by id.
    #[must_use]
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    /// Mutable access to the size entry a stock key points at.
    ///
    /// Returns `None` when the key belongs to another product or names a
    /// variant or size that no longer exists.
    pub fn size_entry_mut(&mut self, key: &StockKey) -> Option<&mut SizeStock> {
        if key.product_id != self.id {
            return None;
        }
        self.variants
            .iter_mut()
            .find(|v| v.variant_id == key.variant_id)
            .and_then(|v| v.size_mut(&key.size))
    }

    /// Units on hand across every variant and size.
    #[must_use]
    pub fn total_stock(&self) -> u64 {
        self.variants
            .iter()
            .flat_map(|v| v.sizes.iter())
            .map(|s| u64::from(s.stock))
            .sum()
    }
}

// =============================================================================
// Catalog seeding
// =============================================================================

/// Product definition used for seeding the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub currency: CurrencyCode,
    pub variants: Vec<NewVariant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVariant {
    pub variant_id: String,
    pub color: String,
    pub sizes: Vec<NewSize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSize {
    pub size: String,
    pub sku: String,
    pub stock: u32,
    pub price: Decimal,
}

impl NewProduct {
    /// Problems that would make this product unusable, empty when valid.
    ///
    /// Checks for blank names, products without sizes, negative prices and
    /// duplicate variant or size identifiers (which would make a
    /// [`StockKey`] ambiguous).
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let label = if self.slug.trim().is_empty() {
            errors.push("slug must not be empty".to_owned());
            self.name.as_str()
        } else {
            self.slug.as_str()
        };
        if self.name.trim().is_empty() {
            errors.push(format!("{label}: name must not be empty"));
        }
        if self.variants.is_empty() {
            errors.push(format!("{label}: at least one variant is required"));
        }

        let mut variant_ids = std::collections::HashSet::new();
        for variant in &self.variants {
            if !variant_ids.insert(variant.variant_id.as_str()) {
                errors.push(format!("{label}: duplicate variant {}", variant.variant_id));
            }
            if variant.sizes.is_empty() {
                errors.push(format!("{label}/{}: no sizes", variant.variant_id));
            }
            let mut sizes = std::collections::HashSet::new();
            for size in &variant.sizes {
                if !sizes.insert(size.size.as_str()) {
                    errors.push(format!(
                        "{label}/{}: duplicate size {}",
                        variant.variant_id, size.size
                    ));
                }
                if size.price.is_sign_negative() {
                    errors.push(format!(
                        "{label}/{}/{}: price must not be negative",
                        variant.variant_id, size.size
                    ));
                }
            }
        }
        errors
    }

    /// Attach an id and creation time.
    #[must_use]
    pub fn into_product(self, id: ProductId, created_at: DateTime<Utc>) -> Product {
        Product {
            id,
            name: self.name,
            slug: self.slug,
            currency: self.currency,
            variants: self
                .variants
                .into_iter()
                .map(|v| Variant {
                    variant_id: v.variant_id,
                    color: v.color,
                    sizes: v
                        .sizes
                        .into_iter()
                        .map(|s| SizeStock {
                            size: s.size,
                            sku: s.sku,
                            stock: s.stock,
                            price: s.price,
                        })
                        .collect(),
                })
                .collect(),
            created_at,
        }
    }
}
