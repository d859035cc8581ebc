//! Stock ledger.
//!
//! Thin layer over [`ProductStore`] that resolves cart and order lines to
//! their size entries and turns storage failures into inventory errors the
//! cart, checkout and cancellation workflows share.

use thiserror::Error;
use tracing::instrument;

use stockroom_core::{ProductId, StockKey};

use crate::db::{ProductStore, RepositoryError};
use crate::models::{Product, SizeStock, Variant};

/// Errors raised when resolving or moving stock.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Product not found")]
    ProductNotFound(ProductId),

    #[error("Variant not found")]
    VariantNotFound { product_id: ProductId, variant_id: String },

    #[error("Size {size} not available for this variant")]
    SizeNotFound { key: StockKey, size: String },

    #[error("Insufficient stock for {name} ({size}). Only {available} available")]
    InsufficientStock {
        key: StockKey,
        name: String,
        size: String,
        requested: u32,
        available: u32,
    },

    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for InventoryError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InsufficientStock {
                key,
                requested,
                available,
            } => Self::InsufficientStock {
                name: format!("product {}", key.product_id),
                size: key.size.clone(),
                key,
                requested,
                available,
            },
            RepositoryError::MissingStock(key) => Self::SizeNotFound {
                size: key.size.clone(),
                key,
            },
            other => Self::Repository(other),
        }
    }
}

/// Resolve a stock key inside an already-loaded product.
///
/// # Errors
///
/// Returns `VariantNotFound` or `SizeNotFound` if the key no longer
/// resolves.
pub fn locate<'p>(
    product: &'p Product,
    key: &StockKey,
) -> Result<(&'p Variant, &'p SizeStock), InventoryError> {
    let variant = product
        .variant(&key.variant_id)
        .ok_or_else(|| InventoryError::VariantNotFound {
            product_id: key.product_id,
            variant_id: key.variant_id.clone(),
        })?;
    let size = variant
        .size(&key.size)
        .ok_or_else(|| InventoryError::SizeNotFound {
            key: key.clone(),
            size: key.size.clone(),
        })?;
    Ok((variant, size))
}

/// Check that a snapshot size entry covers `quantity`.
///
/// # Errors
///
/// Returns `InsufficientStock` naming the product and size.
pub fn ensure_available(
    product: &Product,
    key: &StockKey,
    entry: &SizeStock,
    quantity: u32,
) -> Result<(), InventoryError> {
    if entry.covers(quantity) {
        return Ok(());
    }
    Err(InventoryError::InsufficientStock {
        key: key.clone(),
        name: product.name.clone(),
        size: entry.size.clone(),
        requested: quantity,
        available: entry.stock,
    })
}

/// Stock ledger over a product store.
pub struct StockLedger<'a, S> {
    store: &'a S,
}

impl<'a, S: ProductStore> StockLedger<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Load a product or fail with `ProductNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `ProductNotFound` or a repository error.
    pub async fn product(&self, id: ProductId) -> Result<Product, InventoryError> {
        self.store
            .get_product(id)
            .await?
            .ok_or(InventoryError::ProductNotFound(id))
    }

    /// Take `quantity` units from `key`. All or nothing.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientStock` if fewer units remain, or `SizeNotFound`
    /// if the key does not resolve.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn reserve(&self, key: &StockKey, quantity: u32) -> Result<u32, InventoryError> {
        let remaining = self.store.reserve_stock(key, quantity).await?;
        tracing::debug!(remaining, "Stock reserved");
        Ok(remaining)
    }

    /// Return `quantity` units to `key`.
    ///
    /// # Errors
    ///
    /// Returns `SizeNotFound` if the key does not resolve.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn release(&self, key: &StockKey, quantity: u32) -> Result<u32, InventoryError> {
        let stock = self.store.release_stock(key, quantity).await?;
        tracing::debug!(stock, "Stock released");
        Ok(stock)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::db::MemoryStore;
    use crate::services::testing::{seed_tee, stock_of};

    #[tokio::test]
    async fn test_reserve_release_round_trip() {
        let store = MemoryStore::new();
        let tee = seed_tee(&store, 5, 0).await;
        let ledger = StockLedger::new(&store);
        let key = StockKey::new(tee.id, "black", "M");

        assert_eq!(ledger.reserve(&key, 5).await.unwrap(), 0);
        let err = ledger.reserve(&key, 1).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            }
        ));
        assert_eq!(ledger.release(&key, 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_keys() {
        let store = MemoryStore::new();
        let tee = seed_tee(&store, 1, 1).await;
        let ledger = StockLedger::new(&store);

        assert!(matches!(
            ledger.product(ProductId::new(9999)).await,
            Err(InventoryError::ProductNotFound(_))
        ));
        assert!(matches!(
            ledger.release(&StockKey::new(tee.id, "black", "XS"), 1).await,
            Err(InventoryError::SizeNotFound { .. })
        ));
        assert!(matches!(
            locate(&tee, &StockKey::new(tee.id, "white", "M")),
            Err(InventoryError::VariantNotFound { .. })
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(u32),
        Release(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8).prop_map(Op::Reserve),
            (0u32..8).prop_map(Op::Release),
        ]
    }

    proptest! {
        // Stock never goes negative, and on-hand plus net reserved always
        // equals the starting stock.
        #[test]
        fn prop_stock_is_conserved(initial in 0u32..20, ops in prop::collection::vec(op(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let store = MemoryStore::new();
                let tee = seed_tee(&store, initial, 0).await;
                let ledger = StockLedger::new(&store);
                let key = StockKey::new(tee.id, "black", "M");
                let mut net_reserved: i64 = 0;

                for op in ops {
                    match op {
                        Op::Reserve(q) => {
                            let before = stock_of(&store, &tee, "M").await;
                            match ledger.reserve(&key, q).await {
                                Ok(_) => net_reserved += i64::from(q),
                                Err(InventoryError::InsufficientStock { .. }) => {
                                    prop_assert!(before < q);
                                    prop_assert_eq!(stock_of(&store, &tee, "M").await, before);
                                }
                                Err(e) => prop_assert!(false, "unexpected error: {e}"),
                            }
                        }
                        Op::Release(q) => {
                            // Only hand back what was taken.
                            let q = q.min(u32::try_from(net_reserved).unwrap());
                            ledger.release(&key, q).await.unwrap();
                            net_reserved -= i64::from(q);
                        }
                    }
                    let on_hand = i64::from(stock_of(&store, &tee, "M").await);
                    prop_assert_eq!(on_hand + net_reserved, i64::from(initial));
                }
                Ok(())
            })?;
        }
    }
}
