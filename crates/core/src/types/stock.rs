//! Stock identity.

use serde::{Deserialize, Serialize};

use super::ProductId;

/// Identity of one stock counter: a size within a variant of a product.
///
/// Cart lines and order lines both carry the three parts, so a key can be
/// rebuilt from either without a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: String,
    pub size: String,
}

impl StockKey {
    /// Create a new stock key.
    #[must_use]
    pub fn new(product_id: ProductId, variant_id: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            product_id,
            variant_id: variant_id.into(),
            size: size.into(),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.product_id, self.variant_id, self.size)
    }
}
