//! Cart route handlers.
//!
//! Each shopper has one server-side cart, created on first use. Lines are
//! keyed by `(productId, variantId, size)`.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::instrument;

use stockroom_core::{ProductId, StockKey};

use super::{ApiJson, ApiResponse};
use crate::db::Store;
use crate::error::{Result, add_breadcrumb};
use crate::middleware::RequireAuth;
use crate::models::Cart;
use crate::services::CartService;
use crate::services::cart::CartView;
use crate::state::AppState;

type CartResponse = Json<ApiResponse<CartView>>;

/// Identifies one cart line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineKey {
    pub product_id: ProductId,
    pub variant_id: String,
    pub size: String,
}

impl LineKey {
    fn stock_key(&self) -> StockKey {
        StockKey::new(self.product_id, self.variant_id.trim(), self.size.trim())
    }
}

/// Add-to-cart form.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(flatten)]
    pub line: LineKey,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

const fn default_quantity() -> u32 {
    1
}

/// Quantity update. Zero or less removes the line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    #[serde(flatten)]
    pub line: LineKey,
    pub quantity: i64,
}

async fn respond<S: Store>(
    cart: &CartService<'_, S>,
    message: Option<&'static str>,
    updated: &Cart,
) -> Result<CartResponse> {
    let view = cart.view(updated).await?;
    Ok(match message {
        Some(message) => ApiResponse::with_message(message, view),
        None => ApiResponse::ok(view),
    })
}

/// GET /cart
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn show<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
) -> Result<CartResponse> {
    let cart = CartService::new(state.store());
    let current = cart.get(user.id).await?;
    respond(&cart, None, &current).await
}

/// POST /cart/item
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn add<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiJson(request): ApiJson<AddItemRequest>,
) -> Result<CartResponse> {
    let cart = CartService::new(state.store());
    let key = request.line.stock_key();
    let updated = cart.add_item(user.id, &key, request.quantity).await?;

    let product_id = key.product_id.to_string();
    add_breadcrumb(
        "cart",
        "Added item to cart",
        Some(&[("product_id", product_id.as_str()), ("size", key.size.as_str())]),
    );
    respond(&cart, Some("Item added to cart"), &updated).await
}

/// PATCH /cart/item
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiJson(request): ApiJson<UpdateItemRequest>,
) -> Result<CartResponse> {
    let cart = CartService::new(state.store());
    let updated = cart
        .update_item(user.id, &request.line.stock_key(), request.quantity)
        .await?;
    respond(&cart, Some("Cart updated"), &updated).await
}

/// DELETE /cart/item
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn remove<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiJson(line): ApiJson<LineKey>,
) -> Result<CartResponse> {
    let cart = CartService::new(state.store());
    let updated = cart.remove_item(user.id, &line.stock_key()).await?;
    respond(&cart, Some("Item removed from cart"), &updated).await
}

/// DELETE /cart
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn clear<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
) -> Result<CartResponse> {
    let cart = CartService::new(state.store());
    let updated = cart.clear(user.id).await?;
    respond(&cart, Some("Cart cleared"), &updated).await
}
