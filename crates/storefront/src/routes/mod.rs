//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                      - Liveness
//! GET    /health/ready                - Store readiness
//!
//! # Auth
//! POST   /auth/register               - Create account, sign in
//! POST   /auth/login                  - Sign in
//! POST   /auth/logout                 - Sign out
//! GET    /auth/me                     - Current account (requires auth)
//! POST   /auth/forgot-password        - Email a reset code
//! POST   /auth/verify-otp             - Check a reset code
//! PATCH  /auth/reset-password         - Set a new password, sign in
//!
//! # Cart (requires auth)
//! GET    /cart                        - Current cart
//! POST   /cart/item                   - Add a line or increase its quantity
//! PATCH  /cart/item                   - Set a line's quantity (<= 0 removes)
//! DELETE /cart/item                   - Remove a line
//! DELETE /cart                        - Empty the cart
//!
//! # Orders (requires auth)
//! POST   /orders                      - Check out the cart (201)
//! GET    /orders                      - Order history (?page&limit&status)
//! GET    /orders/{id}                 - One order
//! GET    /orders/number/{orderNumber} - One order by number
//! PATCH  /orders/{id}/cancel          - Cancel and release stock
//! ```
//!
//! Every response body is JSON: `{"success": true, "message"?, "data"}` on
//! success and `{"success": false, "message"}` on failure.

pub mod auth;
pub mod cart;
pub mod orders;

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use serde::Serialize;

use crate::db::Store;
use crate::error::AppError;
use crate::state::AppState;

/// `Json` whose rejection is the JSON error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `Path` whose rejection is the JSON error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// `Query` whose rejection is the JSON error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub const fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data,
        })
    }

    pub const fn with_message(message: &'static str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data,
        })
    }
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness<S: Store>(State(state): State<AppState<S>>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Create the auth routes router.
pub fn auth_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/register", post(auth::register::<S>))
        .route("/login", post(auth::login::<S>))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me::<S>))
        .route("/forgot-password", post(auth::forgot_password::<S>))
        .route("/verify-otp", post(auth::verify_otp::<S>))
        .route("/reset-password", patch(auth::reset_password::<S>))
}

/// Create the cart routes router.
pub fn cart_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/", get(cart::show::<S>).delete(cart::clear::<S>))
        .route(
            "/item",
            post(cart::add::<S>)
                .patch(cart::update::<S>)
                .delete(cart::remove::<S>),
        )
}

/// Create the order routes router.
pub fn order_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/", post(orders::create::<S>).get(orders::index::<S>))
        .route("/{id}", get(orders::show::<S>))
        .route("/number/{order_number}", get(orders::show_by_number::<S>))
        .route("/{id}/cancel", patch(orders::cancel::<S>))
}

/// Create all routes for the storefront.
pub fn routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness::<S>))
        .nest("/auth", auth_routes())
        .nest("/cart", cart_routes())
        .nest("/orders", order_routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_omits_missing_message() {
        let Json(body) = ApiResponse::ok(3);
        assert_eq!(
            serde_json::to_value(&body).ok(),
            Some(serde_json::json!({"success": true, "data": 3}))
        );
    }
}
