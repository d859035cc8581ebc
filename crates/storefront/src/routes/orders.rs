//! Order route handlers.

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockroom_core::{OrderId, OrderStatus};

use super::{ApiJson, ApiPath, ApiQuery, ApiResponse};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::models::Order;
use crate::services::checkout::CheckoutRequest;
use crate::services::orders::order_filter;
use crate::services::{CancellationService, CheckoutService, OrderService};
use crate::state::AppState;

/// Order history query string.
#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
}

/// Order history page.
#[derive(Debug, Serialize)]
pub struct OrderList {
    pub success: bool,
    /// Orders on this page.
    pub results: usize,
    /// Orders matching the filter across all pages.
    pub total: u64,
    pub page: u32,
    pub data: Vec<Order>,
}

/// Optional cancellation reason.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// POST /orders
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiJson(request): ApiJson<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Order>>)> {
    let order = CheckoutService::new(state.store(), state.clock())
        .checkout(user.id, request)
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("Order placed successfully", order),
    ))
}

/// GET /orders?page&limit&status
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn index<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiQuery(query): ApiQuery<OrderQuery>,
) -> Result<Json<OrderList>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let filter = order_filter(query.page, query.limit, status)?;

    let page = OrderService::new(state.store()).list(user.id, filter).await?;
    Ok(Json(OrderList {
        success: true,
        results: page.orders.len(),
        total: page.total,
        page: page.page,
        data: page.orders,
    }))
}

/// GET /orders/{id}
#[instrument(skip_all, fields(user_id = %user.id, order_id = %id))]
pub async fn show<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiPath(id): ApiPath<OrderId>,
) -> Result<Json<ApiResponse<Order>>> {
    let order = OrderService::new(state.store()).get(user.id, id).await?;
    Ok(ApiResponse::ok(order))
}

/// GET /orders/number/{orderNumber}
#[instrument(skip_all, fields(user_id = %user.id, order_number = %order_number))]
pub async fn show_by_number<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiPath(order_number): ApiPath<String>,
) -> Result<Json<ApiResponse<Order>>> {
    let order = OrderService::new(state.store())
        .get_by_number(user.id, &order_number)
        .await?;
    Ok(ApiResponse::ok(order))
}

/// PATCH /orders/{id}/cancel
///
/// The body is optional; an empty body cancels with the default reason.
#[instrument(skip_all, fields(user_id = %user.id, order_id = %id))]
pub async fn cancel<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(user): RequireAuth,
    ApiPath(id): ApiPath<OrderId>,
    body: Bytes,
) -> Result<Json<ApiResponse<Order>>> {
    let request: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };
    let order = CancellationService::new(state.store(), state.clock())
        .cancel(user.id, id, request.reason.as_deref())
        .await?;
    Ok(ApiResponse::with_message("Order cancelled successfully", order))
}
