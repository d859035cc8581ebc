//! Stockroom storefront library.
//!
//! Cart, checkout, order and account JSON API over a pluggable store. The
//! binary wires it to Postgres and SMTP; tests drive the same router
//! against [`db::MemoryStore`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::{Router, middleware::from_fn};
use secrecy::SecretString;
use tower_http::trace::TraceLayer;
use tower_sessions::SessionStore;

use db::Store;
use state::AppState;

/// Build the full router with its middleware stack.
///
/// `sessions` is any tower-sessions store: Postgres in production, the
/// in-memory store in tests. Sentry layers are added by the binary.
pub fn app<S, T>(state: AppState<S>, sessions: T, session_secret: &SecretString) -> Router
where
    S: Store,
    T: SessionStore + Clone,
{
    let secure = state.config().is_secure();
    Router::new()
        .merge(routes::routes())
        .layer(middleware::create_session_layer(
            sessions,
            session_secret,
            secure,
        ))
        .layer(from_fn(middleware::security_headers_middleware))
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
