//! Integration test harness for the Stockroom storefront.
//!
//! Builds the real router (routes, middleware, sessions) over the
//! in-memory store, an outbox mailer and a hand-driven clock, and sends
//! requests through it with `tower::ServiceExt::oneshot`. No network or
//! database is involved.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p stockroom-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use stockroom_core::{CurrencyCode, Email, ProductId};
use stockroom_storefront::config::StorefrontConfig;
use stockroom_storefront::db::{MemoryStore, ProductStore};
use stockroom_storefront::models::{NewProduct, NewSize, NewVariant, Product};
use stockroom_storefront::services::Clock;
use stockroom_storefront::services::email::OutboxMailer;
use stockroom_storefront::state::AppState;

/// Session signing secret used by every test app.
const TEST_SESSION_SECRET: &str = "kP9$wQ2!zR7@vL4#nX8%tB1^mJ6&cH3*";

/// A clock tests move by hand.
#[derive(Debug, Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Utc::now())))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused"),
        host: "127.0.0.1".parse().unwrap(),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from(TEST_SESSION_SECRET),
        otp_expires_minutes: 10,
        email: None,
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// The storefront app plus handles on its collaborators.
pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub outbox: OutboxMailer,
    pub clock: TestClock,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let outbox = OutboxMailer::new();
        let clock = TestClock::new();
        let config = test_config();
        let secret = config.session_secret.clone();
        let state = AppState::new(
            config,
            store.clone(),
            Arc::new(outbox.clone()),
            Arc::new(clock.clone()),
        );
        let router = stockroom_storefront::app(
            state,
            tower_sessions::MemoryStore::default(),
            &secret,
        );
        Self {
            router,
            store,
            outbox,
            clock,
        }
    }

    /// A client with its own cookie jar.
    #[must_use]
    pub fn client(&self) -> TestClient {
        TestClient {
            router: self.router.clone(),
            cookie: Mutex::new(None),
        }
    }

    /// Insert a one-variant tee (`black`, sizes M and L at 20.00).
    pub async fn seed_tee(&self, stock_m: u32, stock_l: u32) -> Product {
        let size = |size: &str, stock| NewSize {
            size: size.to_owned(),
            sku: format!("TEE-BLK-{size}"),
            stock,
            price: Decimal::new(2000, 2),
        };
        self.store
            .insert_product(NewProduct {
                name: "Classic Tee".to_owned(),
                slug: "classic-tee".to_owned(),
                currency: CurrencyCode::USD,
                variants: vec![NewVariant {
                    variant_id: "black".to_owned(),
                    color: "Black".to_owned(),
                    sizes: vec![size("M", stock_m), size("L", stock_l)],
                }],
            })
            .await
            .unwrap()
    }

    /// Live stock for one size of a product.
    pub async fn stock(&self, product_id: ProductId, size: &str) -> u32 {
        self.store
            .get_product(product_id)
            .await
            .unwrap()
            .unwrap()
            .variant("black")
            .unwrap()
            .size(size)
            .unwrap()
            .stock
    }

    /// The six-digit code in the latest email to `to`.
    #[must_use]
    pub fn last_otp(&self, to: &str) -> String {
        let message = self.outbox.last_to(&Email::parse(to).unwrap()).unwrap();
        message
            .text_body
            .split(|c: char| !c.is_ascii_digit())
            .find(|run| run.len() == 6)
            .unwrap()
            .to_owned()
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// A response with its JSON body decoded.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `body.message` as a string, or empty.
    #[must_use]
    pub fn message(&self) -> &str {
        self.body["message"].as_str().unwrap_or_default()
    }
}

/// Sends requests through the router, carrying the session cookie.
pub struct TestClient {
    router: Router,
    cookie: Mutex<Option<String>>,
}

impl TestClient {
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = self.cookie.lock().unwrap().clone() {
            request = request.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie
                .to_str()
                .unwrap()
                .split(';')
                .next()
                .unwrap_or_default()
                .to_owned();
            *self.cookie.lock().unwrap() = Some(pair);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::PATCH, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, body: Option<Value>) -> TestResponse {
        self.send(Method::DELETE, uri, body).await
    }

    /// Register (and thereby sign in) a shopper.
    pub async fn register(&self, email: &str, password: &str) -> TestResponse {
        self.post(
            "/auth/register",
            serde_json::json!({
                "email": email,
                "password": password,
                "firstName": "Test",
                "lastName": "Shopper",
            }),
        )
        .await
    }
}

/// Parse a decimal the API serialized as a string.
#[must_use]
pub fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().unwrap()).unwrap()
}

/// A complete checkout body.
#[must_use]
pub fn checkout_body(method: &str) -> Value {
    serde_json::json!({
        "shippingAddress": {
            "fullName": "Ada Lovelace",
            "address": "12 Analytical Row",
            "city": "London",
            "postalCode": "N1 9GU",
            "country": "UK",
            "phone": "020 7946 0000"
        },
        "payment": { "method": method },
        "shippingCost": "5.00",
        "tax": "0"
    })
}
