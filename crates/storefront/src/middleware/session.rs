//! Session middleware configuration.
//!
//! Sessions use tower-sessions. Production stores them in `PostgreSQL`
//! (`tower_sessions.session`); tests pass the in-memory store.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};
use tower_sessions::cookie::{Key, SameSite, time::Duration};
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "sr_session";

/// Session expiry time in seconds (7 days).
const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Derive the 64-byte cookie signing key from the configured secret.
fn signing_key(secret: &SecretString) -> Key {
    Key::from(Sha512::digest(secret.expose_secret().as_bytes()).as_slice())
}

/// Create the session layer over any session store.
///
/// Cookies are signed with a key derived from `secret` and marked `Secure`
/// when `secure` is set (HTTPS deployments).
#[must_use]
pub fn create_session_layer<T>(
    store: T,
    secret: &SecretString,
    secure: bool,
) -> SessionManagerLayer<T, tower_sessions::service::SignedCookie>
where
    T: SessionStore + Clone,
{
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(
            SESSION_EXPIRY_SECONDS,
        )))
        .with_secure(secure)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
        .with_signed(signing_key(secret))
}
