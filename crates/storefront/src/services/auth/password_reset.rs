//! OTP password reset.
//!
//! A reset moves through `Idle -> Requested -> Verified -> Idle`. Only a
//! SHA-256 of the six-digit code is stored, next to an absolute expiry.
//! Every path that leaves `Requested` or `Verified` for `Idle` writes the
//! whole [`ResetState`] at once, so the three stored fields never drift
//! apart. A new request is always allowed and overwrites any earlier one.

use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::instrument;

use stockroom_core::{Email, UserId};

use super::{AuthError, hash_password, validate_password};
use crate::db::UserStore;
use crate::models::{ResetState, User};
use crate::services::Clock;
use crate::services::email::{Mailer, password_reset_email};

/// Number of digits in a reset code.
pub const OTP_LENGTH: usize = 6;

/// Default validity window for a reset code.
pub const DEFAULT_OTP_TTL_MINUTES: i64 = 10;

/// Six random decimal digits, leading zeros impossible.
fn generate_otp() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

/// Hex SHA-256 of the code salted with the owning user's id.
fn hash_otp(user_id: UserId, code: &str) -> String {
    hex::encode(Sha256::digest(format!("{user_id}:{code}").as_bytes()))
}

/// Compare a submitted code against the stored hash in constant time.
fn otp_matches(user_id: UserId, code: &str, otp_hash: &str) -> bool {
    constant_time_eq::constant_time_eq(hash_otp(user_id, code).as_bytes(), otp_hash.as_bytes())
}

fn validate_otp_format(code: &str) -> Result<(), AuthError> {
    if code.len() == OTP_LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AuthError::Validation(format!(
            "OTP must be a {OTP_LENGTH}-digit number"
        )))
    }
}

/// Password reset service.
pub struct PasswordResetService<'a, S> {
    store: &'a S,
    mailer: &'a dyn Mailer,
    clock: &'a dyn Clock,
    ttl: Duration,
}

impl<'a, S: UserStore> PasswordResetService<'a, S> {
    #[must_use]
    pub const fn new(
        store: &'a S,
        mailer: &'a dyn Mailer,
        clock: &'a dyn Clock,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            clock,
            ttl,
        }
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let email = Email::parse(email)?;
        Ok(self.store.get_user_by_email(&email).await?)
    }

    /// Start a reset: store a fresh code hash and email the code.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` for an unknown email, or `DeliveryFailed` if the
    /// email could not be sent. In that case the reset is cleared again.
    #[instrument(skip(self))]
    pub async fn request_reset(&self, email: &str) -> Result<(), AuthError> {
        let user = self
            .user_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let code = generate_otp();
        let state = ResetState::Requested {
            otp_hash: hash_otp(user.id, &code),
            expires_at: self.clock.now() + self.ttl,
        };
        self.store.save_reset_state(user.id, &state).await?;

        let name = user.first_name.as_deref().unwrap_or("there");
        let delivery = match password_reset_email(&user.email, name, &code, self.ttl.num_minutes())
        {
            Ok(message) => self.mailer.send(&message).await,
            Err(err) => Err(err),
        };

        if let Err(err) = delivery {
            tracing::warn!(user_id = %user.id, error = %err, "Password reset email failed");
            self.store.save_reset_state(user.id, &ResetState::Idle).await?;
            return Err(AuthError::DeliveryFailed);
        }

        tracing::info!(user_id = %user.id, "Password reset requested");
        Ok(())
    }

    /// Check a code against the pending reset.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed code, `NoPendingRequest` when no
    /// reset is pending, `Expired` (and clears the reset) once the window
    /// has passed, or `InvalidOtp` on a mismatch. A mismatch keeps the reset
    /// pending so the user can retry.
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let code = code.trim();
        validate_otp_format(code)?;

        let Some(user) = self.user_by_email(email).await? else {
            return Err(AuthError::NoPendingRequest);
        };
        let (otp_hash, expires_at) = match user.password_reset {
            ResetState::Idle => return Err(AuthError::NoPendingRequest),
            ResetState::Requested {
                otp_hash,
                expires_at,
            }
            | ResetState::Verified {
                otp_hash,
                expires_at,
            } => (otp_hash, expires_at),
        };

        if self.clock.now() >= expires_at {
            self.store.save_reset_state(user.id, &ResetState::Idle).await?;
            return Err(AuthError::Expired);
        }

        if !otp_matches(user.id, code, &otp_hash) {
            return Err(AuthError::InvalidOtp);
        }

        self.store
            .save_reset_state(
                user.id,
                &ResetState::Verified {
                    otp_hash,
                    expires_at,
                },
            )
            .await?;
        Ok(())
    }

    /// Set a new password after a verified code, consuming the reset.
    ///
    /// # Errors
    ///
    /// Returns `NotVerified` unless the last code for this email was
    /// verified, or `WeakPassword` for a short password.
    #[instrument(skip(self, new_password))]
    pub async fn reset_password(&self, email: &str, new_password: &str) -> Result<User, AuthError> {
        let user = self
            .user_by_email(email)
            .await?
            .ok_or(AuthError::NotVerified)?;
        if !matches!(user.password_reset, ResetState::Verified { .. }) {
            return Err(AuthError::NotVerified);
        }

        validate_password(new_password)?;
        let password_hash = hash_password(new_password)?;
        let user = self
            .store
            .complete_password_reset(user.id, &password_hash)
            .await?;

        tracing::info!(user_id = %user.id, "Password reset completed");
        Ok(user)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::AuthService;
    use crate::services::email::{DisabledMailer, OutboxMailer};
    use crate::services::testing::{ManualClock, seed_user};

    fn ttl() -> Duration {
        Duration::minutes(DEFAULT_OTP_TTL_MINUTES)
    }

    /// The six-digit code in the most recent email to `to`.
    fn sent_code(outbox: &OutboxMailer, to: &str) -> String {
        let message = outbox.last_to(&Email::parse(to).unwrap()).unwrap();
        message
            .text_body
            .split(|c: char| !c.is_ascii_digit())
            .find(|run| run.len() == OTP_LENGTH)
            .unwrap()
            .to_owned()
    }

    async fn reset_state(store: &MemoryStore, email: &str) -> ResetState {
        store
            .get_user_by_email(&Email::parse(email).unwrap())
            .await
            .unwrap()
            .unwrap()
            .password_reset
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_otp();
            assert!(validate_otp_format(&code).is_ok(), "{code}");
        }
    }

    #[test]
    fn test_hash_is_salted_by_user() {
        assert_ne!(
            hash_otp(UserId::new(1), "123456"),
            hash_otp(UserId::new(2), "123456")
        );
        assert_eq!(hash_otp(UserId::new(1), "123456").len(), 64);
    }

    #[test]
    fn test_otp_matches_only_its_own_hash() {
        let stored = hash_otp(UserId::new(1), "123456");
        assert!(otp_matches(UserId::new(1), "123456", &stored));
        assert!(!otp_matches(UserId::new(1), "123457", &stored));
        assert!(!otp_matches(UserId::new(2), "123456", &stored));
        assert!(!otp_matches(UserId::new(1), "123456", ""));
    }

    #[tokio::test]
    async fn test_unknown_email_is_user_not_found() {
        let store = MemoryStore::new();
        let outbox = OutboxMailer::new();
        let clock = ManualClock::new();
        let service = PasswordResetService::new(&store, &outbox, &clock, ttl());

        assert!(matches!(
            service.request_reset("a@b.com").await,
            Err(AuthError::UserNotFound)
        ));
        assert!(outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_code_clears_reset() {
        let store = MemoryStore::new();
        seed_user(&store, "ada@example.com").await;
        let outbox = OutboxMailer::new();
        let clock = ManualClock::new();
        let service = PasswordResetService::new(&store, &outbox, &clock, ttl());

        service.request_reset("ada@example.com").await.unwrap();
        let code = sent_code(&outbox, "ada@example.com");
        clock.advance(ttl() + Duration::seconds(1));

        assert!(matches!(
            service.verify_otp("ada@example.com", &code).await,
            Err(AuthError::Expired)
        ));
        assert_eq!(reset_state(&store, "ada@example.com").await, ResetState::Idle);
        assert!(matches!(
            service.verify_otp("ada@example.com", &code).await,
            Err(AuthError::NoPendingRequest)
        ));
    }

    #[tokio::test]
    async fn test_full_reset_flow_is_single_use() {
        let store = MemoryStore::new();
        seed_user(&store, "ada@example.com").await;
        let outbox = OutboxMailer::new();
        let clock = ManualClock::new();
        let service = PasswordResetService::new(&store, &outbox, &clock, ttl());

        service.request_reset("ada@example.com").await.unwrap();
        assert!(matches!(
            reset_state(&store, "ada@example.com").await,
            ResetState::Requested { .. }
        ));
        assert!(matches!(
            service
                .reset_password("ada@example.com", "brand-new-pass")
                .await,
            Err(AuthError::NotVerified)
        ));

        let code = sent_code(&outbox, "ada@example.com");
        let wrong = if code == "999999" { "999998" } else { "999999" };
        assert!(matches!(
            service.verify_otp("ada@example.com", wrong).await,
            Err(AuthError::InvalidOtp)
        ));
        // A mismatch keeps the reset pending.
        service.verify_otp("ada@example.com", &code).await.unwrap();
        assert!(matches!(
            reset_state(&store, "ada@example.com").await,
            ResetState::Verified { .. }
        ));

        service
            .reset_password("ada@example.com", "brand-new-pass")
            .await
            .unwrap();
        assert_eq!(reset_state(&store, "ada@example.com").await, ResetState::Idle);
        AuthService::new(&store)
            .login("ada@example.com", "brand-new-pass")
            .await
            .unwrap();

        assert!(matches!(
            service
                .reset_password("ada@example.com", "another-pass")
                .await,
            Err(AuthError::NotVerified)
        ));
    }

    #[tokio::test]
    async fn test_new_request_overwrites_verified_reset() {
        let store = MemoryStore::new();
        seed_user(&store, "ada@example.com").await;
        let outbox = OutboxMailer::new();
        let clock = ManualClock::new();
        let service = PasswordResetService::new(&store, &outbox, &clock, ttl());

        service.request_reset("ada@example.com").await.unwrap();
        let code = sent_code(&outbox, "ada@example.com");
        service.verify_otp("ada@example.com", &code).await.unwrap();
        service.request_reset("ada@example.com").await.unwrap();

        assert!(matches!(
            reset_state(&store, "ada@example.com").await,
            ResetState::Requested { .. }
        ));
        assert!(matches!(
            service
                .reset_password("ada@example.com", "brand-new-pass")
                .await,
            Err(AuthError::NotVerified)
        ));
    }

    #[tokio::test]
    async fn test_delivery_failure_rolls_back() {
        let store = MemoryStore::new();
        seed_user(&store, "ada@example.com").await;
        let clock = ManualClock::new();
        let service = PasswordResetService::new(&store, &DisabledMailer, &clock, ttl());

        assert!(matches!(
            service.request_reset("ada@example.com").await,
            Err(AuthError::DeliveryFailed)
        ));
        assert_eq!(reset_state(&store, "ada@example.com").await, ResetState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_code_is_validation_error() {
        let store = MemoryStore::new();
        let clock = ManualClock::new();
        let service = PasswordResetService::new(&store, &DisabledMailer, &clock, ttl());

        for code in ["12345", "1234567", "12a456", ""] {
            assert!(matches!(
                service.verify_otp("ada@example.com", code).await,
                Err(AuthError::Validation(_))
            ));
        }
    }
}
