//! Authentication error types.

use thiserror::Error;

use crate::db::RepositoryError;

/// Errors that can occur during authentication and password reset.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] stockroom_core::EmailError),

    /// Invalid credentials (wrong password or unknown email).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No account for the email.
    #[error("No user found with this email")]
    UserNotFound,

    /// User already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Password too weak or invalid.
    #[error("{0}")]
    WeakPassword(String),

    /// Malformed request field, e.g. an OTP that is not six digits.
    #[error("{0}")]
    Validation(String),

    /// `verify_otp` with no reset in progress.
    #[error("No password reset was requested for this email")]
    NoPendingRequest,

    /// The code's window has passed; the reset was cleared.
    #[error("OTP has expired. Please request a new one")]
    Expired,

    /// The code does not match. The reset stays pending.
    #[error("Invalid OTP")]
    InvalidOtp,

    /// `reset_password` without a verified code.
    #[error("OTP not verified. Please verify the OTP first")]
    NotVerified,

    /// The reset email could not be sent; the reset was cleared.
    #[error("Failed to send password reset email")]
    DeliveryFailed,

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}
