//! User accounts and password-reset state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use stockroom_core::{Email, UserId};

/// A registered shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(skip)]
    pub password_reset: ResetState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile data for a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: Email,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Where a user stands in the password-reset flow.
///
/// Stored as three nullable columns (`otp hash`, `expiry`, `verified`) that
/// only ever change together. Modelling them as one enum makes the partial
/// combinations unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResetState {
    /// No reset in progress.
    #[default]
    Idle,
    /// A code was sent and has not been verified yet.
    Requested {
        otp_hash: String,
        expires_at: DateTime<Utc>,
    },
    /// The code was verified; a new password may be set.
    Verified {
        otp_hash: String,
        expires_at: DateTime<Utc>,
    },
}

impl ResetState {
    /// Decode the stored column triple.
    ///
    /// Returns `None` for combinations that can never be written, e.g. a
    /// hash without an expiry.
    #[must_use]
    pub fn from_columns(
        otp_hash: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        verified: bool,
    ) -> Option<Self> {
        match (otp_hash, expires_at, verified) {
            (None, None, false) => Some(Self::Idle),
            (Some(otp_hash), Some(expires_at), false) => Some(Self::Requested {
                otp_hash,
                expires_at,
            }),
            (Some(otp_hash), Some(expires_at), true) => Some(Self::Verified {
                otp_hash,
                expires_at,
            }),
            _ => None,
        }
    }

    /// Encode as the stored column triple.
    #[must_use]
    pub fn to_columns(&self) -> (Option<&str>, Option<DateTime<Utc>>, bool) {
        match self {
            Self::Idle => (None, None, false),
            Self::Requested {
                otp_hash,
                expires_at,
            } => (Some(otp_hash), Some(*expires_at), false),
            Self::Verified {
                otp_hash,
                expires_at,
            } => (Some(otp_hash), Some(*expires_at), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state_columns() {
        let at = Utc::now();
        let verified = ResetState::Verified {
            otp_hash: "abc".to_owned(),
            expires_at: at,
        };
        let (hash, expires, flag) = verified.to_columns();
        assert_eq!(
            ResetState::from_columns(hash.map(str::to_owned), expires, flag),
            Some(verified.clone())
        );
        assert_eq!(
            ResetState::from_columns(None, None, false),
            Some(ResetState::Idle)
        );
    }

    #[test]
    fn test_partial_columns_are_rejected() {
        assert_eq!(
            ResetState::from_columns(Some("abc".to_owned()), None, false),
            None
        );
        assert_eq!(ResetState::from_columns(None, None, true), None);
    }
}
