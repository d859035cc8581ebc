//! User repository for database operations.
//!
//! The three password-reset columns are only ever written together, from a
//! single [`ResetState`], and a table constraint rejects partial
//! combinations.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use stockroom_core::{Email, UserId};

use super::{PgStore, RepositoryError, UserStore, conflict_on_unique};
use crate::models::{NewUser, ResetState, User};

const USER_COLUMNS: &str = r"
    id, email, first_name, last_name,
    password_reset_otp, password_reset_otp_expires, password_reset_verified,
    created_at, updated_at
";

#[derive(FromRow)]
struct UserRow {
    id: UserId,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    password_reset_otp: Option<String>,
    password_reset_otp_expires: Option<DateTime<Utc>>,
    password_reset_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct UserWithHashRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        let password_reset = ResetState::from_columns(
            row.password_reset_otp,
            row.password_reset_otp_expires,
            row.password_reset_verified,
        )
        .ok_or_else(|| {
            RepositoryError::DataCorruption(format!(
                "user {} has partial password reset state",
                row.id
            ))
        })?;

        Ok(Self {
            id: row.id,
            email,
            first_name: row.first_name,
            last_name: row.last_name,
            password_reset,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser, password_hash: &str) -> Result<User, RepositoryError> {
        let row: UserRow = sqlx::query_as(&format!(
            r"
            INSERT INTO storefront.user (email, first_name, last_name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(&user.email)
        .bind(user.first_name.as_deref())
        .bind(user.last_name.as_deref())
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_on_unique("email"))?;

        row.try_into()
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM storefront.user WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn get_user_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM storefront.user WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        let row: Option<UserWithHashRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM storefront.user WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<_, RepositoryError> {
            Ok((User::try_from(r.user)?, r.password_hash))
        })
        .transpose()
    }

    async fn save_reset_state(
        &self,
        user_id: UserId,
        state: &ResetState,
    ) -> Result<(), RepositoryError> {
        let (otp_hash, expires_at, verified) = state.to_columns();
        let result = sqlx::query(
            r"
            UPDATE storefront.user
            SET password_reset_otp = $2,
                password_reset_otp_expires = $3,
                password_reset_verified = $4,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(user_id)
        .bind(otp_hash)
        .bind(expires_at)
        .bind(verified)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r"
            UPDATE storefront.user
            SET password_hash = $2,
                password_reset_otp = NULL,
                password_reset_otp_expires = NULL,
                password_reset_verified = FALSE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(user_id)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }
}
