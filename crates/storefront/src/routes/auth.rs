//! Authentication route handlers.
//!
//! Handles registration, login, logout and the OTP password reset. Signing
//! in cycles the session id before storing the user, so a session id known
//! before login is useless afterwards.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use super::{ApiJson, ApiResponse};
use crate::db::Store;
use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{RequireAuth, clear_current_user, set_current_user};
use crate::models::{CurrentUser, User};
use crate::services::auth::AuthError;
use crate::services::{AuthService, PasswordResetService};
use crate::state::AppState;

type UserResponse = Json<ApiResponse<User>>;

/// Registration body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Login body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Forgot password body.
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// OTP check body.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

/// New password body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub new_password: String,
}

fn session_error(err: &tower_sessions::session::Error) -> AppError {
    AppError::Internal(format!("session error: {err}"))
}

/// Store `user` in a fresh session id.
async fn sign_in(session: &Session, user: &User) -> Result<()> {
    session
        .cycle_id()
        .await
        .map_err(|e| session_error(&e))?;
    set_current_user(
        session,
        &CurrentUser {
            id: user.id,
            email: user.email.clone(),
        },
    )
    .await
    .map_err(|e| session_error(&e))?;
    set_sentry_user(&user.id, Some(user.email.as_str()));
    Ok(())
}

/// POST /auth/register
#[instrument(skip_all)]
pub async fn register<S: Store>(
    State(state): State<AppState<S>>,
    session: Session,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, UserResponse)> {
    let user = AuthService::new(state.store())
        .register(
            &request.email,
            &request.password,
            request.first_name.as_deref(),
            request.last_name.as_deref(),
        )
        .await?;
    sign_in(&session, &user).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("User registered successfully", user),
    ))
}

/// POST /auth/login
#[instrument(skip_all)]
pub async fn login<S: Store>(
    State(state): State<AppState<S>>,
    session: Session,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<UserResponse> {
    let user = AuthService::new(state.store())
        .login(&request.email, &request.password)
        .await?;
    sign_in(&session, &user).await?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(ApiResponse::with_message("Login successful", user))
}

/// POST /auth/logout
#[instrument(skip_all)]
pub async fn logout(session: Session) -> Result<Json<ApiResponse<()>>> {
    clear_current_user(&session)
        .await
        .map_err(|e| session_error(&e))?;
    session.flush().await.map_err(|e| session_error(&e))?;
    clear_sentry_user();
    Ok(ApiResponse::with_message("Logged out successfully", ()))
}

/// GET /auth/me
#[instrument(skip_all, fields(user_id = %current.id))]
pub async fn me<S: Store>(
    State(state): State<AppState<S>>,
    RequireAuth(current): RequireAuth,
) -> Result<UserResponse> {
    let user = AuthService::new(state.store())
        .get_user(current.id)
        .await
        .map_err(|e| match e {
            // The account is gone; the session is stale.
            AuthError::UserNotFound => AppError::Unauthorized("Not authorized".to_string()),
            other => other.into(),
        })?;
    Ok(ApiResponse::ok(user))
}

fn reset_service<S: Store>(state: &AppState<S>) -> PasswordResetService<'_, S> {
    PasswordResetService::new(
        state.store(),
        state.mailer(),
        state.clock(),
        state.config().otp_ttl(),
    )
}

/// POST /auth/forgot-password
#[instrument(skip_all)]
pub async fn forgot_password<S: Store>(
    State(state): State<AppState<S>>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>> {
    reset_service(&state).request_reset(&request.email).await?;
    Ok(ApiResponse::with_message("OTP sent to your email", ()))
}

/// POST /auth/verify-otp
#[instrument(skip_all)]
pub async fn verify_otp<S: Store>(
    State(state): State<AppState<S>>,
    ApiJson(request): ApiJson<VerifyOtpRequest>,
) -> Result<Json<ApiResponse<()>>> {
    reset_service(&state)
        .verify_otp(&request.email, &request.otp)
        .await?;
    Ok(ApiResponse::with_message("OTP verified successfully", ()))
}

/// PATCH /auth/reset-password
///
/// On success the shopper is signed in under a new session id.
#[instrument(skip_all)]
pub async fn reset_password<S: Store>(
    State(state): State<AppState<S>>,
    session: Session,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> Result<UserResponse> {
    let user = reset_service(&state)
        .reset_password(&request.email, &request.new_password)
        .await?;
    sign_in(&session, &user).await?;
    Ok(ApiResponse::with_message("Password reset successfully", user))
}
