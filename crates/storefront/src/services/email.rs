//! Email service for transactional mail.
//!
//! Messages are rendered from Askama templates (HTML and plain text) and
//! handed to a [`Mailer`]. Production uses [`SmtpMailer`] over lettre;
//! [`OutboxMailer`] keeps messages in memory for tests and local runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use askama::Template;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use stockroom_core::Email;

use crate::config::EmailConfig;

/// Store name used in email copy.
const STORE_NAME: &str = "Stockroom";

/// Subject line of the password reset email.
pub const PASSWORD_RESET_SUBJECT: &str = "Password Reset OTP";

/// HTML template for the password reset code.
#[derive(Template)]
#[template(path = "email/password_reset.html")]
struct PasswordResetEmailHtml<'a> {
    name: &'a str,
    code: &'a str,
    valid_minutes: i64,
    store_name: &'a str,
}

/// Plain text template for the password reset code.
#[derive(Template)]
#[template(path = "email/password_reset.txt")]
struct PasswordResetEmailText<'a> {
    name: &'a str,
    code: &'a str,
    valid_minutes: i64,
    store_name: &'a str,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// No transport is configured.
    #[error("email delivery is not configured")]
    NotConfigured,
}

/// A rendered multipart email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Email,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Render the password reset email.
///
/// # Errors
///
/// Returns `EmailError::Template` if a template fails to render.
pub fn password_reset_email(
    to: &Email,
    name: &str,
    code: &str,
    valid_minutes: i64,
) -> Result<OutgoingEmail, EmailError> {
    let html_body = PasswordResetEmailHtml {
        name,
        code,
        valid_minutes,
        store_name: STORE_NAME,
    }
    .render()?;
    let text_body = PasswordResetEmailText {
        name,
        code,
        valid_minutes,
        store_name: STORE_NAME,
    }
    .render()?;

    Ok(OutgoingEmail {
        to: to.clone(),
        subject: PASSWORD_RESET_SUBJECT.to_owned(),
        text_body,
        html_body,
    })
}

/// Boxed future returned by [`Mailer::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EmailError>> + Send + 'a>>;

/// Something that can deliver an email.
///
/// Object safe so application state can hold any implementation behind an
/// `Arc<dyn Mailer>`.
pub trait Mailer: Send + Sync {
    fn send<'a>(&'a self, email: &'a OutgoingEmail) -> SendFuture<'a>;
}

// =============================================================================
// SMTP
// =============================================================================

/// SMTP delivery via lettre.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// Create a new SMTP mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }

    async fn send_multipart(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(email
                .to
                .as_str()
                .parse()
                .map_err(|_| EmailError::InvalidAddress(email.to.to_string()))?)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )?;

        self.transport.send(message).await?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent successfully");
        Ok(())
    }
}

impl Mailer for SmtpMailer {
    fn send<'a>(&'a self, email: &'a OutgoingEmail) -> SendFuture<'a> {
        Box::pin(self.send_multipart(email))
    }
}

// =============================================================================
// In-memory and disabled
// =============================================================================

/// Keeps every sent message in memory.
///
/// Clones share the same outbox.
#[derive(Debug, Clone, Default)]
pub struct OutboxMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl OutboxMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// The most recent message sent to `to`.
    #[must_use]
    pub fn last_to(&self, to: &Email) -> Option<OutgoingEmail> {
        self.sent().into_iter().rev().find(|m| m.to == *to)
    }
}

impl Mailer for OutboxMailer {
    fn send<'a>(&'a self, email: &'a OutgoingEmail) -> SendFuture<'a> {
        Box::pin(async move {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(email.clone());
            }
            tracing::debug!(to = %email.to, subject = %email.subject, "Email captured in outbox");
            Ok(())
        })
    }
}

/// Refuses every message. Used when SMTP is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn send<'a>(&'a self, _email: &'a OutgoingEmail) -> SendFuture<'a> {
        Box::pin(async { Err(EmailError::NotConfigured) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_password_reset_email_mentions_code_and_validity() {
        let to = Email::parse("ada@example.com").unwrap();
        let email = password_reset_email(&to, "Ada", "482913", 10).unwrap();

        assert_eq!(email.subject, "Password Reset OTP");
        assert!(email.text_body.contains("482913"));
        assert!(email.text_body.contains("10 minutes"));
        assert!(email.html_body.contains("482913"));
        assert!(email.html_body.contains("10 minutes"));
    }

    #[test]
    fn test_password_reset_email_escapes_html_name() {
        let to = Email::parse("ada@example.com").unwrap();
        let email = password_reset_email(&to, "<b>Ada</b>", "482913", 10).unwrap();
        assert!(!email.html_body.contains("<b>Ada</b>"));
    }

    #[tokio::test]
    async fn test_outbox_records_messages() {
        let outbox = OutboxMailer::new();
        let to = Email::parse("ada@example.com").unwrap();
        let email = password_reset_email(&to, "Ada", "111111", 10).unwrap();

        outbox.send(&email).await.unwrap();
        assert_eq!(outbox.sent().len(), 1);
        assert_eq!(outbox.last_to(&to), Some(email));
    }

    #[tokio::test]
    async fn test_disabled_mailer_fails() {
        let to = Email::parse("ada@example.com").unwrap();
        let email = password_reset_email(&to, "Ada", "111111", 10).unwrap();
        assert!(matches!(
            DisabledMailer.send(&email).await,
            Err(EmailError::NotConfigured)
        ));
    }
}
