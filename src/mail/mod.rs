//! Outbound mail.
//!
//! Password reset links are delivered through a [`Mailer`]. With `SMTP_HOST`
//! configured the [`smtp::SmtpMailer`] sends real mail; otherwise the
//! [`LogMailer`] only records the delivery in the log. Tokens are masked in
//! every log line.

pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::AppConfig;
pub use smtp::{SmtpMailer, SmtpSettings};

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a password reset token to `to`. `link` is present when a
    /// reset link base is configured.
    async fn send_password_reset(
        &self,
        to: &str,
        token: &str,
        link: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), MailError>;
}

/// Mailer that writes a log line per delivery.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(
        &self,
        to: &str,
        token: &str,
        link: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), MailError> {
        tracing::warn!(
            to = %to,
            token = %mask_token(token),
            has_link = link.is_some(),
            expires_at = %expires_at.to_rfc3339(),
            "password reset delivery"
        );
        Ok(())
    }
}

/// Pick the mailer for this configuration.
pub fn mailer_from_config(config: &AppConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match SmtpSettings::from_config(config) {
        Some(settings) => Ok(Arc::new(SmtpMailer::new(&settings)?)),
        None => {
            tracing::info!("SMTP_HOST not set; password reset mail is written to the log");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// First six and last four characters; short tokens are fully starred.
pub(crate) fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.trim().chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Build the reset link for `token` from an optional base URL.
pub fn reset_link(base: Option<&str>, token: &str) -> Option<String> {
    let base = base.map(str::trim).filter(|b| !b.is_empty())?;
    let mut url = url::Url::parse(base).ok()?;
    url.query_pairs_mut().append_pair("token", token);
    Some(url.to_string())
}
