//! SMTP delivery through `lettre`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{MailError, Mailer, mask_token};
use crate::config::AppConfig;

pub const RESET_SUBJECT: &str = "Password reset instructions";

/// Connection settings for [`SmtpMailer`].
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Implicit TLS from the first byte
    pub ssl: bool,
    /// Upgrade a plain connection with STARTTLS; ignored when `ssl` is set
    pub starttls: bool,
    pub timeout: Duration,
    pub from: String,
}

impl SmtpSettings {
    /// `None` when `SMTP_HOST` is not configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())?;
        Some(Self {
            host: host.to_string(),
            port: config.smtp_port,
            username: config.smtp_username.clone(),
            password: config.smtp_password.clone(),
            ssl: config.smtp_ssl,
            starttls: config.smtp_starttls,
            timeout: Duration::from_secs(config.smtp_timeout_seconds),
            from: config.email_from.clone(),
        })
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer").field("from", &self.from).finish()
    }
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| MailError(format!("invalid EMAIL_FROM '{}': {e}", settings.from)))?;

        let builder = if settings.ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError(e.to_string()))?
        } else if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| MailError(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let mut builder = builder
            .port(settings.port)
            .timeout(Some(settings.timeout));
        if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                settings.password.clone().unwrap_or_default(),
            ));
        }

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            ssl = settings.ssl,
            starttls = settings.starttls,
            "SMTP mailer configured"
        );
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Build the reset message. With a link the mail carries a plain and an
    /// HTML part; without one the token is sent in plain text only.
    pub fn reset_message(
        &self,
        to: &str,
        token: &str,
        link: Option<&str>,
    ) -> Result<Message, MailError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| MailError(format!("invalid recipient: {e}")))?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(RESET_SUBJECT);

        let message = match link {
            Some(link) => {
                let text = format!(
                    "We received a request to reset your password.\n\n\
                     Click the link below (valid for a limited time):\n{link}\n\n\
                     If you did not request this, you can ignore this email."
                );
                let html = format!(
                    "<p>We received a request to reset your password.</p>\
                     <p><a href=\"{link}\">Reset your password</a></p>\
                     <p style=\"color:#666\">If you did not request this, you can ignore this email.</p>"
                );
                builder.multipart(
                    MultiPart::alternative()
                        .singlepart(SinglePart::plain(text))
                        .singlepart(SinglePart::html(html)),
                )
            }
            None => builder.header(ContentType::TEXT_PLAIN).body(format!(
                "We received a request to reset your password.\n\n\
                 Use the following token in the application (valid for a limited time):\n\
                 {token}\n\n\
                 If you did not request this, you can ignore this email."
            )),
        };
        message.map_err(|e| MailError(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_password_reset(
        &self,
        to: &str,
        token: &str,
        link: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), MailError> {
        let message = self.reset_message(to, token, link)?;
        match self.transport.send(message).await {
            Ok(_) => {
                tracing::info!(
                    to = %to,
                    token = %mask_token(token),
                    expires_at = %expires_at.to_rfc3339(),
                    "password reset email sent"
                );
                Ok(())
            }
            Err(error) => {
                tracing::error!(to = %to, token = %mask_token(token), %error, "password reset email failed");
                Err(MailError(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "127.0.0.1".to_string(),
            port: 2525,
            username: None,
            password: None,
            ssl: false,
            starttls: false,
            timeout: Duration::from_secs(1),
            from: "Detecktiv <no-reply@detecktiv.io>".to_string(),
        }
    }

    #[test]
    fn settings_require_a_host() {
        let mut config = AppConfig::default();
        assert!(SmtpSettings::from_config(&config).is_none());

        config.smtp_host = Some("  ".to_string());
        assert!(SmtpSettings::from_config(&config).is_none());

        config.smtp_host = Some("smtp.example.com".to_string());
        config.smtp_port = 2587;
        let settings = SmtpSettings::from_config(&config).unwrap();
        assert_eq!(settings.host, "smtp.example.com");
        assert_eq!(settings.port, 2587);
        assert!(settings.starttls);
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let err = SmtpMailer::new(&SmtpSettings {
            from: "not an address".to_string(),
            ..settings()
        })
        .unwrap_err();
        assert!(err.to_string().contains("EMAIL_FROM"));
    }

    #[test]
    fn reset_message_with_link_has_plain_and_html_parts() {
        let mailer = SmtpMailer::new(&settings()).unwrap();
        let message = mailer
            .reset_message(
                "user@example.com",
                "tok",
                Some("https://app.detecktiv.io/reset?token=tok"),
            )
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Password reset instructions"));
        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn reset_message_without_link_is_plain_text() {
        let mailer = SmtpMailer::new(&settings()).unwrap();
        let message = mailer
            .reset_message("user@example.com", "reset-token-value", None)
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("text/plain"));
        assert!(!raw.contains("text/html"));
        assert!(raw.contains("reset-token-value"));
    }

    #[test]
    fn bad_recipient_is_an_error() {
        let mailer = SmtpMailer::new(&settings()).unwrap();
        assert!(mailer.reset_message("nobody", "t", None).is_err());
    }
}
