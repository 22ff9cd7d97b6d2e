//! Email channel: SMTP sending via async lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use pillwarden_core::config::EmailConfig;
use pillwarden_core::error::{PillWardenError, Result};
use pillwarden_core::Channel;

/// SMTP-backed email channel. Disabled (never fatal) when the relay
/// cannot be constructed or credentials are missing.
pub struct EmailChannel {
    config: EmailConfig,
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        let mailer = if config.is_configured() {
            match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host) {
                Ok(builder) => Some(
                    builder
                        .port(config.smtp_port)
                        .credentials(Credentials::new(
                            config.username.clone(),
                            config.password.clone(),
                        ))
                        .timeout(Some(std::time::Duration::from_secs(15)))
                        .build(),
                ),
                Err(e) => {
                    tracing::warn!("Email disabled: SMTP relay setup failed: {e}");
                    None
                }
            }
        } else {
            tracing::info!("Email disabled: SMTP credentials not configured");
            None
        };
        Self { config, mailer }
    }

    fn from_mailbox(&self) -> Result<Mailbox> {
        format!("{} <{}>", self.config.from_name, self.config.username)
            .parse()
            .map_err(|e| PillWardenError::Config(format!("Invalid from address: {e}")))
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn enabled(&self) -> bool {
        self.mailer.is_some()
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let mailer = self
            .mailer
            .as_ref()
            .ok_or_else(|| PillWardenError::Config("email channel disabled".into()))?;

        let to: Mailbox = recipient.parse().map_err(|e| {
            PillWardenError::RecipientInvalid(format!("invalid email address '{recipient}': {e}"))
        })?;

        let message = Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| PillWardenError::Channel(format!("Build email: {e}")))?;

        mailer
            .send(message)
            .await
            .map_err(|e| classify_smtp(&e))?;

        tracing::info!("Email sent to {recipient}");
        Ok(())
    }
}

/// Auth rejections are provider errors; everything else from the
/// transport is a channel (network/TLS) failure.
fn classify_smtp(e: &lettre::transport::smtp::Error) -> PillWardenError {
    if e.is_permanent() {
        PillWardenError::Provider(format!("SMTP rejected: {e}"))
    } else {
        PillWardenError::Channel(format!("SMTP send: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_disable_channel() {
        let channel = EmailChannel::new(EmailConfig::default());
        assert!(!channel.enabled());
    }

    #[tokio::test]
    async fn disabled_channel_send_is_a_config_error() {
        let channel = EmailChannel::new(EmailConfig::default());
        let err = channel
            .send("asha@example.com", "Reminder", "take your pill")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn bad_recipient_is_classified() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".into(),
            username: "warden@example.com".into(),
            password: "hunter2".into(),
            ..Default::default()
        };
        let channel = EmailChannel::new(config);
        assert!(channel.enabled());
        let err = channel
            .send("not an address", "Reminder", "body")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "recipient_invalid");
    }
}
