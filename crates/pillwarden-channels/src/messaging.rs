//! SMS and chat channels over one Twilio-compatible messaging API.
//!
//! Both media share the account and sender number; chat messages differ
//! only in the provider's recipient address prefix. Phone numbers are
//! validated locally before any provider call so a malformed recipient
//! never costs an API request.

use std::sync::Arc;

use async_trait::async_trait;

use pillwarden_core::config::MessagingConfig;
use pillwarden_core::error::{PillWardenError, Result};
use pillwarden_core::Channel;

/// Recipient address prefix for chat messages (Twilio WhatsApp convention).
const CHAT_PREFIX: &str = "whatsapp:";

/// Shared messaging provider client.
pub struct MessagingApi {
    config: MessagingConfig,
    client: reqwest::Client,
}

impl MessagingApi {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn configured(&self) -> bool {
        self.config.is_configured()
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    /// POST one message. `from`/`to` are already in provider form
    /// (E.164, optionally chat-prefixed).
    async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("From", from), ("To", to), ("Body", body)])
            .timeout(std::time::Duration::from_secs(
                self.config.request_timeout_secs,
            ))
            .send()
            .await
            .map_err(|e| PillWardenError::Channel(format!("Messaging API request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(classify_api_error(status, &error_text))
    }
}

/// Map provider HTTP failures onto the error taxonomy. Twilio-style
/// error bodies carry a numeric code; 21211 and 21614 mean the `To`
/// number itself was rejected.
fn classify_api_error(status: reqwest::StatusCode, body: &str) -> PillWardenError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(|c| c.as_i64());
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or(body)
        .to_string();

    match (status.as_u16(), code) {
        (400, Some(21211 | 21614)) => {
            PillWardenError::RecipientInvalid(format!("provider rejected recipient: {message}"))
        }
        (401 | 403, _) => PillWardenError::Provider(format!("auth rejected ({status}): {message}")),
        (429, _) => PillWardenError::Provider(format!("rate limited: {message}")),
        _ => PillWardenError::Provider(format!("API error {status}: {message}")),
    }
}

/// Normalize a phone number to E.164. Spaces, dashes and parentheses are
/// tolerated; anything else is an invalid recipient.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    let ok = cleaned.starts_with('+')
        && (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit());
    if ok {
        Ok(cleaned)
    } else {
        Err(PillWardenError::RecipientInvalid(format!(
            "invalid phone number '{raw}'"
        )))
    }
}

/// Plain SMS channel.
pub struct SmsChannel {
    api: Arc<MessagingApi>,
}

impl SmsChannel {
    pub fn new(api: Arc<MessagingApi>) -> Self {
        if !api.configured() {
            tracing::info!("SMS disabled: messaging credentials not configured");
        }
        Self { api }
    }
}

#[async_trait]
impl Channel for SmsChannel {
    fn name(&self) -> &str {
        "sms"
    }

    fn enabled(&self) -> bool {
        self.api.configured()
    }

    async fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<()> {
        let to = normalize_phone(recipient)?;
        self.api
            .send_message(&self.api.config.from_number, &to, body)
            .await?;
        tracing::info!("SMS sent to {to}");
        Ok(())
    }
}

/// Chat-message channel: same provider account as SMS, recipient and
/// sender carry the chat address prefix.
pub struct ChatChannel {
    api: Arc<MessagingApi>,
}

impl ChatChannel {
    pub fn new(api: Arc<MessagingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Channel for ChatChannel {
    fn name(&self) -> &str {
        "chat"
    }

    fn enabled(&self) -> bool {
        self.api.configured()
    }

    async fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<()> {
        let to = normalize_phone(recipient)?;
        let from = format!("{CHAT_PREFIX}{}", self.api.config.from_number);
        let to = format!("{CHAT_PREFIX}{to}");
        self.api.send_message(&from, &to, body).await?;
        tracing::info!("Chat message sent to {to}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+15550002222").unwrap(), "+15550002222");
        assert_eq!(
            normalize_phone("+1 (555) 000-2222").unwrap(),
            "+15550002222"
        );
        for bad in ["5550002222", "+1-555-CALL-NOW", "not-a-phone", "+12", ""] {
            let err = normalize_phone(bad).unwrap_err();
            assert_eq!(err.kind(), "recipient_invalid");
            assert!(err.to_string().contains("invalid phone"));
        }
    }

    #[tokio::test]
    async fn malformed_recipient_short_circuits_before_api_call() {
        // Unconfigured API: a provider call would fail loudly, so getting
        // RecipientInvalid proves the local validation fired first.
        let api = Arc::new(MessagingApi::new(MessagingConfig::default()));
        let channel = SmsChannel::new(api);
        let err = channel.send("not-a-phone", "", "body").await.unwrap_err();
        assert_eq!(err.kind(), "recipient_invalid");
    }

    #[test]
    fn api_error_classification() {
        let invalid = classify_api_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"code": 21211, "message": "The 'To' number is not a valid phone number."}"#,
        );
        assert_eq!(invalid.kind(), "recipient_invalid");
        assert!(invalid.to_string().contains("not a valid phone number"));

        // A 400 without a recipient error code is a provider problem.
        let other = classify_api_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"code": 21602, "message": "Message body is required."}"#,
        );
        assert_eq!(other.kind(), "provider");

        let auth = classify_api_error(reqwest::StatusCode::UNAUTHORIZED, "bad token");
        assert_eq!(auth.kind(), "provider");

        let limited = classify_api_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(limited.kind(), "provider");
    }

    #[test]
    fn messages_url_shape() {
        let api = MessagingApi::new(MessagingConfig {
            account_sid: "AC123".into(),
            auth_token: "tok".into(),
            from_number: "+15550001111".into(),
            ..Default::default()
        });
        assert_eq!(
            api.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }
}
