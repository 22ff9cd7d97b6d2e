//! Channel contract. One implementation per notification medium.
//!
//! Construction is fallible but non-fatal: a channel built from missing
//! or malformed credentials reports `enabled() == false` and the dispatch
//! coordinator skips it.

use async_trait::async_trait;

use crate::error::Result;

/// A notification medium (email, SMS, chat-message).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name as recorded in the audit trail.
    fn name(&self) -> &str;

    /// Whether provider credentials were successfully configured.
    /// Disabled channels are skipped, never an error.
    fn enabled(&self) -> bool;

    /// Deliver one message. Recipient format is channel-specific
    /// (email address, E.164 phone number). All provider failures come
    /// back as classified errors; nothing panics.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}
