//! Error taxonomy. Every per-channel and per-dose failure is classified
//! here so the scheduler loop can convert it into a recorded outcome
//! instead of crashing.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PillWardenError>;

#[derive(Debug, Error)]
pub enum PillWardenError {
    /// Channel credentials absent or malformed. Non-fatal: the channel
    /// reports itself disabled and dispatch skips it.
    #[error("configuration: {0}")]
    Config(String),

    /// Unparseable phone number or email address. Skips that channel for
    /// that dose only.
    #[error("invalid recipient: {0}")]
    RecipientInvalid(String),

    /// Provider-level failure: auth, rate limit, rejected payload.
    #[error("provider: {0}")]
    Provider(String),

    /// Transport-level channel failure (network, timeout, TLS).
    #[error("channel: {0}")]
    Channel(String),

    /// Data-store read/write failure. Rolls back the dose's partial
    /// state; the dose stays pending and is retried next tick.
    #[error("persistence: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PillWardenError {
    /// Short classification label used in notification records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::RecipientInvalid(_) => "recipient_invalid",
            Self::Provider(_) => "provider",
            Self::Channel(_) => "channel",
            Self::Persistence(_) => "persistence",
            Self::Io(_) => "io",
        }
    }
}
