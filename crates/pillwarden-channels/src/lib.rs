//! # PillWarden Channels
//! Notification channel implementations behind the uniform
//! [`Channel`](pillwarden_core::Channel) contract.
//!
//! Channel construction never crashes the process: absent or malformed
//! provider credentials produce a disabled channel the coordinator skips.

pub mod email;
pub mod messaging;

use std::sync::Arc;

use pillwarden_core::{Channel, PillWardenConfig};

pub use email::EmailChannel;
pub use messaging::{ChatChannel, MessagingApi, SmsChannel};

/// Build every channel from config. Unconfigured providers yield disabled
/// channels; the returned set always contains all three media so dispatch
/// outcomes name them consistently.
pub fn build_channels(config: &PillWardenConfig) -> Vec<Arc<dyn Channel>> {
    let api = Arc::new(MessagingApi::new(config.sms.clone()));
    vec![
        Arc::new(EmailChannel::new(config.email.clone())),
        Arc::new(SmsChannel::new(api.clone())),
        Arc::new(ChatChannel::new(api)),
    ]
}
