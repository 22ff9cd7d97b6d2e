//! PillWarden configuration system.
//!
//! TOML file at `~/.pillwarden/config.toml`. Every field has a default so
//! a missing file yields a usable config with all channels disabled.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PillWardenError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PillWardenConfig {
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: MessagingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl PillWardenConfig {
    /// Load config from the default path (~/.pillwarden/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PillWardenError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PillWardenError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PillWardenError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PillWarden home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pillwarden")
    }
}

/// SMTP email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_from_name() -> String {
    "PillWarden".into()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    /// Credentials present; the channel can be constructed.
    pub fn is_configured(&self) -> bool {
        !self.smtp_host.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Messaging provider configuration (Twilio-compatible REST API).
/// SMS and chat messages share the account; chat recipients are prefixed
/// with the provider's chat address convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Sender number in E.164 form, e.g. "+15550001111".
    #[serde(default)]
    pub from_number: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.twilio.com".into()
}
fn default_request_timeout() -> u64 {
    10
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl MessagingConfig {
    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty() && !self.from_number.is_empty()
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between dispatch ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Due-matching policy: "minute_exact" or "catch_up".
    #[serde(default = "default_match_policy")]
    pub match_policy: String,
    /// Hour (local) of the daily missed-dose sweep.
    #[serde(default = "default_missed_sweep_hour")]
    pub missed_sweep_hour: u32,
    /// Minutes after the scheduled time before a dose counts as missed.
    #[serde(default = "default_missed_grace")]
    pub missed_grace_minutes: i64,
    /// Hour (local) of the daily low-refill check.
    #[serde(default = "default_refill_check_hour")]
    pub refill_check_hour: u32,
}

fn default_tick_interval() -> u64 {
    60
}
fn default_match_policy() -> String {
    "minute_exact".into()
}
fn default_missed_sweep_hour() -> u32 {
    22
}
fn default_missed_grace() -> i64 {
    120
}
fn default_refill_check_hour() -> u32 {
    9
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            match_policy: default_match_policy(),
            missed_sweep_hour: default_missed_sweep_hour(),
            missed_grace_minutes: default_missed_grace(),
            refill_check_hour: default_refill_check_hour(),
        }
    }
}

/// Data store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Empty = ~/.pillwarden/pillwarden.db.
    #[serde(default)]
    pub db_path: String,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            PillWardenConfig::home_dir().join("pillwarden.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_channels_unconfigured() {
        let config = PillWardenConfig::default();
        assert!(!config.email.is_configured());
        assert!(!config.sms.is_configured());
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.scheduler.match_policy, "minute_exact");
    }

    #[test]
    fn parse_partial_toml() {
        let config: PillWardenConfig = toml::from_str(
            r#"
            [email]
            smtp_host = "smtp.example.com"
            username = "warden@example.com"
            password = "hunter2"

            [scheduler]
            tick_interval_secs = 30
            "#,
        )
        .unwrap();
        assert!(config.email.is_configured());
        assert_eq!(config.email.smtp_port, 587);
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert!(!config.sms.is_configured());
    }
}
