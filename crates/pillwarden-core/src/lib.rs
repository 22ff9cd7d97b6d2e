//! # PillWarden Core
//! Shared foundation: domain model, configuration, errors, channel contract.

pub mod channel;
pub mod config;
pub mod error;
pub mod model;

pub use channel::Channel;
pub use config::PillWardenConfig;
pub use error::{PillWardenError, Result};
