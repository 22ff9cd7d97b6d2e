//! # PillWarden Store
//!
//! SQLite-backed persistence. The reminder engine consumes this crate
//! through a narrow contract: active schedules due now, dose-log
//! materialization, and a single-transaction commit per dispatched dose
//! (status transition + audit rows, atomically).

mod schema;
mod store;

pub use store::{ScheduleContext, Store};
