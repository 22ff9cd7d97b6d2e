//! # PillWarden Engine
//!
//! The reminder dispatch engine. One tick: evaluate which doses are due,
//! fan each out across the enabled channels, record every attempt in the
//! audit trail, and commit the dose status transition; one transaction
//! per dose, nothing escaping to crash the loop.
//!
//! ```text
//! Scheduler loop (tokio interval, ticks serialized)
//!   ├── Evaluator: active schedules → due (schedule, day) dose logs
//!   │     dedup key: UNIQUE (schedule_id, scheduled_date)
//!   ├── Coordinator: per dose → build message → every enabled channel
//!   │     ├── Email (SMTP)
//!   │     ├── SMS   (messaging API)
//!   │     └── Chat  (messaging API, prefixed recipients)
//!   ├── Audit: one NotificationRecord per channel attempt
//!   └── Store: status + records committed atomically per dose
//! ```

pub mod coordinator;
pub mod engine;
pub mod evaluator;

pub use coordinator::{DispatchCoordinator, DoseOutcome};
pub use engine::{spawn_reminder_loop, ReminderEngine, TickSummary};
pub use evaluator::{Evaluator, MatchPolicy};
