//! Schedule evaluator: decides which doses are due at a given instant.
//!
//! Due-dose materialization is idempotent: the store's unique
//! (schedule, date) key guarantees at most one dose log per day, so
//! re-evaluating within the same minute (or after a restart) can never
//! produce a duplicate row or a repeat notification for a resolved dose.

use chrono::{Datelike, NaiveDateTime, Timelike};

use pillwarden_core::error::Result;
use pillwarden_core::model::{DoseLog, DoseStatus, Frequency};
use pillwarden_store::{ScheduleContext, Store};

/// How a schedule's time-of-day is compared against "now".
///
/// The source variants of this system disagreed on due-matching (string
/// equality vs structured comparison), so the strategy is an explicit
/// policy rather than an implicit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Due only in the exact minute of the scheduled time. Faithful to
    /// the classic one-minute-tick deployment; a tick skipped across the
    /// minute boundary misses the dose until the daily sweep.
    MinuteExact,
    /// Due from the scheduled minute onward for the rest of the day,
    /// provided no dose log exists yet. Tolerates coarse or delayed
    /// ticks at the cost of late notifications.
    CatchUp,
}

impl MatchPolicy {
    /// Parse from config ("minute_exact" / "catch_up"); unknown values
    /// fall back to minute-exact.
    pub fn from_config(s: &str) -> Self {
        match s {
            "catch_up" => Self::CatchUp,
            "minute_exact" => Self::MinuteExact,
            other => {
                tracing::warn!("Unknown match_policy '{other}', using minute_exact");
                Self::MinuteExact
            }
        }
    }
}

pub struct Evaluator {
    policy: MatchPolicy,
}

impl Evaluator {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// All doses due at `now`, each materialized as the single pending
    /// dose log for its (schedule, day). Returned with the joined context
    /// the coordinator needs for recipients and message content.
    pub fn due_doses(
        &self,
        store: &Store,
        now: NaiveDateTime,
    ) -> Result<Vec<(DoseLog, ScheduleContext)>> {
        let today = now.date();
        let weekday = today.weekday();
        let mut due = Vec::new();

        for ctx in store.active_schedule_contexts()? {
            // As-needed never auto-generates due entries.
            if ctx.schedule.frequency == Frequency::AsNeeded {
                continue;
            }
            if !ctx.schedule.frequency.matches_day(weekday) {
                continue;
            }
            if !ctx.medication.is_active_on(today) {
                continue;
            }
            if !self.time_matches(ctx.schedule.time_of_day, now) {
                continue;
            }

            let dose = store.find_or_create_dose_log(&ctx.schedule, today)?;
            // Anything past pending was already handled today; the
            // dedup invariant that prevents repeat notifications.
            if dose.status != DoseStatus::Pending {
                continue;
            }
            due.push((dose, ctx));
        }

        Ok(due)
    }

    fn time_matches(&self, scheduled: chrono::NaiveTime, now: NaiveDateTime) -> bool {
        let now_minute = (now.hour(), now.minute());
        let sched_minute = (scheduled.hour(), scheduled.minute());
        match self.policy {
            MatchPolicy::MinuteExact => sched_minute == now_minute,
            MatchPolicy::CatchUp => sched_minute <= now_minute,
        }
    }
}
