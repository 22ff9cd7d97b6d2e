//! The reminder engine: ties evaluator and coordinator together and
//! drives them from a recurring tokio timer.
//!
//! Per-dose isolation: a channel failure becomes a recorded outcome, a
//! persistence failure leaves that dose pending for the next tick, and
//! neither aborts the remaining doses in the tick. Ticks never overlap:
//! the loop awaits each tick to completion and the interval skips missed
//! firings instead of bursting.

use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use tokio::sync::Mutex;

use pillwarden_core::config::SchedulerConfig;
use pillwarden_core::model::{DoseStatus, NotificationRecord};
use pillwarden_core::Channel;
use pillwarden_store::Store;

use crate::coordinator::DispatchCoordinator;
use crate::evaluator::{Evaluator, MatchPolicy};

/// What one tick did. Logged per tick and returned for tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub notified: usize,
    pub failed: usize,
    pub legacy_pills: usize,
    pub swept_missed: usize,
    pub refill_alerts: usize,
    pub persistence_errors: usize,
}

pub struct ReminderEngine {
    store: Arc<Store>,
    evaluator: Evaluator,
    coordinator: DispatchCoordinator,
    config: SchedulerConfig,
    last_sweep: Option<NaiveDate>,
    last_refill_check: Option<NaiveDate>,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<Store>,
        channels: Vec<Arc<dyn Channel>>,
        config: SchedulerConfig,
    ) -> Self {
        let policy = MatchPolicy::from_config(&config.match_policy);
        Self {
            store,
            evaluator: Evaluator::new(policy),
            coordinator: DispatchCoordinator::new(channels),
            config,
            last_sweep: None,
            last_refill_check: None,
        }
    }

    /// One dispatch tick: evaluate due doses, fan each out, commit each
    /// outcome in its own transaction, then run the legacy pill pass and
    /// any daily jobs whose hour has arrived.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickSummary {
        let mut summary = TickSummary::default();

        match self.evaluator.due_doses(&self.store, now) {
            Ok(due) => {
                summary.due = due.len();
                for (dose, ctx) in due {
                    let outcome = self.coordinator.dispatch(&dose, &ctx).await;
                    match outcome.status {
                        DoseStatus::Notified => summary.notified += 1,
                        _ => summary.failed += 1,
                    }
                    if let Err(e) = self.store.commit_dispatch(
                        &outcome.dose_log_id,
                        outcome.status,
                        &outcome.records,
                    ) {
                        // Dose stays pending; next tick retries
                        // (at-least-once, deduped at the day level).
                        tracing::error!("Commit failed for dose {}: {e}", outcome.dose_log_id);
                        summary.persistence_errors += 1;
                    }
                }
            }
            Err(e) => tracing::error!("Due-dose evaluation failed: {e}"),
        }

        self.legacy_pill_pass(now, &mut summary).await;
        self.daily_jobs(now, &mut summary).await;

        if summary != TickSummary::default() {
            tracing::info!(
                "Tick {}: {} due, {} notified, {} failed, {} legacy, {} missed, {} refill alerts",
                now.format("%Y-%m-%d %H:%M"),
                summary.due,
                summary.notified,
                summary.failed,
                summary.legacy_pills,
                summary.swept_missed,
                summary.refill_alerts,
            );
        }
        summary
    }

    /// Legacy simple mode: flat pills matched by minute-exact string
    /// equality on their `HH:MM` field.
    async fn legacy_pill_pass(&self, now: NaiveDateTime, summary: &mut TickSummary) {
        let hhmm = now.format("%H:%M").to_string();
        let due = match self.store.due_pills(&hhmm) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Legacy pill query failed: {e}");
                return;
            }
        };

        for (pill, patient, caregiver_email) in due {
            let outcome = self
                .coordinator
                .dispatch_pill(&pill, &patient, &caregiver_email)
                .await;
            summary.legacy_pills += 1;
            // Status and audit rows land in one transaction; a failure
            // here leaves the pill pending for the next matching tick.
            if let Err(e) =
                self.store
                    .commit_pill_dispatch(&pill.id, outcome.status, &outcome.records)
            {
                tracing::error!("Commit failed for pill {}: {e}", pill.id);
                summary.persistence_errors += 1;
            }
        }
    }

    /// Fixed-hour jobs, at most once per calendar day each.
    async fn daily_jobs(&mut self, now: NaiveDateTime, summary: &mut TickSummary) {
        let today = now.date();

        if now.hour() == self.config.missed_sweep_hour && self.last_sweep != Some(today) {
            self.last_sweep = Some(today);
            match self.store.sweep_missed(now, self.config.missed_grace_minutes) {
                Ok(swept) => {
                    summary.swept_missed = swept;
                    if swept > 0 {
                        tracing::info!("Missed-dose sweep: {swept} dose(s) marked missed");
                    }
                }
                Err(e) => tracing::error!("Missed-dose sweep failed: {e}"),
            }
        }

        if now.hour() == self.config.refill_check_hour && self.last_refill_check != Some(today) {
            self.last_refill_check = Some(today);
            let low = match self.store.medications_needing_refill() {
                Ok(low) => low,
                Err(e) => {
                    tracing::error!("Refill check failed: {e}");
                    return;
                }
            };
            for (medication, patient, caregiver_email) in low {
                let subject = format!("Refill reminder: {}", medication.name);
                let body = format!(
                    "{} has {} dose(s) of {} ({}) remaining. Time to refill.",
                    patient.name,
                    medication.remaining_quantity.unwrap_or(0),
                    medication.name,
                    medication.dosage,
                );
                // The digest attempt is audited like any other send,
                // keyed by the medication it concerns.
                let record = match self
                    .coordinator
                    .send_digest(&caregiver_email, &subject, &body)
                    .await
                {
                    Ok(()) => {
                        summary.refill_alerts += 1;
                        NotificationRecord::sent(&medication.id, "email", &caregiver_email)
                    }
                    Err(e) => {
                        tracing::warn!("Refill alert for {} not delivered: {e}", medication.name);
                        NotificationRecord::failed(
                            &medication.id,
                            "email",
                            &caregiver_email,
                            e.to_string(),
                        )
                    }
                };
                if let Err(e) = self.store.append_records(std::slice::from_ref(&record)) {
                    tracing::error!("Audit append failed for refill alert: {e}");
                    summary.persistence_errors += 1;
                }
            }
        }
    }
}

/// Spawn the reminder loop as a background tokio task. The engine mutex
/// serializes ticks with any CLI access; missed interval firings are
/// skipped rather than run back-to-back, preserving the
/// one-dose-log-per-day invariant.
pub async fn spawn_reminder_loop(engine: Arc<Mutex<ReminderEngine>>, interval_secs: u64) {
    tracing::info!("Reminder loop started (tick every {interval_secs}s)");

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let now = Local::now().naive_local();
        let mut engine = engine.lock().await;
        engine.tick(now).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use pillwarden_core::error::{PillWardenError, Result};
    use pillwarden_core::model::{Caregiver, Medication, Patient, Pill, Schedule};
    use std::sync::Mutex as StdMutex;

    struct CountingChannel {
        channel_name: &'static str,
        fail: bool,
        sent: StdMutex<Vec<String>>,
    }

    impl CountingChannel {
        fn new(channel_name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                channel_name,
                fail,
                sent: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Channel for CountingChannel {
        fn name(&self) -> &str {
            self.channel_name
        }
        fn enabled(&self) -> bool {
            true
        }
        async fn send(&self, recipient: &str, _subject: &str, _body: &str) -> Result<()> {
            if self.fail {
                return Err(PillWardenError::Provider("rate limited".into()));
            }
            self.sent.lock().unwrap().push(recipient.to_string());
            Ok(())
        }
    }

    fn seeded() -> (Arc<Store>, Schedule) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let caregiver = Caregiver::new("dana", "dana@example.com");
        store.insert_caregiver(&caregiver).unwrap();
        let mut patient = Patient::new(&caregiver.id, "Asha");
        patient.phone = Some("+15550002222".into());
        store.insert_patient(&patient).unwrap();
        let starts = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let medication = Medication::new(&patient.id, "Metformin", "500mg", starts);
        store.insert_medication(&medication).unwrap();
        let schedule =
            Schedule::daily(&medication.id, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        store.insert_schedule(&schedule).unwrap();
        (store, schedule)
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn tick_dispatches_and_commits() {
        let (store, schedule) = seeded();
        let email = CountingChannel::new("email", false);
        let mut engine = ReminderEngine::new(
            store.clone(),
            vec![email.clone() as Arc<dyn Channel>],
            SchedulerConfig::default(),
        );

        let summary = engine.tick(at(8, 0)).await;
        assert_eq!(summary.due, 1);
        assert_eq!(summary.notified, 1);
        assert_eq!(email.sent.lock().unwrap().as_slice(), ["dana@example.com"]);

        let dose = store
            .find_or_create_dose_log(&schedule, at(8, 0).date())
            .unwrap();
        assert_eq!(dose.status, DoseStatus::Notified);
        assert_eq!(store.records_for_dose(&dose.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_tick_same_minute_does_not_renotify() {
        let (store, _) = seeded();
        let email = CountingChannel::new("email", false);
        let mut engine = ReminderEngine::new(
            store,
            vec![email.clone() as Arc<dyn Channel>],
            SchedulerConfig::default(),
        );

        engine.tick(at(8, 0)).await;
        let second = engine.tick(at(8, 0)).await;
        assert_eq!(second.notified, 0);
        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_channels_failing_marks_dose_failed() {
        let (store, schedule) = seeded();
        let email = CountingChannel::new("email", true);
        let mut engine = ReminderEngine::new(
            store.clone(),
            vec![email as Arc<dyn Channel>],
            SchedulerConfig::default(),
        );

        let summary = engine.tick(at(8, 0)).await;
        assert_eq!(summary.failed, 1);
        let dose = store
            .find_or_create_dose_log(&schedule, at(8, 0).date())
            .unwrap();
        assert_eq!(dose.status, DoseStatus::Failed);
        // The failed attempt still produced an audit record.
        assert_eq!(store.records_for_dose(&dose.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn legacy_pills_flow_through_the_tick() {
        let (store, _) = seeded();
        let caregiver = store.caregiver_by_username("dana").unwrap().unwrap();
        let patient = &store.list_patients(&caregiver.id).unwrap()[0];
        let pill = Pill::new(&patient.id, "Aspirin", "12:30");
        store.insert_pill(&pill).unwrap();

        let email = CountingChannel::new("email", false);
        let mut engine = ReminderEngine::new(
            store.clone(),
            vec![email as Arc<dyn Channel>],
            SchedulerConfig::default(),
        );

        let summary = engine.tick(at(12, 30)).await;
        assert_eq!(summary.legacy_pills, 1);
        assert!(store.due_pills("12:30").unwrap().is_empty());
        assert_eq!(store.records_for_dose(&pill.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missed_sweep_runs_once_per_day_at_its_hour() {
        let (store, schedule) = seeded();
        store
            .find_or_create_dose_log(&schedule, at(8, 0).date())
            .unwrap();

        let email = CountingChannel::new("email", false);
        let mut engine = ReminderEngine::new(
            store,
            vec![email as Arc<dyn Channel>],
            SchedulerConfig::default(),
        );

        // 21:59: not yet sweep hour (default 22).
        assert_eq!(engine.tick(at(21, 59)).await.swept_missed, 0);
        // 22:00: sweeps the stale 08:00 dose.
        assert_eq!(engine.tick(at(22, 0)).await.swept_missed, 1);
        // 22:01 same day: already ran.
        assert_eq!(engine.tick(at(22, 1)).await.swept_missed, 0);
    }

    #[tokio::test]
    async fn refill_alert_goes_to_caregiver() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let caregiver = Caregiver::new("dana", "dana@example.com");
        store.insert_caregiver(&caregiver).unwrap();
        let patient = Patient::new(&caregiver.id, "Asha");
        store.insert_patient(&patient).unwrap();
        let starts = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut medication = Medication::new(&patient.id, "Metformin", "500mg", starts);
        medication.remaining_quantity = Some(2);
        medication.refill_threshold = Some(3);
        store.insert_medication(&medication).unwrap();
        let schedule =
            Schedule::daily(&medication.id, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        store.insert_schedule(&schedule).unwrap();

        let email = CountingChannel::new("email", false);
        let mut engine = ReminderEngine::new(
            store.clone(),
            vec![email.clone() as Arc<dyn Channel>],
            SchedulerConfig::default(),
        );

        // Default refill hour is 9; dose dispatch at 8:00 must not alert.
        engine.tick(at(8, 0)).await;
        let summary = engine.tick(at(9, 0)).await;
        assert_eq!(summary.refill_alerts, 1);
        let sent = email.sent.lock().unwrap();
        assert!(sent.contains(&"dana@example.com".to_string()));

        // The digest attempt is audited, keyed by the medication.
        let records = store.records_for_dose(&medication.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel, "email");
        assert_eq!(records[0].recipient, "dana@example.com");
    }
}
