//! Dispatch coordinator: fans one due dose out across the enabled
//! channels, aggregates per-channel outcomes, and produces the audit rows.
//!
//! Channels are independent: a missing contact or a failure on one never
//! blocks another, and no channel error propagates past this module.

use std::sync::Arc;

use chrono::NaiveTime;

use pillwarden_core::model::{DoseLog, DoseStatus, NotificationRecord, Patient, Pill};
use pillwarden_core::{Channel, PillWardenError, Result};
use pillwarden_store::ScheduleContext;

/// Aggregate result of dispatching one dose.
#[derive(Debug)]
pub struct DoseOutcome {
    pub dose_log_id: String,
    /// `Notified` if at least one channel succeeded; `Failed` if every
    /// attempted channel failed or none was enabled with a valid recipient.
    pub status: DoseStatus,
    /// One record per channel attempt, sent or failed.
    pub records: Vec<NotificationRecord>,
}

pub struct DispatchCoordinator {
    channels: Vec<Arc<dyn Channel>>,
}

impl DispatchCoordinator {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self { channels }
    }

    /// Dispatch a structured dose: build the message, attempt every
    /// eligible channel sequentially, collect the outcome.
    pub async fn dispatch(&self, dose: &DoseLog, ctx: &ScheduleContext) -> DoseOutcome {
        let subject = format!("Medication reminder: {}", ctx.medication.name);
        let body = reminder_body(ctx, dose.scheduled_time);
        self.fan_out(&dose.id, &ctx.patient, &ctx.caregiver_email, &subject, &body)
            .await
    }

    /// Legacy pill dispatch: same fan-out, message built from the flat
    /// record's free-form time field.
    pub async fn dispatch_pill(
        &self,
        pill: &Pill,
        patient: &Patient,
        caregiver_email: &str,
    ) -> DoseOutcome {
        let subject = "Pill reminder".to_string();
        let body = format!(
            "Reminder: {}, take your pill: {} at {}.",
            patient.name, pill.name, pill.time
        );
        self.fan_out(&pill.id, patient, caregiver_email, &subject, &body)
            .await
    }

    /// Send a caregiver digest (missed-dose / low-refill summaries)
    /// through the email channel.
    pub async fn send_digest(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let email = self
            .channels
            .iter()
            .find(|c| c.name() == "email" && c.enabled())
            .ok_or_else(|| PillWardenError::Config("no enabled email channel".into()))?;
        email.send(recipient, subject, body).await
    }

    async fn fan_out(
        &self,
        dose_log_id: &str,
        patient: &Patient,
        caregiver_email: &str,
        subject: &str,
        body: &str,
    ) -> DoseOutcome {
        let mut records = Vec::new();
        let mut any_sent = false;

        for channel in &self.channels {
            let name = channel.name();
            if !channel.enabled() {
                tracing::debug!("Channel {name} disabled, skipping");
                continue;
            }
            if !wants_channel(patient, name) {
                continue;
            }
            let Some(recipient) = recipient_for(name, patient, caregiver_email) else {
                tracing::debug!(
                    "No {name} contact for patient {}, skipping channel",
                    patient.name
                );
                continue;
            };

            match channel.send(&recipient, subject, body).await {
                Ok(()) => {
                    any_sent = true;
                    records.push(NotificationRecord::sent(dose_log_id, name, &recipient));
                }
                Err(e) => {
                    tracing::warn!("Channel {name} failed for dose {dose_log_id}: {e}");
                    records.push(NotificationRecord::failed(
                        dose_log_id,
                        name,
                        &recipient,
                        e.to_string(),
                    ));
                }
            }
        }

        let status = if any_sent {
            DoseStatus::Notified
        } else {
            DoseStatus::Failed
        };
        DoseOutcome {
            dose_log_id: dose_log_id.to_string(),
            status,
            records,
        }
    }
}

/// Per-channel recipient resolution. Email prefers the patient's own
/// address and falls back to the caregiver's; phone channels use the
/// patient's number only. Channels resolve independently; a missing
/// contact for one never blocks another.
fn recipient_for(channel: &str, patient: &Patient, caregiver_email: &str) -> Option<String> {
    match channel {
        "email" => patient
            .email
            .clone()
            .or_else(|| (!caregiver_email.is_empty()).then(|| caregiver_email.to_string())),
        "sms" | "chat" => patient.phone.clone(),
        _ => None,
    }
}

/// A set preference restricts fan-out to that channel; unset means all.
fn wants_channel(patient: &Patient, channel: &str) -> bool {
    match patient.preferred_channel {
        Some(preferred) => preferred.as_str() == channel,
        None => true,
    }
}

fn reminder_body(ctx: &ScheduleContext, scheduled_time: NaiveTime) -> String {
    let mut body = format!(
        "{}, time to take {} ({}) scheduled for {}.",
        ctx.patient.name,
        ctx.medication.name,
        ctx.medication.dosage,
        scheduled_time.format("%H:%M"),
    );
    if let Some(instructions) = &ctx.medication.instructions {
        body.push(' ');
        body.push_str(instructions);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pillwarden_core::model::{
        AttemptStatus, Caregiver, ChannelKind, Medication, Schedule,
    };
    use std::sync::Mutex;

    /// Test double: records every send, succeeds or fails on command.
    struct FakeChannel {
        name: &'static str,
        enabled: bool,
        fail_with: Option<fn() -> PillWardenError>,
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeChannel {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled: true,
                fail_with: None,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str, fail_with: fn() -> PillWardenError) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled: true,
                fail_with: Some(fail_with),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn disabled(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled: false,
                fail_with: None,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn send_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            self.sent.lock().unwrap().push((
                recipient.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    fn context() -> ScheduleContext {
        let caregiver = Caregiver::new("dana", "dana@example.com");
        let mut patient = Patient::new(&caregiver.id, "Asha");
        patient.phone = Some("+15550002222".into());
        let starts = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut medication = Medication::new(&patient.id, "Metformin", "500mg", starts);
        medication.instructions = Some("Take with food.".into());
        let schedule = Schedule::daily(
            &medication.id,
            chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        );
        ScheduleContext {
            schedule,
            medication,
            patient,
            caregiver_email: caregiver.email,
        }
    }

    fn dose(ctx: &ScheduleContext) -> DoseLog {
        DoseLog::pending(&ctx.schedule, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
    }

    #[tokio::test]
    async fn one_success_one_failure_aggregates_to_notified() {
        let email = FakeChannel::ok("email");
        let sms = FakeChannel::failing("sms", || {
            PillWardenError::RecipientInvalid("invalid phone number '555'".into())
        });
        let coordinator = DispatchCoordinator::new(vec![email.clone() as Arc<dyn Channel>, sms]);

        let ctx = context();
        let outcome = coordinator.dispatch(&dose(&ctx), &ctx).await;

        assert_eq!(outcome.status, DoseStatus::Notified);
        assert_eq!(outcome.records.len(), 2);
        let failed: Vec<_> = outcome
            .records
            .iter()
            .filter(|r| r.status == AttemptStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].channel, "sms");
        assert!(failed[0].error.as_deref().unwrap().contains("invalid phone"));
        assert_eq!(email.send_count(), 1);
    }

    #[tokio::test]
    async fn zero_enabled_channels_is_failed_with_no_provider_calls() {
        let email = FakeChannel::disabled("email");
        let sms = FakeChannel::disabled("sms");
        let coordinator = DispatchCoordinator::new(vec![email.clone() as Arc<dyn Channel>, sms.clone()]);

        let ctx = context();
        let outcome = coordinator.dispatch(&dose(&ctx), &ctx).await;

        assert_eq!(outcome.status, DoseStatus::Failed);
        assert!(outcome.records.is_empty());
        assert_eq!(email.send_count(), 0);
        assert_eq!(sms.send_count(), 0);
    }

    #[tokio::test]
    async fn all_attempts_failing_is_failed() {
        let email = FakeChannel::failing("email", || {
            PillWardenError::Provider("auth rejected (401)".into())
        });
        let sms = FakeChannel::failing("sms", || {
            PillWardenError::Channel("connection timed out".into())
        });
        let coordinator = DispatchCoordinator::new(vec![email as Arc<dyn Channel>, sms]);

        let ctx = context();
        let outcome = coordinator.dispatch(&dose(&ctx), &ctx).await;
        assert_eq!(outcome.status, DoseStatus::Failed);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome
            .records
            .iter()
            .all(|r| r.status == AttemptStatus::Failed));
    }

    #[tokio::test]
    async fn email_falls_back_to_caregiver_address() {
        let email = FakeChannel::ok("email");
        let coordinator = DispatchCoordinator::new(vec![email.clone() as Arc<dyn Channel>]);

        let mut ctx = context();
        ctx.patient.email = None; // patient has no address of their own
        let outcome = coordinator.dispatch(&dose(&ctx), &ctx).await;

        assert_eq!(outcome.status, DoseStatus::Notified);
        let sent = email.sent.lock().unwrap();
        assert_eq!(sent[0].0, "dana@example.com");
        assert!(sent[0].2.contains("Metformin"));
        assert!(sent[0].2.contains("500mg"));
        assert!(sent[0].2.contains("08:00"));
        assert!(sent[0].2.contains("Take with food."));
    }

    #[tokio::test]
    async fn missing_phone_skips_sms_without_a_record() {
        let email = FakeChannel::ok("email");
        let sms = FakeChannel::ok("sms");
        let coordinator = DispatchCoordinator::new(vec![email as Arc<dyn Channel>, sms.clone()]);

        let mut ctx = context();
        ctx.patient.phone = None;
        let outcome = coordinator.dispatch(&dose(&ctx), &ctx).await;

        // Email went through; SMS was never attempted, so no record.
        assert_eq!(outcome.status, DoseStatus::Notified);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].channel, "email");
        assert_eq!(sms.send_count(), 0);
    }

    #[tokio::test]
    async fn preferred_channel_restricts_fan_out() {
        let email = FakeChannel::ok("email");
        let sms = FakeChannel::ok("sms");
        let coordinator = DispatchCoordinator::new(vec![email.clone() as Arc<dyn Channel>, sms.clone()]);

        let mut ctx = context();
        ctx.patient.preferred_channel = Some(ChannelKind::Sms);
        let outcome = coordinator.dispatch(&dose(&ctx), &ctx).await;

        assert_eq!(outcome.status, DoseStatus::Notified);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].channel, "sms");
        assert_eq!(email.send_count(), 0);
        assert_eq!(sms.send_count(), 1);
    }

    #[tokio::test]
    async fn legacy_pill_message_format() {
        let email = FakeChannel::ok("email");
        let coordinator = DispatchCoordinator::new(vec![email.clone() as Arc<dyn Channel>]);

        let ctx = context();
        let pill = Pill::new(&ctx.patient.id, "Aspirin", "08:00");
        let outcome = coordinator
            .dispatch_pill(&pill, &ctx.patient, &ctx.caregiver_email)
            .await;

        assert_eq!(outcome.status, DoseStatus::Notified);
        let sent = email.sent.lock().unwrap();
        assert_eq!(
            sent[0].2,
            "Reminder: Asha, take your pill: Aspirin at 08:00."
        );
    }
}
