//! Domain model: caregivers, patients, medications, schedules, dose logs,
//! and the append-only notification audit trail.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A caregiver account. Auth lives outside the reminder engine; this
/// record exists as the contact fallback when a patient has no email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caregiver {
    pub id: String,
    pub username: String,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Caregiver {
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Notification medium. Also used as the per-patient preference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Chat,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            // Older databases stored the provider name for chat messages.
            "chat" | "whatsapp" => Some(Self::Chat),
            _ => None,
        }
    }
}

/// A family member receiving reminders. Soft-deactivated, never deleted
/// while dose history exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub caregiver_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// When set, dispatch is restricted to this channel; when unset,
    /// every enabled channel with a valid recipient is attempted.
    pub preferred_channel: Option<ChannelKind>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    pub fn new(caregiver_id: &str, name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            caregiver_id: caregiver_id.to_string(),
            name: name.to_string(),
            phone: None,
            email: None,
            preferred_channel: None,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// A prescribed medication. Belongs to exactly one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub patient_id: String,
    pub name: String,
    pub dosage: String,
    /// Free-text instructions, e.g. "with food".
    pub instructions: Option<String>,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    /// Pills left in the current supply. None = not tracked.
    pub remaining_quantity: Option<i64>,
    /// Refill reminder fires at or below this count.
    pub refill_threshold: Option<i64>,
    pub active: bool,
}

impl Medication {
    pub fn new(patient_id: &str, name: &str, dosage: &str, starts_on: NaiveDate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id: patient_id.to_string(),
            name: name.to_string(),
            dosage: dosage.to_string(),
            instructions: None,
            starts_on,
            ends_on: None,
            remaining_quantity: None,
            refill_threshold: None,
            active: true,
        }
    }

    /// Whether this medication is within its active date range on `date`.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        if !self.active || date < self.starts_on {
            return false;
        }
        match self.ends_on {
            Some(end) => date <= end,
            None => true,
        }
    }

    /// Supply at or below the refill threshold (only when both tracked).
    pub fn needs_refill(&self) -> bool {
        matches!(
            (self.remaining_quantity, self.refill_threshold),
            (Some(qty), Some(threshold)) if qty <= threshold
        )
    }
}

/// How often a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    /// Every calendar day.
    Daily,
    /// Only on the listed weekdays.
    Weekly { days: Vec<Weekday> },
    /// Taken on demand; never auto-generates due entries.
    AsNeeded,
}

impl Frequency {
    /// Whether this rule matches the given weekday.
    pub fn matches_day(&self, day: Weekday) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly { days } => days.contains(&day),
            Self::AsNeeded => false,
        }
    }
}

/// Time-of-day + frequency rule attached to a medication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub medication_id: String,
    pub time_of_day: NaiveTime,
    pub frequency: Frequency,
    pub active: bool,
}

impl Schedule {
    pub fn daily(medication_id: &str, time_of_day: NaiveTime) -> Self {
        Self::new(medication_id, time_of_day, Frequency::Daily)
    }

    pub fn weekly(medication_id: &str, time_of_day: NaiveTime, days: Vec<Weekday>) -> Self {
        Self::new(medication_id, time_of_day, Frequency::Weekly { days })
    }

    pub fn as_needed(medication_id: &str, time_of_day: NaiveTime) -> Self {
        Self::new(medication_id, time_of_day, Frequency::AsNeeded)
    }

    pub fn new(medication_id: &str, time_of_day: NaiveTime, frequency: Frequency) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            medication_id: medication_id.to_string(),
            time_of_day,
            frequency,
            active: true,
        }
    }
}

/// Dose lifecycle. `Notified` and later states are never re-dispatched
/// within the same evaluation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Pending,
    Notified,
    Taken,
    Missed,
    Skipped,
    Failed,
}

impl DoseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Notified => "notified",
            Self::Taken => "taken",
            Self::Missed => "missed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "notified" | "sent" => Some(Self::Notified),
            "taken" => Some(Self::Taken),
            "missed" => Some(Self::Missed),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A terminal dose is resolved and never re-evaluated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Taken | Self::Missed | Self::Skipped)
    }
}

/// One expected administration: unique per (schedule, calendar day).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseLog {
    pub id: String,
    pub schedule_id: String,
    pub medication_id: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: DoseStatus,
    pub taken_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl DoseLog {
    pub fn pending(schedule: &Schedule, date: NaiveDate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            medication_id: schedule.medication_id.clone(),
            scheduled_date: date,
            scheduled_time: schedule.time_of_day,
            status: DoseStatus::Pending,
            taken_at: None,
            notes: None,
        }
    }
}

/// Outcome of one channel send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Sent,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Append-only audit row: one per (dose, channel) attempt. Immutable once
/// written; corrections are new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub dose_log_id: String,
    pub channel: String,
    pub recipient: String,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn sent(dose_log_id: &str, channel: &str, recipient: &str) -> Self {
        Self::record(dose_log_id, channel, recipient, AttemptStatus::Sent, None)
    }

    pub fn failed(dose_log_id: &str, channel: &str, recipient: &str, error: String) -> Self {
        Self::record(dose_log_id, channel, recipient, AttemptStatus::Failed, Some(error))
    }

    fn record(
        dose_log_id: &str,
        channel: &str,
        recipient: &str,
        status: AttemptStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dose_log_id: dose_log_id.to_string(),
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            status,
            error,
            created_at: Utc::now(),
        }
    }
}

/// Legacy simple-mode record: a flat pill with an `HH:MM` string and no
/// schedule/medication split. Due-matching is minute-exact string
/// equality, so there is no day-level dedup; a restart inside the same
/// minute can re-fire. Kept for databases created by the original app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pill {
    pub id: String,
    pub patient_id: String,
    pub name: String,
    /// `HH:MM`, free-form as entered.
    pub time: String,
    pub status: DoseStatus,
}

impl Pill {
    pub fn new(patient_id: &str, name: &str, time: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id: patient_id.to_string(),
            name: name.to_string(),
            time: time.to_string(),
            status: DoseStatus::Pending,
        }
    }
}
