//! The data store. One `rusqlite::Connection` behind a mutex; the
//! scheduler loop and the CLI share it. Every dispatched dose commits its
//! status transition and audit rows in a single transaction so a crash
//! can never leave a status update without its notification records.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::Connection;

use pillwarden_core::error::{PillWardenError, Result};
use pillwarden_core::model::{
    AttemptStatus, Caregiver, ChannelKind, DoseLog, DoseStatus, Frequency, Medication,
    NotificationRecord, Patient, Pill, Schedule,
};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";

/// Everything the dispatch coordinator needs about one due schedule:
/// the schedule itself, its medication, the patient, and the caregiver
/// contact used as the email fallback.
#[derive(Debug, Clone)]
pub struct ScheduleContext {
    pub schedule: Schedule,
    pub medication: Medication,
    pub patient: Patient,
    pub caregiver_email: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PillWardenError::Persistence(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PillWardenError::Persistence(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(persistence)?;
        crate::schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PillWardenError::Persistence(format!("DB lock poisoned: {e}")))
    }

    // ─── Caregivers ──────────────────────────────────────

    pub fn insert_caregiver(&self, caregiver: &Caregiver) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO caregivers (id, username, email, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                caregiver.id,
                caregiver.username,
                caregiver.email,
                caregiver.active as i32,
                caregiver.created_at.to_rfc3339(),
            ],
        )
        .map_err(persistence)?;
        Ok(())
    }

    pub fn caregiver_by_username(&self, username: &str) -> Result<Option<Caregiver>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, username, email, active, created_at FROM caregivers WHERE username = ?1")
            .map_err(persistence)?;
        match stmt.query_row([username], |row| {
            Ok(Caregiver {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                active: row.get::<_, i32>(3)? != 0,
                created_at: parse_utc(&row.get::<_, String>(4)?),
            })
        }) {
            Ok(caregiver) => Ok(Some(caregiver)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(persistence(e)),
        }
    }

    // ─── Patients ──────────────────────────────────────

    pub fn insert_patient(&self, patient: &Patient) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO patients (id, caregiver_id, name, phone, email, preferred_channel, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                patient.id,
                patient.caregiver_id,
                patient.name,
                patient.phone,
                patient.email,
                patient.preferred_channel.map(|c| c.as_str()),
                patient.active as i32,
                patient.created_at.to_rfc3339(),
            ],
        )
        .map_err(persistence)?;
        Ok(())
    }

    pub fn list_patients(&self, caregiver_id: &str) -> Result<Vec<Patient>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, caregiver_id, name, phone, email, preferred_channel, active, created_at
                 FROM patients WHERE caregiver_id = ?1 ORDER BY created_at",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map([caregiver_id], map_patient)
            .map_err(persistence)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(persistence)
    }

    /// Soft-deactivate (or reactivate). Patients with dose history are
    /// never hard-deleted.
    pub fn set_patient_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE patients SET active = ?1 WHERE id = ?2",
                rusqlite::params![active as i32, id],
            )
            .map_err(persistence)?;
        Ok(changed > 0)
    }

    /// Remove a patient: cascades to medications and schedules. Dose logs
    /// and notification records are retained for the audit trail.
    pub fn remove_patient(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM pills WHERE patient_id = ?1", [id])
            .map_err(persistence)?;
        conn.execute("DELETE FROM patients WHERE id = ?1", [id])
            .map_err(persistence)?;
        Ok(())
    }

    // ─── Medications & Schedules ──────────────────────────────────────

    pub fn insert_medication(&self, medication: &Medication) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO medications
             (id, patient_id, name, dosage, instructions, starts_on, ends_on,
              remaining_quantity, refill_threshold, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                medication.id,
                medication.patient_id,
                medication.name,
                medication.dosage,
                medication.instructions,
                medication.starts_on.format(DATE_FMT).to_string(),
                medication.ends_on.map(|d| d.format(DATE_FMT).to_string()),
                medication.remaining_quantity,
                medication.refill_threshold,
                medication.active as i32,
            ],
        )
        .map_err(persistence)?;
        Ok(())
    }

    pub fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let frequency = serde_json::to_string(&schedule.frequency)
            .map_err(|e| PillWardenError::Persistence(format!("Serialize frequency: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules (id, medication_id, time_of_day, frequency, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                schedule.id,
                schedule.medication_id,
                schedule.time_of_day.format(TIME_FMT).to_string(),
                frequency,
                schedule.active as i32,
            ],
        )
        .map_err(persistence)?;
        Ok(())
    }

    /// Active schedules of active medications of active patients, joined
    /// with the caregiver's contact. This is the evaluator's input set.
    pub fn active_schedule_contexts(&self) -> Result<Vec<ScheduleContext>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.medication_id, s.time_of_day, s.frequency, s.active,
                        m.id, m.patient_id, m.name, m.dosage, m.instructions, m.starts_on,
                        m.ends_on, m.remaining_quantity, m.refill_threshold, m.active,
                        p.id, p.caregiver_id, p.name, p.phone, p.email, p.preferred_channel,
                        p.active, p.created_at,
                        c.email
                 FROM schedules s
                 JOIN medications m ON m.id = s.medication_id
                 JOIN patients p ON p.id = m.patient_id
                 JOIN caregivers c ON c.id = p.caregiver_id
                 WHERE s.active = 1 AND m.active = 1 AND p.active = 1",
            )
            .map_err(persistence)?;

        let rows = stmt
            .query_map([], |row| {
                let schedule = Schedule {
                    id: row.get(0)?,
                    medication_id: row.get(1)?,
                    time_of_day: parse_time(&row.get::<_, String>(2)?),
                    frequency: parse_frequency(&row.get::<_, String>(3)?),
                    active: row.get::<_, i32>(4)? != 0,
                };
                let medication = Medication {
                    id: row.get(5)?,
                    patient_id: row.get(6)?,
                    name: row.get(7)?,
                    dosage: row.get(8)?,
                    instructions: row.get(9)?,
                    starts_on: parse_date(&row.get::<_, String>(10)?),
                    ends_on: row.get::<_, Option<String>>(11)?.map(|s| parse_date(&s)),
                    remaining_quantity: row.get(12)?,
                    refill_threshold: row.get(13)?,
                    active: row.get::<_, i32>(14)? != 0,
                };
                let patient = Patient {
                    id: row.get(15)?,
                    caregiver_id: row.get(16)?,
                    name: row.get(17)?,
                    phone: row.get(18)?,
                    email: row.get(19)?,
                    preferred_channel: row
                        .get::<_, Option<String>>(20)?
                        .and_then(|s| ChannelKind::parse(&s)),
                    active: row.get::<_, i32>(21)? != 0,
                    created_at: parse_utc(&row.get::<_, String>(22)?),
                };
                let caregiver_email: String = row.get(23)?;
                Ok(ScheduleContext {
                    schedule,
                    medication,
                    patient,
                    caregiver_email,
                })
            })
            .map_err(persistence)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(persistence)
    }

    /// Medications at or below their refill threshold, with their patient.
    pub fn medications_needing_refill(&self) -> Result<Vec<(Medication, Patient, String)>> {
        let contexts = self.active_schedule_contexts()?;
        let mut seen = std::collections::HashSet::new();
        Ok(contexts
            .into_iter()
            .filter(|ctx| ctx.medication.needs_refill() && seen.insert(ctx.medication.id.clone()))
            .map(|ctx| (ctx.medication, ctx.patient, ctx.caregiver_email))
            .collect())
    }

    // ─── Dose logs ──────────────────────────────────────

    /// Look up or create the single dose log for (schedule, date).
    /// `INSERT OR IGNORE` against the UNIQUE key makes this idempotent:
    /// calling it twice in the same minute never yields a second row, and
    /// an existing row of any status is returned as-is.
    pub fn find_or_create_dose_log(&self, schedule: &Schedule, date: NaiveDate) -> Result<DoseLog> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO dose_logs
             (id, schedule_id, medication_id, scheduled_date, scheduled_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
            rusqlite::params![
                uuid::Uuid::new_v4().to_string(),
                schedule.id,
                schedule.medication_id,
                date.format(DATE_FMT).to_string(),
                schedule.time_of_day.format(TIME_FMT).to_string(),
            ],
        )
        .map_err(persistence)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, medication_id, scheduled_date, scheduled_time,
                        status, taken_at, notes
                 FROM dose_logs WHERE schedule_id = ?1 AND scheduled_date = ?2",
            )
            .map_err(persistence)?;
        stmt.query_row(
            rusqlite::params![schedule.id, date.format(DATE_FMT).to_string()],
            map_dose_log,
        )
        .map_err(persistence)
    }

    pub fn dose_log(&self, id: &str) -> Result<Option<DoseLog>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, medication_id, scheduled_date, scheduled_time,
                        status, taken_at, notes
                 FROM dose_logs WHERE id = ?1",
            )
            .map_err(persistence)?;
        match stmt.query_row([id], map_dose_log) {
            Ok(dose) => Ok(Some(dose)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(persistence(e)),
        }
    }

    /// Persist a dispatch outcome: the dose status transition and all of
    /// its notification records, in one transaction. Runs only after every
    /// channel attempt for the dose has completed; a crash before this
    /// point leaves the dose pending and re-eligible next tick.
    pub fn commit_dispatch(
        &self,
        dose_log_id: &str,
        status: DoseStatus,
        records: &[NotificationRecord],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(persistence)?;
        tx.execute(
            "UPDATE dose_logs SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), dose_log_id],
        )
        .map_err(persistence)?;
        for record in records {
            tx.execute(
                "INSERT INTO notification_records
                 (id, dose_log_id, channel, recipient, status, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.id,
                    record.dose_log_id,
                    record.channel,
                    record.recipient,
                    record.status.as_str(),
                    record.error,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(persistence)?;
        }
        tx.commit().map_err(persistence)
    }

    /// Caregiver marks a dose taken. Decrements the medication's tracked
    /// quantity, floored at zero, in the same transaction. Notification
    /// send never touches the quantity; only this explicit action does.
    pub fn mark_taken(&self, dose_log_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(persistence)?;
        let medication_id: String = tx
            .query_row(
                "SELECT medication_id FROM dose_logs WHERE id = ?1",
                [dose_log_id],
                |row| row.get(0),
            )
            .map_err(persistence)?;
        tx.execute(
            "UPDATE dose_logs SET status = 'taken', taken_at = ?1 WHERE id = ?2",
            rusqlite::params![now.to_rfc3339(), dose_log_id],
        )
        .map_err(persistence)?;
        tx.execute(
            "UPDATE medications
             SET remaining_quantity = CASE WHEN remaining_quantity > 0
                                           THEN remaining_quantity - 1 ELSE 0 END
             WHERE id = ?1 AND remaining_quantity IS NOT NULL",
            [&medication_id],
        )
        .map_err(persistence)?;
        tx.commit().map_err(persistence)
    }

    pub fn mark_skipped(&self, dose_log_id: &str, notes: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE dose_logs SET status = 'skipped', notes = ?1 WHERE id = ?2",
            rusqlite::params![notes, dose_log_id],
        )
        .map_err(persistence)?;
        Ok(())
    }

    /// Daily sweep: pending/notified doses older than the grace window
    /// become missed. Returns how many rows transitioned.
    pub fn sweep_missed(&self, now: NaiveDateTime, grace_minutes: i64) -> Result<usize> {
        let cutoff = now - chrono::Duration::minutes(grace_minutes);
        let cutoff_key = cutoff.format("%Y-%m-%d %H:%M").to_string();
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE dose_logs SET status = 'missed'
                 WHERE status IN ('pending', 'notified')
                   AND scheduled_date || ' ' || scheduled_time < ?1",
                [cutoff_key],
            )
            .map_err(persistence)?;
        Ok(changed)
    }

    // ─── Notification records ──────────────────────────────────────

    /// Append audit rows outside a dose transaction. Used by the refill
    /// digest, which has no dose or pill status to commit alongside.
    pub fn append_records(&self, records: &[NotificationRecord]) -> Result<()> {
        let conn = self.lock()?;
        for record in records {
            conn.execute(
                "INSERT INTO notification_records
                 (id, dose_log_id, channel, recipient, status, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.id,
                    record.dose_log_id,
                    record.channel,
                    record.recipient,
                    record.status.as_str(),
                    record.error,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(persistence)?;
        }
        Ok(())
    }

    pub fn records_for_dose(&self, dose_log_id: &str) -> Result<Vec<NotificationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, dose_log_id, channel, recipient, status, error, created_at
                 FROM notification_records WHERE dose_log_id = ?1 ORDER BY created_at",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map([dose_log_id], map_record)
            .map_err(persistence)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(persistence)
    }

    pub fn recent_records(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, dose_log_id, channel, recipient, status, error, created_at
                 FROM notification_records ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map([limit as i64], map_record)
            .map_err(persistence)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(persistence)
    }

    // ─── Legacy pills ──────────────────────────────────────

    pub fn insert_pill(&self, pill: &Pill) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pills (id, patient_id, name, time, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                pill.id,
                pill.patient_id,
                pill.name,
                pill.time,
                pill.status.as_str(),
            ],
        )
        .map_err(persistence)?;
        Ok(())
    }

    /// Legacy due-matching: minute-exact string equality on the stored
    /// `HH:MM` field, pending only. No day-level dedup exists in this
    /// mode; that is the documented legacy limitation.
    pub fn due_pills(&self, hhmm: &str) -> Result<Vec<(Pill, Patient, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT l.id, l.patient_id, l.name, l.time, l.status,
                        p.id, p.caregiver_id, p.name, p.phone, p.email, p.preferred_channel,
                        p.active, p.created_at,
                        c.email
                 FROM pills l
                 JOIN patients p ON p.id = l.patient_id
                 JOIN caregivers c ON c.id = p.caregiver_id
                 WHERE l.status = 'pending' AND l.time = ?1 AND p.active = 1",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map([hhmm], |row| {
                let pill = Pill {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    name: row.get(2)?,
                    time: row.get(3)?,
                    status: DoseStatus::parse(&row.get::<_, String>(4)?)
                        .unwrap_or(DoseStatus::Pending),
                };
                let patient = Patient {
                    id: row.get(5)?,
                    caregiver_id: row.get(6)?,
                    name: row.get(7)?,
                    phone: row.get(8)?,
                    email: row.get(9)?,
                    preferred_channel: row
                        .get::<_, Option<String>>(10)?
                        .and_then(|s| ChannelKind::parse(&s)),
                    active: row.get::<_, i32>(11)? != 0,
                    created_at: parse_utc(&row.get::<_, String>(12)?),
                };
                let caregiver_email: String = row.get(13)?;
                Ok((pill, patient, caregiver_email))
            })
            .map_err(persistence)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(persistence)
    }

    pub fn set_pill_status(&self, id: &str, status: DoseStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pills SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), id],
        )
        .map_err(persistence)?;
        Ok(())
    }

    /// Persist a legacy pill's dispatch outcome: status transition and
    /// audit rows in one transaction, same contract as `commit_dispatch`.
    /// A crash before the commit leaves the pill pending with no records,
    /// so the next matching tick retries cleanly.
    pub fn commit_pill_dispatch(
        &self,
        pill_id: &str,
        status: DoseStatus,
        records: &[NotificationRecord],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(persistence)?;
        tx.execute(
            "UPDATE pills SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), pill_id],
        )
        .map_err(persistence)?;
        for record in records {
            tx.execute(
                "INSERT INTO notification_records
                 (id, dose_log_id, channel, recipient, status, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.id,
                    record.dose_log_id,
                    record.channel,
                    record.recipient,
                    record.status.as_str(),
                    record.error,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(persistence)?;
        }
        tx.commit().map_err(persistence)
    }
}

// ─── Row mapping ──────────────────────────────────────

fn persistence(e: rusqlite::Error) -> PillWardenError {
    PillWardenError::Persistence(e.to_string())
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, DATE_FMT).unwrap_or_default()
}

fn parse_time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, TIME_FMT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .unwrap_or_default()
}

fn parse_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_frequency(s: &str) -> Frequency {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::warn!("Unparseable frequency '{s}': {e}; treating as as-needed");
        Frequency::AsNeeded
    })
}

fn map_patient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        caregiver_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        preferred_channel: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| ChannelKind::parse(&s)),
        active: row.get::<_, i32>(6)? != 0,
        created_at: parse_utc(&row.get::<_, String>(7)?),
    })
}

fn map_dose_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<DoseLog> {
    Ok(DoseLog {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        medication_id: row.get(2)?,
        scheduled_date: parse_date(&row.get::<_, String>(3)?),
        scheduled_time: parse_time(&row.get::<_, String>(4)?),
        status: DoseStatus::parse(&row.get::<_, String>(5)?).unwrap_or(DoseStatus::Pending),
        taken_at: row.get::<_, Option<String>>(6)?.map(|s| parse_utc(&s)),
        notes: row.get(7)?,
    })
}

fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let status: String = row.get(4)?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        dose_log_id: row.get(1)?,
        channel: row.get(2)?,
        recipient: row.get(3)?,
        status: if status == "sent" {
            AttemptStatus::Sent
        } else {
            AttemptStatus::Failed
        },
        error: row.get(5)?,
        created_at: parse_utc(&row.get::<_, String>(6)?),
    })
}
