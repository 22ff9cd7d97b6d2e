//! Schema migration. Tables are created with `execute_batch`; columns
//! added after the first release are retrofitted with idempotent
//! `ALTER TABLE` statements so old databases keep working.

use pillwarden_core::{PillWardenError, Result};
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS caregivers (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            caregiver_id TEXT NOT NULL REFERENCES caregivers(id),
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            preferred_channel TEXT,          -- email | sms | chat, NULL = all
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS medications (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            dosage TEXT NOT NULL DEFAULT '',
            instructions TEXT,
            starts_on TEXT NOT NULL,         -- YYYY-MM-DD
            ends_on TEXT,
            remaining_quantity INTEGER,
            refill_threshold INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            medication_id TEXT NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
            time_of_day TEXT NOT NULL,       -- HH:MM
            frequency TEXT NOT NULL,         -- JSON: {kind: daily|weekly|as_needed, ...}
            active INTEGER NOT NULL DEFAULT 1
        );

        -- One expected administration per (schedule, calendar day).
        -- The UNIQUE constraint is the dedup invariant that prevents
        -- repeat notifications within the same day.
        CREATE TABLE IF NOT EXISTS dose_logs (
            id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL,
            medication_id TEXT NOT NULL,
            scheduled_date TEXT NOT NULL,    -- YYYY-MM-DD
            scheduled_time TEXT NOT NULL,    -- HH:MM
            status TEXT NOT NULL DEFAULT 'pending',
            taken_at TEXT,
            notes TEXT,
            UNIQUE (schedule_id, scheduled_date)
        );

        -- Append-only audit trail: one row per channel send attempt.
        -- Rows are never updated; corrections are new rows.
        CREATE TABLE IF NOT EXISTS notification_records (
            id TEXT PRIMARY KEY,
            dose_log_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            recipient TEXT NOT NULL,
            status TEXT NOT NULL,            -- sent | failed
            error TEXT,
            created_at TEXT NOT NULL
        );

        -- Legacy simple mode: flat pills with an HH:MM string.
        CREATE TABLE IF NOT EXISTS pills (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients(id),
            name TEXT NOT NULL,
            time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
        );

        CREATE INDEX IF NOT EXISTS idx_dose_logs_status
            ON dose_logs (status, scheduled_date);
        CREATE INDEX IF NOT EXISTS idx_notification_records_dose
            ON notification_records (dose_log_id);
        ",
    )
    .map_err(|e| PillWardenError::Persistence(format!("Migration: {e}")))?;

    // Columns added after the first release (safe to fail if present).
    let _ = conn.execute("ALTER TABLE patients ADD COLUMN preferred_channel TEXT", []);
    let _ = conn.execute("ALTER TABLE medications ADD COLUMN remaining_quantity INTEGER", []);
    let _ = conn.execute("ALTER TABLE medications ADD COLUMN refill_threshold INTEGER", []);
    let _ = conn.execute("ALTER TABLE medications ADD COLUMN instructions TEXT", []);

    Ok(())
}
