//! PillWarden: medication reminder service.
//!
//! `pillwarden run` starts the background reminder loop; the remaining
//! subcommands manage caregivers, patients, medications, and schedules,
//! and inspect the notification audit trail.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate, NaiveTime, Utc, Weekday};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use pillwarden_channels::build_channels;
use pillwarden_core::model::{
    Caregiver, ChannelKind, Frequency, Medication, Patient, Pill, Schedule,
};
use pillwarden_core::PillWardenConfig;
use pillwarden_engine::{spawn_reminder_loop, ReminderEngine};
use pillwarden_store::Store;

#[derive(Parser)]
#[command(name = "pillwarden", version, about = "Medication reminder service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the reminder loop.
    Run,
    /// Register a caregiver account.
    CaregiverAdd { username: String, email: String },
    /// Register a patient under a caregiver.
    PatientAdd {
        caregiver: String,
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Restrict reminders to one channel: email, sms, or chat.
        #[arg(long)]
        prefer: Option<String>,
    },
    /// List a caregiver's patients.
    PatientList { caregiver: String },
    /// Soft-deactivate a patient (dose history is retained).
    PatientDeactivate { patient_id: String },
    /// Add a medication for a patient.
    MedAdd {
        patient_id: String,
        name: String,
        dosage: String,
        #[arg(long)]
        starts: Option<NaiveDate>,
        #[arg(long)]
        ends: Option<NaiveDate>,
        #[arg(long)]
        instructions: Option<String>,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long)]
        refill_threshold: Option<i64>,
    },
    /// Add a schedule: daily, weekly:mon,wed,fri, or as-needed.
    ScheduleAdd {
        medication_id: String,
        /// Time of day, HH:MM.
        time: String,
        #[arg(default_value = "daily")]
        frequency: String,
    },
    /// Add a legacy simple pill (HH:MM, minute-exact matching).
    PillAdd {
        patient_id: String,
        name: String,
        time: String,
    },
    /// Mark a dose taken (decrements tracked quantity).
    Taken { dose_id: String },
    /// Mark a dose skipped.
    Skip {
        dose_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show recent notification records.
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PillWardenConfig::load().context("loading config")?;
    let store = Arc::new(Store::open(&config.store.resolved_path()).context("opening store")?);

    match cli.command {
        Command::Run => {
            let channels = build_channels(&config);
            let enabled: Vec<_> = channels
                .iter()
                .filter(|c| c.enabled())
                .map(|c| c.name().to_string())
                .collect();
            if enabled.is_empty() {
                tracing::warn!("No notification channel configured; doses will be marked failed");
            } else {
                tracing::info!("Enabled channels: {}", enabled.join(", "));
            }
            let engine = Arc::new(Mutex::new(ReminderEngine::new(
                store,
                channels,
                config.scheduler.clone(),
            )));
            spawn_reminder_loop(engine, config.scheduler.tick_interval_secs).await;
            Ok(())
        }
        Command::CaregiverAdd { username, email } => {
            let caregiver = Caregiver::new(&username, &email);
            store.insert_caregiver(&caregiver)?;
            println!("Caregiver '{}' registered ({})", username, caregiver.id);
            Ok(())
        }
        Command::PatientAdd {
            caregiver,
            name,
            phone,
            email,
            prefer,
        } => {
            let caregiver = store
                .caregiver_by_username(&caregiver)?
                .with_context(|| format!("no caregiver '{caregiver}'"))?;
            let mut patient = Patient::new(&caregiver.id, &name);
            patient.phone = phone;
            patient.email = email;
            patient.preferred_channel = match prefer.as_deref() {
                Some(s) => Some(
                    ChannelKind::parse(s)
                        .with_context(|| format!("unknown channel '{s}' (email|sms|chat)"))?,
                ),
                None => None,
            };
            store.insert_patient(&patient)?;
            println!("Patient '{}' registered ({})", name, patient.id);
            Ok(())
        }
        Command::PatientList { caregiver } => {
            let caregiver = store
                .caregiver_by_username(&caregiver)?
                .with_context(|| format!("no caregiver '{caregiver}'"))?;
            for patient in store.list_patients(&caregiver.id)? {
                println!(
                    "{}  {}  active={}  phone={}  email={}",
                    patient.id,
                    patient.name,
                    patient.active,
                    patient.phone.as_deref().unwrap_or("-"),
                    patient.email.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Command::PatientDeactivate { patient_id } => {
            if store.set_patient_active(&patient_id, false)? {
                println!("Patient {patient_id} deactivated");
            } else {
                bail!("no patient {patient_id}");
            }
            Ok(())
        }
        Command::MedAdd {
            patient_id,
            name,
            dosage,
            starts,
            ends,
            instructions,
            quantity,
            refill_threshold,
        } => {
            let starts = starts.unwrap_or_else(|| Local::now().date_naive());
            let mut medication = Medication::new(&patient_id, &name, &dosage, starts);
            medication.ends_on = ends;
            medication.instructions = instructions;
            medication.remaining_quantity = quantity;
            medication.refill_threshold = refill_threshold;
            store.insert_medication(&medication)?;
            println!("Medication '{}' added ({})", name, medication.id);
            Ok(())
        }
        Command::ScheduleAdd {
            medication_id,
            time,
            frequency,
        } => {
            let time_of_day = NaiveTime::parse_from_str(&time, "%H:%M")
                .with_context(|| format!("invalid time '{time}' (expected HH:MM)"))?;
            let frequency = parse_frequency(&frequency)?;
            let schedule = Schedule::new(&medication_id, time_of_day, frequency);
            store.insert_schedule(&schedule)?;
            println!("Schedule added ({})", schedule.id);
            Ok(())
        }
        Command::PillAdd {
            patient_id,
            name,
            time,
        } => {
            NaiveTime::parse_from_str(&time, "%H:%M")
                .with_context(|| format!("invalid time '{time}' (expected HH:MM)"))?;
            let pill = Pill::new(&patient_id, &name, &time);
            store.insert_pill(&pill)?;
            println!("Pill '{}' added ({})", name, pill.id);
            Ok(())
        }
        Command::Taken { dose_id } => {
            store.mark_taken(&dose_id, Utc::now())?;
            println!("Dose {dose_id} marked taken");
            Ok(())
        }
        Command::Skip { dose_id, notes } => {
            store.mark_skipped(&dose_id, notes.as_deref())?;
            println!("Dose {dose_id} skipped");
            Ok(())
        }
        Command::Log { limit } => {
            for record in store.recent_records(limit)? {
                println!(
                    "{}  {:<6} {:<7} {}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.channel,
                    record.status.as_str(),
                    record.recipient,
                    record.error.as_deref().unwrap_or(""),
                );
            }
            Ok(())
        }
    }
}

/// Parse a frequency argument: "daily", "as-needed", or
/// "weekly:mon,wed,fri".
fn parse_frequency(s: &str) -> anyhow::Result<Frequency> {
    match s {
        "daily" => Ok(Frequency::Daily),
        "as-needed" | "as_needed" => Ok(Frequency::AsNeeded),
        _ => {
            let Some(day_list) = s.strip_prefix("weekly:") else {
                bail!("unknown frequency '{s}' (daily | weekly:mon,wed,fri | as-needed)");
            };
            let days = day_list
                .split(',')
                .map(|d| {
                    d.trim()
                        .parse::<Weekday>()
                        .map_err(|_| anyhow::anyhow!("unknown weekday '{d}'"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            if days.is_empty() {
                bail!("weekly frequency needs at least one day");
            }
            Ok(Frequency::Weekly { days })
        }
    }
}
