//! MedMinder Core Library
//!
//! Local-first medication reminder scheduling, dispenser reconciliation and
//! adherence tracking.
//!
//! # Architecture
//!
//! ```text
//!   Reminder definitions
//!           │
//!   ┌───────▼────────┐        dispenser events
//!   │Schedule Expander│              │
//!   └───────┬────────┘      ┌────────▼────────┐
//!           │ dose rows     │ Event Reconciler │
//!   ┌───────▼────────┐◄─────┴─────────────────┘
//!   │   Dose Ledger   │◄──── manual confirm / miss / sweep
//!   └───────┬────────┘
//!           │ DoseTransition
//!     ┌─────┴──────────────┐
//!     ▼                    ▼
//! Adherence Aggregator   Drift Shifter
//!     │
//!     ▼
//!  Reports / Dashboard        Alerts → caregiver inbox
//! ```
//!
//! # Core Principle
//!
//! **A dose resolves exactly once.** Every transition is a compare-and-set on
//! `pending`; whoever loses the race sees an invalid transition.
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer
//! - [`models`]: Domain types (Reminder, Dose, Device, Alert, etc.)
//! - [`schedule`]: Expander, ledger, reconciler, aggregator, drift shifter and engine
//! - [`report`]: Adherence report, schedule views and dashboard
//! - [`config`]: Scheduler tunables
//! - [`logging`]: Tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod report;
pub mod schedule;

// Re-export commonly used types
pub use config::SchedulerConfig;
pub use db::Database;
pub use models::{
    Alert, AlertPayload, AlertType, Device, DeviceEventInput, Dose, DoseStatus, DoseTransition,
    Medication, Patient, Reminder, ReminderInput, TakenBy,
};
pub use report::Reporter;
pub use schedule::{AdherenceEngine, AlertSink, Caller, ScheduleError};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};

use models::{civil_now, AlertFilter, CompartmentStock, DeviceStatusInput, NewMedication};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum MedMinderError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<ScheduleError> for MedMinderError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::NotFound(what) => MedMinderError::NotFound(what),
            e @ ScheduleError::InvalidStateTransition { .. } => {
                MedMinderError::InvalidStateTransition(e.to_string())
            }
            ScheduleError::Validation(msg) => MedMinderError::Validation(msg),
            ScheduleError::TransientStorage(msg) => MedMinderError::TransientStorage(msg),
            ScheduleError::Storage(e) => MedMinderError::Storage(e.to_string()),
        }
    }
}

impl From<db::DbError> for MedMinderError {
    fn from(e: db::DbError) -> Self {
        ScheduleError::from(e).into()
    }
}

impl From<serde_json::Error> for MedMinderError {
    fn from(e: serde_json::Error) -> Self {
        MedMinderError::SerializationError(e.to_string())
    }
}

impl From<config::ConfigError> for MedMinderError {
    fn from(e: config::ConfigError) -> Self {
        MedMinderError::Validation(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for MedMinderError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        MedMinderError::Storage(format!("Lock poisoned: {}", e))
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, MedMinderError> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| MedMinderError::Validation(format!("'{}' is not a local timestamp", s)))
}

fn parse_date(s: &str) -> Result<NaiveDate, MedMinderError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| MedMinderError::Validation(format!("'{}' is not a YYYY-MM-DD date", s)))
}

fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path with default settings.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<MedMinderCore>, MedMinderError> {
    open_with(path, SchedulerConfig::default())
}

/// Open or create a database, reading settings from a JSON document.
#[uniffi::export]
pub fn open_database_with_config(
    path: String,
    config_json: String,
) -> Result<Arc<MedMinderCore>, MedMinderError> {
    open_with(path, SchedulerConfig::from_json_str(&config_json)?)
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<MedMinderCore>, MedMinderError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(MedMinderCore {
        db: Arc::new(Mutex::new(db)),
        config: SchedulerConfig::default(),
    }))
}

/// Install the tracing subscriber. Returns `false` if one was already set.
#[uniffi::export]
pub fn init_logging(filter: Option<String>) -> bool {
    logging::init_tracing(filter.as_deref())
}

fn open_with(path: String, config: SchedulerConfig) -> Result<Arc<MedMinderCore>, MedMinderError> {
    let db = Database::open_with_timeout(&path, config.busy_timeout())?;
    tracing::info!(path = %path, "Opened medminder database");
    Ok(Arc::new(MedMinderCore {
        db: Arc::new(Mutex::new(db)),
        config,
    }))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct MedMinderCore {
    db: Arc<Mutex<Database>>,
    config: SchedulerConfig,
}

impl MedMinderCore {
    fn engine<'a>(&self, db: &'a Database) -> AdherenceEngine<'a> {
        AdherenceEngine::with_config(db, self.config.clone())
    }

    fn reporter<'a>(&self, db: &'a Database) -> Reporter<'a> {
        Reporter::with_low_battery_threshold(db, self.config.low_battery_threshold)
    }
}

#[uniffi::export]
impl MedMinderCore {
    // =========================================================================
    // Directory Operations
    // =========================================================================

    /// Register a caregiver account.
    pub fn create_caregiver(&self, name: String, email: String) -> Result<i64, MedMinderError> {
        let db = self.db.lock()?;
        Ok(db.insert_caregiver(&name, &email)?)
    }

    /// Create a patient under a caregiver.
    pub fn create_patient(
        &self,
        caregiver_id: i64,
        name: String,
    ) -> Result<FfiPatient, MedMinderError> {
        let db = self.db.lock()?;
        if db.find_caregiver(caregiver_id)?.is_none() {
            return Err(MedMinderError::NotFound(format!("Caregiver {}", caregiver_id)));
        }
        let id = db.insert_patient(caregiver_id, &name)?;
        let patient = db
            .find_patient(id)?
            .ok_or_else(|| MedMinderError::NotFound(format!("Patient {}", id)))?;
        Ok(patient.into())
    }

    /// List a caregiver's patients.
    pub fn list_patients(&self, caregiver_id: i64) -> Result<Vec<FfiPatient>, MedMinderError> {
        let db = self.db.lock()?;
        let patients = db.list_patients(caregiver_id)?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    /// Add a medication to a patient the caller may act on.
    pub fn add_medication(
        &self,
        caller: FfiCaller,
        patient_id: i64,
        medication: FfiNewMedication,
    ) -> Result<FfiMedication, MedMinderError> {
        let db = self.db.lock()?;
        self.engine(&db).authorize_patient(caller.into(), patient_id)?;
        if medication.name.trim().is_empty() {
            return Err(MedMinderError::Validation("Medication name must not be empty".into()));
        }
        let id = db.insert_medication(patient_id, &medication.into())?;
        let stored = db
            .find_medication(id)?
            .ok_or_else(|| MedMinderError::NotFound(format!("Medication {}", id)))?;
        Ok(stored.into())
    }

    /// A patient's active medications.
    pub fn list_medications(
        &self,
        caller: FfiCaller,
        patient_id: i64,
    ) -> Result<Vec<FfiMedication>, MedMinderError> {
        let db = self.db.lock()?;
        self.engine(&db).authorize_patient(caller.into(), patient_id)?;
        let medications = db.list_active_medications(patient_id)?;
        Ok(medications.into_iter().map(|m| m.into()).collect())
    }

    // =========================================================================
    // Reminder Operations
    // =========================================================================

    /// Replace a medication's reminders and materialize the dose horizon.
    pub fn define_reminders(
        &self,
        caller: FfiCaller,
        medication_id: i64,
        reminders: Vec<FfiReminderInput>,
    ) -> Result<FfiReminderDefinition, MedMinderError> {
        let db = self.db.lock()?;
        let inputs: Vec<ReminderInput> = reminders.into_iter().map(|r| r.into()).collect();
        let definition = self
            .engine(&db)
            .define_reminders(caller.into(), medication_id, &inputs)?;
        Ok(definition.into())
    }

    /// Active reminders of a medication, ordered by time of day.
    pub fn list_reminders(
        &self,
        caller: FfiCaller,
        medication_id: i64,
    ) -> Result<Vec<FfiReminder>, MedMinderError> {
        let db = self.db.lock()?;
        let reminders = self.engine(&db).list_reminders(caller.into(), medication_id)?;
        Ok(reminders.into_iter().map(|r| r.into()).collect())
    }

    /// Top up every active reminder's horizon. Returns the number of doses created.
    pub fn refresh_horizons(&self) -> Result<u32, MedMinderError> {
        let db = self.db.lock()?;
        let reports = self.engine(&db).refresh_horizons(civil_now().date())?;
        Ok(reports.iter().map(|r| r.created.len() as u32).sum())
    }

    // =========================================================================
    // Dose Operations
    // =========================================================================

    /// Confirm a dose by hand. Dispenser confirmations go through
    /// `handle_device_event`.
    pub fn confirm_dose(
        &self,
        caller: FfiCaller,
        dose_id: i64,
        notes: Option<String>,
    ) -> Result<FfiConfirmation, MedMinderError> {
        let db = self.db.lock()?;
        let confirmation =
            self.engine(&db)
                .confirm_dose(caller.into(), dose_id, TakenBy::Manual, notes.as_deref())?;
        Ok(confirmation.into())
    }

    /// Mark a dose missed and alert the caregiver.
    pub fn miss_dose(
        &self,
        caller: FfiCaller,
        dose_id: i64,
    ) -> Result<FfiDoseTransition, MedMinderError> {
        let db = self.db.lock()?;
        let transition = self.engine(&db).miss_dose(caller.into(), dose_id)?;
        Ok(transition.into())
    }

    /// Cancel a pending dose.
    pub fn cancel_dose(
        &self,
        caller: FfiCaller,
        dose_id: i64,
    ) -> Result<FfiDoseTransition, MedMinderError> {
        let db = self.db.lock()?;
        let transition = self.engine(&db).cancel_dose(caller.into(), dose_id)?;
        Ok(transition.into())
    }

    /// Miss every pending dose whose window has closed.
    pub fn sweep_overdue(&self) -> Result<FfiSweepReport, MedMinderError> {
        let db = self.db.lock()?;
        let report = self.engine(&db).sweep_overdue(civil_now())?;
        Ok(FfiSweepReport {
            missed: report.missed,
            skipped: report.skipped as u32,
            failed: report.failed.len() as u32,
        })
    }

    // =========================================================================
    // Device Operations
    // =========================================================================

    /// Pair a dispenser with a patient.
    pub fn connect_device(
        &self,
        caller: FfiCaller,
        patient_id: i64,
        device_id: String,
        device_name: Option<String>,
        connection_type: Option<String>,
    ) -> Result<FfiDevice, MedMinderError> {
        let db = self.db.lock()?;
        let device = self.engine(&db).connect_device(
            caller.into(),
            patient_id,
            &device_id,
            device_name.as_deref(),
            connection_type.as_deref().unwrap_or("wifi"),
        )?;
        Ok(device.into())
    }

    /// Load a compartment with a medication.
    pub fn assign_compartment(
        &self,
        caller: FfiCaller,
        device_id: String,
        compartment_number: i64,
        medication_id: i64,
        current_stock: i64,
        low_stock_threshold: i64,
    ) -> Result<FfiCompartment, MedMinderError> {
        let db = self.db.lock()?;
        let compartment = self.engine(&db).assign_compartment(
            caller.into(),
            &device_id,
            compartment_number,
            medication_id,
            current_stock,
            low_stock_threshold,
        )?;
        Ok(compartment.into())
    }

    /// Ingest a dispenser event. `observed_at` defaults to now.
    pub fn handle_device_event(
        &self,
        device_id: String,
        event: FfiDeviceEvent,
    ) -> Result<FfiDeviceEventOutcome, MedMinderError> {
        let observed_at = match &event.observed_at {
            Some(s) => parse_timestamp(s)?,
            None => civil_now(),
        };
        let event_data = match &event.event_data_json {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };
        let input = DeviceEventInput {
            event_type: event.event_type,
            compartment_number: event.compartment_number,
            event_data,
        };

        let db = self.db.lock()?;
        let outcome = self
            .engine(&db)
            .handle_device_event(&device_id, &input, observed_at)?;
        Ok(outcome.into())
    }

    /// Apply a dispenser status callback.
    pub fn update_device_status(
        &self,
        device_id: String,
        battery_level: Option<i64>,
        is_connected: Option<bool>,
        compartments: Vec<FfiCompartmentStock>,
    ) -> Result<FfiDevice, MedMinderError> {
        let status = DeviceStatusInput {
            battery_level,
            is_connected,
            compartments: if compartments.is_empty() {
                None
            } else {
                Some(compartments.into_iter().map(|c| c.into()).collect())
            },
        };
        let db = self.db.lock()?;
        let device = self.engine(&db).update_device_status(&device_id, &status)?;
        Ok(device.into())
    }

    // =========================================================================
    // Alert Operations
    // =========================================================================

    /// A caregiver's alerts, newest first.
    pub fn list_alerts(
        &self,
        caregiver_id: i64,
        alert_type: Option<String>,
        is_read: Option<bool>,
        patient_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<FfiAlert>, MedMinderError> {
        let alert_type = match alert_type.as_deref() {
            Some(s) => Some(
                AlertType::parse(s)
                    .ok_or_else(|| MedMinderError::Validation(format!("Unknown alert type '{}'", s)))?,
            ),
            None => None,
        };
        let filter = AlertFilter {
            alert_type,
            is_read,
            patient_id,
        };

        let db = self.db.lock()?;
        let alerts = db.list_alerts(caregiver_id, &filter, limit as usize)?;
        alerts.into_iter().map(FfiAlert::try_from).collect()
    }

    /// Mark one alert read. Returns `false` if it was not the caregiver's.
    pub fn mark_alert_read(&self, caregiver_id: i64, alert_id: i64) -> Result<bool, MedMinderError> {
        let db = self.db.lock()?;
        Ok(db.mark_alert_read(caregiver_id, alert_id)?)
    }

    pub fn mark_all_alerts_read(&self, caregiver_id: i64) -> Result<u32, MedMinderError> {
        let db = self.db.lock()?;
        Ok(db.mark_all_alerts_read(caregiver_id)? as u32)
    }

    pub fn unread_alert_count(&self, caregiver_id: i64) -> Result<i64, MedMinderError> {
        let db = self.db.lock()?;
        Ok(db.unread_alert_count(caregiver_id)?)
    }

    // =========================================================================
    // Report Operations
    // =========================================================================

    /// Today's non-cancelled doses.
    pub fn today_schedule(
        &self,
        caller: FfiCaller,
        patient_id: i64,
    ) -> Result<Vec<FfiScheduledDose>, MedMinderError> {
        let db = self.db.lock()?;
        let doses = self
            .reporter(&db)
            .schedule_for_day(caller.into(), patient_id, civil_now().date())?;
        Ok(doses.into_iter().map(|d| d.into()).collect())
    }

    /// Pending doses due within the next `hours`.
    pub fn upcoming_doses(
        &self,
        caller: FfiCaller,
        patient_id: i64,
        hours: u32,
        limit: u32,
    ) -> Result<Vec<FfiScheduledDose>, MedMinderError> {
        let db = self.db.lock()?;
        let doses = self.reporter(&db).upcoming_doses(
            caller.into(),
            patient_id,
            civil_now(),
            i64::from(hours),
            limit as usize,
        )?;
        Ok(doses.into_iter().map(|d| d.into()).collect())
    }

    /// Dose history, newest first. Dates are `YYYY-MM-DD` and filter on the
    /// dose's scheduled day.
    pub fn dose_history(
        &self,
        caller: FfiCaller,
        patient_id: i64,
        start_date: Option<String>,
        end_date: Option<String>,
        status: Option<String>,
        limit: Option<u32>,
    ) -> Result<Vec<FfiScheduledDose>, MedMinderError> {
        let status = match status.as_deref() {
            Some(s) => Some(
                DoseStatus::parse(s)
                    .ok_or_else(|| MedMinderError::Validation(format!("Unknown dose status '{}'", s)))?,
            ),
            None => None,
        };
        let filter = db::DoseHistoryFilter {
            start_date: start_date.as_deref().map(parse_date).transpose()?,
            end_date: end_date.as_deref().map(parse_date).transpose()?,
            status,
            limit: limit.map(|l| l as usize),
        };

        let db = self.db.lock()?;
        let doses = self.reporter(&db).dose_history(caller.into(), patient_id, &filter)?;
        Ok(doses.into_iter().map(|d| d.into()).collect())
    }

    /// Export an adherence report as JSON.
    pub fn export_adherence_json(
        &self,
        caller: FfiCaller,
        patient_id: i64,
        start_date: String,
        end_date: String,
        medication_id: Option<i64>,
    ) -> Result<String, MedMinderError> {
        let (start, end) = (parse_date(&start_date)?, parse_date(&end_date)?);
        let db = self.db.lock()?;
        let report = self
            .reporter(&db)
            .adherence_report(caller.into(), patient_id, start, end, medication_id)?;
        Ok(report.to_json()?)
    }

    /// Export an adherence report as CSV.
    pub fn export_adherence_csv(
        &self,
        caller: FfiCaller,
        patient_id: i64,
        start_date: String,
        end_date: String,
        medication_id: Option<i64>,
    ) -> Result<String, MedMinderError> {
        let (start, end) = (parse_date(&start_date)?, parse_date(&end_date)?);
        let db = self.db.lock()?;
        let report = self
            .reporter(&db)
            .adherence_report(caller.into(), patient_id, start, end, medication_id)?;
        Ok(report.to_csv())
    }

    /// Patient dashboard as JSON.
    pub fn dashboard_json(&self, caller: FfiCaller, patient_id: i64) -> Result<String, MedMinderError> {
        let db = self.db.lock()?;
        let dashboard = self.reporter(&db).dashboard(caller.into(), patient_id, civil_now())?;
        Ok(serde_json::to_string_pretty(&dashboard)?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe caller identity.
#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiCaller {
    Caregiver { id: i64 },
    Patient { id: i64 },
}

impl From<FfiCaller> for Caller {
    fn from(caller: FfiCaller) -> Self {
        match caller {
            FfiCaller::Caregiver { id } => Caller::Caregiver(id),
            FfiCaller::Patient { id } => Caller::Patient(id),
        }
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: i64,
    pub caregiver_id: i64,
    pub name: String,
    pub is_active: bool,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id,
            caregiver_id: patient.caregiver_id,
            name: patient.name,
            is_active: patient.is_active,
        }
    }
}

/// FFI-safe medication input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewMedication {
    pub name: String,
    pub strength: Option<String>,
    pub dose_per_intake: Option<String>,
    pub instructions: Option<String>,
}

impl From<FfiNewMedication> for NewMedication {
    fn from(m: FfiNewMedication) -> Self {
        NewMedication {
            name: m.name.trim().to_string(),
            strength: m.strength,
            dose_per_intake: m.dose_per_intake,
            instructions: m.instructions,
        }
    }
}

/// FFI-safe medication.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedication {
    pub id: i64,
    pub patient_id: i64,
    pub name: String,
    pub strength: Option<String>,
    pub dose_per_intake: Option<String>,
    pub instructions: Option<String>,
    pub is_active: bool,
}

impl From<Medication> for FfiMedication {
    fn from(m: Medication) -> Self {
        Self {
            id: m.id,
            patient_id: m.patient_id,
            name: m.name,
            strength: m.strength,
            dose_per_intake: m.dose_per_intake,
            instructions: m.instructions,
            is_active: m.is_active,
        }
    }
}

/// FFI-safe reminder input. Times are `HH:MM`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReminderInput {
    pub time_slot: String,
    pub exact_time: String,
    pub time_window_start: Option<String>,
    pub time_window_end: Option<String>,
    pub food_rule: Option<String>,
    pub delay_on_meal_missed: Option<bool>,
    pub notify_device: Option<bool>,
    pub notify_mobile: Option<bool>,
}

impl From<FfiReminderInput> for ReminderInput {
    fn from(r: FfiReminderInput) -> Self {
        ReminderInput {
            time_slot: r.time_slot,
            exact_time: r.exact_time,
            time_window_start: r.time_window_start,
            time_window_end: r.time_window_end,
            food_rule: r.food_rule,
            delay_on_meal_missed: r.delay_on_meal_missed,
            notify_device: r.notify_device,
            notify_mobile: r.notify_mobile,
        }
    }
}

/// FFI-safe reminder.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReminder {
    pub id: i64,
    pub medication_id: i64,
    pub time_slot: String,
    pub exact_time: String,
    pub time_window_start: Option<String>,
    pub time_window_end: Option<String>,
    pub food_rule: Option<String>,
    pub delay_on_meal_missed: bool,
    pub notify_device: bool,
    pub notify_mobile: bool,
}

impl From<Reminder> for FfiReminder {
    fn from(r: Reminder) -> Self {
        let hhmm = |t: chrono::NaiveTime| t.format("%H:%M").to_string();
        Self {
            id: r.id,
            medication_id: r.medication_id,
            time_slot: r.time_slot,
            exact_time: hhmm(r.exact_time),
            time_window_start: r.time_window_start.map(hhmm),
            time_window_end: r.time_window_end.map(hhmm),
            food_rule: r.food_rule.map(|f| f.as_str().to_string()),
            delay_on_meal_missed: r.delay_on_meal_missed,
            notify_device: r.notify_device,
            notify_mobile: r.notify_mobile,
        }
    }
}

/// FFI-safe result of defining reminders.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReminderDefinition {
    pub reminders: Vec<FfiReminder>,
    pub created_doses: u32,
    /// Days that could not be materialized; a later refresh retries them
    pub failed_days: u32,
    pub superseded: u32,
    pub cancelled_doses: u32,
}

impl From<schedule::ReminderDefinition> for FfiReminderDefinition {
    fn from(d: schedule::ReminderDefinition) -> Self {
        Self {
            created_doses: d.expansions.iter().map(|e| e.created.len() as u32).sum(),
            failed_days: d.expansions.iter().map(|e| e.failed.len() as u32).sum(),
            reminders: d.reminders.into_iter().map(|r| r.into()).collect(),
            superseded: d.superseded as u32,
            cancelled_doses: d.cancelled_doses as u32,
        }
    }
}

/// FFI-safe dose.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDose {
    pub id: i64,
    pub reminder_id: i64,
    pub medication_id: i64,
    pub patient_id: i64,
    pub dose_date: String,
    pub scheduled_time: String,
    pub status: String,
    pub taken_at: Option<String>,
    pub taken_by: Option<String>,
    pub notes: Option<String>,
    pub device_verified: bool,
    pub delay_minutes: i64,
}

impl From<Dose> for FfiDose {
    fn from(d: Dose) -> Self {
        Self {
            id: d.id,
            reminder_id: d.reminder_id,
            medication_id: d.medication_id,
            patient_id: d.patient_id,
            dose_date: d.dose_date.to_string(),
            scheduled_time: format_timestamp(d.scheduled_time),
            status: d.status.as_str().to_string(),
            taken_at: d.taken_at.map(format_timestamp),
            taken_by: d.taken_by.map(|t| t.as_str().to_string()),
            notes: d.notes,
            device_verified: d.device_verified,
            delay_minutes: d.delay_minutes,
        }
    }
}

/// FFI-safe dose with labels.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiScheduledDose {
    pub dose: FfiDose,
    pub medication_name: String,
    pub strength: Option<String>,
    pub time_slot: String,
    pub food_rule: Option<String>,
}

impl From<models::ScheduledDose> for FfiScheduledDose {
    fn from(d: models::ScheduledDose) -> Self {
        Self {
            dose: d.dose.into(),
            medication_name: d.medication_name,
            strength: d.strength,
            time_slot: d.time_slot,
            food_rule: d.food_rule,
        }
    }
}

/// FFI-safe dose transition.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDoseTransition {
    pub dose_id: i64,
    pub reminder_id: i64,
    pub patient_id: i64,
    pub medication_id: i64,
    pub dose_date: String,
    pub scheduled_time: String,
    pub new_status: String,
    pub actor: Option<String>,
    pub delay_minutes: i64,
    pub at: String,
}

impl From<DoseTransition> for FfiDoseTransition {
    fn from(t: DoseTransition) -> Self {
        Self {
            dose_id: t.dose_id,
            reminder_id: t.reminder_id,
            patient_id: t.patient_id,
            medication_id: t.medication_id,
            dose_date: t.dose_date.to_string(),
            scheduled_time: format_timestamp(t.scheduled_time),
            new_status: t.new_status.as_str().to_string(),
            actor: t.actor.map(|a| a.as_str().to_string()),
            delay_minutes: t.delay_minutes,
            at: format_timestamp(t.at),
        }
    }
}

/// FFI-safe daily adherence rollup.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdherenceLog {
    pub patient_id: i64,
    pub medication_id: i64,
    pub date: String,
    pub total_doses: i64,
    pub taken_doses: i64,
    pub missed_doses: i64,
    pub late_doses: i64,
    pub adherence_percentage: f64,
}

impl From<models::AdherenceLog> for FfiAdherenceLog {
    fn from(log: models::AdherenceLog) -> Self {
        Self {
            patient_id: log.patient_id,
            medication_id: log.medication_id,
            date: log.date.to_string(),
            total_doses: log.total_doses,
            taken_doses: log.taken_doses,
            missed_doses: log.missed_doses,
            late_doses: log.late_doses,
            adherence_percentage: log.adherence_percentage,
        }
    }
}

/// FFI-safe confirmation result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConfirmation {
    pub transition: FfiDoseTransition,
    pub adherence: Option<FfiAdherenceLog>,
    pub shifted: u32,
}

impl From<schedule::Confirmation> for FfiConfirmation {
    fn from(c: schedule::Confirmation) -> Self {
        Self {
            transition: c.transition.into(),
            adherence: c.adherence.map(|a| a.into()),
            shifted: c.shifted as u32,
        }
    }
}

/// FFI-safe sweep summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSweepReport {
    pub missed: Vec<i64>,
    pub skipped: u32,
    pub failed: u32,
}

/// FFI-safe device.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDevice {
    pub id: i64,
    pub device_id: String,
    pub patient_id: Option<i64>,
    pub device_name: Option<String>,
    pub connection_type: String,
    pub battery_level: i64,
    pub is_connected: bool,
    pub last_sync: Option<String>,
}

impl From<Device> for FfiDevice {
    fn from(d: Device) -> Self {
        Self {
            id: d.id,
            device_id: d.device_id,
            patient_id: d.patient_id,
            device_name: d.device_name,
            connection_type: d.connection_type,
            battery_level: d.battery_level,
            is_connected: d.is_connected,
            last_sync: d.last_sync.map(format_timestamp),
        }
    }
}

/// FFI-safe compartment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCompartment {
    pub compartment_number: i64,
    pub medication_id: Option<i64>,
    pub current_stock: i64,
    pub low_stock_threshold: i64,
    pub last_refill: Option<String>,
}

impl From<models::Compartment> for FfiCompartment {
    fn from(c: models::Compartment) -> Self {
        Self {
            compartment_number: c.compartment_number,
            medication_id: c.medication_id,
            current_stock: c.current_stock,
            low_stock_threshold: c.low_stock_threshold,
            last_refill: c.last_refill.map(format_timestamp),
        }
    }
}

/// FFI-safe stock report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCompartmentStock {
    pub number: i64,
    pub stock: i64,
    pub medication_id: Option<i64>,
}

impl From<FfiCompartmentStock> for CompartmentStock {
    fn from(c: FfiCompartmentStock) -> Self {
        CompartmentStock {
            number: c.number,
            stock: c.stock,
            medication_id: c.medication_id,
        }
    }
}

/// FFI-safe dispenser event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDeviceEvent {
    pub event_type: String,
    pub compartment_number: Option<i64>,
    pub event_data_json: Option<String>,
    /// Local timestamp; now when absent
    pub observed_at: Option<String>,
}

/// FFI-safe event handling result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDeviceEventOutcome {
    pub event_id: i64,
    pub matched_dose_id: Option<i64>,
    pub remaining_stock: Option<i64>,
    pub low_stock: bool,
    pub adherence: Option<FfiAdherenceLog>,
    pub shifted: u32,
}

impl From<schedule::DeviceEventOutcome> for FfiDeviceEventOutcome {
    fn from(o: schedule::DeviceEventOutcome) -> Self {
        let matched_dose_id = o.matched_dose_id();
        let (remaining_stock, low_stock) = match &o.reconciliation {
            Some(r) => (r.compartment.as_ref().map(|c| c.current_stock), r.low_stock),
            None => (None, false),
        };
        Self {
            event_id: o.event_id,
            matched_dose_id,
            remaining_stock,
            low_stock,
            adherence: o.adherence.map(|a| a.into()),
            shifted: o.shifted as u32,
        }
    }
}

/// FFI-safe alert.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAlert {
    pub id: i64,
    pub caregiver_id: i64,
    pub patient_id: i64,
    pub alert_type: String,
    pub severity: String,
    pub title: String,
    pub payload_json: String,
    pub is_read: bool,
    pub created_at: String,
}

impl TryFrom<Alert> for FfiAlert {
    type Error = MedMinderError;

    fn try_from(a: Alert) -> Result<Self, Self::Error> {
        Ok(Self {
            payload_json: serde_json::to_string(&a.payload)?,
            id: a.id,
            caregiver_id: a.caregiver_id,
            patient_id: a.patient_id,
            alert_type: a.alert_type.as_str().to_string(),
            severity: a.severity.as_str().to_string(),
            title: a.title,
            is_read: a.is_read,
            created_at: a.created_at,
        })
    }
}
