//! Adherence engine: the entry point request handlers call.
//!
//! Owns ownership checks, transaction boundaries and alert side effects.
//! Alerts are raised only after the transaction that justified them commits.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{
    raise_quietly, AdherenceAggregator, AlertInbox, AlertSink, Caller, DoseLedger, DriftShifter,
    EventReconciler, ExpansionReport, ReconcileOutcome, ScheduleError, ScheduleExpander,
    ScheduleResult,
};
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::models::{
    civil_now, AdherenceLog, AlertPayload, Compartment, Device, DeviceEventInput,
    DeviceStatusInput, Dose, DoseTransition, Medication, NewAlert, Patient, Reminder,
    ReminderInput, TakenBy,
};

/// Result of redefining a medication's reminders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderDefinition {
    pub reminders: Vec<Reminder>,
    pub expansions: Vec<ExpansionReport>,
    /// Previously active reminders that were deactivated
    pub superseded: usize,
    /// Future pending doses of superseded reminders that were cancelled
    pub cancelled_doses: usize,
}

/// Result of confirming a dose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub transition: DoseTransition,
    /// Rollup after counting this dose, `None` if it was already counted
    pub adherence: Option<AdherenceLog>,
    /// Future doses moved by drift shifting
    pub shifted: usize,
}

/// Result of handling one device event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEventOutcome {
    pub event_id: i64,
    /// Present when the event type triggers reconciliation
    pub reconciliation: Option<ReconcileOutcome>,
    pub adherence: Option<AdherenceLog>,
    pub shifted: usize,
}

impl DeviceEventOutcome {
    pub fn matched_dose_id(&self) -> Option<i64> {
        self.reconciliation.as_ref().and_then(ReconcileOutcome::matched_dose_id)
    }
}

/// Result of an overdue sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Doses marked missed by this sweep
    pub missed: Vec<i64>,
    /// Doses resolved by someone else while the sweep ran
    pub skipped: usize,
    pub failed: Vec<(i64, String)>,
}

/// Coordinates the scheduling components for one database.
pub struct AdherenceEngine<'a> {
    db: &'a Database,
    config: SchedulerConfig,
    alerts: Box<dyn AlertSink + 'a>,
}

impl<'a> AdherenceEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, SchedulerConfig::default())
    }

    pub fn with_config(db: &'a Database, config: SchedulerConfig) -> Self {
        let alerts = Box::new(AlertInbox::new(db, config.dedupe_unread_alerts));
        Self { db, config, alerts }
    }

    /// Replace where alerts go.
    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink + 'a>) -> Self {
        self.alerts = sink;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn expander(&self) -> ScheduleExpander<'a> {
        ScheduleExpander::new(self.db)
    }

    fn ledger(&self) -> DoseLedger<'a> {
        DoseLedger::new(self.db)
    }

    fn reconciler(&self) -> EventReconciler<'a> {
        EventReconciler::with_window_minutes(self.db, self.config.match_window_minutes)
    }

    fn aggregator(&self) -> AdherenceAggregator<'a> {
        AdherenceAggregator::with_late_threshold(self.db, self.config.late_threshold_minutes)
    }

    fn drift(&self) -> DriftShifter<'a> {
        DriftShifter::with_threshold(self.db, self.config.drift_threshold_minutes)
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Load a patient the caller may act on.
    pub fn authorize_patient(&self, caller: Caller, patient_id: i64) -> ScheduleResult<Patient> {
        self.db
            .find_patient(patient_id)?
            .filter(|p| caller.can_access(p))
            .ok_or_else(|| ScheduleError::NotFound(format!("Patient {}", patient_id)))
    }

    fn authorize_medication(&self, caller: Caller, medication_id: i64) -> ScheduleResult<Medication> {
        let not_found = || ScheduleError::NotFound(format!("Medication {}", medication_id));
        let medication = self.db.find_medication(medication_id)?.ok_or_else(not_found)?;
        self.authorize_patient(caller, medication.patient_id)
            .map_err(|_| not_found())?;
        Ok(medication)
    }

    fn authorize_dose(&self, caller: Caller, dose_id: i64) -> ScheduleResult<Dose> {
        let not_found = || ScheduleError::NotFound(format!("Dose {}", dose_id));
        let dose = self.db.get_dose(dose_id)?.ok_or_else(not_found)?;
        self.authorize_patient(caller, dose.patient_id)
            .map_err(|_| not_found())?;
        Ok(dose)
    }

    fn device_by_hardware_id(&self, hardware_id: &str) -> ScheduleResult<Device> {
        self.db
            .get_device_by_hardware_id(hardware_id)?
            .ok_or_else(|| ScheduleError::NotFound(format!("Device {}", hardware_id)))
    }

    // =========================================================================
    // Reminders
    // =========================================================================

    pub fn define_reminders(
        &self,
        caller: Caller,
        medication_id: i64,
        inputs: &[ReminderInput],
    ) -> ScheduleResult<ReminderDefinition> {
        self.define_reminders_at(caller, medication_id, inputs, civil_now())
    }

    /// Replace a medication's reminders and expand the new ones.
    ///
    /// All inputs are validated before anything is written. Prior reminders
    /// are deactivated and their future pending doses cancelled; past doses
    /// keep the reminder they were created from.
    pub fn define_reminders_at(
        &self,
        caller: Caller,
        medication_id: i64,
        inputs: &[ReminderInput],
        now: NaiveDateTime,
    ) -> ScheduleResult<ReminderDefinition> {
        let medication = self.authorize_medication(caller, medication_id)?;
        if !medication.is_active {
            return Err(ScheduleError::Validation(format!(
                "Medication {} is inactive",
                medication_id
            )));
        }

        let validated = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                input
                    .validate()
                    .map_err(|e| ScheduleError::Validation(format!("Reminder {}: {}", i + 1, e)))
            })
            .collect::<ScheduleResult<Vec<_>>>()?;

        let (reminders, superseded, cancelled_doses) = self.db.in_transaction(|db| {
            let superseded = db.deactivate_reminders(medication_id)?;
            let cancelled = db.cancel_superseded_doses(medication_id, now)?;

            let mut reminders = Vec::with_capacity(validated.len());
            for new in &validated {
                let id = db.insert_reminder(medication_id, new)?;
                let reminder = db
                    .get_reminder(id)?
                    .ok_or_else(|| ScheduleError::NotFound(format!("Reminder {}", id)))?;
                reminders.push(reminder);
            }
            Ok::<_, ScheduleError>((reminders, superseded, cancelled))
        })?;

        let expansions = reminders
            .iter()
            .map(|r| {
                self.expander().expand_for_patient(
                    r,
                    medication.patient_id,
                    self.config.horizon_days,
                    now.date(),
                )
            })
            .collect();

        tracing::info!(
            medication_id,
            reminders = reminders.len(),
            superseded,
            cancelled_doses,
            "Reminders defined"
        );

        Ok(ReminderDefinition {
            reminders,
            expansions,
            superseded,
            cancelled_doses,
        })
    }

    pub fn list_reminders(&self, caller: Caller, medication_id: i64) -> ScheduleResult<Vec<Reminder>> {
        self.authorize_medication(caller, medication_id)?;
        Ok(self.db.list_active_reminders(medication_id)?)
    }

    /// Top up every active reminder's horizon starting at `today`.
    pub fn refresh_horizons(&self, today: NaiveDate) -> ScheduleResult<Vec<ExpansionReport>> {
        self.expander().refresh_horizons(self.config.horizon_days, today)
    }

    // =========================================================================
    // Dose transitions
    // =========================================================================

    pub fn confirm_dose(
        &self,
        caller: Caller,
        dose_id: i64,
        actor: TakenBy,
        notes: Option<&str>,
    ) -> ScheduleResult<Confirmation> {
        self.confirm_dose_at(caller, dose_id, actor, notes, civil_now())
    }

    /// Mark a dose taken, count it and shift the schedule if it was late.
    ///
    /// Only manual confirmations come through here; `TakenBy::Device` is set
    /// by the reconciler and rejected with `Validation`.
    pub fn confirm_dose_at(
        &self,
        caller: Caller,
        dose_id: i64,
        actor: TakenBy,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> ScheduleResult<Confirmation> {
        if actor == TakenBy::Device {
            return Err(ScheduleError::Validation(
                "Device confirmations arrive as dispenser events".into(),
            ));
        }
        self.authorize_dose(caller, dose_id)?;

        self.db.in_transaction(|_| {
            let transition = self.ledger().mark_taken_at(dose_id, actor, notes, now)?;
            let adherence = self.aggregator().record_transition(&transition)?;
            let shifted =
                self.drift()
                    .shift_if_late_at(transition.reminder_id, transition.delay_minutes, now)?;
            Ok(Confirmation {
                transition,
                adherence,
                shifted,
            })
        })
    }

    pub fn miss_dose(&self, caller: Caller, dose_id: i64) -> ScheduleResult<DoseTransition> {
        self.miss_dose_at(caller, dose_id, civil_now())
    }

    /// Mark a dose missed, count it and alert the caregiver.
    pub fn miss_dose_at(
        &self,
        caller: Caller,
        dose_id: i64,
        now: NaiveDateTime,
    ) -> ScheduleResult<DoseTransition> {
        self.authorize_dose(caller, dose_id)?;
        let transition = self.record_missed(dose_id, now)?;
        self.alert_missed(&transition);
        Ok(transition)
    }

    fn record_missed(&self, dose_id: i64, now: NaiveDateTime) -> ScheduleResult<DoseTransition> {
        self.db.in_transaction(|_| {
            let transition = self.ledger().mark_missed_at(dose_id, now)?;
            self.aggregator().record_transition(&transition)?;
            Ok(transition)
        })
    }

    pub fn cancel_dose(&self, caller: Caller, dose_id: i64) -> ScheduleResult<DoseTransition> {
        self.cancel_dose_at(caller, dose_id, civil_now())
    }

    pub fn cancel_dose_at(
        &self,
        caller: Caller,
        dose_id: i64,
        now: NaiveDateTime,
    ) -> ScheduleResult<DoseTransition> {
        self.authorize_dose(caller, dose_id)?;
        self.ledger().cancel_at(dose_id, now)
    }

    /// Miss every pending dose whose acceptance window closed before `now`.
    ///
    /// The window closes at the reminder's `time_window_end` on the dose day,
    /// or `missed_grace_minutes` after the scheduled time when there is no
    /// window (or drift pushed the dose past it).
    pub fn sweep_overdue(&self, now: NaiveDateTime) -> ScheduleResult<SweepReport> {
        let grace = Duration::try_minutes(self.config.missed_grace_minutes).ok_or_else(|| {
            ScheduleError::Validation(format!(
                "Missed grace of {} minutes is out of range",
                self.config.missed_grace_minutes
            ))
        })?;
        let mut report = SweepReport::default();

        for (dose, window_end) in self.db.list_pending_doses_before(now)? {
            let deadline = window_end
                .map(|end| dose.dose_date.and_time(end))
                .filter(|end| *end >= dose.scheduled_time)
                .or_else(|| dose.scheduled_time.checked_add_signed(grace))
                .unwrap_or(NaiveDateTime::MAX);
            if now <= deadline {
                continue;
            }

            match self.record_missed(dose.id, now) {
                Ok(transition) => {
                    report.missed.push(dose.id);
                    self.alert_missed(&transition);
                }
                Err(ScheduleError::InvalidStateTransition { .. }) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(dose_id = dose.id, error = %e, "Failed to mark overdue dose missed");
                    report.failed.push((dose.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            missed = report.missed.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "Overdue sweep finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Pair a dispenser with a patient the caller may act on.
    pub fn connect_device(
        &self,
        caller: Caller,
        patient_id: i64,
        hardware_id: &str,
        device_name: Option<&str>,
        connection_type: &str,
    ) -> ScheduleResult<Device> {
        if hardware_id.trim().is_empty() {
            return Err(ScheduleError::Validation("Device ID must not be empty".into()));
        }
        self.authorize_patient(caller, patient_id)?;

        let id = self
            .db
            .connect_device(hardware_id, patient_id, device_name, connection_type, civil_now())?;
        tracing::info!(device_row_id = id, patient_id, "Device connected");
        self.db
            .get_device(id)?
            .ok_or_else(|| ScheduleError::NotFound(format!("Device {}", hardware_id)))
    }

    /// Load a compartment with one of the device owner's medications.
    pub fn assign_compartment(
        &self,
        caller: Caller,
        hardware_id: &str,
        compartment_number: i64,
        medication_id: i64,
        current_stock: i64,
        low_stock_threshold: i64,
    ) -> ScheduleResult<Compartment> {
        if compartment_number < 1 {
            return Err(ScheduleError::Validation(format!(
                "Compartment number must be positive, got {}",
                compartment_number
            )));
        }
        if current_stock < 0 || low_stock_threshold < 0 {
            return Err(ScheduleError::Validation(
                "Stock and threshold must not be negative".into(),
            ));
        }

        let device = self.device_by_hardware_id(hardware_id)?;
        let owner = device
            .patient_id
            .ok_or_else(|| ScheduleError::NotFound(format!("Device {}", hardware_id)))?;
        self.authorize_patient(caller, owner)
            .map_err(|_| ScheduleError::NotFound(format!("Device {}", hardware_id)))?;

        let medication = self.authorize_medication(caller, medication_id)?;
        if medication.patient_id != owner {
            return Err(ScheduleError::Validation(format!(
                "Medication {} does not belong to the device's patient",
                medication_id
            )));
        }

        self.db.assign_compartment(
            device.id,
            compartment_number,
            medication_id,
            current_stock,
            low_stock_threshold,
            civil_now(),
        )?;
        self.db
            .get_compartment(device.id, compartment_number)?
            .ok_or_else(|| {
                ScheduleError::NotFound(format!("Compartment {} of {}", compartment_number, hardware_id))
            })
    }

    /// Record a dispenser event and reconcile it when it is a dispense.
    ///
    /// The raw event is always kept. Reconciliation, adherence and drift share
    /// one transaction; a low-stock alert follows the commit.
    pub fn handle_device_event(
        &self,
        hardware_id: &str,
        input: &DeviceEventInput,
        observed_at: NaiveDateTime,
    ) -> ScheduleResult<DeviceEventOutcome> {
        if input.event_type.trim().is_empty() {
            return Err(ScheduleError::Validation("Event type must not be empty".into()));
        }
        let device = self.device_by_hardware_id(hardware_id)?;
        let event_id = self.db.record_device_event(device.id, input, observed_at)?;

        let Some(compartment_number) = input.reconcilable_compartment() else {
            tracing::debug!(event_id, event_type = %input.event_type, "Device event recorded for audit");
            return Ok(DeviceEventOutcome {
                event_id,
                reconciliation: None,
                adherence: None,
                shifted: 0,
            });
        };

        let outcome = self.db.in_transaction(|db| {
            let reconciliation = self
                .reconciler()
                .reconcile(device.id, compartment_number, observed_at)?;

            let (adherence, shifted) = match &reconciliation.transition {
                Some(transition) => {
                    db.set_event_matched_dose(event_id, transition.dose_id)?;
                    let adherence = self.aggregator().record_transition(transition)?;
                    let shifted = self.drift().shift_if_late_at(
                        transition.reminder_id,
                        transition.delay_minutes,
                        observed_at,
                    )?;
                    (adherence, shifted)
                }
                None => (None, 0),
            };

            Ok::<_, ScheduleError>(DeviceEventOutcome {
                event_id,
                reconciliation: Some(reconciliation),
                adherence,
                shifted,
            })
        })?;

        if let Some(reconciliation) = &outcome.reconciliation {
            if reconciliation.low_stock {
                self.alert_low_stock(&device, reconciliation);
            }
        }
        Ok(outcome)
    }

    pub fn update_device_status(
        &self,
        hardware_id: &str,
        status: &DeviceStatusInput,
    ) -> ScheduleResult<Device> {
        self.update_device_status_at(hardware_id, status, civil_now())
    }

    /// Apply a dispenser status callback.
    pub fn update_device_status_at(
        &self,
        hardware_id: &str,
        status: &DeviceStatusInput,
        now: NaiveDateTime,
    ) -> ScheduleResult<Device> {
        if let Some(level) = status.battery_level {
            if !(0..=100).contains(&level) {
                return Err(ScheduleError::Validation(format!(
                    "Battery level must be between 0 and 100, got {}",
                    level
                )));
            }
        }
        let compartments = status.compartments.as_deref().unwrap_or_default();
        if let Some(bad) = compartments.iter().find(|c| c.number < 1 || c.stock < 0) {
            return Err(ScheduleError::Validation(format!(
                "Invalid stock report for compartment {}",
                bad.number
            )));
        }

        let device = self.device_by_hardware_id(hardware_id)?;
        let updated = self.db.in_transaction(|db| {
            let updated = db
                .update_device_status(device.id, status.battery_level, status.is_connected, now)?
                .ok_or_else(|| ScheduleError::NotFound(format!("Device {}", hardware_id)))?;
            for report in compartments {
                db.set_compartment_stock(device.id, report.number, report.stock, report.medication_id, now)?;
            }
            Ok::<_, ScheduleError>(updated)
        })?;

        tracing::debug!(
            device_row_id = updated.id,
            battery_level = updated.battery_level,
            compartments = compartments.len(),
            "Device status updated"
        );

        if status.battery_level.is_some() && updated.battery_level < self.config.low_battery_threshold {
            self.alert_low_battery(&updated);
        }
        Ok(updated)
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    fn caregiver_of(&self, patient_id: i64) -> Option<i64> {
        match self.db.find_patient(patient_id) {
            Ok(Some(patient)) => Some(patient.caregiver_id),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(patient_id, error = %e, "Could not resolve caregiver for alert");
                None
            }
        }
    }

    fn raise(&self, patient_id: i64, payload: AlertPayload) {
        if let Some(caregiver_id) = self.caregiver_of(patient_id) {
            raise_quietly(self.alerts.as_ref(), &NewAlert::new(caregiver_id, patient_id, payload));
        }
    }

    fn alert_missed(&self, transition: &DoseTransition) {
        self.raise(
            transition.patient_id,
            AlertPayload::MissedDose {
                dose_id: transition.dose_id,
                medication_id: transition.medication_id,
                scheduled_time: transition.scheduled_time,
            },
        );
    }

    fn alert_low_stock(&self, device: &Device, reconciliation: &ReconcileOutcome) {
        let Some(compartment) = &reconciliation.compartment else {
            return;
        };
        self.raise(
            reconciliation.assignment.patient_id,
            AlertPayload::LowStock {
                device_id: device.device_id.clone(),
                compartment_number: compartment.compartment_number,
                medication_id: reconciliation.assignment.medication_id,
                current_stock: compartment.current_stock,
                low_stock_threshold: compartment.low_stock_threshold,
            },
        );
    }

    fn alert_low_battery(&self, device: &Device) {
        let Some(patient_id) = device.patient_id else {
            return;
        };
        self.raise(
            patient_id,
            AlertPayload::LowBattery {
                device_id: device.device_id.clone(),
                battery_level: device.battery_level,
                threshold: self.config.low_battery_threshold,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbResult;
    use crate::models::{AlertFilter, AlertType, CompartmentStock, DoseStatus, NewMedication};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    struct Fixture {
        db: Database,
        caregiver: i64,
        patient: i64,
        med: i64,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let caregiver = db.insert_caregiver("Ada", "ada@example.com").unwrap();
        let patient = db.insert_patient(caregiver, "Grace").unwrap();
        let med = db
            .insert_medication(patient, &NewMedication::named("Metformin"))
            .unwrap();
        Fixture {
            db,
            caregiver,
            patient,
            med,
        }
    }

    fn short_horizon() -> SchedulerConfig {
        SchedulerConfig {
            horizon_days: 3,
            ..Default::default()
        }
    }

    struct RecordingSink(Rc<RefCell<Vec<NewAlert>>>);

    impl AlertSink for RecordingSink {
        fn raise(&self, alert: &NewAlert) -> DbResult<Option<i64>> {
            let mut raised = self.0.borrow_mut();
            raised.push(alert.clone());
            Ok(Some(raised.len() as i64))
        }
    }

    struct BrokenSink;

    impl AlertSink for BrokenSink {
        fn raise(&self, _alert: &NewAlert) -> DbResult<Option<i64>> {
            Err(crate::db::DbError::Constraint("alerts unavailable".into()))
        }
    }

    #[test]
    fn test_define_reminders_expands_horizon() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());

        let def = engine
            .define_reminders_at(
                Caller::Caregiver(f.caregiver),
                f.med,
                &[ReminderInput::at("morning", "08:00"), ReminderInput::at("evening", "20:00")],
                ts("2026-03-01 07:00:00"),
            )
            .unwrap();

        assert_eq!(def.reminders.len(), 2);
        assert_eq!(def.superseded, 0);
        assert_eq!(def.expansions.iter().map(|e| e.created.len()).sum::<usize>(), 6);
    }

    #[test]
    fn test_redefinition_supersedes() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        let caller = Caller::Caregiver(f.caregiver);

        let first = engine
            .define_reminders_at(caller, f.med, &[ReminderInput::at("morning", "08:00")], ts("2026-03-01 07:00:00"))
            .unwrap();
        let old_reminder = first.reminders[0].id;

        let second = engine
            .define_reminders_at(caller, f.med, &[ReminderInput::at("morning", "09:00")], ts("2026-03-01 12:00:00"))
            .unwrap();
        assert_eq!(second.superseded, 1);
        // Day 2 and 3 of the old reminder were still in the future
        assert_eq!(second.cancelled_doses, 2);

        let old_doses = f.db.list_doses_for_reminder(old_reminder).unwrap();
        assert_eq!(old_doses[0].status, DoseStatus::Pending);
        assert_eq!(old_doses[0].reminder_id, old_reminder);
        assert!(old_doses[1..].iter().all(|d| d.status == DoseStatus::Cancelled));

        let active = engine.list_reminders(caller, f.med).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.reminders[0].id);
    }

    #[test]
    fn test_invalid_input_changes_nothing() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        let caller = Caller::Caregiver(f.caregiver);
        engine
            .define_reminders_at(caller, f.med, &[ReminderInput::at("morning", "08:00")], ts("2026-03-01 07:00:00"))
            .unwrap();

        let result = engine.define_reminders_at(
            caller,
            f.med,
            &[ReminderInput::at("noon", "12:00"), ReminderInput::at("bad", "25:99")],
            ts("2026-03-01 07:00:00"),
        );
        assert!(matches!(result, Err(ScheduleError::Validation(_))));
        assert_eq!(engine.list_reminders(caller, f.med).unwrap()[0].time_slot, "morning");
    }

    #[test]
    fn test_foreign_caller_sees_not_found() {
        let f = setup();
        let stranger = f.db.insert_caregiver("Eve", "eve@example.com").unwrap();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());

        let result = engine.define_reminders_at(
            Caller::Caregiver(stranger),
            f.med,
            &[ReminderInput::at("morning", "08:00")],
            ts("2026-03-01 07:00:00"),
        );
        let missing = engine.list_reminders(Caller::Caregiver(f.caregiver), 999);

        match (result, missing) {
            (Err(ScheduleError::NotFound(a)), Err(ScheduleError::NotFound(b))) => {
                assert_eq!(a, format!("Medication {}", f.med));
                assert_eq!(b, "Medication 999");
            }
            other => panic!("expected NotFound twice, got {:?}", other),
        }
    }

    #[test]
    fn test_confirm_late_counts_and_shifts() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        let def = engine
            .define_reminders_at(
                Caller::Patient(f.patient),
                f.med,
                &[ReminderInput::at("morning", "08:00")],
                ts("2026-03-01 07:00:00"),
            )
            .unwrap();
        let doses = f.db.list_doses_for_reminder(def.reminders[0].id).unwrap();

        let confirmation = engine
            .confirm_dose_at(
                Caller::Patient(f.patient),
                doses[0].id,
                TakenBy::Manual,
                Some("after breakfast"),
                ts("2026-03-01 08:20:00"),
            )
            .unwrap();

        assert_eq!(confirmation.transition.delay_minutes, 20);
        assert_eq!(confirmation.shifted, 2);
        let log = confirmation.adherence.unwrap();
        assert_eq!(log.late_doses, 1);
        assert_eq!(log.adherence_percentage, 100.0);

        let again = engine.confirm_dose_at(
            Caller::Patient(f.patient),
            doses[0].id,
            TakenBy::Manual,
            None,
            ts("2026-03-01 08:21:00"),
        );
        assert!(matches!(again, Err(ScheduleError::InvalidStateTransition { .. })));
        assert_eq!(f.db.get_dose(doses[1].id).unwrap().unwrap().scheduled_time, ts("2026-03-02 08:20:00"));
    }

    #[test]
    fn test_manual_path_rejects_device_actor() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        let def = engine
            .define_reminders_at(
                Caller::Patient(f.patient),
                f.med,
                &[ReminderInput::at("morning", "08:00")],
                ts("2026-03-01 07:00:00"),
            )
            .unwrap();
        let dose = def.expansions[0].created[0];

        let result = engine.confirm_dose_at(
            Caller::Patient(f.patient),
            dose,
            TakenBy::Device,
            None,
            ts("2026-03-01 08:01:00"),
        );
        assert!(matches!(result, Err(ScheduleError::Validation(_))));

        let stored = f.db.get_dose(dose).unwrap().unwrap();
        assert!(stored.is_pending());
        assert!(!stored.device_verified);
    }

    #[test]
    fn test_miss_alerts_caregiver() {
        let f = setup();
        let raised = Rc::new(RefCell::new(Vec::new()));
        let engine = AdherenceEngine::with_config(&f.db, short_horizon())
            .with_alert_sink(Box::new(RecordingSink(Rc::clone(&raised))));
        let def = engine
            .define_reminders_at(
                Caller::Caregiver(f.caregiver),
                f.med,
                &[ReminderInput::at("morning", "08:00")],
                ts("2026-03-01 07:00:00"),
            )
            .unwrap();
        let dose = def.expansions[0].created[0];

        let transition = engine
            .miss_dose_at(Caller::Caregiver(f.caregiver), dose, ts("2026-03-01 10:00:00"))
            .unwrap();
        assert_eq!(transition.new_status, DoseStatus::Missed);

        let raised = raised.borrow();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].caregiver_id, f.caregiver);
        assert_eq!(raised[0].alert_type(), AlertType::MissedDose);
    }

    #[test]
    fn test_broken_alert_sink_never_fails_operation() {
        let f = setup();
        let engine =
            AdherenceEngine::with_config(&f.db, short_horizon()).with_alert_sink(Box::new(BrokenSink));
        let def = engine
            .define_reminders_at(
                Caller::Caregiver(f.caregiver),
                f.med,
                &[ReminderInput::at("morning", "08:00")],
                ts("2026-03-01 07:00:00"),
            )
            .unwrap();
        let dose = def.expansions[0].created[0];

        assert!(engine
            .miss_dose_at(Caller::Caregiver(f.caregiver), dose, ts("2026-03-01 10:00:00"))
            .is_ok());
        assert_eq!(f.db.get_dose(dose).unwrap().unwrap().status, DoseStatus::Missed);
    }

    #[test]
    fn test_sweep_respects_window_end_and_grace() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        let mut windowed = ReminderInput::at("morning", "08:00");
        windowed.time_window_end = Some("08:30".into());
        let def = engine
            .define_reminders_at(
                Caller::Caregiver(f.caregiver),
                f.med,
                &[windowed, ReminderInput::at("noon", "12:00")],
                ts("2026-03-01 07:00:00"),
            )
            .unwrap();
        let morning = def.expansions[0].created[0];
        let noon = def.expansions[1].created[0];

        // 12:45 is past the morning window but within the noon grace hour
        let report = engine.sweep_overdue(ts("2026-03-01 12:45:00")).unwrap();
        assert_eq!(report.missed, vec![morning]);
        assert!(f.db.get_dose(noon).unwrap().unwrap().is_pending());

        let report = engine.sweep_overdue(ts("2026-03-01 13:01:00")).unwrap();
        assert_eq!(report.missed, vec![noon]);

        let unread = f
            .db
            .list_alerts(f.caregiver, &AlertFilter::default(), 10)
            .unwrap();
        assert_eq!(unread.len(), 2);
    }

    #[test]
    fn test_out_of_range_minutes_fail_without_panicking() {
        let f = setup();
        let caller = Caller::Caregiver(f.caregiver);
        let engine = AdherenceEngine::with_config(
            &f.db,
            SchedulerConfig {
                horizon_days: 1,
                match_window_minutes: i64::MAX,
                missed_grace_minutes: i64::MAX,
                ..Default::default()
            },
        );
        let def = engine
            .define_reminders_at(caller, f.med, &[ReminderInput::at("morning", "08:00")], ts("2026-03-01 07:00:00"))
            .unwrap();
        let dose = def.expansions[0].created[0];
        engine.connect_device(caller, f.patient, "DISP-1", None, "wifi").unwrap();
        engine.assign_compartment(caller, "DISP-1", 1, f.med, 6, 1).unwrap();

        let event = engine.handle_device_event("DISP-1", &DeviceEventInput::lid_opened(1), ts("2026-03-01 08:05:00"));
        assert!(matches!(event, Err(ScheduleError::Validation(_))));
        let sweep = engine.sweep_overdue(ts("2026-03-02 08:00:00"));
        assert!(matches!(sweep, Err(ScheduleError::Validation(_))));
        assert!(f.db.get_dose(dose).unwrap().unwrap().is_pending());
    }

    #[test]
    fn test_device_event_flow() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        let caller = Caller::Caregiver(f.caregiver);
        let def = engine
            .define_reminders_at(caller, f.med, &[ReminderInput::at("morning", "08:00")], ts("2026-03-01 07:00:00"))
            .unwrap();
        let dose = def.expansions[0].created[0];

        engine
            .connect_device(caller, f.patient, "DISP-1", Some("Kitchen"), "wifi")
            .unwrap();
        engine.assign_compartment(caller, "DISP-1", 1, f.med, 6, 5).unwrap();

        let outcome = engine
            .handle_device_event("DISP-1", &DeviceEventInput::lid_opened(1), ts("2026-03-01 08:07:00"))
            .unwrap();
        assert_eq!(outcome.matched_dose_id(), Some(dose));
        assert_eq!(outcome.adherence.unwrap().taken_doses, 1);

        let event = f.db.get_device_event(outcome.event_id).unwrap().unwrap();
        assert_eq!(event.matched_dose_id, Some(dose));

        // Stock 6 -> 5 hits the threshold
        let alerts = f
            .db
            .list_alerts(
                f.caregiver,
                &AlertFilter {
                    alert_type: Some(AlertType::LowStock),
                    ..Default::default()
                },
                10,
            )
            .unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_non_dispense_event_is_audit_only() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        engine
            .connect_device(Caller::Caregiver(f.caregiver), f.patient, "DISP-1", None, "wifi")
            .unwrap();

        let outcome = engine
            .handle_device_event(
                "DISP-1",
                &DeviceEventInput {
                    event_type: "lid_closed".into(),
                    compartment_number: Some(1),
                    event_data: None,
                },
                ts("2026-03-01 08:00:00"),
            )
            .unwrap();
        assert!(outcome.reconciliation.is_none());

        let unknown = engine.handle_device_event("NOPE", &DeviceEventInput::lid_opened(1), ts("2026-03-01 08:00:00"));
        assert!(matches!(unknown, Err(ScheduleError::NotFound(_))));
    }

    #[test]
    fn test_low_battery_alert_is_deduplicated() {
        let f = setup();
        let engine = AdherenceEngine::with_config(&f.db, short_horizon());
        engine
            .connect_device(Caller::Caregiver(f.caregiver), f.patient, "DISP-1", None, "wifi")
            .unwrap();

        let low = DeviceStatusInput {
            battery_level: Some(12),
            is_connected: Some(true),
            compartments: Some(vec![CompartmentStock {
                number: 2,
                stock: 14,
                medication_id: Some(f.med),
            }]),
        };
        let device = engine.update_device_status_at("DISP-1", &low, ts("2026-03-01 08:00:00")).unwrap();
        assert_eq!(device.battery_level, 12);
        engine.update_device_status_at("DISP-1", &low, ts("2026-03-01 09:00:00")).unwrap();

        assert_eq!(f.db.unread_alert_count(f.caregiver).unwrap(), 1);
        let compartment = f.db.get_compartment(device.id, 2).unwrap().unwrap();
        assert_eq!(compartment.current_stock, 14);

        let invalid = DeviceStatusInput {
            battery_level: Some(140),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_device_status_at("DISP-1", &invalid, ts("2026-03-01 10:00:00")),
            Err(ScheduleError::Validation(_))
        ));
    }
}
