//! Daily adherence rollups.

use chrono::NaiveDate;

use super::ScheduleResult;
use crate::db::Database;
use crate::models::{AdherenceKey, AdherenceLog, AdherenceOutcome, DoseStatus, DoseTransition};

/// Default delay after which a taken dose also counts as late.
pub const DEFAULT_LATE_THRESHOLD_MINUTES: i64 = 15;

/// Folds dose outcomes into per (patient, medication, day) rollups.
pub struct AdherenceAggregator<'a> {
    db: &'a Database,
    late_threshold_minutes: i64,
}

impl<'a> AdherenceAggregator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_late_threshold(db, DEFAULT_LATE_THRESHOLD_MINUTES)
    }

    pub fn with_late_threshold(db: &'a Database, late_threshold_minutes: i64) -> Self {
        Self {
            db,
            late_threshold_minutes,
        }
    }

    /// Add one outcome to the rollup for a key. A single atomic upsert.
    pub fn record(
        &self,
        patient_id: i64,
        medication_id: i64,
        date: NaiveDate,
        outcome: AdherenceOutcome,
    ) -> ScheduleResult<AdherenceLog> {
        let key = AdherenceKey {
            patient_id,
            medication_id,
            date,
        };
        Ok(self.db.apply_adherence_outcome(&key, outcome)?)
    }

    /// Outcome a transition contributes, if any. Cancellations do not count.
    pub fn outcome_for(&self, transition: &DoseTransition) -> Option<AdherenceOutcome> {
        match transition.new_status {
            DoseStatus::Taken => Some(AdherenceOutcome::Taken {
                late: transition.delay_minutes > self.late_threshold_minutes,
            }),
            DoseStatus::Missed => Some(AdherenceOutcome::Missed),
            DoseStatus::Pending | DoseStatus::Cancelled => None,
        }
    }

    /// Record a ledger transition once.
    ///
    /// Returns `None` for cancellations and for replays of a dose that has
    /// already been counted.
    pub fn record_transition(
        &self,
        transition: &DoseTransition,
    ) -> ScheduleResult<Option<AdherenceLog>> {
        let Some(outcome) = self.outcome_for(transition) else {
            return Ok(None);
        };

        self.db.in_transaction(|db| {
            if !db.claim_counted_dose(transition.dose_id, outcome)? {
                tracing::debug!(dose_id = transition.dose_id, "Transition already counted");
                return Ok(None);
            }
            // Rollups key on the materialized day, which drift never changes.
            let log = self.record(
                transition.patient_id,
                transition.medication_id,
                transition.dose_date,
                outcome,
            )?;
            tracing::debug!(
                dose_id = transition.dose_id,
                outcome = outcome.as_str(),
                total = log.total_doses,
                percentage = log.adherence_percentage,
                "Adherence updated"
            );
            Ok(Some(log))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMedication, TakenBy};

    fn setup() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let caregiver = db.insert_caregiver("Ada", "ada@example.com").unwrap();
        let patient = db.insert_patient(caregiver, "Grace").unwrap();
        let med = db
            .insert_medication(patient, &NewMedication::named("Metformin"))
            .unwrap();
        let reminder = db
            .insert_reminder(
                med,
                &crate::models::ReminderInput::at("morning", "08:00").validate().unwrap(),
            )
            .unwrap();
        (db, patient, med, reminder)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn transition(
        dose_id: i64,
        reminder: i64,
        patient: i64,
        med: i64,
        status: DoseStatus,
        delay: i64,
    ) -> DoseTransition {
        let scheduled = date().and_hms_opt(8, 0, 0).unwrap();
        DoseTransition {
            dose_id,
            reminder_id: reminder,
            patient_id: patient,
            medication_id: med,
            dose_date: date(),
            scheduled_time: scheduled,
            new_status: status,
            actor: (status == DoseStatus::Taken).then_some(TakenBy::Manual),
            delay_minutes: delay,
            at: scheduled + chrono::Duration::minutes(delay),
        }
    }

    fn insert_dose(db: &Database, reminder: i64, med: i64, patient: i64, day: NaiveDate) -> i64 {
        db.insert_dose_if_absent(reminder, med, patient, day, day.and_hms_opt(8, 0, 0).unwrap())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_taken_then_missed_is_fifty_percent() {
        let (db, patient, med, _) = setup();
        let aggregator = AdherenceAggregator::new(&db);

        aggregator
            .record(patient, med, date(), AdherenceOutcome::Taken { late: false })
            .unwrap();
        let log = aggregator
            .record(patient, med, date(), AdherenceOutcome::Missed)
            .unwrap();

        assert_eq!(log.total_doses, 2);
        assert_eq!(log.taken_doses, 1);
        assert_eq!(log.missed_doses, 1);
        assert_eq!(log.adherence_percentage, 50.0);
    }

    #[test]
    fn test_replay_does_not_inflate() {
        let (db, patient, med, reminder) = setup();
        let dose = insert_dose(&db, reminder, med, patient, date());
        let aggregator = AdherenceAggregator::new(&db);
        let t = transition(dose, reminder, patient, med, DoseStatus::Taken, 5);

        assert!(aggregator.record_transition(&t).unwrap().is_some());
        assert!(aggregator.record_transition(&t).unwrap().is_none());

        let log = db
            .get_adherence_log(&AdherenceKey {
                patient_id: patient,
                medication_id: med,
                date: date(),
            })
            .unwrap()
            .unwrap();
        assert_eq!(log.total_doses, 1);
        assert_eq!(log.adherence_percentage, 100.0);
    }

    #[test]
    fn test_late_threshold() {
        let (db, patient, med, reminder) = setup();
        let aggregator = AdherenceAggregator::new(&db);

        let on_edge = transition(1, reminder, patient, med, DoseStatus::Taken, 15);
        let late = transition(1, reminder, patient, med, DoseStatus::Taken, 16);
        assert_eq!(aggregator.outcome_for(&on_edge), Some(AdherenceOutcome::Taken { late: false }));
        assert_eq!(aggregator.outcome_for(&late), Some(AdherenceOutcome::Taken { late: true }));

        let cancelled = transition(1, reminder, patient, med, DoseStatus::Cancelled, 0);
        assert_eq!(aggregator.outcome_for(&cancelled), None);
        assert!(aggregator.record_transition(&cancelled).unwrap().is_none());
    }

    #[test]
    fn test_total_never_exceeds_materialized() {
        let (db, patient, med, reminder) = setup();
        let aggregator = AdherenceAggregator::new(&db);
        let dose = insert_dose(&db, reminder, med, patient, date());

        for _ in 0..5 {
            aggregator
                .record_transition(&transition(dose, reminder, patient, med, DoseStatus::Missed, 0))
                .unwrap();
        }

        let materialized = db.count_doses_materialized(patient, med, date()).unwrap();
        let log = db
            .list_adherence_logs(patient, date(), date(), Some(med))
            .unwrap();
        assert!(log[0].total_doses <= materialized);
    }
}
