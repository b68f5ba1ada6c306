//! Schedule expansion: reminders into dated dose rows.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{ScheduleError, ScheduleResult};
use crate::db::Database;
use crate::models::{civil_now, Reminder};

/// Outcome of expanding one reminder over a horizon.
///
/// Expansion is partial-success: a day that fails to insert is reported in
/// `failed` and the remaining days are still attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionReport {
    pub reminder_id: i64,
    /// IDs of doses created by this call
    pub created: Vec<i64>,
    /// Days that already had a dose
    pub skipped: Vec<NaiveDate>,
    /// Days that could not be written, with the error
    pub failed: Vec<(NaiveDate, String)>,
}

impl ExpansionReport {
    fn new(reminder_id: i64) -> Self {
        Self {
            reminder_id,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Materializes one dose per calendar day for a reminder.
pub struct ScheduleExpander<'a> {
    db: &'a Database,
}

impl<'a> ScheduleExpander<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Expand `horizon_days` days starting from today's local civil date.
    pub fn expand(&self, reminder: &Reminder, horizon_days: u32) -> ScheduleResult<ExpansionReport> {
        self.expand_from(reminder, horizon_days, civil_now().date())
    }

    /// Expand `horizon_days` days starting from `today`.
    pub fn expand_from(
        &self,
        reminder: &Reminder,
        horizon_days: u32,
        today: NaiveDate,
    ) -> ScheduleResult<ExpansionReport> {
        if !reminder.is_active {
            return Err(ScheduleError::Validation(format!(
                "Reminder {} is no longer active",
                reminder.id
            )));
        }

        let medication = self
            .db
            .find_medication(reminder.medication_id)?
            .ok_or_else(|| ScheduleError::NotFound(format!("Medication {}", reminder.medication_id)))?;

        Ok(self.expand_for_patient(reminder, medication.patient_id, horizon_days, today))
    }

    /// Expand with the owning patient already known. Never fails as a whole.
    pub fn expand_for_patient(
        &self,
        reminder: &Reminder,
        patient_id: i64,
        horizon_days: u32,
        today: NaiveDate,
    ) -> ExpansionReport {
        let mut report = ExpansionReport::new(reminder.id);

        for offset in 0..horizon_days {
            let Some(day) = today.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };

            match self.expand_day(reminder, patient_id, day) {
                Ok(Some(dose_id)) => report.created.push(dose_id),
                Ok(None) => report.skipped.push(day),
                Err(e) => {
                    tracing::warn!(
                        reminder_id = reminder.id,
                        day = %day,
                        error = %e,
                        "Failed to materialize dose, skipping day"
                    );
                    report.failed.push((day, e.to_string()));
                }
            }
        }

        tracing::debug!(
            reminder_id = reminder.id,
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Expanded reminder"
        );
        report
    }

    fn expand_day(
        &self,
        reminder: &Reminder,
        patient_id: i64,
        day: NaiveDate,
    ) -> ScheduleResult<Option<i64>> {
        if self.db.dose_exists_for_day(reminder.id, day)? {
            return Ok(None);
        }
        // The unique index still guards against a concurrent expansion of the same day.
        let dose_id = self.db.insert_dose_if_absent(
            reminder.id,
            reminder.medication_id,
            patient_id,
            day,
            day.and_time(reminder.exact_time),
        )?;
        Ok(dose_id)
    }

    /// Re-expand every schedulable reminder so the horizon keeps rolling.
    pub fn refresh_horizons(
        &self,
        horizon_days: u32,
        today: NaiveDate,
    ) -> ScheduleResult<Vec<ExpansionReport>> {
        let reminders = self.db.list_schedulable_reminders()?;
        let reports: Vec<_> = reminders
            .iter()
            .map(|(reminder, patient_id)| {
                self.expand_for_patient(reminder, *patient_id, horizon_days, today)
            })
            .collect();

        tracing::info!(
            reminders = reports.len(),
            created = reports.iter().map(|r| r.created.len()).sum::<usize>(),
            "Refreshed dose horizons"
        );
        Ok(reports)
    }
}
