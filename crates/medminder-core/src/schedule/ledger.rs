//! Dose ledger: the only place dose status changes.

use chrono::NaiveDateTime;

use super::{ScheduleError, ScheduleResult};
use crate::db::Database;
use crate::models::{civil_now, Dose, DoseStatus, DoseTransition, TakenBy};

/// Applies terminal transitions to pending doses.
///
/// Every transition is one compare-and-set statement. Two racing callers on
/// the same dose see exactly one success; the other gets
/// [`ScheduleError::InvalidStateTransition`].
pub struct DoseLedger<'a> {
    db: &'a Database,
}

impl<'a> DoseLedger<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn mark_taken(
        &self,
        dose_id: i64,
        actor: TakenBy,
        notes: Option<&str>,
    ) -> ScheduleResult<DoseTransition> {
        self.mark_taken_at(dose_id, actor, notes, civil_now())
    }

    /// Mark a dose taken as of `at`, recording the delay against its schedule.
    pub fn mark_taken_at(
        &self,
        dose_id: i64,
        actor: TakenBy,
        notes: Option<&str>,
        at: NaiveDateTime,
    ) -> ScheduleResult<DoseTransition> {
        match self.db.mark_dose_taken(dose_id, actor, notes, at)? {
            Some(dose) => {
                tracing::info!(
                    dose_id,
                    actor = actor.as_str(),
                    delay_minutes = dose.delay_minutes,
                    "Dose taken"
                );
                Ok(transition(&dose, Some(actor), at))
            }
            None => Err(self.rejection(dose_id)?),
        }
    }

    pub fn mark_missed(&self, dose_id: i64) -> ScheduleResult<DoseTransition> {
        self.mark_missed_at(dose_id, civil_now())
    }

    pub fn mark_missed_at(&self, dose_id: i64, at: NaiveDateTime) -> ScheduleResult<DoseTransition> {
        match self.db.mark_dose_missed(dose_id, at)? {
            Some(dose) => {
                tracing::info!(dose_id, "Dose missed");
                Ok(transition(&dose, None, at))
            }
            None => Err(self.rejection(dose_id)?),
        }
    }

    pub fn cancel(&self, dose_id: i64) -> ScheduleResult<DoseTransition> {
        self.cancel_at(dose_id, civil_now())
    }

    pub fn cancel_at(&self, dose_id: i64, at: NaiveDateTime) -> ScheduleResult<DoseTransition> {
        match self.db.cancel_dose(dose_id, at)? {
            Some(dose) => {
                tracing::info!(dose_id, "Dose cancelled");
                Ok(transition(&dose, None, at))
            }
            None => Err(self.rejection(dose_id)?),
        }
    }

    /// Explain why a compare-and-set touched no row.
    fn rejection(&self, dose_id: i64) -> ScheduleResult<ScheduleError> {
        Ok(match self.db.get_dose(dose_id)? {
            None => ScheduleError::NotFound(format!("Dose {}", dose_id)),
            Some(dose) => {
                tracing::debug!(dose_id, status = %dose.status, "Rejected transition on resolved dose");
                ScheduleError::InvalidStateTransition {
                    dose_id,
                    status: dose.status,
                }
            }
        })
    }
}

fn transition(dose: &Dose, actor: Option<TakenBy>, at: NaiveDateTime) -> DoseTransition {
    DoseTransition {
        dose_id: dose.id,
        reminder_id: dose.reminder_id,
        patient_id: dose.patient_id,
        medication_id: dose.medication_id,
        dose_date: dose.dose_date,
        scheduled_time: dose.scheduled_time,
        new_status: dose.status,
        actor,
        delay_minutes: if dose.status == DoseStatus::Taken {
            dose.delay_minutes
        } else {
            0
        },
        at,
    }
}
