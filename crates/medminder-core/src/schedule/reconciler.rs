//! Event reconciliation: dispenser signals to pending doses.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{DoseLedger, ScheduleError, ScheduleResult};
use crate::db::Database;
use crate::models::{Compartment, CompartmentAssignment, Dose, DoseTransition, TakenBy};

/// Default tolerance around a dose's scheduled time.
pub const DEFAULT_MATCH_WINDOW_MINUTES: i64 = 15;

/// Result of reconciling one dispense signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub assignment: CompartmentAssignment,
    /// Transition applied to the matched dose, if any dose matched
    pub transition: Option<DoseTransition>,
    /// Compartment state after the decrement
    pub compartment: Option<Compartment>,
    /// Stock fell to or below the compartment's threshold
    pub low_stock: bool,
}

impl ReconcileOutcome {
    pub fn matched_dose_id(&self) -> Option<i64> {
        self.transition.as_ref().map(|t| t.dose_id)
    }
}

/// Pick the dose nearest to `observed_at`; equidistant doses go to the lowest ID.
pub fn select_candidate(candidates: &[Dose], observed_at: NaiveDateTime) -> Option<&Dose> {
    candidates
        .iter()
        .filter(|d| d.is_pending())
        .min_by_key(|d| (d.distance_secs(observed_at), d.id))
}

/// Matches dispenser events to at most one pending dose.
pub struct EventReconciler<'a> {
    db: &'a Database,
    ledger: DoseLedger<'a>,
    window_minutes: i64,
}

impl<'a> EventReconciler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_window_minutes(db, DEFAULT_MATCH_WINDOW_MINUTES)
    }

    pub fn with_window_minutes(db: &'a Database, minutes: i64) -> Self {
        Self {
            db,
            ledger: DoseLedger::new(db),
            window_minutes: minutes,
        }
    }

    /// Search bounds around `observed_at`; `Validation` when the window overflows.
    fn search_bounds(
        &self,
        observed_at: NaiveDateTime,
    ) -> ScheduleResult<(NaiveDateTime, NaiveDateTime)> {
        let window = Duration::try_minutes(self.window_minutes);
        window
            .and_then(|w| {
                observed_at
                    .checked_sub_signed(w)
                    .zip(observed_at.checked_add_signed(w))
            })
            .ok_or_else(|| {
                ScheduleError::Validation(format!(
                    "Match window of {} minutes is out of range",
                    self.window_minutes
                ))
            })
    }

    /// Reconcile a dispense from `compartment_number` of a device observed at `observed_at`.
    ///
    /// Candidate search, transition and stock decrement share one transaction,
    /// so a single event can confirm at most one dose.
    pub fn reconcile(
        &self,
        device_row_id: i64,
        compartment_number: i64,
        observed_at: NaiveDateTime,
    ) -> ScheduleResult<ReconcileOutcome> {
        let assignment = self
            .db
            .resolve_compartment(device_row_id, compartment_number)?
            .ok_or_else(|| {
                ScheduleError::NotFound(format!(
                    "Compartment {} of device {}",
                    compartment_number, device_row_id
                ))
            })?;

        let (from, to) = self.search_bounds(observed_at)?;

        self.db.in_transaction(|db| {
            let candidates = db.find_pending_doses_between(
                assignment.patient_id,
                assignment.medication_id,
                from,
                to,
            )?;

            let Some(dose) = select_candidate(&candidates, observed_at) else {
                tracing::info!(
                    device_row_id,
                    compartment_number,
                    observed_at = %observed_at,
                    "No pending dose within window, event kept for audit only"
                );
                return Ok(ReconcileOutcome {
                    assignment,
                    transition: None,
                    compartment: None,
                    low_stock: false,
                });
            };

            let transition = self
                .ledger
                .mark_taken_at(dose.id, TakenBy::Device, None, observed_at)?;
            let compartment = db.decrement_stock(device_row_id, compartment_number, observed_at)?;
            let low_stock = compartment.as_ref().is_some_and(Compartment::is_low);

            tracing::info!(
                device_row_id,
                compartment_number,
                dose_id = transition.dose_id,
                candidates = candidates.len(),
                low_stock,
                "Reconciled dispenser event"
            );

            Ok(ReconcileOutcome {
                assignment,
                transition: Some(transition),
                compartment,
                low_stock,
            })
        })
    }
}
