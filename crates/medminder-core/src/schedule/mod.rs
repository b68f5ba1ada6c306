//! Dose scheduling and reconciliation engine.
//!
//! Pipeline: Schedule Expander → Dose Ledger → Event Reconciler →
//! Adherence Aggregator → Drift Shifter, orchestrated by [`AdherenceEngine`].

mod expander;
mod ledger;
mod reconciler;
mod aggregator;
mod drift;
mod engine;

pub use expander::*;
pub use ledger::*;
pub use reconciler::*;
pub use aggregator::*;
pub use drift::*;
pub use engine::*;

use crate::db::{Database, DbError, DbResult};
use crate::models::{DoseStatus, NewAlert, Patient};
use thiserror::Error;

/// Scheduling errors.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Missing, or not owned by the caller. The two are reported identically.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dose {dose_id} is already {status}")]
    InvalidStateTransition { dose_id: i64, status: DoseStatus },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Storage error: {0}")]
    Storage(DbError),
}

impl From<DbError> for ScheduleError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ScheduleError::NotFound(what),
            err if err.is_transient() => ScheduleError::TransientStorage(err.to_string()),
            err => ScheduleError::Storage(err),
        }
    }
}

impl ScheduleError {
    /// Whether the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScheduleError::TransientStorage(_))
    }
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Who an engine operation runs on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Caregiver(i64),
    Patient(i64),
}

impl Caller {
    /// Whether this caller may see the patient.
    pub fn can_access(&self, patient: &Patient) -> bool {
        match *self {
            Caller::Caregiver(id) => patient.caregiver_id == id,
            Caller::Patient(id) => patient.id == id,
        }
    }
}

/// Destination for caregiver alerts.
///
/// Raising is fire-and-forget from the engine's point of view: errors are
/// logged by [`raise_quietly`] and never fail the parent operation.
pub trait AlertSink {
    /// Store an alert. `Ok(None)` means it was suppressed as a duplicate.
    fn raise(&self, alert: &NewAlert) -> DbResult<Option<i64>>;
}

impl AlertSink for Database {
    fn raise(&self, alert: &NewAlert) -> DbResult<Option<i64>> {
        self.insert_alert(alert).map(Some)
    }
}

/// Alert sink writing to the caregiver inbox, optionally suppressing repeats.
///
/// With `dedupe_unread` set, low-stock and low-battery alerts are dropped while
/// an unread alert of the same type exists for the patient. Missed-dose alerts
/// always go through.
pub struct AlertInbox<'a> {
    db: &'a Database,
    dedupe_unread: bool,
}

impl<'a> AlertInbox<'a> {
    pub fn new(db: &'a Database, dedupe_unread: bool) -> Self {
        Self { db, dedupe_unread }
    }
}

impl AlertSink for AlertInbox<'_> {
    fn raise(&self, alert: &NewAlert) -> DbResult<Option<i64>> {
        if self.dedupe_unread && alert.alert_type().is_condition() {
            self.db.insert_alert_unless_unread(alert)
        } else {
            self.db.insert_alert(alert).map(Some)
        }
    }
}

/// Raise an alert, logging instead of propagating any failure.
pub fn raise_quietly(sink: &dyn AlertSink, alert: &NewAlert) -> Option<i64> {
    match sink.raise(alert) {
        Ok(Some(id)) => {
            tracing::info!(
                alert_id = id,
                patient_id = alert.patient_id,
                alert_type = alert.alert_type().as_str(),
                "Alert raised"
            );
            Some(id)
        }
        Ok(None) => {
            tracing::debug!(
                patient_id = alert.patient_id,
                alert_type = alert.alert_type().as_str(),
                "Alert suppressed, unread duplicate exists"
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                patient_id = alert.patient_id,
                alert_type = alert.alert_type().as_str(),
                error = %e,
                "Failed to raise alert"
            );
            None
        }
    }
}
