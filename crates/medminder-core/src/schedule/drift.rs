//! Drift shifting: a late confirmation pushes the rest of the schedule later.

use chrono::NaiveDateTime;

use super::ScheduleResult;
use crate::db::Database;
use crate::models::civil_now;

/// Delay that must be exceeded before future doses move.
pub const DEFAULT_DRIFT_THRESHOLD_MINUTES: i64 = 15;

pub struct DriftShifter<'a> {
    db: &'a Database,
    threshold_minutes: i64,
}

impl<'a> DriftShifter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_threshold(db, DEFAULT_DRIFT_THRESHOLD_MINUTES)
    }

    pub fn with_threshold(db: &'a Database, threshold_minutes: i64) -> Self {
        Self {
            db,
            threshold_minutes,
        }
    }

    pub fn shift_if_late(&self, reminder_id: i64, delay_minutes: i64) -> ScheduleResult<usize> {
        self.shift_if_late_at(reminder_id, delay_minutes, civil_now())
    }

    /// Shift the reminder's pending doses after `now` by `delay_minutes`
    /// when the delay exceeds the threshold. Returns how many doses moved.
    pub fn shift_if_late_at(
        &self,
        reminder_id: i64,
        delay_minutes: i64,
        now: NaiveDateTime,
    ) -> ScheduleResult<usize> {
        if delay_minutes <= self.threshold_minutes {
            return Ok(0);
        }

        let shifted = self.db.shift_pending_doses(reminder_id, delay_minutes, now)?;
        tracing::info!(reminder_id, delay_minutes, shifted, "Shifted future doses");
        Ok(shifted)
    }
}
