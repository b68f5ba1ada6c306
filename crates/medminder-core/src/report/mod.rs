//! Read-only views over doses and adherence rollups.

mod adherence;
mod dashboard;

pub use adherence::*;
pub use dashboard::*;

use crate::db::Database;
use crate::models::Patient;
use crate::schedule::{Caller, ScheduleError, ScheduleResult};

/// Builds reports for patients the caller may see.
pub struct Reporter<'a> {
    db: &'a Database,
    low_battery_threshold: i64,
}

impl<'a> Reporter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_low_battery_threshold(db, 20)
    }

    pub fn with_low_battery_threshold(db: &'a Database, low_battery_threshold: i64) -> Self {
        Self {
            db,
            low_battery_threshold,
        }
    }

    fn patient(&self, caller: Caller, patient_id: i64) -> ScheduleResult<Patient> {
        self.db
            .find_patient(patient_id)?
            .filter(|p| caller.can_access(p))
            .ok_or_else(|| ScheduleError::NotFound(format!("Patient {}", patient_id)))
    }
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
