//! Adherence rollup models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Outcome folded into a daily rollup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdherenceOutcome {
    /// Taken; `late` also bumps the late counter
    Taken { late: bool },
    Missed,
}

impl AdherenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdherenceOutcome::Taken { .. } => "taken",
            AdherenceOutcome::Missed => "missed",
        }
    }

    /// Counter increments as `(taken, missed, late)`.
    pub fn increments(&self) -> (i64, i64, i64) {
        match self {
            AdherenceOutcome::Taken { late } => (1, 0, i64::from(*late)),
            AdherenceOutcome::Missed => (0, 1, 0),
        }
    }
}

/// Rollup key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AdherenceKey {
    pub patient_id: i64,
    pub medication_id: i64,
    pub date: NaiveDate,
}

/// Daily rollup for one patient and medication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdherenceLog {
    pub patient_id: i64,
    pub medication_id: i64,
    pub date: NaiveDate,
    pub total_doses: i64,
    pub taken_doses: i64,
    pub missed_doses: i64,
    pub late_doses: i64,
    /// `taken / total * 100`, 0 when total is 0
    pub adherence_percentage: f64,
}

/// Percentage of taken doses, 0 when nothing was recorded.
pub fn adherence_percentage(taken: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        taken as f64 / total as f64 * 100.0
    }
}
