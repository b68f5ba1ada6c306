//! Dose models: materialized reminder occurrences and their transitions.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Dose lifecycle status. Every status other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Pending,
    Taken,
    Missed,
    Cancelled,
}

impl DoseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Pending => "pending",
            DoseStatus::Taken => "taken",
            DoseStatus::Missed => "missed",
            DoseStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DoseStatus::Pending),
            "taken" => Some(DoseStatus::Taken),
            "missed" => Some(DoseStatus::Missed),
            "cancelled" => Some(DoseStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DoseStatus::Pending)
    }
}

impl std::fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel that confirmed a dose.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TakenBy {
    /// Patient or caregiver tapped "taken" in an app
    Manual,
    /// Dispenser sensor event
    Device,
}

impl TakenBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakenBy::Manual => "manual",
            TakenBy::Device => "device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TakenBy::Manual),
            "device" => Some(TakenBy::Device),
            _ => None,
        }
    }
}

/// A single scheduled dose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dose {
    /// Store-assigned ID (creation order)
    pub id: i64,
    /// Reminder that generated this dose
    pub reminder_id: i64,
    /// Denormalized medication ID
    pub medication_id: i64,
    /// Denormalized patient ID
    pub patient_id: i64,
    /// Calendar day this dose was materialized for
    pub dose_date: NaiveDate,
    /// When the dose is due (moves forward on drift shifts)
    pub scheduled_time: NaiveDateTime,
    pub status: DoseStatus,
    pub taken_at: Option<NaiveDateTime>,
    pub taken_by: Option<TakenBy>,
    pub missed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    /// Confirmed by a dispenser sensor
    pub device_verified: bool,
    /// Minutes between scheduled time and confirmation
    pub delay_minutes: i64,
}

impl Dose {
    pub fn is_pending(&self) -> bool {
        self.status == DoseStatus::Pending
    }

    /// Absolute distance from an observation, in seconds.
    pub fn distance_secs(&self, observed_at: NaiveDateTime) -> i64 {
        (self.scheduled_time - observed_at).num_seconds().abs()
    }
}

/// A dose joined with its medication and reminder labels, for schedule views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledDose {
    pub dose: Dose,
    pub medication_name: String,
    pub strength: Option<String>,
    pub time_slot: String,
    pub food_rule: Option<String>,
}

/// Domain event produced by every successful dose transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseTransition {
    pub dose_id: i64,
    pub reminder_id: i64,
    pub patient_id: i64,
    pub medication_id: i64,
    pub dose_date: NaiveDate,
    pub scheduled_time: NaiveDateTime,
    pub new_status: DoseStatus,
    pub actor: Option<TakenBy>,
    pub delay_minutes: i64,
    /// When the transition was applied
    pub at: NaiveDateTime,
}

/// Whole minutes a confirmation at `at` lags `scheduled`, never negative.
pub fn delay_minutes(scheduled: NaiveDateTime, at: NaiveDateTime) -> i64 {
    (at - scheduled).num_minutes().max(0)
}
