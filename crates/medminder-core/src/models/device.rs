//! Dispenser device models.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The only event type that triggers dose reconciliation.
pub const LID_OPENED: &str = "lid_opened";

/// A physical dispenser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// Store row ID
    pub id: i64,
    /// Hardware identifier reported by the dispenser
    pub device_id: String,
    /// Current owner; a device serves at most one patient at a time
    pub patient_id: Option<i64>,
    pub device_name: Option<String>,
    pub connection_type: String,
    pub battery_level: i64,
    pub is_connected: bool,
    pub last_sync: Option<NaiveDateTime>,
}

/// One compartment of a dispenser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Compartment {
    pub device_row_id: i64,
    pub compartment_number: i64,
    pub medication_id: Option<i64>,
    pub current_stock: i64,
    pub low_stock_threshold: i64,
    pub last_refill: Option<NaiveDateTime>,
}

impl Compartment {
    pub fn is_low(&self) -> bool {
        self.current_stock <= self.low_stock_threshold
    }
}

/// Result of resolving `(device, compartment)` to what it dispenses and for whom.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompartmentAssignment {
    pub device_row_id: i64,
    pub compartment_number: i64,
    pub medication_id: i64,
    pub patient_id: i64,
}

/// Event payload posted by a dispenser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceEventInput {
    pub event_type: String,
    #[serde(default)]
    pub compartment_number: Option<i64>,
    #[serde(default)]
    pub event_data: Option<serde_json::Value>,
}

impl DeviceEventInput {
    pub fn lid_opened(compartment_number: i64) -> Self {
        Self {
            event_type: LID_OPENED.into(),
            compartment_number: Some(compartment_number),
            event_data: None,
        }
    }

    /// Compartment to reconcile, if this event should reconcile at all.
    pub fn reconcilable_compartment(&self) -> Option<i64> {
        if self.event_type == LID_OPENED {
            self.compartment_number
        } else {
            None
        }
    }
}

/// A recorded device event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEvent {
    pub id: i64,
    pub device_row_id: i64,
    pub event_type: String,
    pub compartment_number: Option<i64>,
    pub event_data: serde_json::Value,
    /// Dose this event confirmed, if reconciliation matched one
    pub matched_dose_id: Option<i64>,
    pub observed_at: NaiveDateTime,
}

/// Per-compartment stock report in a device status callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompartmentStock {
    pub number: i64,
    pub stock: i64,
    #[serde(default)]
    pub medication_id: Option<i64>,
}

/// Status callback payload posted by a dispenser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatusInput {
    #[serde(default)]
    pub battery_level: Option<i64>,
    #[serde(default)]
    pub is_connected: Option<bool>,
    #[serde(default)]
    pub compartments: Option<Vec<CompartmentStock>>,
}
