//! Caregiver alert models.
//!
//! Alert content is a typed [`AlertPayload`] stored as JSON, never text with
//! identifiers interpolated into it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MissedDose,
    LowStock,
    LowBattery,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::MissedDose => "missed_dose",
            AlertType::LowStock => "low_stock",
            AlertType::LowBattery => "low_battery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missed_dose" => Some(AlertType::MissedDose),
            "low_stock" => Some(AlertType::LowStock),
            "low_battery" => Some(AlertType::LowBattery),
            _ => None,
        }
    }

    /// Device-health alerts are deduplicated while an unread one exists.
    pub fn is_condition(&self) -> bool {
        matches!(self, AlertType::LowStock | AlertType::LowBattery)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Medium,
    High,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AlertSeverity::Info),
            "medium" => Some(AlertSeverity::Medium),
            "high" => Some(AlertSeverity::High),
            _ => None,
        }
    }
}

/// Machine-readable alert content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertPayload {
    MissedDose {
        dose_id: i64,
        medication_id: i64,
        scheduled_time: NaiveDateTime,
    },
    LowStock {
        device_id: String,
        compartment_number: i64,
        medication_id: i64,
        current_stock: i64,
        low_stock_threshold: i64,
    },
    LowBattery {
        device_id: String,
        battery_level: i64,
        threshold: i64,
    },
}

impl AlertPayload {
    pub fn alert_type(&self) -> AlertType {
        match self {
            AlertPayload::MissedDose { .. } => AlertType::MissedDose,
            AlertPayload::LowStock { .. } => AlertType::LowStock,
            AlertPayload::LowBattery { .. } => AlertType::LowBattery,
        }
    }
}

/// Alert to be raised through an [`crate::schedule::AlertSink`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAlert {
    pub caregiver_id: i64,
    pub patient_id: i64,
    pub severity: AlertSeverity,
    pub title: String,
    pub payload: AlertPayload,
}

impl NewAlert {
    pub fn new(caregiver_id: i64, patient_id: i64, payload: AlertPayload) -> Self {
        let (severity, title) = match payload.alert_type() {
            AlertType::MissedDose => (AlertSeverity::High, "Missed Dose"),
            AlertType::LowStock => (AlertSeverity::Medium, "Low Stock Alert"),
            AlertType::LowBattery => (AlertSeverity::Medium, "Low Battery"),
        };
        Self {
            caregiver_id,
            patient_id,
            severity,
            title: title.to_string(),
            payload,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }
}

/// A stored alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub caregiver_id: i64,
    pub patient_id: i64,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub payload: AlertPayload,
    pub is_read: bool,
    pub created_at: String,
}

/// Optional filters for listing a caregiver's alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertFilter {
    pub alert_type: Option<AlertType>,
    pub is_read: Option<bool>,
    pub patient_id: Option<i64>,
}
