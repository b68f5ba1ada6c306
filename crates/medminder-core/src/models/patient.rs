//! Directory models: caregivers, patients and their medications.

use serde::{Deserialize, Serialize};

/// A caregiver account. Owns patients and receives their alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Caregiver {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

/// A home patient managed by exactly one caregiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Store-assigned ID
    pub id: i64,
    /// Owning caregiver
    pub caregiver_id: i64,
    /// Display name
    pub name: String,
    /// Inactive patients keep their history but get no new schedules
    pub is_active: bool,
    /// Creation timestamp
    pub created_at: String,
}

/// A medication prescribed to a patient.
///
/// Medications are soft-deleted: `is_active` flips to false and the row stays,
/// because historical doses keep referencing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    /// Store-assigned ID
    pub id: i64,
    /// Patient taking this medication
    pub patient_id: i64,
    /// Medication name (e.g., "Metformin")
    pub name: String,
    /// Strength (e.g., "500mg")
    pub strength: Option<String>,
    /// Amount per intake (e.g., "1 tablet")
    pub dose_per_intake: Option<String>,
    /// Free-text dosing instructions
    pub instructions: Option<String>,
    /// Soft-delete flag
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields required to register a medication.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewMedication {
    pub name: String,
    pub strength: Option<String>,
    pub dose_per_intake: Option<String>,
    pub instructions: Option<String>,
}

impl NewMedication {
    /// Create a medication definition with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the strength.
    pub fn with_strength(mut self, strength: impl Into<String>) -> Self {
        self.strength = Some(strength.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_medication_builder() {
        let med = NewMedication::named("Metformin").with_strength("500mg");
        assert_eq!(med.name, "Metformin");
        assert_eq!(med.strength, Some("500mg".into()));
        assert!(med.dose_per_intake.is_none());
    }
}
