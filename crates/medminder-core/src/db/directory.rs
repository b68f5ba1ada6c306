//! Caregiver, patient and medication directory operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Caregiver, Medication, NewMedication, Patient};

const PATIENT_COLUMNS: &str = "id, caregiver_id, name, is_active, created_at";

const MEDICATION_COLUMNS: &str = "id, patient_id, name, strength, dose_per_intake, instructions, \
     is_active, created_at, updated_at";

impl Database {
    // =========================================================================
    // Caregivers
    // =========================================================================

    /// Insert a caregiver, returning its ID.
    pub fn insert_caregiver(&self, name: &str, email: &str) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO caregivers (name, email) VALUES (?1, ?2)",
            params![name, email],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a caregiver by ID.
    pub fn find_caregiver(&self, id: i64) -> DbResult<Option<Caregiver>> {
        self.conn
            .query_row(
                "SELECT id, name, email, created_at FROM caregivers WHERE id = ?",
                [id],
                |row| {
                    Ok(Caregiver {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // =========================================================================
    // Patients
    // =========================================================================

    /// Insert a patient under a caregiver, returning its ID.
    pub fn insert_patient(&self, caregiver_id: i64, name: &str) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO patients (caregiver_id, name) VALUES (?1, ?2)",
            params![caregiver_id, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a patient by ID.
    pub fn find_patient(&self, id: i64) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
                [id],
                patient_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get a patient only if the caregiver owns it.
    pub fn find_patient_for_caregiver(
        &self,
        caregiver_id: i64,
        patient_id: i64,
    ) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM patients WHERE id = ?1 AND caregiver_id = ?2",
                    PATIENT_COLUMNS
                ),
                params![patient_id, caregiver_id],
                patient_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List a caregiver's patients.
    pub fn list_patients(&self, caregiver_id: i64) -> DbResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients WHERE caregiver_id = ? ORDER BY name",
            PATIENT_COLUMNS
        ))?;
        let rows = stmt.query_map([caregiver_id], patient_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // =========================================================================
    // Medications
    // =========================================================================

    /// Insert a medication for a patient, returning its ID.
    pub fn insert_medication(&self, patient_id: i64, medication: &NewMedication) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO medications (patient_id, name, strength, dose_per_intake, instructions)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                patient_id,
                medication.name,
                medication.strength,
                medication.dose_per_intake,
                medication.instructions,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a medication by ID.
    pub fn find_medication(&self, id: i64) -> DbResult<Option<Medication>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM medications WHERE id = ?", MEDICATION_COLUMNS),
                [id],
                medication_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List a patient's active medications.
    pub fn list_active_medications(&self, patient_id: i64) -> DbResult<Vec<Medication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM medications WHERE patient_id = ? AND is_active = 1 ORDER BY name",
            MEDICATION_COLUMNS
        ))?;
        let rows = stmt.query_map([patient_id], medication_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Soft-delete a medication. Doses keep referencing the row.
    pub fn deactivate_medication(&self, id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE medications SET is_active = 0, updated_at = datetime('now', 'localtime') WHERE id = ?",
            [id],
        )?;
        Ok(rows_affected > 0)
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        caregiver_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        name: row.get(2)?,
        strength: row.get(3)?,
        dose_per_intake: row.get(4)?,
        instructions: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
