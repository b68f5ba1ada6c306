//! Adherence rollup storage.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{AdherenceKey, AdherenceLog, AdherenceOutcome};

const LOG_COLUMNS: &str = "patient_id, medication_id, date, total_doses, taken_doses, \
     missed_doses, late_doses, adherence_percentage";

impl Database {
    /// Record that a dose has been folded into its rollup.
    ///
    /// Returns `false` when the dose was already counted.
    pub fn claim_counted_dose(&self, dose_id: i64, outcome: AdherenceOutcome) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            INSERT INTO adherence_counted_doses (dose_id, outcome) VALUES (?1, ?2)
            ON CONFLICT (dose_id) DO NOTHING
            "#,
            params![dose_id, outcome.as_str()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Whether a dose has been folded into a rollup.
    pub fn is_dose_counted(&self, dose_id: i64) -> DbResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM adherence_counted_doses WHERE dose_id = ?",
            [dose_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fold one outcome into the rollup for `key` in a single statement.
    ///
    /// The percentage is computed from the post-increment counters, so
    /// concurrent writers never observe a stale ratio.
    pub fn apply_adherence_outcome(
        &self,
        key: &AdherenceKey,
        outcome: AdherenceOutcome,
    ) -> DbResult<AdherenceLog> {
        let (taken, missed, late) = outcome.increments();
        let log = self.conn.query_row(
            &format!(
                r#"
                INSERT INTO adherence_logs (
                    patient_id, medication_id, date, total_doses, taken_doses,
                    missed_doses, late_doses, adherence_percentage
                ) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?4 * 100.0)
                ON CONFLICT (patient_id, medication_id, date) DO UPDATE SET
                    total_doses = total_doses + 1,
                    taken_doses = taken_doses + excluded.taken_doses,
                    missed_doses = missed_doses + excluded.missed_doses,
                    late_doses = late_doses + excluded.late_doses,
                    adherence_percentage =
                        (taken_doses + excluded.taken_doses) * 100.0 / (total_doses + 1),
                    updated_at = datetime('now', 'localtime')
                RETURNING {}
                "#,
                LOG_COLUMNS
            ),
            params![key.patient_id, key.medication_id, key.date, taken, missed, late],
            log_from_row,
        )?;
        Ok(log)
    }

    /// Get the rollup for a key.
    pub fn get_adherence_log(&self, key: &AdherenceKey) -> DbResult<Option<AdherenceLog>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM adherence_logs
                    WHERE patient_id = ?1 AND medication_id = ?2 AND date = ?3
                    "#,
                    LOG_COLUMNS
                ),
                params![key.patient_id, key.medication_id, key.date],
                log_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// A patient's rollups in `[start, end]`, optionally for one medication.
    pub fn list_adherence_logs(
        &self,
        patient_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        medication_id: Option<i64>,
    ) -> DbResult<Vec<AdherenceLog>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM adherence_logs
            WHERE patient_id = ?1
              AND date BETWEEN ?2 AND ?3
              AND (?4 IS NULL OR medication_id = ?4)
            ORDER BY date, medication_id
            "#,
            LOG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![patient_id, start, end, medication_id], log_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<AdherenceLog> {
    Ok(AdherenceLog {
        patient_id: row.get(0)?,
        medication_id: row.get(1)?,
        date: row.get(2)?,
        total_doses: row.get(3)?,
        taken_doses: row.get(4)?,
        missed_doses: row.get(5)?,
        late_doses: row.get(6)?,
        adherence_percentage: row.get(7)?,
    })
}
