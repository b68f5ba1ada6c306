//! Caregiver alert inbox operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Alert, AlertFilter, AlertPayload, AlertSeverity, AlertType, NewAlert};

const ALERT_COLUMNS: &str =
    "id, caregiver_id, patient_id, alert_type, severity, title, payload, is_read, created_at";

impl Database {
    /// Insert an alert, returning its ID.
    pub fn insert_alert(&self, alert: &NewAlert) -> DbResult<i64> {
        let payload = serde_json::to_string(&alert.payload)?;
        self.conn.execute(
            r#"
            INSERT INTO alerts (caregiver_id, patient_id, alert_type, severity, title, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                alert.caregiver_id,
                alert.patient_id,
                alert.alert_type().as_str(),
                alert.severity.as_str(),
                alert.title,
                payload,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert an alert unless an unread one of the same type exists for the patient.
    ///
    /// Returns `None` when suppressed.
    pub fn insert_alert_unless_unread(&self, alert: &NewAlert) -> DbResult<Option<i64>> {
        let payload = serde_json::to_string(&alert.payload)?;
        let rows_affected = self.conn.execute(
            r#"
            INSERT INTO alerts (caregiver_id, patient_id, alert_type, severity, title, payload)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE NOT EXISTS (
                SELECT 1 FROM alerts
                WHERE patient_id = ?2 AND alert_type = ?3 AND is_read = 0
            )
            "#,
            params![
                alert.caregiver_id,
                alert.patient_id,
                alert.alert_type().as_str(),
                alert.severity.as_str(),
                alert.title,
                payload,
            ],
        )?;
        if rows_affected == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    /// Get an alert by ID.
    pub fn get_alert(&self, id: i64) -> DbResult<Option<Alert>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM alerts WHERE id = ?", ALERT_COLUMNS),
                [id],
                AlertRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// A caregiver's alerts, newest first.
    pub fn list_alerts(
        &self,
        caregiver_id: i64,
        filter: &AlertFilter,
        limit: usize,
    ) -> DbResult<Vec<Alert>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE caregiver_id = ?1
              AND (?2 IS NULL OR alert_type = ?2)
              AND (?3 IS NULL OR is_read = ?3)
              AND (?4 IS NULL OR patient_id = ?4)
            ORDER BY created_at DESC, id DESC
            LIMIT ?5
            "#,
            ALERT_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![
                caregiver_id,
                filter.alert_type.map(|t| t.as_str()),
                filter.is_read,
                filter.patient_id,
                limit as i64,
            ],
            AlertRow::from_row,
        )?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?.try_into()?);
        }
        Ok(alerts)
    }

    /// Mark one of the caregiver's alerts read. `false` if it is not theirs.
    pub fn mark_alert_read(&self, caregiver_id: i64, alert_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE alerts SET is_read = 1 WHERE id = ?1 AND caregiver_id = ?2",
            params![alert_id, caregiver_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Mark every unread alert of the caregiver read, returning how many changed.
    pub fn mark_all_alerts_read(&self, caregiver_id: i64) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            "UPDATE alerts SET is_read = 1 WHERE caregiver_id = ? AND is_read = 0",
            [caregiver_id],
        )?;
        Ok(rows_affected)
    }

    pub fn unread_alert_count(&self, caregiver_id: i64) -> DbResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE caregiver_id = ? AND is_read = 0",
            [caregiver_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

struct AlertRow {
    id: i64,
    caregiver_id: i64,
    patient_id: i64,
    alert_type: String,
    severity: String,
    title: String,
    payload: String,
    is_read: bool,
    created_at: String,
}

impl AlertRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            caregiver_id: row.get(1)?,
            patient_id: row.get(2)?,
            alert_type: row.get(3)?,
            severity: row.get(4)?,
            title: row.get(5)?,
            payload: row.get(6)?,
            is_read: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl TryFrom<AlertRow> for Alert {
    type Error = DbError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let alert_type = AlertType::parse(&row.alert_type)
            .ok_or_else(|| DbError::Constraint(format!("Unknown alert type: {}", row.alert_type)))?;
        let severity = AlertSeverity::parse(&row.severity)
            .ok_or_else(|| DbError::Constraint(format!("Unknown severity: {}", row.severity)))?;
        let payload: AlertPayload = serde_json::from_str(&row.payload)?;

        Ok(Alert {
            id: row.id,
            caregiver_id: row.caregiver_id,
            patient_id: row.patient_id,
            alert_type,
            severity,
            title: row.title,
            payload,
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}
