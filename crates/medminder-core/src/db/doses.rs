//! Dose database operations.
//!
//! Every status change is a single compare-and-set statement guarded by
//! `status = 'pending'`, so concurrent writers cannot both win.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Dose, DoseStatus, ScheduledDose, TakenBy};

const DOSE_COLUMNS: &str = "id, reminder_id, medication_id, patient_id, dose_date, scheduled_time, \
     status, taken_at, taken_by, missed_at, cancelled_at, notes, device_verified, delay_minutes";

const DOSE_COLUMNS_D: &str = "d.id, d.reminder_id, d.medication_id, d.patient_id, d.dose_date, \
     d.scheduled_time, d.status, d.taken_at, d.taken_by, d.missed_at, d.cancelled_at, d.notes, \
     d.device_verified, d.delay_minutes";

/// Optional filters for dose history queries.
#[derive(Debug, Clone, Default)]
pub struct DoseHistoryFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<DoseStatus>,
    pub limit: Option<usize>,
}

/// Dose counts per status for one patient and day.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DoseStatusCounts {
    pub total: i64,
    pub pending: i64,
    pub taken: i64,
    pub missed: i64,
    pub cancelled: i64,
}

impl Database {
    /// Check whether a reminder already has a dose for a calendar day.
    pub fn dose_exists_for_day(&self, reminder_id: i64, day: NaiveDate) -> DbResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM doses WHERE reminder_id = ?1 AND dose_date = ?2",
            params![reminder_id, day],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a pending dose unless one already exists for `(reminder, day)`.
    ///
    /// Returns the new dose ID, or `None` when the day was already materialized.
    pub fn insert_dose_if_absent(
        &self,
        reminder_id: i64,
        medication_id: i64,
        patient_id: i64,
        day: NaiveDate,
        scheduled_time: NaiveDateTime,
    ) -> DbResult<Option<i64>> {
        let rows_affected = self.conn.execute(
            r#"
            INSERT INTO doses (reminder_id, medication_id, patient_id, dose_date, scheduled_time, status)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending')
            ON CONFLICT (reminder_id, dose_date) DO NOTHING
            "#,
            params![reminder_id, medication_id, patient_id, day, scheduled_time],
        )?;
        if rows_affected == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    /// Get a dose by ID.
    pub fn get_dose(&self, id: i64) -> DbResult<Option<Dose>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM doses WHERE id = ?", DOSE_COLUMNS),
                [id],
                DoseRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// All doses generated by a reminder, oldest first.
    pub fn list_doses_for_reminder(&self, reminder_id: i64) -> DbResult<Vec<Dose>> {
        self.query_doses(
            &format!(
                "SELECT {} FROM doses WHERE reminder_id = ? ORDER BY dose_date, id",
                DOSE_COLUMNS
            ),
            params![reminder_id],
        )
    }

    /// Pending doses of a patient's medication scheduled within `[from, to]`.
    pub fn find_pending_doses_between(
        &self,
        patient_id: i64,
        medication_id: i64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> DbResult<Vec<Dose>> {
        self.query_doses(
            &format!(
                r#"
                SELECT {} FROM doses
                WHERE patient_id = ?1
                  AND medication_id = ?2
                  AND status = 'pending'
                  AND scheduled_time BETWEEN ?3 AND ?4
                ORDER BY scheduled_time, id
                "#,
                DOSE_COLUMNS
            ),
            params![patient_id, medication_id, from, to],
        )
    }

    /// Pending doses scheduled strictly before `before`, with their reminder's window end.
    pub fn list_pending_doses_before(
        &self,
        before: NaiveDateTime,
    ) -> DbResult<Vec<(Dose, Option<NaiveTime>)>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}, r.time_window_end FROM doses d
            JOIN reminders r ON r.id = d.reminder_id
            WHERE d.status = 'pending' AND d.scheduled_time < ?
            ORDER BY d.scheduled_time, d.id
            "#,
            DOSE_COLUMNS_D
        ))?;

        let rows = stmt.query_map([before], |row| Ok((DoseRow::from_row(row)?, row.get(14)?)))?;

        let mut doses = Vec::new();
        for row in rows {
            let (dose, window_end) = row?;
            doses.push((dose.try_into()?, window_end));
        }
        Ok(doses)
    }

    // =========================================================================
    // Transitions (compare-and-set on status = 'pending')
    // =========================================================================

    /// Mark a pending dose taken at `at`. Delay is computed in the same statement.
    ///
    /// Returns the updated dose, or `None` if it does not exist or is not pending.
    pub fn mark_dose_taken(
        &self,
        id: i64,
        taken_by: TakenBy,
        notes: Option<&str>,
        at: NaiveDateTime,
    ) -> DbResult<Option<Dose>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    UPDATE doses SET
                        status = 'taken',
                        taken_at = ?2,
                        taken_by = ?3,
                        notes = COALESCE(?4, notes),
                        device_verified = ?5,
                        delay_minutes = MAX(0, (CAST(strftime('%s', ?2) AS INTEGER)
                                              - CAST(strftime('%s', scheduled_time) AS INTEGER)) / 60),
                        updated_at = ?2
                    WHERE id = ?1 AND status = 'pending'
                    RETURNING {}
                    "#,
                    DOSE_COLUMNS
                ),
                params![
                    id,
                    at,
                    taken_by.as_str(),
                    notes,
                    taken_by == TakenBy::Device,
                ],
                DoseRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Mark a pending dose missed at `at`.
    pub fn mark_dose_missed(&self, id: i64, at: NaiveDateTime) -> DbResult<Option<Dose>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    UPDATE doses SET status = 'missed', missed_at = ?2, updated_at = ?2
                    WHERE id = ?1 AND status = 'pending'
                    RETURNING {}
                    "#,
                    DOSE_COLUMNS
                ),
                params![id, at],
                DoseRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Cancel a pending dose at `at`.
    pub fn cancel_dose(&self, id: i64, at: NaiveDateTime) -> DbResult<Option<Dose>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    UPDATE doses SET status = 'cancelled', cancelled_at = ?2, updated_at = ?2
                    WHERE id = ?1 AND status = 'pending'
                    RETURNING {}
                    "#,
                    DOSE_COLUMNS
                ),
                params![id, at],
                DoseRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Cancel pending doses after `after` whose reminder for this medication is inactive.
    pub fn cancel_superseded_doses(&self, medication_id: i64, after: NaiveDateTime) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE doses
            SET status = 'cancelled', cancelled_at = ?2, updated_at = ?2
            WHERE medication_id = ?1
              AND status = 'pending'
              AND scheduled_time > ?2
              AND reminder_id IN (
                  SELECT id FROM reminders WHERE medication_id = ?1 AND is_active = 0
              )
            "#,
            params![medication_id, after],
        )?;
        Ok(rows_affected)
    }

    /// Push a reminder's pending doses scheduled after `after` later by `minutes`.
    pub fn shift_pending_doses(
        &self,
        reminder_id: i64,
        minutes: i64,
        after: NaiveDateTime,
    ) -> DbResult<usize> {
        if minutes <= 0 {
            return Err(DbError::Constraint(format!(
                "Dose shifts must move forward, got {} minutes",
                minutes
            )));
        }

        let modifier = format!("+{} minutes", minutes);
        let rows_affected = self.conn.execute(
            r#"
            UPDATE doses
            SET scheduled_time = datetime(scheduled_time, ?2),
                updated_at = datetime('now', 'localtime')
            WHERE reminder_id = ?1
              AND status = 'pending'
              AND scheduled_time > ?3
            "#,
            params![reminder_id, modifier, after],
        )?;
        Ok(rows_affected)
    }

    // =========================================================================
    // Schedule views
    // =========================================================================

    /// A patient's non-cancelled doses materialized for one day, with labels.
    pub fn list_schedule_for_day(
        &self,
        patient_id: i64,
        day: NaiveDate,
    ) -> DbResult<Vec<ScheduledDose>> {
        self.query_scheduled_doses(
            r#"
            WHERE d.patient_id = ?1
              AND d.dose_date = ?2
              AND d.status != 'cancelled'
            ORDER BY d.scheduled_time, d.id
            "#,
            params![patient_id, day],
        )
    }

    /// A patient's pending doses scheduled in `(from, to]`.
    pub fn list_upcoming_doses(
        &self,
        patient_id: i64,
        from: NaiveDateTime,
        to: NaiveDateTime,
        limit: usize,
    ) -> DbResult<Vec<ScheduledDose>> {
        self.query_scheduled_doses(
            r#"
            WHERE d.patient_id = ?1
              AND d.status = 'pending'
              AND d.scheduled_time > ?2
              AND d.scheduled_time <= ?3
            ORDER BY d.scheduled_time, d.id
            LIMIT ?4
            "#,
            params![patient_id, from, to, limit as i64],
        )
    }

    /// A patient's dose history, newest first.
    pub fn list_dose_history(
        &self,
        patient_id: i64,
        filter: &DoseHistoryFilter,
    ) -> DbResult<Vec<ScheduledDose>> {
        self.query_scheduled_doses(
            r#"
            WHERE d.patient_id = ?1
              AND (?2 IS NULL OR d.dose_date >= ?2)
              AND (?3 IS NULL OR d.dose_date <= ?3)
              AND (?4 IS NULL OR d.status = ?4)
            ORDER BY d.scheduled_time DESC, d.id DESC
            LIMIT ?5
            "#,
            params![
                patient_id,
                filter.start_date,
                filter.end_date,
                filter.status.map(|s| s.as_str()),
                filter.limit.unwrap_or(100) as i64,
            ],
        )
    }

    /// Status counts for a patient's doses materialized for one day.
    pub fn count_doses_for_day(&self, patient_id: i64, day: NaiveDate) -> DbResult<DoseStatusCounts> {
        self.conn
            .query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(status = 'pending'), 0),
                       COALESCE(SUM(status = 'taken'), 0),
                       COALESCE(SUM(status = 'missed'), 0),
                       COALESCE(SUM(status = 'cancelled'), 0)
                FROM doses
                WHERE patient_id = ?1 AND dose_date = ?2
                "#,
                params![patient_id, day],
                |row| {
                    Ok(DoseStatusCounts {
                        total: row.get(0)?,
                        pending: row.get(1)?,
                        taken: row.get(2)?,
                        missed: row.get(3)?,
                        cancelled: row.get(4)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Number of doses materialized for a rollup key.
    pub fn count_doses_materialized(
        &self,
        patient_id: i64,
        medication_id: i64,
        day: NaiveDate,
    ) -> DbResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM doses WHERE patient_id = ?1 AND medication_id = ?2 AND dose_date = ?3",
            params![patient_id, medication_id, day],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn query_doses(&self, sql: &str, params: impl rusqlite::Params) -> DbResult<Vec<Dose>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, DoseRow::from_row)?;

        let mut doses = Vec::new();
        for row in rows {
            doses.push(row?.try_into()?);
        }
        Ok(doses)
    }

    fn query_scheduled_doses(
        &self,
        tail: &str,
        params: impl rusqlite::Params,
    ) -> DbResult<Vec<ScheduledDose>> {
        let sql = format!(
            r#"
            SELECT {}, m.name, m.strength, r.time_slot, r.food_rule
            FROM doses d
            JOIN medications m ON m.id = d.medication_id
            JOIN reminders r ON r.id = d.reminder_id
            {}
            "#,
            DOSE_COLUMNS_D, tail
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                DoseRow::from_row(row)?,
                row.get::<_, String>(14)?,
                row.get::<_, Option<String>>(15)?,
                row.get::<_, String>(16)?,
                row.get::<_, Option<String>>(17)?,
            ))
        })?;

        let mut doses = Vec::new();
        for row in rows {
            let (dose, medication_name, strength, time_slot, food_rule) = row?;
            doses.push(ScheduledDose {
                dose: dose.try_into()?,
                medication_name,
                strength,
                time_slot,
                food_rule,
            });
        }
        Ok(doses)
    }
}

/// Intermediate row struct for database mapping.
struct DoseRow {
    id: i64,
    reminder_id: i64,
    medication_id: i64,
    patient_id: i64,
    dose_date: NaiveDate,
    scheduled_time: NaiveDateTime,
    status: String,
    taken_at: Option<NaiveDateTime>,
    taken_by: Option<String>,
    missed_at: Option<NaiveDateTime>,
    cancelled_at: Option<NaiveDateTime>,
    notes: Option<String>,
    device_verified: bool,
    delay_minutes: i64,
}

impl DoseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reminder_id: row.get(1)?,
            medication_id: row.get(2)?,
            patient_id: row.get(3)?,
            dose_date: row.get(4)?,
            scheduled_time: row.get(5)?,
            status: row.get(6)?,
            taken_at: row.get(7)?,
            taken_by: row.get(8)?,
            missed_at: row.get(9)?,
            cancelled_at: row.get(10)?,
            notes: row.get(11)?,
            device_verified: row.get(12)?,
            delay_minutes: row.get(13)?,
        })
    }
}

impl TryFrom<DoseRow> for Dose {
    type Error = DbError;

    fn try_from(row: DoseRow) -> Result<Self, Self::Error> {
        let status = DoseStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown dose status: {}", row.status)))?;
        let taken_by = row
            .taken_by
            .as_deref()
            .map(|s| {
                TakenBy::parse(s)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown dose actor: {}", s)))
            })
            .transpose()?;

        Ok(Dose {
            id: row.id,
            reminder_id: row.reminder_id,
            medication_id: row.medication_id,
            patient_id: row.patient_id,
            dose_date: row.dose_date,
            scheduled_time: row.scheduled_time,
            status,
            taken_at: row.taken_at,
            taken_by,
            missed_at: row.missed_at,
            cancelled_at: row.cancelled_at,
            notes: row.notes,
            device_verified: row.device_verified,
            delay_minutes: row.delay_minutes,
        })
    }
}
