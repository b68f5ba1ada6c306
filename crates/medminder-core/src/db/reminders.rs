//! Reminder database operations.

use chrono::NaiveTime;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{FoodRule, NewReminder, Reminder};

const REMINDER_COLUMNS: &str = "r.id, r.medication_id, r.time_slot, r.exact_time, \
     r.time_window_start, r.time_window_end, r.food_rule, r.delay_on_meal_missed, \
     r.notify_device, r.notify_mobile, r.is_active, r.created_at";

impl Database {
    /// Insert a reminder for a medication, returning its ID.
    pub fn insert_reminder(&self, medication_id: i64, reminder: &NewReminder) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO reminders (
                medication_id, time_slot, exact_time, time_window_start, time_window_end,
                food_rule, delay_on_meal_missed, notify_device, notify_mobile
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                medication_id,
                reminder.time_slot,
                reminder.exact_time,
                reminder.time_window_start,
                reminder.time_window_end,
                reminder.food_rule.map(|f| f.as_str()),
                reminder.delay_on_meal_missed,
                reminder.notify_device,
                reminder.notify_mobile,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Deactivate every reminder of a medication (superseding them).
    ///
    /// Returns how many were active before.
    pub fn deactivate_reminders(&self, medication_id: i64) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE reminders
            SET is_active = 0, updated_at = datetime('now', 'localtime')
            WHERE medication_id = ? AND is_active = 1
            "#,
            [medication_id],
        )?;
        Ok(rows_affected)
    }

    /// Get a reminder by ID, active or not.
    pub fn get_reminder(&self, id: i64) -> DbResult<Option<Reminder>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM reminders r WHERE r.id = ?", REMINDER_COLUMNS),
                [id],
                ReminderRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Active reminders of a medication, ordered by time of day.
    pub fn list_active_reminders(&self, medication_id: i64) -> DbResult<Vec<Reminder>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM reminders r
            WHERE r.medication_id = ? AND r.is_active = 1
            ORDER BY r.exact_time, r.id
            "#,
            REMINDER_COLUMNS
        ))?;

        let rows = stmt.query_map([medication_id], ReminderRow::from_row)?;

        let mut reminders = Vec::new();
        for row in rows {
            reminders.push(row?.try_into()?);
        }
        Ok(reminders)
    }

    /// Every active reminder whose medication and patient are active too.
    pub fn list_schedulable_reminders(&self) -> DbResult<Vec<(Reminder, i64)>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}, m.patient_id FROM reminders r
            JOIN medications m ON m.id = r.medication_id
            JOIN patients p ON p.id = m.patient_id
            WHERE r.is_active = 1 AND m.is_active = 1 AND p.is_active = 1
            ORDER BY r.id
            "#,
            REMINDER_COLUMNS
        ))?;

        let rows = stmt.query_map([], |row| Ok((ReminderRow::from_row(row)?, row.get(12)?)))?;

        let mut reminders = Vec::new();
        for row in rows {
            let (reminder, patient_id) = row?;
            reminders.push((reminder.try_into()?, patient_id));
        }
        Ok(reminders)
    }
}

/// Intermediate row struct for database mapping.
struct ReminderRow {
    id: i64,
    medication_id: i64,
    time_slot: String,
    exact_time: NaiveTime,
    time_window_start: Option<NaiveTime>,
    time_window_end: Option<NaiveTime>,
    food_rule: Option<String>,
    delay_on_meal_missed: bool,
    notify_device: bool,
    notify_mobile: bool,
    is_active: bool,
    created_at: String,
}

impl ReminderRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            medication_id: row.get(1)?,
            time_slot: row.get(2)?,
            exact_time: row.get(3)?,
            time_window_start: row.get(4)?,
            time_window_end: row.get(5)?,
            food_rule: row.get(6)?,
            delay_on_meal_missed: row.get(7)?,
            notify_device: row.get(8)?,
            notify_mobile: row.get(9)?,
            is_active: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = DbError;

    fn try_from(row: ReminderRow) -> Result<Self, Self::Error> {
        let food_rule = row
            .food_rule
            .as_deref()
            .map(|s| {
                FoodRule::parse(s)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown food rule: {}", s)))
            })
            .transpose()?;

        Ok(Reminder {
            id: row.id,
            medication_id: row.medication_id,
            time_slot: row.time_slot,
            exact_time: row.exact_time,
            time_window_start: row.time_window_start,
            time_window_end: row.time_window_end,
            food_rule,
            delay_on_meal_missed: row.delay_on_meal_missed,
            notify_device: row.notify_device,
            notify_mobile: row.notify_mobile,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}
