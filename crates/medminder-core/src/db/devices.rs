//! Dispenser, compartment and device event operations.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Compartment, CompartmentAssignment, Device, DeviceEvent, DeviceEventInput};

const DEVICE_COLUMNS: &str = "id, device_id, patient_id, device_name, connection_type, \
     battery_level, is_connected, last_sync";

const COMPARTMENT_COLUMNS: &str = "device_id, compartment_number, medication_id, current_stock, \
     low_stock_threshold, last_refill";

impl Database {
    // =========================================================================
    // Devices
    // =========================================================================

    /// Register a dispenser for a patient, or re-pair an existing one.
    ///
    /// Returns the device row ID.
    pub fn connect_device(
        &self,
        hardware_id: &str,
        patient_id: i64,
        device_name: Option<&str>,
        connection_type: &str,
        at: NaiveDateTime,
    ) -> DbResult<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO devices (device_id, patient_id, device_name, connection_type, is_connected, last_sync)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            ON CONFLICT (device_id) DO UPDATE SET
                patient_id = excluded.patient_id,
                device_name = COALESCE(excluded.device_name, device_name),
                connection_type = excluded.connection_type,
                is_connected = 1,
                last_sync = excluded.last_sync,
                updated_at = excluded.last_sync
            RETURNING id
            "#,
            params![hardware_id, patient_id, device_name, connection_type, at],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a device by row ID.
    pub fn get_device(&self, id: i64) -> DbResult<Option<Device>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM devices WHERE id = ?", DEVICE_COLUMNS),
                [id],
                device_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get a device by the identifier the hardware reports.
    pub fn get_device_by_hardware_id(&self, hardware_id: &str) -> DbResult<Option<Device>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM devices WHERE device_id = ?", DEVICE_COLUMNS),
                [hardware_id],
                device_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Devices currently paired with a patient.
    pub fn list_devices_for_patient(&self, patient_id: i64) -> DbResult<Vec<Device>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM devices WHERE patient_id = ? ORDER BY id",
            DEVICE_COLUMNS
        ))?;
        let rows = stmt.query_map([patient_id], device_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apply a status callback. Absent fields keep their stored value.
    pub fn update_device_status(
        &self,
        id: i64,
        battery_level: Option<i64>,
        is_connected: Option<bool>,
        at: NaiveDateTime,
    ) -> DbResult<Option<Device>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    UPDATE devices SET
                        battery_level = COALESCE(?2, battery_level),
                        is_connected = COALESCE(?3, is_connected),
                        last_sync = ?4,
                        updated_at = ?4
                    WHERE id = ?1
                    RETURNING {}
                    "#,
                    DEVICE_COLUMNS
                ),
                params![id, battery_level, is_connected, at],
                device_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    // =========================================================================
    // Compartments
    // =========================================================================

    /// Load a compartment with a medication and stock level.
    pub fn assign_compartment(
        &self,
        device_row_id: i64,
        compartment_number: i64,
        medication_id: i64,
        current_stock: i64,
        low_stock_threshold: i64,
        at: NaiveDateTime,
    ) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO device_compartments (
                device_id, compartment_number, medication_id, current_stock,
                low_stock_threshold, last_refill, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (device_id, compartment_number) DO UPDATE SET
                medication_id = excluded.medication_id,
                current_stock = excluded.current_stock,
                low_stock_threshold = excluded.low_stock_threshold,
                last_refill = excluded.last_refill,
                updated_at = excluded.updated_at
            "#,
            params![
                device_row_id,
                compartment_number,
                medication_id,
                current_stock,
                low_stock_threshold,
                at,
            ],
        )?;
        Ok(())
    }

    /// Get a compartment.
    pub fn get_compartment(
        &self,
        device_row_id: i64,
        compartment_number: i64,
    ) -> DbResult<Option<Compartment>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM device_compartments WHERE device_id = ?1 AND compartment_number = ?2",
                    COMPARTMENT_COLUMNS
                ),
                params![device_row_id, compartment_number],
                compartment_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// All compartments of a device, by number.
    pub fn list_compartments(&self, device_row_id: i64) -> DbResult<Vec<Compartment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM device_compartments WHERE device_id = ? ORDER BY compartment_number",
            COMPARTMENT_COLUMNS
        ))?;
        let rows = stmt.query_map([device_row_id], compartment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Resolve a compartment to the medication it holds and the patient it serves.
    ///
    /// `None` when the device is unpaired, the compartment is empty of an
    /// assignment, or the medication belongs to someone else.
    pub fn resolve_compartment(
        &self,
        device_row_id: i64,
        compartment_number: i64,
    ) -> DbResult<Option<CompartmentAssignment>> {
        self.conn
            .query_row(
                r#"
                SELECT c.device_id, c.compartment_number, c.medication_id, d.patient_id
                FROM device_compartments c
                JOIN devices d ON d.id = c.device_id
                JOIN medications m ON m.id = c.medication_id
                WHERE c.device_id = ?1
                  AND c.compartment_number = ?2
                  AND m.patient_id = d.patient_id
                "#,
                params![device_row_id, compartment_number],
                |row| {
                    Ok(CompartmentAssignment {
                        device_row_id: row.get(0)?,
                        compartment_number: row.get(1)?,
                        medication_id: row.get(2)?,
                        patient_id: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Take one unit out of a compartment, flooring at zero.
    ///
    /// Returns the compartment after the decrement.
    pub fn decrement_stock(
        &self,
        device_row_id: i64,
        compartment_number: i64,
        at: NaiveDateTime,
    ) -> DbResult<Option<Compartment>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    UPDATE device_compartments
                    SET current_stock = MAX(0, current_stock - 1), updated_at = ?3
                    WHERE device_id = ?1 AND compartment_number = ?2
                    RETURNING {}
                    "#,
                    COMPARTMENT_COLUMNS
                ),
                params![device_row_id, compartment_number, at],
                compartment_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Overwrite a compartment's stock from a device report.
    ///
    /// A rising stock level counts as a refill. Unknown compartments are created.
    pub fn set_compartment_stock(
        &self,
        device_row_id: i64,
        compartment_number: i64,
        stock: i64,
        medication_id: Option<i64>,
        at: NaiveDateTime,
    ) -> DbResult<Compartment> {
        let compartment = self.conn.query_row(
            &format!(
                r#"
                INSERT INTO device_compartments (
                    device_id, compartment_number, medication_id, current_stock, last_refill, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT (device_id, compartment_number) DO UPDATE SET
                    medication_id = COALESCE(excluded.medication_id, medication_id),
                    last_refill = CASE
                        WHEN excluded.current_stock > current_stock THEN excluded.updated_at
                        ELSE last_refill
                    END,
                    current_stock = excluded.current_stock,
                    updated_at = excluded.updated_at
                RETURNING {}
                "#,
                COMPARTMENT_COLUMNS
            ),
            params![device_row_id, compartment_number, medication_id, stock, at],
            compartment_from_row,
        )?;
        Ok(compartment)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Append a raw device event to the audit trail, returning its ID.
    pub fn record_device_event(
        &self,
        device_row_id: i64,
        event: &DeviceEventInput,
        observed_at: NaiveDateTime,
    ) -> DbResult<i64> {
        let data = match &event.event_data {
            Some(value) => serde_json::to_string(value)?,
            None => "{}".to_string(),
        };
        self.conn.execute(
            r#"
            INSERT INTO device_events (device_id, event_type, compartment_number, event_data, observed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                device_row_id,
                event.event_type,
                event.compartment_number,
                data,
                observed_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Link a recorded event to the dose it confirmed.
    pub fn set_event_matched_dose(&self, event_id: i64, dose_id: i64) -> DbResult<()> {
        self.conn.execute(
            "UPDATE device_events SET matched_dose_id = ?2 WHERE id = ?1",
            params![event_id, dose_id],
        )?;
        Ok(())
    }

    /// Get a recorded event.
    pub fn get_device_event(&self, id: i64) -> DbResult<Option<DeviceEvent>> {
        self.conn
            .query_row(
                r#"
                SELECT id, device_id, event_type, compartment_number, event_data,
                       matched_dose_id, observed_at
                FROM device_events WHERE id = ?
                "#,
                [id],
                DeviceEventRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Most recent events of a device, newest first.
    pub fn list_device_events(&self, device_row_id: i64, limit: usize) -> DbResult<Vec<DeviceEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, device_id, event_type, compartment_number, event_data,
                   matched_dose_id, observed_at
            FROM device_events
            WHERE device_id = ?1
            ORDER BY observed_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![device_row_id, limit as i64], DeviceEventRow::from_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.try_into()?);
        }
        Ok(events)
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        device_id: row.get(1)?,
        patient_id: row.get(2)?,
        device_name: row.get(3)?,
        connection_type: row.get(4)?,
        battery_level: row.get(5)?,
        is_connected: row.get(6)?,
        last_sync: row.get(7)?,
    })
}

fn compartment_from_row(row: &Row<'_>) -> rusqlite::Result<Compartment> {
    Ok(Compartment {
        device_row_id: row.get(0)?,
        compartment_number: row.get(1)?,
        medication_id: row.get(2)?,
        current_stock: row.get(3)?,
        low_stock_threshold: row.get(4)?,
        last_refill: row.get(5)?,
    })
}

struct DeviceEventRow {
    id: i64,
    device_row_id: i64,
    event_type: String,
    compartment_number: Option<i64>,
    event_data: String,
    matched_dose_id: Option<i64>,
    observed_at: NaiveDateTime,
}

impl DeviceEventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_row_id: row.get(1)?,
            event_type: row.get(2)?,
            compartment_number: row.get(3)?,
            event_data: row.get(4)?,
            matched_dose_id: row.get(5)?,
            observed_at: row.get(6)?,
        })
    }
}

impl TryFrom<DeviceEventRow> for DeviceEvent {
    type Error = super::DbError;

    fn try_from(row: DeviceEventRow) -> Result<Self, Self::Error> {
        Ok(DeviceEvent {
            id: row.id,
            device_row_id: row.device_row_id,
            event_type: row.event_type,
            compartment_number: row.compartment_number,
            event_data: serde_json::from_str(&row.event_data)?,
            matched_dose_id: row.matched_dose_id,
            observed_at: row.observed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMedication, LID_OPENED};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn setup_db() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let caregiver = db.insert_caregiver("Ada", "ada@example.com").unwrap();
        let patient = db.insert_patient(caregiver, "Grace").unwrap();
        let med = db
            .insert_medication(patient, &NewMedication::named("Metformin"))
            .unwrap();
        (db, patient, med)
    }

    #[test]
    fn test_connect_is_upsert() {
        let (db, patient, _) = setup_db();
        let at = ts("2026-03-01 08:00:00");

        let first = db.connect_device("DISP-1", patient, Some("Kitchen"), "wifi", at).unwrap();
        let second = db.connect_device("DISP-1", patient, None, "bluetooth", at).unwrap();
        assert_eq!(first, second);

        let device = db.get_device_by_hardware_id("DISP-1").unwrap().unwrap();
        assert_eq!(device.device_name, Some("Kitchen".into()));
        assert_eq!(device.connection_type, "bluetooth");
        assert!(device.is_connected);
        assert_eq!(device.battery_level, 100);
        assert_eq!(db.list_devices_for_patient(patient).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_compartment() {
        let (db, patient, med) = setup_db();
        let at = ts("2026-03-01 08:00:00");
        let device = db.connect_device("DISP-1", patient, None, "wifi", at).unwrap();
        db.assign_compartment(device, 2, med, 10, 5, at).unwrap();

        let assignment = db.resolve_compartment(device, 2).unwrap().unwrap();
        assert_eq!(assignment.medication_id, med);
        assert_eq!(assignment.patient_id, patient);

        assert!(db.resolve_compartment(device, 3).unwrap().is_none());
    }

    #[test]
    fn test_resolve_rejects_foreign_medication() {
        let (db, patient, _) = setup_db();
        let at = ts("2026-03-01 08:00:00");
        let other_caregiver = db.insert_caregiver("Bob", "bob@example.com").unwrap();
        let other_patient = db.insert_patient(other_caregiver, "Linus").unwrap();
        let foreign = db
            .insert_medication(other_patient, &NewMedication::named("Aspirin"))
            .unwrap();

        let device = db.connect_device("DISP-1", patient, None, "wifi", at).unwrap();
        db.assign_compartment(device, 1, foreign, 10, 5, at).unwrap();
        assert!(db.resolve_compartment(device, 1).unwrap().is_none());
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let (db, patient, med) = setup_db();
        let at = ts("2026-03-01 08:00:00");
        let device = db.connect_device("DISP-1", patient, None, "wifi", at).unwrap();
        db.assign_compartment(device, 1, med, 1, 5, at).unwrap();

        assert_eq!(db.decrement_stock(device, 1, at).unwrap().unwrap().current_stock, 0);
        assert_eq!(db.decrement_stock(device, 1, at).unwrap().unwrap().current_stock, 0);
        assert!(db.decrement_stock(device, 9, at).unwrap().is_none());
    }

    #[test]
    fn test_stock_report_tracks_refill() {
        let (db, patient, med) = setup_db();
        let device = db
            .connect_device("DISP-1", patient, None, "wifi", ts("2026-03-01 08:00:00"))
            .unwrap();
        db.assign_compartment(device, 1, med, 10, 5, ts("2026-03-01 08:00:00")).unwrap();

        let lower = db
            .set_compartment_stock(device, 1, 4, None, ts("2026-03-02 08:00:00"))
            .unwrap();
        assert_eq!(lower.current_stock, 4);
        assert_eq!(lower.medication_id, Some(med));
        assert_eq!(lower.last_refill, Some(ts("2026-03-01 08:00:00")));
        assert!(lower.is_low());

        let refilled = db
            .set_compartment_stock(device, 1, 30, None, ts("2026-03-03 08:00:00"))
            .unwrap();
        assert_eq!(refilled.last_refill, Some(ts("2026-03-03 08:00:00")));
    }

    #[test]
    fn test_status_update_keeps_absent_fields() {
        let (db, patient, _) = setup_db();
        let device = db
            .connect_device("DISP-1", patient, None, "wifi", ts("2026-03-01 08:00:00"))
            .unwrap();

        let updated = db
            .update_device_status(device, Some(15), None, ts("2026-03-01 09:00:00"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.battery_level, 15);
        assert!(updated.is_connected);
        assert_eq!(updated.last_sync, Some(ts("2026-03-01 09:00:00")));

        assert!(db
            .update_device_status(999, Some(15), None, ts("2026-03-01 09:00:00"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_event_audit_trail() {
        let (db, patient, _) = setup_db();
        let device = db
            .connect_device("DISP-1", patient, None, "wifi", ts("2026-03-01 08:00:00"))
            .unwrap();

        let mut input = DeviceEventInput::lid_opened(1);
        input.event_data = Some(serde_json::json!({"angle": 80}));
        let first = db.record_device_event(device, &input, ts("2026-03-01 08:01:00")).unwrap();
        let second = db
            .record_device_event(
                device,
                &DeviceEventInput {
                    event_type: "heartbeat".into(),
                    ..Default::default()
                },
                ts("2026-03-01 08:02:00"),
            )
            .unwrap();

        let events = db.list_device_events(device, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, second);
        assert_eq!(events[0].event_data, serde_json::json!({}));
        assert_eq!(events[1].event_type, LID_OPENED);
        assert_eq!(events[1].event_data["angle"], 80);
        assert!(events[1].matched_dose_id.is_none());
        assert_eq!(db.get_device_event(first).unwrap().unwrap().id, first);
    }
}
