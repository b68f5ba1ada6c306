//! SQLite schema definition.

/// Complete database schema for medminder.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Directory (caregivers, patients, medications)
-- ============================================================================

CREATE TABLE IF NOT EXISTS caregivers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE TABLE IF NOT EXISTS patients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    caregiver_id INTEGER NOT NULL REFERENCES caregivers(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE INDEX IF NOT EXISTS idx_patients_caregiver ON patients(caregiver_id);

-- Medications are soft-deleted only (is_active = 0)
CREATE TABLE IF NOT EXISTS medications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    strength TEXT,
    dose_per_intake TEXT,
    instructions TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE INDEX IF NOT EXISTS idx_medications_patient ON medications(patient_id);

-- ============================================================================
-- Reminders (superseded, never edited)
-- ============================================================================

CREATE TABLE IF NOT EXISTS reminders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    medication_id INTEGER NOT NULL REFERENCES medications(id),
    time_slot TEXT NOT NULL,
    exact_time TEXT NOT NULL,                    -- HH:MM:SS
    time_window_start TEXT,
    time_window_end TEXT,
    food_rule TEXT,
    delay_on_meal_missed INTEGER NOT NULL DEFAULT 0,
    notify_device INTEGER NOT NULL DEFAULT 1,
    notify_mobile INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE INDEX IF NOT EXISTS idx_reminders_medication ON reminders(medication_id, is_active);

-- ============================================================================
-- Doses (materialized reminder occurrences)
-- ============================================================================

CREATE TABLE IF NOT EXISTS doses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reminder_id INTEGER NOT NULL REFERENCES reminders(id),
    medication_id INTEGER NOT NULL REFERENCES medications(id),
    patient_id INTEGER NOT NULL REFERENCES patients(id),
    dose_date TEXT NOT NULL,                     -- civil day the dose was materialized for
    scheduled_time TEXT NOT NULL,                -- YYYY-MM-DD HH:MM:SS, moves on drift
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'taken', 'missed', 'cancelled')),
    taken_at TEXT,
    taken_by TEXT CHECK (taken_by IS NULL OR taken_by IN ('manual', 'device')),
    missed_at TEXT,
    cancelled_at TEXT,
    notes TEXT,
    device_verified INTEGER NOT NULL DEFAULT 0,
    delay_minutes INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

-- One dose per reminder per day
CREATE UNIQUE INDEX IF NOT EXISTS idx_doses_reminder_day ON doses(reminder_id, dose_date);
CREATE INDEX IF NOT EXISTS idx_doses_patient_med_status
    ON doses(patient_id, medication_id, status, scheduled_time);
CREATE INDEX IF NOT EXISTS idx_doses_scheduled_time ON doses(scheduled_time);

-- Terminal states cannot go back to pending
CREATE TRIGGER IF NOT EXISTS doses_terminal_status BEFORE UPDATE OF status ON doses
WHEN old.status != 'pending' AND new.status != old.status
BEGIN
    SELECT RAISE(ABORT, 'Dose status is terminal');
END;

-- ============================================================================
-- Devices
-- ============================================================================

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL UNIQUE,              -- hardware identifier
    patient_id INTEGER REFERENCES patients(id) ON DELETE SET NULL,
    device_name TEXT,
    connection_type TEXT NOT NULL DEFAULT 'wifi',
    battery_level INTEGER NOT NULL DEFAULT 100,
    is_connected INTEGER NOT NULL DEFAULT 0,
    last_sync TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE INDEX IF NOT EXISTS idx_devices_patient ON devices(patient_id);

CREATE TABLE IF NOT EXISTS device_compartments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    compartment_number INTEGER NOT NULL,
    medication_id INTEGER REFERENCES medications(id) ON DELETE SET NULL,
    current_stock INTEGER NOT NULL DEFAULT 0 CHECK (current_stock >= 0),
    low_stock_threshold INTEGER NOT NULL DEFAULT 5,
    last_refill TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    UNIQUE (device_id, compartment_number)
);

-- Raw audit trail of everything a dispenser reports
CREATE TABLE IF NOT EXISTS device_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    compartment_number INTEGER,
    event_data TEXT NOT NULL DEFAULT '{}',       -- JSON object
    matched_dose_id INTEGER REFERENCES doses(id),
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_device_events_device ON device_events(device_id, observed_at);

-- ============================================================================
-- Alerts
-- ============================================================================

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    caregiver_id INTEGER NOT NULL REFERENCES caregivers(id) ON DELETE CASCADE,
    patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    alert_type TEXT NOT NULL CHECK (alert_type IN ('missed_dose', 'low_stock', 'low_battery')),
    severity TEXT NOT NULL DEFAULT 'info' CHECK (severity IN ('info', 'medium', 'high')),
    title TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',          -- JSON AlertPayload
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE INDEX IF NOT EXISTS idx_alerts_caregiver ON alerts(caregiver_id, is_read);
CREATE INDEX IF NOT EXISTS idx_alerts_patient_type ON alerts(patient_id, alert_type, is_read);

-- ============================================================================
-- Adherence rollups
-- ============================================================================

CREATE TABLE IF NOT EXISTS adherence_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    medication_id INTEGER NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    total_doses INTEGER NOT NULL DEFAULT 0,
    taken_doses INTEGER NOT NULL DEFAULT 0,
    missed_doses INTEGER NOT NULL DEFAULT 0,
    late_doses INTEGER NOT NULL DEFAULT 0,
    adherence_percentage REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    UNIQUE (patient_id, medication_id, date)
);

CREATE INDEX IF NOT EXISTS idx_adherence_patient_date ON adherence_logs(patient_id, date);

-- Dose ids already folded into a rollup (replay guard)
CREATE TABLE IF NOT EXISTS adherence_counted_doses (
    dose_id INTEGER PRIMARY KEY REFERENCES doses(id),
    outcome TEXT NOT NULL CHECK (outcome IN ('taken', 'missed')),
    counted_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);
"#;
