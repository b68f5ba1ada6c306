//! Schedule views and the per-patient dashboard.

use chrono::{Days, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::Reporter;
use crate::db::{DoseHistoryFilter, DoseStatusCounts};
use crate::models::{adherence_percentage, AlertFilter, ScheduledDose};
use crate::schedule::{Caller, ScheduleError, ScheduleResult};

/// A dispenser that needs the caregiver's attention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceAttention {
    pub device_id: String,
    pub device_name: Option<String>,
    pub battery_level: i64,
    pub is_connected: bool,
    pub low_battery: bool,
    /// Compartments at or below their low-stock threshold
    pub low_stock_compartments: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dashboard {
    pub patient_id: i64,
    pub today: NaiveDate,
    pub today_counts: DoseStatusCounts,
    /// Next pending dose after `now`, if one is materialized
    pub next_dose: Option<ScheduledDose>,
    /// Adherence over the seven days ending today
    pub weekly_adherence: f64,
    pub unread_alerts: usize,
    pub devices: Vec<DeviceAttention>,
}

impl Reporter<'_> {
    /// The patient's non-cancelled doses for `day`.
    pub fn schedule_for_day(
        &self,
        caller: Caller,
        patient_id: i64,
        day: NaiveDate,
    ) -> ScheduleResult<Vec<ScheduledDose>> {
        self.patient(caller, patient_id)?;
        Ok(self.db.list_schedule_for_day(patient_id, day)?)
    }

    /// Pending doses in the next `hours` after `now`.
    pub fn upcoming_doses(
        &self,
        caller: Caller,
        patient_id: i64,
        now: NaiveDateTime,
        hours: i64,
        limit: usize,
    ) -> ScheduleResult<Vec<ScheduledDose>> {
        self.patient(caller, patient_id)?;
        let until = Duration::try_hours(hours)
            .and_then(|h| now.checked_add_signed(h))
            .ok_or_else(|| ScheduleError::Validation(format!("{} hours is out of range", hours)))?;
        Ok(self.db.list_upcoming_doses(patient_id, now, until, limit)?)
    }

    /// Past and future doses filtered by materialized day and status, newest first.
    pub fn dose_history(
        &self,
        caller: Caller,
        patient_id: i64,
        filter: &DoseHistoryFilter,
    ) -> ScheduleResult<Vec<ScheduledDose>> {
        self.patient(caller, patient_id)?;
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if end < start {
                return Err(ScheduleError::Validation(format!(
                    "End date {} is before start date {}",
                    end, start
                )));
            }
        }
        Ok(self.db.list_dose_history(patient_id, filter)?)
    }

    pub fn dashboard(
        &self,
        caller: Caller,
        patient_id: i64,
        now: NaiveDateTime,
    ) -> ScheduleResult<Dashboard> {
        let patient = self.patient(caller, patient_id)?;
        let today = now.date();

        let today_counts = self.db.count_doses_for_day(patient_id, today)?;
        let next_dose = self
            .db
            .list_upcoming_doses(patient_id, now, now + Duration::days(2), 1)?
            .into_iter()
            .next();

        let week_start = today.checked_sub_days(Days::new(6)).unwrap_or(today);
        let (taken, total) = self
            .db
            .list_adherence_logs(patient_id, week_start, today, None)?
            .iter()
            .fold((0, 0), |(taken, total), log| {
                (taken + log.taken_doses, total + log.total_doses)
            });

        let unread_alerts = self
            .db
            .list_alerts(
                patient.caregiver_id,
                &AlertFilter {
                    is_read: Some(false),
                    patient_id: Some(patient_id),
                    ..Default::default()
                },
                1000,
            )?
            .len();

        let mut devices = Vec::new();
        for device in self.db.list_devices_for_patient(patient_id)? {
            let low_stock_compartments: Vec<i64> = self
                .db
                .list_compartments(device.id)?
                .into_iter()
                .filter(|c| c.medication_id.is_some() && c.is_low())
                .map(|c| c.compartment_number)
                .collect();
            let low_battery = device.battery_level < self.low_battery_threshold;

            if low_battery || !device.is_connected || !low_stock_compartments.is_empty() {
                devices.push(DeviceAttention {
                    device_id: device.device_id,
                    device_name: device.device_name,
                    battery_level: device.battery_level,
                    is_connected: device.is_connected,
                    low_battery,
                    low_stock_compartments,
                });
            }
        }

        Ok(Dashboard {
            patient_id,
            today,
            today_counts,
            next_dose,
            weekly_adherence: adherence_percentage(taken, total),
            unread_alerts,
            devices,
        })
    }
}
