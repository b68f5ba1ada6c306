//! Adherence report over a date range.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{escape_csv, Reporter};
use crate::models::adherence_percentage;
use crate::schedule::{Caller, ScheduleError, ScheduleResult};

/// One daily rollup row, labelled with the medication name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdherenceReportRow {
    pub date: NaiveDate,
    pub medication_id: i64,
    pub medication_name: String,
    pub total_doses: i64,
    pub taken_doses: i64,
    pub missed_doses: i64,
    pub late_doses: i64,
    pub adherence_percentage: f64,
}

/// Totals across every row of a report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdherenceSummary {
    pub total_doses: i64,
    pub taken_doses: i64,
    pub missed_doses: i64,
    pub late_doses: i64,
    pub adherence_percentage: f64,
    /// Distinct days with at least one rollup
    pub days: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdherenceReport {
    pub patient_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Vec<AdherenceReportRow>,
    pub summary: AdherenceSummary,
}

impl AdherenceReport {
    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV format.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("patient_id,date,medication_id,medication,total,taken,missed,late,adherence_percentage\n");

        for row in &self.rows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{:.1}\n",
                self.patient_id,
                row.date,
                row.medication_id,
                escape_csv(&row.medication_name),
                row.total_doses,
                row.taken_doses,
                row.missed_doses,
                row.late_doses,
                row.adherence_percentage,
            ));
        }

        csv
    }
}

impl AdherenceSummary {
    fn from_rows(rows: &[AdherenceReportRow]) -> Self {
        let mut summary = rows.iter().fold(Self::default(), |mut acc, row| {
            acc.total_doses += row.total_doses;
            acc.taken_doses += row.taken_doses;
            acc.missed_doses += row.missed_doses;
            acc.late_doses += row.late_doses;
            acc
        });
        summary.adherence_percentage = adherence_percentage(summary.taken_doses, summary.total_doses);

        let mut dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        dates.dedup();
        summary.days = dates.len();
        summary
    }
}

impl Reporter<'_> {
    /// Rollups for `[start, end]`, optionally narrowed to one medication.
    pub fn adherence_report(
        &self,
        caller: Caller,
        patient_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        medication_id: Option<i64>,
    ) -> ScheduleResult<AdherenceReport> {
        if end < start {
            return Err(ScheduleError::Validation(format!(
                "Report end {} is before start {}",
                end, start
            )));
        }
        self.patient(caller, patient_id)?;

        let logs = self
            .db
            .list_adherence_logs(patient_id, start, end, medication_id)?;

        let mut names: HashMap<i64, String> = HashMap::new();
        let mut rows = Vec::with_capacity(logs.len());
        for log in logs {
            let name = match names.get(&log.medication_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .db
                        .find_medication(log.medication_id)?
                        .map(|m| m.name)
                        .unwrap_or_default();
                    names.insert(log.medication_id, name.clone());
                    name
                }
            };

            rows.push(AdherenceReportRow {
                date: log.date,
                medication_id: log.medication_id,
                medication_name: name,
                total_doses: log.total_doses,
                taken_doses: log.taken_doses,
                missed_doses: log.missed_doses,
                late_doses: log.late_doses,
                adherence_percentage: log.adherence_percentage,
            });
        }

        let summary = AdherenceSummary::from_rows(&rows);
        Ok(AdherenceReport {
            patient_id,
            start,
            end,
            rows,
            summary,
        })
    }
}
