//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default log filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "medminder_core=info";

/// Upper bound for the window and threshold settings (one day).
pub const MAX_DAY_MINUTES: i64 = 1440;

/// Upper bound for `missed_grace_minutes` (one week).
pub const MAX_GRACE_MINUTES: i64 = 10080;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Tunables for the scheduling engine. Every field has a default, so a
/// partial JSON document only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Days of doses materialized ahead of today
    pub horizon_days: u32,
    /// Tolerance either side of a dose when matching dispenser events
    pub match_window_minutes: i64,
    /// Delay that must be exceeded before future doses shift
    pub drift_threshold_minutes: i64,
    /// Delay after which a taken dose also counts as late
    pub late_threshold_minutes: i64,
    /// Grace after the scheduled time before an unconfirmed dose is missed,
    /// for reminders without a window end
    pub missed_grace_minutes: i64,
    /// Battery percentage below which a low-battery alert is raised
    pub low_battery_threshold: i64,
    /// Suppress low-stock/low-battery alerts while an unread one exists
    pub dedupe_unread_alerts: bool,
    /// How long to wait on a locked database file
    pub busy_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            match_window_minutes: 15,
            drift_threshold_minutes: 15,
            late_threshold_minutes: 15,
            missed_grace_minutes: 60,
            low_battery_threshold: 20,
            dedupe_unread_alerts: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_days == 0 || self.horizon_days > 366 {
            return Err(ConfigError::Invalid(format!(
                "horizon_days must be between 1 and 366, got {}",
                self.horizon_days
            )));
        }
        for (name, value, max) in [
            ("match_window_minutes", self.match_window_minutes, MAX_DAY_MINUTES),
            ("drift_threshold_minutes", self.drift_threshold_minutes, MAX_DAY_MINUTES),
            ("late_threshold_minutes", self.late_threshold_minutes, MAX_DAY_MINUTES),
            ("missed_grace_minutes", self.missed_grace_minutes, MAX_GRACE_MINUTES),
        ] {
            if !(0..=max).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 0 and {}, got {}",
                    name, max, value
                )));
            }
        }
        if !(0..=100).contains(&self.low_battery_threshold) {
            return Err(ConfigError::Invalid(format!(
                "low_battery_threshold must be a percentage, got {}",
                self.low_battery_threshold
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.horizon_days, 30);
        assert_eq!(config.match_window_minutes, 15);
        assert_eq!(config.drift_threshold_minutes, 15);
        assert_eq!(config.missed_grace_minutes, 60);
        assert!(config.dedupe_unread_alerts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = SchedulerConfig::from_json_str(r#"{"horizon_days": 7, "dedupe_unread_alerts": false}"#)
            .unwrap();
        assert_eq!(config.horizon_days, 7);
        assert!(!config.dedupe_unread_alerts);
        assert_eq!(config.match_window_minutes, 15);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SchedulerConfig::from_json_str(r#"{"horizon_days": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_json_str(r#"{"match_window_minutes": -1}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_json_str(r#"{"match_window_minutes": 9223372036854775807}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_json_str(r#"{"late_threshold_minutes": 1441}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_json_str(r#"{"missed_grace_minutes": 10081}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(SchedulerConfig::from_json_str(r#"{"missed_grace_minutes": 10080}"#).is_ok());
        assert!(matches!(
            SchedulerConfig::from_json_str(r#"{"low_battery_threshold": 140}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_json_str("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"missed_grace_minutes": 90}}"#).unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.missed_grace_minutes, 90);
        assert_eq!(config.busy_timeout(), Duration::from_millis(5000));
    }
}
