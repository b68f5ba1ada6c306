//! Reminder models: recurring daily schedule definitions.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// When the medication should be taken relative to food.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FoodRule {
    BeforeFood,
    AfterFood,
    WithFood,
    EmptyStomach,
    Anytime,
}

impl FoodRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoodRule::BeforeFood => "before_food",
            FoodRule::AfterFood => "after_food",
            FoodRule::WithFood => "with_food",
            FoodRule::EmptyStomach => "empty_stomach",
            FoodRule::Anytime => "anytime",
        }
    }

    /// Parse the stored form, accepting the "meal" spellings the mobile app sends.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "before_food" | "before_meal" => Some(FoodRule::BeforeFood),
            "after_food" | "after_meal" => Some(FoodRule::AfterFood),
            "with_food" | "with_meal" => Some(FoodRule::WithFood),
            "empty_stomach" => Some(FoodRule::EmptyStomach),
            "anytime" | "any" | "none" => Some(FoodRule::Anytime),
            _ => None,
        }
    }
}

/// Reminder definition as submitted by a caregiver.
///
/// Times are `"HH:MM"` (seconds are accepted but optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReminderInput {
    pub time_slot: String,
    pub exact_time: String,
    #[serde(default)]
    pub time_window_start: Option<String>,
    #[serde(default)]
    pub time_window_end: Option<String>,
    #[serde(default)]
    pub food_rule: Option<String>,
    #[serde(default)]
    pub delay_on_meal_missed: Option<bool>,
    #[serde(default)]
    pub notify_device: Option<bool>,
    #[serde(default)]
    pub notify_mobile: Option<bool>,
}

impl ReminderInput {
    /// Minimal input: a slot label and an exact time.
    pub fn at(time_slot: impl Into<String>, exact_time: impl Into<String>) -> Self {
        Self {
            time_slot: time_slot.into(),
            exact_time: exact_time.into(),
            ..Default::default()
        }
    }

    /// Validate and parse into a storable definition.
    pub fn validate(&self) -> Result<NewReminder, String> {
        let time_slot = self.time_slot.trim();
        if time_slot.is_empty() {
            return Err("time_slot must not be empty".into());
        }

        let exact_time = parse_time_of_day(&self.exact_time)
            .ok_or_else(|| format!("exact_time '{}' is not HH:MM", self.exact_time))?;

        let time_window_start = parse_optional_time("time_window_start", &self.time_window_start)?;
        let time_window_end = parse_optional_time("time_window_end", &self.time_window_end)?;

        // Windows do not wrap past midnight
        if let Some(start) = time_window_start.filter(|start| *start > exact_time) {
            return Err(format!(
                "time_window_start {} is after exact_time {}",
                start.format("%H:%M"),
                exact_time.format("%H:%M")
            ));
        }
        if let Some(end) = time_window_end.filter(|end| *end < exact_time) {
            return Err(format!(
                "time_window_end {} is before exact_time {}",
                end.format("%H:%M"),
                exact_time.format("%H:%M")
            ));
        }

        let food_rule = match self.food_rule.as_deref() {
            None => None,
            Some(s) if s.trim().is_empty() => None,
            Some(s) => {
                Some(FoodRule::parse(s).ok_or_else(|| format!("unknown food_rule '{}'", s))?)
            }
        };

        Ok(NewReminder {
            time_slot: time_slot.to_string(),
            exact_time,
            time_window_start,
            time_window_end,
            food_rule,
            delay_on_meal_missed: self.delay_on_meal_missed.unwrap_or(false),
            notify_device: self.notify_device.unwrap_or(true),
            notify_mobile: self.notify_mobile.unwrap_or(true),
        })
    }
}

fn parse_optional_time(field: &str, value: &Option<String>) -> Result<Option<NaiveTime>, String> {
    match value.as_deref() {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_time_of_day(s)
            .map(Some)
            .ok_or_else(|| format!("{} '{}' is not HH:MM", field, s)),
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// A validated reminder definition, ready to insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewReminder {
    pub time_slot: String,
    pub exact_time: NaiveTime,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    pub food_rule: Option<FoodRule>,
    pub delay_on_meal_missed: bool,
    pub notify_device: bool,
    pub notify_mobile: bool,
}

/// A stored reminder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    /// Store-assigned ID
    pub id: i64,
    /// Medication this reminder belongs to
    pub medication_id: i64,
    /// Slot label (e.g., "morning", "after lunch")
    pub time_slot: String,
    /// Time of day each dose is scheduled at
    pub exact_time: NaiveTime,
    /// Acceptance window start, never after `exact_time`. Shown to clients only.
    pub time_window_start: Option<NaiveTime>,
    /// Acceptance window end, never before `exact_time`; doses still pending
    /// after it are overdue
    pub time_window_end: Option<NaiveTime>,
    /// Food timing rule
    pub food_rule: Option<FoodRule>,
    /// Whether a missed meal should delay this reminder
    pub delay_on_meal_missed: bool,
    /// Ring the dispenser
    pub notify_device: bool,
    /// Push to the mobile app
    pub notify_mobile: bool,
    /// Superseded reminders are inactive but keep their doses
    pub is_active: bool,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_minimal_input() {
        let input = ReminderInput::at("morning", "08:00");
        let reminder = input.validate().unwrap();

        assert_eq!(reminder.time_slot, "morning");
        assert_eq!(reminder.exact_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert!(reminder.notify_device);
        assert!(reminder.notify_mobile);
        assert!(!reminder.delay_on_meal_missed);
        assert!(reminder.food_rule.is_none());
    }

    #[test]
    fn test_validate_full_input() {
        let input = ReminderInput {
            time_slot: "evening".into(),
            exact_time: "20:30:00".into(),
            time_window_start: Some("20:00".into()),
            time_window_end: Some("21:30".into()),
            food_rule: Some("after_meal".into()),
            delay_on_meal_missed: Some(true),
            notify_device: Some(false),
            notify_mobile: None,
        };
        let reminder = input.validate().unwrap();

        assert_eq!(reminder.exact_time, NaiveTime::from_hms_opt(20, 30, 0).unwrap());
        assert_eq!(reminder.time_window_end, NaiveTime::from_hms_opt(21, 30, 0));
        assert_eq!(reminder.food_rule, Some(FoodRule::AfterFood));
        assert!(reminder.delay_on_meal_missed);
        assert!(!reminder.notify_device);
        assert!(reminder.notify_mobile);
    }

    #[test]
    fn test_validate_rejects_bad_times() {
        assert!(ReminderInput::at("morning", "25:00").validate().is_err());
        assert!(ReminderInput::at("morning", "8am").validate().is_err());
        assert!(ReminderInput::at("", "08:00").validate().is_err());

        let mut input = ReminderInput::at("morning", "08:00");
        input.time_window_end = Some("noon".into());
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_window() {
        let mut reversed = ReminderInput::at("night", "22:00");
        reversed.time_window_start = Some("23:00".into());
        reversed.time_window_end = Some("01:00".into());
        assert!(reversed.validate().is_err());

        let mut ends_early = ReminderInput::at("morning", "08:00");
        ends_early.time_window_end = Some("07:30".into());
        assert!(ends_early.validate().is_err());

        let mut starts_late = ReminderInput::at("morning", "08:00");
        starts_late.time_window_start = Some("08:15".into());
        assert!(starts_late.validate().is_err());

        let mut exact_edges = ReminderInput::at("morning", "08:00");
        exact_edges.time_window_start = Some("08:00".into());
        exact_edges.time_window_end = Some("08:00".into());
        assert!(exact_edges.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_food_rule() {
        let mut input = ReminderInput::at("morning", "08:00");
        input.food_rule = Some("with_coffee".into());
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{"time_slot": "noon", "exact_time": "12:00", "food_rule": "with_food"}"#;
        let input: ReminderInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.time_slot, "noon");
        assert!(input.time_window_start.is_none());
        assert_eq!(input.validate().unwrap().food_rule, Some(FoodRule::WithFood));
    }
}
