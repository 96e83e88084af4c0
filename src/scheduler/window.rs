use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{AutoflowError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowSpec {
    start: String,
    end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    weekdays: Option<Vec<String>>,
}

/// Local-time blackout period during which scheduled fires are skipped.
///
/// `start > end` wraps past midnight; the weekday scope then applies to the
/// day the window opened. `start == end` never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowSpec", into = "WindowSpec")]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub weekdays: Option<Vec<Weekday>>,
}

fn parse_clock(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M").map_err(|_| AutoflowError::Schedule(format!("invalid window time '{}', expected HH:MM", text)))
}

impl TryFrom<WindowSpec> for MaintenanceWindow {
    type Error = AutoflowError;

    fn try_from(spec: WindowSpec) -> Result<Self> {
        let weekdays = match spec.weekdays {
            Some(days) => Some(
                days.iter()
                    .map(|d| d.parse::<Weekday>().map_err(|_| AutoflowError::Schedule(format!("invalid weekday '{}'", d))))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(Self {
            start: parse_clock(&spec.start)?,
            end: parse_clock(&spec.end)?,
            weekdays,
        })
    }
}

impl From<MaintenanceWindow> for WindowSpec {
    fn from(window: MaintenanceWindow) -> Self {
        Self {
            start: window.start.format("%H:%M").to_string(),
            end: window.end.format("%H:%M").to_string(),
            weekdays: window.weekdays.map(|days| days.iter().map(|d| d.to_string().to_lowercase()).collect()),
        }
    }
}

impl fmt::Display for MaintenanceWindow {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))?;
        if let Some(days) = &self.weekdays {
            let days: Vec<String> = days.iter().map(|d| d.to_string().to_lowercase()).collect();
            write!(f, " on {}", days.join(","))?;
        }
        Ok(())
    }
}

impl MaintenanceWindow {
    pub fn new(
        start: &str,
        end: &str,
    ) -> Result<Self> {
        Ok(Self {
            start: parse_clock(start)?,
            end: parse_clock(end)?,
            weekdays: None,
        })
    }

    pub fn on(
        mut self,
        weekdays: &[Weekday],
    ) -> Self {
        self.weekdays = Some(weekdays.to_vec());
        self
    }

    fn applies_on(
        &self,
        day: Weekday,
    ) -> bool {
        self.weekdays.as_ref().is_none_or(|days| days.contains(&day))
    }

    pub fn contains(
        &self,
        instant: DateTime<Utc>,
        tz: Tz,
    ) -> bool {
        let local = instant.with_timezone(&tz);
        let Some(now) = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0) else {
            return false;
        };

        if self.start < self.end {
            self.start <= now && now < self.end && self.applies_on(local.weekday())
        } else if self.start > self.end {
            if now >= self.start {
                self.applies_on(local.weekday())
            } else if now < self.end {
                let opened = local.date_naive() - Duration::days(1);
                self.applies_on(opened.weekday())
            } else {
                false
            }
        } else {
            false
        }
    }
}

/// Reason to suppress a fire at `instant`, if any window covers it.
pub fn blocking_reason(
    windows: &[MaintenanceWindow],
    instant: DateTime<Utc>,
    tz: Tz,
) -> Option<String> {
    windows.iter().find(|w| w.contains(instant, tz)).map(|w| format!("inside maintenance window {}", w))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_same_day_window() {
        let window = MaintenanceWindow::new("12:00", "13:00").unwrap();
        assert!(window.contains(utc("2026-02-06T12:30:00Z"), Tz::UTC));
        assert!(window.contains(utc("2026-02-06T12:00:00Z"), Tz::UTC));
        assert!(!window.contains(utc("2026-02-06T13:00:00Z"), Tz::UTC));
        assert!(!window.contains(utc("2026-02-06T14:00:00Z"), Tz::UTC));
    }

    #[test]
    fn test_overnight_window_uses_opening_day() {
        // Friday 22:00 to Saturday 02:00
        let window = MaintenanceWindow::new("22:00", "02:00").unwrap().on(&[Weekday::Fri]);
        assert!(window.contains(utc("2026-02-06T23:00:00Z"), Tz::UTC));
        assert!(window.contains(utc("2026-02-07T01:30:00Z"), Tz::UTC));
        assert!(!window.contains(utc("2026-02-07T23:00:00Z"), Tz::UTC));
        assert!(!window.contains(utc("2026-02-06T01:30:00Z"), Tz::UTC));
        assert!(!window.contains(utc("2026-02-07T03:00:00Z"), Tz::UTC));
    }

    #[test]
    fn test_window_is_evaluated_in_local_time() {
        let window = MaintenanceWindow::new("12:00", "13:00").unwrap();
        let tz: Tz = "Europe/Paris".parse().unwrap();
        assert!(window.contains(utc("2026-02-06T11:30:00Z"), tz));
        assert!(!window.contains(utc("2026-02-06T12:30:00Z"), tz));
    }

    #[test]
    fn test_empty_window_never_matches() {
        let window = MaintenanceWindow::new("08:00", "08:00").unwrap();
        assert!(!window.contains(utc("2026-02-06T08:00:00Z"), Tz::UTC));
    }

    #[test]
    fn test_deserialize_and_reason() {
        let windows: Vec<MaintenanceWindow> = serde_json::from_value(json!([{"start": "12:00", "end": "13:00", "weekdays": ["fri"]}])).unwrap();
        assert_eq!(windows[0].weekdays, Some(vec![Weekday::Fri]));
        assert_eq!(blocking_reason(&windows, utc("2026-02-06T12:30:00Z"), Tz::UTC).as_deref(), Some("inside maintenance window 12:00-13:00 on fri"));
        assert_eq!(blocking_reason(&windows, utc("2026-02-07T12:30:00Z"), Tz::UTC), None);

        assert!(serde_json::from_value::<MaintenanceWindow>(json!({"start": "25:00", "end": "13:00"})).is_err());
        assert!(serde_json::from_value::<MaintenanceWindow>(json!({"start": "12:00", "end": "13:00", "weekdays": ["someday"]})).is_err());
    }
}
