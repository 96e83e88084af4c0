//! Five-field cron expressions and next-fire computation.
//!
//! Fields are `minute hour day-of-month month day-of-week` with comma lists,
//! ranges, steps (`*/n`, `a-b/n`, `a/n`) and three-letter month and weekday
//! names. Day-of-week accepts `0`-`7` where both `0` and `7` are Sunday.
//!
//! Day-of-month and day-of-week combine the traditional way: if either field
//! starts with `*` a date must satisfy both, otherwise it must satisfy either.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use chrono_tz::Tz;

use crate::{AutoflowError, Result};

/// Default bound on the forward scan for the next fire time.
pub const MAX_PREVIEW_COUNT: usize = 1000;

pub const DEFAULT_SCAN_WINDOW_DAYS: i64 = 370;

const MONTH_NAMES: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// first value `names[0]` maps to
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_base: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    names_base: 0,
};

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// field text starts with `*`
    star: bool,
}

impl Field {
    fn contains(
        &self,
        value: u32,
    ) -> bool {
        self.bits & (1u64 << value) != 0
    }
}

impl FieldSpec {
    fn value(
        &self,
        token: &str,
    ) -> std::result::Result<u32, String> {
        let lower = token.to_ascii_lowercase();
        if let Some(pos) = self.names.iter().position(|n| *n == lower) {
            return Ok(pos as u32 + self.names_base);
        }
        let value = token.parse::<u32>().map_err(|_| format!("invalid {} value '{}'", self.name, token))?;
        if value < self.min || value > self.max {
            return Err(format!("{} value {} out of range {}-{}", self.name, value, self.min, self.max));
        }
        Ok(value)
    }

    fn parse(
        &self,
        text: &str,
    ) -> std::result::Result<Field, String> {
        let mut bits = 0u64;
        for part in text.split(',') {
            if part.is_empty() {
                return Err(format!("empty list item in {} field", self.name));
            }
            let (base, step) = match part.split_once('/') {
                Some((base, step)) => {
                    let step = step.parse::<u32>().map_err(|_| format!("invalid step '{}' in {} field", step, self.name))?;
                    if step == 0 {
                        return Err(format!("zero step in {} field", self.name));
                    }
                    (base, Some(step))
                }
                None => (part, None),
            };

            let (lo, hi) = if base == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = base.split_once('-') {
                let (a, b) = (self.value(a)?, self.value(b)?);
                if a > b {
                    return Err(format!("reversed range '{}' in {} field", base, self.name));
                }
                (a, b)
            } else {
                let a = self.value(base)?;
                // `a/n` runs from `a` to the end of the field
                (a, if step.is_some() { self.max } else { a })
            };

            let step = step.unwrap_or(1) as usize;
            for value in (lo..=hi).step_by(step) {
                bits |= 1u64 << value;
            }
        }
        Ok(Field {
            bits,
            star: text.starts_with('*'),
        })
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl FromStr for CronExpr {
    type Err = AutoflowError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| AutoflowError::Cron(format!("invalid cron expression '{}': {}", s, reason));

        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let mut days_of_week = DAY_OF_WEEK.parse(fields[4]).map_err(invalid)?;
        // 7 is an alias of Sunday
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1u64 << 7)) | 1;
        }

        Ok(Self {
            source: fields.join(" "),
            minutes: MINUTE.parse(fields[0]).map_err(invalid)?,
            hours: HOUR.parse(fields[1]).map_err(invalid)?,
            days_of_month: DAY_OF_MONTH.parse(fields[2]).map_err(invalid)?,
            months: MONTH.parse(fields[3]).map_err(invalid)?,
            days_of_week,
        })
    }
}

impl fmt::Display for CronExpr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl CronExpr {
    /// Whether the local wall-clock minute of `t` matches.
    pub fn matches<T: Datelike + Timelike>(
        &self,
        t: &T,
    ) -> bool {
        if !self.minutes.contains(t.minute()) || !self.hours.contains(t.hour()) || !self.months.contains(t.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(t.day());
        let dow = self.days_of_week.contains(t.weekday().num_days_from_sunday());
        if self.days_of_month.star || self.days_of_week.star { dom && dow } else { dom || dow }
    }

    /// First matching minute strictly after `from`, evaluated in `tz`, or
    /// `None` when nothing matches within `window`.
    pub fn next_after(
        &self,
        from: DateTime<Utc>,
        tz: Tz,
        window: Duration,
    ) -> Option<DateTime<Utc>> {
        let start = from.duration_trunc(Duration::minutes(1)).ok()? + Duration::minutes(1);
        let limit = from + window;

        let mut candidate = start;
        while candidate <= limit {
            if self.matches(&candidate.with_timezone(&tz)) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    /// The next fire times after `from`, at most `count` and never more than
    /// [`MAX_PREVIEW_COUNT`].
    pub fn upcoming(
        &self,
        from: DateTime<Utc>,
        tz: Tz,
        count: usize,
        window: Duration,
    ) -> Vec<DateTime<Utc>> {
        let count = count.min(MAX_PREVIEW_COUNT);
        let mut out = Vec::new();
        let mut cursor = from;
        while out.len() < count {
            match self.next_after(cursor, tz, window) {
                Some(next) => {
                    out.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        out
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| AutoflowError::Cron(format!("unknown timezone '{}'", name)))
}

/// Next `count` fire times of `cron` in `timezone`, starting after `from`.
pub fn preview(
    cron: &str,
    timezone: &str,
    count: usize,
    from: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let expr = cron.parse::<CronExpr>()?;
    let tz = parse_timezone(timezone)?;
    Ok(expr.upcoming(from, tz, count, Duration::days(DEFAULT_SCAN_WINDOW_DAYS)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn next(
        cron: &str,
        from: &str,
    ) -> Option<DateTime<Utc>> {
        cron.parse::<CronExpr>().unwrap().next_after(utc(from), Tz::UTC, Duration::days(DEFAULT_SCAN_WINDOW_DAYS))
    }

    #[test]
    fn test_every_quarter_hour() {
        assert_eq!(next("*/15 * * * *", "2026-02-06T10:07:13Z"), Some(utc("2026-02-06T10:15:00Z")));
    }

    #[test]
    fn test_strictly_after_reference() {
        assert_eq!(next("*/15 * * * *", "2026-02-06T10:15:00Z"), Some(utc("2026-02-06T10:30:00Z")));
        assert_eq!(next("30 10 * * *", "2026-02-06T10:30:59Z"), Some(utc("2026-02-07T10:30:00Z")));
    }

    #[test]
    fn test_weekday_range_skips_weekend() {
        // 2026-02-07 is a Saturday
        assert_eq!(next("0 9 * * mon-fri", "2026-02-07T08:00:00Z"), Some(utc("2026-02-09T09:00:00Z")));
        assert_eq!(next("0 9 * * MON-FRI", "2026-02-07T08:00:00Z"), Some(utc("2026-02-09T09:00:00Z")));
    }

    #[test]
    fn test_seven_is_sunday() {
        assert_eq!(next("0 0 * * 7", "2026-02-07T12:00:00Z"), Some(utc("2026-02-08T00:00:00Z")));
        assert_eq!(next("0 0 * * sun", "2026-02-07T12:00:00Z"), Some(utc("2026-02-08T00:00:00Z")));
    }

    #[test]
    fn test_restricted_day_fields_are_ored() {
        // the 1st of the month or any Monday
        assert_eq!(next("0 0 1 * mon", "2026-02-07T12:00:00Z"), Some(utc("2026-02-09T00:00:00Z")));
        assert_eq!(next("0 0 1 * *", "2026-02-07T12:00:00Z"), Some(utc("2026-03-01T00:00:00Z")));
    }

    #[test]
    fn test_star_day_field_is_anded() {
        // odd days that are also Tuesdays: Feb 10 is even, Feb 17 qualifies
        assert_eq!(next("0 0 */2 * tue", "2026-02-07T12:00:00Z"), Some(utc("2026-02-17T00:00:00Z")));
    }

    #[test]
    fn test_lists_ranges_steps_and_month_names() {
        let expr: CronExpr = "5,35 8-18/5 * jan-mar *".parse().unwrap();
        assert!(expr.matches(&Utc.with_ymd_and_hms(2026, 2, 6, 13, 35, 0).unwrap()));
        assert!(!expr.matches(&Utc.with_ymd_and_hms(2026, 2, 6, 14, 35, 0).unwrap()));
        assert!(!expr.matches(&Utc.with_ymd_and_hms(2026, 4, 6, 13, 35, 0).unwrap()));

        let expr: CronExpr = "10/20 * * * *".parse().unwrap();
        assert!(expr.matches(&Utc.with_ymd_and_hms(2026, 2, 6, 0, 50, 0).unwrap()));
        assert!(!expr.matches(&Utc.with_ymd_and_hms(2026, 2, 6, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_timezone_is_local_wall_clock() {
        let expr: CronExpr = "0 9 * * *".parse().unwrap();
        let tz = parse_timezone("America/New_York").unwrap();
        assert_eq!(expr.next_after(utc("2026-02-06T12:00:00Z"), tz, Duration::days(2)), Some(utc("2026-02-06T14:00:00Z")));
    }

    #[test]
    fn test_unsatisfiable_expression_terminates() {
        assert_eq!(next("0 0 31 2 *", "2026-02-06T00:00:00Z"), None);
    }

    #[test]
    fn test_invalid_expressions_are_rejected() {
        for bad in ["* * * *", "60 * * * *", "*/0 * * * *", "5-1 * * * *", "* * * * funday", "* * 0 * *", "1,,2 * * * *", "* * * * * *"] {
            assert!(matches!(bad.parse::<CronExpr>(), Err(AutoflowError::Cron(_))), "{}", bad);
        }
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_preview_lists_successive_fires() {
        let fires = preview("0 */6 * * *", "UTC", 3, utc("2026-02-06T01:00:00Z")).unwrap();
        assert_eq!(fires, vec![utc("2026-02-06T06:00:00Z"), utc("2026-02-06T12:00:00Z"), utc("2026-02-06T18:00:00Z")]);
    }

    #[test]
    fn test_preview_count_is_capped() {
        let fires = preview("0 * * * *", "UTC", usize::MAX, utc("2026-02-06T01:30:00Z")).unwrap();
        assert_eq!(fires.len(), MAX_PREVIEW_COUNT);
        assert_eq!(fires[1] - fires[0], Duration::hours(1));
    }
}
