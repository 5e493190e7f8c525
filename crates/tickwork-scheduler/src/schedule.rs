use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

/// Source of wall-clock time for schedule computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// A parsed cron expression.
///
/// Standard five-field expressions (`min hour dom month dow`) are accepted
/// and run at second 0. Six/seven-field expressions with a leading seconds
/// field and `@hourly`-style macros are passed through as-is.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize(expression);
        let inner = cron::Schedule::from_str(&normalized).map_err(|e| {
            SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            expression: expression.to_string(),
            inner,
        })
    }

    pub fn validate(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }

    /// The expression as written by the job owner.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Lazily yields fire times strictly after `from`.
    pub fn upcoming_after(&self, from: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.inner.after(&from)
    }

    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.upcoming_after(from).next()
    }
}

/// Turn a five-field expression into the seconds-first form the parser expects.
fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        weekday_names(fields[4])
    )
}

/// Numeric weekdays follow the classic convention (0 or 7 = Sunday);
/// map them to names so they do not depend on the parser's numbering.
fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = range
                .split('-')
                .map(|bound| match bound.parse::<usize>() {
                    Ok(n) if n < WEEKDAYS.len() => WEEKDAYS[n].to_string(),
                    _ => bound.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        // 2026-03-04 is a Wednesday.
        Utc.with_ymd_and_hms(2026, 3, 4, h, m, s).unwrap()
    }

    #[test]
    fn every_minute_fires_on_the_next_minute_boundary() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let next = schedule.next_after(at(12, 0, 30)).unwrap();
        assert_eq!(next, at(12, 1, 0));
    }

    #[test]
    fn next_fire_is_strictly_after_the_reference() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(schedule.next_after(at(12, 15, 0)).unwrap(), at(12, 30, 0));
    }

    #[test]
    fn upcoming_is_lazy_and_ordered() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        let times: Vec<_> = schedule.upcoming_after(at(9, 30, 0)).take(3).collect();
        assert_eq!(times, vec![at(10, 0, 0), at(11, 0, 0), at(12, 0, 0)]);
    }

    #[test]
    fn numeric_weekdays_use_sunday_zero() {
        let schedule = CronSchedule::parse("0 9 * * 1").unwrap();
        let next = schedule.next_after(at(12, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 9);

        let sunday = CronSchedule::parse("0 9 * * 0").unwrap();
        assert_eq!(sunday.next_after(at(12, 0, 0)).unwrap().weekday(), Weekday::Sun);
        let also_sunday = CronSchedule::parse("0 9 * * 7").unwrap();
        assert_eq!(also_sunday.next_after(at(12, 0, 0)).unwrap().weekday(), Weekday::Sun);
    }

    #[test]
    fn weekday_ranges_are_translated() {
        assert_eq!(weekday_names("1-5"), "MON-FRI");
        assert_eq!(weekday_names("0,6"), "SUN,SAT");
        assert_eq!(weekday_names("*"), "*");
        assert_eq!(weekday_names("1-5/2"), "MON-FRI/2");
    }

    #[test]
    fn seconds_field_and_macros_pass_through() {
        assert!(CronSchedule::validate("*/10 * * * * *"));
        assert!(CronSchedule::validate("@hourly"));
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert!(!CronSchedule::validate("not a cron"));
        assert!(!CronSchedule::validate("61 * * * *"));
        assert!(!CronSchedule::validate(""));
        match CronSchedule::parse("every minute") {
            Err(SchedulerError::InvalidSchedule { expression, .. }) => {
                assert_eq!(expression, "every minute")
            }
            other => panic!("expected InvalidSchedule, got {other:?}"),
        }
    }
}
