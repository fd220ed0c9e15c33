//! Cron expression parsing and next-fire evaluation.
//!
//! Accepts three shapes:
//! - 5 fields: `minute hour day month weekday` (seconds implied `0`)
//! - 6 fields: `second minute hour day month weekday` (Quartz style, `?` allowed)
//! - 7 fields: the 6-field form plus a trailing year
//!
//! All evaluation happens in UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Errors produced while parsing or evaluating a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

impl CronError {
    fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Normalize a 5-field expression to 6 fields by prepending a seconds field.
///
/// Five-field weekdays count from Sunday = 0 (7 is also Sunday) while the
/// `cron` crate counts from Sunday = 1, so numeric weekday items are
/// rewritten as explicit lists in the crate's numbering. Named days pass
/// through untouched. 6 and 7-field expressions already use Sunday = 1.
pub(crate) fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => {
            format!("0 {minute} {hour} {day} {month} {}", translate_weekdays(weekday))
        }
        _ => trimmed.to_string(),
    }
}

fn translate_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(translate_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_weekday_item(item: &str) -> String {
    let Some(days) = expand_weekday_item(item) else {
        return item.to_string();
    };
    let mut days: Vec<u32> = days
        .into_iter()
        .map(|d| if d == 0 || d == 7 { 1 } else { d + 1 })
        .collect();
    days.sort_unstable();
    days.dedup();
    days.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// Zero-based weekdays matched by one list item (`N`, `N-M`, `*/S`, `N/S`,
/// `N-M/S`). `None` leaves the item for the parser: plain wildcards, names
/// and anything out of range.
fn expand_weekday_item(item: &str) -> Option<Vec<u32>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step.parse::<usize>().ok().filter(|s| *s > 0)?)),
        None => (item, None),
    };

    let (start, end): (u32, u32) = if range == "*" || range == "?" {
        if step.is_none() {
            return None;
        }
        (0, 6)
    } else if let Some((start, end)) = range.split_once('-') {
        (start.parse().ok()?, end.parse().ok()?)
    } else {
        let start: u32 = range.parse().ok()?;
        // `N/S` runs to the end of the week.
        (start, if step.is_some() { start.max(6) } else { start })
    };
    if start > end || end > 7 {
        return None;
    }
    Some((start..=end).step_by(step.unwrap_or(1)).collect())
}

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parse an expression. Only the syntax is checked, so the result
    /// depends on nothing but `expression`.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields = expression.split_whitespace().count();
        if !(5..=7).contains(&fields) {
            return Err(CronError::invalid(
                expression,
                format!("expected 5, 6 or 7 fields, found {fields}"),
            ));
        }

        let schedule = Schedule::from_str(&normalize(expression))
            .map_err(|e| CronError::invalid(expression, e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Parse and require at least one occurrence after `now`. A schedule
    /// that is already exhausted (a past year, say) can never be armed.
    pub fn parse_upcoming(expression: &str, now: DateTime<Utc>) -> Result<Self, CronError> {
        let parsed = Self::parse(expression)?;
        if parsed.next_after(now).is_none() {
            return Err(CronError::invalid(expression, "no upcoming fire time"));
        }
        Ok(parsed)
    }

    /// The expression as the user wrote it.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // The underlying iterator works at second resolution; filtering keeps
        // a sub-second `after` from yielding the same second again.
        self.schedule.after(&after).find(|next| *next > after)
    }

    /// The next `count` occurrences strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

/// Check an expression without scheduling anything. Exhausted schedules
/// are rejected since they could never be armed.
pub fn validate(expression: &str) -> Result<(), CronError> {
    CronSchedule::parse_upcoming(expression, Utc::now()).map(|_| ())
}

/// Compute the next fire instant strictly after `after`.
pub fn next_fire(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    CronSchedule::parse(expression)?
        .next_after(after)
        .ok_or_else(|| CronError::invalid(expression, "no fire time after the given instant"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, TimeZone, Timelike, Weekday};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 7, h, m, s).unwrap()
    }

    #[test]
    fn test_normalize_5_to_6_fields() {
        assert_eq!(normalize("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize("  30 2 1 * *  "), "0 30 2 1 * *");
        assert_eq!(normalize("0 * * * * ?"), "0 * * * * ?");
    }

    #[test]
    fn test_validate_accepts_common_shapes() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 9-17 * * 1-5",
            "0 * * * * ?",
            "0/5 * * * * ?",
            "0 0 12 ? * MON-FRI",
            "0 30 4 1 * * *",
            "15,45 * * * * *",
        ] {
            assert!(validate(expr).is_ok(), "expected {expr} to be valid");
        }
    }

    #[test]
    fn test_validate_rejects_garbage() {
        for expr in ["", "every minute", "* * * *", "61 * * * * *", "0 0 25 * * *", "1 2 3 4 5 6 7 8"] {
            let err = validate(expr).unwrap_err();
            assert!(matches!(err, CronError::InvalidExpression { .. }), "{expr}");
        }
    }

    #[test]
    fn test_validate_rejects_exhausted_schedule() {
        let err = validate("0 0 0 1 1 ? 2001").unwrap_err();
        assert!(err.to_string().contains("no upcoming fire time"));
    }

    #[test]
    fn test_next_fire_every_minute() {
        let next = next_fire("0 * * * * ?", at(10, 15, 30)).unwrap();
        assert_eq!(next, at(10, 16, 0));
    }

    #[test]
    fn test_next_fire_five_field_step() {
        let next = next_fire("*/15 * * * *", at(10, 16, 0)).unwrap();
        assert_eq!(next, at(10, 30, 0));
    }

    #[test]
    fn test_next_fire_strictly_after_matching_instant() {
        // `after` itself matches: the following occurrence is returned.
        let t = at(10, 16, 0);
        assert_eq!(next_fire("0 * * * * ?", t).unwrap(), at(10, 17, 0));

        // Sub-second offsets inside a matching second do not re-fire it.
        let t = at(10, 16, 5) + Duration::milliseconds(250);
        let next = next_fire("* * * * * ?", t).unwrap();
        assert_eq!(next, at(10, 16, 6));
    }

    #[test]
    fn test_next_fire_is_monotonic_and_deterministic() {
        for expr in ["* * * * * ?", "0 */5 * * * *", "0 0 3 * * *", "30 2 * * 1"] {
            let t = at(23, 59, 59);
            let first = next_fire(expr, t).unwrap();
            assert!(first > t);
            assert_eq!(next_fire(expr, t).unwrap(), first);
            let second = next_fire(expr, first).unwrap();
            assert!(second > first, "{expr}");
        }
    }

    #[test]
    fn test_normalize_translates_weekdays() {
        assert_eq!(normalize("0 9 * * 1-5"), "0 0 9 * * 2,3,4,5,6");
        assert_eq!(normalize("0 0 * * 0"), "0 0 0 * * 1");
        assert_eq!(normalize("0 0 * * 7"), "0 0 0 * * 1");
        assert_eq!(normalize("0 0 * * 5-7"), "0 0 0 * * 1,6,7");
        assert_eq!(normalize("0 0 * * 1,3"), "0 0 0 * * 2,4");
        assert_eq!(normalize("0 0 * * 1/2"), "0 0 0 * * 2,4,6");
        assert_eq!(normalize("0 0 * * */3"), "0 0 0 * * 1,4,7");
        assert_eq!(normalize("0 0 * * MON-FRI"), "0 0 0 * * MON-FRI");
        assert_eq!(normalize("0 0 * * *"), "0 0 0 * * *");
        // Quartz-style expressions already count from Sunday = 1.
        assert_eq!(normalize("0 0 9 ? * 2-6"), "0 0 9 ? * 2-6");
    }

    #[test]
    fn test_five_field_weekdays_count_from_sunday_zero() {
        // 2024-12-07 is a Saturday.
        let saturday = at(10, 15, 30);

        let next = next_fire("0 9 * * 1-5", saturday).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 12, 9, 9, 0, 0).unwrap());

        assert!(validate("0 0 * * 0").is_ok());
        let next = next_fire("0 0 * * 0", saturday).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 12, 8, 0, 0, 0).unwrap());
        assert_eq!(next_fire("0 0 * * 7", saturday).unwrap(), next);

        let next = next_fire("0 0 * * 5", saturday).unwrap();
        assert_eq!(next.weekday(), Weekday::Fri);

        assert!(validate("0 0 * * 8").is_err());
    }

    #[test]
    fn test_next_fire_ignores_wall_clock() {
        let before = Utc.with_ymd_and_hms(2000, 6, 1, 0, 0, 0).unwrap();
        let next = next_fire("0 0 0 1 1 ? 2001", before).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap());
        assert!(next_fire("0 0 0 1 1 ? 2001", next).is_err());
    }

    #[test]
    fn test_upcoming() {
        let schedule = CronSchedule::parse("0 0 * * * *").unwrap();
        let times = schedule.upcoming(at(10, 0, 0), 3);
        assert_eq!(times, vec![at(11, 0, 0), at(12, 0, 0), at(13, 0, 0)]);
        assert!(times.iter().all(|t| t.minute() == 0));
        assert_eq!(schedule.expression(), "0 0 * * * *");
    }
}
