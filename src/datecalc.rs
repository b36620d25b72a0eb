use chrono::{DateTime, Datelike, Days, NaiveDate, TimeDelta, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::tokens::expiry::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl FromStr for TimeUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            "days" => Ok(TimeUnit::Days),
            "weeks" => Ok(TimeUnit::Weeks),
            "months" => Ok(TimeUnit::Months),
            _ => Err(AppError::DateCalc(format!("Invalid unit: {s}"))),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Months => "months",
        };
        f.write_str(s)
    }
}

/// Parse a workflow amount. Fractions are truncated toward zero.
pub fn parse_amount(raw: &str) -> Result<i64, AppError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::DateCalc("Amount must be a number".into()))?;
    if !value.is_finite() {
        return Err(AppError::DateCalc("Amount must be a number".into()));
    }
    Ok(value.trunc() as i64)
}

/// Read a CRM date value: RFC 3339, a naive date or datetime (UTC), or epoch millis.
pub fn parse_base_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis);
    }
    parse_timestamp(raw)
}

/// Shift `base` by `amount` units and return the result as RFC 3339 UTC.
///
/// Month arithmetic keeps the day of month and rolls any overflow into the
/// following month, so Jan 31 + 1 month lands on Mar 3 (Mar 2 in leap years).
pub fn calculate_new_date(base: Option<&str>, amount: i64, unit: TimeUnit) -> Result<String, AppError> {
    let raw = base
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| AppError::DateCalc("Base date missing".into()))?;
    let date = parse_base_date(raw)
        .ok_or_else(|| AppError::DateCalc(format!("Invalid base date: {raw}")))?;

    let shifted = match unit {
        TimeUnit::Minutes => TimeDelta::try_minutes(amount).and_then(|d| date.checked_add_signed(d)),
        TimeUnit::Hours => TimeDelta::try_hours(amount).and_then(|d| date.checked_add_signed(d)),
        TimeUnit::Days => TimeDelta::try_days(amount).and_then(|d| date.checked_add_signed(d)),
        TimeUnit::Weeks => TimeDelta::try_weeks(amount).and_then(|d| date.checked_add_signed(d)),
        TimeUnit::Months => add_months_rolling(date, amount),
    };

    shifted
        .map(format_timestamp)
        .ok_or_else(|| AppError::DateCalc(format!("Date out of range: {raw} + {amount} {unit}")))
}

fn add_months_rolling(date: DateTime<Utc>, amount: i64) -> Option<DateTime<Utc>> {
    let total = i64::from(date.year())
        .checked_mul(12)?
        .checked_add(i64::from(date.month0()))?
        .checked_add(amount)?;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;

    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let day = first.checked_add_days(Days::new(u64::from(date.day0())))?;
    Some(day.and_time(date.time()).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(base: &str, amount: i64, unit: TimeUnit) -> String {
        calculate_new_date(Some(base), amount, unit).unwrap()
    }

    #[test]
    fn test_units() {
        let base = "2024-01-15T10:00:00.000Z";
        assert_eq!(calc(base, 30, TimeUnit::Minutes), "2024-01-15T10:30:00.000Z");
        assert_eq!(calc(base, -2, TimeUnit::Hours), "2024-01-15T08:00:00.000Z");
        assert_eq!(calc(base, 20, TimeUnit::Days), "2024-02-04T10:00:00.000Z");
        assert_eq!(calc(base, 2, TimeUnit::Weeks), "2024-01-29T10:00:00.000Z");
        assert_eq!(calc(base, 3, TimeUnit::Months), "2024-04-15T10:00:00.000Z");
        assert_eq!(calc(base, -1, TimeUnit::Months), "2023-12-15T10:00:00.000Z");
    }

    #[test]
    fn test_month_overflow_rolls_forward() {
        assert_eq!(calc("2023-01-31T00:00:00Z", 1, TimeUnit::Months), "2023-03-03T00:00:00.000Z");
        assert_eq!(calc("2024-01-31T00:00:00Z", 1, TimeUnit::Months), "2024-03-02T00:00:00.000Z");
        assert_eq!(calc("2024-03-31T12:00:00Z", -1, TimeUnit::Months), "2024-03-02T12:00:00.000Z");
        assert_eq!(calc("2024-11-30T00:00:00Z", 14, TimeUnit::Months), "2026-01-30T00:00:00.000Z");
    }

    #[test]
    fn test_base_formats() {
        // Plain CRM date property.
        assert_eq!(calc("2024-01-15", 1, TimeUnit::Days), "2024-01-16T00:00:00.000Z");
        // Epoch millis, as date pickers store them.
        assert_eq!(calc("1705312800000", 1, TimeUnit::Hours), "2024-01-15T11:00:00.000Z");
        // Offsets are folded into UTC.
        assert_eq!(calc("2024-01-15T10:00:00+02:00", 0, TimeUnit::Days), "2024-01-15T08:00:00.000Z");
    }

    #[test]
    fn test_missing_or_bad_base() {
        assert!(matches!(
            calculate_new_date(None, 1, TimeUnit::Days),
            Err(AppError::DateCalc(ref m)) if m == "Base date missing"
        ));
        assert!(calculate_new_date(Some("  "), 1, TimeUnit::Days).is_err());
        assert!(calculate_new_date(Some("next tuesday"), 1, TimeUnit::Days).is_err());
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("Days".parse::<TimeUnit>().unwrap(), TimeUnit::Days);
        assert_eq!(" MONTHS ".parse::<TimeUnit>().unwrap(), TimeUnit::Months);
        let err = "fortnights".parse::<TimeUnit>().unwrap_err();
        assert!(matches!(err, AppError::DateCalc(ref m) if m == "Invalid unit: fortnights"));
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount("3").unwrap(), 3);
        assert_eq!(parse_amount(" -2 ").unwrap(), -2);
        assert_eq!(parse_amount("1.9").unwrap(), 1);
        assert!(parse_amount("three").is_err());
        assert!(parse_amount("NaN").is_err());
    }

    #[test]
    fn test_huge_amounts_are_out_of_range() {
        let amount = parse_amount("1e30").unwrap();
        for unit in [TimeUnit::Minutes, TimeUnit::Days, TimeUnit::Weeks, TimeUnit::Months] {
            let err = calculate_new_date(Some("2024-01-15T00:00:00Z"), amount, unit).unwrap_err();
            assert!(matches!(err, AppError::DateCalc(ref m) if m.starts_with("Date out of range")));
        }
        assert!(calculate_new_date(Some("2024-01-15T00:00:00Z"), i64::MIN, TimeUnit::Months).is_err());
    }
}
