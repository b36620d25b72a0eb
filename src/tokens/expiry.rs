use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};

/// A token whose remaining lifetime is at or below this is treated as expired,
/// so a request never starts with a token that lapses mid-flight.
pub const EXPIRY_SKEW_SECS: i64 = 10;

/// An expiry as it may reach [`is_token_expired`]: stored text, a parsed
/// instant, or nothing at all.
#[derive(Debug, Clone, Copy)]
pub enum Expiry<'a> {
    Absent,
    Text(&'a str),
    Instant(DateTime<Utc>),
}

impl<'a> From<&'a str> for Expiry<'a> {
    fn from(s: &'a str) -> Self {
        Expiry::Text(s)
    }
}

impl<'a> From<&'a String> for Expiry<'a> {
    fn from(s: &'a String) -> Self {
        Expiry::Text(s.as_str())
    }
}

impl From<DateTime<Utc>> for Expiry<'_> {
    fn from(t: DateTime<Utc>) -> Self {
        Expiry::Instant(t)
    }
}

impl<'a, T: Into<Expiry<'a>>> From<Option<T>> for Expiry<'a> {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Expiry::Absent)
    }
}

/// True when the expiry is absent, unparseable, or no more than
/// [`EXPIRY_SKEW_SECS`] away from `now`.
pub fn is_token_expired<'a>(expires_at: impl Into<Expiry<'a>>, now: DateTime<Utc>) -> bool {
    let expires_at = match expires_at.into() {
        Expiry::Absent => return true,
        Expiry::Instant(t) => t,
        Expiry::Text(s) => match parse_timestamp(s) {
            Some(t) => t,
            None => return true,
        },
    };

    expires_at - now <= TimeDelta::seconds(EXPIRY_SKEW_SECS)
}

/// Parse a stored timestamp. Values without a zone are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }

    // Postgres text output: "2024-01-15 10:00:00.123+00"
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(t) = DateTime::parse_from_str(raw, fmt) {
            return Some(t.with_timezone(&Utc));
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// ISO-8601 UTC with millisecond precision and a `Z` suffix.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Rewrite a stored expiry that lacks a timezone marker as full ISO-8601 UTC.
///
/// Values that already carry `Z` or an offset are returned untouched, as are
/// values that cannot be parsed (the expiry check treats those as expired).
pub fn normalize_timestamp(raw: &str) -> String {
    if has_zone_marker(raw) {
        return raw.to_string();
    }
    match parse_timestamp(raw) {
        Some(t) => format_timestamp(t),
        None => raw.to_string(),
    }
}

fn has_zone_marker(raw: &str) -> bool {
    if raw.ends_with('Z') || raw.ends_with('z') || raw.contains('+') {
        return true;
    }
    // A trailing "-hh:mm" / "-hhmm" offset after the time part.
    match raw.find(['T', ' ']) {
        Some(idx) => raw[idx..].contains('-'),
        None => false,
    }
}
