//! Normalization of the date strings found in sitemaps and article markup.
//!
//! Publishers write dates in every format imaginable. [`parse_date`] tries a
//! fixed, ordered list of explicit patterns and the first one that matches
//! wins, so the order is a policy:
//!
//! 1. ISO-8601 (with, then without, a UTC offset), SQL `YYYY-MM-DD HH:MM:SS`
//!    and bare dates come first and are never ambiguous.
//! 2. European `DD/MM/YYYY` is tried **before** American `MM/DD/YYYY`, so
//!    `"01/02/2023"` is the 1st of February. An American date is only
//!    recognised when the European reading is impossible (`"12/31/2022"`).
//! 3. RFC-2822 with and without offset, then the Unix `ctime` layout.
//!
//! When none of them match, a permissive pass accepts RFC-3339 with
//! fractional seconds or `Z`, lenient RFC-2822, and a handful of
//! human-readable layouts. Anything still unparsed yields `None`.
//!
//! Values without an offset are taken to be UTC so every result carries one.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use tracing::warn;

/// A pattern in the ordered list, tagged with how much of a timestamp it
/// carries.
#[derive(Debug, Clone, Copy)]
enum Pattern {
    /// Date, time and UTC offset.
    Zoned(&'static str),
    /// Date and time, no offset.
    Naive(&'static str),
    /// Calendar date only, midnight is assumed.
    DateOnly(&'static str),
}

const EXPLICIT_PATTERNS: &[Pattern] = &[
    Pattern::Zoned("%Y-%m-%dT%H:%M:%S%z"),
    Pattern::Naive("%Y-%m-%dT%H:%M:%S"),
    Pattern::Naive("%Y-%m-%d %H:%M:%S"),
    Pattern::DateOnly("%Y-%m-%d"),
    Pattern::Naive("%d/%m/%Y %H:%M:%S"),
    Pattern::DateOnly("%d/%m/%Y"),
    Pattern::Naive("%m/%d/%Y %H:%M:%S"),
    Pattern::DateOnly("%m/%d/%Y"),
    Pattern::Zoned("%a, %d %b %Y %H:%M:%S %z"),
    Pattern::Naive("%a, %d %b %Y %H:%M:%S"),
    Pattern::Naive("%a %b %d %H:%M:%S %Y"),
];

const PERMISSIVE_PATTERNS: &[Pattern] = &[
    Pattern::Zoned("%Y-%m-%dT%H:%M:%S%.f%z"),
    Pattern::Zoned("%Y-%m-%dT%H:%M%z"),
    Pattern::Zoned("%Y-%m-%d %H:%M:%S%z"),
    Pattern::Zoned("%Y-%m-%d %H:%M:%S %z"),
    Pattern::Naive("%Y-%m-%dT%H:%M:%S%.f"),
    Pattern::Naive("%Y-%m-%d %H:%M:%S%.f"),
    Pattern::Naive("%Y-%m-%dT%H:%M"),
    Pattern::Naive("%Y-%m-%d %H:%M"),
    Pattern::Naive("%Y/%m/%d %H:%M:%S"),
    Pattern::Naive("%d/%m/%Y %H:%M"),
    Pattern::Naive("%d-%m-%Y %H:%M:%S"),
    Pattern::DateOnly("%Y/%m/%d"),
    Pattern::DateOnly("%d-%m-%Y"),
    Pattern::DateOnly("%d.%m.%Y"),
    Pattern::DateOnly("%B %d, %Y"),
    Pattern::DateOnly("%b %d, %Y"),
    Pattern::DateOnly("%d %B %Y"),
    Pattern::DateOnly("%d %b %Y"),
];

/// Parse a date-like string into a timestamp with a fixed UTC offset.
///
/// Empty or whitespace-only input returns `None` silently. Input that no
/// pattern understands returns `None` and logs a warning; an unparseable date
/// is an ordinary outcome, never an error.
///
/// # Examples
///
/// ```ignore
/// let dt = parse_date("01/02/2023").unwrap();
/// assert_eq!(dt.to_rfc3339(), "2023-02-01T00:00:00+00:00");
/// ```
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(dt) = EXPLICIT_PATTERNS.iter().find_map(|p| apply(*p, value)) {
        return Some(dt);
    }

    if let Some(dt) = permissive(value) {
        return Some(dt);
    }

    warn!(raw = %value, "Could not parse date");
    None
}

fn permissive(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt);
    }
    PERMISSIVE_PATTERNS.iter().find_map(|p| apply(*p, value))
}

fn apply(pattern: Pattern, value: &str) -> Option<DateTime<FixedOffset>> {
    match pattern {
        Pattern::Zoned(fmt) => DateTime::parse_from_str(value, fmt).ok(),
        Pattern::Naive(fmt) => NaiveDateTime::parse_from_str(value, fmt)
            .ok()
            .map(|naive| naive.and_utc().fixed_offset()),
        Pattern::DateOnly(fmt) => NaiveDate::parse_from_str(value, fmt)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc().fixed_offset()),
    }
}
