//! Lenient timestamp parsing for feed dates.
//!
//! RFC 3339 and RFC 2822 are always accepted. The additional formats seen in
//! the wild (bare ISO dates, RFC 1123 variants with named zones, two-digit
//! years, missing weekday or seconds) are only tried once
//! [`register_extra_formats`] has run.
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

enum DateFormat {
    /// Carries a numeric `%z` offset.
    Zoned(&'static str),
    /// No zone; interpreted as UTC.
    Naive(&'static str),
    /// Date only; midnight UTC.
    Date(&'static str),
}

static EXTRA_FORMATS: OnceLock<Vec<DateFormat>> = OnceLock::new();

/// Named zones found in RFC 1123-style dates, as numeric offsets.
const NAMED_ZONES: [(&str, &str); 13] = [
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("UT", "+0000"),
    ("Z", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("CET", "+0100"),
];

/// Install the additional formats. Idempotent.
pub fn register_extra_formats() {
    EXTRA_FORMATS.get_or_init(|| {
        tracing::debug!("Registering extra feed date formats");
        vec![
            DateFormat::Zoned("%a, %d %b %Y %H:%M:%S %z"),
            DateFormat::Zoned("%a, %d %b %Y %H:%M %z"),
            DateFormat::Zoned("%a, %d %b %y %H:%M:%S %z"),
            DateFormat::Zoned("%d %b %Y %H:%M:%S %z"),
            DateFormat::Zoned("%d %b %y %H:%M:%S %z"),
            DateFormat::Zoned("%A, %d %B %Y %H:%M:%S %z"),
            DateFormat::Zoned("%Y-%m-%dT%H:%M:%S%z"),
            DateFormat::Zoned("%Y-%m-%d %H:%M:%S %z"),
            DateFormat::Naive("%Y-%m-%dT%H:%M:%S"),
            DateFormat::Naive("%Y-%m-%d %H:%M:%S"),
            DateFormat::Date("%Y-%m-%d"),
        ]
    });
}

/// Replace a trailing named zone with its numeric offset.
fn numeric_zone(text: &str) -> Option<String> {
    let (head, zone) = text.rsplit_once(' ')?;
    let upper = zone.to_ascii_uppercase();
    NAMED_ZONES
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, offset)| format!("{head} {offset}"))
}

fn parse_with(format: &DateFormat, text: &str) -> Option<DateTime<Utc>> {
    match format {
        DateFormat::Zoned(fmt) => DateTime::parse_from_str(text, fmt)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        DateFormat::Naive(fmt) => NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .map(|dt| dt.and_utc()),
        DateFormat::Date(fmt) => NaiveDate::parse_from_str(text, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc()),
    }
}

/// Parse a feed timestamp, `None` when no known format matches.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = EXTRA_FORMATS.get()?;
    let zoned = numeric_zone(text);
    let candidates = std::iter::once(text).chain(zoned.as_deref());
    for candidate in candidates {
        if let Some(dt) = formats.iter().find_map(|f| parse_with(f, candidate)) {
            return Some(dt);
        }
    }

    tracing::debug!(date = %text, "Unrecognized feed date");
    None
}
