//! Timestamp and duration conversions between the widget's ISO-8601 instants
//! and the backend's `YYYY-MM-DD HH:MM:SS` columns.
//!
//! All backend timestamps are UTC wall-clock values without a zone marker.

use std::fmt;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};

use crate::error::{Result, SyncError};

pub const BACKEND_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Parse a widget-supplied instant.
///
/// Accepts RFC 3339 (`2024-01-01T00:00:00.000Z`, `...+02:00`), a local-less
/// `2024-01-01T00:00:00` which is read as UTC, the backend's own format, and
/// a bare date meaning midnight UTC.
pub fn parse_iso(input: &str) -> Result<DateTime<Utc>> {
    let s = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(SyncError::InvalidDate(input.to_string()))
}

/// Format an instant the way the backend stores it.
pub fn format_backend(dt: DateTime<Utc>) -> String {
    dt.format(BACKEND_FORMAT).to_string()
}

/// Format an instant the way the widget expects it: `2024-03-05T00:00:00.000Z`.
pub fn format_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert an ISO-8601 instant into a backend timestamp, dropping subseconds.
pub fn to_backend_timestamp(iso: &str) -> Result<String> {
    parse_iso(iso).map(format_backend)
}

/// Parse a backend timestamp column. Date-only values mean midnight UTC.
pub fn from_backend_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, BACKEND_FORMAT) {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SyncError::InvalidDate(s.to_string()))
}

/// Backend timestamp to the ISO form handed to the widget.
pub fn backend_to_iso(s: &str) -> Result<String> {
    from_backend_timestamp(s).map(format_iso)
}

/// Elapsed time between two instants as `DD HH:MM:SS`.
///
/// Components are floored. A negative span is clamped to zero.
pub fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let mut millis = (end - start).num_milliseconds();
    if millis < 0 {
        log::warn!("end {end} precedes start {start}; clamping duration to zero");
        millis = 0;
    }
    let days = millis / MS_PER_DAY;
    let hours = (millis % MS_PER_DAY) / MS_PER_HOUR;
    let minutes = (millis % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (millis % MS_PER_MINUTE) / MS_PER_SECOND;
    format!("{days:02} {hours:02}:{minutes:02}:{seconds:02}")
}

/// [`duration_between`] over two ISO-8601 strings.
pub fn compute_duration(start: &str, end: &str) -> Result<String> {
    Ok(duration_between(parse_iso(start)?, parse_iso(end)?))
}

/// Units a task duration may be expressed in when rescheduling by duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DurationUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ms" | "millisecond" => Ok(Self::Millisecond),
            "s" | "second" => Ok(Self::Second),
            "m" | "minute" => Ok(Self::Minute),
            "h" | "hour" => Ok(Self::Hour),
            "d" | "day" => Ok(Self::Day),
            "w" | "week" => Ok(Self::Week),
            "M" | "month" => Ok(Self::Month),
            "q" | "quarter" => Ok(Self::Quarter),
            "y" | "year" => Ok(Self::Year),
            _ => Err(SyncError::InvalidUnit(s.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Millisecond => "millisecond",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step `end` back by `amount` units. Month-based units move the calendar
/// month (clamping to the last valid day) rather than a fixed span.
pub fn subtract_units(end: DateTime<Utc>, amount: i64, unit: DurationUnit) -> Result<DateTime<Utc>> {
    let fixed = |delta: Option<TimeDelta>| delta.and_then(|d| end.checked_sub_signed(d));
    let shifted = match unit {
        DurationUnit::Millisecond => fixed(TimeDelta::try_milliseconds(amount)),
        DurationUnit::Second => fixed(TimeDelta::try_seconds(amount)),
        DurationUnit::Minute => fixed(TimeDelta::try_minutes(amount)),
        DurationUnit::Hour => fixed(TimeDelta::try_hours(amount)),
        DurationUnit::Day => fixed(TimeDelta::try_days(amount)),
        DurationUnit::Week => fixed(TimeDelta::try_weeks(amount)),
        DurationUnit::Month => shift_months(end, amount),
        DurationUnit::Quarter => amount.checked_mul(3).and_then(|m| shift_months(end, m)),
        DurationUnit::Year => amount.checked_mul(12).and_then(|m| shift_months(end, m)),
    };
    shifted.ok_or_else(|| SyncError::InvalidDate(format!("{end} minus {amount} {unit}")))
}

fn shift_months(end: DateTime<Utc>, back: i64) -> Option<DateTime<Utc>> {
    let months = Months::new(u32::try_from(back.unsigned_abs()).ok()?);
    if back >= 0 {
        end.checked_sub_months(months)
    } else {
        end.checked_add_months(months)
    }
}

/// Start date implied by an end date and a duration. Fractional durations are
/// truncated to whole units.
pub fn compute_start_date(end: &str, duration: f64, unit: DurationUnit) -> Result<String> {
    if !duration.is_finite() {
        return Err(SyncError::InvalidDate(format!("duration {duration}")));
    }
    let end = parse_iso(end)?;
    subtract_units(end, duration.trunc() as i64, unit).map(format_iso)
}
