//! Dependency lag codec.
//!
//! The backend stores a lag as an absolute timestamp whose offset from the
//! Unix epoch is the lag itself (`1970-01-02 00:00:00` is one day). The widget
//! wants a magnitude plus a unit symbol.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::convert::{format_backend, from_backend_timestamp};
use crate::error::{Result, SyncError};

pub const ZERO_LAG: &str = "1970-01-01 00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum LagUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl LagUnit {
    /// Ascending by size; decoding walks this order.
    pub const ALL: [LagUnit; 8] = [
        Self::Millisecond,
        Self::Second,
        Self::Minute,
        Self::Hour,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Year,
    ];

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ms" | "millisecond" => Ok(Self::Millisecond),
            "s" | "second" => Ok(Self::Second),
            "m" | "minute" => Ok(Self::Minute),
            "h" | "hour" => Ok(Self::Hour),
            "d" | "day" => Ok(Self::Day),
            "w" | "week" => Ok(Self::Week),
            "M" | "month" => Ok(Self::Month),
            "y" | "year" => Ok(Self::Year),
            _ => Err(SyncError::InvalidUnit(s.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Millisecond => "ms",
            Self::Second => "s",
            Self::Minute => "m",
            Self::Hour => "h",
            Self::Day => "d",
            Self::Week => "w",
            Self::Month => "M",
            Self::Year => "y",
        }
    }

    /// Length of one unit in milliseconds. Months are 30.44 days and years
    /// 365.25 days.
    pub fn millis(self) -> f64 {
        const DAY: f64 = 1000.0 * 60.0 * 60.0 * 24.0;
        match self {
            Self::Millisecond => 1.0,
            Self::Second => 1000.0,
            Self::Minute => 1000.0 * 60.0,
            Self::Hour => 1000.0 * 60.0 * 60.0,
            Self::Day => DAY,
            Self::Week => DAY * 7.0,
            Self::Month => DAY * 30.44,
            Self::Year => DAY * 365.25,
        }
    }

    fn next(self) -> Option<Self> {
        Self::ALL.get(self as usize + 1).copied()
    }
}

impl fmt::Display for LagUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for LagUnit {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<LagUnit> for &'static str {
    fn from(unit: LagUnit) -> Self {
        unit.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lag {
    #[serde(rename = "lag")]
    pub magnitude: f64,
    #[serde(rename = "lagUnit")]
    pub unit: LagUnit,
}

impl Lag {
    pub const ZERO: Lag = Lag {
        magnitude: 0.0,
        unit: LagUnit::Day,
    };
}

/// Decode a backend lag into the coarsest unit whose next unit would exceed it.
/// Anything from one year upward stays in years.
pub fn decode_lag(encoded: &str) -> Result<Lag> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() || trimmed == ZERO_LAG {
        return Ok(Lag::ZERO);
    }
    let total = from_backend_timestamp(trimmed)?.timestamp_millis() as f64;

    let unit = LagUnit::ALL
        .into_iter()
        .find(|unit| match unit.next() {
            Some(next) => total < next.millis(),
            None => true,
        })
        .unwrap_or(LagUnit::Year);

    Ok(Lag {
        magnitude: round2(total / unit.millis()),
        unit,
    })
}

/// Encode a magnitude in `unit` (symbol or full name) as a backend lag.
pub fn encode_lag(magnitude: f64, unit: &str) -> Result<String> {
    encode(magnitude, LagUnit::parse(unit)?)
}

pub fn encode(magnitude: f64, unit: LagUnit) -> Result<String> {
    let millis = magnitude * unit.millis();
    if !millis.is_finite() {
        return Err(SyncError::InvalidDate(format!("lag {magnitude}{unit}")));
    }
    DateTime::from_timestamp_millis(millis.trunc() as i64)
        .map(format_backend)
        .ok_or_else(|| SyncError::InvalidDate(format!("lag {magnitude}{unit}")))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
