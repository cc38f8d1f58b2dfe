//! Temporal parsing and formatting.
//!
//! The `CQL_TIMESTAMP` format accepts every CQL temporal literal shape on
//! input and formats with the RFC 3339 offset form on output. Digit-only
//! timestamp inputs fall back to a count of the configured time unit since
//! the configured epoch.

use chrono::{
    DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use loadstone_types::error::CodecError;
use loadstone_types::value::CqlType;

use crate::context::{ConversionContext, TimeUnit};

/// A configured temporal format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalFormat {
    /// Accepts all CQL timestamp literal shapes; formats as
    /// `ISO_OFFSET_DATE_TIME`.
    CqlTimestamp,
    IsoLocalDate,
    IsoLocalTime,
    IsoInstant,
    /// A chrono `strftime` pattern.
    Pattern(String),
}

impl TemporalFormat {
    /// Resolves a settings value: a named pre-defined formatter or a
    /// pattern.
    pub fn from_spec(spec: &str) -> TemporalFormat {
        match spec {
            "CQL_TIMESTAMP" => TemporalFormat::CqlTimestamp,
            "ISO_LOCAL_DATE" => TemporalFormat::IsoLocalDate,
            "ISO_LOCAL_TIME" => TemporalFormat::IsoLocalTime,
            "ISO_INSTANT" => TemporalFormat::IsoInstant,
            pattern => TemporalFormat::Pattern(pattern.to_string()),
        }
    }
}

/// Naive date/time shapes a CQL timestamp literal can take.
const CQL_NAIVE_DATETIME_SHAPES: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn parse_error(raw: &str, target: &CqlType, detail: impl Into<String>) -> CodecError {
    CodecError::Parse {
        value: raw.to_string(),
        target: target.clone(),
        detail: detail.into(),
    }
}

fn resolve_naive(naive: NaiveDateTime, ctx: &ConversionContext) -> DateTime<Utc> {
    match ctx.time_zone.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

fn digits_since_epoch(raw: &str, ctx: &ConversionContext) -> Option<DateTime<Utc>> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return None;
    }
    // A leading minus sign is allowed; anything else must be digits.
    if raw.len() > 1 && raw[1..].contains('-') {
        return None;
    }
    let count: i64 = raw.parse().ok()?;
    let delta = match ctx.time_unit {
        TimeUnit::Seconds => Duration::seconds(count),
        TimeUnit::Milliseconds => Duration::milliseconds(count),
        TimeUnit::Microseconds => Duration::microseconds(count),
        TimeUnit::Nanoseconds => Duration::nanoseconds(count),
    };
    ctx.epoch.checked_add_signed(delta)
}

/// Parses a CQL timestamp literal: RFC 3339, naive date/time shapes
/// resolved with the configured zone, or a bare date.
fn parse_cql_timestamp(raw: &str, ctx: &ConversionContext) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for shape in CQL_NAIVE_DATETIME_SHAPES {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, shape) {
            return Some(resolve_naive(naive, ctx));
        }
        // The same shape with an explicit offset appended.
        if let Ok(dt) = DateTime::parse_from_str(raw, &format!("{shape}%:z")) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(resolve_naive(date.and_hms_opt(0, 0, 0)?, ctx));
    }
    None
}

/// Parses a string to a CQL `timestamp`.
pub fn parse_timestamp(raw: &str, ctx: &ConversionContext) -> Result<DateTime<Utc>, CodecError> {
    let target = CqlType::Timestamp;
    let parsed = match &ctx.timestamp_format {
        TemporalFormat::CqlTimestamp => parse_cql_timestamp(raw, ctx),
        TemporalFormat::IsoInstant => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        TemporalFormat::IsoLocalDate => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| resolve_naive(naive, ctx)),
        TemporalFormat::IsoLocalTime => None,
        TemporalFormat::Pattern(pattern) => NaiveDateTime::parse_from_str(raw, pattern)
            .ok()
            .map(|naive| resolve_naive(naive, ctx))
            .or_else(|| {
                DateTime::parse_from_str(raw, pattern)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
    };
    parsed
        .or_else(|| digits_since_epoch(raw, ctx))
        .ok_or_else(|| parse_error(raw, &target, "not a recognized timestamp"))
}

/// Formats a CQL `timestamp` for unloading.
pub fn format_timestamp(value: &DateTime<Utc>, ctx: &ConversionContext) -> String {
    let zoned = value.with_timezone(&ctx.time_zone);
    match &ctx.timestamp_format {
        // ISO_OFFSET_DATE_TIME under CQL_TIMESTAMP.
        TemporalFormat::CqlTimestamp => zoned.to_rfc3339(),
        TemporalFormat::IsoInstant => value.to_rfc3339(),
        TemporalFormat::IsoLocalDate => zoned.format("%Y-%m-%d").to_string(),
        TemporalFormat::IsoLocalTime => zoned.format("%H:%M:%S%.f").to_string(),
        TemporalFormat::Pattern(pattern) => zoned.format(pattern).to_string(),
    }
}

pub fn parse_date(raw: &str, ctx: &ConversionContext) -> Result<NaiveDate, CodecError> {
    let target = CqlType::Date;
    let parsed = match &ctx.date_format {
        TemporalFormat::Pattern(pattern) => NaiveDate::parse_from_str(raw, pattern).ok(),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
    };
    parsed.ok_or_else(|| parse_error(raw, &target, "not a recognized date"))
}

pub fn format_date(value: &NaiveDate, ctx: &ConversionContext) -> String {
    match &ctx.date_format {
        TemporalFormat::Pattern(pattern) => value.format(pattern).to_string(),
        _ => value.format("%Y-%m-%d").to_string(),
    }
}

pub fn parse_time(raw: &str, ctx: &ConversionContext) -> Result<NaiveTime, CodecError> {
    let target = CqlType::Time;
    let parsed = match &ctx.time_format {
        TemporalFormat::Pattern(pattern) => NaiveTime::parse_from_str(raw, pattern).ok(),
        _ => NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok(),
    };
    parsed.ok_or_else(|| parse_error(raw, &target, "not a recognized time"))
}

pub fn format_time(value: &NaiveTime, ctx: &ConversionContext) -> String {
    match &ctx.time_format {
        TemporalFormat::Pattern(pattern) => value.format(pattern).to_string(),
        _ => value.format("%H:%M:%S%.f").to_string(),
    }
}
