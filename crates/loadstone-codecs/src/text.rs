//! String-to-CQL conversions for delimited-text sources.
//!
//! One parse and one format function per CQL type family; the registry's
//! [`crate::registry::Codec`] dispatches here for `ExternalFormat::Text`.
//! Collection literals are parsed as JSON, which is the accepted string
//! form for collections.

use std::net::IpAddr;

use loadstone_types::error::CodecError;
use loadstone_types::value::{CqlType, CqlValue};
use uuid::Uuid;

use crate::context::ConversionContext;
use crate::geo;
use crate::json;
use crate::number::{self, Number};
use crate::temporal;

fn parse_error(raw: &str, target: &CqlType, detail: impl Into<String>) -> CodecError {
    CodecError::Parse {
        value: raw.to_string(),
        target: target.clone(),
        detail: detail.into(),
    }
}

/// Parses a non-null external string into a value of `target`. Null
/// sentinels and the empty-string rule are handled by the registry before
/// this is called.
pub fn parse(raw: &str, target: &CqlType, ctx: &ConversionContext) -> Result<CqlValue, CodecError> {
    match target {
        CqlType::Ascii => {
            if raw.is_ascii() {
                Ok(CqlValue::Ascii(raw.to_string()))
            } else {
                Err(parse_error(raw, target, "not ASCII"))
            }
        }
        CqlType::Text | CqlType::Varchar => Ok(CqlValue::Text(raw.to_string())),
        CqlType::Boolean => parse_boolean(raw, ctx),
        CqlType::TinyInt => parse_integer(raw, target, i8::MIN as i128, i8::MAX as i128, ctx)
            .map(|i| CqlValue::TinyInt(i as i8)),
        CqlType::SmallInt => parse_integer(raw, target, i16::MIN as i128, i16::MAX as i128, ctx)
            .map(|i| CqlValue::SmallInt(i as i16)),
        CqlType::Int => parse_integer(raw, target, i32::MIN as i128, i32::MAX as i128, ctx)
            .map(|i| CqlValue::Int(i as i32)),
        CqlType::BigInt => parse_integer(raw, target, i64::MIN as i128, i64::MAX as i128, ctx)
            .map(|i| CqlValue::BigInt(i as i64)),
        CqlType::Counter => parse_integer(raw, target, i64::MIN as i128, i64::MAX as i128, ctx)
            .map(|i| CqlValue::Counter(i as i64)),
        CqlType::Float => {
            let parsed = number::parse_number(raw, ctx)
                .map_err(|detail| parse_error(raw, target, detail))?;
            number::narrow_to_float(raw, parsed, target, ctx).map(CqlValue::Float)
        }
        CqlType::Double => {
            let parsed = number::parse_number(raw, ctx)
                .map_err(|detail| parse_error(raw, target, detail))?;
            Ok(CqlValue::Double(number::to_f64(parsed)))
        }
        CqlType::Timestamp => temporal::parse_timestamp(raw, ctx).map(CqlValue::Timestamp),
        CqlType::Date => temporal::parse_date(raw, ctx).map(CqlValue::Date),
        CqlType::Time => temporal::parse_time(raw, ctx).map(CqlValue::Time),
        CqlType::Uuid => Uuid::parse_str(raw)
            .map(CqlValue::Uuid)
            .map_err(|e| parse_error(raw, target, e.to_string())),
        CqlType::TimeUuid => parse_time_uuid(raw, ctx),
        CqlType::Blob => parse_blob(raw, target),
        CqlType::Inet => raw
            .parse::<IpAddr>()
            .map(CqlValue::Inet)
            .map_err(|e| parse_error(raw, target, e.to_string())),
        CqlType::List(_) | CqlType::Set(_) | CqlType::Map(_, _) => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| parse_error(raw, target, format!("invalid JSON literal: {e}")))?;
            json::parse(&value, target, ctx)
        }
        CqlType::Point | CqlType::LineString | CqlType::Polygon => {
            geo::parse_geometry(raw, target)
        }
    }
}

fn parse_boolean(raw: &str, ctx: &ConversionContext) -> Result<CqlValue, CodecError> {
    if let Some(b) = ctx.parse_boolean_word(raw) {
        return Ok(CqlValue::Boolean(b));
    }
    // Numeric booleans: compare against the configured pair.
    if let Ok(n) = number::parse_number(raw, ctx) {
        let v = number::to_f64(n);
        if v == ctx.boolean_numbers.0 {
            return Ok(CqlValue::Boolean(true));
        }
        if v == ctx.boolean_numbers.1 {
            return Ok(CqlValue::Boolean(false));
        }
    }
    Err(parse_error(raw, &CqlType::Boolean, "not a boolean word"))
}

fn parse_integer(
    raw: &str,
    target: &CqlType,
    min: i128,
    max: i128,
    ctx: &ConversionContext,
) -> Result<i128, CodecError> {
    let parsed: Number =
        number::parse_number(raw, ctx).map_err(|detail| parse_error(raw, target, detail))?;
    number::narrow_to_integer(raw, parsed, min, max, target, ctx)
}

fn parse_time_uuid(raw: &str, ctx: &ConversionContext) -> Result<CqlValue, CodecError> {
    if let Ok(uuid) = Uuid::parse_str(raw) {
        if uuid.get_version_num() == 1 {
            return Ok(CqlValue::TimeUuid(uuid));
        }
        return Err(parse_error(raw, &CqlType::TimeUuid, "not a version-1 UUID"));
    }
    // Anything else is interpreted as a timestamp and a UUID is generated
    // for it with the configured strategy.
    let timestamp = temporal::parse_timestamp(raw, ctx)
        .map_err(|_| parse_error(raw, &CqlType::TimeUuid, "neither a UUID nor a timestamp"))?;
    Ok(CqlValue::TimeUuid(ctx.uuid_strategy.generate(timestamp)))
}

fn parse_blob(raw: &str, target: &CqlType) -> Result<CqlValue, CodecError> {
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| parse_error(raw, target, "blob literals must start with 0x"))?;
    if hex.len() % 2 != 0 {
        return Err(parse_error(raw, target, "odd hex length"));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        let byte = u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|e| parse_error(raw, target, e.to_string()))?;
        bytes.push(byte);
    }
    Ok(CqlValue::Blob(bytes))
}

/// Formats a non-null CQL value for a text sink. The registry handles
/// nulls before this is called.
pub fn format(value: &CqlValue, ctx: &ConversionContext) -> Result<String, CodecError> {
    let formatted = match value {
        CqlValue::Null => String::new(),
        CqlValue::Ascii(s) | CqlValue::Text(s) => s.clone(),
        CqlValue::Boolean(b) => ctx.format_boolean_word(*b).to_string(),
        CqlValue::TinyInt(v) => number::format_i128(i128::from(*v), ctx),
        CqlValue::SmallInt(v) => number::format_i128(i128::from(*v), ctx),
        CqlValue::Int(v) => number::format_i128(i128::from(*v), ctx),
        CqlValue::BigInt(v) | CqlValue::Counter(v) => number::format_i128(i128::from(*v), ctx),
        CqlValue::Float(v) => number::format_f64(f64::from(*v), ctx),
        CqlValue::Double(v) => number::format_f64(*v, ctx),
        CqlValue::Timestamp(ts) => temporal::format_timestamp(ts, ctx),
        CqlValue::Date(d) => temporal::format_date(d, ctx),
        CqlValue::Time(t) => temporal::format_time(t, ctx),
        CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => u.to_string(),
        CqlValue::Blob(bytes) => {
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("0x");
            for b in bytes {
                out.push_str(&format!("{b:02x}"));
            }
            out
        }
        CqlValue::Inet(addr) => addr.to_string(),
        CqlValue::List(_) | CqlValue::Set(_) | CqlValue::Map(_) => {
            let json = json::format(value, ctx)?;
            json.to_string()
        }
        CqlValue::Point(_) | CqlValue::LineString(_) | CqlValue::Polygon(_) => {
            geo::format_wkt(value).ok_or_else(|| CodecError::Format {
                target: CqlType::Point,
                detail: "not a geometry".to_string(),
            })?
        }
    };
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx() -> ConversionContext {
        ConversionContext::default()
    }

    #[test]
    fn boolean_words_and_numbers() {
        let c = ctx();
        assert_eq!(parse("Y", &CqlType::Boolean, &c).unwrap(), CqlValue::Boolean(true));
        assert_eq!(parse("no", &CqlType::Boolean, &c).unwrap(), CqlValue::Boolean(false));
        assert_eq!(parse("1", &CqlType::Boolean, &c).unwrap(), CqlValue::Boolean(true));
        assert!(parse("2", &CqlType::Boolean, &c).is_err());
        assert_eq!(format(&CqlValue::Boolean(true), &c).unwrap(), "1");
    }

    #[test]
    fn integers_respect_width() {
        let c = ctx();
        assert_eq!(parse("127", &CqlType::TinyInt, &c).unwrap(), CqlValue::TinyInt(127));
        assert!(parse("128", &CqlType::TinyInt, &c).is_err());
        assert_eq!(
            parse("1,000,000", &CqlType::Int, &c).unwrap(),
            CqlValue::Int(1_000_000)
        );
    }

    #[test]
    fn ascii_rejects_non_ascii() {
        let c = ctx();
        assert!(parse("héllo", &CqlType::Ascii, &c).is_err());
        assert_eq!(
            parse("hello", &CqlType::Ascii, &c).unwrap(),
            CqlValue::Ascii("hello".into())
        );
    }

    #[test]
    fn blob_hex_round_trips() {
        let c = ctx();
        let parsed = parse("0xCAFE", &CqlType::Blob, &c).unwrap();
        assert_eq!(parsed, CqlValue::Blob(vec![0xCA, 0xFE]));
        assert_eq!(format(&parsed, &c).unwrap(), "0xcafe");
        assert!(parse("CAFE", &CqlType::Blob, &c).is_err());
    }

    #[test]
    fn inet_parses_v4_and_v6() {
        let c = ctx();
        assert!(parse("192.168.1.1", &CqlType::Inet, &c).is_ok());
        assert!(parse("::1", &CqlType::Inet, &c).is_ok());
        assert!(parse("not-an-ip", &CqlType::Inet, &c).is_err());
    }

    #[test]
    fn timeuuid_accepts_uuid_or_timestamp() {
        let c = ctx();
        let direct = parse("fe2b4360-28c6-11e2-81c1-0800200c9a66", &CqlType::TimeUuid, &c);
        assert!(matches!(direct.unwrap(), CqlValue::TimeUuid(_)));

        // v4 UUIDs are not time-UUIDs.
        assert!(parse("f47ac10b-58cc-4372-a567-0e02b2c3d479", &CqlType::TimeUuid, &c).is_err());

        let generated = parse("2022-02-02T12:00:00Z", &CqlType::TimeUuid, &c).unwrap();
        match generated {
            CqlValue::TimeUuid(u) => {
                let ts = crate::uuid_gen::extract_timestamp(&u).unwrap();
                assert_eq!(ts, Utc.with_ymd_and_hms(2022, 2, 2, 12, 0, 0).unwrap());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn string_collections_parse_as_json() {
        let c = ctx();
        assert_eq!(
            parse("[1, 2, 3]", &CqlType::List(Box::new(CqlType::Int)), &c).unwrap(),
            CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2), CqlValue::Int(3)])
        );
        let formatted = format(
            &CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]),
            &c,
        )
        .unwrap();
        assert_eq!(formatted, "[1,2]");
    }

    #[test]
    fn timestamps_format_back_to_offset_form() {
        let c = ctx();
        let parsed = parse("2021-03-01T14:30:00Z", &CqlType::Timestamp, &c).unwrap();
        assert_eq!(
            format(&parsed, &c).unwrap(),
            "2021-03-01T14:30:00+00:00"
        );
    }
}
