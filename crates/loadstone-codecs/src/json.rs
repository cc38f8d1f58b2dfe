//! JSON-to-CQL conversions for structured sources.
//!
//! JSON strings defer to the text rules for the same target type, so the
//! two external formats stay consistent; typed JSON scalars convert
//! directly.

use loadstone_types::error::CodecError;
use loadstone_types::value::{CqlType, CqlValue};
use serde_json::Value;

use crate::context::ConversionContext;
use crate::geo;
use crate::number::{self, Number};
use crate::temporal;
use crate::text;

fn parse_error(value: &Value, target: &CqlType, detail: impl Into<String>) -> CodecError {
    CodecError::Parse {
        value: value.to_string(),
        target: target.clone(),
        detail: detail.into(),
    }
}

fn as_number(value: &Value) -> Option<Number> {
    let n = value.as_number()?;
    if let Some(i) = n.as_i64() {
        Some(Number::Int(i128::from(i)))
    } else {
        n.as_f64().map(Number::Float)
    }
}

fn narrow_int(
    value: &Value,
    target: &CqlType,
    min: i128,
    max: i128,
    ctx: &ConversionContext,
) -> Result<i128, CodecError> {
    let n = as_number(value).ok_or_else(|| parse_error(value, target, "not a number"))?;
    number::narrow_to_integer(&value.to_string(), n, min, max, target, ctx)
}

/// Parses a non-null JSON value into a value of `target`.
pub fn parse(
    value: &Value,
    target: &CqlType,
    ctx: &ConversionContext,
) -> Result<CqlValue, CodecError> {
    // Strings carry the text conversion rules, including null sentinels
    // handled upstream by the registry.
    if let Value::String(s) = value {
        return text::parse(s, target, ctx);
    }
    match target {
        CqlType::Ascii | CqlType::Text | CqlType::Varchar => {
            // Non-string scalars stringify; a JSON object or array is
            // stored as its compact JSON text.
            Ok(CqlValue::Text(value.to_string()))
        }
        CqlType::Boolean => match value {
            Value::Bool(b) => Ok(CqlValue::Boolean(*b)),
            Value::Number(_) => {
                let v = number::to_f64(as_number(value).expect("checked number"));
                if v == ctx.boolean_numbers.0 {
                    Ok(CqlValue::Boolean(true))
                } else if v == ctx.boolean_numbers.1 {
                    Ok(CqlValue::Boolean(false))
                } else {
                    Err(parse_error(value, target, "not a boolean number"))
                }
            }
            _ => Err(parse_error(value, target, "not a boolean")),
        },
        CqlType::TinyInt => narrow_int(value, target, i8::MIN as i128, i8::MAX as i128, ctx)
            .map(|i| CqlValue::TinyInt(i as i8)),
        CqlType::SmallInt => narrow_int(value, target, i16::MIN as i128, i16::MAX as i128, ctx)
            .map(|i| CqlValue::SmallInt(i as i16)),
        CqlType::Int => narrow_int(value, target, i32::MIN as i128, i32::MAX as i128, ctx)
            .map(|i| CqlValue::Int(i as i32)),
        CqlType::BigInt => narrow_int(value, target, i64::MIN as i128, i64::MAX as i128, ctx)
            .map(|i| CqlValue::BigInt(i as i64)),
        CqlType::Counter => narrow_int(value, target, i64::MIN as i128, i64::MAX as i128, ctx)
            .map(|i| CqlValue::Counter(i as i64)),
        CqlType::Float => {
            let n = as_number(value).ok_or_else(|| parse_error(value, target, "not a number"))?;
            number::narrow_to_float(&value.to_string(), n, target, ctx).map(CqlValue::Float)
        }
        CqlType::Double => {
            let n = as_number(value).ok_or_else(|| parse_error(value, target, "not a number"))?;
            Ok(CqlValue::Double(number::to_f64(n)))
        }
        CqlType::Timestamp => {
            // A JSON number is a count of the configured unit since epoch.
            match as_number(value) {
                Some(Number::Int(i)) => {
                    temporal::parse_timestamp(&i.to_string(), ctx).map(CqlValue::Timestamp)
                }
                _ => Err(parse_error(value, target, "not a timestamp")),
            }
        }
        CqlType::Date | CqlType::Time | CqlType::Uuid | CqlType::TimeUuid | CqlType::Blob
        | CqlType::Inet => Err(parse_error(
            value,
            target,
            "only JSON strings convert to this type",
        )),
        CqlType::List(elem) => {
            let items = value
                .as_array()
                .ok_or_else(|| parse_error(value, target, "not a JSON array"))?;
            let converted = items
                .iter()
                .map(|item| parse_element(item, elem, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CqlValue::List(converted))
        }
        CqlType::Set(elem) => {
            let items = value
                .as_array()
                .ok_or_else(|| parse_error(value, target, "not a JSON array"))?;
            let mut converted: Vec<CqlValue> = Vec::with_capacity(items.len());
            for item in items {
                let v = parse_element(item, elem, ctx)?;
                // Sets deduplicate, keeping first occurrence order.
                if !converted.contains(&v) {
                    converted.push(v);
                }
            }
            Ok(CqlValue::Set(converted))
        }
        CqlType::Map(key_ty, val_ty) => {
            let object = value
                .as_object()
                .ok_or_else(|| parse_error(value, target, "not a JSON object"))?;
            let mut entries = Vec::with_capacity(object.len());
            for (k, v) in object {
                let key = text::parse(k, key_ty, ctx).map_err(|e| {
                    parse_error(value, target, format!("bad map key '{k}': {e}"))
                })?;
                let val = parse_element(v, val_ty, ctx)?;
                entries.push((key, val));
            }
            Ok(CqlValue::Map(entries))
        }
        CqlType::Point | CqlType::LineString | CqlType::Polygon => geo::parse_geojson(value, target),
    }
}

/// A null element inside a collection stays null; everything else
/// converts recursively.
fn parse_element(
    value: &Value,
    target: &CqlType,
    ctx: &ConversionContext,
) -> Result<CqlValue, CodecError> {
    if value.is_null() {
        Ok(CqlValue::Null)
    } else {
        parse(value, target, ctx)
    }
}

/// Formats a non-null CQL value as a typed JSON value.
pub fn format(value: &CqlValue, ctx: &ConversionContext) -> Result<Value, CodecError> {
    let json = match value {
        CqlValue::Null => Value::Null,
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::String(s.clone()),
        CqlValue::Boolean(b) => Value::Bool(*b),
        CqlValue::TinyInt(v) => Value::from(*v),
        CqlValue::SmallInt(v) => Value::from(*v),
        CqlValue::Int(v) => Value::from(*v),
        CqlValue::BigInt(v) | CqlValue::Counter(v) => Value::from(*v),
        CqlValue::Float(v) => serde_json::Number::from_f64(f64::from(*v))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CqlValue::Double(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CqlValue::Timestamp(_)
        | CqlValue::Date(_)
        | CqlValue::Time(_)
        | CqlValue::Uuid(_)
        | CqlValue::TimeUuid(_)
        | CqlValue::Blob(_)
        | CqlValue::Inet(_) => Value::String(text::format(value, ctx)?),
        CqlValue::List(items) | CqlValue::Set(items) => Value::Array(
            items
                .iter()
                .map(|item| format(item, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        CqlValue::Map(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = text::format(k, ctx)?;
                object.insert(key, format(v, ctx)?);
            }
            Value::Object(object)
        }
        CqlValue::Point(_) | CqlValue::LineString(_) | CqlValue::Polygon(_) => {
            Value::String(geo::format_wkt(value).ok_or_else(|| CodecError::Format {
                target: CqlType::Point,
                detail: "not a geometry".to_string(),
            })?)
        }
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ConversionContext {
        ConversionContext::default()
    }

    #[test]
    fn typed_scalars_convert_directly() {
        let c = ctx();
        assert_eq!(
            parse(&json!(true), &CqlType::Boolean, &c).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(parse(&json!(42), &CqlType::Int, &c).unwrap(), CqlValue::Int(42));
        assert_eq!(
            parse(&json!(2.5), &CqlType::Double, &c).unwrap(),
            CqlValue::Double(2.5)
        );
    }

    #[test]
    fn json_strings_use_text_rules() {
        let c = ctx();
        assert_eq!(
            parse(&json!("YES"), &CqlType::Boolean, &c).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            parse(&json!("1,234"), &CqlType::Int, &c).unwrap(),
            CqlValue::Int(1234)
        );
    }

    #[test]
    fn numeric_boolean_uses_configured_pair() {
        let c = ctx();
        assert_eq!(
            parse(&json!(1), &CqlType::Boolean, &c).unwrap(),
            CqlValue::Boolean(true)
        );
        assert!(parse(&json!(7), &CqlType::Boolean, &c).is_err());
    }

    #[test]
    fn sets_deduplicate_preserving_first_occurrence() {
        let c = ctx();
        let parsed = parse(
            &json!([3, 1, 3, 2, 1]),
            &CqlType::Set(Box::new(CqlType::Int)),
            &c,
        )
        .unwrap();
        assert_eq!(
            parsed,
            CqlValue::Set(vec![CqlValue::Int(3), CqlValue::Int(1), CqlValue::Int(2)])
        );
    }

    #[test]
    fn maps_convert_keys_through_text_rules() {
        let c = ctx();
        let parsed = parse(
            &json!({"10": "a", "20": "b"}),
            &CqlType::Map(Box::new(CqlType::Int), Box::new(CqlType::Text)),
            &c,
        )
        .unwrap();
        match parsed {
            CqlValue::Map(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, CqlValue::Int(10));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_textual_json_to_temporal_types_is_rejected() {
        let c = ctx();
        assert!(parse(&json!(true), &CqlType::Date, &c).is_err());
        assert!(parse(&json!([1]), &CqlType::Uuid, &c).is_err());
    }

    #[test]
    fn json_number_timestamp_uses_epoch_unit() {
        let c = ctx();
        let parsed = parse(&json!(86_400_000), &CqlType::Timestamp, &c).unwrap();
        match parsed {
            CqlValue::Timestamp(ts) => {
                assert_eq!(ts.to_rfc3339(), "1970-01-02T00:00:00+00:00")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn formats_typed_json_values() {
        let c = ctx();
        assert_eq!(format(&CqlValue::Int(5), &c).unwrap(), json!(5));
        assert_eq!(format(&CqlValue::Boolean(false), &c).unwrap(), json!(false));
        assert_eq!(
            format(&CqlValue::List(vec![CqlValue::Int(1), CqlValue::Null]), &c).unwrap(),
            json!([1, null])
        );
    }
}
