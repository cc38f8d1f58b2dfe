//! Locale-aware number parsing and formatting with overflow policies.

use loadstone_types::error::CodecError;
use loadstone_types::value::CqlType;

use crate::context::{ConversionContext, Locale};

/// What to do when a parsed number does not fit the target CQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Fail the conversion.
    Reject,
    /// Discard the fractional part; saturate at the type bounds.
    Truncate,
    /// Round the fractional part per the configured rounding mode;
    /// saturate at the type bounds.
    Round,
}

impl OverflowStrategy {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_uppercase().as_str() {
            "REJECT" => Ok(OverflowStrategy::Reject),
            "TRUNCATE" => Ok(OverflowStrategy::Truncate),
            "ROUND" => Ok(OverflowStrategy::Round),
            other => Err(format!("unknown overflow strategy: {other}")),
        }
    }
}

/// Rounding applied by [`OverflowStrategy::Round`] and by pattern-based
/// formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Up,
    Down,
    Ceiling,
    Floor,
    HalfUp,
    HalfDown,
    HalfEven,
}

impl RoundingMode {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_uppercase().as_str() {
            "UP" => Ok(RoundingMode::Up),
            "DOWN" => Ok(RoundingMode::Down),
            "CEILING" => Ok(RoundingMode::Ceiling),
            "FLOOR" => Ok(RoundingMode::Floor),
            "HALF_UP" => Ok(RoundingMode::HalfUp),
            "HALF_DOWN" => Ok(RoundingMode::HalfDown),
            "HALF_EVEN" | "UNNECESSARY" => Ok(RoundingMode::HalfEven),
            other => Err(format!("unknown rounding mode: {other}")),
        }
    }

    /// Rounds `value` to an integer.
    pub fn round(self, value: f64) -> f64 {
        match self {
            RoundingMode::Up => value.abs().ceil().copysign(value),
            RoundingMode::Down => value.trunc(),
            RoundingMode::Ceiling => value.ceil(),
            RoundingMode::Floor => value.floor(),
            RoundingMode::HalfUp => value.abs().round().copysign(value),
            RoundingMode::HalfDown => {
                let truncated = value.trunc();
                if (value - truncated).abs() > 0.5 {
                    truncated + 1.0f64.copysign(value)
                } else {
                    truncated
                }
            }
            RoundingMode::HalfEven => {
                // f64::round_ties_even, spelled out for older toolchains.
                let rounded = value.round();
                if (value - value.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
                    rounded - 1.0f64.copysign(value)
                } else {
                    rounded
                }
            }
        }
    }
}

/// A `#,###.##`-style pattern reduced to what the engine needs: whether
/// grouping applies and the min/max fraction digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberPattern {
    pub grouped: bool,
    pub min_fraction_digits: usize,
    pub max_fraction_digits: usize,
}

impl NumberPattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if pattern.is_empty() || !pattern.chars().all(|c| "#0,.".contains(c)) {
            return Err(format!("invalid number pattern: {pattern}"));
        }
        let grouped = pattern.contains(',');
        let fraction = pattern.split('.').nth(1).unwrap_or("");
        Ok(NumberPattern {
            grouped,
            min_fraction_digits: fraction.chars().filter(|c| *c == '0').count(),
            max_fraction_digits: fraction.len(),
        })
    }
}

/// An exactly-parsed number before narrowing to the target type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i128),
    Float(f64),
}

/// Parses `raw` with the configured pattern separators, then falls back to
/// locale-neutral parsing.
pub fn parse_number(raw: &str, ctx: &ConversionContext) -> Result<Number, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty string".to_string());
    }
    if let Some(n) = parse_with_locale(trimmed, ctx.locale) {
        return Ok(n);
    }
    // Locale-neutral fallback: plain integer, then plain float.
    if let Ok(i) = trimmed.parse::<i128>() {
        return Ok(Number::Int(i));
    }
    trimmed
        .parse::<f64>()
        .map(Number::Float)
        .map_err(|e| e.to_string())
}

fn parse_with_locale(raw: &str, locale: Locale) -> Option<Number> {
    let mut normalized = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == locale.grouping_separator {
            continue;
        }
        if c == locale.decimal_separator {
            normalized.push('.');
        } else {
            normalized.push(c);
        }
    }
    if let Ok(i) = normalized.parse::<i128>() {
        return Some(Number::Int(i));
    }
    normalized.parse::<f64>().ok().map(Number::Float)
}

fn overflow(raw: &str, target: &CqlType) -> CodecError {
    CodecError::Overflow {
        value: raw.to_string(),
        target: target.clone(),
    }
}

/// Narrows a parsed number to an integer type with the configured
/// overflow strategy.
pub fn narrow_to_integer(
    raw: &str,
    number: Number,
    min: i128,
    max: i128,
    target: &CqlType,
    ctx: &ConversionContext,
) -> Result<i128, CodecError> {
    let integral = match number {
        Number::Int(i) => i,
        Number::Float(f) => {
            if f.fract() == 0.0 {
                f as i128
            } else {
                match ctx.overflow_strategy {
                    OverflowStrategy::Reject => return Err(overflow(raw, target)),
                    OverflowStrategy::Truncate => f.trunc() as i128,
                    OverflowStrategy::Round => ctx.rounding_mode.round(f) as i128,
                }
            }
        }
    };
    if integral < min || integral > max {
        match ctx.overflow_strategy {
            OverflowStrategy::Reject => Err(overflow(raw, target)),
            OverflowStrategy::Truncate | OverflowStrategy::Round => {
                Ok(integral.clamp(min, max))
            }
        }
    } else {
        Ok(integral)
    }
}

/// Narrows a parsed number to `f32`, rejecting out-of-range magnitudes
/// under [`OverflowStrategy::Reject`].
pub fn narrow_to_float(
    raw: &str,
    number: Number,
    target: &CqlType,
    ctx: &ConversionContext,
) -> Result<f32, CodecError> {
    let wide = match number {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    };
    let narrow = wide as f32;
    if narrow.is_infinite() && wide.is_finite() {
        match ctx.overflow_strategy {
            OverflowStrategy::Reject => return Err(overflow(raw, target)),
            OverflowStrategy::Truncate | OverflowStrategy::Round => {
                return Ok(f32::MAX.copysign(narrow))
            }
        }
    }
    Ok(narrow)
}

pub fn to_f64(number: Number) -> f64 {
    match number {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    }
}

/// Formats a value for unloading: plain `to_string` unless
/// `format_numbers` is set, in which case the pattern's grouping and
/// fraction-digit bounds apply.
pub fn format_f64(value: f64, ctx: &ConversionContext) -> String {
    if !ctx.format_numbers {
        return trim_float(value);
    }
    let pattern = &ctx.number_pattern;
    let scale = 10f64.powi(pattern.max_fraction_digits as i32);
    let rounded = ctx.rounding_mode.round(value * scale) / scale;
    let mut out = format!("{rounded:.prec$}", prec = pattern.max_fraction_digits);
    if pattern.max_fraction_digits > pattern.min_fraction_digits {
        trim_trailing_zeros(&mut out, pattern.min_fraction_digits);
    }
    if out.contains('.') {
        out = out.replace('.', &ctx.locale.decimal_separator.to_string());
    }
    if pattern.grouped {
        out = group_integral(&out, ctx.locale);
    }
    out
}

pub fn format_i128(value: i128, ctx: &ConversionContext) -> String {
    if !ctx.format_numbers || !ctx.number_pattern.grouped {
        return value.to_string();
    }
    group_integral(&value.to_string(), ctx.locale)
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn trim_trailing_zeros(out: &mut String, keep: usize) {
    if let Some(dot) = out.find('.') {
        let mut end = out.len();
        while end > dot + 1 + keep && out.as_bytes()[end - 1] == b'0' {
            end -= 1;
        }
        if end == dot + 1 {
            end = dot;
        }
        out.truncate(end);
    }
}

fn group_integral(raw: &str, locale: Locale) -> String {
    let (sign, rest) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw),
    };
    let (integral, fraction) = match rest.find(locale.decimal_separator) {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, ""),
    };
    let mut grouped = String::new();
    for (i, c) in integral.chars().enumerate() {
        if i > 0 && (integral.len() - i) % 3 == 0 {
            grouped.push(locale.grouping_separator);
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConversionContext {
        ConversionContext::default()
    }

    #[test]
    fn parses_grouped_and_plain_numbers() {
        assert_eq!(parse_number("1,234", &ctx()), Ok(Number::Int(1234)));
        assert_eq!(parse_number("-42", &ctx()), Ok(Number::Int(-42)));
        assert_eq!(parse_number("3.25", &ctx()), Ok(Number::Float(3.25)));
        assert!(parse_number("abc", &ctx()).is_err());
        assert!(parse_number("", &ctx()).is_err());
    }

    #[test]
    fn french_locale_swaps_separators() {
        let ctx = ConversionContext::default().with_locale("fr-FR");
        assert_eq!(parse_number("1.234,5", &ctx), Ok(Number::Float(1234.5)));
    }

    #[test]
    fn reject_fails_on_fraction_and_range() {
        let c = ctx();
        assert!(narrow_to_integer("1.5", Number::Float(1.5), i8::MIN as i128, i8::MAX as i128, &CqlType::TinyInt, &c).is_err());
        assert!(narrow_to_integer("300", Number::Int(300), i8::MIN as i128, i8::MAX as i128, &CqlType::TinyInt, &c).is_err());
    }

    #[test]
    fn truncate_drops_fraction_and_saturates() {
        let c = ctx().with_overflow_strategy(OverflowStrategy::Truncate);
        assert_eq!(
            narrow_to_integer("1.9", Number::Float(1.9), i8::MIN as i128, i8::MAX as i128, &CqlType::TinyInt, &c).unwrap(),
            1
        );
        assert_eq!(
            narrow_to_integer("300", Number::Int(300), i8::MIN as i128, i8::MAX as i128, &CqlType::TinyInt, &c).unwrap(),
            127
        );
    }

    #[test]
    fn round_applies_rounding_mode() {
        let c = ctx()
            .with_overflow_strategy(OverflowStrategy::Round)
            .with_rounding_mode(RoundingMode::HalfUp);
        assert_eq!(
            narrow_to_integer("2.5", Number::Float(2.5), i32::MIN as i128, i32::MAX as i128, &CqlType::Int, &c).unwrap(),
            3
        );
    }

    #[test]
    fn half_even_breaks_ties_to_even() {
        assert_eq!(RoundingMode::HalfEven.round(2.5), 2.0);
        assert_eq!(RoundingMode::HalfEven.round(3.5), 4.0);
        assert_eq!(RoundingMode::HalfEven.round(-2.5), -2.0);
    }

    #[test]
    fn float_narrowing_rejects_overflow() {
        let c = ctx();
        assert!(narrow_to_float("1e300", Number::Float(1e300), &CqlType::Float, &c).is_err());
        assert_eq!(
            narrow_to_float("1.5", Number::Float(1.5), &CqlType::Float, &c).unwrap(),
            1.5
        );
    }

    #[test]
    fn formatting_without_pattern_is_plain() {
        assert_eq!(format_f64(1234.5, &ctx()), "1234.5");
        assert_eq!(format_f64(42.0, &ctx()), "42");
    }

    #[test]
    fn formatting_with_pattern_groups_and_limits_fraction() {
        let mut c = ctx();
        c.format_numbers = true;
        assert_eq!(format_f64(1234.567, &c), "1,234.57");
        assert_eq!(format_f64(1234.0, &c), "1,234");
        assert_eq!(format_i128(1234567, &c), "1,234,567");
    }

    #[test]
    fn number_pattern_parsing() {
        let p = NumberPattern::parse("#,###.##").unwrap();
        assert!(p.grouped);
        assert_eq!(p.max_fraction_digits, 2);
        assert_eq!(p.min_fraction_digits, 0);
        assert!(NumberPattern::parse("abc").is_err());
    }
}
