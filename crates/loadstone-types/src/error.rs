//! Error taxonomy.
//!
//! Per-record failures ([`MappingError`], [`CodecError`], connector read
//! errors) are captured into the result stream and logged; they never abort
//! the pipeline on their own. Only [`WorkflowError`] variants terminate an
//! operation.

use crate::field::Field;
use crate::value::{CqlType, ExternalFormat};

/// A conversion failure between an external value and a CQL value.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no codec found for {external} -> {internal}")]
    NoCodecFound {
        external: ExternalFormat,
        internal: CqlType,
    },
    #[error("'{value}' overflows {target}")]
    Overflow { value: String, target: CqlType },
    #[error("cannot parse '{value}' as {target}: {detail}")]
    Parse {
        value: String,
        target: CqlType,
        detail: String,
    },
    #[error("cannot format {target} value for output: {detail}")]
    Format { target: CqlType, detail: String },
}

/// A mapping-rule violation or per-field conversion failure. The statement
/// is not emitted; the record becomes an error record instead.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("extra field '{0}' in record but allow_extra_fields is false")]
    ExtraField(Field),
    #[error("required variable '{0}' missing from record but allow_missing_fields is false")]
    MissingField(String),
    #[error("could not convert field '{field}'")]
    Codec {
        field: Field,
        #[source]
        cause: CodecError,
    },
    #[error("row has no column for variable '{0}'")]
    MissingColumn(String),
}

/// How the error ceiling is expressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorThreshold {
    /// Abort after more than this many terminal failures.
    Absolute(u64),
    /// Abort when failed/total exceeds this ratio (0 < r < 1).
    Ratio(f32),
    /// Never abort on record failures.
    Unlimited,
}

impl ErrorThreshold {
    /// Parses `"100"`, `"1%"`, `"0.2%"` or `"-1"` (unlimited).
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            let pct: f32 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid error ratio: {raw}"))?;
            if !(0.0..100.0).contains(&pct) {
                return Err(format!("error ratio out of range: {raw}"));
            }
            return Ok(ErrorThreshold::Ratio(pct / 100.0));
        }
        let abs: i64 = raw
            .parse()
            .map_err(|_| format!("invalid error threshold: {raw}"))?;
        if abs < 0 {
            Ok(ErrorThreshold::Unlimited)
        } else {
            Ok(ErrorThreshold::Absolute(abs as u64))
        }
    }

    /// Whether `errors` failures out of `total` outcomes breach the
    /// ceiling.
    pub fn exceeded(&self, errors: u64, total: u64) -> bool {
        match self {
            ErrorThreshold::Absolute(max) => errors > *max,
            ErrorThreshold::Ratio(ratio) => {
                total > 0 && (errors as f64 / total as f64) > f64::from(*ratio)
            }
            ErrorThreshold::Unlimited => false,
        }
    }
}

impl std::fmt::Display for ErrorThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorThreshold::Absolute(max) => write!(f, "{max}"),
            ErrorThreshold::Ratio(r) => write!(f, "{}%", r * 100.0),
            ErrorThreshold::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Terminal workflow failures. Everything per-record stays out of this
/// enum by design.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("too many errors: {errors} failures (threshold: {threshold})")]
    TooManyErrors {
        errors: u64,
        threshold: ErrorThreshold,
    },
    #[error("operation interrupted")]
    Interrupted,
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn is_interruption(&self) -> bool {
        matches!(self, WorkflowError::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_parsing() {
        assert_eq!(ErrorThreshold::parse("100"), Ok(ErrorThreshold::Absolute(100)));
        assert_eq!(ErrorThreshold::parse("-1"), Ok(ErrorThreshold::Unlimited));
        assert_eq!(ErrorThreshold::parse("2%"), Ok(ErrorThreshold::Ratio(0.02)));
        assert!(ErrorThreshold::parse("150%").is_err());
        assert!(ErrorThreshold::parse("abc").is_err());
    }

    #[test]
    fn absolute_threshold_is_strictly_greater() {
        let t = ErrorThreshold::Absolute(2);
        assert!(!t.exceeded(2, 10));
        assert!(t.exceeded(3, 10));
    }

    #[test]
    fn ratio_threshold_needs_total() {
        let t = ErrorThreshold::Ratio(0.5);
        assert!(!t.exceeded(5, 0));
        assert!(!t.exceeded(5, 10));
        assert!(t.exceeded(6, 10));
    }

    #[test]
    fn unlimited_never_exceeds() {
        assert!(!ErrorThreshold::Unlimited.exceeded(u64::MAX, 1));
    }
}
