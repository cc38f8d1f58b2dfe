//! The immutable formatter/policy bundle consulted by every codec.

use chrono::{DateTime, FixedOffset, Utc};

use crate::number::{NumberPattern, OverflowStrategy, RoundingMode};
use crate::temporal::TemporalFormat;
use crate::uuid_gen::TimeUuidGenerator;

/// Separators for locale-sensitive number parsing and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    pub grouping_separator: char,
    pub decimal_separator: char,
}

impl Locale {
    /// `en-US` style separators, the default.
    pub const US: Locale = Locale {
        grouping_separator: ',',
        decimal_separator: '.',
    };

    /// Resolves a BCP-47-ish tag to separators. Only the comma/period and
    /// period/comma families are distinguished.
    pub fn for_tag(tag: &str) -> Locale {
        match tag.split(['-', '_']).next().unwrap_or("en") {
            "de" | "fr" | "es" | "it" | "pt" | "nl" | "da" | "fi" | "sv" | "nb" | "tr" => Locale {
                grouping_separator: '.',
                decimal_separator: ',',
            },
            _ => Locale::US,
        }
    }
}

/// Unit applied to digit-only temporal inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_uppercase().as_str() {
            "SECONDS" => Ok(TimeUnit::Seconds),
            "MILLISECONDS" => Ok(TimeUnit::Milliseconds),
            "MICROSECONDS" => Ok(TimeUnit::Microseconds),
            "NANOSECONDS" => Ok(TimeUnit::Nanoseconds),
            other => Err(format!("unknown time unit: {other}")),
        }
    }
}

/// Immutable bag of formatters and conversion policies. Built once per
/// operation from the `codec` settings section; shared by reference.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub locale: Locale,
    pub time_zone: FixedOffset,
    /// Ordered; the first entry is used when formatting nulls to text,
    /// all entries are recognized when parsing.
    pub null_strings: Vec<String>,
    /// Lowercased `(true_word, false_word)` pairs; all pairs parse, the
    /// first pair formats.
    pub boolean_words: Vec<(String, String)>,
    /// `(true_number, false_number)`.
    pub boolean_numbers: (f64, f64),
    pub number_pattern: NumberPattern,
    /// Apply `number_pattern` when formatting numeric output.
    pub format_numbers: bool,
    pub overflow_strategy: OverflowStrategy,
    pub rounding_mode: RoundingMode,
    pub timestamp_format: TemporalFormat,
    pub date_format: TemporalFormat,
    pub time_format: TemporalFormat,
    pub time_unit: TimeUnit,
    pub epoch: DateTime<Utc>,
    pub uuid_strategy: TimeUuidGenerator,
    pub allow_extra_fields: bool,
    pub allow_missing_fields: bool,
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self {
            locale: Locale::US,
            time_zone: FixedOffset::east_opt(0).expect("UTC offset"),
            null_strings: Vec::new(),
            boolean_words: default_boolean_words(),
            boolean_numbers: (1.0, 0.0),
            number_pattern: NumberPattern::parse("#,###.##").expect("default number pattern"),
            format_numbers: false,
            overflow_strategy: OverflowStrategy::Reject,
            rounding_mode: RoundingMode::HalfEven,
            timestamp_format: TemporalFormat::CqlTimestamp,
            date_format: TemporalFormat::IsoLocalDate,
            time_format: TemporalFormat::IsoLocalTime,
            time_unit: TimeUnit::Milliseconds,
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            uuid_strategy: TimeUuidGenerator::Random,
            allow_extra_fields: false,
            allow_missing_fields: false,
        }
    }
}

fn default_boolean_words() -> Vec<(String, String)> {
    ["1:0", "Y:N", "T:F", "YES:NO", "TRUE:FALSE"]
        .iter()
        .map(|pair| parse_boolean_pair(pair).expect("default boolean words"))
        .collect()
}

/// Parses one `true_value:false_value` pair, lowercasing both sides.
pub fn parse_boolean_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((t, f)) if !t.is_empty() && !f.is_empty() => {
            Ok((t.to_ascii_lowercase(), f.to_ascii_lowercase()))
        }
        _ => Err(format!("boolean words must be 'true:false' pairs, got: {raw}")),
    }
}

impl ConversionContext {
    pub fn with_null_strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.null_strings = strings.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_locale(mut self, tag: &str) -> Self {
        self.locale = Locale::for_tag(tag);
        self
    }

    pub fn with_time_zone(mut self, zone: FixedOffset) -> Self {
        self.time_zone = zone;
        self
    }

    pub fn with_boolean_words(mut self, pairs: Vec<(String, String)>) -> Self {
        if !pairs.is_empty() {
            self.boolean_words = pairs;
        }
        self
    }

    pub fn with_timestamp_format(mut self, format: TemporalFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    pub fn with_overflow_strategy(mut self, strategy: OverflowStrategy) -> Self {
        self.overflow_strategy = strategy;
        self
    }

    pub fn with_rounding_mode(mut self, mode: RoundingMode) -> Self {
        self.rounding_mode = mode;
        self
    }

    pub fn with_uuid_strategy(mut self, strategy: TimeUuidGenerator) -> Self {
        self.uuid_strategy = strategy;
        self
    }

    /// The string a textual null unloads to.
    pub fn null_output(&self) -> &str {
        self.null_strings.first().map(String::as_str).unwrap_or("")
    }

    /// Whether a raw external string is a configured null sentinel.
    pub fn is_null_string(&self, raw: &str) -> bool {
        self.null_strings.iter().any(|s| s == raw)
    }

    /// Parses a boolean word against every configured input pair,
    /// case-insensitively.
    pub fn parse_boolean_word(&self, raw: &str) -> Option<bool> {
        let lower = raw.to_ascii_lowercase();
        for (t, f) in &self.boolean_words {
            if *t == lower {
                return Some(true);
            }
            if *f == lower {
                return Some(false);
            }
        }
        None
    }

    /// Formats a boolean with the first configured pair.
    pub fn format_boolean_word(&self, value: bool) -> &str {
        let (t, f) = &self.boolean_words[0];
        if value {
            t
        } else {
            f
        }
    }
}
