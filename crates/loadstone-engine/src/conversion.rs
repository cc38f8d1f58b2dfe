//! Builds the conversion context from the `codec` settings section.

use chrono::{DateTime, FixedOffset, Utc};

use loadstone_codecs::context::{parse_boolean_pair, ConversionContext, TimeUnit};
use loadstone_codecs::number::{NumberPattern, OverflowStrategy, RoundingMode};
use loadstone_codecs::temporal::TemporalFormat;
use loadstone_codecs::uuid_gen::TimeUuidGenerator;
use loadstone_types::error::WorkflowError;

use crate::settings::CodecSettings;

fn config(detail: impl Into<String>) -> WorkflowError {
    WorkflowError::Config(detail.into())
}

fn parse_zone(raw: &str) -> Result<FixedOffset, WorkflowError> {
    match raw {
        "UTC" | "Z" | "utc" => Ok(FixedOffset::east_opt(0).expect("UTC")),
        offset => offset
            .parse::<FixedOffset>()
            .map_err(|_| config(format!("invalid time zone offset: {raw}"))),
    }
}

impl CodecSettings {
    /// Reifies the settings into the immutable conversion context.
    pub fn conversion_context(&self) -> Result<ConversionContext, WorkflowError> {
        let mut ctx = ConversionContext::default()
            .with_locale(&self.locale)
            .with_time_zone(parse_zone(&self.time_zone)?)
            .with_null_strings(self.null_strings.clone())
            .with_timestamp_format(TemporalFormat::from_spec(&self.timestamp))
            .with_overflow_strategy(
                OverflowStrategy::parse(&self.overflow_strategy).map_err(config)?,
            )
            .with_rounding_mode(RoundingMode::parse(&self.rounding).map_err(config)?)
            .with_uuid_strategy(TimeUuidGenerator::parse(&self.uuid_strategy).map_err(config)?);

        let pairs = self
            .boolean_strings
            .iter()
            .map(|p| parse_boolean_pair(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(config)?;
        ctx = ctx.with_boolean_words(pairs);

        ctx.boolean_numbers = (self.boolean_numbers[0], self.boolean_numbers[1]);
        ctx.number_pattern = NumberPattern::parse(&self.number).map_err(config)?;
        ctx.format_numbers = self.format_numbers;
        ctx.date_format = TemporalFormat::from_spec(&self.date);
        ctx.time_format = TemporalFormat::from_spec(&self.time);
        ctx.time_unit = TimeUnit::parse(&self.unit).map_err(config)?;
        ctx.epoch = self
            .epoch
            .parse::<DateTime<Utc>>()
            .map_err(|_| config(format!("invalid epoch: {}", self.epoch)))?;
        ctx.allow_extra_fields = self.allow_extra_fields;
        ctx.allow_missing_fields = self.allow_missing_fields;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_context() {
        let ctx = CodecSettings::default().conversion_context().unwrap();
        assert_eq!(ctx.timestamp_format, TemporalFormat::CqlTimestamp);
        assert_eq!(ctx.time_unit, TimeUnit::Milliseconds);
        assert!(!ctx.allow_extra_fields);
    }

    #[test]
    fn custom_settings_flow_through() {
        let settings = CodecSettings {
            null_strings: vec!["NULL".into()],
            boolean_strings: vec!["oui:non".into()],
            time_zone: "+02:00".into(),
            overflow_strategy: "TRUNCATE".into(),
            uuid_strategy: "MIN".into(),
            ..CodecSettings::default()
        };
        let ctx = settings.conversion_context().unwrap();
        assert!(ctx.is_null_string("NULL"));
        assert_eq!(ctx.parse_boolean_word("OUI"), Some(true));
        assert_eq!(ctx.time_zone.local_minus_utc(), 2 * 3600);
        assert_eq!(ctx.uuid_strategy, TimeUuidGenerator::Min);
    }

    #[test]
    fn invalid_settings_are_config_errors() {
        for (field, value) in [
            ("time_zone", "Mars/Olympus"),
            ("overflow_strategy", "EXPLODE"),
            ("unit", "FORTNIGHTS"),
            ("epoch", "not-a-date"),
        ] {
            let mut settings = CodecSettings::default();
            match field {
                "time_zone" => settings.time_zone = value.into(),
                "overflow_strategy" => settings.overflow_strategy = value.into(),
                "unit" => settings.unit = value.into(),
                "epoch" => settings.epoch = value.into(),
                _ => unreachable!(),
            }
            assert!(
                matches!(settings.conversion_context(), Err(WorkflowError::Config(_))),
                "{field}"
            );
        }
    }
}
