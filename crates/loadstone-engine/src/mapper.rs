//! Binding records to prepared-statement variables, and rows back to
//! records.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use loadstone_codecs::registry::{CodecLookup, CodecRegistry};
use loadstone_types::error::MappingError;
use loadstone_types::field::Field;
use loadstone_types::record::{DataRecord, ErrorRecord};
use loadstone_types::result::Row;
use loadstone_types::statement::{BoundStatement, Consistency, PreparedTemplate};
use loadstone_types::value::{CqlType, CqlValue, ExternalFormat, ExternalValue};

use crate::schema::{MappingSource, UnloadColumn};

/// Maps one record to one bound statement, converting every field
/// through the codec registry. A failure produces an error record and no
/// statement.
pub struct RecordMapper {
    template: Arc<PreparedTemplate>,
    sources: Vec<MappingSource>,
    registry: Arc<CodecRegistry>,
    consistency: Consistency,
    allow_extra_fields: bool,
    allow_missing_fields: bool,
}

impl RecordMapper {
    pub fn new(
        template: Arc<PreparedTemplate>,
        sources: Vec<MappingSource>,
        registry: Arc<CodecRegistry>,
        consistency: Consistency,
    ) -> Self {
        let ctx = registry.context();
        let allow_extra_fields = ctx.allow_extra_fields;
        let allow_missing_fields = ctx.allow_missing_fields;
        assert_eq!(
            template.variables.len(),
            sources.len(),
            "one mapping source per bind variable"
        );
        Self {
            template,
            sources,
            registry,
            consistency,
            allow_extra_fields,
            allow_missing_fields,
        }
    }

    pub fn map(&self, record: DataRecord) -> Result<BoundStatement, Box<ErrorRecord>> {
        let meta = record.meta();
        let fail = |cause: MappingError| {
            Box::new(ErrorRecord::new(
                Arc::clone(&meta.resource),
                meta.position,
                meta.source.clone(),
                anyhow::Error::new(cause),
            ))
        };

        if !self.allow_extra_fields {
            let mapped: HashSet<&Field> = self
                .sources
                .iter()
                .filter_map(|s| match s {
                    MappingSource::Field(f) => Some(f),
                    _ => None,
                })
                .collect();
            for (field, _) in record.fields() {
                if !mapped.contains(field) {
                    return Err(fail(MappingError::ExtraField(field.clone())));
                }
            }
        }

        let mut values = Vec::with_capacity(self.sources.len());
        for (variable, source) in self.template.variables.iter().zip(&self.sources) {
            let value = match source {
                MappingSource::Field(field) => match record.value_of(field) {
                    Some(external) => Some(
                        self.convert(external, &variable.cql_type)
                            .map_err(|cause| {
                                fail(MappingError::Codec {
                                    field: field.clone(),
                                    cause,
                                })
                            })?,
                    ),
                    None if self.allow_missing_fields => None,
                    None => {
                        return Err(fail(MappingError::MissingField(variable.name.clone())))
                    }
                },
                MappingSource::Literal(literal) => Some(
                    self.convert(
                        &ExternalValue::Text(literal.clone()),
                        &variable.cql_type,
                    )
                    .map_err(|cause| {
                        fail(MappingError::Codec {
                            field: Field::Name(variable.name.clone()),
                            cause,
                        })
                    })?,
                ),
                MappingSource::Now => Some(self.now_value(&variable.cql_type)),
                MappingSource::RandomUuid => Some(CqlValue::Uuid(uuid::Uuid::new_v4())),
            };
            values.push(value);
        }

        Ok(BoundStatement::new(Arc::clone(&self.template), values)
            .with_record(meta)
            .with_consistency(self.consistency))
    }

    fn convert(
        &self,
        external: &ExternalValue,
        target: &CqlType,
    ) -> Result<CqlValue, loadstone_types::error::CodecError> {
        let codec = self.registry.lookup(external.format(), target)?;
        codec.external_to_internal(external)
    }

    fn now_value(&self, target: &CqlType) -> CqlValue {
        let now = Utc::now();
        match target {
            CqlType::TimeUuid => {
                CqlValue::TimeUuid(self.registry.context().uuid_strategy.generate(now))
            }
            CqlType::Date => CqlValue::Date(now.date_naive()),
            CqlType::Time => CqlValue::Time(now.time()),
            _ => CqlValue::Timestamp(now),
        }
    }
}

/// The mapper's inverse: converts one result row into one record for the
/// connector sink.
pub struct RowUnmapper {
    columns: Vec<UnloadColumn>,
    registry: Arc<CodecRegistry>,
    format: ExternalFormat,
}

impl RowUnmapper {
    pub fn new(
        columns: Vec<UnloadColumn>,
        registry: Arc<CodecRegistry>,
        format: ExternalFormat,
    ) -> Self {
        Self {
            columns,
            registry,
            format,
        }
    }

    pub fn unmap(
        &self,
        row: &Row,
        resource: &Arc<str>,
        position: u64,
    ) -> Result<DataRecord, Box<ErrorRecord>> {
        let fail = |cause: anyhow::Error| {
            Box::new(ErrorRecord::new(
                Arc::clone(resource),
                position,
                String::new(),
                cause,
            ))
        };

        let mut fields = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = row
                .get(&column.column)
                .ok_or_else(|| {
                    fail(anyhow::Error::new(MappingError::MissingColumn(
                        column.column.clone(),
                    )))
                })?;
            let codec = self
                .registry
                .lookup(self.format, &column.cql_type)
                .map_err(|cause| {
                    fail(anyhow::Error::new(MappingError::Codec {
                        field: column.field.clone(),
                        cause,
                    }))
                })?;
            let external = codec.internal_to_external(value).map_err(|cause| {
                fail(anyhow::Error::new(MappingError::Codec {
                    field: column.field.clone(),
                    cause,
                }))
            })?;
            fields.push((column.field.clone(), external));
        }
        Ok(DataRecord::new(
            Arc::clone(resource),
            position,
            String::new(),
            fields,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadstone_codecs::ConversionContext;
    use loadstone_types::statement::BoundVariable;

    fn template() -> Arc<PreparedTemplate> {
        Arc::new(PreparedTemplate {
            query: "INSERT INTO ks.t (code, population, added) VALUES (:code, :population, :added)"
                .into(),
            variables: vec![
                BoundVariable {
                    name: "code".into(),
                    cql_type: CqlType::Text,
                },
                BoundVariable {
                    name: "population".into(),
                    cql_type: CqlType::BigInt,
                },
                BoundVariable {
                    name: "added".into(),
                    cql_type: CqlType::Timestamp,
                },
            ],
            partition_key_indices: vec![0],
        })
    }

    fn registry(ctx: ConversionContext) -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::new(ctx))
    }

    fn sources() -> Vec<MappingSource> {
        vec![
            MappingSource::Field(Field::Name("code".into())),
            MappingSource::Field(Field::Name("population".into())),
            MappingSource::Now,
        ]
    }

    fn record(fields: Vec<(Field, ExternalValue)>) -> DataRecord {
        DataRecord::new(Arc::from("file:///in.csv"), 7, "raw,line".into(), fields)
    }

    #[test]
    fn maps_fields_through_codecs() {
        let mapper = RecordMapper::new(
            template(),
            sources(),
            registry(ConversionContext::default()),
            Consistency::LocalQuorum,
        );
        let statement = mapper
            .map(record(vec![
                (Field::Name("code".into()), ExternalValue::Text("FR".into())),
                (
                    Field::Name("population".into()),
                    ExternalValue::Text("68,000,000".into()),
                ),
            ]))
            .unwrap();
        assert_eq!(statement.values[0], Some(CqlValue::Text("FR".into())));
        assert_eq!(statement.values[1], Some(CqlValue::BigInt(68_000_000)));
        assert!(matches!(statement.values[2], Some(CqlValue::Timestamp(_))));
        let meta = statement.record.as_ref().unwrap();
        assert_eq!(meta.position, 7);
    }

    #[test]
    fn codec_failure_becomes_error_record() {
        let mapper = RecordMapper::new(
            template(),
            sources(),
            registry(ConversionContext::default()),
            Consistency::LocalQuorum,
        );
        let error = mapper
            .map(record(vec![
                (Field::Name("code".into()), ExternalValue::Text("FR".into())),
                (
                    Field::Name("population".into()),
                    ExternalValue::Text("not-a-number".into()),
                ),
            ]))
            .unwrap_err();
        assert_eq!(error.position(), 7);
        assert_eq!(error.source(), "raw,line");
        assert!(error.cause().to_string().contains("population"));
    }

    #[test]
    fn extra_field_policy() {
        let strict = RecordMapper::new(
            template(),
            sources(),
            registry(ConversionContext::default()),
            Consistency::LocalQuorum,
        );
        let with_extra = vec![
            (Field::Name("code".into()), ExternalValue::Text("FR".into())),
            (
                Field::Name("population".into()),
                ExternalValue::Text("5".into()),
            ),
            (
                Field::Name("surprise".into()),
                ExternalValue::Text("x".into()),
            ),
        ];
        assert!(strict.map(record(with_extra.clone())).is_err());

        let mut ctx = ConversionContext::default();
        ctx.allow_extra_fields = true;
        let lenient =
            RecordMapper::new(template(), sources(), registry(ctx), Consistency::LocalQuorum);
        assert!(lenient.map(record(with_extra)).is_ok());
    }

    #[test]
    fn missing_field_policy() {
        let only_code = vec![(Field::Name("code".into()), ExternalValue::Text("FR".into()))];
        let strict = RecordMapper::new(
            template(),
            sources(),
            registry(ConversionContext::default()),
            Consistency::LocalQuorum,
        );
        assert!(strict.map(record(only_code.clone())).is_err());

        let mut ctx = ConversionContext::default();
        ctx.allow_missing_fields = true;
        let lenient =
            RecordMapper::new(template(), sources(), registry(ctx), Consistency::LocalQuorum);
        let statement = lenient.map(record(only_code)).unwrap();
        // The missing variable is left unset, not null.
        assert_eq!(statement.values[1], None);
    }

    #[test]
    fn unmapper_builds_records_from_rows() {
        let columns = vec![
            UnloadColumn {
                column: "country_code".into(),
                cql_type: CqlType::Text,
                field: Field::Name("code".into()),
            },
            UnloadColumn {
                column: "n".into(),
                cql_type: CqlType::Int,
                field: Field::Name("n".into()),
            },
        ];
        let unmapper = RowUnmapper::new(
            columns,
            registry(ConversionContext::default()),
            ExternalFormat::Text,
        );
        let row = Row {
            columns: vec![
                ("country_code".into(), CqlValue::Text("FR".into())),
                ("n".into(), CqlValue::Int(12)),
            ],
        };
        let resource: Arc<str> = Arc::from("cql://ks/t");
        let record = unmapper.unmap(&row, &resource, 3).unwrap();
        assert_eq!(record.position(), 3);
        assert_eq!(
            record.value_of(&Field::Name("n".into())),
            Some(&ExternalValue::Text("12".into()))
        );
    }

    #[test]
    fn unmapper_reports_missing_columns() {
        let columns = vec![UnloadColumn {
            column: "absent".into(),
            cql_type: CqlType::Int,
            field: Field::Name("absent".into()),
        }];
        let unmapper = RowUnmapper::new(
            columns,
            registry(ConversionContext::default()),
            ExternalFormat::Text,
        );
        let resource: Arc<str> = Arc::from("cql://ks/t");
        let error = unmapper
            .unmap(&Row { columns: vec![] }, &resource, 1)
            .unwrap_err();
        assert!(error.cause().to_string().contains("absent"));
    }
}
