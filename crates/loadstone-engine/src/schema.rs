//! Mapping declarations and query synthesis.
//!
//! A mapping declaration binds record fields to table columns. It accepts
//! a bare `*` (map fields to like-named columns), `field = column`
//! entries with named or indexed fields, quoted literal constants, and
//! the function references `now()` and `uuid()`.

use loadstone_types::driver::TableMetadata;
use loadstone_types::error::WorkflowError;
use loadstone_types::field::Field;
use loadstone_types::value::CqlType;

/// Where one bound variable's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingSource {
    /// A record field.
    Field(Field),
    /// A constant, converted through the column's codec.
    Literal(String),
    /// The statement preparation-time clock.
    Now,
    /// A random version-4 UUID per record.
    RandomUuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub source: MappingSource,
    pub column: String,
}

/// A parsed mapping declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    pub entries: Vec<MappingEntry>,
    pub wildcard: bool,
}

impl Mapping {
    /// Parses `"*"`, `"fieldA = col1, 1 = col2, 'X' = col3, now() = ts"`.
    pub fn parse(raw: &str) -> Result<Mapping, WorkflowError> {
        let mut mapping = Mapping::default();
        for part in split_top_level(raw) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if part == "*" {
                mapping.wildcard = true;
                continue;
            }
            let (lhs, rhs) = part.split_once('=').ok_or_else(|| {
                WorkflowError::Config(format!("mapping entry '{part}' is not 'field = column'"))
            })?;
            let (lhs, rhs) = (lhs.trim(), rhs.trim());
            if rhs.is_empty() {
                return Err(WorkflowError::Config(format!(
                    "mapping entry '{part}' has no column"
                )));
            }
            let source = parse_source(lhs)?;
            mapping.entries.push(MappingEntry {
                source,
                column: rhs.to_string(),
            });
        }
        if mapping.entries.is_empty() && !mapping.wildcard {
            return Err(WorkflowError::Config(format!(
                "mapping '{raw}' maps nothing"
            )));
        }
        Ok(mapping)
    }

    /// The default mapping when none is configured.
    pub fn wildcard() -> Mapping {
        Mapping {
            entries: Vec::new(),
            wildcard: true,
        }
    }
}

fn parse_source(lhs: &str) -> Result<MappingSource, WorkflowError> {
    if lhs.is_empty() {
        return Err(WorkflowError::Config("mapping entry has no field".into()));
    }
    if let Some(literal) = lhs.strip_prefix('\'') {
        let literal = literal.strip_suffix('\'').ok_or_else(|| {
            WorkflowError::Config(format!("unterminated literal in mapping: {lhs}"))
        })?;
        return Ok(MappingSource::Literal(literal.to_string()));
    }
    match lhs {
        "now()" => Ok(MappingSource::Now),
        "uuid()" => Ok(MappingSource::RandomUuid),
        other if other.ends_with("()") => Err(WorkflowError::Config(format!(
            "unknown mapping function: {other}"
        ))),
        other => Ok(MappingSource::Field(Field::parse(other))),
    }
}

/// Splits on commas that are not inside single quotes.
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut quoted = false;
    for (i, c) in raw.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

/// One column an unload emits, with the record field it maps to.
#[derive(Debug, Clone)]
pub struct UnloadColumn {
    pub column: String,
    pub cql_type: CqlType,
    pub field: Field,
}

fn unknown_column(table: &TableMetadata, column: &str) -> WorkflowError {
    WorkflowError::Config(format!(
        "mapped column '{}' does not exist in {}.{}",
        column, table.keyspace, table.table
    ))
}

/// The effective column bindings for a load: `(column, source)` pairs in
/// statement order.
pub fn load_bindings(
    table: &TableMetadata,
    mapping: &Mapping,
) -> Result<Vec<(String, MappingSource)>, WorkflowError> {
    let mut bindings: Vec<(String, MappingSource)> = Vec::new();
    if mapping.wildcard {
        for column in &table.columns {
            bindings.push((
                column.name.clone(),
                MappingSource::Field(Field::Name(column.name.clone())),
            ));
        }
    }
    for entry in &mapping.entries {
        if table.column(&entry.column).is_none() {
            return Err(unknown_column(table, &entry.column));
        }
        match bindings.iter_mut().find(|(c, _)| *c == entry.column) {
            Some(existing) => existing.1 = entry.source.clone(),
            None => bindings.push((entry.column.clone(), entry.source.clone())),
        }
    }
    if bindings.is_empty() {
        return Err(WorkflowError::Config("mapping selects no columns".into()));
    }
    Ok(bindings)
}

/// Synthesizes the INSERT template for a load: the query text plus the
/// per-variable value sources, in bind order.
pub fn build_insert(
    table: &TableMetadata,
    mapping: &Mapping,
) -> Result<(String, Vec<MappingSource>), WorkflowError> {
    let bindings = load_bindings(table, mapping)?;
    let columns: Vec<&str> = bindings.iter().map(|(c, _)| c.as_str()).collect();
    let markers: Vec<String> = columns.iter().map(|c| format!(":{c}")).collect();
    let query = format!(
        "INSERT INTO {}.{} ({}) VALUES ({})",
        table.keyspace,
        table.table,
        columns.join(", "),
        markers.join(", ")
    );
    let sources = bindings.into_iter().map(|(_, s)| s).collect();
    Ok((query, sources))
}

/// Synthesizes the SELECT for an unload, with the columns each output
/// field reads from.
pub fn build_select(
    table: &TableMetadata,
    mapping: &Mapping,
) -> Result<(String, Vec<UnloadColumn>), WorkflowError> {
    let mut columns: Vec<UnloadColumn> = Vec::new();
    if mapping.wildcard {
        for column in &table.columns {
            columns.push(UnloadColumn {
                column: column.name.clone(),
                cql_type: column.cql_type.clone(),
                field: Field::Name(column.name.clone()),
            });
        }
    }
    for entry in &mapping.entries {
        let metadata = table
            .column(&entry.column)
            .ok_or_else(|| unknown_column(table, &entry.column))?;
        let field = match &entry.source {
            MappingSource::Field(field) => field.clone(),
            other => {
                return Err(WorkflowError::Config(format!(
                    "unload mapping cannot use {other:?} as an output field"
                )))
            }
        };
        match columns.iter_mut().find(|c| c.column == entry.column) {
            Some(existing) => existing.field = field,
            None => columns.push(UnloadColumn {
                column: entry.column.clone(),
                cql_type: metadata.cql_type.clone(),
                field,
            }),
        }
    }
    if columns.is_empty() {
        return Err(WorkflowError::Config("mapping selects no columns".into()));
    }
    let names: Vec<&str> = columns.iter().map(|c| c.column.as_str()).collect();
    let query = format!(
        "SELECT {} FROM {}.{}",
        names.join(", "),
        table.keyspace,
        table.table
    );
    Ok((query, columns))
}

/// Synthesizes the SELECT for a count: partition-key columns only.
pub fn build_count(table: &TableMetadata) -> Result<String, WorkflowError> {
    let keys: Vec<&str> = table.partition_key().map(|c| c.name.as_str()).collect();
    if keys.is_empty() {
        return Err(WorkflowError::Config(format!(
            "{}.{} has no partition key",
            table.keyspace, table.table
        )));
    }
    Ok(format!(
        "SELECT {} FROM {}.{}",
        keys.join(", "),
        table.keyspace,
        table.table
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadstone_types::testing::sample_table;

    #[test]
    fn parses_named_indexed_literal_and_functions() {
        let mapping = Mapping::parse(
            "code = country_code, 1 = country_name, 'X' = beginning_ip_address, now() = ending_ip_address",
        )
        .unwrap();
        assert_eq!(mapping.entries.len(), 4);
        assert_eq!(
            mapping.entries[0].source,
            MappingSource::Field(Field::Name("code".into()))
        );
        assert_eq!(
            mapping.entries[1].source,
            MappingSource::Field(Field::Index(1))
        );
        assert_eq!(
            mapping.entries[2].source,
            MappingSource::Literal("X".into())
        );
        assert_eq!(mapping.entries[3].source, MappingSource::Now);
    }

    #[test]
    fn literal_commas_do_not_split_entries() {
        let mapping = Mapping::parse("'a,b' = country_code").unwrap();
        assert_eq!(
            mapping.entries[0].source,
            MappingSource::Literal("a,b".into())
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(Mapping::parse("justafield").is_err());
        assert!(Mapping::parse("x = ").is_err());
        assert!(Mapping::parse("avg() = col").is_err());
        assert!(Mapping::parse("").is_err());
    }

    #[test]
    fn wildcard_insert_covers_all_columns() {
        let table = sample_table("ks", "ip_by_country");
        let (query, sources) = build_insert(&table, &Mapping::wildcard()).unwrap();
        assert!(query.starts_with("INSERT INTO ks.ip_by_country (country_code"));
        assert_eq!(sources.len(), table.columns.len());
    }

    #[test]
    fn explicit_entry_overrides_wildcard_binding() {
        let table = sample_table("ks", "ip_by_country");
        let mapping = Mapping::parse("*, now() = country_name").unwrap();
        let (_, sources) = build_insert(&table, &mapping).unwrap();
        assert_eq!(sources[1], MappingSource::Now);
        assert_eq!(sources.len(), table.columns.len());
    }

    #[test]
    fn unknown_column_is_config_error() {
        let table = sample_table("ks", "ip_by_country");
        let mapping = Mapping::parse("f = no_such_column").unwrap();
        assert!(matches!(
            build_insert(&table, &mapping),
            Err(WorkflowError::Config(_))
        ));
    }

    #[test]
    fn select_maps_columns_to_output_fields() {
        let table = sample_table("ks", "ip_by_country");
        let mapping = Mapping::parse("code = country_code, name = country_name").unwrap();
        let (query, columns) = build_select(&table, &mapping).unwrap();
        assert_eq!(
            query,
            "SELECT country_code, country_name FROM ks.ip_by_country"
        );
        assert_eq!(columns[0].field, Field::Name("code".into()));
    }

    #[test]
    fn count_selects_partition_key() {
        let table = sample_table("ks", "ip_by_country");
        assert_eq!(
            build_count(&table).unwrap(),
            "SELECT country_code FROM ks.ip_by_country"
        );
    }
}
