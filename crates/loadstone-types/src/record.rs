//! Records as produced by connectors and consumed by the mapper.

use std::fmt;
use std::sync::Arc;

use crate::field::Field;
use crate::value::ExternalValue;

/// A positional row of fields read from one external resource.
///
/// `resource` is memoized: connectors compute it once per file handle and
/// clone the `Arc` into every record they emit, so the URI is stable for
/// the whole operation.
#[derive(Debug, Clone)]
pub struct DataRecord {
    resource: Arc<str>,
    position: u64,
    source: String,
    fields: Vec<(Field, ExternalValue)>,
}

impl DataRecord {
    /// Panics if `position` is zero; positions are 1-based.
    pub fn new(
        resource: Arc<str>,
        position: u64,
        source: String,
        fields: Vec<(Field, ExternalValue)>,
    ) -> Self {
        assert!(position >= 1, "record positions are 1-based");
        Self {
            resource,
            position,
            source,
            fields,
        }
    }

    pub fn resource(&self) -> &Arc<str> {
        &self.resource
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// The opaque original representation (for bad-record files).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fields(&self) -> &[(Field, ExternalValue)] {
        &self.fields
    }

    pub fn value_of(&self, field: &Field) -> Option<&ExternalValue> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Identity triple used for back-references from statements.
    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            resource: Arc::clone(&self.resource),
            position: self.position,
            source: self.source.clone(),
        }
    }
}

/// A record that failed before mapping could produce a statement. Carries
/// no fields, only the failure cause and enough identity to log it.
#[derive(Debug)]
pub struct ErrorRecord {
    resource: Arc<str>,
    position: u64,
    source: String,
    cause: anyhow::Error,
}

impl ErrorRecord {
    pub fn new(resource: Arc<str>, position: u64, source: String, cause: anyhow::Error) -> Self {
        assert!(position >= 1, "record positions are 1-based");
        Self {
            resource,
            position,
            source,
            cause,
        }
    }

    pub fn resource(&self) -> &Arc<str> {
        &self.resource
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

/// What flows through the pipeline channels between connector and mapper.
#[derive(Debug)]
pub enum Record {
    Data(DataRecord),
    Error(ErrorRecord),
}

impl Record {
    pub fn resource(&self) -> &Arc<str> {
        match self {
            Record::Data(r) => r.resource(),
            Record::Error(r) => r.resource(),
        }
    }

    pub fn position(&self) -> u64 {
        match self {
            Record::Data(r) => r.position(),
            Record::Error(r) => r.position(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Record::Data(r) => r.source(),
            Record::Error(r) => r.source(),
        }
    }
}

/// Lightweight identity of the record a statement was mapped from, kept on
/// the statement for error attribution only.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub resource: Arc<str>,
    pub position: u64,
    pub source: String,
}

impl fmt::Display for RecordMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.position)
    }
}
