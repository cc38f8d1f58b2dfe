//! Prepared templates, bound statements, and batches.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::record::RecordMeta;
use crate::value::{CqlType, CqlValue};

/// One bind variable of a prepared template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundVariable {
    pub name: String,
    pub cql_type: CqlType,
}

/// A prepared CQL statement: the query text, its bind variables in wire
/// order, and which of them form the partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTemplate {
    pub query: String,
    pub variables: Vec<BoundVariable>,
    pub partition_key_indices: Vec<usize>,
}

impl PreparedTemplate {
    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }
}

/// Write/read consistency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalOne,
    #[default]
    LocalQuorum,
    EachQuorum,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
        };
        f.write_str(s)
    }
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            other => Err(format!("unknown consistency level: {other}")),
        }
    }
}

/// A prepared template with values bound, ready for execution.
///
/// `values[i] == None` means the variable is deliberately unset (missing
/// field with `allow_missing_fields`); the driver must not bind it.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub template: Arc<PreparedTemplate>,
    pub values: Vec<Option<CqlValue>>,
    pub consistency: Consistency,
    pub record: Option<RecordMeta>,
}

impl BoundStatement {
    pub fn new(template: Arc<PreparedTemplate>, values: Vec<Option<CqlValue>>) -> Self {
        Self {
            template,
            values,
            consistency: Consistency::default(),
            record: None,
        }
    }

    pub fn with_record(mut self, meta: RecordMeta) -> Self {
        self.record = Some(meta);
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// The routing key: the canonical concatenation of the serialized
    /// partition-key values, `None` when any of them is unset or null.
    pub fn routing_key(&self) -> Option<Bytes> {
        let indices = &self.template.partition_key_indices;
        if indices.is_empty() {
            return None;
        }
        let mut buf = BytesMut::new();
        for &idx in indices {
            let value = self.values.get(idx)?.as_ref()?;
            if value.is_null() {
                return None;
            }
            let piece = encode_routing_component(value);
            buf.put_u16(piece.len() as u16);
            buf.extend_from_slice(&piece);
            buf.put_u8(0);
        }
        Some(buf.freeze())
    }

    /// The token the batcher groups by, derived from the routing key.
    pub fn routing_token(&self) -> Option<i64> {
        self.routing_key().map(|key| fnv1a64(&key) as i64)
    }

    /// Rough serialized size, used against batch byte ceilings.
    pub fn size_in_bytes(&self) -> usize {
        self.template.query.len()
            + self
                .values
                .iter()
                .flatten()
                .map(CqlValue::size_in_bytes)
                .sum::<usize>()
    }
}

fn encode_routing_component(value: &CqlValue) -> Vec<u8> {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => s.as_bytes().to_vec(),
        CqlValue::Boolean(b) => vec![u8::from(*b)],
        CqlValue::TinyInt(v) => v.to_be_bytes().to_vec(),
        CqlValue::SmallInt(v) => v.to_be_bytes().to_vec(),
        CqlValue::Int(v) => v.to_be_bytes().to_vec(),
        CqlValue::BigInt(v) | CqlValue::Counter(v) => v.to_be_bytes().to_vec(),
        CqlValue::Float(v) => v.to_be_bytes().to_vec(),
        CqlValue::Double(v) => v.to_be_bytes().to_vec(),
        CqlValue::Timestamp(ts) => ts.timestamp_millis().to_be_bytes().to_vec(),
        CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => u.as_bytes().to_vec(),
        CqlValue::Blob(b) => b.clone(),
        other => format!("{other:?}").into_bytes(),
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// An ordered group of statements sharing a routing token (partition mode)
/// or a replica set (replica mode).
#[derive(Debug, Clone)]
pub struct Batch {
    pub statements: Vec<BoundStatement>,
    pub routing_token: Option<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.statements
            .iter()
            .map(BoundStatement::size_in_bytes)
            .sum()
    }
}

/// What the bulk executor's write path accepts: a lone statement or a
/// batch assembled by the batching engine.
#[derive(Debug, Clone)]
pub enum Executable {
    Statement(BoundStatement),
    Batch(Batch),
}

impl Executable {
    /// Number of user statements inside (1 for a single statement).
    pub fn statement_count(&self) -> usize {
        match self {
            Executable::Statement(_) => 1,
            Executable::Batch(b) => b.len(),
        }
    }

    /// Record back-references of every statement inside.
    pub fn records(&self) -> Vec<&RecordMeta> {
        match self {
            Executable::Statement(s) => s.record.iter().collect(),
            Executable::Batch(b) => b.statements.iter().filter_map(|s| s.record.as_ref()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CqlType;

    fn template() -> Arc<PreparedTemplate> {
        Arc::new(PreparedTemplate {
            query: "INSERT INTO ks.t (pk, v) VALUES (:pk, :v)".into(),
            variables: vec![
                BoundVariable {
                    name: "pk".into(),
                    cql_type: CqlType::Text,
                },
                BoundVariable {
                    name: "v".into(),
                    cql_type: CqlType::Int,
                },
            ],
            partition_key_indices: vec![0],
        })
    }

    #[test]
    fn routing_key_stable_for_equal_partition_keys() {
        let a = BoundStatement::new(
            template(),
            vec![Some(CqlValue::Text("FR".into())), Some(CqlValue::Int(1))],
        );
        let b = BoundStatement::new(
            template(),
            vec![Some(CqlValue::Text("FR".into())), Some(CqlValue::Int(2))],
        );
        assert_eq!(a.routing_key(), b.routing_key());
        assert_eq!(a.routing_token(), b.routing_token());
        assert!(a.routing_token().is_some());
    }

    #[test]
    fn routing_key_absent_when_pk_unset_or_null() {
        let unset = BoundStatement::new(template(), vec![None, Some(CqlValue::Int(1))]);
        assert_eq!(unset.routing_key(), None);

        let null = BoundStatement::new(
            template(),
            vec![Some(CqlValue::Null), Some(CqlValue::Int(1))],
        );
        assert_eq!(null.routing_token(), None);
    }

    #[test]
    fn distinct_partition_keys_get_distinct_tokens() {
        let a = BoundStatement::new(
            template(),
            vec![Some(CqlValue::Text("FR".into())), Some(CqlValue::Int(1))],
        );
        let b = BoundStatement::new(
            template(),
            vec![Some(CqlValue::Text("US".into())), Some(CqlValue::Int(1))],
        );
        assert_ne!(a.routing_token(), b.routing_token());
    }

    #[test]
    fn consistency_parses_case_insensitively() {
        assert_eq!(
            "local_quorum".parse::<Consistency>().unwrap(),
            Consistency::LocalQuorum
        );
        assert!("nope".parse::<Consistency>().is_err());
    }
}
