//! Record field identifiers.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one field of a record: positional for headerless sources,
/// named for sources that carry a header or keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    /// Zero-based column index.
    Index(usize),
    /// Non-empty field name.
    Name(String),
}

impl Field {
    /// Parses a mapping-side field reference: bare digits are an index,
    /// anything else a name.
    pub fn parse(raw: &str) -> Field {
        match raw.parse::<usize>() {
            Ok(idx) => Field::Index(idx),
            Err(_) => Field::Name(raw.to_string()),
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Field::Name(name) => Some(name),
            Field::Index(_) => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Index(idx) => write!(f, "{idx}"),
            Field::Name(name) => f.write_str(name),
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Indexed fields order numerically and sort before named fields; named
/// fields fall back to lexicographic order (callers that care about header
/// order keep fields in a `Vec`).
impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Field::Index(a), Field::Index(b)) => a.cmp(b),
            (Field::Name(a), Field::Name(b)) => a.cmp(b),
            (Field::Index(_), Field::Name(_)) => Ordering::Less,
            (Field::Name(_), Field::Index(_)) => Ordering::Greater,
        }
    }
}
