//! External and internal value representations.
//!
//! Connectors produce [`ExternalValue`]s; codecs convert them to and from
//! [`CqlValue`]s according to the target [`CqlType`].

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

/// The family of external representations a connector speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalFormat {
    /// Stringly-typed sources (delimited text).
    Text,
    /// Structured sources (line-delimited JSON).
    Json,
}

impl fmt::Display for ExternalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalFormat::Text => f.write_str("text"),
            ExternalFormat::Json => f.write_str("json"),
        }
    }
}

/// One field value as read from (or written to) an external resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalValue {
    Null,
    Text(String),
    Json(serde_json::Value),
}

impl ExternalValue {
    pub fn format(&self) -> ExternalFormat {
        match self {
            ExternalValue::Text(_) => ExternalFormat::Text,
            // A typed null flows through whichever codec the target column
            // selected; treat it as JSON-shaped only when asked.
            ExternalValue::Null | ExternalValue::Json(_) => ExternalFormat::Json,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ExternalValue::Null)
            || matches!(self, ExternalValue::Json(serde_json::Value::Null))
    }
}

impl fmt::Display for ExternalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalValue::Null => f.write_str(""),
            ExternalValue::Text(s) => f.write_str(s),
            ExternalValue::Json(v) => write!(f, "{v}"),
        }
    }
}

/// CQL data types addressable by the codec registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    Ascii,
    Text,
    Varchar,
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Counter,
    Float,
    Double,
    Timestamp,
    Date,
    Time,
    Uuid,
    TimeUuid,
    Blob,
    Inet,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Point,
    LineString,
    Polygon,
}

impl CqlType {
    /// Textual CQL types keep empty external strings as-is; every other
    /// type converts an empty string to null on loading.
    pub fn is_textual(&self) -> bool {
        matches!(self, CqlType::Ascii | CqlType::Text | CqlType::Varchar)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CqlType::TinyInt
                | CqlType::SmallInt
                | CqlType::Int
                | CqlType::BigInt
                | CqlType::Counter
                | CqlType::Float
                | CqlType::Double
        )
    }

    /// Parses the CQL grammar for type names, including nested collections
    /// (`list<int>`, `map<text, bigint>`).
    pub fn parse(raw: &str) -> Option<CqlType> {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        let simple = match lower.as_str() {
            "ascii" => Some(CqlType::Ascii),
            "text" => Some(CqlType::Text),
            "varchar" => Some(CqlType::Varchar),
            "boolean" => Some(CqlType::Boolean),
            "tinyint" => Some(CqlType::TinyInt),
            "smallint" => Some(CqlType::SmallInt),
            "int" => Some(CqlType::Int),
            "bigint" => Some(CqlType::BigInt),
            "counter" => Some(CqlType::Counter),
            "float" => Some(CqlType::Float),
            "double" => Some(CqlType::Double),
            "timestamp" => Some(CqlType::Timestamp),
            "date" => Some(CqlType::Date),
            "time" => Some(CqlType::Time),
            "uuid" => Some(CqlType::Uuid),
            "timeuuid" => Some(CqlType::TimeUuid),
            "blob" => Some(CqlType::Blob),
            "inet" => Some(CqlType::Inet),
            "point" => Some(CqlType::Point),
            "linestring" => Some(CqlType::LineString),
            "polygon" => Some(CqlType::Polygon),
            _ => None,
        };
        if simple.is_some() {
            return simple;
        }
        let (head, args) = lower.split_once('<')?;
        let args = args.strip_suffix('>')?;
        match head.trim() {
            "list" => Some(CqlType::List(Box::new(CqlType::parse(args)?))),
            "set" => Some(CqlType::Set(Box::new(CqlType::parse(args)?))),
            "map" => {
                let (k, v) = split_top_level(args)?;
                Some(CqlType::Map(
                    Box::new(CqlType::parse(k)?),
                    Box::new(CqlType::parse(v)?),
                ))
            }
            _ => None,
        }
    }
}

/// Splits `k, v` at the first comma that is not nested inside `<...>`.
fn split_top_level(args: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((&args[..i], &args[i + 1..])),
            _ => {}
        }
    }
    None
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Ascii => f.write_str("ascii"),
            CqlType::Text => f.write_str("text"),
            CqlType::Varchar => f.write_str("varchar"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::TinyInt => f.write_str("tinyint"),
            CqlType::SmallInt => f.write_str("smallint"),
            CqlType::Int => f.write_str("int"),
            CqlType::BigInt => f.write_str("bigint"),
            CqlType::Counter => f.write_str("counter"),
            CqlType::Float => f.write_str("float"),
            CqlType::Double => f.write_str("double"),
            CqlType::Timestamp => f.write_str("timestamp"),
            CqlType::Date => f.write_str("date"),
            CqlType::Time => f.write_str("time"),
            CqlType::Uuid => f.write_str("uuid"),
            CqlType::TimeUuid => f.write_str("timeuuid"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Inet => f.write_str("inet"),
            CqlType::List(elem) => write!(f, "list<{elem}>"),
            CqlType::Set(elem) => write!(f, "set<{elem}>"),
            CqlType::Map(k, v) => write!(f, "map<{k}, {v}>"),
            CqlType::Point => f.write_str("point"),
            CqlType::LineString => f.write_str("linestring"),
            CqlType::Polygon => f.write_str("polygon"),
        }
    }
}

/// A planar coordinate used by the geospatial types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

/// A typed CQL value as bound to a prepared statement variable or read from
/// a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Ascii(String),
    Text(String),
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Counter(i64),
    Float(f32),
    Double(f64),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    TimeUuid(Uuid),
    Blob(Vec<u8>),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    Polygon(Vec<Vec<Coordinate>>),
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    /// Rough serialized size in bytes, used for batch byte ceilings.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            CqlValue::Null => 0,
            CqlValue::Ascii(s) | CqlValue::Text(s) => s.len(),
            CqlValue::Boolean(_) | CqlValue::TinyInt(_) => 1,
            CqlValue::SmallInt(_) => 2,
            CqlValue::Int(_) | CqlValue::Float(_) | CqlValue::Date(_) => 4,
            CqlValue::BigInt(_)
            | CqlValue::Counter(_)
            | CqlValue::Double(_)
            | CqlValue::Timestamp(_)
            | CqlValue::Time(_) => 8,
            CqlValue::Uuid(_) | CqlValue::TimeUuid(_) => 16,
            CqlValue::Blob(b) => b.len(),
            CqlValue::Inet(IpAddr::V4(_)) => 4,
            CqlValue::Inet(IpAddr::V6(_)) => 16,
            CqlValue::List(items) | CqlValue::Set(items) => {
                items.iter().map(CqlValue::size_in_bytes).sum::<usize>() + 4
            }
            CqlValue::Map(entries) => {
                entries
                    .iter()
                    .map(|(k, v)| k.size_in_bytes() + v.size_in_bytes())
                    .sum::<usize>()
                    + 4
            }
            CqlValue::Point(_) => 16,
            CqlValue::LineString(pts) => pts.len() * 16 + 8,
            CqlValue::Polygon(rings) => {
                rings.iter().map(|r| r.len() * 16 + 8).sum::<usize>() + 8
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_types() {
        assert_eq!(CqlType::parse("text"), Some(CqlType::Text));
        assert_eq!(CqlType::parse("BIGINT"), Some(CqlType::BigInt));
        assert_eq!(CqlType::parse("nope"), None);
    }

    #[test]
    fn parse_nested_collections() {
        assert_eq!(
            CqlType::parse("list<int>"),
            Some(CqlType::List(Box::new(CqlType::Int)))
        );
        assert_eq!(
            CqlType::parse("map<text, list<double>>"),
            Some(CqlType::Map(
                Box::new(CqlType::Text),
                Box::new(CqlType::List(Box::new(CqlType::Double)))
            ))
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let ty = CqlType::Map(
            Box::new(CqlType::Uuid),
            Box::new(CqlType::Set(Box::new(CqlType::Text))),
        );
        assert_eq!(CqlType::parse(&ty.to_string()), Some(ty));
    }

    #[test]
    fn textual_classification() {
        assert!(CqlType::Varchar.is_textual());
        assert!(!CqlType::Int.is_textual());
        assert!(CqlType::Counter.is_numeric());
    }

    #[test]
    fn external_null_detection() {
        assert!(ExternalValue::Null.is_null());
        assert!(ExternalValue::Json(serde_json::Value::Null).is_null());
        assert!(!ExternalValue::Text(String::new()).is_null());
    }
}
