//! Execution outcomes emitted by the bulk executor.

use std::fmt;
use std::sync::Arc;

use crate::driver::DriverError;
use crate::statement::{BoundStatement, Executable};
use crate::value::CqlValue;

/// One row of a read result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<(String, CqlValue)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A driver failure tied to the statement that provoked it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("statement execution failed: {cause}")]
pub struct BulkExecutionError {
    #[source]
    pub cause: DriverError,
    pub statement: Executable,
}

/// Outcome of one write (a statement or a whole batch). Exactly one is
/// emitted per executable submitted.
#[derive(Debug)]
pub struct WriteResult {
    pub statement: Executable,
    pub error: Option<BulkExecutionError>,
}

impl WriteResult {
    pub fn success(statement: Executable) -> Self {
        Self {
            statement,
            error: None,
        }
    }

    pub fn failure(statement: Executable, cause: DriverError) -> Self {
        let error = BulkExecutionError {
            cause,
            statement: statement.clone(),
        };
        Self {
            statement,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome item of one read: a row, or (in fail-safe mode) the terminal
/// error of the query that produced no further rows.
#[derive(Debug)]
pub struct ReadResult {
    pub statement: Arc<BoundStatement>,
    pub row: Option<Row>,
    pub error: Option<BulkExecutionError>,
}

impl ReadResult {
    pub fn row(statement: Arc<BoundStatement>, row: Row) -> Self {
        Self {
            statement,
            row: Some(row),
            error: None,
        }
    }

    pub fn failure(statement: Arc<BoundStatement>, cause: DriverError) -> Self {
        let error = BulkExecutionError {
            cause,
            statement: Executable::Statement((*statement).clone()),
        };
        Self {
            statement,
            row: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for WriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => f.write_str("ok"),
            Some(err) => write!(f, "failed: {}", err.cause),
        }
    }
}

impl fmt::Display for ReadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => f.write_str("ok"),
            Some(err) => write!(f, "failed: {}", err.cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::PreparedTemplate;

    fn executable() -> Executable {
        Executable::Statement(BoundStatement::new(
            Arc::new(PreparedTemplate {
                query: "INSERT INTO ks.t (pk) VALUES (:pk)".into(),
                variables: vec![],
                partition_key_indices: vec![],
            }),
            vec![],
        ))
    }

    #[test]
    fn success_iff_no_error() {
        assert!(WriteResult::success(executable()).is_success());
        let failed = WriteResult::failure(
            executable(),
            DriverError::Unavailable("not enough replicas".into()),
        );
        assert!(!failed.is_success());
        assert!(failed.error.is_some());
    }

    #[test]
    fn read_failure_carries_no_row() {
        let stmt = match executable() {
            Executable::Statement(s) => Arc::new(s),
            Executable::Batch(_) => unreachable!(),
        };
        let result = ReadResult::failure(stmt, DriverError::ReadTimeout("timed out".into()));
        assert!(!result.is_success());
        assert!(result.row.is_none());
    }
}
