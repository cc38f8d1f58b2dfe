//! Wire-driver contract.
//!
//! The engine never talks to a cluster directly; it drives an
//! implementation of [`CqlSession`]. The contract is intentionally narrow:
//! prepare a statement, execute a write, fetch one page of a read, expose
//! table metadata and replica hints. Paging is explicit so the executor can
//! gate every server round-trip on its own permits.

use async_trait::async_trait;
use bytes::Bytes;

use crate::statement::{BoundStatement, Executable, PreparedTemplate};
use crate::result::Row;
use crate::value::CqlType;
use std::sync::Arc;

/// Errors surfaced by a driver implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("write timeout: {0}")]
    WriteTimeout(String),
    #[error("read timeout: {0}")]
    ReadTimeout(String),
    #[error("write failure: {0}")]
    WriteFailure(String),
    #[error("function failure: {0}")]
    FunctionFailure(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("session closed")]
    SessionClosed,
    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// Whether the default driver retry policy may retry a request that
    /// failed with this error. Unavailable and timeout errors are
    /// retryable; write failures, function failures, and query errors
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Unavailable(_)
                | DriverError::WriteTimeout(_)
                | DriverError::ReadTimeout(_)
        )
    }
}

/// Kind of a table column, as reported by schema metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Regular,
}

#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub name: String,
    pub cql_type: CqlType,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub keyspace: String,
    pub table: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn partition_key(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::PartitionKey)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Opaque cursor for resuming a multi-page read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingState(pub Bytes);

/// One page of rows plus the cursor for the next page, if any.
#[derive(Debug, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    pub next: Option<PagingState>,
}

/// The shared database session. Implementations must be internally
/// thread-safe; the engine holds one behind an `Arc` for the whole
/// operation and every operator takes a non-owning handle.
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Prepares a query, returning its template with typed bind variables.
    async fn prepare(&self, query: &str) -> Result<Arc<PreparedTemplate>, DriverError>;

    /// Executes a write (single statement or batch). Driver-level retries,
    /// if any, happen inside this call.
    async fn execute_write(&self, executable: &Executable) -> Result<(), DriverError>;

    /// Fetches one page of a read statement. `state` is `None` for the
    /// first page.
    async fn fetch_page(
        &self,
        statement: &BoundStatement,
        state: Option<PagingState>,
        page_size: usize,
    ) -> Result<Page, DriverError>;

    /// Schema metadata for query synthesis, if the driver knows the table.
    fn table_metadata(&self, keyspace: &str, table: &str) -> Option<TableMetadata>;

    /// A stable identifier of the replica set owning `routing_key`, used
    /// by replica-set batching. `None` when topology is unknown.
    fn replica_set(&self, routing_key: &[u8]) -> Option<u64>;

    /// Closes the session. Must be idempotent.
    async fn close(&self) -> Result<(), DriverError>;
}
