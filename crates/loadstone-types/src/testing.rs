//! A primable in-memory [`CqlSession`] for integration tests.
//!
//! Mirrors how the engine is tested against a mock server: tests register
//! table metadata, prime rows for reads and failures for writes, run a
//! workflow, then assert on the recorded queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::driver::{
    ColumnKind, CqlSession, DriverError, Page, PagingState, TableMetadata,
};
use crate::result::Row;
use crate::statement::{BoundStatement, BoundVariable, Executable, PreparedTemplate};
use crate::value::CqlValue;

/// A primed write failure: every attempt of a statement binding
/// `variable` to `value` fails with `error`.
#[derive(Debug, Clone)]
pub struct PrimedFailure {
    pub variable: String,
    pub value: CqlValue,
    pub error: DriverError,
}

#[derive(Default)]
struct Recorder {
    queries: Vec<String>,
    write_statements: u64,
}

/// In-memory session. Writes succeed unless a primed failure matches;
/// reads serve primed rows page by page. Every server round-trip (each
/// write attempt, each page fetch) is recorded as one query.
pub struct StubSession {
    tables: HashMap<(String, String), TableMetadata>,
    primed_rows: Mutex<HashMap<String, Vec<Row>>>,
    primed_failures: Mutex<Vec<PrimedFailure>>,
    recorder: Mutex<Recorder>,
    /// Retries per request for retryable errors, mimicking the default
    /// driver retry policy.
    max_retries: u32,
    /// Artificial latency per write, for concurrency tests.
    write_delay: Option<std::time::Duration>,
    in_flight: AtomicU64,
    max_observed_in_flight: AtomicU64,
    closed: AtomicBool,
}

impl StubSession {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            primed_rows: Mutex::new(HashMap::new()),
            primed_failures: Mutex::new(Vec::new()),
            recorder: Mutex::new(Recorder::default()),
            max_retries: 0,
            write_delay: None,
            in_flight: AtomicU64::new(0),
            max_observed_in_flight: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_table(mut self, metadata: TableMetadata) -> Self {
        self.tables.insert(
            (metadata.keyspace.clone(), metadata.table.clone()),
            metadata,
        );
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_write_delay(mut self, delay: std::time::Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Primes rows returned by any read whose query starts with
    /// `query_prefix`.
    pub fn prime_rows(&self, query_prefix: &str, rows: Vec<Row>) {
        self.primed_rows
            .lock()
            .unwrap()
            .insert(query_prefix.to_string(), rows);
    }

    pub fn prime_failure(&self, failure: PrimedFailure) {
        self.primed_failures.lock().unwrap().push(failure);
    }

    /// Queries observed by the server, one entry per round-trip.
    pub fn recorded_queries(&self) -> Vec<String> {
        self.recorder.lock().unwrap().queries.clone()
    }

    pub fn recorded_query_count(&self, prefix: &str) -> usize {
        self.recorder
            .lock()
            .unwrap()
            .queries
            .iter()
            .filter(|q| q.starts_with(prefix))
            .count()
    }

    /// Total user statements written (batch members counted singly).
    pub fn write_statement_count(&self) -> u64 {
        self.recorder.lock().unwrap().write_statements
    }

    /// High-water mark of concurrent in-flight requests.
    pub fn max_in_flight_seen(&self) -> u64 {
        self.max_observed_in_flight.load(Ordering::Relaxed)
    }

    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::Relaxed) {
            Err(DriverError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn record_query(&self, query: &str, statements: u64) {
        let mut rec = self.recorder.lock().unwrap();
        rec.queries.push(query.to_string());
        rec.write_statements += statements;
    }

    /// First primed failure matching any bound value of `statement`.
    fn matching_failure(&self, statement: &BoundStatement) -> Option<DriverError> {
        let primed = self.primed_failures.lock().unwrap();
        for failure in primed.iter() {
            let idx = match statement.template.variable_index(&failure.variable) {
                Some(idx) => idx,
                None => continue,
            };
            if statement.values.get(idx).and_then(Option::as_ref) == Some(&failure.value) {
                return Some(failure.error.clone());
            }
        }
        None
    }

    fn try_write_once(&self, executable: &Executable, first_attempt: bool) -> Result<(), DriverError> {
        let (query, count) = match executable {
            Executable::Statement(s) => (s.template.query.clone(), 1),
            Executable::Batch(b) => (
                b.statements
                    .first()
                    .map(|s| s.template.query.clone())
                    .unwrap_or_default(),
                b.len() as u64,
            ),
        };
        // Retries re-record the query round-trip but not the statements.
        self.record_query(&query, if first_attempt { count } else { 0 });
        let failure = match executable {
            Executable::Statement(s) => self.matching_failure(s),
            Executable::Batch(b) => b.statements.iter().find_map(|s| self.matching_failure(s)),
        };
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn table_for_query(&self, query: &str) -> Option<&TableMetadata> {
        self.tables
            .values()
            .find(|t| query.contains(&format!("{}.{}", t.keyspace, t.table)))
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed_in_flight
            .fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for StubSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CqlSession for StubSession {
    async fn prepare(&self, query: &str) -> Result<Arc<PreparedTemplate>, DriverError> {
        self.check_open()?;
        let metadata = self
            .table_for_query(query)
            .ok_or_else(|| DriverError::InvalidQuery(format!("unknown table in: {query}")))?;

        // Bind markers appear as `:name`, in wire order.
        let mut variables = Vec::new();
        let mut rest = query;
        while let Some(pos) = rest.find(':') {
            rest = &rest[pos + 1..];
            let end = rest
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(rest.len());
            let name = &rest[..end];
            if name.is_empty() {
                continue;
            }
            let column = metadata.column(name).ok_or_else(|| {
                DriverError::InvalidQuery(format!("unknown column '{name}' in: {query}"))
            })?;
            variables.push(BoundVariable {
                name: name.to_string(),
                cql_type: column.cql_type.clone(),
            });
            rest = &rest[end..];
        }

        let partition_key_indices = variables
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                metadata
                    .column(&v.name)
                    .map(|c| c.kind == ColumnKind::PartitionKey)
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();

        Ok(Arc::new(PreparedTemplate {
            query: query.to_string(),
            variables,
            partition_key_indices,
        }))
    }

    async fn execute_write(&self, executable: &Executable) -> Result<(), DriverError> {
        self.check_open()?;
        self.enter();
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let mut attempt = 0;
        let result = loop {
            match self.try_write_once(executable, attempt == 0) {
                Ok(()) => break Ok(()),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %err, "stub session retrying write");
                }
                Err(err) => break Err(err),
            }
        };
        self.exit();
        result
    }

    async fn fetch_page(
        &self,
        statement: &BoundStatement,
        state: Option<PagingState>,
        page_size: usize,
    ) -> Result<Page, DriverError> {
        self.check_open()?;
        self.enter();
        self.record_query(&statement.template.query, 0);

        let offset = match &state {
            Some(PagingState(bytes)) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                usize::from_be_bytes(buf)
            }
            None => 0,
        };

        let rows = self.primed_rows.lock().unwrap();
        let all = rows
            .iter()
            .find(|(prefix, _)| statement.template.query.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        drop(rows);

        let end = (offset + page_size.max(1)).min(all.len());
        let next = if end < all.len() {
            Some(PagingState(Bytes::copy_from_slice(&end.to_be_bytes())))
        } else {
            None
        };
        self.exit();
        Ok(Page {
            rows: all[offset..end].to_vec(),
            next,
        })
    }

    fn table_metadata(&self, keyspace: &str, table: &str) -> Option<TableMetadata> {
        self.tables
            .get(&(keyspace.to_string(), table.to_string()))
            .cloned()
    }

    fn replica_set(&self, routing_key: &[u8]) -> Option<u64> {
        // Three fake replica sets, assigned round-robin by key hash.
        let hash: u64 = routing_key.iter().map(|b| u64::from(*b)).sum();
        Some(hash % 3)
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Builds the metadata used by most tests: a text partition key and a few
/// regular columns.
pub fn sample_table(keyspace: &str, table: &str) -> TableMetadata {
    use crate::driver::ColumnMetadata;
    use crate::value::CqlType;
    TableMetadata {
        keyspace: keyspace.to_string(),
        table: table.to_string(),
        columns: vec![
            ColumnMetadata {
                name: "country_code".into(),
                cql_type: CqlType::Text,
                kind: ColumnKind::PartitionKey,
            },
            ColumnMetadata {
                name: "country_name".into(),
                cql_type: CqlType::Text,
                kind: ColumnKind::Regular,
            },
            ColumnMetadata {
                name: "beginning_ip_address".into(),
                cql_type: CqlType::Inet,
                kind: ColumnKind::Regular,
            },
            ColumnMetadata {
                name: "ending_ip_address".into(),
                cql_type: CqlType::Inet,
                kind: ColumnKind::Regular,
            },
            ColumnMetadata {
                name: "beginning_ip_number".into(),
                cql_type: CqlType::BigInt,
                kind: ColumnKind::Regular,
            },
            ColumnMetadata {
                name: "ending_ip_number".into(),
                cql_type: CqlType::BigInt,
                kind: ColumnKind::Regular,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CqlType;

    fn session() -> StubSession {
        StubSession::new().with_table(sample_table("ks", "ip_by_country"))
    }

    #[tokio::test]
    async fn prepare_resolves_variables_and_partition_key() {
        let session = session();
        let template = session
            .prepare(
                "INSERT INTO ks.ip_by_country (country_code, country_name) \
                 VALUES (:country_code, :country_name)",
            )
            .await
            .unwrap();
        assert_eq!(template.variables.len(), 2);
        assert_eq!(template.variables[0].cql_type, CqlType::Text);
        assert_eq!(template.partition_key_indices, vec![0]);
    }

    #[tokio::test]
    async fn primed_failure_matches_bound_value() {
        let session = session().with_max_retries(0);
        let template = session
            .prepare("INSERT INTO ks.ip_by_country (country_code) VALUES (:country_code)")
            .await
            .unwrap();
        session.prime_failure(PrimedFailure {
            variable: "country_code".into(),
            value: CqlValue::Text("XX".into()),
            error: DriverError::WriteTimeout("primed".into()),
        });

        let bad = Executable::Statement(BoundStatement::new(
            Arc::clone(&template),
            vec![Some(CqlValue::Text("XX".into()))],
        ));
        let good = Executable::Statement(BoundStatement::new(
            template,
            vec![Some(CqlValue::Text("FR".into()))],
        ));
        assert!(session.execute_write(&bad).await.is_err());
        assert!(session.execute_write(&good).await.is_ok());
        assert_eq!(session.recorded_queries().len(), 2);
    }

    #[tokio::test]
    async fn retry_policy_retries_only_retryable_kinds() {
        let session = session().with_max_retries(1);
        let template = session
            .prepare("INSERT INTO ks.ip_by_country (country_code) VALUES (:country_code)")
            .await
            .unwrap();
        session.prime_failure(PrimedFailure {
            variable: "country_code".into(),
            value: CqlValue::Text("XX".into()),
            error: DriverError::Unavailable("primed".into()),
        });
        session.prime_failure(PrimedFailure {
            variable: "country_code".into(),
            value: CqlValue::Text("YY".into()),
            error: DriverError::WriteFailure("primed".into()),
        });

        // Unavailable is retried once; the prime is unconditional so the
        // retry fails too. Two round-trips, terminal failure.
        let retryable = Executable::Statement(BoundStatement::new(
            Arc::clone(&template),
            vec![Some(CqlValue::Text("XX".into()))],
        ));
        assert!(session.execute_write(&retryable).await.is_err());
        assert_eq!(session.recorded_queries().len(), 2);

        // WriteFailure is not retryable: a single round-trip.
        let non_retryable = Executable::Statement(BoundStatement::new(
            template,
            vec![Some(CqlValue::Text("YY".into()))],
        ));
        assert!(session.execute_write(&non_retryable).await.is_err());
        assert_eq!(session.recorded_queries().len(), 3);
    }

    #[tokio::test]
    async fn paged_reads_resume_from_state() {
        let session = session();
        let template = session
            .prepare("SELECT country_code FROM ks.ip_by_country WHERE country_code = :country_code")
            .await
            .unwrap();
        let rows: Vec<Row> = (0..5)
            .map(|i| Row {
                columns: vec![("country_code".into(), CqlValue::Int(i))],
            })
            .collect();
        session.prime_rows("SELECT", rows);

        let stmt = BoundStatement::new(template, vec![Some(CqlValue::Text("FR".into()))]);
        let first = session.fetch_page(&stmt, None, 2).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        let second = session
            .fetch_page(&stmt, first.next.clone(), 2)
            .await
            .unwrap();
        assert_eq!(second.rows.len(), 2);
        let third = session.fetch_page(&stmt, second.next.clone(), 2).await.unwrap();
        assert_eq!(third.rows.len(), 1);
        assert!(third.next.is_none());
    }

    #[tokio::test]
    async fn close_makes_session_unusable() {
        let session = session();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(matches!(
            session.prepare("SELECT * FROM ks.ip_by_country").await,
            Err(DriverError::SessionClosed)
        ));
    }
}
