//! Workflow drivers: LOAD, UNLOAD, and COUNT.

mod count;
mod load;
mod unload;

pub use count::{CountReport, CountWorkflow};
pub use load::LoadWorkflow;
pub use unload::UnloadWorkflow;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use loadstone_codecs::CodecRegistry;
use loadstone_connectors::{csv_connector::CsvConnector, json_connector::JsonConnector};
use loadstone_connectors::{Connector, FileSystemOpener};
use loadstone_executor::{BulkExecutor, ExecutorConfig};
use loadstone_types::driver::{CqlSession, TableMetadata};
use loadstone_types::error::{ErrorThreshold, WorkflowError};
use loadstone_types::statement::Consistency;

use crate::batcher::{BatchMode, BatcherConfig};
use crate::execution::ExecutionId;
use crate::logmgr::{LogConfig, LogManager};
use crate::schema::Mapping;
use crate::settings::{ConnectorName, Settings};

/// Lifecycle of a workflow. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Created,
    Initialized,
    Executing,
    CompletedOk,
    CompletedWithErrors,
    Aborted,
    Interrupted,
    Crashed,
    Closed,
}

/// How a finished run is reported to the user (and mapped to an exit
/// code by the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Ok,
    CompletedWithErrors,
    AbortedTooManyErrors,
    AbortedFatalError,
    Interrupted,
    Crashed,
}

impl WorkflowOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            WorkflowOutcome::Ok => 0,
            WorkflowOutcome::CompletedWithErrors => 1,
            WorkflowOutcome::AbortedTooManyErrors => 2,
            WorkflowOutcome::AbortedFatalError => 3,
            WorkflowOutcome::Interrupted => 4,
            WorkflowOutcome::Crashed => 5,
        }
    }
}

/// A composed pipeline for one operation.
///
/// `close` is idempotent and safe from any state; the runner also calls
/// it after cancelling `execute`.
#[async_trait]
pub trait Workflow: Send {
    /// The execution id, used in user-facing messages.
    fn id(&self) -> &str;

    async fn init(&mut self) -> Result<(), WorkflowError>;

    /// Runs the pipeline to completion. `Ok(true)` means the operation
    /// completed (recorded per-record failures, if any, are in the
    /// bad-record files); `Ok(false)` flags a completion that must be
    /// reported as completed-with-errors.
    async fn execute(&mut self) -> Result<bool, WorkflowError>;

    async fn close(&mut self);
}

/// Tracks state transitions behind a mutex so `close` can race
/// `execute` safely.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<Mutex<WorkflowState>>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(WorkflowState::Created)))
    }

    pub fn set(&self, state: WorkflowState) {
        let mut guard = self.0.lock().expect("workflow state");
        if *guard != WorkflowState::Closed {
            *guard = state;
        }
    }

    /// Returns `false` when already closed.
    pub fn close(&self) -> bool {
        let mut guard = self.0.lock().expect("workflow state");
        if *guard == WorkflowState::Closed {
            false
        } else {
            *guard = WorkflowState::Closed;
            true
        }
    }
}

/// Everything the three workflows share: session, connector, registry,
/// executor, log manager, and the resolved schema objects.
pub(crate) struct WorkflowParts {
    pub execution_id: ExecutionId,
    pub session: Arc<dyn CqlSession>,
    pub connector: Box<dyn Connector>,
    pub registry: Arc<CodecRegistry>,
    pub executor: BulkExecutor,
    pub log: Arc<LogManager>,
    pub table: TableMetadata,
    pub mapping: Mapping,
    pub consistency: Consistency,
    pub batcher_config: BatcherConfig,
    pub dry_run: bool,
}

pub(crate) fn build_connector(settings: &Settings) -> Box<dyn Connector> {
    let opener = Arc::new(FileSystemOpener);
    match settings.connector.name {
        ConnectorName::Csv => Box::new(CsvConnector::new(opener)),
        ConnectorName::Json => Box::new(JsonConnector::new(opener)),
    }
}

impl WorkflowParts {
    /// Resolves settings into the shared pipeline parts. `fail_fast`
    /// selects the executor mode; load and unload run fail-safe so
    /// per-record failures are captured instead of terminating.
    pub async fn assemble(
        operation: &str,
        settings: &Settings,
        session: Arc<dyn CqlSession>,
        fail_fast: bool,
    ) -> Result<WorkflowParts, WorkflowError> {
        let execution_id = match &settings.engine.execution_id {
            Some(template) => ExecutionId::from_template(template, operation)?,
            None => ExecutionId::new(operation),
        };
        let directory = execution_id.directory(&settings.log_directory())?;

        let log = Arc::new(
            LogManager::new(LogConfig {
                directory: directory.clone(),
                max_errors: ErrorThreshold::parse(&settings.log.max_errors)
                    .map_err(WorkflowError::Config)?,
                max_held_positions: settings.log.max_held_positions,
                stack_trace_depth: settings.log.stack_trace_depth,
                frame_filter_prefixes: settings.log.frame_filter_prefixes.clone(),
            })
            .map_err(|e| WorkflowError::Config(format!("cannot open log directory: {e}")))?,
        );

        let keyspace = settings
            .schema
            .keyspace
            .as_deref()
            .ok_or_else(|| WorkflowError::Config("schema.keyspace is required".into()))?;
        let table_name = settings
            .schema
            .table
            .as_deref()
            .ok_or_else(|| WorkflowError::Config("schema.table is required".into()))?;
        let table = session.table_metadata(keyspace, table_name).ok_or_else(|| {
            WorkflowError::Config(format!("unknown table: {keyspace}.{table_name}"))
        })?;

        let mapping = match settings.schema.mapping.as_deref() {
            Some(raw) => Mapping::parse(raw)?,
            None => Mapping::wildcard(),
        };

        let consistency: Consistency = settings
            .driver
            .consistency
            .parse()
            .map_err(WorkflowError::Config)?;

        let executor = BulkExecutor::new(
            Arc::clone(&session),
            ExecutorConfig {
                fail_fast,
                max_in_flight_requests: settings.executor.max_in_flight_requests,
                max_in_flight_queries: settings.executor.max_in_flight_queries,
                max_requests_per_second: settings.executor.max_requests_per_second,
                continuous_paging: settings.executor.continuous_paging,
                page_size: settings.driver.page_size,
                result_buffer: 1_024,
            },
        );

        let batcher_config = BatcherConfig {
            mode: BatchMode::parse(&settings.batch.mode).map_err(WorkflowError::Config)?,
            max_batch_statements: settings.batch.max_batch_statements,
            max_size_in_bytes: settings.batch.max_size_in_bytes,
        };

        let mut connector = build_connector(settings);
        // COUNT never touches the connector; leave it unconfigured so a
        // count does not demand connector settings.
        if operation != "count" {
            connector
                .configure(settings.connector_subtree(), operation == "load")
                .map_err(|e| WorkflowError::Config(format!("{e:#}")))?;
        }

        tracing::info!(
            execution_id = %execution_id,
            directory = %directory.display(),
            "workflow assembled"
        );

        Ok(WorkflowParts {
            execution_id,
            session,
            connector,
            registry: Arc::new(CodecRegistry::new(
                settings.codec.conversion_context()?,
            )),
            executor,
            log,
            table,
            mapping,
            consistency,
            batcher_config,
            dry_run: settings.engine.dry_run,
        })
    }

    /// Emits the end-of-run summary and returns the completion flag.
    ///
    /// A run that drains without crossing the error ceiling completes
    /// successfully even when individual records failed; those failures
    /// live in the execution directory's bad-record files.
    pub fn finish(&self, operation: &str) -> Result<bool, WorkflowError> {
        if let Err(error) = self.log.close() {
            return Err(WorkflowError::Fatal(anyhow::anyhow!(
                "cannot flush log files: {error}"
            )));
        }
        let errors = self.log.error_count();
        let total = self.log.total_count();
        if self.log.max_errors().exceeded(errors, total) {
            return Err(WorkflowError::TooManyErrors {
                errors,
                threshold: self.log.max_errors(),
            });
        }
        if errors > 0 {
            tracing::warn!(
                operation,
                errors,
                total,
                files = ?self.log.written_files(),
                "completed with recorded failures"
            );
        } else {
            tracing::info!(operation, total, "completed");
        }
        Ok(true)
    }

    pub async fn shutdown(&mut self) {
        if let Err(error) = self.connector.close().await {
            tracing::warn!(%error, "connector close failed");
        }
        if let Err(error) = self.log.close() {
            tracing::warn!(%error, "log close failed");
        }
        if let Err(error) = self.session.close().await {
            tracing::warn!(%error, "session close failed");
        }
    }
}
