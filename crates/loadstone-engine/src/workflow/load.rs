//! LOAD: connector records → mapper → batcher → executor writes → log.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use loadstone_types::driver::CqlSession;
use loadstone_types::error::WorkflowError;
use loadstone_types::record::Record;
use loadstone_types::statement::Executable;

use crate::batcher::Batcher;
use crate::logmgr::{FailureKind, LogManager};
use crate::mapper::RecordMapper;
use crate::schema;
use crate::settings::Settings;
use crate::workflow::{StateCell, Workflow, WorkflowParts, WorkflowState};

/// Capacity of the mapper→executor statement channel.
const STATEMENT_CHANNEL_CAPACITY: usize = 1_024;

pub struct LoadWorkflow {
    settings: Settings,
    session: Arc<dyn CqlSession>,
    state: StateCell,
    parts: Option<WorkflowParts>,
    mapper: Option<Arc<RecordMapper>>,
}

impl LoadWorkflow {
    pub fn new(settings: Settings, session: Arc<dyn CqlSession>) -> Self {
        Self {
            settings,
            session,
            state: StateCell::new(),
            parts: None,
            mapper: None,
        }
    }
}

#[async_trait]
impl Workflow for LoadWorkflow {
    fn id(&self) -> &str {
        self.parts
            .as_ref()
            .map(|p| p.execution_id.as_str())
            .unwrap_or("LOAD")
    }

    async fn init(&mut self) -> Result<(), WorkflowError> {
        let mut parts =
            WorkflowParts::assemble("load", &self.settings, Arc::clone(&self.session), false)
                .await?;

        let (query, sources) = schema::build_insert(&parts.table, &parts.mapping)?;
        let template = parts
            .session
            .prepare(&query)
            .await
            .map_err(|e| WorkflowError::Config(format!("cannot prepare insert: {e}")))?;
        self.mapper = Some(Arc::new(RecordMapper::new(
            template,
            sources,
            Arc::clone(&parts.registry),
            parts.consistency,
        )));

        parts
            .connector
            .init()
            .await
            .map_err(|e| WorkflowError::Config(format!("{e:#}")))?;

        self.parts = Some(parts);
        self.state.set(WorkflowState::Initialized);
        Ok(())
    }

    async fn execute(&mut self) -> Result<bool, WorkflowError> {
        let parts = self
            .parts
            .as_mut()
            .ok_or_else(|| WorkflowError::Config("workflow not initialized".into()))?;
        let mapper = Arc::clone(self.mapper.as_ref().expect("initialized with parts"));
        self.state.set(WorkflowState::Executing);

        let records = parts
            .connector
            .read()
            .map_err(|e| WorkflowError::Fatal(anyhow::anyhow!("{e:#}")))?;

        let (statement_tx, statement_rx) =
            mpsc::channel::<Executable>(STATEMENT_CHANNEL_CAPACITY);
        let map_task = spawn_map_stage(
            records,
            statement_tx,
            mapper,
            Batcher::new(parts.batcher_config.clone()),
            Arc::clone(&parts.log),
            Arc::clone(&parts.session),
        );

        if parts.dry_run {
            // Dry run: mapped and batched, never dispatched.
            let mut statement_rx = statement_rx;
            let mut statements = 0u64;
            while let Some(executable) = statement_rx.recv().await {
                for meta in executable.records() {
                    parts.log.record_success(meta);
                }
                statements += executable.statement_count() as u64;
            }
            tracing::info!(statements, "dry run: no statements executed");
        } else {
            let mut results = parts.executor.write_stream(statement_rx);
            while let Some(result) = results.recv().await {
                match result.error {
                    None => {
                        for meta in result.statement.records() {
                            parts.log.record_success(meta);
                        }
                    }
                    Some(error) => {
                        let cause = anyhow::Error::new(error.cause);
                        tracing::debug!(error = %parts.log.sanitize(&cause), "write failed");
                        for meta in result.statement.records() {
                            parts
                                .log
                                .record_failed_statement(FailureKind::Load, meta, &cause);
                        }
                    }
                }
            }
        }

        map_task
            .await
            .map_err(|e| WorkflowError::Fatal(anyhow::anyhow!("mapper stage panicked: {e}")))?;

        let completed = parts.finish("load");
        self.state.set(match &completed {
            Ok(_) if parts.log.error_count() > 0 => WorkflowState::CompletedWithErrors,
            Ok(_) => WorkflowState::CompletedOk,
            Err(_) => WorkflowState::Aborted,
        });
        completed
    }

    async fn close(&mut self) {
        if !self.state.close() {
            return;
        }
        if let Some(parts) = self.parts.as_mut() {
            parts.shutdown().await;
        }
    }
}

/// The map+batch operator: a single task owning the batcher, so bucket
/// state is never shared across threads.
fn spawn_map_stage(
    mut records: mpsc::Receiver<Record>,
    statement_tx: mpsc::Sender<Executable>,
    mapper: Arc<RecordMapper>,
    mut batcher: Batcher,
    log: Arc<LogManager>,
    session: Arc<dyn CqlSession>,
) -> tokio::task::JoinHandle<()> {
    let mut abort = log.abort_signal();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = abort.changed() => {
                    if changed.is_err() || *abort.borrow() {
                        tracing::debug!("map stage cancelled by error ceiling");
                        return;
                    }
                }
                maybe = records.recv() => {
                    let record = match maybe {
                        Some(record) => record,
                        None => break,
                    };
                    match record {
                        Record::Error(error) => {
                            log.record_failure(FailureKind::Connector, &error);
                        }
                        Record::Data(data) => match mapper.map(data) {
                            Ok(statement) => {
                                let replica = statement
                                    .routing_key()
                                    .and_then(|key| session.replica_set(&key));
                                for executable in batcher.add(statement, replica) {
                                    if statement_tx.send(executable).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(error) => {
                                log.record_failure(FailureKind::Mapping, &error);
                            }
                        },
                    }
                }
            }
        }
        for executable in batcher.finish() {
            if statement_tx.send(executable).await.is_err() {
                return;
            }
        }
    })
}
