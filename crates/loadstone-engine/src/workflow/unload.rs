//! UNLOAD: executor reads → inverse mapper → connector sink → log.

use std::sync::Arc;

use async_trait::async_trait;

use loadstone_types::driver::CqlSession;
use loadstone_types::error::WorkflowError;
use loadstone_types::record::RecordMeta;
use loadstone_types::statement::BoundStatement;
use loadstone_types::value::ExternalFormat;

use crate::logmgr::FailureKind;
use crate::mapper::RowUnmapper;
use crate::schema;
use crate::settings::{ConnectorName, Settings};
use crate::workflow::{StateCell, Workflow, WorkflowParts, WorkflowState};

pub struct UnloadWorkflow {
    settings: Settings,
    session: Arc<dyn CqlSession>,
    state: StateCell,
    parts: Option<WorkflowParts>,
    unmapper: Option<RowUnmapper>,
    statement: Option<BoundStatement>,
}

impl UnloadWorkflow {
    pub fn new(settings: Settings, session: Arc<dyn CqlSession>) -> Self {
        Self {
            settings,
            session,
            state: StateCell::new(),
            parts: None,
            unmapper: None,
            statement: None,
        }
    }
}

#[async_trait]
impl Workflow for UnloadWorkflow {
    fn id(&self) -> &str {
        self.parts
            .as_ref()
            .map(|p| p.execution_id.as_str())
            .unwrap_or("UNLOAD")
    }

    async fn init(&mut self) -> Result<(), WorkflowError> {
        let mut parts =
            WorkflowParts::assemble("unload", &self.settings, Arc::clone(&self.session), false)
                .await?;

        let (query, columns) = schema::build_select(&parts.table, &parts.mapping)?;
        let template = parts
            .session
            .prepare(&query)
            .await
            .map_err(|e| WorkflowError::Config(format!("cannot prepare select: {e}")))?;
        let format = match self.settings.connector.name {
            ConnectorName::Csv => ExternalFormat::Text,
            ConnectorName::Json => ExternalFormat::Json,
        };
        self.unmapper = Some(RowUnmapper::new(
            columns,
            Arc::clone(&parts.registry),
            format,
        ));
        self.statement = Some(
            BoundStatement::new(template, Vec::new()).with_consistency(parts.consistency),
        );

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
        let unmapper = self.unmapper.as_ref().expect("initialized with parts");
        let statement = self.statement.clone().expect("initialized with parts");
        self.state.set(WorkflowState::Executing);

        let resource: Arc<str> = Arc::from(format!(
            "cql://{}/{}",
            parts.table.keyspace, parts.table.table
        ));
        let mut sink = parts
            .connector
            .write()
            .map_err(|e| WorkflowError::Fatal(anyhow::anyhow!("{e:#}")))?;

        let mut results = parts.executor.read_stream(statement);
        let mut abort = parts.log.abort_signal();
        let mut position = 0u64;
        loop {
            let result = tokio::select! {
                biased;
                changed = abort.changed() => {
                    if changed.is_err() || *abort.borrow() {
                        break;
                    }
                    continue;
                }
                maybe = results.recv() => match maybe {
                    Some(result) => result,
                    None => break,
                },
            };
            position += 1;
            match (&result.row, &result.error) {
                (Some(row), None) => match unmapper.unmap(row, &resource, position) {
                    Ok(record) => {
                        let meta = record.meta();
                        match sink.send(record).await {
                            Ok(()) => parts.log.record_success(&meta),
                            Err(error) => {
                                // A broken sink is fatal: the output file
                                // itself failed, not one record.
                                let _ = sink.close().await;
                                return Err(WorkflowError::Fatal(error));
                            }
                        }
                    }
                    Err(error) => {
                        parts.log.record_failure(FailureKind::Mapping, &error);
                    }
                },
                (_, Some(error)) => {
                    let meta = RecordMeta {
                        resource: Arc::clone(&resource),
                        position,
                        source: String::new(),
                    };
                    let cause = anyhow::Error::new(error.cause.clone());
                    tracing::debug!(error = %parts.log.sanitize(&cause), "read failed");
                    parts
                        .log
                        .record_failed_statement(FailureKind::Unload, &meta, &cause);
                }
                (None, None) => {}
            }
        }

        sink.close()
            .await
            .map_err(WorkflowError::Fatal)?;

        let completed = parts.finish("unload");
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
