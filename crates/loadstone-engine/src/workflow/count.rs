//! COUNT: executor reads → aggregation → final printer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use loadstone_types::driver::CqlSession;
use loadstone_types::error::WorkflowError;
use loadstone_types::statement::BoundStatement;
use loadstone_types::value::CqlValue;

use crate::schema;
use crate::settings::Settings;
use crate::workflow::{StateCell, Workflow, WorkflowParts, WorkflowState};

/// What the aggregator produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountReport {
    pub total_rows: u64,
    /// `(partition key rendering, rows)`, largest partitions first.
    /// Empty unless the `partitions` mode is enabled.
    pub partitions: Vec<(String, u64)>,
}

impl CountReport {
    fn render(&self, partitions_enabled: bool) -> String {
        let mut out = format!("{}", self.total_rows);
        if partitions_enabled {
            for (key, rows) in &self.partitions {
                out.push_str(&format!("\n{key} {rows}"));
            }
        }
        out
    }
}

pub struct CountWorkflow {
    settings: Settings,
    session: Arc<dyn CqlSession>,
    state: StateCell,
    parts: Option<WorkflowParts>,
    statement: Option<BoundStatement>,
    report: Option<CountReport>,
}

impl CountWorkflow {
    pub fn new(settings: Settings, session: Arc<dyn CqlSession>) -> Self {
        Self {
            settings,
            session,
            state: StateCell::new(),
            parts: None,
            statement: None,
            report: None,
        }
    }

    /// The aggregation result, available after `execute`.
    pub fn report(&self) -> Option<&CountReport> {
        self.report.as_ref()
    }

    fn partitions_enabled(&self) -> bool {
        self.settings
            .stats
            .modes
            .iter()
            .any(|m| m.eq_ignore_ascii_case("partitions"))
    }
}

#[async_trait]
impl Workflow for CountWorkflow {
    fn id(&self) -> &str {
        self.parts
            .as_ref()
            .map(|p| p.execution_id.as_str())
            .unwrap_or("COUNT")
    }

    async fn init(&mut self) -> Result<(), WorkflowError> {
        // COUNT is fail-fast: a failed read aborts rather than
        // undercounting silently.
        let parts =
            WorkflowParts::assemble("count", &self.settings, Arc::clone(&self.session), true)
                .await?;

        let query = schema::build_count(&parts.table)?;
        let template = parts
            .session
            .prepare(&query)
            .await
            .map_err(|e| WorkflowError::Config(format!("cannot prepare count select: {e}")))?;
        self.statement = Some(
            BoundStatement::new(template, Vec::new()).with_consistency(parts.consistency),
        );

        self.parts = Some(parts);
        self.state.set(WorkflowState::Initialized);
        Ok(())
    }

    async fn execute(&mut self) -> Result<bool, WorkflowError> {
        let partitions_enabled = self.partitions_enabled();
        let parts = self
            .parts
            .as_mut()
            .ok_or_else(|| WorkflowError::Config("workflow not initialized".into()))?;
        let statement = self.statement.clone().expect("initialized with parts");
        self.state.set(WorkflowState::Executing);

        let key_columns: Vec<String> = parts
            .table
            .partition_key()
            .map(|c| c.name.clone())
            .collect();

        let mut results = parts.executor.read_stream(statement);
        let mut total = 0u64;
        let mut per_partition: HashMap<String, u64> = HashMap::new();
        while let Some(result) = results.recv().await {
            if let Some(error) = result.error {
                return Err(WorkflowError::Fatal(anyhow::anyhow!(
                    "count query failed: {}",
                    error.cause
                )));
            }
            let row = match result.row {
                Some(row) => row,
                None => continue,
            };
            total += 1;
            if partitions_enabled {
                let key = key_columns
                    .iter()
                    .map(|c| render_key(row.get(c)))
                    .collect::<Vec<_>>()
                    .join("|");
                *per_partition.entry(key).or_insert(0) += 1;
            }
        }

        let mut partitions: Vec<(String, u64)> = per_partition.into_iter().collect();
        partitions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        partitions.truncate(self.settings.stats.num_partitions);

        let report = CountReport {
            total_rows: total,
            partitions,
        };
        // The final printer: the count goes to standard output.
        println!("{}", report.render(partitions_enabled));
        tracing::info!(rows = report.total_rows, "count completed");
        self.report = Some(report);

        let completed = parts.finish("count");
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

fn render_key(value: Option<&CqlValue>) -> String {
    match value {
        Some(CqlValue::Text(s)) | Some(CqlValue::Ascii(s)) => s.clone(),
        Some(other) => format!("{other:?}"),
        None => String::new(),
    }
}
