//! Drives one workflow to a process exit code.

use std::sync::Arc;
use std::time::Duration;

use loadstone_engine::workflow::{
    CountWorkflow, LoadWorkflow, UnloadWorkflow, Workflow, WorkflowOutcome,
};
use loadstone_engine::Settings;
use loadstone_types::driver::CqlSession;
use loadstone_types::error::WorkflowError;
use loadstone_types::testing::StubSession;

/// How long a cancelled workflow gets to release its resources before
/// the run is marked crashed.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Unload,
    Count,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Load => "load",
            Operation::Unload => "unload",
            Operation::Count => "count",
        }
    }
}

/// Opens the shared driver session for `settings.driver.hosts`.
///
/// The wire driver is an external collaborator; the binary ships with
/// the in-memory `stub` session so pipelines can be exercised without a
/// cluster (dry runs, tests).
fn connect(settings: &Settings) -> Result<Arc<dyn CqlSession>, WorkflowError> {
    if settings.driver.hosts.iter().any(|h| h == "stub") {
        return Ok(Arc::new(StubSession::new()));
    }
    Err(WorkflowError::Config(format!(
        "no driver implementation available for hosts {:?}; \
         a CqlSession for real clusters plugs in behind the driver contract",
        settings.driver.hosts
    )))
}

pub async fn run(operation: Operation, settings: Settings) -> WorkflowOutcome {
    let session = match connect(&settings) {
        Ok(session) => session,
        Err(error) => {
            tracing::error!("{error}");
            return WorkflowOutcome::AbortedFatalError;
        }
    };
    let workflow: Box<dyn Workflow> = match operation {
        Operation::Load => Box::new(LoadWorkflow::new(settings, session)),
        Operation::Unload => Box::new(UnloadWorkflow::new(settings, session)),
        Operation::Count => Box::new(CountWorkflow::new(settings, session)),
    };
    run_workflow(workflow).await
}

/// Runs init/execute/close with cooperative interruption: on SIGINT the
/// execute future is cancelled and close gets a 10-second grace period.
pub async fn run_workflow(mut workflow: Box<dyn Workflow>) -> WorkflowOutcome {
    if let Err(error) = workflow.init().await {
        let outcome = report_error(workflow.id(), &error);
        workflow.close().await;
        return outcome;
    }

    let outcome = tokio::select! {
        result = workflow.execute() => match result {
            Ok(true) => WorkflowOutcome::Ok,
            Ok(false) => WorkflowOutcome::CompletedWithErrors,
            Err(error) => report_error(workflow.id(), &error),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::error!("{} interrupted, waiting for termination.", workflow.id());
            WorkflowOutcome::Interrupted
        }
    };

    match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, workflow.close()).await {
        Ok(()) => outcome,
        Err(_) => {
            tracing::error!(
                "{} did not terminate within {} seconds, forcing termination.",
                workflow.id(),
                SHUTDOWN_GRACE_PERIOD.as_secs()
            );
            WorkflowOutcome::Crashed
        }
    }
}

fn report_error(id: &str, error: &WorkflowError) -> WorkflowOutcome {
    match error {
        WorkflowError::TooManyErrors { errors, threshold } => {
            tracing::error!(
                "{id} aborted: too many errors ({errors} failures, threshold: {threshold})"
            );
            WorkflowOutcome::AbortedTooManyErrors
        }
        WorkflowError::Interrupted => WorkflowOutcome::Interrupted,
        WorkflowError::Config(message) => {
            tracing::error!("{id} failed: {message}");
            WorkflowOutcome::AbortedFatalError
        }
        WorkflowError::Fatal(cause) => {
            tracing::error!("{id} failed: {cause:#}");
            WorkflowOutcome::AbortedFatalError
        }
    }
}
