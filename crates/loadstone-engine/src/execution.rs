//! Per-run execution identifiers and the execution directory.

use std::path::{Path, PathBuf};

use chrono::Utc;

use loadstone_types::error::WorkflowError;

/// Identifies one run; names the `{log_root}/{execution_id}/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// The default id: `{OPERATION}_{yyyyMMdd_HHmmss}_{6 hex}`.
    pub fn new(operation: &str) -> ExecutionId {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let uniquifier = uuid::Uuid::new_v4().simple().to_string();
        ExecutionId(format!(
            "{}_{timestamp}_{}",
            operation.to_ascii_uppercase(),
            &uniquifier[..6]
        ))
    }

    /// Renders a user template. Recognized substitutions: `{operation}`,
    /// `{timestamp}`, `{hostname}`; anything else in braces is rejected.
    pub fn from_template(template: &str, operation: &str) -> Result<ExecutionId, WorkflowError> {
        let rendered = template
            .replace("{operation}", &operation.to_ascii_uppercase())
            .replace("{timestamp}", &Utc::now().format("%Y%m%d_%H%M%S").to_string())
            .replace(
                "{hostname}",
                &whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string()),
            );
        if rendered.contains('{') || rendered.contains('}') {
            return Err(WorkflowError::Config(format!(
                "unrecognized substitution in execution id template: {template}"
            )));
        }
        if rendered.is_empty() {
            return Err(WorkflowError::Config(
                "execution id template rendered empty".to_string(),
            ));
        }
        Ok(ExecutionId(rendered))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The execution directory under `log_root`, created on first use.
    pub fn directory(&self, log_root: &Path) -> Result<PathBuf, WorkflowError> {
        let dir = log_root.join(&self.0);
        std::fs::create_dir_all(&dir).map_err(|e| {
            WorkflowError::Config(format!("cannot create execution directory {}: {e}", dir.display()))
        })?;
        Ok(dir)
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
