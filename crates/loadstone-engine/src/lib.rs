//! The workflow execution engine.
//!
//! Composes connectors, the codec registry, the batching engine, the bulk
//! executor, and the log manager into the LOAD, UNLOAD, and COUNT
//! workflows. Settings come in as a hierarchical tree of dotted keys; the
//! execution directory collects bad-record files and the final summary.

pub mod batcher;
pub mod conversion;
pub mod execution;
pub mod logmgr;
pub mod mapper;
pub mod schema;
pub mod settings;
pub mod workflow;

pub use settings::Settings;
pub use workflow::{CountWorkflow, LoadWorkflow, UnloadWorkflow, Workflow, WorkflowOutcome};
