//! External record sources and sinks.
//!
//! A [`Connector`] is configured from its settings subtree, initialized,
//! then asked for a record stream (loading) or a record sink (unloading).
//! Resource URIs are stable for the whole operation; per-resource record
//! order follows file order.

pub mod csv_connector;
pub mod json_connector;
pub mod opener;

use async_trait::async_trait;
use tokio::sync::mpsc;

use loadstone_types::record::{DataRecord, Record};

pub use opener::{FileSystemOpener, ResourceOpener};

/// Capacity of the channels connectors emit records into; the pipeline's
/// connector-side demand window.
pub const RECORD_CHANNEL_CAPACITY: usize = 1_024;

/// A sink of records produced by an unload.
#[async_trait]
pub trait RecordSink: Send {
    async fn send(&mut self, record: DataRecord) -> anyhow::Result<()>;

    /// Flushes buffered output and releases the resource. Idempotent.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// A bulk record source/sink over one external format.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Validates and applies the connector's settings subtree. `read` is
    /// `true` when the connector will be used as a source.
    fn configure(&mut self, settings: &serde_json::Value, read: bool) -> anyhow::Result<()>;

    /// Acquires resources (enumerates input files, creates output
    /// directories). Must be called after `configure`.
    async fn init(&mut self) -> anyhow::Result<()>;

    /// Begins reading and returns the record stream. Emits
    /// [`Record::Error`] for rows that cannot be decoded.
    fn read(&self) -> anyhow::Result<mpsc::Receiver<Record>>;

    /// Opens the record sink for writing.
    fn write(&self) -> anyhow::Result<Box<dyn RecordSink>>;

    /// Releases all resources. Idempotent.
    async fn close(&mut self) -> anyhow::Result<()>;
}
