//! Core data model shared by every loadstone crate.
//!
//! Records flow out of connectors, through the mapper and batcher, into the
//! bulk executor, and their outcomes flow back through [`result`] types to
//! the log manager. The wire driver is abstracted behind the
//! [`driver::CqlSession`] contract; [`testing`] ships a primable in-memory
//! implementation used by the integration tests.

pub mod driver;
pub mod error;
pub mod field;
pub mod record;
pub mod result;
pub mod statement;
pub mod testing;
pub mod value;

pub use error::{CodecError, MappingError, WorkflowError};
pub use field::Field;
pub use record::{DataRecord, ErrorRecord, Record};
pub use result::{BulkExecutionError, ReadResult, Row, WriteResult};
pub use statement::{Batch, BoundStatement, Consistency, Executable, PreparedTemplate};
pub use value::{CqlType, CqlValue, ExternalFormat, ExternalValue};
