//! Rate-limited, concurrency-bounded statement execution.
//!
//! [`executor::BulkExecutor`] turns streams of bound statements into
//! streams of results while holding three invariants: never more than the
//! configured number of outstanding driver requests, never more than the
//! configured number of user-visible queries, and never more than the
//! configured requests per second.

pub mod executor;
pub mod limiter;

pub use executor::{BulkExecutor, ExecutorConfig};
pub use limiter::RateLimiter;
