//! Resilience patterns
//!
//! Admission control for bounded concurrency and retry policies for
//! transient failures.

pub mod bulkhead;
pub mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit, BulkheadSnapshot};
pub use retry::{retry_blocking, RetryConfig, RetryPolicy};
