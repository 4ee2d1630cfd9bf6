pub mod cache;
pub mod metrics;
pub mod resilience;

pub use cache::memory::{MemoryCache, MemoryCacheConfig};

pub use metrics::{Counter, Exposition, Histogram, HistogramTimer, DEFAULT_LATENCY_BUCKETS};

pub use resilience::{
    retry_blocking, Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit, BulkheadSnapshot,
    RetryConfig, RetryPolicy,
};
