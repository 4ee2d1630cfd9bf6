//! Prometheus metrics for observability

pub mod prometheus;

pub use prometheus::{
    Counter, Exposition, Histogram, HistogramTimer, DEFAULT_LATENCY_BUCKETS,
};
