//! Aggregate request metrics for the language processor.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

use nlu_infra::{Exposition, Histogram};

use crate::error::NluError;

/// Snapshot of the processor's request counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Running mean over all requests, in seconds
    pub average_latency: f64,
    pub last_error: Option<String>,
}

/// Owns the metrics aggregate; every update goes through [`Self::record`]
pub struct MetricsRecorder {
    state: Mutex<PerformanceMetrics>,
    latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PerformanceMetrics::default()),
            latency: Histogram::default(),
        }
    }

    /// Record one finished request
    pub fn record(&self, elapsed: Duration, error: Option<&NluError>) {
        let seconds = elapsed.as_secs_f64();
        {
            let mut state = self.state.lock();
            state.total_requests += 1;
            match error {
                None => state.successful_requests += 1,
                Some(err) => {
                    state.failed_requests += 1;
                    state.last_error = Some(format!("{}: {}", err.code(), err));
                }
            }
            let n = state.total_requests as f64;
            state.average_latency += (seconds - state.average_latency) / n;
        }
        self.latency.observe(seconds);
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        self.state.lock().clone()
    }

    /// Zero the counters; the latency histogram is cumulative and kept
    pub fn reset(&self) {
        *self.state.lock() = PerformanceMetrics::default();
    }

    /// Write the counters into a Prometheus document
    pub fn render_into(&self, exposition: &mut Exposition) {
        let snapshot = self.snapshot();
        exposition
            .counter(
                "requests_total",
                "Requests handled by the language processor",
                snapshot.total_requests,
            )
            .counter(
                "requests_successful_total",
                "Requests that produced a validated result",
                snapshot.successful_requests,
            )
            .counter(
                "requests_failed_total",
                "Requests that failed at any stage",
                snapshot.failed_requests,
            )
            .gauge(
                "average_latency_seconds",
                "Running mean request latency",
                snapshot.average_latency,
            )
            .histogram(
                "request_latency_seconds",
                "Processing latency per request",
                &self.latency,
            );
    }
}
