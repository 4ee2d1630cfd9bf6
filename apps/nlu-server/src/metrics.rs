//! HTTP request counters.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use nlu_infra::{Counter, Exposition, Histogram};

pub const HTTP_METRICS_PREFIX: &str = "http";

pub struct HttpMetrics {
    requests: Counter,
    errors: Counter,
    latency: Histogram,
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self {
            requests: Counter::new(),
            errors: Counter::new(),
            latency: Histogram::default(),
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn errors(&self) -> u64 {
        self.errors.get()
    }

    pub fn render(&self) -> String {
        let mut exposition = Exposition::new(HTTP_METRICS_PREFIX);
        exposition
            .counter("requests_total", "HTTP requests served", self.requests.get())
            .counter(
                "errors_total",
                "HTTP responses with a 4xx or 5xx status",
                self.errors.get(),
            )
            .histogram(
                "request_duration_seconds",
                "HTTP request latency",
                &self.latency,
            );
        exposition.finish()
    }
}

/// Count every request and time it end to end
pub async fn track(
    State(metrics): State<Arc<HttpMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let timer = metrics.latency.start_timer();
    let response = next.run(request).await;
    drop(timer);

    metrics.requests.inc();
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        metrics.errors.inc();
    }
    response
}
