//! Prometheus metric primitives
//!
//! Lock-free counters and histograms plus a writer for the
//! Prometheus text exposition format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Latency buckets in seconds
pub const DEFAULT_LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram metric
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_BUCKETS.to_vec())
    }
}

impl Histogram {
    /// Create a new histogram with the given upper bounds
    pub fn new(mut buckets: Vec<f64>) -> Self {
        buckets.retain(|b| b.is_finite());
        buckets.sort_by(|a, b| a.total_cmp(b));
        buckets.dedup();

        // One extra slot for observations above the last bound
        let bucket_counts = (0..buckets.len() + 1).map(|_| AtomicU64::new(0)).collect();

        Self {
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .buckets
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.buckets.len());

        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);

        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });

        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Start a timer that observes elapsed seconds when dropped
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Cumulative counts per upper bound, excluding `+Inf`
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, &bound)| {
                cumulative += self.bucket_counts[i].load(Ordering::Relaxed);
                (bound, cumulative)
            })
            .collect()
    }
}

/// Timer for histogram observations
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Builder for a text exposition document.
///
/// Every metric name is written as `{prefix}_{name}`.
#[derive(Debug)]
pub struct Exposition {
    prefix: String,
    output: String,
}

impl Exposition {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            output: String::new(),
        }
    }

    fn header(&mut self, name: &str, help: &str, kind: &str) {
        let _ = writeln!(self.output, "# HELP {}_{} {}", self.prefix, name, help);
        let _ = writeln!(self.output, "# TYPE {}_{} {}", self.prefix, name, kind);
    }

    pub fn counter(&mut self, name: &str, help: &str, value: u64) -> &mut Self {
        self.header(name, help, "counter");
        let _ = writeln!(self.output, "{}_{} {}", self.prefix, name, value);
        self
    }

    pub fn gauge(&mut self, name: &str, help: &str, value: f64) -> &mut Self {
        self.header(name, help, "gauge");
        let _ = writeln!(self.output, "{}_{} {}", self.prefix, name, value);
        self
    }

    pub fn histogram(&mut self, name: &str, help: &str, histogram: &Histogram) -> &mut Self {
        self.header(name, help, "histogram");
        for (bound, cumulative) in histogram.cumulative_buckets() {
            let _ = writeln!(
                self.output,
                "{}_{}_bucket{{le=\"{}\"}} {}",
                self.prefix, name, bound, cumulative
            );
        }
        let _ = writeln!(
            self.output,
            "{}_{}_bucket{{le=\"+Inf\"}} {}",
            self.prefix,
            name,
            histogram.get_count()
        );
        let _ = writeln!(self.output, "{}_{}_sum {}", self.prefix, name, histogram.get_sum());
        let _ = writeln!(self.output, "{}_{}_count {}", self.prefix, name, histogram.get_count());
        self
    }

    pub fn finish(self) -> String {
        self.output
    }
}
