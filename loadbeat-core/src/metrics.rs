//! Metrics sink shared by every virtual user of a run.
//!
//! The sink is an owned instance (wrapped in `Arc` by the runner) rather than
//! global state, so independent runs in one process never mix samples.
//! Updates are lossless under concurrency: counters and rates are atomics,
//! trends append under the owning DashMap shard lock.

use dashmap::DashMap;
use ::metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Built-in metric names
pub mod names {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const HTTP_SERVER_ERRORS: &str = "http_server_errors";
    pub const HTTP_TRANSPORT_ERRORS: &str = "http_transport_errors";
    pub const HTTP_UNEXPECTED_STATUS: &str = "http_unexpected_status";
    pub const DATA_RECEIVED: &str = "data_received";
    pub const CHECKS: &str = "checks";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_FAILURES: &str = "iteration_failures";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ITERATIONS_INTERRUPTED: &str = "iterations_interrupted";
    pub const SETUP_FAILURES: &str = "setup_failures";
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";
}

/// Kind of a registered metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
    Gauge,
}

#[derive(Debug)]
enum MetricCell {
    Counter(AtomicU64),
    Rate { passes: AtomicU64, total: AtomicU64 },
    Trend(Vec<f64>),
    Gauge { value: AtomicI64, min: AtomicI64, max: AtomicI64 },
}

impl MetricCell {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricCell::Counter(AtomicU64::new(0)),
            MetricKind::Rate => MetricCell::Rate {
                passes: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => MetricCell::Trend(Vec::new()),
            MetricKind::Gauge => MetricCell::Gauge {
                value: AtomicI64::new(0),
                min: AtomicI64::new(i64::MAX),
                max: AtomicI64::new(i64::MIN),
            },
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            MetricCell::Counter(_) => MetricKind::Counter,
            MetricCell::Rate { .. } => MetricKind::Rate,
            MetricCell::Trend(_) => MetricKind::Trend,
            MetricCell::Gauge { .. } => MetricKind::Gauge,
        }
    }
}

#[derive(Debug, Default)]
struct CheckCell {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Pass/fail tally for one named check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

impl CheckTally {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// Aggregated distribution of a trend metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    #[serde(skip)]
    sorted: Vec<f64>,
}

impl TrendStats {
    fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.sort_by(|a, b| a.total_cmp(b));
        let count = samples.len();
        let avg = if count == 0 {
            0.0
        } else {
            samples.iter().sum::<f64>() / count as f64
        };
        let mut stats = Self {
            count,
            avg,
            min: samples.first().copied().unwrap_or(0.0),
            max: samples.last().copied().unwrap_or(0.0),
            med: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
            sorted: samples,
        };
        stats.med = stats.percentile(50.0).unwrap_or(0.0);
        stats.p90 = stats.percentile(90.0).unwrap_or(0.0);
        stats.p95 = stats.percentile(95.0).unwrap_or(0.0);
        stats.p99 = stats.percentile(99.0).unwrap_or(0.0);
        stats
    }

    /// Linearly interpolated percentile, `p` in `[0, 100]`
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.sorted.is_empty() {
            return None;
        }
        let p = p.clamp(0.0, 100.0);
        let rank = p / 100.0 * (self.sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let weight = rank - lower as f64;
        Some(self.sorted[lower] + (self.sorted[upper] - self.sorted[lower]) * weight)
    }
}

/// Final value of one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricValue {
    Counter { count: u64, per_second: f64 },
    Rate { passes: u64, fails: u64, rate: f64 },
    Trend(TrendStats),
    Gauge { value: i64, min: i64, max: i64 },
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter { .. } => MetricKind::Counter,
            MetricValue::Rate { .. } => MetricKind::Rate,
            MetricValue::Trend(_) => MetricKind::Trend,
            MetricValue::Gauge { .. } => MetricKind::Gauge,
        }
    }
}

/// Point-in-time copy of every metric in a sink
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(with = "millis")]
    pub elapsed: Duration,
    pub metrics: BTreeMap<String, MetricValue>,
    pub checks: BTreeMap<String, CheckTally>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn counter(&self, name: &str) -> u64 {
        match self.metrics.get(name) {
            Some(MetricValue::Counter { count, .. }) => *count,
            _ => 0,
        }
    }

    pub fn rate(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name) {
            Some(MetricValue::Rate { rate, .. }) => Some(*rate),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendStats> {
        match self.metrics.get(name) {
            Some(MetricValue::Trend(stats)) => Some(stats),
            _ => None,
        }
    }
}

/// Thread-safe metrics store
#[derive(Debug)]
pub struct MetricsSink {
    cells: DashMap<String, MetricCell>,
    checks: DashMap<String, CheckCell>,
    started: Instant,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
            checks: DashMap::new(),
            started: Instant::now(),
        }
    }

    /// Apply `update` to the cell named `name`, creating it as `kind` on
    /// first use. Updates against a cell of another kind are dropped.
    fn with_cell(&self, name: &str, kind: MetricKind, update: impl FnOnce(&mut MetricCell)) {
        let mut cell = self
            .cells
            .entry(name.to_string())
            .or_insert_with(|| MetricCell::new(kind));
        if cell.kind() != kind {
            warn!(metric = %name, registered = ?cell.kind(), requested = ?kind, "Metric kind mismatch, update dropped");
            return;
        }
        update(&mut cell);
    }

    /// Increment a counter
    pub fn add_counter(&self, name: &str, value: u64) {
        // Fast path under the shard read lock
        if let Some(cell) = self.cells.get(name) {
            if let MetricCell::Counter(c) = cell.value() {
                c.fetch_add(value, Ordering::Relaxed);
                counter!("loadbeat_counter_total", value, "metric" => name.to_string());
                return;
            }
        }
        self.with_cell(name, MetricKind::Counter, |cell| {
            if let MetricCell::Counter(c) = cell {
                c.fetch_add(value, Ordering::Relaxed);
            }
        });
        counter!("loadbeat_counter_total", value, "metric" => name.to_string());
    }

    /// Record one boolean sample into a rate
    pub fn add_rate(&self, name: &str, passed: bool) {
        let record = |cell: &MetricCell| {
            if let MetricCell::Rate { passes, total } = cell {
                if passed {
                    passes.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(1, Ordering::Relaxed);
            }
        };
        // The read guard must be released before `with_cell` takes the shard write lock
        let recorded = match self.cells.get(name) {
            Some(cell) if cell.kind() == MetricKind::Rate => {
                record(cell.value());
                true
            }
            _ => false,
        };
        if !recorded {
            self.with_cell(name, MetricKind::Rate, |cell| record(cell));
        }
        counter!(
            "loadbeat_rate_samples_total",
            1,
            "metric" => name.to_string(),
            "passed" => if passed { "true" } else { "false" }
        );
    }

    /// Record one sample into a trend
    pub fn add_trend(&self, name: &str, value: f64) {
        self.with_cell(name, MetricKind::Trend, |cell| {
            if let MetricCell::Trend(samples) = cell {
                samples.push(value);
            }
        });
        histogram!("loadbeat_trend", value, "metric" => name.to_string());
    }

    /// Set a gauge, tracking its min and max
    pub fn set_gauge(&self, name: &str, value: i64) {
        let record = |cell: &MetricCell| {
            if let MetricCell::Gauge { value: v, min, max } = cell {
                v.store(value, Ordering::Relaxed);
                min.fetch_min(value, Ordering::Relaxed);
                max.fetch_max(value, Ordering::Relaxed);
            }
        };
        let recorded = match self.cells.get(name) {
            Some(cell) if cell.kind() == MetricKind::Gauge => {
                record(cell.value());
                true
            }
            _ => false,
        };
        if !recorded {
            self.with_cell(name, MetricKind::Gauge, |cell| record(cell));
        }
        gauge!("loadbeat_gauge", value as f64, "metric" => name.to_string());
    }

    /// Record the outcome of a named check
    pub fn record_check(&self, name: &str, passed: bool) {
        {
            let tally = self.checks.entry(name.to_string()).or_default();
            if passed {
                tally.passes.fetch_add(1, Ordering::Relaxed);
            } else {
                tally.fails.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.add_rate(names::CHECKS, passed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Aggregate every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);

        let metrics = self
            .cells
            .iter()
            .map(|entry| {
                let value = match entry.value() {
                    MetricCell::Counter(c) => {
                        let count = c.load(Ordering::Relaxed);
                        MetricValue::Counter {
                            count,
                            per_second: count as f64 / secs,
                        }
                    }
                    MetricCell::Rate { passes, total } => {
                        let passes = passes.load(Ordering::Relaxed);
                        let total = total.load(Ordering::Relaxed);
                        MetricValue::Rate {
                            passes,
                            fails: total - passes.min(total),
                            rate: if total == 0 { 0.0 } else { passes as f64 / total as f64 },
                        }
                    }
                    MetricCell::Trend(samples) => MetricValue::Trend(TrendStats::from_samples(samples.clone())),
                    MetricCell::Gauge { value, min, max } => MetricValue::Gauge {
                        value: value.load(Ordering::Relaxed),
                        min: min.load(Ordering::Relaxed),
                        max: max.load(Ordering::Relaxed),
                    },
                };
                (entry.key().clone(), value)
            })
            .collect();

        let checks = self
            .checks
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    CheckTally {
                        passes: entry.value().passes.load(Ordering::Relaxed),
                        fails: entry.value().fails.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            elapsed,
            metrics,
            checks,
        }
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }
}
