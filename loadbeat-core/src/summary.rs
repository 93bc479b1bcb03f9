//! End-of-run summary and exit code.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::metrics::{names, MetricValue, MetricsSnapshot};
use crate::threshold::ThresholdOutcome;

/// All thresholds passed
pub const EXIT_OK: i32 = 0;
/// Setup or configuration error
pub const EXIT_SETUP_FAILED: i32 = 1;
/// At least one threshold failed
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub journey: String,
    pub profile: String,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub vus_max: u32,
    pub iterations: u64,
    pub iteration_failures: u64,
    pub iterations_interrupted: u64,
    /// Setup error message, when setup failed
    pub setup_error: Option<String>,
    /// Stopped early by an `abort_on_fail` threshold
    pub aborted: bool,
    /// Stopped early by an external signal
    pub stopped: bool,
    pub thresholds: Vec<ThresholdOutcome>,
    pub metrics: MetricsSnapshot,
}

impl RunSummary {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn passed(&self) -> bool {
        self.setup_error.is_none() && self.thresholds_passed()
    }

    pub fn exit_code(&self) -> i32 {
        if self.setup_error.is_some() {
            EXIT_SETUP_FAILED
        } else if !self.thresholds_passed() {
            EXIT_THRESHOLDS_FAILED
        } else {
            EXIT_OK
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "journey: {}  profile: {}", self.journey, self.profile)?;
        writeln!(
            f,
            "duration: {:.1}s  vus_max: {}  iterations: {} ({} failed, {} interrupted)",
            self.duration.as_secs_f64(),
            self.vus_max,
            self.iterations,
            self.iteration_failures,
            self.iterations_interrupted
        )?;
        if let Some(err) = &self.setup_error {
            writeln!(f, "setup failed: {err}")?;
        }
        if self.aborted {
            writeln!(f, "run aborted by threshold")?;
        } else if self.stopped {
            writeln!(f, "run stopped early")?;
        }

        if !self.metrics.checks.is_empty() {
            writeln!(f)?;
            for (name, tally) in &self.metrics.checks {
                let mark = if tally.fails == 0 { '✓' } else { '✗' };
                writeln!(f, "  {mark} {name}  ({} passed, {} failed)", tally.passes, tally.fails)?;
            }
        }

        writeln!(f)?;
        for (name, value) in &self.metrics.metrics {
            let line = match value {
                MetricValue::Counter { count, per_second } => format!("{count} ({per_second:.2}/s)"),
                MetricValue::Rate { passes, fails, rate } => {
                    format!("{:.2}% ({passes} of {})", rate * 100.0, passes + fails)
                }
                MetricValue::Trend(t) => {
                    let unit = if name == names::HTTP_REQ_DURATION || name == names::ITERATION_DURATION {
                        "ms"
                    } else {
                        ""
                    };
                    format!(
                        "avg={:.2}{unit} min={:.2}{unit} med={:.2}{unit} max={:.2}{unit} p(90)={:.2}{unit} p(95)={:.2}{unit}",
                        t.avg, t.min, t.med, t.max, t.p90, t.p95
                    )
                }
                MetricValue::Gauge { value, min, max } => format!("{value} min={min} max={max}"),
            };
            writeln!(f, "  {name:.<32} {line}")?;
        }

        if !self.thresholds.is_empty() {
            writeln!(f)?;
            for t in &self.thresholds {
                let mark = if t.passed { '✓' } else { '✗' };
                let observed = t
                    .observed
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "no samples".to_string());
                writeln!(f, "  {mark} {} {}  observed {observed}", t.metric, t.expr)?;
            }
        }
        write!(f, "\nresult: {}", if self.passed() { "PASS" } else { "FAIL" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    fn summary(setup_error: Option<String>, passed: bool) -> RunSummary {
        RunSummary {
            journey: "login".to_string(),
            profile: "single pass".to_string(),
            started_at: Utc::now(),
            duration: Duration::from_secs(2),
            vus_max: 1,
            iterations: 1,
            iteration_failures: 0,
            iterations_interrupted: 0,
            setup_error,
            aborted: false,
            stopped: false,
            thresholds: vec![ThresholdOutcome {
                metric: "http_req_failed".to_string(),
                expr: "rate<0.01".to_string(),
                passed,
                observed: Some(0.0),
                abort_on_fail: false,
                note: None,
            }],
            metrics: MetricsSink::new().snapshot(),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(summary(None, true).exit_code(), EXIT_OK);
        assert_eq!(summary(None, false).exit_code(), EXIT_THRESHOLDS_FAILED);
        assert_eq!(summary(Some("login failed".to_string()), true).exit_code(), EXIT_SETUP_FAILED);
    }

    #[test]
    fn test_json_and_text() {
        let s = summary(None, true);
        let json: serde_json::Value = serde_json::from_str(&s.to_json().unwrap()).unwrap();
        assert_eq!(json["duration_ms"], 2000);
        assert_eq!(json["thresholds"][0]["passed"], true);
        assert!(s.to_string().contains("result: PASS"));
    }
}
