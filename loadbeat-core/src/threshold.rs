//! Pass/fail criteria over aggregated metrics.
//!
//! Expressions have the form `<aggregate><op><number>`, e.g.
//! `rate<0.01`, `p(95)<800`, `avg<=250`, `count==0`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{HarnessError, Result};
use crate::metrics::{names, MetricValue, MetricsSnapshot};

/// Statistic a threshold looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Value,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Rate => f.write_str("rate"),
            Aggregate::Count => f.write_str("count"),
            Aggregate::Avg => f.write_str("avg"),
            Aggregate::Min => f.write_str("min"),
            Aggregate::Max => f.write_str("max"),
            Aggregate::Med => f.write_str("med"),
            Aggregate::Percentile(p) => write!(f, "p({p})"),
            Aggregate::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
            Comparison::Ne => (observed - bound).abs() >= f64::EPSILON,
        }
    }
}

/// Parsed predicate such as `p(95)<800`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub bound: f64,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregate, self.comparison.symbol(), self.bound)
    }
}

impl FromStr for Predicate {
    type Err = HarnessError;

    fn from_str(expr: &str) -> Result<Self> {
        let invalid = |reason: &str| HarnessError::InvalidThreshold {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        let op_start = compact
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let (lhs, rest) = compact.split_at(op_start);

        let (comparison, rhs) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .iter()
        .find_map(|(sym, cmp)| rest.strip_prefix(sym).map(|r| (*cmp, r)))
        .ok_or_else(|| invalid("unknown comparison operator"))?;

        let bound: f64 = rhs.parse().map_err(|_| invalid("bound is not a number"))?;

        let aggregate = match lhs {
            "rate" => Aggregate::Rate,
            "count" => Aggregate::Count,
            "avg" => Aggregate::Avg,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            "med" => Aggregate::Med,
            "value" => Aggregate::Value,
            "" => return Err(invalid("missing aggregate")),
            other => {
                let p = other
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| invalid("unknown aggregate"))?;
                let p: f64 = p.parse().map_err(|_| invalid("percentile is not a number"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid("percentile must be within 0..=100"));
                }
                Aggregate::Percentile(p)
            }
        };

        Ok(Self {
            aggregate,
            comparison,
            bound,
        })
    }
}

/// A named metric paired with a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdSpec", into = "ThresholdSpec")]
pub struct Threshold {
    pub metric: String,
    pub predicate: Predicate,
    /// Stop the run early once this threshold is crossed
    pub abort_on_fail: bool,
}

/// Serialized form of a threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub metric: String,
    pub expr: String,
    #[serde(default)]
    pub abort_on_fail: bool,
}

impl TryFrom<ThresholdSpec> for Threshold {
    type Error = HarnessError;

    fn try_from(spec: ThresholdSpec) -> Result<Self> {
        Ok(Self {
            metric: spec.metric,
            predicate: spec.expr.parse()?,
            abort_on_fail: spec.abort_on_fail,
        })
    }
}

impl From<Threshold> for ThresholdSpec {
    fn from(t: Threshold) -> Self {
        Self {
            metric: t.metric,
            expr: t.predicate.to_string(),
            abort_on_fail: t.abort_on_fail,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.metric, self.predicate)
    }
}

/// Result of evaluating one threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expr: String,
    pub passed: bool,
    /// `None` when the metric never received a sample
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Threshold {
    pub fn new(metric: impl Into<String>, expr: &str) -> Result<Self> {
        Ok(Self {
            metric: metric.into(),
            predicate: expr.parse()?,
            abort_on_fail: false,
        })
    }

    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    /// `metric: expr`, as accepted on the command line
    pub fn parse_pair(text: &str) -> Result<Self> {
        let (metric, expr) = text.split_once(':').ok_or_else(|| HarnessError::InvalidThreshold {
            expr: text.to_string(),
            reason: "expected '<metric>: <expr>'".to_string(),
        })?;
        Self::new(metric.trim(), expr)
    }

    /// Evaluate against a snapshot. A metric with no samples passes.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdOutcome {
        let outcome = |passed: bool, observed: Option<f64>, note: Option<String>| ThresholdOutcome {
            metric: self.metric.clone(),
            expr: self.predicate.to_string(),
            passed,
            observed,
            abort_on_fail: self.abort_on_fail,
            note,
        };

        let Some(value) = snapshot.get(&self.metric) else {
            return outcome(true, None, Some("no samples".to_string()));
        };

        match observe(value, self.predicate.aggregate) {
            Some(observed) => {
                let passed = self.predicate.comparison.holds(observed, self.predicate.bound);
                outcome(passed, Some(observed), None)
            }
            None if is_empty(value) => outcome(true, None, Some("no samples".to_string())),
            None => outcome(
                false,
                None,
                Some(format!(
                    "{} is not defined for a {:?} metric",
                    self.predicate.aggregate,
                    value.kind()
                )),
            ),
        }
    }
}

fn is_empty(value: &MetricValue) -> bool {
    match value {
        MetricValue::Counter { count, .. } => *count == 0,
        MetricValue::Rate { passes, fails, .. } => passes + fails == 0,
        MetricValue::Trend(stats) => stats.count == 0,
        MetricValue::Gauge { .. } => false,
    }
}

fn observe(value: &MetricValue, aggregate: Aggregate) -> Option<f64> {
    match (value, aggregate) {
        (MetricValue::Counter { count, .. }, Aggregate::Count | Aggregate::Value) => Some(*count as f64),
        (MetricValue::Counter { per_second, .. }, Aggregate::Rate) => Some(*per_second),

        (MetricValue::Rate { rate, passes, fails }, Aggregate::Rate) if passes + fails > 0 => Some(*rate),
        (MetricValue::Rate { passes, fails, .. }, Aggregate::Count) => Some((passes + fails) as f64),

        (MetricValue::Trend(stats), agg) if stats.count > 0 => match agg {
            Aggregate::Count => Some(stats.count as f64),
            Aggregate::Avg => Some(stats.avg),
            Aggregate::Min => Some(stats.min),
            Aggregate::Max => Some(stats.max),
            Aggregate::Med => Some(stats.med),
            Aggregate::Percentile(p) => stats.percentile(p),
            Aggregate::Rate | Aggregate::Value => None,
        },

        (MetricValue::Gauge { value, .. }, Aggregate::Value) => Some(*value as f64),
        (MetricValue::Gauge { min, .. }, Aggregate::Min) => Some(*min as f64),
        (MetricValue::Gauge { max, .. }, Aggregate::Max) => Some(*max as f64),

        _ => None,
    }
}

/// Evaluate every threshold
pub fn evaluate_all(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> Vec<ThresholdOutcome> {
    thresholds.iter().map(|t| t.evaluate(snapshot)).collect()
}

/// Thresholds applied when neither the journey nor the config sets any
pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold {
            metric: names::HTTP_REQ_FAILED.to_string(),
            predicate: Predicate {
                aggregate: Aggregate::Rate,
                comparison: Comparison::Lt,
                bound: 0.01,
            },
            abort_on_fail: false,
        },
        Threshold {
            metric: names::HTTP_REQ_DURATION.to_string(),
            predicate: Predicate {
                aggregate: Aggregate::Percentile(95.0),
                comparison: Comparison::Lt,
                bound: 800.0,
            },
            abort_on_fail: false,
        },
        Threshold {
            metric: names::CHECKS.to_string(),
            predicate: Predicate {
                aggregate: Aggregate::Rate,
                comparison: Comparison::Gt,
                bound: 0.95,
            },
            abort_on_fail: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    #[test]
    fn test_parse_predicates() {
        let p: Predicate = "p(95)<800".parse().unwrap();
        assert_eq!(p.aggregate, Aggregate::Percentile(95.0));
        assert_eq!(p.comparison, Comparison::Lt);
        assert_eq!(p.bound, 800.0);

        let p: Predicate = " rate >= 0.95 ".parse().unwrap();
        assert_eq!(p.aggregate, Aggregate::Rate);
        assert_eq!(p.comparison, Comparison::Ge);

        let p: Predicate = "count!=0".parse().unwrap();
        assert_eq!(p.comparison, Comparison::Ne);

        assert_eq!("p(99.9)<=1500".parse::<Predicate>().unwrap().to_string(), "p(99.9)<=1500");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "rate", "rate<", "rate<abc", "p(101)<1", "p(x)<1", "mean<3", "<5", "rate=>1"] {
            assert!(
                matches!(bad.parse::<Predicate>(), Err(HarnessError::InvalidThreshold { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_failure_rate_threshold() {
        let threshold = Threshold::new(names::HTTP_REQ_FAILED, "rate<0.01").unwrap();

        let sink = MetricsSink::new();
        for i in 0..200 {
            sink.add_rate(names::HTTP_REQ_FAILED, i < 2);
        }
        let outcome = threshold.evaluate(&sink.snapshot());
        assert!(!outcome.passed);
        assert_eq!(outcome.observed, Some(0.01));

        let sink = MetricsSink::new();
        for i in 0..200 {
            sink.add_rate(names::HTTP_REQ_FAILED, i < 1);
        }
        assert!(threshold.evaluate(&sink.snapshot()).passed);
    }

    #[test]
    fn test_trend_threshold() {
        let sink = MetricsSink::new();
        for ms in 1..=100 {
            sink.add_trend(names::HTTP_REQ_DURATION, ms as f64);
        }
        let snapshot = sink.snapshot();
        assert!(Threshold::new(names::HTTP_REQ_DURATION, "p(95)<800").unwrap().evaluate(&snapshot).passed);
        assert!(!Threshold::new(names::HTTP_REQ_DURATION, "max<50").unwrap().evaluate(&snapshot).passed);
        assert!(Threshold::new(names::HTTP_REQ_DURATION, "avg==50.5").unwrap().evaluate(&snapshot).passed);
    }

    #[test]
    fn test_missing_metric_passes() {
        let snapshot = MetricsSink::new().snapshot();
        let outcome = Threshold::new("checks", "rate>0.95").unwrap().evaluate(&snapshot);
        assert!(outcome.passed);
        assert_eq!(outcome.observed, None);
    }

    #[test]
    fn test_aggregate_kind_mismatch_fails() {
        let sink = MetricsSink::new();
        sink.add_counter(names::HTTP_REQS, 3);
        let outcome = Threshold::new(names::HTTP_REQS, "p(95)<1").unwrap().evaluate(&sink.snapshot());
        assert!(!outcome.passed);
        assert!(outcome.note.is_some());
    }

    #[test]
    fn test_serde_form() {
        let t: Threshold =
            serde_json::from_str(r#"{"metric":"checks","expr":"rate>0.9","abort_on_fail":true}"#).unwrap();
        assert!(t.abort_on_fail);
        assert_eq!(t.to_string(), "checks rate>0.9");
        assert!(serde_json::from_str::<Threshold>(r#"{"metric":"checks","expr":"rate"}"#).is_err());
    }

    #[test]
    fn test_parse_pair() {
        let t = Threshold::parse_pair("http_req_duration: p(95)<1500").unwrap();
        assert_eq!(t.metric, "http_req_duration");
        assert!(Threshold::parse_pair("nocolon").is_err());
        assert_eq!(default_thresholds().len(), 3);
    }
}
