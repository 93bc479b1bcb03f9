//! Named boolean assertions.
//!
//! A failing check is observational: it lowers the `checks` rate and the
//! per-check tally but never aborts the iteration.

use crate::client::HttpExchange;
use crate::metrics::MetricsSink;

/// Record a single named outcome
pub fn check(sink: &MetricsSink, name: &str, passed: bool) -> bool {
    sink.record_check(name, passed);
    passed
}

/// Chain of checks against one exchange
///
/// ```ignore
/// let ok = Checks::new(&sink, &res)
///     .that("status is 201", |r| r.status_is(201))
///     .that("has token", |r| r.has_body())
///     .passed();
/// ```
pub struct Checks<'a> {
    sink: &'a MetricsSink,
    exchange: &'a HttpExchange,
    all_passed: bool,
}

impl<'a> Checks<'a> {
    pub fn new(sink: &'a MetricsSink, exchange: &'a HttpExchange) -> Self {
        Self {
            sink,
            exchange,
            all_passed: true,
        }
    }

    pub fn that(mut self, name: &str, predicate: impl FnOnce(&HttpExchange) -> bool) -> Self {
        let passed = predicate(self.exchange);
        self.sink.record_check(name, passed);
        self.all_passed &= passed;
        self
    }

    /// Every check in the chain passed
    pub fn passed(&self) -> bool {
        self.all_passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::names;
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use std::time::Duration;

    #[test]
    fn test_chain_records_each_check() {
        let sink = MetricsSink::new();
        let exchange = HttpExchange {
            tag: "t".to_string(),
            method: Method::GET,
            url: "http://localhost/".to_string(),
            status: Some(200),
            headers: HeaderMap::new(),
            body: None,
            elapsed: Duration::from_millis(1),
            error: None,
            expected: true,
        };

        let passed = Checks::new(&sink, &exchange)
            .that("status is 200", |r| r.status_is(200))
            .that("has body", |r| r.has_body())
            .passed();
        assert!(!passed);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.checks["status is 200"].passes, 1);
        assert_eq!(snapshot.checks["has body"].fails, 1);
        assert_eq!(snapshot.rate(names::CHECKS), Some(0.5));
    }

    #[test]
    fn test_plain_check() {
        let sink = MetricsSink::new();
        assert!(check(&sink, "id matches", true));
        assert!(!check(&sink, "id matches", false));
        assert_eq!(sink.snapshot().checks["id matches"].total(), 2);
    }
}
