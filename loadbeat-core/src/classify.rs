//! Status classification and per-exchange metric recording.

use serde::Serialize;

use crate::client::HttpExchange;
use crate::metrics::{names, MetricsSink};

/// Coarse class of a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    NoResponse,
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    /// Outside 100-599
    Other,
}

impl StatusClass {
    pub fn of(status: Option<u16>) -> Self {
        match status {
            None => StatusClass::NoResponse,
            Some(100..=199) => StatusClass::Informational,
            Some(200..=299) => StatusClass::Success,
            Some(300..=399) => StatusClass::Redirection,
            Some(400..=499) => StatusClass::ClientError,
            Some(500..=599) => StatusClass::ServerError,
            Some(_) => StatusClass::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatusClass::NoResponse => "no_response",
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Other => "other",
        }
    }
}

/// Verdict for one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: StatusClass,
    pub status: Option<u16>,
    pub expected: bool,
    /// Transport error or status outside the expected set
    pub failed: bool,
}

pub fn classify(exchange: &HttpExchange) -> Classification {
    let failed = exchange.is_transport_error() || !exchange.expected;
    Classification {
        class: StatusClass::of(exchange.status),
        status: exchange.status,
        expected: exchange.expected,
        failed,
    }
}

/// Classify an exchange and record it into the sink.
///
/// A 5xx is a server error even when declared expected; an expected 4xx is
/// not failed and does not bump the unexpected-status counter.
pub fn record(sink: &MetricsSink, exchange: &HttpExchange) -> Classification {
    let verdict = classify(exchange);

    sink.add_counter(names::HTTP_REQS, 1);
    sink.add_rate(names::HTTP_REQ_FAILED, verdict.failed);
    sink.add_counter(&format!("status_{}", verdict.class.label()), 1);

    if let Some(code) = verdict.status {
        sink.add_counter(&format!("status_{code}"), 1);
        sink.add_trend(names::HTTP_REQ_DURATION, exchange.elapsed.as_secs_f64() * 1000.0);
        if verdict.class == StatusClass::ServerError {
            sink.add_counter(names::HTTP_SERVER_ERRORS, 1);
        }
        if !verdict.expected && !exchange.is_transport_error() {
            sink.add_counter(names::HTTP_UNEXPECTED_STATUS, 1);
        }
    }

    if exchange.is_transport_error() {
        sink.add_counter(names::HTTP_TRANSPORT_ERRORS, 1);
    }
    if let Some(body) = &exchange.body {
        sink.add_counter(names::DATA_RECEIVED, body.len() as u64);
    }

    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{TransportError, TransportErrorKind};
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use std::time::Duration;

    fn exchange(status: Option<u16>, expected: bool) -> HttpExchange {
        HttpExchange {
            tag: "t".to_string(),
            method: Method::GET,
            url: "http://localhost/".to_string(),
            status,
            headers: HeaderMap::new(),
            body: Some(b"{}".to_vec()),
            elapsed: Duration::from_millis(12),
            error: None,
            expected,
        }
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::of(None), StatusClass::NoResponse);
        assert_eq!(StatusClass::of(Some(101)), StatusClass::Informational);
        assert_eq!(StatusClass::of(Some(204)), StatusClass::Success);
        assert_eq!(StatusClass::of(Some(302)), StatusClass::Redirection);
        assert_eq!(StatusClass::of(Some(404)), StatusClass::ClientError);
        assert_eq!(StatusClass::of(Some(503)), StatusClass::ServerError);
        assert_eq!(StatusClass::of(Some(999)), StatusClass::Other);
    }

    #[test]
    fn test_expected_client_error_is_not_failure() {
        let sink = MetricsSink::new();
        let verdict = record(&sink, &exchange(Some(401), true));
        assert!(!verdict.failed);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter("status_401"), 1);
        assert_eq!(snapshot.counter("status_4xx"), 1);
        assert_eq!(snapshot.counter(names::HTTP_UNEXPECTED_STATUS), 0);
        assert_eq!(snapshot.rate(names::HTTP_REQ_FAILED), Some(0.0));
    }

    #[test]
    fn test_server_error_and_unexpected() {
        let sink = MetricsSink::new();
        let verdict = record(&sink, &exchange(Some(500), false));
        assert!(verdict.failed);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter(names::HTTP_SERVER_ERRORS), 1);
        assert_eq!(snapshot.counter(names::HTTP_UNEXPECTED_STATUS), 1);
        assert_eq!(snapshot.rate(names::HTTP_REQ_FAILED), Some(1.0));
        assert_eq!(snapshot.trend(names::HTTP_REQ_DURATION).map(|t| t.count), Some(1));
    }

    #[test]
    fn test_transport_error() {
        let sink = MetricsSink::new();
        let failure = HttpExchange::transport_failure(
            "t",
            Method::GET,
            "http://127.0.0.1:1/",
            Duration::from_millis(1),
            TransportError {
                kind: TransportErrorKind::Timeout,
                message: "timed out".to_string(),
            },
        );
        let verdict = record(&sink, &failure);
        assert!(verdict.failed);
        assert_eq!(verdict.class, StatusClass::NoResponse);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter(names::HTTP_TRANSPORT_ERRORS), 1);
        assert_eq!(snapshot.counter("status_no_response"), 1);
        assert_eq!(snapshot.counter(names::HTTP_UNEXPECTED_STATUS), 0);
        assert!(snapshot.trend(names::HTTP_REQ_DURATION).is_none());
    }

    #[test]
    fn test_failure_rate_over_mixed_traffic() {
        let sink = MetricsSink::new();
        for _ in 0..99 {
            record(&sink, &exchange(Some(200), true));
        }
        record(&sink, &exchange(Some(502), false));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter(names::HTTP_REQS), 100);
        let rate = snapshot.rate(names::HTTP_REQ_FAILED).unwrap();
        assert!((rate - 0.01).abs() < 1e-9);
        assert_eq!(snapshot.counter(names::DATA_RECEIVED), 200);
    }
}
