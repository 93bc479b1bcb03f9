//! HTTP session client used by one virtual user.
//!
//! Each client owns its own cookie jar and bearer-token slot. Calls never
//! return `Err` for network problems: a timeout or refused connection yields
//! an [`HttpExchange`] with no status, so journeys branch on the exchange
//! instead of unwinding.

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::classify;
use crate::error::{HarnessError, Result};
use crate::metrics::MetricsSink;

/// Statuses a call declares as expected. Anything else is still returned
/// but counted as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStatuses {
    ranges: Vec<(u16, u16)>,
}

impl Default for ExpectedStatuses {
    /// 2xx and 3xx
    fn default() -> Self {
        Self::range(200, 399)
    }
}

impl ExpectedStatuses {
    pub fn codes(codes: &[u16]) -> Self {
        Self {
            ranges: codes.iter().map(|&c| (c, c)).collect(),
        }
    }

    pub fn range(min: u16, max: u16) -> Self {
        Self {
            ranges: vec![(min.min(max), min.max(max))],
        }
    }

    /// Add a single code to the set
    pub fn with(mut self, code: u16) -> Self {
        self.ranges.push((code, code));
        self
    }

    pub fn contains(&self, status: u16) -> bool {
        self.ranges.iter().any(|&(lo, hi)| (lo..=hi).contains(&status))
    }
}

impl fmt::Display for ExpectedStatuses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|&(lo, hi)| if lo == hi { lo.to_string() } else { format!("{lo}-{hi}") })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    /// Multipart form with a single file part
    Multipart(FilePart),
}

/// A file sent as one multipart field
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// How the `Authorization` header is chosen for one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Use the session token if one is set
    #[default]
    Session,
    /// Send no `Authorization` header
    Anonymous,
    /// Send this bearer token regardless of the session
    Bearer(String),
}

/// Description of one HTTP call
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    /// Absolute URL, or a path resolved against the client's base URL
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
    pub expected: ExpectedStatuses,
    pub tag: Option<String>,
    pub auth: AuthMode,
}

impl RequestSpec {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
            expected: ExpectedStatuses::default(),
            tag: None,
            auth: AuthMode::Session,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Attach a file under the `file` multipart field
    pub fn file(mut self, file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.body = RequestBody::Multipart(FilePart {
            field: "file".to_string(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        });
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expect(mut self, expected: ExpectedStatuses) -> Self {
        self.expected = expected;
        self
    }

    pub fn expect_codes(self, codes: &[u16]) -> Self {
        self.expect(ExpectedStatuses::codes(codes))
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMode::Bearer(token.into());
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.auth = AuthMode::Anonymous;
        self
    }
}

/// Why no usable response came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// Response started but the body could not be read
    Body,
    Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// One request/response pair
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub tag: String,
    pub method: Method,
    pub url: String,
    /// Absent when no response was received
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub elapsed: Duration,
    pub error: Option<TransportError>,
    /// Status was in the declared expected set
    pub expected: bool,
}

impl HttpExchange {
    /// Exchange for a call that never produced a response
    pub fn transport_failure(
        tag: impl Into<String>,
        method: Method,
        url: impl Into<String>,
        elapsed: Duration,
        error: TransportError,
    ) -> Self {
        Self {
            tag: tag.into(),
            method,
            url: url.into(),
            status: None,
            headers: HeaderMap::new(),
            body: None,
            elapsed,
            error: Some(error),
            expected: false,
        }
    }

    pub fn is_transport_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn status_is(&self, code: u16) -> bool {
        self.status == Some(code)
    }

    pub fn status_in(&self, codes: &[u16]) -> bool {
        self.status.is_some_and(|s| codes.contains(&s))
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parse the body as JSON
    pub fn json(&self) -> Result<Value> {
        parse_json(self)
    }

    /// Decode the body into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = parse_json(self)?;
        serde_json::from_value(value).map_err(|e| HarnessError::Decode(format!("{}: {e}", self.tag)))
    }
}

/// Parse an exchange body as JSON. Fails with `MalformedBody` when there is
/// no body (including transport failures) or it is not JSON, e.g. an HTML
/// error page.
pub fn parse_json(exchange: &HttpExchange) -> Result<Value> {
    let body = match exchange.body.as_deref() {
        Some(body) if !body.is_empty() => body,
        _ => {
            return Err(HarnessError::MalformedBody(format!(
                "{} {}: empty body (status {:?})",
                exchange.method, exchange.url, exchange.status
            )))
        }
    };
    serde_json::from_slice(body).map_err(|e| {
        HarnessError::MalformedBody(format!(
            "{} {}: {e} (status {:?})",
            exchange.method, exchange.url, exchange.status
        ))
    })
}

/// HTTP client for one virtual user
#[derive(Debug)]
pub struct SessionClient {
    http: Client,
    base_url: Url,
    default_timeout: Duration,
    token: Option<String>,
    sink: Arc<MetricsSink>,
    vu: u64,
}

impl SessionClient {
    /// Create a client with a fresh cookie jar
    pub fn new(base_url: &str, default_timeout: Duration, sink: Arc<MetricsSink>, vu: u64) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| HarnessError::Config(format!("Invalid base URL '{base_url}': {e}")))?;
        let http = Client::builder()
            .cookie_provider(Arc::new(Jar::default()))
            .timeout(default_timeout)
            .user_agent(concat!("loadbeat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            default_timeout,
            token: None,
            sink,
            vu,
        })
    }

    pub fn vu(&self) -> u64 {
        self.vu
    }

    pub fn sink(&self) -> &Arc<MetricsSink> {
        &self.sink
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Resolve a path against the base URL. Absolute URLs pass through.
    pub fn url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        if target.starts_with('/') {
            format!("{base}{target}")
        } else {
            format!("{base}/{target}")
        }
    }

    /// Perform one call and feed the result to the classifier
    pub async fn send(&self, spec: RequestSpec) -> HttpExchange {
        let url = self.url(&spec.target);
        let tag = spec.tag.clone().unwrap_or_else(|| format!("{} {}", spec.method, spec.target));
        let exchange = self.execute(&spec, &url, tag).await;

        let classification = classify::record(&self.sink, &exchange);
        match &exchange.error {
            Some(err) => warn!(
                vu = self.vu,
                tag = %exchange.tag,
                url = %exchange.url,
                kind = ?err.kind,
                error = %err.message,
                "No response"
            ),
            None => debug!(
                vu = self.vu,
                tag = %exchange.tag,
                status = ?exchange.status,
                class = classification.class.label(),
                expected = exchange.expected,
                elapsed_ms = exchange.elapsed.as_millis() as u64,
                "Response"
            ),
        }
        exchange
    }

    async fn execute(&self, spec: &RequestSpec, url: &str, tag: String) -> HttpExchange {
        let started = Instant::now();
        let mut request = self
            .http
            .request(spec.method.clone(), url)
            .timeout(spec.timeout.unwrap_or(self.default_timeout))
            .header(ACCEPT, "application/json");

        match &spec.auth {
            AuthMode::Session => {
                if let Some(token) = &self.token {
                    request = request.header(AUTHORIZATION, format!("Bearer {token}"));
                }
            }
            AuthMode::Bearer(token) => {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            AuthMode::Anonymous => {}
        }

        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request = match &spec.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request
                .header(CONTENT_TYPE, "application/json")
                .body(value.to_string()),
            RequestBody::Multipart(file) => {
                let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.content_type);
                match part {
                    Ok(part) => request.multipart(reqwest::multipart::Form::new().part(file.field.clone(), part)),
                    Err(e) => {
                        return HttpExchange::transport_failure(
                            tag,
                            spec.method.clone(),
                            url,
                            started.elapsed(),
                            TransportError::from_reqwest(&e),
                        )
                    }
                }
            }
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return HttpExchange::transport_failure(
                    tag,
                    spec.method.clone(),
                    url,
                    started.elapsed(),
                    TransportError::from_reqwest(&e),
                )
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let (body, error) = match response.bytes().await {
            Ok(bytes) => (Some(bytes.to_vec()), None),
            Err(e) => (None, Some(TransportError::from_reqwest(&e))),
        };

        HttpExchange {
            tag,
            method: spec.method.clone(),
            url: url.to_string(),
            status: Some(status),
            headers,
            body,
            elapsed: started.elapsed(),
            expected: error.is_none() && spec.expected.contains(status),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn exchange(status: Option<u16>, body: Option<&str>) -> HttpExchange {
        HttpExchange {
            tag: "test".to_string(),
            method: Method::GET,
            url: "http://localhost/test".to_string(),
            status,
            headers: HeaderMap::new(),
            body: body.map(|b| b.as_bytes().to_vec()),
            elapsed: Duration::from_millis(5),
            error: None,
            expected: true,
        }
    }

    #[test]
    fn test_expected_statuses() {
        let expected = ExpectedStatuses::codes(&[201, 409]).with(404);
        assert!(expected.contains(201));
        assert!(expected.contains(404));
        assert!(!expected.contains(200));
        assert_eq!(expected.to_string(), "201,409,404");

        let default = ExpectedStatuses::default();
        assert!(default.contains(204));
        assert!(default.contains(302));
        assert!(!default.contains(401));

        assert!(ExpectedStatuses::range(499, 200).contains(450));
    }

    #[test]
    fn test_parse_json_variants() {
        assert!(parse_json(&exchange(Some(200), Some(r#"{"data":{}}"#))).is_ok());
        assert!(matches!(
            parse_json(&exchange(Some(502), Some("<html>Bad Gateway</html>"))),
            Err(HarnessError::MalformedBody(_))
        ));
        assert!(matches!(parse_json(&exchange(Some(204), None)), Err(HarnessError::MalformedBody(_))));
        assert!(matches!(parse_json(&exchange(Some(204), Some(""))), Err(HarnessError::MalformedBody(_))));
    }

    #[test]
    fn test_transport_failure_has_no_body() {
        let failure = HttpExchange::transport_failure(
            "login",
            Method::POST,
            "http://127.0.0.1:1/auth/login",
            Duration::from_millis(3),
            TransportError {
                kind: TransportErrorKind::Connect,
                message: "connection refused".to_string(),
            },
        );
        assert!(failure.is_transport_error());
        assert_eq!(failure.status, None);
        assert!(!failure.expected);
        assert!(matches!(failure.json(), Err(HarnessError::MalformedBody(_))));
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Deserialize)]
        struct Envelope {
            data: Inner,
        }
        #[derive(Deserialize)]
        struct Inner {
            access_token: String,
        }

        let ok = exchange(Some(201), Some(r#"{"data":{"access_token":"abc"}}"#));
        let decoded: Envelope = ok.decode().unwrap();
        assert_eq!(decoded.data.access_token, "abc");

        let wrong_shape = exchange(Some(201), Some(r#"{"data":{}}"#));
        assert!(matches!(wrong_shape.decode::<Envelope>(), Err(HarnessError::Decode(_))));
    }

    #[test]
    fn test_url_resolution() {
        let sink = Arc::new(MetricsSink::new());
        let client = SessionClient::new("http://api.local/v1/", Duration::from_secs(1), sink, 1).unwrap();
        assert_eq!(client.url("/auth/login"), "http://api.local/v1/auth/login");
        assert_eq!(client.url("tweets"), "http://api.local/v1/tweets");
        assert_eq!(client.url("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_invalid_base_url() {
        let sink = Arc::new(MetricsSink::new());
        let err = SessionClient::new("not a url", Duration::from_secs(1), sink, 1).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_request_spec_builder() {
        let spec = RequestSpec::post("/tweets")
            .json(serde_json::json!({"content": "hi"}))
            .expect_codes(&[201])
            .bearer("invalid")
            .tag("create tweet");
        assert_eq!(spec.method, Method::POST);
        assert!(spec.expected.contains(201));
        assert_eq!(spec.auth, AuthMode::Bearer("invalid".to_string()));
        assert!(matches!(spec.body, RequestBody::Json(_)));
    }
}
