//! Transport abstraction for quota-limited upstream APIs
//!
//! Defines the request descriptor a caller hands to the invocation layer, the
//! raw result of one transport attempt, and the `Transport` trait that issues
//! a single attempt with a given credential and optional egress route. The
//! invocation layer never builds HTTP requests itself; it only decides which
//! credential and route the next attempt uses.
//!
//! `HttpTransport` is the reqwest-backed implementation used in production.
//! Tests substitute scripted transports.

pub mod egress;
pub mod http;

pub use egress::EgressRoute;
pub use http::HttpTransport;

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Failure class assigned to a transport result. Drives the retry/rotate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    /// No usable response because of a network disruption; retry as-is
    Transient,
    /// Credential is rate-limited or rejected; rotate the credential
    QuotaOrAuth,
    /// Failure correlates with the active egress route; rotate the route
    EgressFailure,
    /// Provider rejected the request on its merits; abort
    Fatal,
}

impl ErrorClassification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Transient => "transient",
            ErrorClassification::QuotaOrAuth => "quota_or_auth",
            ErrorClassification::EgressFailure => "egress_failure",
            ErrorClassification::Fatal => "fatal",
        }
    }
}

/// Where the active credential is injected into an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPlacement {
    /// Raw credential as the value of the named header (e.g. `xi-api-key`)
    Header(&'static str),
    /// `Authorization: Bearer <credential>`
    Bearer,
    /// Credential as the named query parameter (e.g. `key`)
    Query(&'static str),
}

/// Everything needed to build one transport call, minus the credential.
///
/// Owned by the caller and borrowed read-only for the whole invocation, so
/// every attempt sends the same body.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: reqwest::Method,
    pub url: String,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
    pub auth: AuthPlacement,
    pub timeout: Duration,
}

/// Default per-attempt timeout, matching the upstream media APIs' slow paths.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

impl RequestDescriptor {
    /// POST a JSON document to `url`.
    pub fn post_json(
        url: impl Into<String>,
        body: &serde_json::Value,
        auth: AuthPlacement,
    ) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            body: Bytes::from(body.to_string()),
            headers: vec![("content-type".into(), "application/json".into())],
            auth,
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Add or replace a static header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Coarse kind of a transport-level failure (no HTTP response obtained).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Attempt exceeded its timeout
    Timeout,
    /// TCP/TLS connect failed (to the upstream, or to the proxy when one is used)
    Connect,
    /// Response started but the body stream broke
    Body,
    /// The credential could not be encoded into the request
    InvalidCredential,
    /// The descriptor itself is unusable (bad URL); no attempt can succeed
    InvalidRequest,
    /// Anything else reqwest reports
    Other,
}

/// A transport failure with the full error chain flattened into `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Raw result of one attempt, before classification.
#[derive(Debug, Clone)]
pub enum TransportResult {
    /// Upstream answered; any status code
    Response { status: u16, body: Bytes },
    /// No complete response
    Failed(TransportFailure),
}

impl TransportResult {
    /// Convenience constructor used by tests and stubs.
    pub fn response(status: u16, body: impl Into<Bytes>) -> Self {
        TransportResult::Response {
            status,
            body: body.into(),
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        TransportResult::Failed(TransportFailure::new(kind, message))
    }
}

/// Errors building transport components (not per-attempt failures).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid egress route {route}: {reason}")]
    InvalidEgress { route: String, reason: String },

    #[error("http client construction failed: {0}")]
    Client(String),
}

/// Result alias for transport construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Issues one attempt of a request with the given credential and route.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
/// Dropping the returned future aborts the in-flight attempt.
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        credential: &'a str,
        egress: Option<&'a EgressRoute>,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_json_sets_content_type_and_body() {
        let body = serde_json::json!({"text": "hello"});
        let req = RequestDescriptor::post_json(
            "https://api.example.test/v1/tts",
            &body,
            AuthPlacement::Header("xi-api-key"),
        );
        assert_eq!(req.method, reqwest::Method::POST);
        assert_eq!(req.body, Bytes::from(r#"{"text":"hello"}"#));
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        assert_eq!(req.timeout, DEFAULT_ATTEMPT_TIMEOUT);
    }

    #[test]
    fn with_header_replaces_case_insensitively() {
        let body = serde_json::json!({});
        let req = RequestDescriptor::post_json("http://x", &body, AuthPlacement::Bearer)
            .with_header("Accept", "application/json")
            .with_header("accept", "audio/mpeg");
        let accepts: Vec<_> = req
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("accept"))
            .collect();
        assert_eq!(accepts.len(), 1);
        assert_eq!(accepts[0].1, "audio/mpeg");
    }

    #[test]
    fn classification_labels_are_stable() {
        assert_eq!(ErrorClassification::Transient.label(), "transient");
        assert_eq!(ErrorClassification::QuotaOrAuth.label(), "quota_or_auth");
        assert_eq!(ErrorClassification::EgressFailure.label(), "egress_failure");
        assert_eq!(ErrorClassification::Fatal.label(), "fatal");
    }

    #[test]
    fn failure_display_includes_kind_and_message() {
        let failure = TransportFailure::new(FailureKind::Connect, "proxyconnect tcp: refused");
        assert_eq!(failure.to_string(), "Connect: proxyconnect tcp: refused");
    }
}
