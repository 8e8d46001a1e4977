//! Failure classification for quota-limited provider responses
//!
//! Maps one transport result to the action the invoker should take next.
//! Provider differences live entirely in a `SignalTable`: which statuses mean
//! "this credential is spent", which body phrases say the same thing in
//! prose, and which statuses are worth retrying as-is.
//!
//! Matching is by lowercase substring. Providers reword error messages often,
//! and an unrecognised failure must land in a retry class rather than `Fatal`.

use bytes::Bytes;
use transport::{ErrorClassification, FailureKind, TransportResult};

/// Longest slice of an upstream body carried into a `Fatal` detail.
const DETAIL_LIMIT: usize = 512;

/// Failure markers in transport errors that point at the proxy rather than
/// the upstream.
const EGRESS_MARKERS: &[&str] = &["proxyconnect", "proxy", "tunnel", "socks"];

/// Provider-specific signals that drive classification.
#[derive(Debug)]
pub struct SignalTable {
    /// Provider label for logs and metrics
    pub provider: &'static str,
    /// Statuses that always mean the credential is rate-limited or rejected
    pub quota_statuses: &'static [u16],
    /// Lowercase body phrases with the same meaning, for any non-2xx status
    pub quota_markers: &'static [&'static str],
    /// Statuses retried on the same credential and route
    pub transient_statuses: &'static [u16],
}

/// Gemini `generateContent`.
pub const GEMINI_SIGNALS: SignalTable = SignalTable {
    provider: "gemini",
    quota_statuses: &[401, 403, 429],
    quota_markers: &[
        "resource_exhausted",
        "quota",
        "limit exceeded",
        "api key not valid",
        "api_key_invalid",
        "permission_denied",
        "api key expired",
    ],
    transient_statuses: &[408, 500, 502, 503, 504],
};

/// ElevenLabs text-to-speech.
pub const ELEVENLABS_SIGNALS: SignalTable = SignalTable {
    provider: "elevenlabs",
    quota_statuses: &[401, 429],
    quota_markers: &[
        "quota_exceeded",
        "invalid_api_key",
        "too_many_concurrent_requests",
        "limit exceeded",
    ],
    transient_statuses: &[408, 502, 503, 504],
};

/// Tagged result of one attempt. Consumed immediately by the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(Bytes),
    Transient(String),
    QuotaOrAuth(String),
    EgressFailure(String),
    Fatal(String),
}

impl AttemptOutcome {
    /// Failure class, or `None` for success.
    pub fn classification(&self) -> Option<ErrorClassification> {
        match self {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::Transient(_) => Some(ErrorClassification::Transient),
            AttemptOutcome::QuotaOrAuth(_) => Some(ErrorClassification::QuotaOrAuth),
            AttemptOutcome::EgressFailure(_) => Some(ErrorClassification::EgressFailure),
            AttemptOutcome::Fatal(_) => Some(ErrorClassification::Fatal),
        }
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        self.classification()
            .map(|c| c.label())
            .unwrap_or("success")
    }
}

/// Classify one transport result.
///
/// `egress_in_use` is true when the attempt went through a route from an
/// egress pool. Without one, proxy-looking failures are plain `Transient`.
pub fn classify(
    result: TransportResult,
    signals: &SignalTable,
    egress_in_use: bool,
) -> AttemptOutcome {
    match result {
        TransportResult::Response { status, body } => classify_response(status, body, signals),
        TransportResult::Failed(failure) => {
            let detail = failure.to_string();
            match failure.kind {
                FailureKind::InvalidCredential => AttemptOutcome::QuotaOrAuth(detail),
                FailureKind::InvalidRequest => AttemptOutcome::Fatal(detail),
                FailureKind::Connect if egress_in_use => AttemptOutcome::EgressFailure(detail),
                _ if egress_in_use && mentions_egress(&failure.message) => {
                    AttemptOutcome::EgressFailure(detail)
                }
                _ => AttemptOutcome::Transient(detail),
            }
        }
    }
}

fn classify_response(status: u16, body: Bytes, signals: &SignalTable) -> AttemptOutcome {
    if (200..300).contains(&status) {
        return AttemptOutcome::Success(body);
    }

    let text = String::from_utf8_lossy(&body);
    let detail = format!("{status}: {}", truncate(&text, DETAIL_LIMIT));

    if signals.quota_statuses.contains(&status) {
        return AttemptOutcome::QuotaOrAuth(detail);
    }
    let lower = text.to_lowercase();
    if signals.quota_markers.iter().any(|m| lower.contains(m)) {
        return AttemptOutcome::QuotaOrAuth(detail);
    }
    if signals.transient_statuses.contains(&status) {
        return AttemptOutcome::Transient(detail);
    }
    AttemptOutcome::Fatal(detail)
}

fn mentions_egress(message: &str) -> bool {
    let lower = message.to_lowercase();
    EGRESS_MARKERS.iter().any(|m| lower.contains(m))
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> TransportResult {
        TransportResult::response(status, body.to_string())
    }

    #[test]
    fn success_carries_body() {
        let outcome = classify(response(200, "audio"), &ELEVENLABS_SIGNALS, false);
        assert_eq!(outcome, AttemptOutcome::Success(Bytes::from("audio")));
        assert_eq!(outcome.label(), "success");
    }

    #[test]
    fn rate_limit_status_is_quota() {
        let outcome = classify(response(429, ""), &GEMINI_SIGNALS, false);
        assert!(matches!(outcome, AttemptOutcome::QuotaOrAuth(_)), "{outcome:?}");
    }

    #[test]
    fn rejected_key_is_quota() {
        let outcome = classify(response(401, "unauthorized"), &ELEVENLABS_SIGNALS, false);
        assert!(matches!(outcome, AttemptOutcome::QuotaOrAuth(_)));
    }

    #[test]
    fn gemini_quota_phrase_on_400_is_quota() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        let outcome = classify(response(400, body), &GEMINI_SIGNALS, false);
        assert!(matches!(outcome, AttemptOutcome::QuotaOrAuth(_)), "{outcome:?}");
    }

    #[test]
    fn quota_markers_are_case_insensitive() {
        let body = r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#;
        let outcome = classify(response(500, body), &GEMINI_SIGNALS, false);
        assert!(matches!(outcome, AttemptOutcome::QuotaOrAuth(_)));
    }

    #[test]
    fn elevenlabs_quota_body_is_quota() {
        let body = r#"{"detail":{"status":"quota_exceeded","message":"This request exceeds your quota."}}"#;
        let outcome = classify(response(400, body), &ELEVENLABS_SIGNALS, false);
        assert!(matches!(outcome, AttemptOutcome::QuotaOrAuth(_)));
    }

    #[test]
    fn gateway_errors_are_transient() {
        for status in [502, 503, 504] {
            let outcome = classify(response(status, "upstream down"), &ELEVENLABS_SIGNALS, false);
            assert!(matches!(outcome, AttemptOutcome::Transient(_)), "{status}: {outcome:?}");
        }
    }

    #[test]
    fn unexpected_status_is_fatal_with_verbatim_detail() {
        let body = r#"{"detail":{"status":"voice_not_found"}}"#;
        let outcome = classify(response(400, body), &ELEVENLABS_SIGNALS, false);
        assert_eq!(outcome, AttemptOutcome::Fatal(format!("400: {body}")));
    }

    #[test]
    fn fatal_detail_is_truncated() {
        let body = "é".repeat(600);
        match classify(response(422, &body), &ELEVENLABS_SIGNALS, false) {
            AttemptOutcome::Fatal(detail) => {
                assert!(detail.len() <= DETAIL_LIMIT + 5, "len {}", detail.len());
                assert!(detail.starts_with("422: é"));
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn timeout_is_transient() {
        let result = TransportResult::failed(FailureKind::Timeout, "operation timed out");
        assert!(matches!(
            classify(result, &GEMINI_SIGNALS, false),
            AttemptOutcome::Transient(_)
        ));
    }

    #[test]
    fn connect_failure_without_egress_is_transient() {
        let result = TransportResult::failed(FailureKind::Connect, "proxyconnect tcp: refused");
        assert!(matches!(
            classify(result, &ELEVENLABS_SIGNALS, false),
            AttemptOutcome::Transient(_)
        ));
    }

    #[test]
    fn connect_failure_through_egress_is_egress_failure() {
        let result = TransportResult::failed(FailureKind::Connect, "tcp connect error");
        assert!(matches!(
            classify(result, &ELEVENLABS_SIGNALS, true),
            AttemptOutcome::EgressFailure(_)
        ));
    }

    #[test]
    fn proxy_marker_in_other_failure_is_egress_failure() {
        let result = TransportResult::failed(
            FailureKind::Other,
            "unsuccessful tunnel: 407 Proxy Authentication Required",
        );
        assert!(matches!(
            classify(result, &ELEVENLABS_SIGNALS, true),
            AttemptOutcome::EgressFailure(_)
        ));
    }

    #[test]
    fn body_cut_through_egress_without_marker_is_transient() {
        let result = TransportResult::failed(FailureKind::Body, "connection reset by peer");
        assert!(matches!(
            classify(result, &ELEVENLABS_SIGNALS, true),
            AttemptOutcome::Transient(_)
        ));
    }

    #[test]
    fn unencodable_credential_rotates() {
        let result =
            TransportResult::failed(FailureKind::InvalidCredential, "invalid header value");
        assert!(matches!(
            classify(result, &ELEVENLABS_SIGNALS, false),
            AttemptOutcome::QuotaOrAuth(_)
        ));
    }

    #[test]
    fn malformed_request_is_fatal() {
        let result =
            TransportResult::failed(FailureKind::InvalidRequest, "relative URL without a base");
        assert!(matches!(
            classify(result, &GEMINI_SIGNALS, false),
            AttemptOutcome::Fatal(_)
        ));
    }

    #[test]
    fn outcome_maps_to_classification() {
        assert_eq!(
            AttemptOutcome::EgressFailure(String::new()).classification(),
            Some(ErrorClassification::EgressFailure)
        );
        assert_eq!(AttemptOutcome::Success(Bytes::new()).classification(), None);
    }
}
