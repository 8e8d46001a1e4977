//! reqwest-backed transport
//!
//! Builds one HTTP request per attempt from a `RequestDescriptor`, injects the
//! credential at the descriptor's auth point, and reads the full response body.
//! Network errors are flattened into a `TransportFailure` carrying the whole
//! error chain, so proxy-specific text deep in the chain stays visible to the
//! classifier.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::{
    AuthPlacement, EgressRoute, FailureKind, RequestDescriptor, Transport, TransportFailure,
    TransportResult,
};

/// Transport that talks HTTP directly, or through the attempt's egress route.
pub struct HttpTransport {
    direct: reqwest::Client,
}

impl HttpTransport {
    /// `direct` is used for attempts without an egress route.
    pub fn new(direct: reqwest::Client) -> Self {
        Self { direct }
    }

    fn build(
        &self,
        client: &reqwest::Client,
        request: &RequestDescriptor,
        credential: &str,
    ) -> std::result::Result<reqwest::RequestBuilder, TransportFailure> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = match HeaderName::from_str(name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            let value = match HeaderValue::from_str(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }

        let mut url = reqwest::Url::parse(&request.url).map_err(|e| {
            TransportFailure::new(
                FailureKind::InvalidRequest,
                format!("invalid request url {}: {e}", request.url),
            )
        })?;

        match &request.auth {
            AuthPlacement::Header(name) => {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    TransportFailure::new(
                        FailureKind::InvalidRequest,
                        format!("invalid auth header name: {e}"),
                    )
                })?;
                headers.insert(name, credential_value(credential)?);
            }
            AuthPlacement::Bearer => {
                let value = credential_value(&format!("Bearer {credential}"))?;
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            AuthPlacement::Query(param) => {
                url.query_pairs_mut().append_pair(param, credential);
            }
        }

        Ok(client
            .request(request.method.clone(), url)
            .timeout(request.timeout)
            .headers(headers)
            .body(request.body.clone()))
    }
}

/// Encode a credential as a header value. A credential with control
/// characters is unusable, which the classifier treats as an auth failure.
fn credential_value(raw: &str) -> std::result::Result<HeaderValue, TransportFailure> {
    let mut value = HeaderValue::from_str(raw).map_err(|e| {
        TransportFailure::new(
            FailureKind::InvalidCredential,
            format!("credential is not a valid header value: {e}"),
        )
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Map a reqwest error to a failure kind and a flattened message.
fn failure_from(err: &reqwest::Error) -> TransportFailure {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        FailureKind::Connect
    } else if err.is_body() || err.is_decode() {
        FailureKind::Body
    } else {
        FailureKind::Other
    };
    TransportFailure::new(kind, error_chain(err))
}

/// Join an error and all of its sources with ": ".
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        credential: &'a str,
        egress: Option<&'a EgressRoute>,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>> {
        Box::pin(async move {
            let client = egress.map(EgressRoute::client).unwrap_or(&self.direct);
            let builder = match self.build(client, request, credential) {
                Ok(b) => b,
                Err(failure) => return TransportResult::Failed(failure),
            };

            debug!(
                method = %request.method,
                url = %request.url,
                egress = %egress.map(|e| e.to_string()).unwrap_or_else(|| "direct".into()),
                "sending upstream request"
            );

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => return TransportResult::Failed(failure_from(&e)),
            };

            let status = response.status().as_u16();
            match response.bytes().await {
                Ok(body) => TransportResult::Response { status, body },
                Err(e) => {
                    let mut failure = failure_from(&e);
                    // A status line was received, so this is a cut stream
                    // rather than a connect error.
                    if failure.kind == FailureKind::Connect || failure.kind == FailureKind::Other {
                        failure.kind = FailureKind::Body;
                    }
                    TransportResult::Failed(failure)
                }
            }
        })
    }
}
