//! Script generation and revision through Gemini `generateContent`
//!
//! The video travels inline as base64 next to the prompt. Both operations
//! use the same endpoint and response shape; only the parts differ.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use key_rotation::{CancellationToken, InvocationError, Invoker};
use serde::Deserialize;
use tracing::info;
use transport::{AuthPlacement, DEFAULT_ATTEMPT_TIMEOUT, RequestDescriptor};

use crate::constants::{
    GEMINI_BASE_URL, GEMINI_KEY_HEADER, GEMINI_MODEL, REVISION_PROMPT, SCRIPT_PROMPT,
};
use crate::error::Result;

/// Subset of the `generateContent` response we read.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Gemini client for writing and revising narration scripts.
pub struct ScriptClient {
    invoker: Arc<Invoker>,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl ScriptClient {
    pub fn new(invoker: Arc<Invoker>) -> Self {
        Self {
            invoker,
            base_url: GEMINI_BASE_URL.to_string(),
            model: GEMINI_MODEL.to_string(),
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn request(&self, parts: serde_json::Value) -> RequestDescriptor {
        let body = serde_json::json!({ "contents": [{ "parts": parts }] });
        let auth = AuthPlacement::Header(GEMINI_KEY_HEADER);
        RequestDescriptor::post_json(self.endpoint(), &body, auth).with_timeout(self.timeout)
    }

    /// Write a timestamped script describing `video` in the given style.
    pub async fn generate_script(
        &self,
        video: &[u8],
        mime_type: &str,
        style: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = SCRIPT_PROMPT.replace("{style}", style);
        let request = self.request(serde_json::json!([
            { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(video) } },
            { "text": prompt },
        ]));

        info!(bytes = video.len(), mime_type, style, "generating script");
        let payload = self.invoker.invoke(&request, cancel).await?;
        Ok(extract_text(&payload)?)
    }

    /// Rewrite `script` according to `instructions`, keeping the line format.
    pub async fn revise_script(
        &self,
        script: &str,
        instructions: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = REVISION_PROMPT
            .replace("{script}", script)
            .replace("{instructions}", instructions);
        let request = self.request(serde_json::json!([{ "text": prompt }]));

        info!(lines = script.lines().count(), "revising script");
        let payload = self.invoker.invoke(&request, cancel).await?;
        Ok(extract_text(&payload)?)
    }
}

/// Text of the first part of the first candidate.
///
/// An unreadable body is fatal: retrying would send the same request and
/// most likely get the same answer.
fn extract_text(payload: &[u8]) -> std::result::Result<String, InvocationError> {
    let response: GenerateResponse = serde_json::from_slice(payload)
        .map_err(|e| InvocationError::Fatal(format!("invalid generateContent response: {e}")))?;

    let part = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .ok_or_else(|| InvocationError::Fatal("gemini returned no content".into()))?;

    part.text
        .ok_or_else(|| InvocationError::Fatal("gemini response did not contain text".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use key_rotation::{CredentialPool, GEMINI_SIGNALS};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use transport::HttpTransport;

    #[derive(Debug, Clone)]
    struct Captured {
        key: String,
        path: String,
        body: serde_json::Value,
    }

    fn reply(text: &str) -> String {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }]
        })
        .to_string()
    }

    /// Mock Gemini: answers 429 for `spent_key`, a fixed script otherwise.
    async fn start_upstream(spent_key: &'static str) -> (String, Arc<Mutex<Vec<Captured>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let log = captured.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move |request: Request<Body>| {
                let log = log.clone();
                async move {
                    let key = request
                        .headers()
                        .get("x-goog-api-key")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let path = request.uri().path().to_string();
                    let bytes = axum::body::to_bytes(request.into_body(), 16 * 1024 * 1024)
                        .await
                        .unwrap();
                    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
                    log.lock().unwrap().push(Captured {
                        key: key.clone(),
                        path,
                        body,
                    });
                    if key == spent_key {
                        (
                            StatusCode::TOO_MANY_REQUESTS,
                            r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
                        )
                    } else {
                        (StatusCode::OK, reply("00:00:00-00:00:04: A dog runs."))
                    }
                }
            });
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), captured)
    }

    fn client(base_url: &str, keys: &[&str]) -> ScriptClient {
        let pool = Arc::new(CredentialPool::from_keys("gemini credentials", keys).unwrap());
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let invoker = Invoker::new(&GEMINI_SIGNALS, pool, Arc::new(HttpTransport::new(http)));
        ScriptClient::new(Arc::new(invoker)).with_base_url(base_url)
    }

    #[test]
    fn extract_text_reads_first_part() {
        let text = extract_text(reply("line one").as_bytes()).unwrap();
        assert_eq!(text, "line one");
    }

    #[test]
    fn extract_text_without_candidates_is_fatal() {
        let err = extract_text(br#"{"candidates":[]}"#).unwrap_err();
        assert_eq!(err, InvocationError::Fatal("gemini returned no content".into()));
    }

    #[test]
    fn extract_text_without_text_part_is_fatal() {
        let body = br#"{"candidates":[{"content":{"parts":[{"inline_data":{}}]}}]}"#;
        let err = extract_text(body).unwrap_err();
        assert_eq!(err, InvocationError::Fatal("gemini response did not contain text".into()));
    }

    #[test]
    fn extract_text_rejects_non_json() {
        assert!(matches!(extract_text(b"<html>"), Err(InvocationError::Fatal(_))));
    }

    #[test]
    fn endpoint_includes_model_and_trims_slash() {
        let script = client("http://localhost:1/", &["k"]).with_model("gemini-2.0-flash");
        assert_eq!(
            script.endpoint(),
            "http://localhost:1/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn generate_script_sends_inline_video_and_prompt() {
        let (base, captured) = start_upstream("none").await;
        let script = client(&base, &["k1"]);

        let cancel = CancellationToken::new();
        let text = script
            .generate_script(b"\x00\x01video", "video/mp4", "documentary", &cancel)
            .await
            .unwrap();

        assert_eq!(text, "00:00:00-00:00:04: A dog runs.");
        let calls = captured.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "/v1beta/models/gemini-1.5-flash:generateContent");
        assert_eq!(calls[0].key, "k1");
        let parts = &calls[0].body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "video/mp4");
        assert_eq!(parts[0]["inline_data"]["data"], STANDARD.encode(b"\x00\x01video"));
        let prompt = parts[1]["text"].as_str().unwrap();
        assert!(prompt.contains("HH:MM:SS-HH:MM:SS: description"));
        assert!(prompt.contains("'documentary'"));
    }

    #[tokio::test]
    async fn spent_key_rotates_to_next() {
        let (base, captured) = start_upstream("k1").await;
        let script = client(&base, &["k1", "k2"]);

        let text = script
            .revise_script("00:00:00-00:00:02: Old.", "make it funnier", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "00:00:00-00:00:04: A dog runs.");
        let keys: Vec<String> = captured.lock().unwrap().iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(script.invoker().credentials().position(), 1);
    }

    #[tokio::test]
    async fn revision_prompt_carries_script_and_instructions() {
        let (base, captured) = start_upstream("none").await;
        let script = client(&base, &["k1"]);

        script
            .revise_script("00:00:00-00:00:02: Old.", "shorter please", &CancellationToken::new())
            .await
            .unwrap();

        let calls = captured.lock().unwrap().clone();
        let prompt = calls[0].body["contents"][0]["parts"][0]["text"].as_str().unwrap().to_string();
        assert!(prompt.contains("Original Script:\n00:00:00-00:00:02: Old."));
        assert!(prompt.contains("User Instructions:\nshorter please"));
    }

    #[tokio::test]
    async fn every_key_spent_is_exhausted() {
        let (base, _captured) = start_upstream("k1").await;
        let script = client(&base, &["k1"]);

        let err = script
            .generate_script(b"v", "video/mp4", "calm", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Invocation(InvocationError::Exhausted)), "got: {err}");
    }
}
