//! ElevenLabs text-to-speech

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use key_rotation::{CancellationToken, Invoker};
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::{AuthPlacement, DEFAULT_ATTEMPT_TIMEOUT, RequestDescriptor};

use crate::constants::{
    DEFAULT_CLARITY, DEFAULT_SPEED, DEFAULT_STABILITY, ELEVENLABS_BASE_URL, ELEVENLABS_KEY_HEADER,
    ELEVENLABS_MODEL_ID, VOICE_STYLE,
};
use crate::error::Result;

/// Per-request voice tuning chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    /// Sent as `similarity_boost`
    pub clarity: f32,
    pub speed: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: DEFAULT_STABILITY,
            clarity: DEFAULT_CLARITY,
            speed: DEFAULT_SPEED,
        }
    }
}

/// Speech synthesis client. Usually configured with an egress pool.
pub struct SpeechClient {
    invoker: Arc<Invoker>,
    base_url: String,
    model_id: String,
    timeout: Duration,
}

impl SpeechClient {
    pub fn new(invoker: Arc<Invoker>) -> Self {
        Self {
            invoker,
            base_url: ELEVENLABS_BASE_URL.to_string(),
            model_id: ELEVENLABS_MODEL_ID.to_string(),
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    fn request(&self, voice_id: &str, text: &str, settings: VoiceSettings) -> RequestDescriptor {
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": settings.stability,
                "similarity_boost": settings.clarity,
                "style": VOICE_STYLE,
                "use_speaker_boost": true,
                "speed": settings.speed,
            },
        });
        let url = format!("{}/text-to-speech/{voice_id}", self.base_url);
        RequestDescriptor::post_json(url, &body, AuthPlacement::Header(ELEVENLABS_KEY_HEADER))
            .with_header("accept", "audio/mpeg")
            .with_timeout(self.timeout)
    }

    /// Synthesize `text` with `voice_id`. Returns MP3 bytes.
    pub async fn text_to_speech(
        &self,
        voice_id: &str,
        text: &str,
        settings: VoiceSettings,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let request = self.request(voice_id, text, settings);
        debug!(voice_id, chars = text.chars().count(), "synthesizing speech");
        Ok(self.invoker.invoke(&request, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use key_rotation::{CredentialPool, ELEVENLABS_SIGNALS, InvocationError};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use transport::HttpTransport;

    #[derive(Debug, Clone)]
    struct Captured {
        key: String,
        accept: String,
        path: String,
        body: serde_json::Value,
    }

    /// Mock ElevenLabs. Key `spent` gets 429, voice `missing` gets 400,
    /// everything else gets fake audio.
    async fn start_upstream() -> (String, Arc<Mutex<Vec<Captured>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let log = captured.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move |request: Request<Body>| {
                let log = log.clone();
                async move {
                    let (parts, body) = request.into_parts();
                    let header = |name: &str| {
                        parts
                            .headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string()
                    };
                    let key = header("xi-api-key");
                    let accept = header("accept");
                    let path = parts.uri.path().to_string();
                    let bytes = axum::body::to_bytes(body, 1024 * 1024)
                        .await
                        .unwrap();
                    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
                    log.lock().unwrap().push(Captured {
                        key: key.clone(),
                        accept,
                        path: path.clone(),
                        body,
                    });
                    if key == "spent" {
                        let body = br#"{"detail":{"status":"quota_exceeded"}}"#;
                        (StatusCode::TOO_MANY_REQUESTS, Bytes::from_static(body))
                    } else if path.ends_with("/missing") {
                        let body = br#"{"detail":{"status":"voice_not_found"}}"#;
                        (StatusCode::BAD_REQUEST, Bytes::from_static(body))
                    } else {
                        (StatusCode::OK, Bytes::from_static(b"ID3fake-mp3"))
                    }
                }
            });
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1"), captured)
    }

    fn client(base_url: &str, keys: &[&str]) -> SpeechClient {
        let pool = Arc::new(CredentialPool::from_keys("elevenlabs credentials", keys).unwrap());
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let invoker = Invoker::new(&ELEVENLABS_SIGNALS, pool, Arc::new(HttpTransport::new(http)));
        SpeechClient::new(Arc::new(invoker)).with_base_url(base_url)
    }

    #[test]
    fn default_settings() {
        let settings = VoiceSettings::default();
        assert_eq!(settings.stability, 0.75);
        assert_eq!(settings.clarity, 0.75);
        assert_eq!(settings.speed, 1.0);
    }

    #[test]
    fn request_shape() {
        let speech =
            client("https://api.example.test/v1/", &["k"]).with_model_id("eleven_turbo_v2");
        let settings = VoiceSettings {
            stability: 0.3,
            clarity: 0.9,
            speed: 1.2,
        };
        let request = speech.request("voice-1", "Hello", settings);

        assert_eq!(request.url, "https://api.example.test/v1/text-to-speech/voice-1");
        assert_eq!(request.auth, AuthPlacement::Header("xi-api-key"));
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["model_id"], "eleven_turbo_v2");
        assert_eq!(body["voice_settings"]["style"], 0.5);
        assert_eq!(body["voice_settings"]["use_speaker_boost"], true);
        let similarity = body["voice_settings"]["similarity_boost"].as_f64().unwrap();
        assert!((similarity - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn synthesizes_with_key_header_and_accept() {
        let (base, captured) = start_upstream().await;
        let speech = client(&base, &["good"]);

        let cancel = CancellationToken::new();
        let audio = speech
            .text_to_speech("voice-1", "A dog runs.", VoiceSettings::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(audio, Bytes::from_static(b"ID3fake-mp3"));
        let calls = captured.lock().unwrap().clone();
        assert_eq!(calls[0].path, "/v1/text-to-speech/voice-1");
        assert_eq!(calls[0].key, "good");
        assert_eq!(calls[0].accept, "audio/mpeg");
        assert_eq!(calls[0].body["text"], "A dog runs.");
        assert_eq!(calls[0].body["model_id"], "eleven_multilingual_v2");
    }

    #[tokio::test]
    async fn quota_rotates_key() {
        let (base, captured) = start_upstream().await;
        let speech = client(&base, &["spent", "good"]);

        speech
            .text_to_speech("voice-1", "Hi.", VoiceSettings::default(), &CancellationToken::new())
            .await
            .unwrap();

        let keys: Vec<String> = captured.lock().unwrap().iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec!["spent", "good"]);
    }

    #[tokio::test]
    async fn unknown_voice_is_fatal_without_rotation() {
        let (base, captured) = start_upstream().await;
        let speech = client(&base, &["good", "other"]);

        let err = speech
            .text_to_speech("missing", "Hi.", VoiceSettings::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Invocation(InvocationError::Fatal(detail)) => {
                assert!(detail.starts_with("400: "), "got: {detail}");
                assert!(detail.contains("voice_not_found"));
            }
            other => panic!("expected fatal, got {other:?}"),
        }
        assert_eq!(captured.lock().unwrap().len(), 1);
        assert_eq!(speech.invoker().credentials().position(), 0);
    }
}
