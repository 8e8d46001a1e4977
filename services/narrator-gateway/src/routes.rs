//! Narration HTTP surface
//!
//! Every owner-scoped route runs as that owner's task in the registry, so a
//! new request from the same owner cancels the one still running, and
//! `DELETE /v1/owners/{owner}/task` cancels it explicitly. Cancelled work
//! answers 409.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use media_api::{DEFAULT_CLARITY, DEFAULT_SPEED, DEFAULT_STABILITY, VoiceSettings, narrate};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::metrics::record_request;
use crate::service::RequestGuard;

/// Largest accepted video upload
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.7..=1.2;

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ScriptQuery {
    #[serde(default = "default_style")]
    style: String,
}

fn default_style() -> String {
    "neutral".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RevisionRequest {
    script: String,
    instructions: String,
}

/// Optional voice tuning; absent fields use the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsFields {
    stability: Option<f32>,
    clarity: Option<f32>,
    speed: Option<f32>,
}

impl SettingsFields {
    fn resolve(&self) -> Result<VoiceSettings, ApiError> {
        let settings = VoiceSettings {
            stability: self.stability.unwrap_or(DEFAULT_STABILITY),
            clarity: self.clarity.unwrap_or(DEFAULT_CLARITY),
            speed: self.speed.unwrap_or(DEFAULT_SPEED),
        };
        for (name, value) in [("stability", settings.stability), ("clarity", settings.clarity)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ApiError::BadRequest(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if !SPEED_RANGE.contains(&settings.speed) {
            return Err(ApiError::BadRequest(format!(
                "speed must be between {} and {}, got {}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end(),
                settings.speed
            )));
        }
        Ok(settings)
    }
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    voice_id: String,
    text: String,
    #[serde(flatten)]
    settings: SettingsFields,
}

#[derive(Debug, Deserialize)]
pub struct NarrationRequest {
    voice_id: String,
    script: String,
    #[serde(flatten)]
    settings: SettingsFields,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: usize,
}

/// Render the handler outcome and record it. Errors are logged here so
/// each failed request produces exactly one log line.
fn finish(
    state: &AppState,
    route: &'static str,
    guard: &RequestGuard,
    result: ApiResult,
) -> Response {
    let mut response = match result {
        Ok(response) => response,
        Err(e) => {
            state.metrics.record_error();
            let status = e.status();
            if status.is_server_error() {
                error!(
                    route,
                    request_id = %guard.request_id,
                    status = status.as_u16(),
                    error = %e,
                    "request failed"
                );
            } else {
                warn!(
                    route,
                    request_id = %guard.request_id,
                    status = status.as_u16(),
                    error = %e,
                    "request rejected"
                );
            }
            e.into_response_with(&guard.request_id)
        }
    };
    if let Ok(value) = HeaderValue::from_str(&guard.request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    record_request(
        route,
        response.status().as_u16(),
        guard.started.elapsed().as_secs_f64(),
    );
    response
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn require(name: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{name} must not be empty")));
    }
    Ok(())
}

fn known_voice(state: &AppState, voice_id: &str) -> Result<(), ApiError> {
    match state.voices.find(voice_id) {
        Some(_) => Ok(()),
        None => Err(ApiError::UnknownVoice(voice_id.to_string())),
    }
}

/// `POST /v1/owners/{owner}/script?style=...` with the raw video as body
pub async fn script_handler(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<ScriptQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let guard = RequestGuard::begin(&state.metrics);
    let result = generate_script(&state, owner, query.style, &headers, body).await;
    finish(&state, "script", &guard, result)
}

async fn generate_script(
    state: &AppState,
    owner: String,
    style: String,
    headers: &HeaderMap,
    video: Bytes,
) -> ApiResult {
    let mime_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !mime_type.starts_with("video/") {
        return Err(ApiError::BadRequest(format!(
            "content type must be video/*, got: {mime_type:?}"
        )));
    }
    if video.is_empty() {
        return Err(ApiError::BadRequest("video body is empty".into()));
    }

    info!(owner = %owner, bytes = video.len(), mime_type, style = %style, "script requested");
    let scripts = &state.scripts;
    let script = state
        .tasks
        .run(owner, |token| async move {
            scripts
                .generate_script(&video, mime_type, &style, &token)
                .await
        })
        .await?;

    Ok(Json(serde_json::json!({ "script": script })).into_response())
}

/// `POST /v1/owners/{owner}/revision`
pub async fn revision_handler(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    payload: Result<Json<RevisionRequest>, JsonRejection>,
) -> Response {
    let guard = RequestGuard::begin(&state.metrics);
    let result = revise_script(&state, owner, payload).await;
    finish(&state, "revision", &guard, result)
}

async fn revise_script(
    state: &AppState,
    owner: String,
    payload: Result<Json<RevisionRequest>, JsonRejection>,
) -> ApiResult {
    let request = json_body(payload)?;
    require("script", &request.script)?;
    require("instructions", &request.instructions)?;

    let scripts = &state.scripts;
    let script = state
        .tasks
        .run(owner, |token| async move {
            scripts
                .revise_script(&request.script, &request.instructions, &token)
                .await
        })
        .await?;

    Ok(Json(serde_json::json!({ "script": script })).into_response())
}

/// `POST /v1/owners/{owner}/speech`
pub async fn speech_handler(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    payload: Result<Json<SpeechRequest>, JsonRejection>,
) -> Response {
    let guard = RequestGuard::begin(&state.metrics);
    let result = synthesize(&state, owner, payload).await;
    finish(&state, "speech", &guard, result)
}

async fn synthesize(
    state: &AppState,
    owner: String,
    payload: Result<Json<SpeechRequest>, JsonRejection>,
) -> ApiResult {
    let request = json_body(payload)?;
    require("text", &request.text)?;
    known_voice(state, &request.voice_id)?;
    let settings = request.settings.resolve()?;

    let speech = &state.speech;
    let audio = state
        .tasks
        .run(owner, |token| async move {
            speech
                .text_to_speech(&request.voice_id, &request.text, settings, &token)
                .await
        })
        .await?;

    Ok((StatusCode::OK, [(CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

/// `POST /v1/owners/{owner}/narration`
pub async fn narration_handler(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    payload: Result<Json<NarrationRequest>, JsonRejection>,
) -> Response {
    let guard = RequestGuard::begin(&state.metrics);
    let result = narrate_script(&state, owner, payload).await;
    finish(&state, "narration", &guard, result)
}

async fn narrate_script(
    state: &AppState,
    owner: String,
    payload: Result<Json<NarrationRequest>, JsonRejection>,
) -> ApiResult {
    let request = json_body(payload)?;
    known_voice(state, &request.voice_id)?;
    let settings = request.settings.resolve()?;

    let speech = &state.speech;
    let narration = state
        .tasks
        .run(owner, |token| async move {
            narrate(speech, &request.voice_id, &request.script, settings, &token).await
        })
        .await?;

    let clips: Vec<_> = narration
        .clips
        .iter()
        .map(|clip| {
            serde_json::json!({
                "caption": clip.caption,
                "audio_base64": STANDARD.encode(&clip.audio),
            })
        })
        .collect();
    let failed: Vec<_> = narration
        .failed
        .iter()
        .map(|line| serde_json::json!({ "caption": line.caption, "reason": line.reason }))
        .collect();

    Ok(Json(serde_json::json!({ "clips": clips, "failed": failed })).into_response())
}

/// `DELETE /v1/owners/{owner}/task`
pub async fn cancel_handler(State(state): State<AppState>, Path(owner): Path<String>) -> Response {
    let guard = RequestGuard::begin(&state.metrics);
    let cancelled = state.tasks.cancel(&owner);
    let result = Ok(Json(serde_json::json!({ "cancelled": cancelled })).into_response());
    finish(&state, "cancel", &guard, result)
}

/// `GET /v1/voices?page=N`, zero-based
pub async fn voices_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    let guard = RequestGuard::begin(&state.metrics);
    let result = Ok(Json(state.voices.page(query.page)).into_response());
    finish(&state, "voices", &guard, result)
}
