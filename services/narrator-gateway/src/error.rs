//! Per-request error type and its HTTP rendering
//!
//! Every handler failure becomes one `ApiError`, rendered as
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use key_rotation::InvocationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unknown voice: {0}")]
    UnknownVoice(String),

    #[error(transparent)]
    Media(#[from] media_api::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownVoice(_) => StatusCode::NOT_FOUND,
            ApiError::Media(media_api::Error::Invocation(e)) => match e {
                InvocationError::Cancelled => StatusCode::CONFLICT,
                InvocationError::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
                InvocationError::Fatal(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Media(media_api::Error::EmptyScript) => StatusCode::BAD_REQUEST,
            ApiError::Media(media_api::Error::Catalog(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `type` field in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) | ApiError::Media(media_api::Error::EmptyScript) => {
                "invalid_request"
            }
            ApiError::UnknownVoice(_) => "not_found",
            ApiError::Media(media_api::Error::Invocation(e)) => match e {
                InvocationError::Cancelled => "cancelled",
                InvocationError::Exhausted => "credentials_exhausted",
                InvocationError::Fatal(_) => "upstream_error",
            },
            ApiError::Media(media_api::Error::Catalog(_)) => "internal_error",
        }
    }

    pub fn into_response_with(self, request_id: &str) -> Response {
        error_response(self.status(), self.kind(), &self.to_string(), request_id)
    }
}

/// JSON error body with the request id for log correlation.
pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(e: InvocationError) -> ApiError {
        ApiError::Media(media_api::Error::Invocation(e))
    }

    #[test]
    fn status_mapping() {
        assert_eq!(invocation(InvocationError::Cancelled).status(), StatusCode::CONFLICT);
        assert_eq!(
            invocation(InvocationError::Exhausted).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            invocation(InvocationError::Fatal("400: bad".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::UnknownVoice("v".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Media(media_api::Error::EmptyScript).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn fatal_message_is_verbatim() {
        let err = invocation(InvocationError::Fatal("400: voice_not_found".into()));
        assert_eq!(err.to_string(), "upstream rejected request: 400: voice_not_found");
        assert_eq!(err.kind(), "upstream_error");
    }

    #[tokio::test]
    async fn rendered_body_has_all_fields() {
        let response = invocation(InvocationError::Exhausted).into_response_with("req_abc");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "credentials_exhausted");
        assert_eq!(json["error"]["message"], "all credentials exhausted");
        assert_eq!(json["error"]["request_id"], "req_abc");
    }
}
