use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tts_core::TtsError;

/// Wraps any error that can reach an HTTP handler, grounded on
/// `dog_axum::error::DogAxumError`. Normalizes to a `TtsError` so the
/// response body always has the `{error_code, error_message}` shape
/// spec.md §6 defines for a result's error outcome, reused here for HTTP.
#[derive(Debug)]
pub struct WebError(pub anyhow::Error);

impl From<anyhow::Error> for WebError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<TtsError> for WebError {
    fn from(e: TtsError) -> Self {
        Self(e.into_anyhow())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let tts = TtsError::normalize(self.0);
        let safe = tts.sanitize_for_client();
        let status = StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(safe.to_json())).into_response()
    }
}
