//! Error type for the web front end and its rendering.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use photomatch_core::{PipelineError, UploadError};

use crate::engine::EngineError;
use crate::page;

pub const MSG_BOTH_REQUIRED: &str = "Please upload both images!";
pub const MSG_COMPARISON_FAILED: &str =
    "Could not compare these images. Please try again with different photos.";
pub const MSG_UNAVAILABLE: &str = "The comparison service is not available right now.";

/// Application-level error type.
#[derive(Debug)]
pub enum WebError {
    /// An upload was rejected before reaching the engine.
    Upload(UploadError),
    /// The multipart body could not be read.
    BadRequest(String),
    /// The engine returned an error or went away.
    Engine(EngineError),
}

impl WebError {
    /// Status code and the message shown to the user. Never includes paths
    /// or error chains; those only go to the log.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            WebError::Upload(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            WebError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                "The upload could not be read.".to_string(),
            ),
            WebError::Engine(EngineError::Pipeline(PipelineError::InputMissing(_))) => {
                (StatusCode::BAD_REQUEST, MSG_BOTH_REQUIRED.to_string())
            }
            WebError::Engine(EngineError::Pipeline(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_COMPARISON_FAILED.to_string(),
            ),
            WebError::Engine(EngineError::ChannelClosed | EngineError::Spawn(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                MSG_UNAVAILABLE.to_string(),
            ),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::info!(error = ?self, "request rejected");
        }
        (status, Html(page::error_page(&message))).into_response()
    }
}

impl From<UploadError> for WebError {
    fn from(e: UploadError) -> Self {
        WebError::Upload(e)
    }
}

impl From<EngineError> for WebError {
    fn from(e: EngineError) -> Self {
        WebError::Engine(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photomatch_core::{MatchError, MissingInput};
    use std::path::PathBuf;

    #[test]
    fn test_missing_input_is_bad_request() {
        let err = WebError::Engine(EngineError::Pipeline(PipelineError::InputMissing(
            MissingInput::Both,
        )));
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, MSG_BOTH_REQUIRED);
    }

    #[test]
    fn test_matching_error_hides_details() {
        let err = WebError::Engine(EngineError::Pipeline(PipelineError::Matching(
            MatchError::NoFaceDetected(PathBuf::from("/tmp/photomatch-abc.jpg")),
        )));
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("/tmp"));
    }

    #[test]
    fn test_staging_error_is_generic() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full at /var/tmp");
        let err = WebError::Engine(EngineError::Pipeline(PipelineError::Staging(io)));
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, MSG_COMPARISON_FAILED);
    }

    #[test]
    fn test_closed_engine_is_unavailable() {
        let (status, _) = WebError::Engine(EngineError::ChannelClosed).status_and_message();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
