use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use flowlens_core::error::{ArtifactError, FlowLensError, SessionError};

/// Application error type that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    FlowLens(FlowLensError),
    Internal(String),
}

impl From<FlowLensError> for AppError {
    fn from(err: FlowLensError) -> Self {
        AppError::FlowLens(err)
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::FlowLens(err.into())
    }
}

impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        AppError::FlowLens(err.into())
    }
}

impl AppError {
    pub fn session_not_found(session_id: &str) -> Self {
        AppError::NotFound(format!("Session {session_id} not found"))
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::FlowLens(FlowLensError::Event(_)) => StatusCode::BAD_REQUEST,
            AppError::FlowLens(FlowLensError::Session(_)) => StatusCode::CONFLICT,
            AppError::FlowLens(FlowLensError::Artifact(_)) => StatusCode::BAD_GATEWAY,
            AppError::FlowLens(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Internal(msg) => msg.clone(),
            AppError::FlowLens(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(%status, %message, "request failed");
        }

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
