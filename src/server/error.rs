//! HTTP error mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::registry::ScheduleError;
use crate::screenshots::ScreenshotError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),

    #[error("Invalid request body: {0}")]
    Body(String),

    /// The capture ran and failed.
    #[error("{0}")]
    Capture(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Schedule(ScheduleError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Schedule(ScheduleError::Guard(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Schedule(_) | ApiError::Body(_) => StatusCode::BAD_REQUEST,
            ApiError::Screenshot(ScreenshotError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Screenshot(_) => StatusCode::NOT_FOUND,
            ApiError::Capture(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Capture(e) => serde_json::json!({ "success": false, "error": e }),
            other => serde_json::json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection.body_text())
    }
}
