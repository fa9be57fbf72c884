use axum::response::{IntoResponse, Response};
use axum::Json;
use dvr_core::DvrError;
use http::StatusCode;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(err) => {
                error!(error = %err, "dvr request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<DvrError> for ApiError {
    fn from(err: DvrError) -> Self {
        match err {
            DvrError::JobNotFound { .. } | DvrError::RecordingNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            DvrError::InvalidWindow { .. } | DvrError::InvalidStatus(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
