//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::artifact_service::ArtifactError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(path) => ApiError::NotFound(format!("Artifact {} not found", path)),
            ArtifactError::InvalidPath(path) => ApiError::BadRequest(format!("Invalid path: {}", path)),
            ArtifactError::AlreadyExists(path) => {
                ApiError::Conflict(format!("Artifact {} already exists", path))
            }
            ArtifactError::Io(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_errors_map_to_statuses() {
        let status = |err: ArtifactError| ApiError::from(err).into_response().status();

        assert_eq!(status(ArtifactError::NotFound("a".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(ArtifactError::InvalidPath("..".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(ArtifactError::AlreadyExists("a".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(ArtifactError::Io(std::io::Error::other("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
