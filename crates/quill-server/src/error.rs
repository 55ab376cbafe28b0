use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quill_core::journal::RowStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Stable JSON error shape returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Failures handled at the route boundary. Display strings are what clients
/// see, so they never include internal causes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Failed to encrypt data")]
    Encryption,

    /// Decryption or parsing of a stored field failed; the two are never
    /// distinguished to the client.
    #[error("Failed to decrypt data")]
    DataUnavailable,

    #[error("Failed to generate summary")]
    Summary,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Summary => StatusCode::BAD_GATEWAY,
            ApiError::Encryption | ApiError::DataUnavailable | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

impl From<RowStoreError> for ApiError {
    fn from(err: RowStoreError) -> Self {
        match err {
            RowStoreError::NotFound { .. } => ApiError::NotFound,
            RowStoreError::Storage { reason } => {
                error!(%reason, "row store failure");
                ApiError::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn renders_stable_json_shape() {
        let response = ApiError::DataUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: ErrorBody = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body, ErrorBody::new("Failed to decrypt data"));
    }

    #[test]
    fn storage_reasons_are_not_exposed() {
        let err: ApiError = RowStoreError::Storage {
            reason: "disk on fire at /var/lib/quill".into(),
        }
        .into();
        assert_eq!(err, ApiError::Internal);
        assert!(!err.to_string().contains("disk"));

        let missing: ApiError = RowStoreError::NotFound { id: Uuid::nil() }.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
