use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Gateway failures, each mapped to the status code an IPFS client expects.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("malformed locator: {0}")]
    MalformedLocator(String),

    #[error("blob of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::MalformedLocator(_) | ServerError::InvalidUpload(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Filesystem details stay in the log.
        let message = match &self {
            ServerError::Io(e) => {
                tracing::error!(error = %e, "Blob storage I/O failure");
                "storage failure".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
