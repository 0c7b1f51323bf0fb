use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("POLICY_DENIED: {0}")]
    Policy(String),
    #[error("NOTE_LOCKED: {0}")]
    Locked(String),
    #[error("PASSPHRASE_REQUIRED: {0}")]
    PassphraseRequired(String),
    #[error("DECRYPTION_FAILED: {0}")]
    Decryption(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PassphraseRequired(_) => StatusCode::BAD_REQUEST,
            Self::Policy(_) | Self::Decryption(_) => StatusCode::FORBIDDEN,
            Self::Locked(_) => StatusCode::LOCKED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal Server Error".to_string()
        } else {
            match &self {
                Self::Validation(detail)
                | Self::Policy(detail)
                | Self::Locked(detail)
                | Self::PassphraseRequired(detail)
                | Self::Decryption(detail)
                | Self::NotFound(detail) => detail.clone(),
                _ => self.to_string(),
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
