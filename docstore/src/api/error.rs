use reqwest::StatusCode;
use thiserror::Error;
use tree_mirror::StoreError;

use super::types::ErrorResponse;

#[derive(Error, Debug)]
pub enum DocStoreError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Entry already exists: {0}")]
    Conflict(String),

    #[error("Rate limited: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Content stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DocStoreError {
    /// Classify a failed response.
    ///
    /// `subject` names the entry or parent the request was about. A JSON
    /// error body supplies the message when the status carries no fixed one.
    pub fn from_status(status: StatusCode, subject: &str, body: &str, retry_after: Option<u64>) -> Self {
        let detail = serde_json::from_str::<ErrorResponse>(body).ok().map(|parsed| parsed.message);

        match status {
            StatusCode::UNAUTHORIZED => Self::Authentication(detail.unwrap_or_else(|| "Unauthorized".to_string())),
            StatusCode::FORBIDDEN => Self::Authorization(detail.unwrap_or_else(|| "Forbidden".to_string())),
            StatusCode::NOT_FOUND => Self::NotFound(subject.to_string()),
            StatusCode::CONFLICT => Self::Conflict(subject.to_string()),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimit { retry_after },
            status if status.is_client_error() => match detail {
                Some(message) => Self::Validation(message),
                None => Self::Server {
                    status: status.as_u16(),
                    message: body.to_string(),
                },
            },
            status if status.is_server_error() => Self::Server {
                status: status.as_u16(),
                message: body.to_string(),
            },
            _ => Self::Unknown(body.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DocStoreError::Network(_) => true,
            DocStoreError::Server { status, .. } if *status >= 500 => true,
            DocStoreError::RateLimit { .. } => true,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            DocStoreError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<DocStoreError> for StoreError {
    fn from(error: DocStoreError) -> Self {
        match error {
            DocStoreError::Conflict(name) => StoreError::AlreadyExists { name },
            DocStoreError::NotFound(what) => StoreError::NotFound(what),
            DocStoreError::Authentication(message) | DocStoreError::Authorization(message) => {
                StoreError::Unauthorized(message)
            }
            DocStoreError::Io(e) => StoreError::Io(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DocStoreError>;
