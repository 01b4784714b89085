//! Error types for every external collaborator and the handler-facing
//! [`ServiceError`] that HTTP dispatch converts into a response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures talking to the key-value cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache value is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Failures talking to the message broker.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A finite read timeout elapsed with no message.
    #[error("read timed out")]
    TimedOut,
    /// The broker or subscription was closed.
    #[error("queue closed")]
    Closed,
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("message is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Failures of outbound HTTP calls made through the requester.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The remote answered with a 4xx/5xx status.
    #[error("remote responded {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Error type returned by service handlers.
///
/// Contract violations map to 4xx responses; everything else is a 500.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("malformed payload: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidArgument(_) | Self::Codec(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Cache(_) | Self::Queue(_) | Self::Request(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result alias used by handlers and runtime helpers.
pub type ServiceResult<T = ()> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_client_errors() {
        assert_eq!(
            ServiceError::BadRequest("task_id is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::NotFound("ref".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn infrastructure_errors_are_server_errors() {
        let err: ServiceError = CacheError::Unavailable("down".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let err: ServiceError = QueueError::Closed.into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_carries_message() {
        let resp = ServiceError::BadRequest("missing ref".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn only_timeouts_are_timeouts() {
        assert!(QueueError::TimedOut.is_timeout());
        assert!(!QueueError::Closed.is_timeout());
    }
}
