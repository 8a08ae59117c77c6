//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::core::BrokerError;

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed body or query string.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Broker-level failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Broker(err) => match err {
                BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
                BrokerError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
                BrokerError::QueueFull { .. } | BrokerError::Shutdown | BrokerError::Canceled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                BrokerError::AlreadyPublished(_)
                | BrokerError::InvalidConfig(_)
                | BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Broker(err) => match err {
                BrokerError::NotFound(_) => "not_found",
                BrokerError::Timeout(_) => "timeout",
                BrokerError::QueueFull { .. } => "overloaded",
                BrokerError::Shutdown | BrokerError::Canceled => "unavailable",
                BrokerError::AlreadyPublished(_)
                | BrokerError::InvalidConfig(_)
                | BrokerError::Internal(_) => "internal",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
            }
        }));
        (self.status(), body).into_response()
    }
}
