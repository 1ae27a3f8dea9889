//! Transport error types and their delivery classification.

use std::time::Duration;

use clarion_core::DeliveryError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking HTTP to a remote service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        /// Beginning of the response body.
        body: String,
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Returns `true` if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Client(_) | Self::InvalidResponse(_) => false,
            Self::Request(e) => is_retryable_reqwest_error(e),
            Self::Status { status, .. } => is_retryable_status(*status),
        }
    }

    /// The HTTP status, if the remote side answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

/// 5xx, 408 and 429 are worth retrying; every other status is not.
pub fn is_retryable_status(status: u16) -> bool {
    status == StatusCode::REQUEST_TIMEOUT.as_u16()
        || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
        || (500..600).contains(&status)
}

impl From<TransportError> for DeliveryError {
    fn from(error: TransportError) -> Self {
        match &error {
            TransportError::Status {
                status,
                retry_after,
                ..
            } if *status == StatusCode::TOO_MANY_REQUESTS.as_u16() => {
                DeliveryError::rate_limited(*retry_after, error.to_string())
            }
            _ if error.is_retryable() => DeliveryError::transient(error.to_string()),
            _ => DeliveryError::permanent(error.to_string()),
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, retry_after: Option<Duration>) -> TransportError {
        TransportError::Status {
            status,
            body: "nope".into(),
            retry_after,
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            DeliveryError::from(status(429, Some(Duration::from_secs(3)))),
            DeliveryError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            DeliveryError::from(status(503, None)),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            DeliveryError::from(status(408, None)),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            DeliveryError::from(status(401, None)),
            DeliveryError::Permanent(_)
        ));
        assert!(matches!(
            DeliveryError::from(TransportError::InvalidResponse("garbage".into())),
            DeliveryError::Permanent(_)
        ));
    }
}
