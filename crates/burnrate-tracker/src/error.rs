//! Error types for the usage tracker.

use thiserror::Error;

/// Tracker errors.
///
/// Errors from the wrapped provider call are never converted into this
/// type; `track` hands them back untouched.
#[derive(Debug, Error)]
pub enum TrackerError {
    // ============ Delivery ============
    /// The ingestion endpoint answered with a non-success status
    #[error("delivery rejected with HTTP {status}: {body}")]
    DeliveryRejected {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The ingestion endpoint could not be reached
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Delivery timed out
    #[error("delivery timed out after {0}s")]
    Timeout(u64),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ============ Setup ============
    /// Invalid tracker configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TrackerError {
    /// Check if the batch should be re-queued and retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::DeliveryRejected { .. }
            | TrackerError::DeliveryFailed(_)
            | TrackerError::Timeout(_)
            | TrackerError::Http(_) => true,
            TrackerError::Json(_) | TrackerError::Configuration(_) => false,
        }
    }

    /// Check if this error is a delivery failure.
    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self,
            TrackerError::DeliveryRejected { .. }
                | TrackerError::DeliveryFailed(_)
                | TrackerError::Timeout(_)
                | TrackerError::Http(_)
        )
    }

    /// Get a user-friendly error message.
    pub fn friendly_message(&self) -> String {
        match self {
            TrackerError::DeliveryRejected { status: 401 | 403, .. } => {
                "Ingestion endpoint rejected the API key.".to_string()
            }
            TrackerError::DeliveryRejected { status, .. } => {
                format!("Ingestion endpoint returned HTTP {}. Usage will be retried.", status)
            }
            TrackerError::Timeout(secs) => {
                format!("Ingestion endpoint did not answer within {}s. Usage will be retried.", secs)
            }
            TrackerError::DeliveryFailed(_) | TrackerError::Http(_) => {
                "Could not reach the ingestion endpoint. Usage will be retried.".to_string()
            }
            TrackerError::Configuration(msg) => format!("Tracker configuration error: {}", msg),
            _ => format!("Error: {}", self),
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            TrackerError::Timeout(timeout_secs)
        } else if err.is_connect() {
            TrackerError::DeliveryFailed(format!("connection failed: {}", err))
        } else {
            TrackerError::Http(err)
        }
    }
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
