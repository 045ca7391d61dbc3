//! Error types for the poll collector.

use burnrate_cost::CostError;
use thiserror::Error;

/// A failed poll of one provider usage API.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the credential
    #[error("{provider} API error: {status} - {body}")]
    Unauthorized {
        provider: String,
        status: u16,
        body: String,
    },

    /// Any other non-success status
    #[error("{provider} API error: {status} - {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    /// Request timed out
    #[error("{provider} API timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    /// Connection or protocol failure
    #[error("{provider} API request failed: {message}")]
    Transport { provider: String, message: String },

    /// Response body did not match the expected shape
    #[error("{provider} API returned an unexpected response: {message}")]
    Decode { provider: String, message: String },
}

impl ProviderError {
    /// Classify a non-success HTTP status.
    pub fn from_http_status(provider: &str, status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Unauthorized {
                provider: provider.to_string(),
                status,
                body,
            },
            _ => ProviderError::Status {
                provider: provider.to_string(),
                status,
                body,
            },
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_transport(provider: &str, err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
                secs: timeout_secs,
            }
        } else if err.is_decode() {
            ProviderError::Decode {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            ProviderError::Transport {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// True when the credential itself was rejected.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ProviderError::Unauthorized { .. })
    }

    /// True for failures that may succeed on the next scheduled run.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::Transport { .. } => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Unauthorized { .. } | ProviderError::Decode { .. } => false,
        }
    }
}

/// Failures that abort a whole poll run.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Credentials could not be read from the store
    #[error("failed to load credentials: {0}")]
    Store(#[from] CostError),

    /// Invalid collector configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A blocking store task panicked or was cancelled
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CollectorError {
    /// Get a user-friendly error message.
    pub fn friendly_message(&self) -> String {
        match self {
            CollectorError::Store(e) => e.friendly_message(),
            CollectorError::Configuration(msg) => format!("Collector configuration error: {}", msg),
            CollectorError::Task(e) => format!("Collector store task failed: {}", e),
        }
    }
}

/// Result type for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses() {
        for status in [401, 403] {
            let err = ProviderError::from_http_status("OpenAI", status, "nope".to_string());
            assert!(err.is_auth_error());
            assert!(!err.is_retryable());
            assert!(err.to_string().contains(&status.to_string()));
        }
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = ProviderError::from_http_status("Anthropic", 502, String::new());
        assert!(!err.is_auth_error());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Anthropic API error: 502 - ");
    }
}
