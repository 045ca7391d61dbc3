//! Error types for the cost accounting crate.

use thiserror::Error;

/// Cost accounting errors.
#[derive(Error, Debug)]
pub enum CostError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database locked error (retryable)
    #[error("database is locked (retry {retry_count}/{max_retries}): {message}")]
    DatabaseLocked {
        /// Retry attempt number
        retry_count: u32,
        /// Maximum retries allowed
        max_retries: u32,
        /// Human-readable message
        message: String,
    },

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A usage event failed validation
    #[error("invalid usage event: {0}")]
    Validation(String),

    /// Stored data could not be read back
    #[error("query error: {0}")]
    Query(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl CostError {
    /// Check if this error is retryable (e.g., database locked).
    pub fn is_retryable(&self) -> bool {
        is_database_locked_error(self)
    }

    /// Check if this error rejects the input rather than signalling a fault.
    pub fn is_validation(&self) -> bool {
        matches!(self, CostError::Validation(_))
    }

    /// Create a user-friendly message for this error.
    pub fn friendly_message(&self) -> String {
        match self {
            CostError::DatabaseLocked {
                retry_count,
                max_retries,
                ..
            } => {
                format!(
                    "Database is busy (attempt {}/{}). The operation will be retried.",
                    retry_count, max_retries
                )
            }
            CostError::Database(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    "Database is temporarily locked. Please try again.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            CostError::Validation(reason) => reason.clone(),
            _ => format!("Error: {}", self),
        }
    }
}

/// Check if a CostError indicates a database lock.
pub fn is_database_locked_error(error: &CostError) -> bool {
    match error {
        CostError::DatabaseLocked { .. } => true,
        CostError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
            e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
        }
        _ => false,
    }
}

/// Result type for cost accounting operations.
pub type Result<T> = std::result::Result<T, CostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_error_is_retryable() {
        let err = CostError::DatabaseLocked {
            retry_count: 1,
            max_retries: 5,
            message: "busy".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.friendly_message().contains("1/5"));
    }

    #[test]
    fn test_validation_error_passes_reason_through() {
        let err = CostError::Validation("Missing user_id or provider".to_string());
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert_eq!(err.friendly_message(), "Missing user_id or provider");
    }
}
