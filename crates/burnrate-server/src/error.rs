use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use burnrate_collector::CollectorError;
use burnrate_cost::CostError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while starting the service.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] burnrate_core::BurnrateError),

    #[error(transparent)]
    Store(#[from] CostError),

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message).retryable()
    }

    pub fn store(err: &CostError) -> (StatusCode, Self) {
        match err {
            CostError::DatabaseLocked { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Self::new("STORE_BUSY", err.friendly_message()).retryable(),
            ),
            CostError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                Self::new("VALIDATION_ERROR", err.to_string()),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Self::new("STORE_ERROR", err.to_string()).retryable(),
            ),
        }
    }
}

#[derive(Debug)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.error).unwrap_or_default();
        (self.status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<(StatusCode, ApiError)> for ApiErrorResponse {
    fn from((status, error): (StatusCode, ApiError)) -> Self {
        Self { status, error }
    }
}

impl From<CostError> for ApiErrorResponse {
    fn from(err: CostError) -> Self {
        ApiError::store(&err).into()
    }
}

impl From<tokio::task::JoinError> for ApiErrorResponse {
    fn from(err: tokio::task::JoinError) -> Self {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::internal(format!("Store task failed: {}", err)),
        )
            .into()
    }
}

impl From<CollectorError> for ApiErrorResponse {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Store(store) => store.into(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::internal(other.friendly_message()),
            )
                .into(),
        }
    }
}
