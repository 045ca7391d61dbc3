pub mod alerts;
pub mod health;
pub mod poll;
pub mod recommendations;
pub mod stats;

use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::{ApiError, ApiErrorResponse};

/// `?user_id=` selector shared by the per-owner routes.
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub user_id: Option<String>,
    /// Lookback in days, where the route supports one
    pub days: Option<i64>,
}

impl OwnerQuery {
    pub fn owner(&self) -> Result<&str, ApiErrorResponse> {
        match self.user_id.as_deref().map(str::trim) {
            Some(owner) if !owner.is_empty() => Ok(owner),
            _ => Err((
                StatusCode::BAD_REQUEST,
                ApiError::bad_request("user_id query parameter is required"),
            )
                .into()),
        }
    }

    pub fn days_or(&self, default: i64) -> Result<i64, ApiErrorResponse> {
        match self.days {
            None => Ok(default),
            Some(days) if days > 0 => Ok(days),
            Some(_) => Err((
                StatusCode::BAD_REQUEST,
                ApiError::bad_request("days must be a positive number"),
            )
                .into()),
        }
    }
}
