//! Usage ingestion.
//!
//! Accepts either `{"metrics": [...]}` or a single event object. Each entry
//! is decoded, validated and stored on its own, so one bad entry never
//! prevents the rest of the batch from being persisted.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use burnrate_core::log_usage_event;
use burnrate_cost::{CallMetadata, UsageEvent, UsageStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ApiErrorResponse;
use crate::state::AppState;

/// Model recorded when the producer does not name one.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Result of one ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub inserted: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IngestError>,
}

/// A rejected entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestError {
    /// Position of the entry in the batch
    pub index: usize,
    /// The entry as it was received
    pub entry: Value,
    pub error: String,
}

/// Wire shape of an entry; everything is optional so that defaults and
/// per-field errors can be applied here rather than by the decoder.
#[derive(Debug, Deserialize)]
struct IncomingEvent {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tokens_input: Option<i64>,
    #[serde(default)]
    tokens_output: Option<i64>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<CallMetadata>,
}

/// Split a request body into its entries.
fn entries(body: &Value) -> Vec<&Value> {
    match body.get("metrics").and_then(Value::as_array) {
        Some(metrics) => metrics.iter().collect(),
        None => vec![body],
    }
}

/// Turn one wire entry into a usage event.
pub fn decode_entry(entry: &Value, now: DateTime<Utc>) -> Result<UsageEvent, String> {
    let incoming = IncomingEvent::deserialize(entry).map_err(|e| e.to_string())?;

    let owner_id = incoming.user_id.unwrap_or_default();
    let provider = incoming.provider.unwrap_or_default();
    if owner_id.trim().is_empty() || provider.trim().is_empty() {
        return Err("Missing user_id or provider".to_string());
    }

    let model = incoming
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_MODEL.to_string());

    let mut event = UsageEvent::new(
        owner_id,
        provider,
        model,
        incoming.tokens_input.unwrap_or(0),
        incoming.tokens_output.unwrap_or(0),
        incoming.cost.unwrap_or(0.0),
    )
    .at(incoming.timestamp.unwrap_or(now));
    event.metadata = incoming.metadata;

    event.validate().map_err(|e| e.to_string())?;
    Ok(event)
}

/// Validate and store every entry of a request body.
pub fn ingest(store: &dyn UsageStore, body: &Value, now: DateTime<Utc>) -> IngestResponse {
    let mut inserted = 0;
    let mut errors = Vec::new();

    for (index, entry) in entries(body).into_iter().enumerate() {
        let stored = decode_entry(entry, now).and_then(|event| {
            store
                .insert_usage_event(&event)
                .map(|_| event)
                .map_err(|e| e.to_string())
        });

        match stored {
            Ok(event) => {
                log_usage_event!(
                    owner = %event.owner_id,
                    provider = %event.provider,
                    model = %event.model,
                    input_tokens = event.input_tokens,
                    output_tokens = event.output_tokens,
                    cost = event.cost
                );
                inserted += 1;
            }
            Err(error) => {
                debug!(index, error = %error, "Rejected usage entry");
                errors.push(IngestError {
                    index,
                    entry: entry.clone(),
                    error,
                });
            }
        }
    }

    if !errors.is_empty() {
        warn!(inserted, rejected = errors.len(), "Usage batch partially rejected");
    }

    IngestResponse {
        success: true,
        inserted,
        errors,
    }
}

/// `POST /api/v1/track-usage`
pub async fn track_usage(State(state): State<AppState>, body: Bytes) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": format!("Request body is not valid JSON: {}", e),
                })),
            )
                .into_response();
        }
    };

    let store = state.store.clone();
    let now = Utc::now();
    match tokio::task::spawn_blocking(move || ingest(store.as_ref(), &body, now)).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => ApiErrorResponse::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burnrate_cost::UsageDatabase;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn stored(db: &UsageDatabase, owner: &str) -> Vec<UsageEvent> {
        db.usage_events_between(owner, now() - Duration::days(365), now() + Duration::days(1))
            .unwrap()
    }

    #[test]
    fn test_batch_with_one_bad_entry() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let body = json!({"metrics": [
            {"user_id": "u1", "provider": "openai", "model": "gpt-4o", "tokens_input": 1000, "tokens_output": 500, "cost": 0.0125},
            {"provider": "openai", "model": "gpt-4o"}
        ]});

        let response = ingest(&db, &body, now());
        assert!(response.success);
        assert_eq!(response.inserted, 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].index, 1);
        assert_eq!(response.errors[0].entry, body["metrics"][1]);
        assert_eq!(response.errors[0].error, "Missing user_id or provider");
        assert_eq!(stored(&db, "u1").len(), 1);
    }

    #[test]
    fn test_single_object_body_and_defaults() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let response = ingest(&db, &json!({"user_id": "u1", "provider": "groq"}), now());

        assert_eq!(response.inserted, 1);
        assert!(response.errors.is_empty());

        let events = stored(&db, "u1");
        assert_eq!(events[0].model, UNKNOWN_MODEL);
        assert_eq!(events[0].input_tokens, 0);
        assert_eq!(events[0].output_tokens, 0);
        assert_eq!(events[0].cost, 0.0);
        assert_eq!(events[0].timestamp, now());
    }

    #[test]
    fn test_producer_timestamp_and_metadata_are_kept() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let body = json!({
            "user_id": "u1",
            "provider": "anthropic",
            "model": "claude-3-haiku",
            "tokens_input": 10,
            "tokens_output": 5,
            "cost": 0.001,
            "timestamp": "2025-03-09T08:30:00Z",
            "metadata": {"latency_ms": 420, "response_status": "success", "region": "eu"}
        });

        assert_eq!(ingest(&db, &body, now()).inserted, 1);

        let event = &stored(&db, "u1")[0];
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2025, 3, 9, 8, 30, 0).unwrap());
        let metadata = event.metadata.as_ref().unwrap();
        assert_eq!(metadata.latency_ms, Some(420));
        assert_eq!(metadata.extra["region"], "eu");
    }

    #[test]
    fn test_negative_and_mistyped_entries_are_rejected() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let body = json!({"metrics": [
            {"user_id": "u1", "provider": "openai", "tokens_input": -5},
            {"user_id": "u1", "provider": "openai", "cost": -0.5},
            {"user_id": "u1", "provider": "openai", "tokens_output": "many"},
            {"user_id": "u1", "provider": "openai", "metadata": {"response_status": "timeout"}},
            {"user_id": "", "provider": "openai"}
        ]});

        let response = ingest(&db, &body, now());
        assert_eq!(response.inserted, 0);
        let indexes: Vec<usize> = response.errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert!(response.errors[0].error.contains("negative"));
        assert_eq!(db.count_usage_events().unwrap(), 0);
    }

    #[test]
    fn test_empty_batch() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let response = ingest(&db, &json!({"metrics": []}), now());
        assert_eq!(response.inserted, 0);
        assert!(response.errors.is_empty());

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire, json!({"success": true, "inserted": 0}));
    }
}
