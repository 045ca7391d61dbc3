//! End-to-end tests through the HTTP router.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use burnrate_collector::CollectorConfig;
use burnrate_cost::{Credential, PollError, UsageDatabase, UsageEvent, UsageStore, pricing};
use burnrate_server::{AlertMonitor, AppState, BurnrateConfig, build_router};
use burnrate_tracker::{FlushOutcome, TrackerConfig, UsageTracker};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

fn state_with(db: &Arc<UsageDatabase>, config: BurnrateConfig) -> AppState {
    AppState::with_store(config, db.clone()).unwrap()
}

fn test_state(db: &Arc<UsageDatabase>) -> AppState {
    state_with(db, BurnrateConfig::with_database_path(":memory:"))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let (status, body) = send(build_router(test_state(&db)), get("/api/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_batch_with_missing_user_is_partially_stored() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let payload = json!({"metrics": [
        {"user_id": "u1", "provider": "openai", "model": "gpt-4o", "tokens_input": 100, "tokens_output": 50, "cost": 0.001},
        {"provider": "openai", "model": "gpt-4o", "tokens_input": 10}
    ]});

    let (status, body) = send(
        build_router(test_state(&db)),
        post_json("/api/v1/track-usage", &payload.to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["inserted"], 1);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["index"], 1);
    assert_eq!(body["errors"][0]["entry"], payload["metrics"][1]);
    assert_eq!(db.count_usage_events().unwrap(), 1);
}

#[tokio::test]
async fn test_non_json_body_is_400() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let (status, body) = send(
        build_router(test_state(&db)),
        post_json("/api/v1/track-usage", "this is not json"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
    assert_eq!(db.count_usage_events().unwrap(), 0);
}

#[tokio::test]
async fn test_cors_preflight_is_allowed() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/track-usage")
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();

    let response = build_router(test_state(&db)).oneshot(request).await.unwrap();
    assert!(response.status().is_success());
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_stats_for_owner() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let now = Utc::now();
    db.insert_usage_event(
        &UsageEvent::new("team-a", "openai", "gpt-4o", 1000, 500, 2.0).at(now - Duration::minutes(10)),
    )
    .unwrap();
    db.insert_usage_event(
        &UsageEvent::new("team-a", "anthropic", "claude-3-haiku", 100, 100, 1.0)
            .at(now - Duration::hours(5)),
    )
    .unwrap();
    db.insert_usage_event(&UsageEvent::new("team-b", "openai", "gpt-4o", 1, 1, 9.0).at(now))
        .unwrap();

    let config = BurnrateConfig::with_database_path(":memory:").with_default_budget(100.0);
    let (status, body) = send(
        build_router(state_with(&db, config)),
        get("/api/v1/stats?user_id=team-a"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["event_count"], 2);
    assert_eq!(body["stats"]["by_provider"][0]["provider"], "openai");
    assert!((body["burn_rate"]["last_hour"].as_f64().unwrap() - 2.0).abs() < 1e-9);
    assert!((body["burn_rate"]["last_24_hours"].as_f64().unwrap() - 3.0).abs() < 1e-9);
    assert_eq!(body["budget"]["monthly_budget"], 100.0);
}

#[tokio::test]
async fn test_owner_is_required() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let router = build_router(test_state(&db));

    for uri in ["/api/v1/stats", "/api/v1/alerts?user_id=", "/api/v1/recommendations"] {
        let (status, body) = send(router.clone(), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn test_alerts_reflect_last_evaluation() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let now = Utc::now();
    db.insert_usage_event(
        &UsageEvent::new("team-a", "openai", "gpt-4", 0, 0, 15.0).at(now - Duration::minutes(2)),
    )
    .unwrap();

    let state = test_state(&db);
    let router = build_router(state.clone());

    let (_, before) = send(router.clone(), get("/api/v1/alerts?user_id=team-a")).await;
    assert!(before["alerts"].as_array().unwrap().is_empty());

    AlertMonitor::new(&state).run_once(now).unwrap();

    let (status, after) = send(router, get("/api/v1/alerts?user_id=team-a")).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = after["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"rapid_burst"));
}

#[tokio::test]
async fn test_recommendations_are_ranked() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let now = Utc::now();
    db.insert_usage_event(
        &UsageEvent::new("team-a", "openai", "gpt-4", 400_000, 200_000, 24.0).at(now - Duration::hours(2)),
    )
    .unwrap();
    db.insert_usage_event(
        &UsageEvent::new("team-a", "anthropic", "claude-3-haiku", 1000, 1000, 1.0)
            .at(now - Duration::hours(3)),
    )
    .unwrap();

    let (status, body) = send(
        build_router(test_state(&db)),
        get("/api/v1/recommendations?user_id=team-a"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let recommendations = body["recommendations"].as_array().unwrap();
    assert!(!recommendations.is_empty());

    let savings: Vec<f64> = recommendations
        .iter()
        .map(|r| r["estimated_saving"].as_f64().unwrap())
        .collect();
    assert!(savings.windows(2).all(|w| w[0] >= w[1]));

    let kinds: Vec<&str> = recommendations
        .iter()
        .map(|r| r["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"model_downgrade"));
    assert!(kinds.contains(&"prompt_caching"));
}

#[tokio::test]
async fn test_recommendations_empty_without_history() {
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let (status, body) = send(
        build_router(test_state(&db)),
        get("/api/v1/recommendations?user_id=nobody"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["recommendations"].as_array().unwrap().is_empty());
    assert_eq!(body["total_estimated_saving"], 0.0);
}

#[tokio::test]
async fn test_poll_route_runs_collector() {
    let provider = MockServer::start().await;
    Mock::given(matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&provider)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    db.insert_credential("team-a", "groq", "gsk-1").unwrap();

    let config = BurnrateConfig::with_database_path(":memory:")
        .with_collector(CollectorConfig::new().with_base_url(provider.uri()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/poll")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(build_router(state_with(&db, config)), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["results"][0]["status"], "sdk_required");
    assert_eq!(body["total_inserted"], 0);
}

#[tokio::test]
async fn test_tracker_delivers_to_live_server() {
    burnrate_core::logging::init_test_logging();
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let router = build_router(test_state(&db));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let config = TrackerConfig::new(
        format!("http://{}/api/v1/track-usage", address),
        "ingest-key",
        "team-a",
    )
    .with_request_timeout(std::time::Duration::from_secs(5));
    let tracker = UsageTracker::new(config).unwrap();

    tracker.enqueue(UsageEvent::new(
        "team-a",
        "openai",
        "gpt-4o",
        1000,
        1000,
        pricing::cost("openai", "gpt-4o", 1000, 1000),
    ));
    tracker.enqueue(UsageEvent::new("team-a", "", "gpt-4o", 10, 10, 0.0));

    match tracker.flush().await.unwrap() {
        FlushOutcome::Delivered(report) => {
            assert_eq!(report.inserted, 1);
            assert_eq!(report.rejected.len(), 1);
            assert_eq!(report.rejected[0].index, Some(1));
        }
        other => panic!("expected a delivery, got {:?}", other),
    }
    assert_eq!(tracker.queued(), 0);

    let events = db
        .usage_events_between("team-a", Utc::now() - Duration::hours(1), Utc::now())
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].cost, pricing::cost("openai", "gpt-4o", 1000, 1000));

    server.abort();
}

/// Store whose usage reads hold the calling thread.
struct SlowStore {
    db: Arc<UsageDatabase>,
    delay: std::time::Duration,
}

impl UsageStore for SlowStore {
    fn insert_usage_event(&self, event: &UsageEvent) -> burnrate_cost::Result<i64> {
        self.db.insert_usage_event(event)
    }

    fn insert_poll_error(&self, error: &PollError) -> burnrate_cost::Result<i64> {
        self.db.insert_poll_error(error)
    }

    fn select_active_credentials(&self) -> burnrate_cost::Result<Vec<Credential>> {
        self.db.select_active_credentials()
    }

    fn update_credential_last_used(&self, credential_id: i64, at: DateTime<Utc>) -> burnrate_cost::Result<()> {
        self.db.update_credential_last_used(credential_id, at)
    }

    fn usage_events_between(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> burnrate_cost::Result<Vec<UsageEvent>> {
        std::thread::sleep(self.delay);
        self.db.usage_events_between(owner_id, since, until)
    }

    fn owners_with_usage_since(&self, since: DateTime<Utc>) -> burnrate_cost::Result<Vec<String>> {
        self.db.owners_with_usage_since(since)
    }
}

#[tokio::test]
async fn test_slow_store_does_not_stall_other_requests() {
    let store = Arc::new(SlowStore {
        db: Arc::new(UsageDatabase::open_in_memory().unwrap()),
        delay: std::time::Duration::from_millis(500),
    });
    let state = AppState::with_store(BurnrateConfig::with_database_path(":memory:"), store).unwrap();
    let router = build_router(state);

    let started = std::time::Instant::now();
    let slow = tokio::spawn(send(router.clone(), get("/api/v1/stats?user_id=team-a")));
    tokio::task::yield_now().await;

    let (status, _) = send(router, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() < std::time::Duration::from_millis(400));

    let (status, body) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["event_count"], 0);
}
