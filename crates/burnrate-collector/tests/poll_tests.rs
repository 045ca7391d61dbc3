//! Poll runs against mocked provider usage APIs.

use burnrate_collector::{CollectorConfig, PollCollector, PollStatus};
use burnrate_cost::{CostError, Credential, PollError, UsageDatabase, UsageEvent, UsageStore, pricing};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

fn collector(server: &MockServer, db: &Arc<UsageDatabase>) -> PollCollector {
    let config = CollectorConfig::new()
        .with_base_url(server.uri())
        .with_timeout_secs(5);
    PollCollector::new(db.clone(), config).unwrap()
}

/// Start of the hour `hours_ago` hours before the current one.
fn hour_start(hours_ago: i64) -> chrono::DateTime<Utc> {
    Utc::now().duration_trunc(Duration::hours(1)).unwrap() - Duration::hours(hours_ago)
}

#[tokio::test]
async fn test_no_active_keys() {
    let server = MockServer::start().await;
    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());

    let report = collector(&server, &db).run().await.unwrap();
    assert!(report.success);
    assert!(report.results.is_empty());
    assert_eq!(report.message.as_deref(), Some("No active API keys found"));
}

#[tokio::test]
async fn test_sdk_only_and_unknown_providers_make_no_requests() {
    let server = MockServer::start().await;
    Mock::given(matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    db.insert_credential("team-a", "groq", "gsk-1").unwrap();
    db.insert_credential("team-a", "google", "AIza-1").unwrap();
    db.insert_credential("team-a", "mistral", "m-1").unwrap();

    let report = collector(&server, &db).run().await.unwrap();
    assert_eq!(report.with_status(PollStatus::SdkRequired).count(), 2);
    let unknown: Vec<_> = report.with_status(PollStatus::UnknownProvider).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].provider, "mistral");
    assert!(unknown[0].message.as_deref().unwrap().contains("not supported"));
    assert_eq!(report.total_inserted, 0);
}

#[tokio::test]
async fn test_openai_buckets_become_usage_events() {
    let server = MockServer::start().await;
    let start = hour_start(3);
    let end = start + Duration::hours(1);

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organization/usage/completions"))
        .and(matchers::header("authorization", "Bearer sk-admin-1"))
        .and(matchers::query_param("bucket_width", "1h"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "page",
            "data": [{
                "object": "bucket",
                "start_time": start.timestamp(),
                "end_time": end.timestamp(),
                "results": [
                    {"model": "gpt-4o", "input_tokens": 2000, "output_tokens": 1000},
                    {"model": "gpt-4o-mini", "input_tokens": 10000, "output_tokens": 0}
                ]
            }],
            "has_more": false,
            "next_page": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let key = db.insert_credential("team-a", "openai", "sk-admin-1").unwrap();

    let report = collector(&server, &db).run().await.unwrap();
    assert_eq!(report.total_inserted, 2);
    assert_eq!(report.results[0].status, PollStatus::Success);
    assert_eq!(report.results[0].entries, Some(2));

    let events = db
        .usage_events_between("team-a", start - Duration::minutes(1), Utc::now())
        .unwrap();
    assert_eq!(events.len(), 2);
    let gpt4o = events.iter().find(|e| e.model == "gpt-4o").unwrap();
    assert_eq!(gpt4o.timestamp, start);
    assert_eq!(gpt4o.cost, pricing::cost("openai", "gpt-4o", 2000, 1000));

    assert!(db.get_credential(key).unwrap().unwrap().last_used.is_some());
}

#[tokio::test]
async fn test_second_run_does_not_duplicate_buckets() {
    let server = MockServer::start().await;
    let start = hour_start(2);

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organizations/usage_report/messages"))
        .and(matchers::header("x-api-key", "sk-ant-admin-1"))
        .and(matchers::header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "starting_at": start.to_rfc3339(),
                "ending_at": (start + Duration::hours(1)).to_rfc3339(),
                "results": [{
                    "model": "claude-3-haiku",
                    "uncached_input_tokens": 4000,
                    "cache_read_input_tokens": 0,
                    "output_tokens": 800
                }]
            }],
            "has_more": false,
            "next_page": null
        })))
        .expect(2)
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    db.insert_credential("team-a", "anthropic", "sk-ant-admin-1").unwrap();
    let collector = collector(&server, &db);

    assert_eq!(collector.run().await.unwrap().total_inserted, 1);
    assert_eq!(collector.run().await.unwrap().total_inserted, 0);
    assert_eq!(db.count_usage_events().unwrap(), 1);
}

#[tokio::test]
async fn test_unauthorized_key_gets_hint_and_poll_error() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organization/usage/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid admin key"))
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let key = db.insert_credential("team-a", "openai", "sk-project-key").unwrap();

    let report = collector(&server, &db).run().await.unwrap();
    let result = &report.results[0];
    assert_eq!(result.status, PollStatus::Error);
    assert!(result.message.as_deref().unwrap().contains("401"));
    assert!(result.hint.as_deref().unwrap().contains("Admin API key"));

    let errors = db.poll_errors("team-a").unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].credential_id, key);
    assert!(db.get_credential(key).unwrap().unwrap().last_used.is_none());
}

#[tokio::test]
async fn test_server_error_has_no_hint() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    db.insert_credential("team-a", "anthropic", "sk-ant-admin-1").unwrap();

    let report = collector(&server, &db).run().await.unwrap();
    assert_eq!(report.results[0].status, PollStatus::Error);
    assert!(report.results[0].hint.is_none());
}

#[tokio::test]
async fn test_deactivated_credential_is_skipped_next_run() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organization/usage/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [], "has_more": false})))
        .expect(1)
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let key = db.insert_credential("team-a", "openai", "sk-admin-1").unwrap();
    let collector = collector(&server, &db);

    assert_eq!(collector.run().await.unwrap().results.len(), 1);

    db.set_credential_active(key, false).unwrap();
    let report = collector.run().await.unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.message.as_deref(), Some("No active API keys found"));
}

#[tokio::test]
async fn test_each_credential_outcome_is_independent() {
    let server = MockServer::start().await;
    let start = hour_start(4);
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organization/usage/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "start_time": start.timestamp(),
                "end_time": (start + Duration::hours(1)).timestamp(),
                "results": [{"model": "gpt-4", "input_tokens": 100, "output_tokens": 100}]
            }],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organizations/usage_report/messages"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    db.insert_credential("team-a", "openai", "sk-admin-1").unwrap();
    db.insert_credential("team-b", "anthropic", "sk-ant-api-1").unwrap();
    db.insert_credential("team-c", "deepseek", "ds-1").unwrap();

    let report = collector(&server, &db).run().await.unwrap();
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.with_status(PollStatus::Success).count(), 1);
    assert_eq!(report.with_status(PollStatus::Error).count(), 1);
    assert_eq!(report.with_status(PollStatus::SdkRequired).count(), 1);
    assert_eq!(report.total_inserted, 1);
}

/// Store that rejects one model's rows while `failing` is set.
struct RejectingStore {
    db: Arc<UsageDatabase>,
    model: &'static str,
    failing: AtomicBool,
}

impl UsageStore for RejectingStore {
    fn insert_usage_event(&self, event: &UsageEvent) -> burnrate_cost::Result<i64> {
        if self.failing.load(Ordering::SeqCst) && event.model == self.model {
            return Err(CostError::Query("disk full".to_string()));
        }
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
        self.db.usage_events_between(owner_id, since, until)
    }

    fn owners_with_usage_since(&self, since: DateTime<Utc>) -> burnrate_cost::Result<Vec<String>> {
        self.db.owners_with_usage_since(since)
    }
}

#[tokio::test]
async fn test_failed_store_holds_cursor_until_rows_land() {
    let server = MockServer::start().await;
    let first = hour_start(3);
    let second = hour_start(2);
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/v1/organization/usage/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "start_time": first.timestamp(),
                    "end_time": (first + Duration::hours(1)).timestamp(),
                    "results": [{"model": "gpt-4o", "input_tokens": 100, "output_tokens": 10}]
                },
                {
                    "start_time": second.timestamp(),
                    "end_time": (second + Duration::hours(1)).timestamp(),
                    "results": [{"model": "gpt-4o-mini", "input_tokens": 500, "output_tokens": 50}]
                }
            ],
            "has_more": false
        })))
        .mount(&server)
        .await;

    let db = Arc::new(UsageDatabase::open_in_memory().unwrap());
    let key = db.insert_credential("team-a", "openai", "sk-admin-1").unwrap();
    let store = Arc::new(RejectingStore {
        db: db.clone(),
        model: "gpt-4o-mini",
        failing: AtomicBool::new(true),
    });
    let config = CollectorConfig::new()
        .with_base_url(server.uri())
        .with_timeout_secs(5);
    let collector = PollCollector::new(store.clone(), config).unwrap();

    let report = collector.run().await.unwrap();
    assert_eq!(report.results[0].status, PollStatus::Error);
    assert_eq!(report.results[0].entries, Some(1));
    assert!(report.results[0].message.as_deref().unwrap().contains("1 of 2"));
    assert_eq!(db.poll_errors("team-a").unwrap().len(), 1);
    // Only the fully stored window is behind the cursor
    assert_eq!(
        db.get_credential(key).unwrap().unwrap().last_used,
        Some(first + Duration::hours(1))
    );

    store.failing.store(false, Ordering::SeqCst);
    let report = collector.run().await.unwrap();
    assert_eq!(report.results[0].status, PollStatus::Success);
    assert_eq!(report.total_inserted, 1);
    assert_eq!(db.count_usage_events().unwrap(), 2);
    assert!(db.get_credential(key).unwrap().unwrap().last_used.unwrap() > second);
}
