//! Integration tests for burnrate-cost against an on-disk database.

use burnrate_cost::{
    AlertKind, AnomalyDetector, CallMetadata, OptimizerConfig, RecommendationInput,
    RecommendationKind, Recommender, UsageDatabase, UsageEvent, UsageQuery, UsageStore, pricing,
};
use chrono::{Duration, TimeZone, Utc};
use tempfile::tempdir;

fn priced(owner: &str, provider: &str, model: &str, input: i64, output: i64) -> UsageEvent {
    let cost = pricing::cost(provider, model, input, output);
    UsageEvent::new(owner, provider, model, input, output, cost)
}

#[test]
fn test_priced_events_aggregate_by_model() {
    let dir = tempdir().unwrap();
    let db = UsageDatabase::open(dir.path().join("usage.db")).unwrap();
    let now = Utc::now();

    db.insert_usage_events(&[
        priced("team-a", "openai", "gpt-4", 1000, 0).at(now - Duration::minutes(10)),
        priced("team-a", "openai", "gpt-4", 0, 1000).at(now - Duration::minutes(9)),
        priced("team-a", "anthropic", "claude-3-haiku", 4000, 0).at(now - Duration::minutes(8)),
        UsageEvent::new("team-a", "anthropic", "claude-3-haiku", 0, 0, 0.0)
            .at(now - Duration::minutes(7))
            .with_metadata(CallMetadata::failure(12, "overloaded")),
    ])
    .unwrap();

    let stats = UsageQuery::new(&db)
        .usage_stats(
            "team-a",
            now - Duration::hours(1),
            now,
        )
        .unwrap();

    assert_eq!(stats.event_count, 4);
    assert_eq!(stats.error_count, 1);
    assert!((stats.total_cost - (0.03 + 0.06 + 0.001)).abs() < 1e-12);
    assert_eq!(stats.by_model[0].model, "gpt-4");
    assert_eq!(stats.by_model[0].event_count, 2);
    assert_eq!(stats.by_provider.len(), 2);
}

#[test]
fn test_leak_detection_from_stored_events() {
    let db = UsageDatabase::open_in_memory().unwrap();
    let now = Utc::now();

    // steady baseline: $0.50 per hour for the previous day
    for h in 2..24 {
        db.insert_usage_event(
            &UsageEvent::new("team-a", "openai", "gpt-4o", 0, 0, 0.5).at(now - Duration::hours(h)),
        )
        .unwrap();
    }
    // then $60 in the last half hour
    db.insert_usage_event(
        &UsageEvent::new("team-a", "openai", "gpt-4o", 0, 0, 60.0).at(now - Duration::minutes(30)),
    )
    .unwrap();

    let events = db
        .usage_events_between("team-a", now - Duration::hours(24), now)
        .unwrap();
    let alerts = AnomalyDetector::default().evaluate(&events, now);
    let kinds: Vec<_> = alerts.iter().map(|a| a.kind).collect();

    assert!(kinds.contains(&AlertKind::Spike));
    assert!(kinds.contains(&AlertKind::LeakSuspected));
    assert!(!kinds.contains(&AlertKind::RapidBurst));
}

#[test]
fn test_recommendations_from_stored_history() {
    let db = UsageDatabase::open_in_memory().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

    db.insert_usage_events(&[
        priced("team-a", "openai", "gpt-4", 150_000, 50_000).at(now - Duration::days(2)),
        priced("team-a", "anthropic", "claude-3-haiku", 1000, 1000).at(now - Duration::days(1)),
    ])
    .unwrap();

    let config = OptimizerConfig::default();
    let query = UsageQuery::new(&db);
    let stats = query
        .usage_stats_last_days("team-a", config.lookback_days, now)
        .unwrap();
    let month_to_date = query.month_to_date("team-a", now).unwrap();

    let recs = Recommender::new(config).recommend(&RecommendationInput {
        stats: &stats,
        month_to_date,
        monthly_budget: 200.0,
        now,
    });

    let downgrade = recs
        .iter()
        .find(|r| r.kind == RecommendationKind::ModelDowngrade)
        .unwrap();
    assert!(downgrade.title.contains("gpt-4o-mini"));
    assert!(recs.iter().any(|r| r.kind == RecommendationKind::ProviderConcentration));
    assert!(
        recs.windows(2)
            .all(|w| w[0].estimated_saving >= w[1].estimated_saving)
    );
}

#[test]
fn test_events_are_not_visible_to_other_owners() {
    let db = UsageDatabase::open_in_memory().unwrap();
    let now = Utc::now();
    db.insert_usage_event(&priced("team-a", "openai", "gpt-4o", 100, 100))
        .unwrap();

    let spend = UsageQuery::new(&db)
        .spend_between("team-b", now - Duration::hours(1), now + Duration::minutes(1))
        .unwrap();
    assert_eq!(spend, 0.0);
}
