//! SQLite storage for usage events, credentials and poll errors.

use crate::error::{CostError, Result, is_database_locked_error};
use crate::models::{CallMetadata, Credential, PollError, UsageEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Maximum retries for database lock errors.
const DB_LOCK_MAX_RETRIES: u32 = 5;

/// Initial delay for database lock retry (in milliseconds).
const DB_LOCK_INITIAL_DELAY_MS: u64 = 50;

/// Maximum delay for database lock retry.
const DB_LOCK_MAX_DELAY: Duration = Duration::from_secs(5);

/// Operations the pipeline needs from persistent storage.
///
/// Ordering and uniqueness of stored events are the store's contract.
/// Events are insert-only: there is deliberately no update or delete.
pub trait UsageStore: Send + Sync {
    /// Persist one usage event, returning its id.
    fn insert_usage_event(&self, event: &UsageEvent) -> Result<i64>;

    /// Append a poll error record, returning its id.
    fn insert_poll_error(&self, error: &PollError) -> Result<i64>;

    /// All credentials whose active flag is set, read fresh on every call.
    fn select_active_credentials(&self) -> Result<Vec<Credential>>;

    /// Record a successful use of a credential.
    fn update_credential_last_used(&self, credential_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// An owner's events with `since <= timestamp <= until`, oldest first.
    fn usage_events_between(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>>;

    /// Owners with at least one event at or after `since`.
    fn owners_with_usage_since(&self, since: DateTime<Utc>) -> Result<Vec<String>>;
}

/// SQLite-backed [`UsageStore`].
pub struct UsageDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl UsageDatabase {
    /// Open or create a usage database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CostError::Query(format!("failed to acquire lock: {}", e)))
    }

    /// Execute a database operation with automatic retry on lock errors.
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(DB_LOCK_INITIAL_DELAY_MS);

        loop {
            attempt += 1;

            match f() {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, operation, "Database operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ref e) if is_database_locked_error(e) && attempt <= DB_LOCK_MAX_RETRIES => {
                    warn!(
                        attempt,
                        max_retries = DB_LOCK_MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        operation,
                        "Database locked, retrying with backoff"
                    );

                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, DB_LOCK_MAX_DELAY);
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(attempt, operation, error = %e, "Database operation failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );
            if current_version < 1 {
                Self::migration_v1(&conn)?;
            }
        }

        Ok(())
    }

    /// Migration to version 1: initial schema.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("Running migration v1: initial schema");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                tokens_input INTEGER NOT NULL CHECK (tokens_input >= 0),
                tokens_output INTEGER NOT NULL CHECK (tokens_output >= 0),
                cost REAL NOT NULL CHECK (cost >= 0),
                timestamp TEXT NOT NULL,
                metadata TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_usage_events_user_time
                ON usage_events(user_id, timestamp);

            CREATE INDEX IF NOT EXISTS idx_usage_events_time
                ON usage_events(timestamp);

            CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                encrypted_key TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_used TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_api_keys_active
                ON api_keys(is_active);

            CREATE TABLE IF NOT EXISTS polling_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                api_key_id INTEGER NOT NULL,
                error_message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);",
        )?;

        info!("Migration v1 completed");
        Ok(())
    }

    /// Insert a batch of usage events in one transaction.
    ///
    /// Every event is validated first; one invalid event rejects the batch.
    pub fn insert_usage_events(&self, events: &[UsageEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        for event in events {
            event.validate()?;
        }

        self.with_retry("insert_usage_events", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for event in events {
                insert_event(&tx, event)?;
            }
            tx.commit()?;
            Ok(events.len())
        })
        .inspect(|count| debug!(count, "Inserted usage events"))
    }

    /// Register a credential (normally done by the vault).
    pub fn insert_credential(
        &self,
        owner_id: &str,
        provider: &str,
        encrypted_key: &str,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO api_keys (user_id, provider, encrypted_key, is_active)
             VALUES (?1, ?2, ?3, 1)",
            params![owner_id, provider, encrypted_key],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Set or clear a credential's active flag.
    pub fn set_credential_active(&self, credential_id: i64, active: bool) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE api_keys SET is_active = ?1 WHERE id = ?2",
            params![active, credential_id],
        )?;
        if changed == 0 {
            return Err(CostError::Query(format!(
                "credential {} not found",
                credential_id
            )));
        }
        Ok(())
    }

    /// Look up a credential by id.
    pub fn get_credential(&self, credential_id: i64) -> Result<Option<Credential>> {
        let conn = self.lock()?;
        let credential = conn
            .query_row(
                "SELECT id, user_id, provider, encrypted_key, is_active, last_used
                 FROM api_keys WHERE id = ?1",
                params![credential_id],
                credential_from_row,
            )
            .optional()?;
        Ok(credential)
    }

    /// Poll errors recorded for an owner, newest first.
    pub fn poll_errors(&self, owner_id: &str) -> Result<Vec<PollError>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, provider, api_key_id, error_message, created_at
             FROM polling_errors
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;

        let errors = stmt
            .query_map(params![owner_id], |row| {
                Ok(PollError {
                    id: Some(row.get(0)?),
                    owner_id: row.get(1)?,
                    provider: row.get(2)?,
                    credential_id: row.get(3)?,
                    error_message: row.get(4)?,
                    created_at: parse_timestamp(&row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(errors)
    }

    /// Total number of stored usage events.
    pub fn count_usage_events(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM usage_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get raw database connection for advanced queries.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

impl UsageStore for UsageDatabase {
    fn insert_usage_event(&self, event: &UsageEvent) -> Result<i64> {
        event.validate()?;

        self.with_retry("insert_usage_event", || {
            let conn = self.lock()?;
            insert_event(&conn, event)?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn insert_poll_error(&self, error: &PollError) -> Result<i64> {
        self.with_retry("insert_poll_error", || {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO polling_errors
                 (user_id, provider, api_key_id, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    error.owner_id,
                    error.provider,
                    error.credential_id,
                    error.error_message,
                    format_timestamp(error.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn select_active_credentials(&self) -> Result<Vec<Credential>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, provider, encrypted_key, is_active, last_used
             FROM api_keys
             WHERE is_active = 1
             ORDER BY id",
        )?;

        let credentials = stmt
            .query_map([], credential_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(credentials)
    }

    fn update_credential_last_used(&self, credential_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.with_retry("update_credential_last_used", || {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE api_keys SET last_used = ?1 WHERE id = ?2",
                params![format_timestamp(at), credential_id],
            )?;
            Ok(())
        })
    }

    fn usage_events_between(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, provider, model, tokens_input, tokens_output,
                    cost, timestamp, metadata
             FROM usage_events
             WHERE user_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC, id ASC",
        )?;

        let events = stmt
            .query_map(
                params![owner_id, format_timestamp(since), format_timestamp(until)],
                event_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn owners_with_usage_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT user_id FROM usage_events
             WHERE timestamp >= ?1
             ORDER BY user_id",
        )?;

        let owners = stmt
            .query_map(params![format_timestamp(since)], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(owners)
    }
}

fn insert_event(conn: &Connection, event: &UsageEvent) -> Result<()> {
    let metadata = event
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO usage_events
         (user_id, provider, model, tokens_input, tokens_output, cost, timestamp, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    stmt.execute(params![
        event.owner_id,
        event.provider,
        event.model,
        event.input_tokens,
        event.output_tokens,
        event.cost,
        format_timestamp(event.timestamp),
        metadata,
    ])?;
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<UsageEvent> {
    let metadata: Option<String> = row.get(8)?;
    let metadata = metadata
        .map(|raw| serde_json::from_str::<CallMetadata>(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into()))?;

    Ok(UsageEvent {
        id: Some(row.get(0)?),
        owner_id: row.get(1)?,
        provider: row.get(2)?,
        model: row.get(3)?,
        input_tokens: row.get(4)?,
        output_tokens: row.get(5)?,
        cost: row.get(6)?,
        timestamp: parse_timestamp(&row.get::<_, String>(7)?)?,
        metadata,
    })
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    let last_used: Option<String> = row.get(5)?;
    Ok(Credential {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        provider: row.get(2)?,
        encrypted_key: row.get(3)?,
        is_active: row.get(4)?,
        last_used: last_used.as_deref().map(parse_timestamp).transpose()?,
    })
}

/// Fixed-width UTC timestamps so text comparison orders chronologically.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn event(owner: &str, cost: f64, at: DateTime<Utc>) -> UsageEvent {
        UsageEvent::new(owner, "openai", "gpt-4o", 100, 50, cost).at(at)
    }

    #[test]
    fn test_insert_and_read_back_event() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let now = Utc::now();
        let stored = event("user-1", 0.25, now).with_metadata(CallMetadata::success(87));

        let id = db.insert_usage_event(&stored).unwrap();
        assert!(id > 0);

        let events = db
            .usage_events_between("user-1", now - ChronoDuration::minutes(1), now)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(id));
        assert_eq!(events[0].cost, 0.25);
        assert_eq!(events[0].metadata.as_ref().unwrap().latency_ms, Some(87));
    }

    #[test]
    fn test_insert_rejects_invalid_event() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let bad = UsageEvent::new("", "openai", "gpt-4o", 1, 1, 0.0);

        assert!(db.insert_usage_event(&bad).unwrap_err().is_validation());
        assert_eq!(db.count_usage_events().unwrap(), 0);
    }

    #[test]
    fn test_batch_insert() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let now = Utc::now();
        let events: Vec<_> = (0..10).map(|i| event("user-1", i as f64, now)).collect();

        assert_eq!(db.insert_usage_events(&events).unwrap(), 10);
        assert_eq!(db.count_usage_events().unwrap(), 10);
        assert_eq!(db.insert_usage_events(&[]).unwrap(), 0);
    }

    #[test]
    fn test_events_between_filters_owner_and_range() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let now = Utc::now();

        db.insert_usage_event(&event("user-1", 1.0, now - ChronoDuration::hours(2)))
            .unwrap();
        db.insert_usage_event(&event("user-1", 2.0, now - ChronoDuration::minutes(10)))
            .unwrap();
        db.insert_usage_event(&event("user-2", 4.0, now)).unwrap();

        let events = db
            .usage_events_between("user-1", now - ChronoDuration::hours(1), now)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].cost, 2.0);

        let owners = db
            .owners_with_usage_since(now - ChronoDuration::hours(1))
            .unwrap();
        assert_eq!(owners, vec!["user-1".to_string(), "user-2".to_string()]);
    }

    #[test]
    fn test_deactivated_credential_is_not_selected() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let a = db.insert_credential("user-1", "openai", "sk-admin-a").unwrap();
        let b = db.insert_credential("user-1", "anthropic", "sk-ant-admin-b").unwrap();

        assert_eq!(db.select_active_credentials().unwrap().len(), 2);

        db.set_credential_active(a, false).unwrap();
        let active = db.select_active_credentials().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b);
    }

    #[test]
    fn test_update_last_used() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let id = db.insert_credential("user-1", "openai", "sk-admin").unwrap();
        assert!(db.get_credential(id).unwrap().unwrap().last_used.is_none());

        let now = Utc::now();
        db.update_credential_last_used(id, now).unwrap();

        let credential = db.get_credential(id).unwrap().unwrap();
        let last_used = credential.last_used.unwrap();
        assert!((last_used - now).num_milliseconds().abs() < 1);
    }

    #[test]
    fn test_poll_errors_are_appended() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let id = db.insert_credential("user-1", "openai", "sk-admin").unwrap();
        let credential = db.get_credential(id).unwrap().unwrap();

        db.insert_poll_error(&PollError::for_credential(&credential, "first"))
            .unwrap();
        db.insert_poll_error(&PollError::for_credential(&credential, "second"))
            .unwrap();

        let errors = db.poll_errors("user-1").unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.credential_id == id));
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let db = UsageDatabase::open_in_memory().unwrap();
        let id = db.insert_credential("user-1", "openai", "sk-very-secret").unwrap();
        let credential = db.get_credential(id).unwrap().unwrap();

        let debug = format!("{:?}", credential);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_reopen_skips_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");

        {
            let db = UsageDatabase::open(&path).unwrap();
            db.insert_usage_event(&event("user-1", 1.0, Utc::now())).unwrap();
        }

        let db = UsageDatabase::open(&path).unwrap();
        assert_eq!(db.count_usage_events().unwrap(), 1);
    }
}
