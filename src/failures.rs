//! Durable per-model failure cooldowns.
//!
//! Backed by a single SQLite table so cooldowns survive restarts. All access
//! goes through one connection behind a mutex; each operation is atomic,
//! nothing needs cross-operation isolation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

/// How a failure is classified when recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    General,
    RateLimit,
}

impl FailureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::RateLimit => "rate_limit",
        }
    }
}

/// Repeated general failures stretch the cooldown linearly, up to this many
/// multiples of the base window.
const MAX_COOLDOWN_MULTIPLIER: i64 = 5;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS failures (
    model TEXT PRIMARY KEY,
    failed_at INTEGER,
    failure_type TEXT DEFAULT 'general',
    failure_count INTEGER DEFAULT 1
)";

/// A model's current row, exposed for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub failed_at: i64,
    pub failure_type: String,
    pub failure_count: i64,
}

#[derive(Debug)]
pub struct FailureStore {
    conn: Mutex<Connection>,
    default_cooldown: Duration,
    rate_limit_cooldown: Duration,
}

impl FailureStore {
    pub fn open(
        path: impl AsRef<Path>,
        default_cooldown: Duration,
        rate_limit_cooldown: Duration,
    ) -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open(path)?, default_cooldown, rate_limit_cooldown)
    }

    pub fn open_in_memory(
        default_cooldown: Duration,
        rate_limit_cooldown: Duration,
    ) -> Result<Self, rusqlite::Error> {
        Self::init(
            Connection::open_in_memory()?,
            default_cooldown,
            rate_limit_cooldown,
        )
    }

    fn init(
        conn: Connection,
        default_cooldown: Duration,
        rate_limit_cooldown: Duration,
    ) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_cooldown,
            rate_limit_cooldown,
        })
    }

    /// Upsert: first failure creates the row, repeats refresh the timestamp,
    /// overwrite the type, and bump the count.
    pub fn mark_failure(&self, model: &str, kind: FailureKind) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO failures(model, failed_at, failure_type, failure_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(model) DO UPDATE SET
                 failed_at = excluded.failed_at,
                 failure_type = excluded.failure_type,
                 failure_count = failure_count + 1",
            params![model, now_unix(), kind.as_str()],
        )?;
        Ok(())
    }

    /// Whether the model is still inside its cooldown window. No record means
    /// no cooldown.
    pub fn should_skip(&self, model: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT failed_at, failure_type, failure_count FROM failures WHERE model = ?1",
                params![model],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((failed_at, failure_type, failure_count)) = row else {
            return Ok(false);
        };
        let cooldown = self.cooldown_for(&failure_type, failure_count);
        Ok(now_unix() - failed_at < cooldown.as_secs() as i64)
    }

    /// Rate limits get their own (short) window; cleared records impose none;
    /// anything else (including types recorded by future versions) scales the
    /// default window linearly with the failure count.
    fn cooldown_for(&self, failure_type: &str, failure_count: i64) -> Duration {
        match failure_type {
            "cleared" => Duration::ZERO,
            "rate_limit" => self.rate_limit_cooldown,
            _ => self.default_cooldown * failure_count.clamp(1, MAX_COOLDOWN_MULTIPLIER) as u32,
        }
    }

    /// Reset the count but keep the row; history is useful for spotting
    /// chronically flaky models.
    pub fn clear_failure(&self, model: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE failures SET failure_count = 0, failure_type = 'cleared' WHERE model = ?1",
            params![model],
        )?;
        Ok(())
    }

    pub fn reset_all(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM failures", [])?;
        Ok(())
    }

    pub fn record(&self, model: &str) -> Result<Option<FailureRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT failed_at, failure_type, failure_count FROM failures WHERE model = ?1",
            params![model],
            |row| {
                Ok(FailureRecord {
                    failed_at: row.get(0)?,
                    failure_type: row.get(1)?,
                    failure_count: row.get(2)?,
                })
            },
        )
        .optional()
    }

    /// Shift a row's timestamp into the past (tests only).
    #[cfg(test)]
    pub(crate) fn backdate(&self, model: &str, seconds: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE failures SET failed_at = failed_at - ?1 WHERE model = ?2",
            params![seconds, model],
        )
        .unwrap();
    }

    /// Break the store so error paths can be exercised (tests only).
    #[cfg(test)]
    pub(crate) fn break_table(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DROP TABLE failures").unwrap();
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
