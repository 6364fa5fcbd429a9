use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use crate::types::{Finding, NewFinding};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS findings (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    target    TEXT    NOT NULL,
    port      INTEGER CHECK (port IS NULL OR (port >= 0 AND port <= 65535)),
    service   TEXT    NOT NULL,
    state     TEXT    NOT NULL,
    timestamp TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS findings_timestamp ON findings (timestamp DESC, id DESC);
";

/// Finding persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("invalid stored timestamp `{0}`")]
    Timestamp(String),
    #[error("store connection poisoned by a panicked writer")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Flat, unscoped storage of findings shared by workers and the HTTP surface.
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Insert all findings in one transaction: either every row becomes visible or none does.
    async fn insert_many(&self, findings: Vec<NewFinding>) -> Result<usize, StoreError>;
    /// Most recent findings first; `None` returns every row.
    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Finding>, StoreError>;
    /// Remove every finding and return how many were removed.
    async fn delete_all(&self) -> Result<usize, StoreError>;
}

/// SQLite-backed [`FindingStore`]. The connection is serialized behind a mutex and
/// driven from the blocking thread pool.
#[derive(Clone)]
pub struct SqliteFindingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFindingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl FindingStore for SqliteFindingStore {
    async fn insert_many(&self, findings: Vec<NewFinding>) -> Result<usize, StoreError> {
        if findings.is_empty() {
            return Ok(0);
        }
        self.with_conn(move |conn| {
            let stamp = format_timestamp(OffsetDateTime::now_utc())?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO findings (target, port, service, state, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for f in &findings {
                    stmt.execute(params![f.target, f.port, f.service, f.state, stamp])?;
                }
            }
            tx.commit()?;
            debug!(count = findings.len(), "inserted findings");
            Ok(findings.len())
        })
        .await
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Finding>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target, port, service, state, timestamp FROM findings
                 ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<u16>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, target, port, service, state, stamp) = row?;
                out.push(Finding {
                    id,
                    target,
                    port,
                    service,
                    state,
                    timestamp: parse_timestamp(&stamp)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM findings", [])?))
            .await
    }
}

// Fixed-width microsecond text sorts chronologically.
fn format_timestamp(ts: OffsetDateTime) -> Result<String, StoreError> {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
    ))
    .map_err(|e| StoreError::Timestamp(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<OffsetDateTime, StoreError> {
    PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"),
    )
    .map(PrimitiveDateTime::assume_utc)
    .map_err(|_| StoreError::Timestamp(s.to_string()))
}
