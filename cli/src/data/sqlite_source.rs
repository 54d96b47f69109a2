//! Read-only SQLite adapter for the query port.
//!
//! Expects a `samples(path TEXT, timestamp INTEGER, value REAL)` table with
//! unix-millisecond timestamps, written by some other process. Averaging is
//! pushed into SQL so only one row per aggregation bucket crosses over.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::debug;
use usagewatch_protocol::Sample;

use crate::data::query::{FirstLast, QueryError, QueryPort, TimeRange};

const AGGREGATED_SQL: &str = "SELECT (timestamp / ?2) * ?2 AS bucket, AVG(value)
     FROM samples
     WHERE path = ?1 AND timestamp >= ?3 AND timestamp < ?4
     GROUP BY bucket
     ORDER BY bucket ASC";

const FIRST_SQL: &str = "SELECT timestamp, value FROM samples
     WHERE path = ?1 AND timestamp >= ?2 AND timestamp < ?3
     ORDER BY timestamp ASC LIMIT 1";

const LAST_SQL: &str = "SELECT timestamp, value FROM samples
     WHERE path = ?1 AND timestamp >= ?2 AND timestamp < ?3
     ORDER BY timestamp DESC LIMIT 1";

pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteSource {
    /// Open an existing database read-only.
    pub fn open(path: &Path) -> Result<Self, QueryError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        require_samples_table(&conn, path)?;

        debug!(path = ?path, "Opened sample database");
        Ok(Self::from_connection(conn, path.to_path_buf()))
    }

    pub fn from_connection(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?;
        Ok(result?)
    }
}

fn row_to_sample(row: &Row<'_>) -> Result<Option<Sample>, rusqlite::Error> {
    let millis: i64 = row.get(0)?;
    let value: f64 = row.get(1)?;
    Ok(DateTime::<Utc>::from_timestamp_millis(millis).map(|ts| Sample::new(ts, value)))
}

#[async_trait]
impl QueryPort for SqliteSource {
    async fn query_aggregated(
        &self,
        path: &str,
        range: &TimeRange,
        window: Duration,
    ) -> Result<Vec<Sample>, QueryError> {
        let path = path.to_string();
        let window_ms = (window.as_millis() as i64).max(1);
        let (from, to) = (range.start.timestamp_millis(), range.end.timestamp_millis());

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(AGGREGATED_SQL)?;
            let rows = stmt
                .query_map(params![path, window_ms, from, to], row_to_sample)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().flatten().collect())
        })
        .await
    }

    async fn query_first_last(
        &self,
        path: &str,
        range: &TimeRange,
    ) -> Result<FirstLast, QueryError> {
        let path = path.to_string();
        let (from, to) = (range.start.timestamp_millis(), range.end.timestamp_millis());

        self.with_conn(move |conn| {
            let first = conn
                .query_row(FIRST_SQL, params![path, from, to], row_to_sample)
                .optional()?
                .flatten();
            let last = conn
                .query_row(LAST_SQL, params![path, from, to], row_to_sample)
                .optional()?
                .flatten();
            Ok(FirstLast { first, last })
        })
        .await
    }
}

fn require_samples_table(conn: &Connection, path: &Path) -> Result<(), QueryError> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'samples')",
        [],
        |row| row.get(0),
    )?;
    if found {
        Ok(())
    } else {
        Err(QueryError::Backend(format!(
            "{} has no samples table",
            path.display()
        )))
    }
}
