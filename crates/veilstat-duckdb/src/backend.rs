use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use veilstat_core::event::{Event, PropertyValue};

use crate::schema::init_sql;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Render a timestamp for a DuckDB `TIMESTAMP` column (naive UTC).
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TS_FORMAT).to_string()
}

/// Parse `CAST(<timestamp> AS VARCHAR)` output back into UTC.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| anyhow!("invalid timestamp {raw:?}: {e}"))
}

/// A DuckDB backend for Veilstat.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// contend. The connection is wrapped in `Arc<Mutex<_>>` so writes are
/// serialised while the struct stays cheap to share across Axum handlers.
/// Aggregation reads go through [`DuckDbBackend::read`], which runs them on a
/// blocking worker so a caller-side timeout can abandon a slow scan.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database. Data is discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a read-only closure against the connection on a blocking worker.
    ///
    /// The lock is taken before the task starts and released when the
    /// closure finishes, even if the awaiting caller has given up.
    pub(crate) async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let guard = Arc::clone(&self.conn).lock_owned().await;
        tokio::task::spawn_blocking(move || f(&guard))
            .await
            .map_err(|e| anyhow!("query task failed: {e}"))?
    }

    /// Append one event.
    ///
    /// The event must already carry its server-assigned `visitor_id`.
    pub async fn insert_event(&self, event: &Event) -> Result<()> {
        let properties = event.properties_json()?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO events (
                id, site_id, visitor_id, event_type, event_name,
                path, useragent, properties, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            duckdb::params![
                event.id,
                event.site_id,
                event.visitor_id,
                event.event_type,
                event.event_name,
                event.path,
                event.useragent,
                properties,
                format_ts(event.created_at),
            ],
        )?;
        Ok(())
    }

    /// Load stored events for a site, oldest first.
    pub async fn list_events(&self, site_id: &str) -> Result<Vec<Event>> {
        let site_id = site_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                r#"SELECT id, site_id, visitor_id, event_type, event_name, path,
                          useragent, properties, CAST(created_at AS VARCHAR)
                   FROM events
                   WHERE site_id = ?1
                   ORDER BY created_at ASC, id ASC"#,
            )?;
            let rows = stmt.query_map(duckdb::params![site_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (id, site_id, visitor_id, event_type, event_name, path, useragent, props, ts) =
                    row?;
                let properties = match props {
                    Some(raw) => {
                        serde_json::from_str::<std::collections::BTreeMap<String, PropertyValue>>(
                            &raw,
                        )?
                    }
                    None => Default::default(),
                };
                events.push(Event {
                    id,
                    site_id,
                    visitor_id,
                    event_type,
                    event_name,
                    path,
                    useragent,
                    properties,
                    created_at: parse_ts(&ts)?,
                });
            }
            Ok(events)
        })
        .await
    }

    /// Count stored events for a site.
    pub async fn count_events(&self, site_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM events WHERE site_id = ?1")?;
        let count: i64 = stmt.query_row(duckdb::params![site_id], |row| row.get(0))?;
        Ok(count)
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
