use anyhow::Result;
use async_trait::async_trait;

use veilstat_core::salt::{Salt, SaltError, SaltStore};

use crate::backend::{format_ts, parse_ts};
use crate::DuckDbBackend;

const CURRENT_SLOT: &str = "current";

fn read_current(conn: &duckdb::Connection) -> Result<Option<Salt>> {
    let mut stmt = conn.prepare(
        r#"SELECT value, CAST(created_at AS VARCHAR), CAST(expires_at AS VARCHAR)
           FROM salts WHERE slot = ?1"#,
    )?;
    let mut rows = stmt.query_map(duckdb::params![CURRENT_SLOT], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    match rows.next() {
        Some(row) => {
            let (value, created_at, expires_at) = row?;
            Ok(Some(Salt {
                value,
                created_at: parse_ts(&created_at)?,
                expires_at: parse_ts(&expires_at)?,
            }))
        }
        None => Ok(None),
    }
}

impl DuckDbBackend {
    pub async fn load_salt(&self) -> Result<Option<Salt>> {
        let conn = self.conn.lock().await;
        read_current(&conn)
    }

    /// Conditional put. The insert covers the empty table; the update only
    /// fires while the stored row is still the one the caller observed or
    /// has already expired.
    pub async fn put_salt_if_current(
        &self,
        expected: Option<&str>,
        candidate: &Salt,
    ) -> Result<Salt> {
        let created_at = format_ts(candidate.created_at);
        let expires_at = format_ts(candidate.expires_at);

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            r#"INSERT INTO salts (slot, value, created_at, expires_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (slot) DO NOTHING"#,
            duckdb::params![CURRENT_SLOT, candidate.value, created_at, expires_at],
        )?;
        if inserted == 0 {
            tx.execute(
                r#"UPDATE salts
                   SET value = ?1, created_at = ?2, expires_at = ?3
                   WHERE slot = ?4
                     AND (value = ?5 OR expires_at <= ?6)"#,
                duckdb::params![
                    candidate.value,
                    created_at,
                    expires_at,
                    CURRENT_SLOT,
                    expected,
                    created_at,
                ],
            )?;
        }
        let current = read_current(&tx)?;
        tx.commit()?;

        current.ok_or_else(|| anyhow::anyhow!("salt row missing after conditional put"))
    }
}

#[async_trait]
impl SaltStore for DuckDbBackend {
    async fn load(&self) -> Result<Option<Salt>, SaltError> {
        self.load_salt()
            .await
            .map_err(|e| SaltError::Unavailable(e.to_string()))
    }

    async fn put_if_current(
        &self,
        expected: Option<&str>,
        candidate: &Salt,
    ) -> Result<Salt, SaltError> {
        self.put_salt_if_current(expected, candidate)
            .await
            .map_err(|e| SaltError::Unavailable(e.to_string()))
    }
}
