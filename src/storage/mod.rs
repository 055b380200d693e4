//! SQLite storage layer -- schema, log ingestion and retrieval.

pub mod schema;

use crate::detect::normalize::{RawLogRecord, RawTimestamp};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexicographic order matches time order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// A log entry ready to be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLog {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A log entry as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl From<&StoredLog> for RawLogRecord {
    fn from(log: &StoredLog) -> Self {
        RawLogRecord {
            timestamp: Some(RawTimestamp::Native(log.timestamp)),
            level: Some(log.level.clone()),
            service: Some(log.service.clone()),
            message: Some(log.message.clone()),
            metadata: log.metadata.as_object().cloned(),
        }
    }
}

/// Insert a batch of logs in one transaction.
pub fn insert_logs(pool: &Pool, logs: &[NewLog]) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO logs (timestamp, service, level, message, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for log in logs {
            let metadata = if log.metadata.is_null() {
                "{}".to_string()
            } else {
                serde_json::to_string(&log.metadata)?
            };
            stmt.execute(params![
                format_ts(&log.timestamp),
                log.service,
                log.level,
                log.message,
                metadata
            ])?;
        }
    }
    tx.commit().context("Failed to commit log batch")?;
    Ok(logs.len())
}

/// Logs at or after `since`, newest first, at most `limit` rows.
pub fn recent_logs(pool: &Pool, since: DateTime<Utc>, limit: usize) -> Result<Vec<StoredLog>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, service, level, message, metadata_json FROM logs
         WHERE timestamp >= ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![format_ts(&since), limit as i64], |row| {
        let ts: String = row.get(1)?;
        let metadata: String = row.get(5)?;
        Ok(StoredLog {
            id: row.get(0)?,
            timestamp: parse_ts(&ts),
            service: row.get(2)?,
            level: row.get(3)?,
            message: row.get(4)?,
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        })
    })?;

    let mut logs = Vec::new();
    for r in rows {
        logs.push(r?);
    }
    Ok(logs)
}

pub fn count_logs(pool: &Pool) -> Result<i64> {
    let conn = pool.get()?;
    let n = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn log(ts: DateTime<Utc>, level: &str) -> NewLog {
        NewLog {
            timestamp: ts,
            service: "api".into(),
            level: level.into(),
            message: "hello".into(),
            metadata: json!({ "pod": "api-1" }),
        }
    }

    #[test]
    fn test_insert_and_fetch_recent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs.db");
        let pool = open_pool(path.to_str().unwrap())?;

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let logs: Vec<NewLog> = (0..5)
            .map(|i| log(base + Duration::minutes(i), "info"))
            .collect();
        assert_eq!(insert_logs(&pool, &logs)?, 5);
        assert_eq!(count_logs(&pool)?, 5);

        let recent = recent_logs(&pool, base + Duration::minutes(2), 10)?;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, base + Duration::minutes(4));
        assert_eq!(recent[0].metadata["pod"], "api-1");

        let capped = recent_logs(&pool, base, 2)?;
        assert_eq!(capped.len(), 2);
        Ok(())
    }

    #[test]
    fn test_stored_log_converts_to_raw_record() {
        let stored = StoredLog {
            id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            service: "db".into(),
            level: "ERROR".into(),
            message: "down".into(),
            metadata: json!({}),
        };
        let raw = RawLogRecord::from(&stored);
        assert_eq!(raw.timestamp, Some(RawTimestamp::Native(stored.timestamp)));
        assert_eq!(raw.service.as_deref(), Some("db"));
    }
}
