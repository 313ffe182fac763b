use anyhow::{Context, Result};
use rusqlite::OptionalExtension;
use std::time::Instant;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// String key-value store on a dedicated SQLite thread.
///
/// This is the persistence capability the session layer writes its
/// credential through; it survives process restarts. Clone is cheap.
#[derive(Clone)]
pub struct KvStore {
    conn: Connection,
}

impl KvStore {
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .await
            .with_context(|| format!("failed to open kv store: {path}"))?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialise kv store: {e}"))?;

        Ok(Self { conn })
    }

    /// Open an in-memory store (for tests).
    pub async fn open_memory() -> Result<Self> {
        let conn = Connection::open(":memory:")
            .await
            .context("failed to open in-memory kv store")?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialise kv store: {e}"))?;
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.timed("get", move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.timed("set", move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Returns whether a value was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.timed("remove", move |conn| {
            let n = conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
        .await
    }

    /// Runs `f` on the SQLite thread and records `dashboard_kv_op_latency_ms`.
    async fn timed<F, R>(&self, op: &'static str, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = Instant::now();
        let res = self
            .conn
            .call(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("kv {op} failed: {e}"));
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!("dashboard_kv_op_latency_ms", "op" => op, "status" => status)
            .record(ms);
        res
    }
}
