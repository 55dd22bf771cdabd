use anyhow::{Context, Result};
use std::time::{Duration, Instant};

/// Key/value and rate-limit tables shared by the external cache and the
/// admission-control store.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS cache_entries (
    key            TEXT PRIMARY KEY,
    value_json     TEXT NOT NULL,
    expires_at_ms  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries (expires_at_ms);

CREATE TABLE IF NOT EXISTS rate_limit_hits (
    identifier  TEXT NOT NULL,
    hit_at_ms   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rate_limit_hits_identifier
    ON rate_limit_hits (identifier, hit_at_ms);
";

/// Async wrapper around `tokio_rusqlite::Connection`.
///
/// All SQLite work runs on the connection's background thread so lookups never
/// block the runtime. Clone is cheap (shared sender to that thread).
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open the store at `path`, set pragmas and create the schema.
    ///
    /// Another process may hold the write lock while we start (a second
    /// instance, an operator's sqlite3 shell). Schema creation is retried with
    /// backoff until the lock clears or `max_total_wait` passes.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .with_context(|| format!("failed to open store: {path}"))?;

        let mut backoff = Duration::from_millis(250);
        let max_backoff = Duration::from_secs(5);
        let max_total_wait = Duration::from_secs(60);
        let start = Instant::now();

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                    conn.execute_batch(SCHEMA)?;
                    conn.busy_timeout(Duration::from_secs(5))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    if !is_locked(&err) {
                        return Err(
                            anyhow::Error::from(err).context("AsyncDb::open: schema failed")
                        );
                    }
                    if start.elapsed() >= max_total_wait {
                        return Err(anyhow::Error::from(err)
                            .context("AsyncDb::open: store stayed locked too long"));
                    }
                    tracing::warn!(wait_for = ?backoff, path, "store is locked; retrying schema");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(anyhow::anyhow!("AsyncDb::open: {other}")),
            }
        }

        Ok(Self { conn })
    }

    /// In-memory store with the same schema. Each call gets its own database.
    pub async fn open_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(":memory:")
            .await
            .context("failed to open in-memory store")?;
        conn.call(|conn| -> std::result::Result<(), rusqlite::Error> {
            conn.execute_batch(SCHEMA)
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to create in-memory schema: {e}"))?;
        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return its result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("store connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("store close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("store error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records latency and error metrics under `op`.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!(
            "walletgraph_store_query_latency_ms",
            "op" => op,
            "status" => status
        )
        .record(ms);
        if res.is_err() {
            metrics::counter!("walletgraph_store_query_errors_total", "op" => op).increment(1);
        }

        res
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}
