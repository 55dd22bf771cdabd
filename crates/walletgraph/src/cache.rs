//! Two-tier cache for entity and token records.
//!
//! The in-process tier is a plain TTL map owned by whoever constructs the
//! cache. The external tier is the SQLite store and is optional: when it is
//! absent or failing, lookups fall through to the network and the pipeline
//! only gets slower. Nothing here ever returns an error to the caller.

use anyhow::Result;
use common::db::AsyncDb;
use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// In-process TTL map of JSON values.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, serde_json::Value)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            Some((expires_at, value)) if *expires_at > Instant::now() => {
                return Some(value.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (expires_at, value));
    }

    /// Drop expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `cache_entries` table in the shared SQLite store.
#[derive(Clone)]
pub struct SqliteCache {
    db: AsyncDb,
}

impl SqliteCache {
    pub fn new(db: AsyncDb) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.db
            .call_named("cache.get", move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value_json FROM cache_entries
                         WHERE key = ?1 AND expires_at_ms > ?2",
                        rusqlite::params![key, now_ms],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
    }

    pub async fn set_with_ttl(&self, key: &str, value_json: String, ttl: Duration) -> Result<()> {
        let key = key.to_string();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = chrono::Utc::now().timestamp_millis().saturating_add(ttl_ms);
        self.db
            .call_named("cache.set", move |conn| {
                conn.execute(
                    "INSERT INTO cache_entries (key, value_json, expires_at_ms)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                         value_json = excluded.value_json,
                         expires_at_ms = excluded.expires_at_ms",
                    rusqlite::params![key, value_json, expires_at_ms],
                )?;
                Ok(())
            })
            .await
    }

    /// Delete expired rows. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.db
            .call_named("cache.purge", move |conn| {
                Ok(conn.execute(
                    "DELETE FROM cache_entries WHERE expires_at_ms <= ?1",
                    rusqlite::params![now_ms],
                )?)
            })
            .await
    }
}

/// In-process tier in front of the optional SQLite tier.
pub struct TieredCache {
    memory: MemoryCache,
    external: Option<SqliteCache>,
    ttl: Duration,
}

impl TieredCache {
    pub fn new(external: Option<AsyncDb>, ttl: Duration) -> Self {
        if external.is_none() {
            warn!("external cache unavailable; using in-process cache only");
        }
        Self {
            memory: MemoryCache::new(),
            external: external.map(SqliteCache::new),
            ttl,
        }
    }

    pub fn memory_only(ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(),
            external: None,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn external(&self) -> Option<&SqliteCache> {
        self.external.as_ref()
    }

    /// Evict expired in-process entries. Reads only evict the key they touch.
    pub fn purge_expired_memory(&self) -> usize {
        self.memory.purge_expired()
    }

    /// Memory first, then SQLite (populating memory on an external hit).
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(value) = self.memory.get(key) {
            match serde_json::from_value(value) {
                Ok(v) => {
                    record_lookup("memory", "hit");
                    return Some(v);
                }
                Err(e) => debug!(key, error = %e, "discarding undecodable in-process cache value"),
            }
        }
        record_lookup("memory", "miss");

        let external = self.external.as_ref()?;
        let raw = match external.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record_lookup("external", "miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "external cache read failed; treating as miss");
                metrics::counter!("walletgraph_cache_errors_total", "op" => "get").increment(1);
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "external cache holds invalid JSON; treating as miss");
                return None;
            }
        };
        let decoded = serde_json::from_value(value.clone()).ok()?;
        record_lookup("external", "hit");
        self.memory.set(key, value, self.ttl);
        Some(decoded)
    }

    /// Write both tiers. External failures are logged and swallowed.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "value not serializable; skipping cache write");
                return;
            }
        };
        let raw = value.to_string();
        self.memory.set(key, value, self.ttl);

        if let Some(external) = &self.external {
            if let Err(e) = external.set_with_ttl(key, raw, self.ttl).await {
                warn!(key, error = %e, "external cache write failed");
                metrics::counter!("walletgraph_cache_errors_total", "op" => "set").increment(1);
            }
        }
    }
}

fn record_lookup(tier: &'static str, result: &'static str) {
    metrics::counter!("walletgraph_cache_lookups_total", "tier" => tier, "result" => result)
        .increment(1);
}
