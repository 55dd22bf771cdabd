use chrono::{DateTime, TimeZone, Utc};
use common::db::AsyncDb;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn open(limit: u32, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: now + window_delta(window),
        }
    }

    /// Whole seconds until the window frees a slot, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = u64::try_from((self.reset_at - now).num_milliseconds()).unwrap_or(0);
        ms.div_ceil(1000).max(1)
    }
}

/// Sliding-window log limiter over the `rate_limit_hits` table.
///
/// Every admitted request leaves one row. A check prunes rows older than the
/// window, counts the rest and records a new hit only if under the limit, all
/// inside one SQLite transaction.
#[derive(Clone)]
pub struct RateLimiter {
    store: Option<AsyncDb>,
    enabled: bool,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Option<AsyncDb>, enabled: bool, limit: u32, window: Duration) -> Self {
        Self {
            store,
            enabled,
            limit,
            window,
        }
    }

    pub fn from_config(store: Option<AsyncDb>, cfg: &common::config::RateLimit) -> Self {
        Self::new(
            store,
            cfg.enabled,
            cfg.max_requests,
            Duration::from_secs(cfg.window_secs),
        )
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Utc::now()).await
    }

    pub async fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision::open(self.limit, now, self.window);
        }
        let Some(store) = &self.store else {
            warn!(identifier, "rate limit store unavailable; admitting request");
            record_decision("fail_open");
            return RateLimitDecision::open(self.limit, now, self.window);
        };

        match self.record_hit(store, identifier, now).await {
            Ok(decision) => {
                record_decision(if decision.allowed { "allowed" } else { "rejected" });
                debug!(
                    identifier,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "rate limit decision"
                );
                decision
            }
            Err(e) => {
                warn!(identifier, error = %e, "rate limit store failed; admitting request");
                record_decision("fail_open");
                RateLimitDecision::open(self.limit, now, self.window)
            }
        }
    }

    async fn record_hit(
        &self,
        store: &AsyncDb,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<RateLimitDecision> {
        let identifier = identifier.to_string();
        let limit = self.limit;
        let window_ms = window_millis(self.window);
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - window_ms;

        let (allowed, count, oldest_ms) = store
            .call_named("rate_limit.check", move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM rate_limit_hits WHERE identifier = ?1 AND hit_at_ms <= ?2",
                    rusqlite::params![identifier, window_start_ms],
                )?;
                let (count, oldest): (i64, Option<i64>) = tx.query_row(
                    "SELECT COUNT(*), MIN(hit_at_ms) FROM rate_limit_hits WHERE identifier = ?1",
                    rusqlite::params![identifier],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let count = u32::try_from(count).unwrap_or(u32::MAX);
                let allowed = count < limit;
                if allowed {
                    tx.execute(
                        "INSERT INTO rate_limit_hits (identifier, hit_at_ms) VALUES (?1, ?2)",
                        rusqlite::params![identifier, now_ms],
                    )?;
                }
                tx.commit()?;
                let count = if allowed { count + 1 } else { count };
                Ok((allowed, count, oldest.unwrap_or(now_ms)))
            })
            .await?;

        let reset_at = Utc
            .timestamp_millis_opt(oldest_ms + window_ms)
            .single()
            .unwrap_or(now + window_delta(self.window));

        Ok(RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at,
        })
    }

    /// Drop hits that can no longer count against any window.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let cutoff_ms = cutoff.timestamp_millis();
        store
            .call_named("rate_limit.purge", move |conn| {
                Ok(conn.execute(
                    "DELETE FROM rate_limit_hits WHERE hit_at_ms <= ?1",
                    rusqlite::params![cutoff_ms],
                )?)
            })
            .await
    }
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX / 2)
}

fn window_delta(window: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(window_millis(window))
}

fn record_decision(decision: &'static str) {
    metrics::counter!("walletgraph_rate_limit_decisions_total", "decision" => decision)
        .increment(1);
}
