use thiserror::Error;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::helius::RawTransaction;
use crate::validation::TimeRange;

/// Transaction categories requested from the indexer. Anything else (votes,
/// program upgrades, compressed-NFT bookkeeping) never produces wallet edges.
pub const TRANSACTION_TYPES: &[&str] = &[
    "TRANSFER",
    "SWAP",
    "TOKEN_MINT",
    "BURN",
    "NFT_SALE",
    "NFT_LISTING",
    "NFT_BID",
    "NFT_MINT",
    "NFT_CANCEL_LISTING",
];

/// Fetch limit used when no time range is given, and for wide ranges.
pub const DEFAULT_FETCH_LIMIT: u32 = 20;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("indexer request timed out")]
    Timeout,

    #[error("indexer returned 429")]
    RateLimited,

    #[error("indexer misconfigured: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<IngestError> for PipelineError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Timeout => Self::UpstreamTimeout,
            IngestError::RateLimited => Self::UpstreamRateLimited,
            IngestError::Configuration(msg) => Self::Configuration(msg),
            IngestError::Other(err) => Self::Unknown(err),
        }
    }
}

pub trait TransactionSource {
    fn transactions_url(&self, address: &str, limit: u32) -> String;

    fn fetch_transactions(
        &self,
        address: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<RawTransaction>, IngestError>> + Send;
}

/// Narrower windows get larger pages: recent activity is denser and a short
/// window is the only way to see more than a handful of records.
pub fn limit_for_time_range(range: Option<&TimeRange>) -> u32 {
    let Some(range) = range else {
        return DEFAULT_FETCH_LIMIT;
    };
    let span = range.span();
    if span <= chrono::Duration::days(1) {
        100
    } else if span <= chrono::Duration::days(3) {
        75
    } else if span <= chrono::Duration::days(7) {
        50
    } else if span <= chrono::Duration::days(14) {
        30
    } else {
        DEFAULT_FETCH_LIMIT
    }
}

/// Indexers report seconds; some proxies report milliseconds. Values below
/// 1e10 are seconds.
pub fn normalize_timestamp_ms(raw: i64) -> i64 {
    if raw < 10_000_000_000 {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

/// Keep transactions inside `range` (inclusive). Records without a
/// timestamp cannot be placed and are dropped.
pub fn filter_by_time_range(txs: Vec<RawTransaction>, range: &TimeRange) -> Vec<RawTransaction> {
    let before = txs.len();
    let kept: Vec<RawTransaction> = txs
        .into_iter()
        .filter(|tx| {
            tx.timestamp
                .is_some_and(|ts| range.contains_ms(normalize_timestamp_ms(ts)))
        })
        .collect();
    debug!(before, after = kept.len(), "applied time range filter");
    kept
}

/// Fetch and filter the transactions for `address`.
pub async fn ingest<S: TransactionSource + Sync>(
    source: &S,
    address: &str,
    range: Option<&TimeRange>,
) -> Result<Vec<RawTransaction>, IngestError> {
    let limit = limit_for_time_range(range);
    let txs = source.fetch_transactions(address, limit).await?;
    let fetched = txs.len();

    let txs = match range {
        Some(range) => filter_by_time_range(txs, range),
        None => txs,
    };
    info!(address, limit, fetched, retained = txs.len(), "ingested transactions");
    Ok(txs)
}
