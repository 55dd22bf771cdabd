use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::TieredCache;
use crate::deadline::Deadline;
use crate::error::PipelineError;
use crate::types::TokenMetadataRecord;

const UNKNOWN_SYMBOL: &str = "Unknown";
const NAME_SYMBOL_CHARS: usize = 6;

pub trait TokenMetadataFetcher {
    /// Raw metadata documents for `mints`. Mints the API knows nothing about
    /// are simply missing from the result.
    fn fetch_metadata(
        &self,
        mints: &[String],
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<Value>>> + Send;
}

pub fn cache_key(mint: &str) -> String {
    format!("token:{mint}")
}

fn clean(s: &str) -> Option<String> {
    let trimmed = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn str_at(doc: &Value, pointer: &str) -> Option<String> {
    doc.pointer(pointer).and_then(Value::as_str).and_then(clean)
}

fn u64_at(doc: &Value, pointer: &str) -> Option<u64> {
    let v = doc.pointer(pointer)?;
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Build a record from one token-metadata document.
///
/// Returns `None` when the document names no mint or carries no metadata of
/// any kind.
pub fn derive_record(doc: &Value) -> Option<TokenMetadataRecord> {
    let mint = str_at(doc, "/account").or_else(|| str_at(doc, "/mint"))?;

    let has_any = [
        "onChainMetadata",
        "offChainMetadata",
        "legacyMetadata",
        "onChainAccountInfo",
    ]
    .iter()
    .any(|k| doc.get(k).is_some_and(|v| !v.is_null()));
    if !has_any {
        return None;
    }

    let on_chain_name = str_at(doc, "/onChainMetadata/metadata/data/name");
    let symbol = str_at(doc, "/onChainMetadata/metadata/data/symbol")
        .or_else(|| str_at(doc, "/offChainMetadata/metadata/symbol"))
        .or_else(|| {
            on_chain_name
                .as_deref()
                .map(|n| n.chars().take(NAME_SYMBOL_CHARS).collect())
        })
        .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string());

    let name = on_chain_name
        .or_else(|| str_at(doc, "/offChainMetadata/metadata/name"))
        .or_else(|| str_at(doc, "/legacyMetadata/name"))
        .unwrap_or_else(|| symbol.clone());

    let decimals = u64_at(doc, "/onChainAccountInfo/accountInfo/data/parsed/info/decimals")
        .or_else(|| u64_at(doc, "/legacyMetadata/decimals"))
        .and_then(|d| u8::try_from(d).ok());

    Some(TokenMetadataRecord {
        mint,
        symbol,
        name,
        decimals,
        supply: u64_at(doc, "/onChainAccountInfo/accountInfo/data/parsed/info/supply"),
        collection: str_at(doc, "/onChainMetadata/metadata/collection/key")
            .or_else(|| str_at(doc, "/offChainMetadata/metadata/collection/name")),
        logo_url: str_at(doc, "/offChainMetadata/metadata/image")
            .or_else(|| str_at(doc, "/legacyMetadata/logoURI")),
    })
}

/// Resolves mint metadata through the cache, then batched fetches with a
/// per-mint fallback.
pub struct TokenMetadataEnricher<F> {
    fetcher: Arc<F>,
    cache: Arc<TieredCache>,
    batch_size: usize,
}

impl<F: TokenMetadataFetcher + Send + Sync> TokenMetadataEnricher<F> {
    pub fn new(fetcher: Arc<F>, cache: Arc<TieredCache>, batch_size: usize) -> Self {
        Self {
            fetcher,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn enrich(
        &self,
        mints: &[String],
        deadline: &Deadline,
    ) -> Result<BTreeMap<String, TokenMetadataRecord>, PipelineError> {
        let unique: BTreeSet<&String> = mints.iter().collect();
        let mut records = BTreeMap::new();
        let mut misses = Vec::new();

        for mint in unique {
            match self.cache.get::<TokenMetadataRecord>(&cache_key(mint)).await {
                Some(record) => {
                    records.insert(mint.clone(), record);
                }
                None => misses.push(mint.clone()),
            }
        }
        debug!(
            cached = records.len(),
            misses = misses.len(),
            "token metadata cache pass"
        );

        for batch in misses.chunks(self.batch_size) {
            deadline.check("token_enrichment")?;
            for record in self.fetch_batch(batch).await {
                self.cache.set(&cache_key(&record.mint), &record).await;
                records.insert(record.mint.clone(), record);
            }
        }

        Ok(records)
    }

    async fn fetch_batch(&self, batch: &[String]) -> Vec<TokenMetadataRecord> {
        match self.fetcher.fetch_metadata(batch).await {
            Ok(docs) => return keep_requested(batch, &docs),
            Err(e) => {
                warn!(
                    mints = batch.len(),
                    error = %e,
                    "token metadata batch failed; falling back to single lookups"
                );
            }
        }

        let singles = batch.iter().map(|mint| async move {
            let one = std::slice::from_ref(mint);
            match self.fetcher.fetch_metadata(one).await {
                Ok(docs) => keep_requested(one, &docs),
                Err(e) => {
                    warn!(mint = %mint, error = %e, "token metadata lookup failed");
                    Vec::new()
                }
            }
        });
        join_all(singles).await.into_iter().flatten().collect()
    }
}

fn keep_requested(requested: &[String], docs: &[Value]) -> Vec<TokenMetadataRecord> {
    docs.iter()
        .filter_map(derive_record)
        .filter(|r| requested.contains(&r.mint))
        .collect()
}
