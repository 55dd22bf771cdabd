pub mod registry;
pub mod sources;

use futures_util::future::{join_all, BoxFuture};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::TieredCache;
use crate::deadline::Deadline;
use crate::error::PipelineError;
use crate::metrics::record_api_call;
use crate::types::EntityAnnotation;

pub use registry::EntityRegistry;

/// One external lookup in the resolution cascade.
pub trait EntitySource: Send + Sync {
    fn name(&self) -> &'static str;

    fn lookup<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<EntityAnnotation>>>;
}

/// System programs and sysvars. They appear in nearly every transaction and
/// never identify an actor.
pub const EXCLUDED_ACCOUNTS: &[&str] = &[
    "11111111111111111111111111111111",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
    "ComputeBudget111111111111111111111111111111",
    "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
    "Memo1UhkJRfHyvLMcVucJwxXeuD728EqVDDwQDxFMNo",
    "SysvarRent111111111111111111111111111111111",
    "SysvarC1ock11111111111111111111111111111111",
    "Sysvar1nstructions1111111111111111111111111",
    "Vote111111111111111111111111111111111111111",
    "Stake11111111111111111111111111111111111111",
    "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s",
    "BPFLoaderUpgradeab1e11111111111111111111111",
    "BPFLoader2111111111111111111111111111111111",
];

pub fn is_excluded(address: &str) -> bool {
    EXCLUDED_ACCOUNTS.contains(&address)
}

pub fn cache_key(address: &str) -> String {
    format!("entity:{address}")
}

/// Resolves addresses to annotations: cache, then the static registry, then
/// each external source in order until one answers.
pub struct EntityResolver {
    registry: Arc<EntityRegistry>,
    sources: Vec<Box<dyn EntitySource>>,
    cache: Arc<TieredCache>,
    lookup_timeout: Duration,
    batch_size: usize,
}

impl EntityResolver {
    pub fn new(
        registry: Arc<EntityRegistry>,
        sources: Vec<Box<dyn EntitySource>>,
        cache: Arc<TieredCache>,
        lookup_timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            sources,
            cache,
            lookup_timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// `None` is the common case and not an error. Source failures and
    /// timeouts move on to the next source.
    pub async fn resolve(&self, address: &str) -> Option<EntityAnnotation> {
        let key = cache_key(address);
        if let Some(hit) = self.cache.get::<EntityAnnotation>(&key).await {
            record_resolution("cache");
            return Some(hit);
        }

        if let Some(known) = self.registry.lookup(address) {
            let known = known.clone();
            self.cache.set(&key, &known).await;
            record_resolution("registry");
            return Some(known);
        }

        for source in &self.sources {
            let start = Instant::now();
            let res = tokio::time::timeout(self.lookup_timeout, source.lookup(address)).await;
            record_api_call(source.name(), start, matches!(res, Ok(Ok(_))));
            match res {
                Ok(Ok(Some(annotation))) => {
                    debug!(address, source = source.name(), "entity resolved");
                    self.cache.set(&key, &annotation).await;
                    record_resolution(source.name());
                    return Some(annotation);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(address, source = source.name(), error = %e, "entity lookup failed");
                }
                Err(_elapsed) => {
                    warn!(
                        address,
                        source = source.name(),
                        timeout_ms =
                            u64::try_from(self.lookup_timeout.as_millis()).unwrap_or(u64::MAX),
                        "entity lookup timed out"
                    );
                }
            }
        }

        record_resolution("none");
        None
    }

    /// Resolve every distinct, non-excluded address in fixed-size concurrent
    /// groups. Groups run one after another; the deadline is checked before
    /// each.
    pub async fn resolve_batch(
        &self,
        addresses: &[String],
        deadline: &Deadline,
    ) -> Result<BTreeMap<String, EntityAnnotation>, PipelineError> {
        let unique: Vec<&String> = addresses
            .iter()
            .filter(|a| !is_excluded(a))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut resolved = BTreeMap::new();
        for group in unique.chunks(self.batch_size) {
            deadline.check("entity_resolution")?;
            let lookups = group.iter().map(|addr| async move {
                let annotation = self.resolve(addr).await;
                (*addr, annotation)
            });
            for (addr, annotation) in join_all(lookups).await {
                if let Some(annotation) = annotation {
                    resolved.insert(addr.clone(), annotation);
                }
            }
        }
        debug!(
            requested = unique.len(),
            resolved = resolved.len(),
            "entity batch resolution finished"
        );
        Ok(resolved)
    }
}

fn record_resolution(source: &'static str) {
    metrics::counter!("walletgraph_entity_resolutions_total", "source" => source).increment(1);
}
