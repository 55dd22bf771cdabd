use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::deadline::Deadline;
use crate::entity::EntityResolver;
use crate::error::PipelineError;
use crate::graph_builder::build_graph;
use crate::ingestion::{ingest, TransactionSource};
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::token_metadata::{TokenMetadataEnricher, TokenMetadataFetcher};
use crate::types::{GraphRequest, GraphResponse};
use crate::validation::{is_valid_address, TimeRange};

/// A built graph plus the admission decision that let it through.
#[derive(Debug, Clone)]
pub struct GraphOutcome {
    pub response: GraphResponse,
    pub rate_limit: RateLimitDecision,
}

/// Validate, admit, ingest, build, enrich. Everything after admission runs
/// against one deadline started when the request arrives.
pub struct WalletGraphPipeline<T, F> {
    source: Arc<T>,
    limiter: RateLimiter,
    resolver: EntityResolver,
    enricher: TokenMetadataEnricher<F>,
    budget: Duration,
}

impl<T, F> WalletGraphPipeline<T, F>
where
    T: TransactionSource + Send + Sync,
    F: TokenMetadataFetcher + Send + Sync,
{
    pub fn new(
        source: Arc<T>,
        limiter: RateLimiter,
        resolver: EntityResolver,
        enricher: TokenMetadataEnricher<F>,
        budget: Duration,
    ) -> Self {
        Self {
            source,
            limiter,
            resolver,
            enricher,
            budget,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[tracing::instrument(skip_all, fields(address = %request.address, client = client_id))]
    pub async fn process(
        &self,
        request: &GraphRequest,
        client_id: &str,
    ) -> Result<GraphOutcome, PipelineError> {
        let start = Instant::now();
        let res = self.run(request, client_id).await;

        let ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("walletgraph_pipeline_latency_ms").record(ms);
        let outcome = match &res {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!("walletgraph_requests_total", "outcome" => outcome).increment(1);

        match &res {
            Ok(out) => info!(
                nodes = out.response.nodes.len(),
                edges = out.response.edges.len(),
                total_transactions = out.response.total_transactions,
                elapsed_ms = ms,
                "graph built"
            ),
            Err(e) => warn!(code = e.code(), error = %e, elapsed_ms = ms, "graph request failed"),
        }
        res
    }

    async fn run(
        &self,
        request: &GraphRequest,
        client_id: &str,
    ) -> Result<GraphOutcome, PipelineError> {
        let deadline = Deadline::start(self.budget);

        let address = request.address.trim();
        if !is_valid_address(address) {
            return Err(PipelineError::InvalidAddress(address.to_string()));
        }
        let range = request
            .time_range
            .as_ref()
            .map(TimeRange::parse)
            .transpose()?;

        let rate_limit = self.limiter.check(client_id).await;
        if !rate_limit.allowed {
            return Err(PipelineError::RateLimited {
                retry_after_secs: rate_limit.retry_after_secs(Utc::now()),
                limit: rate_limit.limit,
            });
        }

        let txs = deadline
            .run("ingestion", async {
                ingest(self.source.as_ref(), address, range.as_ref())
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;

        let mut graph = build_graph(&txs, address);
        if graph.edges().is_empty() {
            info!(address, transactions = txs.len(), "no transfers; skipping enrichment");
            let (nodes, edges) = graph.into_parts();
            return Ok(GraphOutcome {
                response: GraphResponse {
                    nodes,
                    edges,
                    total_transactions: txs.len(),
                    processed_at: Utc::now(),
                    entity_info: BTreeMap::new(),
                    token_metadata: BTreeMap::new(),
                },
                rate_limit,
            });
        }

        let endpoints = graph.edge_endpoints();
        let mints = graph.mints_missing_symbol();
        let (entity_info, token_metadata) = deadline
            .run("enrichment", async {
                let entities = self.resolver.resolve_batch(&endpoints, &deadline).await?;
                let tokens = self.enricher.enrich(&mints, &deadline).await?;
                Ok::<_, PipelineError>((entities, tokens))
            })
            .await?;

        graph.apply_entities(&entity_info);
        graph.apply_token_metadata(&token_metadata);
        let (nodes, edges) = graph.into_parts();

        Ok(GraphOutcome {
            response: GraphResponse {
                nodes,
                edges,
                total_transactions: txs.len(),
                processed_at: Utc::now(),
                entity_info,
                token_metadata,
            },
            rate_limit,
        })
    }
}
