use futures_util::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use walletgraph::cache::TieredCache;
use walletgraph::entity::{EntityRegistry, EntityResolver, EntitySource};
use walletgraph::error::PipelineError;
use walletgraph::helius::{RawAccountData, RawTokenAmount, RawTokenTransfer, RawTransaction};
use walletgraph::ingestion::{IngestError, TransactionSource};
use walletgraph::pipeline::WalletGraphPipeline;
use walletgraph::rate_limit::RateLimiter;
use walletgraph::token_metadata::{TokenMetadataEnricher, TokenMetadataFetcher};
use walletgraph::types::{
    AnnotationSource, EntityAnnotation, EntityKind, GraphRequest, NodeKind, TimeRangeInput,
    TransferKind,
};

const W: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
const A: &str = "HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH";
const JUPITER: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";
const M: &str = "7Xn4mM868daxsGVJmaGrYxg8CZiuqBnDwUse66s5ALmr";

struct FakeSource {
    txs: Vec<RawTransaction>,
    hang: bool,
    calls: AtomicUsize,
}

impl TransactionSource for FakeSource {
    fn transactions_url(&self, address: &str, limit: u32) -> String {
        format!("fake://{address}?limit={limit}")
    }

    async fn fetch_transactions(
        &self,
        _address: &str,
        _limit: u32,
    ) -> Result<Vec<RawTransaction>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.txs.clone())
    }
}

struct FakeMetadata {
    docs: Vec<serde_json::Value>,
    calls: AtomicUsize,
}

impl TokenMetadataFetcher for FakeMetadata {
    async fn fetch_metadata(&self, mints: &[String]) -> anyhow::Result<Vec<serde_json::Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .docs
            .iter()
            .filter(|d| {
                d["account"]
                    .as_str()
                    .is_some_and(|a| mints.iter().any(|m| m == a))
            })
            .cloned()
            .collect())
    }
}

/// Records every address it is asked about. Answers only for `known`.
struct RecordingLabels {
    known: Option<&'static str>,
    hang: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

impl EntitySource for RecordingLabels {
    fn name(&self) -> &'static str {
        "label_service"
    }

    fn lookup<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<EntityAnnotation>>> {
        async move {
            self.seen.lock().unwrap().push(address.to_string());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok((self.known == Some(address)).then(|| {
                EntityAnnotation::new(
                    "Known Whale",
                    EntityKind::LabeledAddress,
                    "fixture label",
                    AnnotationSource::LabelService,
                )
            }))
        }
        .boxed()
    }
}

struct Harness {
    source: Arc<FakeSource>,
    metadata: Arc<FakeMetadata>,
    seen: Arc<Mutex<Vec<String>>>,
    pipeline: WalletGraphPipeline<FakeSource, FakeMetadata>,
}

struct Options {
    txs: Vec<RawTransaction>,
    metadata_docs: Vec<serde_json::Value>,
    known_label: Option<&'static str>,
    hang_ingest: bool,
    hang_labels: bool,
    limiter: RateLimiter,
    budget: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            txs: Vec::new(),
            metadata_docs: Vec::new(),
            known_label: None,
            hang_ingest: false,
            hang_labels: false,
            limiter: RateLimiter::new(None, false, 10, Duration::from_secs(60)),
            budget: Duration::from_secs(45),
        }
    }
}

fn harness(opts: Options) -> Harness {
    let source = Arc::new(FakeSource {
        txs: opts.txs,
        hang: opts.hang_ingest,
        calls: AtomicUsize::new(0),
    });
    let metadata = Arc::new(FakeMetadata {
        docs: opts.metadata_docs,
        calls: AtomicUsize::new(0),
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let labels = RecordingLabels {
        known: opts.known_label,
        hang: opts.hang_labels,
        seen: Arc::clone(&seen),
    };

    let cache = Arc::new(TieredCache::memory_only(Duration::from_secs(86_400)));
    let resolver = EntityResolver::new(
        Arc::new(EntityRegistry::builtin()),
        vec![Box::new(labels)],
        Arc::clone(&cache),
        Duration::from_secs(3600),
        10,
    );
    let enricher = TokenMetadataEnricher::new(Arc::clone(&metadata), cache, 5);
    let pipeline = WalletGraphPipeline::new(
        Arc::clone(&source),
        opts.limiter,
        resolver,
        enricher,
        opts.budget,
    );
    Harness {
        source,
        metadata,
        seen,
        pipeline,
    }
}

fn token_tx(from: &str, to: &str, mint: &str, ui: &str, raw: &str, ts: i64) -> RawTransaction {
    RawTransaction {
        signature: format!("sig-{from}-{to}-{ts}"),
        timestamp: Some(ts),
        tx_type: Some("TRANSFER".to_string()),
        token_transfers: vec![RawTokenTransfer {
            from_user_account: Some(from.to_string()),
            to_user_account: Some(to.to_string()),
            mint: Some(mint.to_string()),
            token_amount: Some(ui.to_string()),
            raw_token_amount: Some(RawTokenAmount {
                token_amount: Some(raw.to_string()),
                decimals: Some(0),
            }),
            token_standard: None,
        }],
        account_data: vec![
            RawAccountData {
                account: from.to_string(),
            },
            RawAccountData {
                account: to.to_string(),
            },
        ],
        ..RawTransaction::default()
    }
}

fn nft_metadata_doc() -> serde_json::Value {
    serde_json::from_str::<Vec<serde_json::Value>>(include_str!("fixtures/token_metadata.json"))
        .unwrap()
        .into_iter()
        .find(|d| d["account"] == M)
        .unwrap()
}

fn request(address: &str) -> GraphRequest {
    GraphRequest {
        address: address.to_string(),
        time_range: None,
    }
}

#[tokio::test]
async fn nft_transfer_produces_two_nodes_and_metadata() {
    let h = harness(Options {
        txs: vec![token_tx(W, A, M, "1", "1", 1_704_067_200)],
        metadata_docs: vec![nft_metadata_doc()],
        ..Options::default()
    });

    let out = h.pipeline.process(&request(W), "client").await.unwrap();
    let resp = out.response;

    assert_eq!(resp.nodes.len(), 2);
    assert_eq!(resp.nodes[0].id, W);
    assert_eq!(resp.nodes[0].kind, NodeKind::Input);
    assert_eq!(resp.nodes[1].id, A);
    assert_eq!(resp.nodes[1].kind, NodeKind::Connected);

    assert_eq!(resp.edges.len(), 1);
    assert_eq!(resp.edges[0].kind, TransferKind::Nft);
    assert!(resp.edges[0].is_direct);
    assert_eq!(resp.edges[0].token_symbol.as_deref(), Some("MAD"));

    assert_eq!(resp.token_metadata[M].name, "Mad Lad #8420");
    assert_eq!(resp.total_transactions, 1);
}

#[tokio::test]
async fn unresolvable_mint_is_absent_not_placeholder() {
    let h = harness(Options {
        txs: vec![token_tx(W, A, M, "1", "1", 1_704_067_200)],
        ..Options::default()
    });

    let resp = h.pipeline.process(&request(W), "client").await.unwrap().response;
    assert_eq!(resp.edges.len(), 1);
    assert!(resp.token_metadata.is_empty());
    assert!(resp.edges[0].token_symbol.is_none());
    assert_eq!(h.metadata.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_transactions_after_filter_skips_enrichment() {
    let h = harness(Options {
        txs: vec![token_tx(W, A, M, "1", "1", 1_600_000_000)],
        metadata_docs: vec![nft_metadata_doc()],
        ..Options::default()
    });
    let req = GraphRequest {
        address: W.to_string(),
        time_range: Some(TimeRangeInput {
            start: "2024-01-01T00:00:00Z".to_string(),
            end: "2024-01-02T00:00:00Z".to_string(),
        }),
    };

    let resp = h.pipeline.process(&req, "client").await.unwrap().response;
    assert_eq!(resp.nodes.len(), 1);
    assert_eq!(resp.nodes[0].kind, NodeKind::Input);
    assert!(resp.edges.is_empty());
    assert!(resp.entity_info.is_empty());
    assert!(resp.token_metadata.is_empty());
    assert_eq!(resp.total_transactions, 0);

    assert_eq!(h.metadata.calls.load(Ordering::SeqCst), 0);
    assert!(h.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn time_range_bounds_are_inclusive() {
    // 2024-01-01T00:00:00Z and 2024-01-02T00:00:00Z, one in seconds, one in ms.
    let h = harness(Options {
        txs: vec![
            token_tx(W, A, M, "3", "3", 1_704_067_200),
            token_tx(A, W, M, "2", "2", 1_704_153_600_000),
            token_tx(W, A, M, "1", "1", 1_704_153_601),
        ],
        ..Options::default()
    });
    let req = GraphRequest {
        address: W.to_string(),
        time_range: Some(TimeRangeInput {
            start: "2024-01-01T00:00:00Z".to_string(),
            end: "2024-01-02T00:00:00Z".to_string(),
        }),
    };

    let resp = h.pipeline.process(&req, "client").await.unwrap().response;
    assert_eq!(resp.total_transactions, 2);
    assert_eq!(resp.edges.len(), 2);
    assert!(resp.edges.iter().all(|e| e.kind == TransferKind::SplToken));
}

#[tokio::test]
async fn registry_entity_needs_no_external_lookup() {
    let h = harness(Options {
        txs: vec![token_tx(W, JUPITER, M, "3", "3", 1_704_067_200)],
        ..Options::default()
    });

    let resp = h.pipeline.process(&request(W), "client").await.unwrap().response;
    let dex = &resp.entity_info[JUPITER];
    assert_eq!(dex.kind, EntityKind::Dex);
    assert_eq!(dex.source, AnnotationSource::Registry);

    let node = resp.nodes.iter().find(|n| n.id == JUPITER).unwrap();
    assert_eq!(node.entity.as_ref().unwrap().name, "Jupiter");

    // Only the unknown wallet went to the external source.
    assert_eq!(*h.seen.lock().unwrap(), vec![W.to_string()]);
}

#[tokio::test]
async fn entity_resolution_is_cached_between_requests() {
    let h = harness(Options {
        txs: vec![token_tx(W, A, M, "3", "3", 1_704_067_200)],
        known_label: Some(A),
        ..Options::default()
    });

    let first = h.pipeline.process(&request(W), "client").await.unwrap().response;
    assert_eq!(first.entity_info[A].name, "Known Whale");
    let lookups_after_first = h.seen.lock().unwrap().len();

    let second = h.pipeline.process(&request(W), "client").await.unwrap().response;
    assert_eq!(second.entity_info, first.entity_info);
    // A is cached; W had no annotation, so it is looked up again.
    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), lookups_after_first + 1);
    assert_eq!(seen.iter().filter(|a| a.as_str() == A).count(), 1);
}

#[tokio::test]
async fn rate_limiter_rejects_after_limit() {
    let db = common::db::AsyncDb::open_memory().await.unwrap();
    let h = harness(Options {
        limiter: RateLimiter::new(Some(db), true, 2, Duration::from_secs(60)),
        ..Options::default()
    });

    for _ in 0..2 {
        let out = h.pipeline.process(&request(W), "1.2.3.4").await.unwrap();
        assert!(out.rate_limit.allowed);
    }
    let err = h.pipeline.process(&request(W), "1.2.3.4").await.unwrap_err();
    match err {
        PipelineError::RateLimited {
            retry_after_secs,
            limit,
        } => {
            assert_eq!(limit, 2);
            assert!(retry_after_secs >= 1);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);

    // A different client has its own window.
    assert!(h.pipeline.process(&request(W), "5.6.7.8").await.is_ok());
}

#[tokio::test]
async fn invalid_input_is_rejected_before_ingestion() {
    let h = harness(Options::default());

    let err = h.pipeline.process(&request("not-an-address"), "c").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_ADDRESS");

    let req = GraphRequest {
        address: W.to_string(),
        time_range: Some(TimeRangeInput {
            start: "2024-02-01T00:00:00Z".to_string(),
            end: "2024-01-01T00:00:00Z".to_string(),
        }),
    };
    let err = h.pipeline.process(&req, "c").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TIME_RANGE");
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_enrichment_hits_processing_timeout() {
    let h = harness(Options {
        txs: vec![token_tx(W, A, M, "3", "3", 1_704_067_200)],
        hang_labels: true,
        budget: Duration::from_secs(5),
        ..Options::default()
    });

    let err = h.pipeline.process(&request(W), "client").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ProcessingTimeout {
            budget_secs: 5,
            stage: "enrichment"
        }
    ));
    assert!(err.safe_message().contains("narrower time range"));
}

#[tokio::test(start_paused = true)]
async fn slow_ingestion_hits_processing_timeout() {
    let h = harness(Options {
        hang_ingest: true,
        budget: Duration::from_secs(5),
        ..Options::default()
    });

    let err = h.pipeline.process(&request(W), "client").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ProcessingTimeout {
            stage: "ingestion",
            ..
        }
    ));
}

#[tokio::test]
async fn fixture_history_builds_consistent_graph() {
    let txs: Vec<RawTransaction> =
        serde_json::from_str(include_str!("fixtures/enhanced_transactions.json")).unwrap();
    let h = harness(Options {
        txs,
        metadata_docs: serde_json::from_str(include_str!("fixtures/token_metadata.json")).unwrap(),
        ..Options::default()
    });

    let resp = h.pipeline.process(&request(W), "client").await.unwrap().response;
    assert_eq!(resp.total_transactions, 4);
    assert_eq!(resp.edges.len(), 4);
    assert_eq!(resp.token_metadata.len(), 2);
    assert!(resp
        .edges
        .iter()
        .all(|e| e.token_symbol.is_some()));
    for edge in &resp.edges {
        assert!(resp.nodes.iter().any(|n| n.id == edge.source));
        assert!(resp.nodes.iter().any(|n| n.id == edge.target));
        assert!(!(edge.is_direct && edge.is_incidental));
    }
}
