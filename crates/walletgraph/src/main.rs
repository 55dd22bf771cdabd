use anyhow::Result;
use common::config::Config;
use common::db::AsyncDb;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use walletgraph::api::{self, AppState};
use walletgraph::cache::TieredCache;
use walletgraph::entity::{sources, EntityRegistry, EntityResolver};
use walletgraph::helius::HeliusClient;
use walletgraph::pipeline::WalletGraphPipeline;
use walletgraph::rate_limit::RateLimiter;
use walletgraph::token_metadata::TokenMetadataEnricher;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(Config::default_config_path);
    let config = Config::load(&config_path)?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("walletgraph", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;
    info!(path = %config_path, "loaded walletgraph config");

    walletgraph::metrics::install_prometheus(config.observability.prometheus_port)?;
    walletgraph::metrics::describe();

    let store = open_store(&config).await;

    let helius = Arc::new(HeliusClient::from_config(&config)?);
    if !helius.has_api_key() {
        warn!("HELIUS_API_KEY is not set; graph requests will fail with CONFIGURATION_ERROR");
    }

    let cache = Arc::new(TieredCache::new(
        store.clone(),
        Duration::from_secs(config.cache.ttl_secs),
    ));
    let registry = Arc::new(EntityRegistry::builtin());
    info!(entries = registry.len(), "entity registry loaded");

    let resolver = EntityResolver::new(
        registry,
        sources::default_sources(&config.entity_sources)?,
        Arc::clone(&cache),
        Duration::from_millis(config.entity_sources.lookup_timeout_ms),
        config.pipeline.entity_batch_size,
    );
    let enricher = TokenMetadataEnricher::new(
        Arc::clone(&helius),
        Arc::clone(&cache),
        config.pipeline.token_batch_size,
    );
    let limiter = RateLimiter::from_config(store, &config.rate_limit);

    spawn_maintenance(Arc::clone(&cache), limiter.clone());

    let pipeline = WalletGraphPipeline::new(
        helius,
        limiter,
        resolver,
        enricher,
        Duration::from_secs(config.pipeline.deadline_secs),
    );
    let state = Arc::new(AppState {
        pipeline,
        started_at: chrono::Utc::now(),
    });
    let app = api::router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr = %bind_addr, "starting walletgraph HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("walletgraph stopped");
    Ok(())
}

/// The store backs both the external cache and the rate limiter. Without it
/// the service still runs: in-process cache only, limiter fails open.
async fn open_store(config: &Config) -> Option<AsyncDb> {
    let Some(store) = &config.store else {
        warn!("no [store] configured; external cache and rate limiting disabled");
        return None;
    };
    match AsyncDb::open(&store.path).await {
        Ok(db) => {
            info!(path = %store.path, "store opened");
            Some(db)
        }
        Err(e) => {
            warn!(
                path = %store.path,
                error = %format!("{e:#}"),
                "failed to open store; continuing without it"
            );
            None
        }
    }
}

fn spawn_maintenance(cache: Arc<TieredCache>, limiter: RateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;

            let evicted = cache.purge_expired_memory();
            if evicted > 0 {
                info!(removed = evicted, "evicted expired in-process cache entries");
            }

            if let Some(external) = cache.external() {
                match external.purge_expired().await {
                    Ok(n) if n > 0 => info!(removed = n, "purged expired cache entries"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cache purge failed"),
                }
            }

            let window = chrono::Duration::from_std(limiter.window())
                .unwrap_or_else(|_out_of_range| chrono::Duration::hours(1));
            match limiter.purge_older_than(chrono::Utc::now() - window).await {
                Ok(n) if n > 0 => info!(removed = n, "purged stale rate limit hits"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "rate limit purge failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
