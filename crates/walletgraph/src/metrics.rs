use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Instant;

pub fn describe() {
    describe_counter!(
        "walletgraph_requests_total",
        "Graph requests by outcome (ok or error code)."
    );
    describe_histogram!(
        "walletgraph_pipeline_latency_ms",
        "End-to-end pipeline latency in milliseconds."
    );
    describe_counter!(
        "walletgraph_api_requests_total",
        "Upstream indexer and metadata API requests."
    );
    describe_histogram!(
        "walletgraph_api_latency_ms",
        "Upstream API request latency in milliseconds."
    );
    describe_counter!(
        "walletgraph_cache_lookups_total",
        "Cache lookups by tier and result."
    );
    describe_counter!(
        "walletgraph_cache_errors_total",
        "External cache failures treated as misses."
    );
    describe_counter!(
        "walletgraph_rate_limit_decisions_total",
        "Admission decisions (allowed, rejected, fail_open)."
    );
    describe_counter!(
        "walletgraph_entity_resolutions_total",
        "Entity resolutions by the source that answered."
    );
    describe_histogram!(
        "walletgraph_store_query_latency_ms",
        "SQLite store call latency in milliseconds."
    );
    describe_counter!(
        "walletgraph_store_query_errors_total",
        "SQLite store call failures."
    );
    describe_counter!(
        "walletgraph_tracing_error_events",
        "ERROR-level log events."
    );
}

/// Latency and outcome of one upstream HTTP call.
pub fn record_api_call(endpoint: &'static str, start: Instant, ok: bool) {
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("walletgraph_api_latency_ms", "endpoint" => endpoint).record(ms);
    let status = if ok { "ok" } else { "error" };
    metrics::counter!("walletgraph_api_requests_total", "endpoint" => endpoint, "status" => status)
        .increment(1);
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_handle_renders_metric_names() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe();
            metrics::counter!("walletgraph_requests_total", "outcome" => "ok").increment(1);
            metrics::counter!("walletgraph_entity_resolutions_total", "source" => "registry")
                .increment(2);
        });

        let rendered = handle.render();
        assert!(rendered.contains("walletgraph_requests_total{outcome=\"ok\"} 1"));
        assert!(rendered.contains("walletgraph_entity_resolutions_total{source=\"registry\"} 2"));
    }
}
