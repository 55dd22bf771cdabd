use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::PipelineError;
use crate::ingestion::TransactionSource;
use crate::pipeline::WalletGraphPipeline;
use crate::token_metadata::TokenMetadataFetcher;
use crate::types::GraphRequest;

const ANONYMOUS_CLIENT: &str = "anonymous";

/// Shared application state available to all handlers.
pub struct AppState<T, F> {
    pub pipeline: WalletGraphPipeline<T, F>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub fn router<T, F>(state: Arc<AppState<T, F>>) -> Router
where
    T: TransactionSource + Send + Sync + 'static,
    F: TokenMetadataFetcher + Send + Sync + 'static,
{
    Router::new()
        .route("/api/health", get(health::<T, F>))
        .route("/api/graph", post(post_graph::<T, F>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health<T, F>(State(state): State<Arc<AppState<T, F>>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then a shared bucket.
pub fn client_identifier(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

async fn post_graph<T, F>(
    State(state): State<Arc<AppState<T, F>>>,
    headers: HeaderMap,
    Json(req): Json<GraphRequest>,
) -> Response
where
    T: TransactionSource + Send + Sync,
    F: TokenMetadataFetcher + Send + Sync,
{
    let client_id = client_identifier(&headers);
    match state.pipeline.process(&req, &client_id).await {
        Ok(outcome) => {
            let mut resp = Json(outcome.response).into_response();
            let headers = resp.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(outcome.rate_limit.limit));
            headers.insert(
                "x-ratelimit-remaining",
                HeaderValue::from(outcome.rate_limit.remaining),
            );
            resp
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidAddress(_) | Self::InvalidTimeRange(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamRateLimited => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout | Self::ProcessingTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration(_) | Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        if let Self::Unknown(err) = &self {
            error!(error = %format!("{err:#}"), "unexpected pipeline failure");
        }
        let status = self.status_code();
        let body = ErrorBody {
            error: self.code(),
            message: self.safe_message(),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Self::RateLimited {
            retry_after_secs,
            limit,
        } = self
        {
            let headers = resp.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0_u32));
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::entity::{EntityRegistry, EntityResolver};
    use crate::helius::RawTransaction;
    use crate::ingestion::IngestError;
    use crate::rate_limit::RateLimiter;
    use crate::token_metadata::TokenMetadataEnricher;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const W: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    struct FixtureSource;

    impl TransactionSource for FixtureSource {
        fn transactions_url(&self, address: &str, limit: u32) -> String {
            format!("fixture://{address}?limit={limit}")
        }

        async fn fetch_transactions(
            &self,
            _address: &str,
            _limit: u32,
        ) -> Result<Vec<RawTransaction>, IngestError> {
            Ok(serde_json::from_str(include_str!(
                "../tests/fixtures/enhanced_transactions.json"
            ))
            .map_err(anyhow::Error::from)?)
        }
    }

    struct NoMetadata;

    impl TokenMetadataFetcher for NoMetadata {
        async fn fetch_metadata(
            &self,
            _mints: &[String],
        ) -> anyhow::Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
    }

    fn app(limiter: RateLimiter) -> Router {
        let cache = Arc::new(TieredCache::memory_only(Duration::from_secs(60)));
        let resolver = EntityResolver::new(
            Arc::new(EntityRegistry::builtin()),
            Vec::new(),
            cache.clone(),
            Duration::from_millis(100),
            10,
        );
        let enricher = TokenMetadataEnricher::new(Arc::new(NoMetadata), cache, 5);
        let pipeline = WalletGraphPipeline::new(
            Arc::new(FixtureSource),
            limiter,
            resolver,
            enricher,
            Duration::from_secs(45),
        );
        router(Arc::new(AppState {
            pipeline,
            started_at: chrono::Utc::now(),
        }))
    }

    fn graph_request(body: &str, forwarded_for: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/graph")
            .header("content-type", "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_client_identifier() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers), "anonymous");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_identifier(&headers), "10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_identifier(&headers), "203.0.113.7");
    }

    #[tokio::test]
    async fn test_health() {
        let resp = app(RateLimiter::new(None, false, 10, Duration::from_secs(60)))
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_graph_returns_camel_case_payload_and_limit_headers() {
        let db = common::db::AsyncDb::open_memory().await.unwrap();
        let limiter = RateLimiter::new(Some(db), true, 10, Duration::from_secs(60));
        let resp = app(limiter)
            .oneshot(graph_request(&format!(r#"{{"address":"{W}"}}"#), "1.1.1.1"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "10");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "9");

        let body = json_body(resp).await;
        assert_eq!(body["nodes"].as_array().unwrap().len(), 4);
        assert_eq!(body["edges"].as_array().unwrap().len(), 4);
        assert_eq!(body["totalTransactions"], 4);
        assert!(body["processedAt"].is_string());
        assert!(body["entityInfo"].is_object());
        assert!(body["tokenMetadata"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_is_bad_request() {
        let resp = app(RateLimiter::new(None, false, 10, Duration::from_secs(60)))
            .oneshot(graph_request(r#"{"address":"0xnotsolana"}"#, "1.1.1.1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "INVALID_ADDRESS");
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let db = common::db::AsyncDb::open_memory().await.unwrap();
        let app = app(RateLimiter::new(Some(db), true, 1, Duration::from_secs(60)));
        let body = format!(r#"{{"address":"{W}"}}"#);

        let first = app
            .clone()
            .oneshot(graph_request(&body, "5.5.5.5"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(graph_request(&body, "5.5.5.5"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
        assert_eq!(json_body(second).await["error"], "RATE_LIMITED");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PipelineError::UpstreamRateLimited.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PipelineError::ProcessingTimeout {
                budget_secs: 45,
                stage: "enrichment"
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            PipelineError::Configuration("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
