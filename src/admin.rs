//! Internal read-only admin/health surface (spec component L, §4.L):
//! recent logs, recent errors, aggregated metrics, cache statistics, and a
//! manual DNS-verifier trigger. Assumed protected by upstream network
//! policy -- no authentication is performed here, mirroring the spec's
//! explicit call-out that this internal surface (unlike the public
//! admin console) is in scope but deliberately unauthenticated.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::router::SharedState;
use crate::telemetry::LogQuery;

/// Build the admin/health route group, to be merged into the main router
/// ahead of its catch-all fallback.
pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/__internal__/observability/logs", get(logs))
        .route("/__internal__/observability/errors", get(errors))
        .route("/__internal__/observability/metrics", get(metrics))
        .route("/__internal__/observability/cache", get(cache_stats))
        .route("/__internal__/admin/verify-dns", post(verify_dns))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ingestion: crate::ingest::IngestHealth,
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let now_ms = now_ms();
    let ingestion = state.ingest.health(now_ms);
    let status = if ingestion.healthy { "ok" } else { "degraded" };
    Json(HealthResponse { status, ingestion })
}

async fn logs(State(state): State<SharedState>, Query(query): Query<LogQuery>) -> impl IntoResponse {
    Json(state.logs.query(&query))
}

async fn errors(State(state): State<SharedState>, Query(query): Query<LogQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);
    Json(state.logs.recent_errors(limit))
}

#[derive(serde::Deserialize)]
struct MetricsQuery {
    window_seconds: Option<i64>,
}

#[derive(Serialize)]
struct MetricsResponse {
    window_seconds: i64,
    by_level: std::collections::BTreeMap<String, u64>,
    cache: crate::cache::content::ContentCacheStats,
}

async fn metrics(State(state): State<SharedState>, Query(query): Query<MetricsQuery>) -> impl IntoResponse {
    let window_seconds = query.window_seconds.unwrap_or(300);
    let by_level = state.logs.metrics(now_ms(), window_seconds * 1000);
    Json(MetricsResponse {
        window_seconds,
        by_level,
        cache: state.content_cache.stats(),
    })
}

async fn cache_stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.content_cache.stats())
}

#[derive(Serialize)]
struct VerifyDnsResponse {
    stats: crate::dns_verify::VerifyRunStats,
}

async fn verify_dns(State(state): State<SharedState>) -> impl IntoResponse {
    let stats = state.dns_verifier.run_once().await;
    state.domain_cache.invalidate_all();
    Json(VerifyDnsResponse { stats })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
