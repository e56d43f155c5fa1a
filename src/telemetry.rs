//! Structured logging setup and per-request correlation.
//!
//! Grounded in the teacher's observability stack (`enterprise::tracing`),
//! trimmed to the part this spec actually needs: leveled, structured logs
//! with a request id threaded through each request's span. No OTLP/Jaeger
//! exporters -- nothing here leaves the process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::field::{Field, Visit};
use tracing::{Event, Instrument, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};
use uuid::Uuid;

/// Header carrying the per-request correlation id, both inbound (reused if
/// present) and outbound (always set on the response).
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One captured log event, as surfaced by the admin observability
/// endpoints (spec §4.L).
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// `tracing` level, e.g. `"INFO"`.
    pub level: String,
    /// `tracing` target (module path), used as the "source" filter.
    pub target: String,
    /// Rendered message, from the event's `message` field.
    pub message: String,
}

/// Filters accepted by the logs/errors admin endpoints.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct LogQuery {
    /// Only entries at or above this level (`"ERROR"`, `"WARN"`, ...).
    pub level: Option<String>,
    /// Only entries whose target contains this substring.
    pub source: Option<String>,
    /// Only entries whose message contains this substring, case-insensitive.
    pub search: Option<String>,
    /// Maximum entries to return (most recent first), default 100.
    pub limit: Option<usize>,
}

const RING_CAPACITY: usize = 2000;

/// A fixed-capacity, shared ring buffer of the most recent log events,
/// populated by [`RecentLogsLayer`] and queried by the admin surface.
#[derive(Clone)]
pub struct RecentLogs {
    inner: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl RecentLogs {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
        }
    }

    fn push(&self, entry: LogEntry) {
        let mut buf = self.inner.lock().unwrap();
        if buf.len() == RING_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    /// Return entries matching `query`, most recent first.
    pub fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        let buf = self.inner.lock().unwrap();
        let limit = query.limit.unwrap_or(100);
        buf.iter()
            .rev()
            .filter(|e| query.level.as_deref().map_or(true, |lvl| e.level.eq_ignore_ascii_case(lvl)))
            .filter(|e| query.source.as_deref().map_or(true, |s| e.target.contains(s)))
            .filter(|e| {
                query
                    .search
                    .as_deref()
                    .map_or(true, |s| e.message.to_ascii_lowercase().contains(&s.to_ascii_lowercase()))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries at `ERROR` level only, most recent first.
    pub fn recent_errors(&self, limit: usize) -> Vec<LogEntry> {
        self.query(&LogQuery {
            level: Some("ERROR".to_string()),
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Count entries per level observed within the last `window_ms`
    /// milliseconds, keyed by level name.
    pub fn metrics(&self, now_ms: i64, window_ms: i64) -> std::collections::BTreeMap<String, u64> {
        let buf = self.inner.lock().unwrap();
        let mut counts = std::collections::BTreeMap::new();
        for entry in buf.iter() {
            if now_ms - entry.timestamp_ms <= window_ms {
                *counts.entry(entry.level.clone()).or_insert(0u64) += 1;
            }
        }
        counts
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// A `tracing_subscriber::Layer` that records every event into a
/// [`RecentLogs`] ring buffer, independent of whatever formatting layer
/// renders events to stdout.
struct RecentLogsLayer {
    logs: RecentLogs,
}

impl<S> Layer<S> for RecentLogsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);

        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        self.logs.push(LogEntry {
            timestamp_ms,
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.0,
        });
    }
}

/// Initialize the global `tracing` subscriber and return the shared
/// ring-buffer handle the admin surface reads from. Call once, at process
/// start.
pub fn init(log_level: &str) -> RecentLogs {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let logs = RecentLogs::new();

    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(RecentLogsLayer { logs: logs.clone() });

    tracing::subscriber::set_global_default(subscriber)
        .expect("tracing subscriber already initialized");

    logs
}

/// Axum middleware that assigns (or forwards) a request id and opens a
/// `tracing` span tagged with it for the duration of the request, mirroring
/// the teacher's `request_id_middleware` in `src/api/middleware.rs`.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, HeaderValue::from_str(&request_id).unwrap());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
