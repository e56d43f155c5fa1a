//! HTTP router construction: wires the admin/health routes and the
//! fallback serve handler together with the request-id, trace,
//! security-header, CORS, timeout, and panic-catching layers, mirroring
//! the teacher's `src/api/routes.rs` layer stack.

pub mod dispatch;
pub mod handlers;
pub mod middleware;
pub mod pages;
pub mod state;

use std::time::Duration;

use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::{AppState, SharedState};

/// Build the application's `axum::Router`, ready to hand to
/// `axum::serve`. The internal admin/health routes are matched first;
/// every other request (any host, any path, any method) falls through to
/// [`handlers::serve`], which does its own method filtering and `OPTIONS`
/// short-circuiting.
pub fn build(state: SharedState) -> Router {
    Router::new()
        .merge(crate::admin::routes())
        .fallback(handlers::serve)
        .layer(axum::middleware::from_fn(
            crate::telemetry::request_id_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
