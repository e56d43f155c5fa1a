//! CORS and security-header middleware for the public HTTP surface,
//! grounded in the teacher's `cors_layer`/`security_headers_middleware`
//! (`src/api/middleware.rs`), trimmed to what this spec actually asks
//! for: permissive CORS on every response (including errors), a small
//! fixed set of security headers, no JWT/rate-limit/API-key machinery
//! (this crate has no end-user auth surface).

use axum::http::{header, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use tower_http::cors::CorsLayer;

/// Permissive CORS: any origin, `GET`/`HEAD`/`OPTIONS` only, per spec §6.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
}

/// A small fixed set of security headers applied to every response,
/// mirroring the teacher's `security_headers_middleware` minus the
/// `Content-Security-Policy` directive (this service proxies arbitrary
/// user HTML, so it cannot declare one on the user's behalf).
pub async fn security_headers_middleware(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn security_headers_are_present() {
        let app = Router::new()
            .route("/", get(|| async { "hi" }))
            .layer(axum::middleware::from_fn(security_headers_middleware));

        let resp = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    }
}
