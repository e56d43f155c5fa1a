//! The serve procedure (spec §4.K "Serve procedure", §4.D layered
//! routing): turns a resolved site and request path into a response,
//! applying redirects, index/clean-url/SPA/404 fallbacks, HTML rewriting,
//! and cache/CORS/custom headers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::cache::content::{FileKey, HtmlKey};
use crate::error::EdgeError;
use crate::manifest::{CustomHeader, Encoding, FileMeta, RoutingMode, SiteSettings};
use crate::pathutil::sanitize_path;
use crate::redirects::{self, RedirectRule, RedirectStatus, RequestContext};
use crate::rewrite;
use crate::router::dispatch::{self, ResolvedSite};
use crate::router::pages;
use crate::router::state::SharedState;

const SETTINGS_PATH: &str = "_settings.json";
const REDIRECTS_PATH: &str = "_redirects";

/// Entry point mounted as the router's fallback: handles every
/// `GET`/`HEAD`/`OPTIONS` request on any host/path (spec §6).
pub async fn serve(State(state): State<SharedState>, req: Request) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }

    let host = host_header(&req);
    let raw_path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    let resolved = match dispatch::resolve(&state, &host, &raw_path).await {
        Ok(r) => r,
        Err(e) => return literal_error_response(e),
    };

    if state.barrier.is_being(&resolved.user_id, &resolved.site_name) {
        return site_updating_response();
    }

    if !state.store.is_cached(&resolved.user_id, &resolved.site_name).await {
        if state
            .ingest
            .materialize_on_demand(&resolved.user_id, &resolved.site_name)
            .await
            .is_err()
        {
            return literal_error_response(EdgeError::NotFound("Site not found".to_string()));
        }
    }

    let request_path = sanitize_path(&resolved.content_path);
    let settings = load_settings(&state, &resolved).await;
    let (rules, parse_errors) = load_redirect_rules(&state, &resolved).await;
    for err in parse_errors {
        tracing::warn!(
            did = %resolved.user_id,
            site = %resolved.site_name,
            error = %err,
            "malformed _redirects line",
        );
    }

    let ctx = build_request_context(&req, &request_path, &query);
    let matched = redirects::match_request(&rules, &ctx);

    if let Some(matched) = matched {
        let requested_exists = read_site_bytes(&state, &resolved, &request_path).await.is_some();
        if matched.rule.force || !requested_exists {
            return apply_redirect(&state, &resolved, &settings, &matched, &query, &request_path).await;
        }
    }

    serve_resolved(&state, &resolved, &request_path, &settings).await
}

fn host_header(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn build_request_context<'a>(req: &'a Request, path: &'a str, query: &'a str) -> RequestContext<'a> {
    let country = req
        .headers()
        .get("cf-ipcountry")
        .or_else(|| req.headers().get("x-country"))
        .and_then(|v| v.to_str().ok());
    let accept_language = req.headers().get(header::ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok());
    let cookie_names = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(';')
                .filter_map(|kv| kv.split('=').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    RequestContext {
        path,
        query,
        country,
        accept_language,
        cookie_names,
    }
}

async fn apply_redirect(
    state: &SharedState,
    resolved: &ResolvedSite,
    settings: &SiteSettings,
    matched: &redirects::Matched<'_>,
    query: &str,
    request_path: &str,
) -> Response {
    let status = matched.rule.status;
    let target = redirects::render_target(matched, status, query);

    match status {
        RedirectStatus::Moved301 => redirect_response(StatusCode::MOVED_PERMANENTLY, &target),
        RedirectStatus::Found302 => redirect_response(StatusCode::FOUND, &target),
        RedirectStatus::Ok200 => {
            let path = sanitize_path(target.split('?').next().unwrap_or(&target));
            serve_path_or_fallback(state, resolved, settings, &path, request_path, StatusCode::OK).await
        }
        RedirectStatus::NotFound404 => {
            let path = sanitize_path(target.split('?').next().unwrap_or(&target));
            serve_path_or_fallback(state, resolved, settings, &path, request_path, StatusCode::NOT_FOUND).await
        }
    }
}

fn redirect_response(status: StatusCode, location: &str) -> Response {
    let mut response = Response::builder().status(status).body(Body::empty()).unwrap();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// The fallback routing cascade once no forced/blocking redirect applied
/// (spec §4.D steps 3-10).
enum RouteDecision {
    Serve(String, StatusCode),
    DirectoryListing,
    BuiltinNotFound,
}

async fn serve_resolved(
    state: &SharedState,
    resolved: &ResolvedSite,
    request_path: &str,
    settings: &SiteSettings,
) -> Response {
    match resolve_route(state, resolved, request_path, settings).await {
        RouteDecision::Serve(path, status) => {
            serve_path_or_fallback(state, resolved, settings, &path, request_path, status).await
        }
        RouteDecision::DirectoryListing => directory_listing_response(state, resolved).await,
        RouteDecision::BuiltinNotFound => not_found_response(),
    }
}

async fn resolve_route(
    state: &SharedState,
    resolved: &ResolvedSite,
    path: &str,
    settings: &SiteSettings,
) -> RouteDecision {
    let is_dir_request = path.is_empty() || path.ends_with('/');
    let trimmed = path.trim_end_matches('/');

    if !is_dir_request && read_site_bytes(state, resolved, path).await.is_some() {
        return RouteDecision::Serve(path.to_string(), StatusCode::OK);
    }

    if is_dir_request {
        for index in settings.index_files() {
            let candidate = join_path(trimmed, &index);
            if read_site_bytes(state, resolved, &candidate).await.is_some() {
                return RouteDecision::Serve(candidate, StatusCode::OK);
            }
        }
    }

    if settings.clean_urls && !path.is_empty() {
        let html_candidate = format!("{trimmed}.html");
        if read_site_bytes(state, resolved, &html_candidate).await.is_some() {
            return RouteDecision::Serve(html_candidate, StatusCode::OK);
        }
        for index in settings.index_files() {
            let candidate = join_path(trimmed, &index);
            if read_site_bytes(state, resolved, &candidate).await.is_some() {
                return RouteDecision::Serve(candidate, StatusCode::OK);
            }
        }
    }

    match settings.routing_mode() {
        RoutingMode::Spa(file) => return RouteDecision::Serve(file, StatusCode::OK),
        RoutingMode::Custom404(file) => return RouteDecision::Serve(file, StatusCode::NOT_FOUND),
        RoutingMode::DirectoryListing | RoutingMode::None => {}
    }

    for autodetected in ["404.html", "not_found.html"] {
        if read_site_bytes(state, resolved, autodetected).await.is_some() {
            return RouteDecision::Serve(autodetected.to_string(), StatusCode::NOT_FOUND);
        }
    }

    if settings.routing_mode() == RoutingMode::DirectoryListing {
        return RouteDecision::DirectoryListing;
    }

    RouteDecision::BuiltinNotFound
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

async fn serve_path_or_fallback(
    state: &SharedState,
    resolved: &ResolvedSite,
    settings: &SiteSettings,
    path: &str,
    request_path: &str,
    status: StatusCode,
) -> Response {
    match read_site_bytes(state, resolved, path).await {
        Some((bytes, meta)) => {
            let mime = effective_mime(path, &meta);
            let (body, gzip) = render_body(state, resolved, path, &mime, bytes, meta.encoding).await;
            let cache_control = if is_html(&mime) {
                "public, max-age=300"
            } else {
                "public, max-age=31536000, immutable"
            };
            finalize_response(status, &mime, body, gzip, cache_control, &settings.headers, request_path)
        }
        None => not_found_response(),
    }
}

async fn directory_listing_response(state: &SharedState, resolved: &ResolvedSite) -> Response {
    let dir = state.store.site_dir(&resolved.user_id, &resolved.site_name);
    let mut entries = Vec::new();
    if let Ok(mut read_dir) = tokio::fs::read_dir(&dir).await {
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ".metadata.json" {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
    }
    entries.sort();

    let body = pages::directory_listing_page(&resolved.base_prefix, &entries);
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}

fn not_found_response() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(pages::not_found_page()))
        .unwrap()
}

fn site_updating_response() -> Response {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-store")
        .header("retry-after", "3")
        .body(Body::from(pages::site_updating_page()))
        .unwrap()
}

/// Maps dispatch/materialize failures straight to the spec's literal text
/// bodies (§6), bypassing [`EdgeError::into_response`]'s `"kind: {0}"`
/// `Display` formatting -- that prefix would corrupt the exact strings
/// the spec mandates (e.g. `"not found: Site not found"` instead of
/// `"Site not found"`).
fn literal_error_response(err: EdgeError) -> Response {
    let (status, body) = match err {
        EdgeError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        EdgeError::NotFound(msg) | EdgeError::UnverifiedDomain(msg) => (StatusCode::NOT_FOUND, msg),
        EdgeError::StorageError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid site configuration".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "unexpected dispatch error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid site configuration".to_string(),
            )
        }
    };
    tracing::info!(status = %status, body = %body, "request rejected by dispatcher");
    (status, body).into_response()
}

async fn read_site_bytes(
    state: &SharedState,
    resolved: &ResolvedSite,
    path: &str,
) -> Option<(Arc<Vec<u8>>, Arc<FileMeta>)> {
    let key: FileKey = (resolved.user_id.clone(), resolved.site_name.clone(), path.to_string());
    let cached_bytes = state.content_cache.get_bytes(&key).await;
    let cached_meta = state.content_cache.get_meta(&key).await;
    if let (Some(bytes), Some(meta)) = (&cached_bytes, &cached_meta) {
        return Some((bytes.clone(), meta.clone()));
    }

    let fs_path = state.store.get_cached_file_path(&resolved.user_id, &resolved.site_name, path);
    let bytes = state.store.read_file(&fs_path).await.ok()?;
    let meta = state.store.read_file_meta(&fs_path).await.unwrap_or_default();

    let bytes = Arc::new(bytes);
    let meta = Arc::new(meta);
    state.content_cache.put_bytes(key.clone(), bytes.clone()).await;
    state.content_cache.put_meta(key, meta.clone()).await;
    Some((bytes, meta))
}

async fn load_settings(state: &SharedState, resolved: &ResolvedSite) -> SiteSettings {
    match read_site_bytes(state, resolved, SETTINGS_PATH).await {
        Some((bytes, _)) => serde_json::from_slice(&bytes).unwrap_or_default(),
        None => SiteSettings::default(),
    }
}

async fn load_redirect_rules(state: &SharedState, resolved: &ResolvedSite) -> (Vec<RedirectRule>, Vec<EdgeError>) {
    match read_site_bytes(state, resolved, REDIRECTS_PATH).await {
        Some((bytes, _)) => {
            let text = String::from_utf8_lossy(&bytes);
            redirects::parse(&text)
        }
        None => (Vec::new(), Vec::new()),
    }
}

fn is_html(mime: &str) -> bool {
    mime.split(';').next().unwrap_or(mime).trim().eq_ignore_ascii_case("text/html")
}

fn effective_mime(path: &str, meta: &FileMeta) -> String {
    meta.mime_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    })
}

/// Rebase HTML under the resolved site's mount point (spec §4.E), caching
/// the rewritten text keyed by `(site, path, base)`. Unlike the literal
/// spec prose, the cached entry is kept as plain UTF-8 rather than
/// re-gzipped -- the content caches are byte-budgeted regardless of
/// encoding, so this only trades a little memory headroom for simpler
/// code, never correctness.
async fn render_body(
    state: &SharedState,
    resolved: &ResolvedSite,
    path: &str,
    mime: &str,
    bytes: Arc<Vec<u8>>,
    encoding: Option<Encoding>,
) -> (Vec<u8>, bool) {
    if !(resolved.rewrite && is_html(mime)) {
        let gzip = encoding == Some(Encoding::Gzip) && crate::mimeutil::is_compressible(mime);
        return ((*bytes).clone(), gzip);
    }

    let html_key: HtmlKey = (
        resolved.user_id.clone(),
        resolved.site_name.clone(),
        path.to_string(),
        resolved.base_prefix.clone(),
    );
    if let Some(cached) = state.content_cache.get_html(&html_key).await {
        return (cached.as_bytes().to_vec(), false);
    }

    let decoded = if encoding == Some(Encoding::Gzip) {
        gunzip(&bytes).unwrap_or_else(|_| (*bytes).clone())
    } else {
        (*bytes).clone()
    };
    let text = String::from_utf8_lossy(&decoded).into_owned();
    let doc_dir = parent_dir(path);
    let rewritten = rewrite::rewrite_html(&text, &resolved.base_prefix, &doc_dir);

    state.content_cache.put_html(html_key, Arc::new(rewritten.clone())).await;
    (rewritten.into_bytes(), false)
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn content_type_header(mime: &str) -> String {
    if mime.starts_with("text/") || mime == "application/json" || mime == "image/svg+xml" {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

/// Glob match (`*` any run, `?` one char) for custom-header path scoping.
fn glob_match(pattern: &str, path: &str) -> bool {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map(|r| r.is_match(path)).unwrap_or(false)
}

fn finalize_response(
    status: StatusCode,
    mime: &str,
    body: Vec<u8>,
    gzip: bool,
    cache_control: &'static str,
    custom_headers: &[CustomHeader],
    request_path: &str,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type_header(mime))
        .header(header::CACHE_CONTROL, cache_control);
    if gzip {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
    }
    let mut response = builder.body(Body::from(body)).unwrap();

    let full_path = format!("/{request_path}");
    for custom in custom_headers {
        let scoped = custom.path.as_deref().map_or(true, |p| glob_match(p, &full_path));
        if !scoped {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(custom.name.as_bytes()),
            HeaderValue::from_str(&custom.value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_empty_dir() {
        assert_eq!(join_path("", "index.html"), "index.html");
        assert_eq!(join_path("docs", "index.html"), "docs/index.html");
    }

    #[test]
    fn parent_dir_splits_on_last_slash() {
        assert_eq!(parent_dir("a/b/c.html"), "a/b");
        assert_eq!(parent_dir("c.html"), "");
    }

    #[test]
    fn content_type_adds_charset_for_text() {
        assert_eq!(content_type_header("text/html"), "text/html; charset=utf-8");
        assert_eq!(content_type_header("image/png"), "image/png");
    }

    #[test]
    fn glob_match_supports_star_and_question_mark() {
        assert!(glob_match("/assets/*", "/assets/app.js"));
        assert!(!glob_match("/assets/*", "/index.html"));
        assert!(glob_match("/a?.html", "/ab.html"));
    }

    #[test]
    fn is_html_ignores_parameters() {
        assert!(is_html("text/html; charset=utf-8"));
        assert!(!is_html("text/plain"));
    }
}
