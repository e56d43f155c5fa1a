//! Hostname classification and site resolution (spec component K, steps
//! 1-4). Turns `(Host header, request path)` into a `(user_id, site_name,
//! base_prefix, rewrite)` tuple, consulting the domain-lookup caches
//! before falling back to the shared database.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::db;
use crate::error::{EdgeError, Result};
use crate::ingest::identity;
use crate::pathutil::{is_valid_identifier, is_valid_site_name};
use crate::router::state::SharedState;

/// Which of the four host classes (spec §4.K) a request's `Host` header
/// falls into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostClass {
    /// `sites.<base-host>`: identifier/site-name are carried in the path.
    PathPrefix,
    /// `<16 hex>.dns.<base-host>`: the stable CNAME target used while a
    /// custom domain is being verified.
    DnsHash(String),
    /// `<label>.<base-host>`: a platform-issued subdomain.
    Platform(String),
    /// Any other hostname, looked up as a verified custom domain.
    Custom(String),
}

fn dns_hash_suffix_re(base_host: &str) -> Regex {
    Regex::new(&format!(r"(?i)^(.+)\.dns\.{}$", regex::escape(base_host))).unwrap()
}

/// Classify a `Host` header value against the configured base domain.
pub fn classify_host(host: &str, base_host: &str) -> Result<HostClass> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || base_host.is_empty() {
        return Err(EdgeError::BadRequest("Invalid base domain".to_string()));
    }

    if host == format!("sites.{base_host}") {
        return Ok(HostClass::PathPrefix);
    }

    if let Some(caps) = dns_hash_suffix_re(base_host).captures(&host) {
        let label = caps.get(1).unwrap().as_str();
        static HEX16: OnceCell<Regex> = OnceCell::new();
        let re = HEX16.get_or_init(|| Regex::new(r"^[0-9a-f]{16}$").unwrap());
        if re.is_match(label) {
            return Ok(HostClass::DnsHash(label.to_string()));
        }
        return Err(EdgeError::BadRequest("Invalid DNS hash".to_string()));
    }

    if let Some(label) = host.strip_suffix(&format!(".{base_host}")) {
        if !label.is_empty() {
            return Ok(HostClass::Platform(label.to_string()));
        }
    }

    Ok(HostClass::Custom(host))
}

/// A site resolved from a hostname (and, for the path-prefix host, a path
/// prefix), ready for the serve procedure.
#[derive(Debug, Clone)]
pub struct ResolvedSite {
    /// Owning user id (DID), resolved from a handle if one was given.
    pub user_id: String,
    /// Site name.
    pub site_name: String,
    /// Mount-point prefix to rebase HTML under (e.g. `/did:plc:u1/blog`),
    /// empty for hosts that serve at the document root.
    pub base_prefix: String,
    /// Whether HTML responses need rebasing under `base_prefix`.
    pub rewrite: bool,
    /// The request path with `base_prefix`'s two leading segments
    /// stripped off (only differs from the inbound path for
    /// [`HostClass::PathPrefix`]).
    pub content_path: String,
}

/// Resolve `(Host, path)` to a site, per spec §4.K steps 1-4.
pub async fn resolve(state: &SharedState, host: &str, path: &str) -> Result<ResolvedSite> {
    match classify_host(host, &state.config.base_host)? {
        HostClass::PathPrefix => resolve_path_prefix(state, path).await,
        HostClass::DnsHash(hash) => resolve_dns_hash(state, &hash, path).await,
        HostClass::Platform(label) => resolve_platform(state, &label, path).await,
        HostClass::Custom(domain) => resolve_custom(state, &domain, path).await,
    }
}

/// Split and validate a path-prefix-host request path into
/// `(identifier, site_name, rest)`, producing the spec's exact literal
/// 400 bodies for each malformed shape.
fn parse_path_prefix(path: &str) -> Result<(&str, &str, &str)> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.splitn(3, '/');
    let identifier = parts.next().unwrap_or("");
    let site = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");

    if identifier.is_empty() {
        return Err(EdgeError::BadRequest(
            "Invalid path format. Expected: /identifier/sitename/path".to_string(),
        ));
    }
    if site.is_empty() {
        return Err(EdgeError::BadRequest("Site name required".to_string()));
    }
    if !is_valid_identifier(identifier) {
        return Err(EdgeError::BadRequest("Invalid identifier".to_string()));
    }
    if !is_valid_site_name(site) {
        return Err(EdgeError::BadRequest("Invalid site name".to_string()));
    }

    Ok((identifier, site, rest))
}

async fn resolve_path_prefix(state: &SharedState, path: &str) -> Result<ResolvedSite> {
    let (identifier, site, rest) = parse_path_prefix(path)?;

    let user_id = identity::resolve_identifier(identifier, state.config.fetch_timeout)
        .await
        .map_err(|_| EdgeError::BadRequest("Invalid identifier".to_string()))?;

    Ok(ResolvedSite {
        base_prefix: format!("/{identifier}/{site}"),
        rewrite: true,
        content_path: rest.to_string(),
        user_id,
        site_name: site.to_string(),
    })
}

async fn resolve_dns_hash(state: &SharedState, hash: &str, path: &str) -> Result<ResolvedSite> {
    let site = match state.domain_cache.get_custom_by_hash(hash).await {
        Some(s) => s,
        None => {
            let row = db::lookup_custom_domain_by_hash(&state.pool, hash)
                .await?
                .ok_or_else(|| {
                    EdgeError::NotFound("Custom domain not found or not verified".to_string())
                })?;
            let site_name = row.site_name.ok_or_else(|| {
                EdgeError::NotFound("Domain not mapped to a site".to_string())
            })?;
            let resolved = (row.user_id, site_name);
            state
                .domain_cache
                .put_custom_by_hash(hash.to_string(), resolved.clone())
                .await;
            resolved
        }
    };

    no_rewrite_target(site, path)
}

async fn resolve_platform(state: &SharedState, label: &str, path: &str) -> Result<ResolvedSite> {
    let site = match state.domain_cache.get_platform(label).await {
        Some(s) => s,
        None => {
            let domain = format!("{label}.{}", state.config.base_host);
            let row = db::lookup_wisp_domain(&state.pool, &domain)
                .await?
                .ok_or_else(|| EdgeError::NotFound("Subdomain not registered".to_string()))?;
            let site_name = row
                .site_name
                .ok_or_else(|| EdgeError::NotFound("Domain not mapped to a site".to_string()))?;
            let resolved = (row.user_id, site_name);
            state
                .domain_cache
                .put_platform(label.to_string(), resolved.clone())
                .await;
            resolved
        }
    };

    no_rewrite_target(site, path)
}

async fn resolve_custom(state: &SharedState, domain: &str, path: &str) -> Result<ResolvedSite> {
    let site = match state.domain_cache.get_custom_by_name(domain).await {
        Some(s) => s,
        None => {
            let row = db::lookup_custom_domain_by_name(&state.pool, domain)
                .await?
                .ok_or_else(|| {
                    EdgeError::NotFound("Custom domain not found or not verified".to_string())
                })?;
            let site_name = row.site_name.ok_or_else(|| {
                EdgeError::NotFound("Domain not mapped to a site".to_string())
            })?;
            let resolved = (row.user_id, site_name);
            state
                .domain_cache
                .put_custom_by_name(domain.to_string(), resolved.clone())
                .await;
            resolved
        }
    };

    no_rewrite_target(site, path)
}

/// Build the resolved target for a host class that carries no path
/// prefix. Guards against a corrupt catalog row (a `site_name` that
/// could never have passed [`is_valid_site_name`] at ingestion time) by
/// surfacing a 500 rather than handing a bad path on to the store.
fn no_rewrite_target((user_id, site_name): (String, String), path: &str) -> Result<ResolvedSite> {
    if !is_valid_site_name(&site_name) {
        return Err(EdgeError::StorageError(format!(
            "malformed site_name in domain mapping row: {site_name:?}"
        )));
    }
    Ok(ResolvedSite {
        user_id,
        site_name,
        base_prefix: String::new(),
        rewrite: false,
        content_path: path.trim_start_matches('/').to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_path_prefix_host() {
        assert_eq!(
            classify_host("sites.wisp.place", "wisp.place").unwrap(),
            HostClass::PathPrefix
        );
    }

    #[test]
    fn classifies_dns_hash_host() {
        assert_eq!(
            classify_host("abcdef0123456789.dns.wisp.place", "wisp.place").unwrap(),
            HostClass::DnsHash("abcdef0123456789".to_string())
        );
    }

    #[test]
    fn invalid_dns_hash_is_bad_request() {
        assert!(classify_host("nothex.dns.wisp.place", "wisp.place").is_err());
    }

    #[test]
    fn classifies_platform_subdomain() {
        assert_eq!(
            classify_host("alice.wisp.place", "wisp.place").unwrap(),
            HostClass::Platform("alice".to_string())
        );
    }

    #[test]
    fn classifies_custom_domain() {
        assert_eq!(
            classify_host("example.com", "wisp.place").unwrap(),
            HostClass::Custom("example.com".to_string())
        );
    }

    #[test]
    fn empty_host_is_invalid_base_domain() {
        assert!(classify_host("", "wisp.place").is_err());
    }

    #[test]
    fn path_prefix_parses_identifier_site_and_rest() {
        let (identifier, site, rest) =
            parse_path_prefix("/did:plc:u1/blog/styles.css").unwrap();
        assert_eq!(identifier, "did:plc:u1");
        assert_eq!(site, "blog");
        assert_eq!(rest, "styles.css");
    }

    #[test]
    fn path_prefix_missing_identifier_is_invalid_format() {
        let err = parse_path_prefix("/").unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad request: Invalid path format. Expected: /identifier/sitename/path"
        );
    }

    #[test]
    fn path_prefix_missing_site_name_is_required() {
        let err = parse_path_prefix("/did:plc:u1").unwrap_err();
        assert!(matches!(err, EdgeError::BadRequest(msg) if msg == "Site name required"));
    }

    #[test]
    fn path_prefix_invalid_site_name() {
        let err = parse_path_prefix("/did:plc:u1/a@b/c").unwrap_err();
        assert!(matches!(err, EdgeError::BadRequest(msg) if msg == "Invalid site name"));
        let err2 = parse_path_prefix("/did:plc:u1/a b/c").unwrap_err();
        assert!(matches!(err2, EdgeError::BadRequest(msg) if msg == "Invalid site name"));
    }
}
