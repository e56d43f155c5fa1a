//! Outbound SSRF-safe HTTP fetcher (spec component A).
//!
//! Every outbound call the edge makes -- identity resolution, manifest
//! fetch, blob download, PLC directory lookups -- goes through this
//! module rather than a bare `reqwest::Client`, so the blocklist and size
//! caps are applied uniformly.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use url::Url;

use crate::error::{EdgeError, Result};

const MAX_REDIRECTS: usize = 10;

/// What kind of response the caller expects, determining which cap
/// applies and how the body is decoded.
pub enum Expect {
    /// Parse the body as JSON, capped at `max_bytes`.
    Json,
    /// Return the raw body bytes, capped at `max_bytes`.
    Bytes,
}

/// Fetch options for one call.
pub struct FetchOptions {
    /// Maximum accepted response size, in bytes.
    pub max_bytes: u64,
    /// Total wall-clock timeout for the call (including redirects).
    pub timeout: Duration,
    /// Whether to decode the body as JSON or return raw bytes.
    pub expect: Expect,
}

/// The body returned by a successful fetch.
pub enum Fetched {
    /// Parsed JSON body.
    Json(serde_json::Value),
    /// Raw body bytes.
    Bytes(Vec<u8>),
}

impl Fetched {
    /// Unwrap a JSON-expected fetch; panics (in caller logic, not here) if
    /// misused -- callers pick `Expect::Json` up front so this always
    /// matches.
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Fetched::Json(v) => Some(v),
            Fetched::Bytes(_) => None,
        }
    }

    /// Unwrap a bytes-expected fetch.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Fetched::Bytes(b) => Some(b),
            Fetched::Json(_) => None,
        }
    }
}

/// Outbound fetch entry point. Validates the URL scheme, checks the host
/// (and each redirect hop's host) against the SSRF blocklist, enforces a
/// total timeout and a size cap, then returns the decoded body.
pub async fn fetch(url: &str, opts: FetchOptions) -> Result<Fetched> {
    tokio::time::timeout(opts.timeout, fetch_inner(url, &opts))
        .await
        .map_err(|_| EdgeError::Timeout(opts.timeout))?
}

async fn fetch_inner(url: &str, opts: &FetchOptions) -> Result<Fetched> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(EdgeError::Http)?;

    let mut current = url.to_string();
    for _ in 0..=MAX_REDIRECTS {
        check_url(&current).await?;

        let resp = client.get(&current).send().await.map_err(EdgeError::Http)?;

        if resp.status().is_redirection() {
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| EdgeError::UpstreamUnavailable("redirect with no Location".into()))?;
            current = resolve_redirect(&current, location)?;
            continue;
        }

        if let Some(len) = resp.content_length() {
            if len > opts.max_bytes {
                return Err(EdgeError::ResponseTooLarge { limit: opts.max_bytes });
            }
        }

        let bytes = read_capped(resp, opts.max_bytes).await?;

        return match opts.expect {
            Expect::Json => {
                let value: serde_json::Value =
                    serde_json::from_slice(&bytes).map_err(EdgeError::Json)?;
                Ok(Fetched::Json(value))
            }
            Expect::Bytes => Ok(Fetched::Bytes(bytes)),
        };
    }

    Err(EdgeError::UpstreamUnavailable("too many redirects".into()))
}

async fn read_capped(resp: reqwest::Response, max_bytes: u64) -> Result<Vec<u8>> {
    use futures::StreamExt;

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(EdgeError::Http)?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            return Err(EdgeError::ResponseTooLarge { limit: max_bytes });
        }
    }
    Ok(buf)
}

fn resolve_redirect(base: &str, location: &str) -> Result<String> {
    let base_url =
        Url::parse(base).map_err(|e| EdgeError::UpstreamUnavailable(format!("bad base url: {e}")))?;
    let joined = base_url
        .join(location)
        .map_err(|e| EdgeError::UpstreamUnavailable(format!("bad redirect location: {e}")))?;
    Ok(joined.to_string())
}

/// Validate a URL's scheme and (resolved) host against the SSRF
/// blocklist. Public because the ingestion worker re-validates a PDS
/// endpoint URL before using it outside this module's own fetch path.
pub async fn check_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|_| EdgeError::BadRequest(format!("invalid url: {url}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(EdgeError::BadRequest(format!("invalid url scheme: {other}"))),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| EdgeError::BadRequest("url has no host".to_string()))?;

    if host.eq_ignore_ascii_case("localhost") {
        return Err(EdgeError::BlockedHost(host.to_string()));
    }

    // Check literal IP hosts directly; resolve hostnames and check every
    // address they resolve to, closing the DNS-rebinding gap a check on
    // the hostname string alone would leave open.
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(EdgeError::BlockedHost(host.to_string()));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| EdgeError::UpstreamUnavailable(format!("dns resolution failed: {e}")))?;

    let mut saw_any = false;
    for addr in addrs {
        saw_any = true;
        if is_blocked_ip(addr.ip()) {
            return Err(EdgeError::BlockedHost(host.to_string()));
        }
    }
    if !saw_any {
        return Err(EdgeError::UpstreamUnavailable(format!(
            "host did not resolve: {host}"
        )));
    }

    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified() {
        return true;
    }
    // Cloud-metadata address, reachable from within many hosted VMs.
    if ip == Ipv4Addr::new(169, 254, 169, 254) {
        return true;
    }
    false
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    // fc00::/7 unique local addresses.
    let segments = ip.segments();
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local.
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // fd00:ec2::254 -- AWS IMDSv2 IPv6 metadata address.
    if ip == "fd00:ec2::254".parse::<Ipv6Addr>().unwrap() {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        assert!(check_url("ftp://example.com").await.is_err());
        assert!(check_url("file:///etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn rejects_localhost_and_loopback() {
        assert!(check_url("http://localhost/").await.is_err());
        assert!(check_url("http://127.0.0.1/").await.is_err());
        assert!(check_url("http://[::1]/").await.is_err());
    }

    #[tokio::test]
    async fn rejects_private_ranges() {
        assert!(check_url("http://10.0.0.5/").await.is_err());
        assert!(check_url("http://172.16.0.1/").await.is_err());
        assert!(check_url("http://192.168.1.1/").await.is_err());
        assert!(check_url("http://169.254.169.254/").await.is_err());
        assert!(check_url("http://169.254.1.1/").await.is_err());
    }

    #[tokio::test]
    async fn accepts_public_literal_ip() {
        assert!(check_url("http://93.184.216.34/").await.is_ok());
    }
}
