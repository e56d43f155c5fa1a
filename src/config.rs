//! Process-wide configuration, assembled once at startup from environment
//! variables. Every field has a default; a parse failure on a field that
//! *was* set surfaces as a single startup error rather than silently
//! falling back.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EdgeError, Result};

/// Top-level process configuration. Constructed once in [`Config::from_env`]
/// and shared behind an `Arc` via [`crate::router::state::AppState`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Base domain suffix used for routing (e.g. `wisp.place`).
    pub base_host: String,
    /// HTTP listen port.
    pub port: u16,
    /// Root directory under which per-site snapshots are materialized.
    pub cache_dir: PathBuf,
    /// Connection string for the shared relational database.
    pub database_url: String,
    /// Upstream commit-stream (firehose) endpoint.
    pub upstream_stream: String,
    /// Run the one-shot backfill procedure at boot.
    pub backfill_on_startup: bool,
    /// When true, skip all writes to the shared database.
    pub cache_only: bool,
    /// `tracing` env-filter directive.
    pub log_level: String,
    /// Grace period for in-flight requests during shutdown.
    pub shutdown_grace: Duration,
    /// Interval between DNS verifier passes.
    pub dns_verify_interval: Duration,
    /// Interval between domain-cache sweeps.
    pub domain_cache_sweep_interval: Duration,
    /// General outbound HTTP timeout (identity/manifest fetches).
    pub fetch_timeout: Duration,
    /// Outbound HTTP timeout for blob downloads during materialize.
    pub blob_fetch_timeout: Duration,
    /// Maximum JSON response size accepted by the safe fetcher.
    pub max_json_bytes: u64,
    /// Maximum blob size accepted when materializing a snapshot.
    pub max_blob_bytes: u64,
    /// Concurrency cap for copying unchanged files during a snapshot swap.
    pub swap_copy_concurrency: usize,
    /// Concurrency cap for downloading changed blobs during a snapshot swap.
    pub swap_download_concurrency: usize,
    /// Concurrency cap for the one-shot backfill procedure.
    pub backfill_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_host: "wisp.place".to_string(),
            port: 8080,
            cache_dir: PathBuf::from("./cache"),
            database_url: String::new(),
            upstream_stream: "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos"
                .to_string(),
            backfill_on_startup: false,
            cache_only: false,
            log_level: "info".to_string(),
            shutdown_grace: Duration::from_secs(10),
            dns_verify_interval: Duration::from_secs(60 * 60),
            domain_cache_sweep_interval: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(120),
            blob_fetch_timeout: Duration::from_secs(5 * 60),
            max_json_bytes: 1024 * 1024,
            max_blob_bytes: 100 * 1024 * 1024,
            swap_copy_concurrency: 10,
            swap_download_concurrency: 3,
            backfill_concurrency: 4,
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// [`Default`] for anything unset. `DATABASE_URL` is the only field
    /// required to be non-empty once assembled (checked by callers that
    /// need the database, not here, since `CACHE_ONLY` deployments may
    /// legitimately omit it).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| EdgeError::BadRequest(format!("invalid PORT: {v}")))?,
            Err(_) => defaults.port,
        };

        let shutdown_grace = match std::env::var("SHUTDOWN_GRACE_SECONDS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .map_err(|_| EdgeError::BadRequest(format!("invalid SHUTDOWN_GRACE_SECONDS: {v}")))?,
            ),
            Err(_) => defaults.shutdown_grace,
        };

        let dns_verify_interval = match std::env::var("DNS_VERIFY_INTERVAL_MINUTES") {
            Ok(v) => Duration::from_secs(
                60 * v
                    .parse::<u64>()
                    .map_err(|_| EdgeError::BadRequest(format!("invalid DNS_VERIFY_INTERVAL_MINUTES: {v}")))?,
            ),
            Err(_) => defaults.dns_verify_interval,
        };

        let domain_cache_sweep_interval = match std::env::var("DOMAIN_CACHE_SWEEP_MINUTES") {
            Ok(v) => Duration::from_secs(
                60 * v
                    .parse::<u64>()
                    .map_err(|_| EdgeError::BadRequest(format!("invalid DOMAIN_CACHE_SWEEP_MINUTES: {v}")))?,
            ),
            Err(_) => defaults.domain_cache_sweep_interval,
        };

        Ok(Self {
            base_host: std::env::var("BASE_HOST").unwrap_or(defaults.base_host),
            port,
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            upstream_stream: std::env::var("UPSTREAM_STREAM").unwrap_or(defaults.upstream_stream),
            backfill_on_startup: env_bool("BACKFILL_ON_STARTUP", defaults.backfill_on_startup),
            cache_only: env_bool("CACHE_ONLY", defaults.cache_only),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            shutdown_grace,
            dns_verify_interval,
            domain_cache_sweep_interval,
            ..defaults
        })
    }

    /// The well-known `sites.<base_host>` path-prefix virtual host.
    pub fn path_prefix_host(&self) -> String {
        format!("sites.{}", self.base_host)
    }

    /// Whether `host` is a platform subdomain of `base_host` (including the
    /// path-prefix host and DNS-hash host, which callers classify first).
    pub fn is_platform_subdomain(&self, host: &str) -> bool {
        host != self.base_host && host.ends_with(&format!(".{}", self.base_host))
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.base_host, "wisp.place");
        assert_eq!(c.port, 8080);
        assert!(!c.cache_only);
    }

    #[test]
    fn path_prefix_host_is_sites_subdomain() {
        let c = Config::default();
        assert_eq!(c.path_prefix_host(), "sites.wisp.place");
    }

    #[test]
    fn platform_subdomain_detection() {
        let c = Config::default();
        assert!(c.is_platform_subdomain("alice.wisp.place"));
        assert!(!c.is_platform_subdomain("wisp.place"));
        assert!(!c.is_platform_subdomain("example.com"));
    }
}
