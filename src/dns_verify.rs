//! Periodic custom-domain reconciler (spec component J): re-verifies
//! every `verified` custom domain's TXT/CNAME claim and demotes it on
//! failure.

use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use sqlx::PgPool;

use crate::cache::DomainCache;
use crate::config::Config;
use crate::db;

/// Counters from one full reconciler pass, exposed via the admin surface
/// and the manual-trigger endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VerifyRunStats {
    /// Domains examined this pass.
    pub checked: u64,
    /// Domains that stayed (or became) verified.
    pub verified: u64,
    /// Domains demoted to unverified.
    pub failed: u64,
    /// Lookup errors encountered (counted separately from failed checks).
    pub errors: u64,
    /// Wall-clock duration of the pass, in milliseconds.
    pub duration_ms: u64,
}

/// The DNS verifier.
pub struct DnsVerifier {
    pool: PgPool,
    resolver: TokioAsyncResolver,
    domain_cache: DomainCache,
    base_host: String,
}

impl DnsVerifier {
    /// Build a verifier using the system resolver configuration.
    pub fn new(pool: PgPool, domain_cache: DomainCache, config: &Config) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            pool,
            resolver,
            domain_cache,
            base_host: config.base_host.clone(),
        }
    }

    /// Run one full pass over every currently-verified custom domain.
    pub async fn run_once(&self) -> VerifyRunStats {
        let start = std::time::Instant::now();
        let mut stats = VerifyRunStats::default();

        let domains = match db::list_verified_custom_domains(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to list verified custom domains");
                stats.errors += 1;
                return stats;
            }
        };

        for row in domains {
            stats.checked += 1;
            match self.verify_one(&row.domain, &row.user_id).await {
                Ok(true) => {
                    stats.verified += 1;
                    if let Err(e) = db::set_custom_domain_verified(&self.pool, &row.id, true).await {
                        tracing::error!(error = %e, domain = %row.domain, "failed to record verification success");
                        stats.errors += 1;
                    }
                }
                Ok(false) => {
                    stats.failed += 1;
                    tracing::warn!(domain = %row.domain, "custom domain failed reconciliation, demoting");
                    if let Err(e) = db::set_custom_domain_verified(&self.pool, &row.id, false).await {
                        tracing::error!(error = %e, domain = %row.domain, "failed to record verification failure");
                        stats.errors += 1;
                    } else {
                        self.domain_cache.invalidate_all();
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(error = %e, domain = %row.domain, "dns lookup error during reconciliation");
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// TXT is authoritative: `_wisp.<domain>` must contain `user_id`
    /// exactly. CNAME is advisory only (CNAME flattening at many DNS
    /// providers makes it invisible to a resolver query), so a CNAME
    /// mismatch or lookup failure never fails verification by itself.
    async fn verify_one(&self, domain: &str, user_id: &str) -> Result<bool, hickory_resolver::error::ResolveError> {
        let txt_name = format!("_wisp.{domain}");
        let txt_ok = match self.resolver.txt_lookup(txt_name).await {
            Ok(lookup) => lookup
                .iter()
                .any(|txt| txt.to_string() == user_id),
            Err(e) if is_nxdomain(&e) => false,
            Err(e) => return Err(e),
        };

        if !txt_ok {
            return Ok(false);
        }

        let expected_cname = format!(
            "{}.dns.{}",
            crate::db::custom_domain_id(user_id, domain),
            self.base_host
        );
        match self.resolver.lookup(domain, hickory_resolver::proto::rr::RecordType::CNAME).await {
            Ok(lookup) => {
                let matches = lookup
                    .iter()
                    .any(|rdata| rdata.to_string().trim_end_matches('.') == expected_cname);
                if !matches {
                    tracing::debug!(domain, "cname advisory check did not match, txt still authoritative");
                }
            }
            Err(_) => {
                tracing::debug!(domain, "cname lookup unavailable, ignored (advisory only)");
            }
        }

        Ok(true)
    }
}

fn is_nxdomain(e: &hickory_resolver::error::ResolveError) -> bool {
    matches!(
        e.kind(),
        hickory_resolver::error::ResolveErrorKind::NoRecordsFound { .. }
    )
}

/// Run [`DnsVerifier::run_once`] on `interval` until the task is aborted.
pub async fn run_loop(verifier: Arc<DnsVerifier>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let stats = verifier.run_once().await;
        tracing::info!(
            checked = stats.checked,
            verified = stats.verified,
            failed = stats.failed,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "dns verifier pass complete"
        );
    }
}
