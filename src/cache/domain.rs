//! Domain-lookup caches (spec §4.G): platform subdomains and custom
//! domains (by name and by DNS-hash), each with a 5-minute TTL and backed
//! by a periodic sweeper that just lets `moka` expire entries lazily plus
//! a forced `run_pending_tasks` pass, matching the teacher's periodic
//! reconciliation loops in `src/enterprise/compliance/retention.rs`.

use std::time::Duration;

use moka::future::Cache;

/// Resolved `(user_id, site_name)` pair a domain maps to.
pub type SiteRef = (String, String);

/// The three domain-lookup caches.
#[derive(Clone)]
pub struct DomainCache {
    platform: Cache<String, SiteRef>,
    custom_by_name: Cache<String, SiteRef>,
    custom_by_hash: Cache<String, SiteRef>,
}

impl DomainCache {
    /// Build all three caches with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        let build = || Cache::builder().time_to_live(ttl).build();
        Self {
            platform: build(),
            custom_by_name: build(),
            custom_by_hash: build(),
        }
    }

    /// Look up a platform subdomain label (e.g. `alice` for
    /// `alice.wisp.place`).
    pub async fn get_platform(&self, label: &str) -> Option<SiteRef> {
        self.platform.get(label).await
    }

    /// Cache a platform subdomain resolution.
    pub async fn put_platform(&self, label: String, site: SiteRef) {
        self.platform.insert(label, site).await;
    }

    /// Look up a verified custom domain by its full hostname.
    pub async fn get_custom_by_name(&self, domain: &str) -> Option<SiteRef> {
        self.custom_by_name.get(domain).await
    }

    /// Cache a custom-domain-by-name resolution.
    pub async fn put_custom_by_name(&self, domain: String, site: SiteRef) {
        self.custom_by_name.insert(domain, site).await;
    }

    /// Look up a custom domain by its DNS-hash host label.
    pub async fn get_custom_by_hash(&self, hash: &str) -> Option<SiteRef> {
        self.custom_by_hash.get(hash).await
    }

    /// Cache a custom-domain-by-hash resolution.
    pub async fn put_custom_by_hash(&self, hash: String, site: SiteRef) {
        self.custom_by_hash.insert(hash, site).await;
    }

    /// Drop every cached resolution. Used by the admin surface and by the
    /// DNS verifier when it demotes a domain from verified to unverified.
    pub fn invalidate_all(&self) {
        self.platform.invalidate_all();
        self.custom_by_name.invalidate_all();
        self.custom_by_hash.invalidate_all();
    }

    /// Force eviction of already-expired entries. Called periodically by
    /// the sweeper task so memory doesn't grow with stale entries between
    /// accesses (`moka` would otherwise only reclaim on next touch).
    pub async fn sweep(&self) {
        self.platform.run_pending_tasks().await;
        self.custom_by_name.run_pending_tasks().await;
        self.custom_by_hash.run_pending_tasks().await;
    }
}

/// Run [`DomainCache::sweep`] on `interval` until the returned task is
/// dropped or aborted.
pub async fn run_sweeper(cache: DomainCache, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        cache.sweep().await;
        tracing::debug!("domain cache sweep complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn platform_lookup_round_trips() {
        let cache = DomainCache::new(Duration::from_secs(300));
        assert!(cache.get_platform("alice").await.is_none());
        cache
            .put_platform("alice".to_string(), ("did:plc:u1".to_string(), "blog".to_string()))
            .await;
        assert_eq!(
            cache.get_platform("alice").await.unwrap(),
            ("did:plc:u1".to_string(), "blog".to_string())
        );
    }

    #[tokio::test]
    async fn invalidate_all_clears_every_cache() {
        let cache = DomainCache::new(Duration::from_secs(300));
        cache
            .put_platform("alice".to_string(), ("u1".to_string(), "blog".to_string()))
            .await;
        cache
            .put_custom_by_name("example.com".to_string(), ("u1".to_string(), "blog".to_string()))
            .await;
        cache.invalidate_all();
        cache.sweep().await;
        assert!(cache.get_platform("alice").await.is_none());
        assert!(cache.get_custom_by_name("example.com").await.is_none());
    }
}
