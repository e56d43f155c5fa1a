//! In-process content caches (spec §4.G): file bytes, per-file metadata,
//! and rewritten HTML, each evicted by an approximate total-byte budget
//! rather than entry count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;

use crate::manifest::FileMeta;

/// `(user_id, site_name, path)`.
pub type FileKey = (String, String, String);
/// `(user_id, site_name, path, base)` -- rewritten HTML is keyed on the
/// base path it was rebased against, since the same file rewrites
/// differently under different mount points.
pub type HtmlKey = (String, String, String, String);

/// The three content caches, sized by an approximate byte budget.
#[derive(Clone)]
pub struct ContentCache {
    bytes: Cache<FileKey, Arc<Vec<u8>>>,
    meta: Cache<FileKey, Arc<FileMeta>>,
    html: Cache<HtmlKey, Arc<String>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ContentCache {
    /// Build the three caches, each weighted by its value's byte size and
    /// capped at `capacity_bytes`.
    pub fn new(capacity_bytes: u64) -> Self {
        let bytes = Cache::builder()
            .weigher(|_k: &FileKey, v: &Arc<Vec<u8>>| v.len().min(u32::MAX as usize) as u32)
            .max_capacity(capacity_bytes)
            .support_invalidation_closures()
            .build();

        let meta = Cache::builder()
            .weigher(|_k: &FileKey, _v: &Arc<FileMeta>| 64u32)
            .max_capacity(capacity_bytes / 16)
            .support_invalidation_closures()
            .build();

        let html = Cache::builder()
            .weigher(|_k: &HtmlKey, v: &Arc<String>| v.len().min(u32::MAX as usize) as u32)
            .max_capacity(capacity_bytes)
            .support_invalidation_closures()
            .build();

        Self {
            bytes,
            meta,
            html,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fetch cached file bytes, if present. Counted towards the admin
    /// surface's cache hit ratio (spec §4.L).
    pub async fn get_bytes(&self, key: &FileKey) -> Option<Arc<Vec<u8>>> {
        let found = self.bytes.get(key).await;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert file bytes into the cache.
    pub async fn put_bytes(&self, key: FileKey, value: Arc<Vec<u8>>) {
        self.bytes.insert(key, value).await;
    }

    /// Fetch cached file metadata, if present.
    pub async fn get_meta(&self, key: &FileKey) -> Option<Arc<FileMeta>> {
        self.meta.get(key).await
    }

    /// Insert file metadata into the cache.
    pub async fn put_meta(&self, key: FileKey, value: Arc<FileMeta>) {
        self.meta.insert(key, value).await;
    }

    /// Fetch cached rewritten HTML, if present.
    pub async fn get_html(&self, key: &HtmlKey) -> Option<Arc<String>> {
        self.html.get(key).await
    }

    /// Insert rewritten HTML into the cache.
    pub async fn put_html(&self, key: HtmlKey, value: Arc<String>) {
        self.html.insert(key, value).await;
    }

    /// Evict every entry belonging to `(user_id, site_name)` from all
    /// three caches, run on every successful ingestion of that site.
    pub fn invalidate_site(&self, user_id: &str, site_name: &str) {
        let (u, s) = (user_id.to_string(), site_name.to_string());
        let _ = self
            .bytes
            .invalidate_entries_if(move |k, _v| k.0 == u && k.1 == s);

        let (u, s) = (user_id.to_string(), site_name.to_string());
        let _ = self
            .meta
            .invalidate_entries_if(move |k, _v| k.0 == u && k.1 == s);

        let (u, s) = (user_id.to_string(), site_name.to_string());
        let _ = self
            .html
            .invalidate_entries_if(move |k, _v| k.0 == u && k.1 == s);
    }

    /// Approximate entry counts and weighted byte usage, for the admin
    /// cache-stats endpoint.
    pub fn stats(&self) -> ContentCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        ContentCacheStats {
            bytes_entries: self.bytes.entry_count(),
            bytes_weighted: self.bytes.weighted_size(),
            meta_entries: self.meta.entry_count(),
            html_entries: self.html.entry_count(),
            html_weighted: self.html.weighted_size(),
            hit_ratio: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

/// Snapshot of cache occupancy for observability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContentCacheStats {
    /// Number of cached file-byte entries.
    pub bytes_entries: u64,
    /// Approximate total bytes occupied by the file-bytes cache.
    pub bytes_weighted: u64,
    /// Number of cached metadata entries.
    pub meta_entries: u64,
    /// Number of cached rewritten-HTML entries.
    pub html_entries: u64,
    /// Approximate total bytes occupied by the HTML cache.
    pub html_weighted: u64,
    /// `hits / (hits + misses)` across [`ContentCache::get_bytes`] calls
    /// since process start. `0.0` if no lookups have been made yet.
    pub hit_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = ContentCache::new(1024 * 1024);
        let key: FileKey = ("u1".to_string(), "blog".to_string(), "a.html".to_string());
        cache.put_bytes(key.clone(), Arc::new(b"hi".to_vec())).await;
        let got = cache.get_bytes(&key).await.unwrap();
        assert_eq!(*got, b"hi".to_vec());
    }

    #[tokio::test]
    async fn invalidate_site_clears_only_that_site() {
        let cache = ContentCache::new(1024 * 1024);
        let k1: FileKey = ("u1".to_string(), "blog".to_string(), "a.html".to_string());
        let k2: FileKey = ("u1".to_string(), "other".to_string(), "a.html".to_string());
        cache.put_bytes(k1.clone(), Arc::new(b"1".to_vec())).await;
        cache.put_bytes(k2.clone(), Arc::new(b"2".to_vec())).await;

        cache.invalidate_site("u1", "blog");
        cache.bytes.run_pending_tasks().await;

        assert!(cache.get_bytes(&k1).await.is_none());
        assert!(cache.get_bytes(&k2).await.is_some());
    }
}
