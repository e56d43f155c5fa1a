//! Shared application state (spec §9 "Global mutable state"): the cache
//! root, configuration, in-memory caches, and being-cached barrier, built
//! once at startup and handed to every handler behind an `Arc`, following
//! the teacher's `Arc<AppState>` convention in `src/api/routes.rs`.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::{Barrier, ContentCache, DomainCache};
use crate::config::Config;
use crate::dns_verify::DnsVerifier;
use crate::ingest::IngestWorker;
use crate::store::SiteStore;
use crate::telemetry::RecentLogs;

/// Everything a request handler needs, shared across the process.
pub struct AppState {
    /// Process configuration.
    pub config: Arc<Config>,
    /// Shared relational pool. Domain lookups always read from it; the
    /// `site` catalog writes it performs during ingestion are gated by
    /// `config.cache_only` at the call sites, not by this type.
    pub pool: PgPool,
    /// On-disk snapshot store.
    pub store: SiteStore,
    /// Being-cached barrier.
    pub barrier: Barrier,
    /// File/meta/HTML content caches.
    pub content_cache: ContentCache,
    /// Domain-lookup caches.
    pub domain_cache: DomainCache,
    /// Ingestion worker handle, for health reporting and materializing a
    /// not-yet-cached site on first request.
    pub ingest: Arc<IngestWorker>,
    /// DNS verifier, for the manual-trigger admin endpoint.
    pub dns_verifier: Arc<DnsVerifier>,
    /// Recent-log ring buffer backing the admin observability endpoints.
    pub logs: RecentLogs,
}

pub type SharedState = Arc<AppState>;
