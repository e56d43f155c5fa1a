//! Ingestion worker (spec component I): a long-lived client to the
//! upstream commit stream, turning create/update/delete events into
//! snapshot swaps, spoof-guarded against a PDS re-fetch.
//!
//! The wire framing this connects to is out of this crate's documented
//! scope (see DESIGN.md); each inbound websocket text frame is expected
//! to decode as one [`CommitEvent`].

pub mod identity;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use crate::blob::extract_files_to_materialize;
use crate::cache::{Barrier, ContentCache};
use crate::config::Config;
use crate::db;
use crate::error::{EdgeError, Result};
use crate::fetch::{self, Expect, FetchOptions};
use crate::manifest::SiteManifest;
use crate::pathutil::is_valid_site_name;
use crate::store::{swap_snapshot, FileToMaterialize, SiteStore, SwapInput};

const MANIFEST_COLLECTION: &str = "place.wisp.site";
const HEALTHY_EVENT_GAP: Duration = Duration::from_secs(5 * 60);

/// The kind of change a commit-stream event carries.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A manifest record was written for the first time.
    Create,
    /// A manifest record was overwritten.
    Update,
    /// A manifest record was removed.
    Delete,
}

/// One decoded commit-stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitEvent {
    /// What changed.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// DID of the authoring repo.
    pub did: String,
    /// Record key of the manifest within that repo.
    pub rkey: String,
    /// Content id the event itself claims, if carried. Re-verified
    /// against the PDS before being trusted (spoof guard).
    pub cid: Option<String>,
}

/// Point-in-time ingestion health, exposed via the admin surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestHealth {
    /// Whether the websocket connection is currently up.
    pub connected: bool,
    /// Milliseconds since the Unix epoch of the last processed event, if any.
    pub last_event_time_ms: Option<i64>,
    /// Milliseconds since the last processed event, if any.
    pub time_since_last_event_ms: Option<i64>,
    /// `connected && time_since_last_event < 5 minutes` (or no events yet).
    pub healthy: bool,
}

struct HealthState {
    connected: AtomicBool,
    last_event_time_ms: AtomicI64,
}

impl HealthState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            last_event_time_ms: AtomicI64::new(0),
        }
    }

    fn snapshot(&self, now_ms: i64) -> IngestHealth {
        let connected = self.connected.load(Ordering::Relaxed);
        let last = self.last_event_time_ms.load(Ordering::Relaxed);
        let (last_event_time_ms, time_since_last_event_ms) = if last == 0 {
            (None, None)
        } else {
            (Some(last), Some(now_ms - last))
        };
        let healthy = connected
            && time_since_last_event_ms
                .map(|gap| gap < HEALTHY_EVENT_GAP.as_millis() as i64)
                .unwrap_or(true);
        IngestHealth {
            connected,
            last_event_time_ms,
            time_since_last_event_ms,
            healthy,
        }
    }
}

/// Downloads a blob from a fixed PDS endpoint via the safe fetcher.
struct PdsBlobDownloader {
    pds_endpoint: String,
    did: String,
    timeout: Duration,
    max_bytes: u64,
}

#[async_trait::async_trait]
impl crate::store::BlobDownloader for PdsBlobDownloader {
    async fn download(&self, cid: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/xrpc/com.atproto.sync.getBlob?did={}&cid={}",
            self.pds_endpoint.trim_end_matches('/'),
            urlencode(&self.did),
            urlencode(cid)
        );
        let fetched = fetch::fetch(
            &url,
            FetchOptions {
                max_bytes: self.max_bytes,
                timeout: self.timeout,
                expect: Expect::Bytes,
            },
        )
        .await?;
        fetched
            .into_bytes()
            .ok_or_else(|| EdgeError::UpstreamUnavailable(format!("blob {cid} fetch returned no bytes")))
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// The ingestion worker.
pub struct IngestWorker {
    config: Arc<Config>,
    pool: PgPool,
    store: SiteStore,
    barrier: Barrier,
    content_cache: ContentCache,
    health: Arc<HealthState>,
}

impl IngestWorker {
    /// Construct a worker over the given shared state. `config.cache_only`
    /// gates the `site` upsert/delete writes below, not the pool itself --
    /// domain lookups still need to read `wisp_domain`/`custom_domain`
    /// regardless of that flag.
    pub fn new(
        config: Arc<Config>,
        pool: PgPool,
        store: SiteStore,
        barrier: Barrier,
        content_cache: ContentCache,
    ) -> Self {
        Self {
            config,
            pool,
            store,
            barrier,
            content_cache,
            health: Arc::new(HealthState::new()),
        }
    }

    /// Current health snapshot.
    pub fn health(&self, now_ms: i64) -> IngestHealth {
        self.health.snapshot(now_ms)
    }

    /// Run the reconnect-with-backoff subscription loop until `shutdown`
    /// fires. Each inner connection attempt processes events until the
    /// socket closes or errors, then backs off exponentially (capped at
    /// 30s) before retrying.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);

        loop {
            if *shutdown.borrow() {
                return;
            }

            tokio::select! {
                result = self.connect_and_consume(&mut shutdown) => {
                    self.health.connected.store(false, Ordering::Relaxed);
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "commit stream connection lost, reconnecting");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            if *shutdown.borrow() {
                return;
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }

    async fn connect_and_consume(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let (ws, _resp) = tokio_tungstenite::connect_async(&self.config.upstream_stream)
            .await
            .map_err(|e| EdgeError::UpstreamUnavailable(format!("commit stream connect failed: {e}")))?;
        self.health.connected.store(true, Ordering::Relaxed);
        tracing::info!(url = %self.config.upstream_stream, "commit stream connected");

        let (_write, mut read) = ws.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let msg = msg.map_err(|e| EdgeError::UpstreamUnavailable(e.to_string()))?;
                    if let Message::Text(text) = msg {
                        self.handle_frame(&text).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let event: CommitEvent = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "malformed commit stream frame, skipping");
                return;
            }
        };

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        self.health.last_event_time_ms.store(now_ms, Ordering::Relaxed);

        let result = match event.kind {
            EventKind::Create | EventKind::Update => self.handle_upsert(&event).await,
            EventKind::Delete => self.handle_delete(&event).await,
        };

        if let Err(e) = result {
            tracing::error!(
                did = %event.did,
                rkey = %event.rkey,
                error = %e,
                "ingestion event failed"
            );
        }
    }

    async fn fetch_record(&self, did: &str, rkey: &str) -> Result<(serde_json::Value, String)> {
        let pds = identity::resolve_pds_endpoint(did, self.config.fetch_timeout).await?;
        let url = format!(
            "{}/xrpc/com.atproto.repo.getRecord?repo={}&collection={}&rkey={}",
            pds.trim_end_matches('/'),
            urlencode(did),
            MANIFEST_COLLECTION,
            urlencode(rkey)
        );
        let fetched = fetch::fetch(
            &url,
            FetchOptions {
                max_bytes: self.config.max_json_bytes,
                timeout: self.config.fetch_timeout,
                expect: Expect::Json,
            },
        )
        .await?;
        let body = fetched
            .into_json()
            .ok_or_else(|| EdgeError::UpstreamUnavailable("record fetch returned no body".into()))?;

        let cid = body
            .get("cid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EdgeError::UpstreamUnavailable("record response missing cid".into()))?
            .to_string();
        let value = body
            .get("value")
            .cloned()
            .ok_or_else(|| EdgeError::UpstreamUnavailable("record response missing value".into()))?;

        Ok((value, cid))
    }

    async fn handle_upsert(&self, event: &CommitEvent) -> Result<()> {
        let (value, pds_cid) = match self.fetch_record(&event.did, &event.rkey).await {
            Ok(v) => v,
            Err(EdgeError::NotFound(_)) => return Ok(()), // record gone before we got to it
            Err(e) => return Err(e),
        };

        if let Some(event_cid) = &event.cid {
            if event_cid != &pds_cid {
                tracing::warn!(
                    did = %event.did,
                    rkey = %event.rkey,
                    event_cid,
                    pds_cid,
                    "dropping event with content id mismatch (spoof guard)"
                );
                return Ok(());
            }
        }

        self.materialize_record(&event.did, &event.rkey, value, pds_cid).await?;
        Ok(())
    }

    /// Materialize a manifest record already fetched from the PDS:
    /// validate, swap the on-disk snapshot, invalidate caches, and (unless
    /// `config.cache_only`) upsert the `site` catalog row under the
    /// distributed lock. Shared by the event-driven path
    /// ([`Self::handle_upsert`]) and the on-demand path a cache miss in
    /// the dispatcher takes ([`Self::materialize_on_demand`]).
    async fn materialize_record(
        &self,
        did: &str,
        rkey: &str,
        value: serde_json::Value,
        record_cid: String,
    ) -> Result<String> {
        let manifest: SiteManifest = serde_json::from_value(value)
            .map_err(|e| EdgeError::InvalidManifest(format!("{e}")))?;

        if manifest.site.is_empty() || manifest.site.len() > 512 || !is_valid_site_name(&manifest.site) {
            return Err(EdgeError::InvalidManifest(format!(
                "invalid site name: {}",
                manifest.site
            )));
        }

        let user_id = did.to_string();
        let site_name = manifest.site.clone();
        let _barrier_guard = self.barrier.guard(&user_id, &site_name);

        let pds = identity::resolve_pds_endpoint(&user_id, self.config.fetch_timeout).await?;
        let downloader = Arc::new(PdsBlobDownloader {
            pds_endpoint: pds,
            did: user_id.clone(),
            timeout: self.config.blob_fetch_timeout,
            max_bytes: self.config.max_blob_bytes,
        });

        let files = extract_files_to_materialize(&manifest.root)
            .into_iter()
            .map(|(path, file, cid)| FileToMaterialize {
                path,
                cid,
                mime_type: file
                    .mime_type
                    .or(file.blob.mime_type.clone())
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                declared_encoding: file.encoding,
                base64: file.base64.unwrap_or(false),
            })
            .collect();

        swap_snapshot(
            &self.store,
            downloader as Arc<dyn crate::store::BlobDownloader>,
            SwapInput {
                user_id: user_id.clone(),
                site_name: site_name.clone(),
                did: user_id.clone(),
                rkey: rkey.to_string(),
                record_cid,
                files,
                copy_concurrency: self.config.swap_copy_concurrency,
                download_concurrency: self.config.swap_download_concurrency,
            },
        )
        .await?;

        self.content_cache.invalidate_site(&user_id, &site_name);

        if !self.config.cache_only {
            let key = format!("db:upsert:{user_id}:{site_name}");
            if let Some(mut guard) = crate::lock::try_acquire(&self.pool, &key).await? {
                db::upsert_site(guard.conn_mut(), &user_id, &site_name, &manifest.site, rkey).await?;
                guard.release().await?;
            }
        }

        tracing::info!(did = %user_id, site = %site_name, "site snapshot updated");
        Ok(site_name)
    }

    /// Materialize a site that the dispatcher found mapped but not yet
    /// cached on disk. Looks up the manifest's record key from the `site`
    /// catalog row (written by a prior ingestion event for this
    /// `(user_id, site_name)`), re-fetches the record from the PDS, and
    /// runs it through the same swap path as a live event. Returns
    /// `NotFound` if no catalog row exists yet -- this can happen for a
    /// `CACHE_ONLY` deployment that has never itself ingested the site and
    /// has no other edge's catalog write to read.
    pub async fn materialize_on_demand(&self, user_id: &str, site_name: &str) -> Result<()> {
        let site = db::find_site(&self.pool, user_id, site_name)
            .await?
            .ok_or_else(|| EdgeError::NotFound(format!("{user_id}/{site_name}")))?;

        let (value, pds_cid) = self.fetch_record(user_id, &site.rkey).await?;
        self.materialize_record(user_id, &site.rkey, value, pds_cid).await?;
        Ok(())
    }

    async fn handle_delete(&self, event: &CommitEvent) -> Result<()> {
        if self.fetch_record(&event.did, &event.rkey).await.is_ok() {
            tracing::info!(did = %event.did, rkey = %event.rkey, "delete event for record still present, ignoring");
            return Ok(());
        }

        let Some(site) = db::find_site_by_rkey(&self.pool, &event.did, &event.rkey).await? else {
            tracing::info!(did = %event.did, rkey = %event.rkey, "delete event for unknown record, nothing to remove");
            return Ok(());
        };

        self.content_cache.invalidate_site(&event.did, &site.site_name);
        self.store.remove_site(&event.did, &site.site_name).await?;
        if !self.config.cache_only {
            db::remove_site(&self.pool, &event.did, &site.site_name).await?;
        }
        tracing::info!(did = %event.did, site = %site.site_name, "site removed");
        Ok(())
    }
}
