//! Process lifecycle orchestration (spec component M): startup sequencing,
//! the optional one-shot backfill, and coordinated graceful shutdown,
//! grounded in the teacher's `SaasApp::new`/`run` (`src/saas_app.rs`) and
//! its `watch`-channel shutdown signaling in
//! `src/enterprise/cluster/failover.rs`.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::sync::Semaphore;

use crate::cache::{Barrier, ContentCache, DomainCache};
use crate::config::Config;
use crate::db;
use crate::dns_verify::DnsVerifier;
use crate::error::Result;
use crate::ingest::IngestWorker;
use crate::router::{self, AppState, SharedState};
use crate::store::SiteStore;
use crate::telemetry::RecentLogs;

/// Everything the supervisor starts and owns the lifecycle of.
pub struct Services {
    /// Shared state handed to the router and the admin surface.
    pub state: SharedState,
    /// Sends `true` to begin a coordinated shutdown of every background task.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Assemble configuration, the database pool, the disk store, and every
/// in-memory cache; optionally run the one-shot backfill; return the
/// pieces [`run`] needs. `logs` is the ring buffer [`crate::telemetry::init`]
/// already attached to the global subscriber.
pub async fn bootstrap(config: Config, logs: RecentLogs) -> Result<Services> {
    let config = Arc::new(config);
    tracing::info!(base_host = %config.base_host, port = config.port, "starting wisp-edge");

    let pool = db::connect(&config.database_url).await?;
    let store = SiteStore::new(&config.cache_dir).await?;
    let barrier = Barrier::new();
    let content_cache = ContentCache::new(512 * 1024 * 1024);
    let domain_cache = DomainCache::new(std::time::Duration::from_secs(5 * 60));

    let ingest = Arc::new(IngestWorker::new(
        config.clone(),
        pool.clone(),
        store.clone(),
        barrier.clone(),
        content_cache.clone(),
    ));
    let dns_verifier = Arc::new(DnsVerifier::new(pool.clone(), domain_cache.clone(), &config));

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        pool,
        store,
        barrier,
        content_cache,
        domain_cache,
        ingest,
        dns_verifier,
        logs,
    });

    if config.backfill_on_startup {
        backfill(&state).await;
    }

    let (shutdown_tx, _) = watch::channel(false);

    Ok(Services { state, shutdown_tx })
}

/// Iterate every cataloged site and materialize it if not already cached,
/// bounded by `config.backfill_concurrency` (spec §9 "On start").
async fn backfill(state: &SharedState) {
    let sites = match db::list_all_sites(&state.pool).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "backfill: failed to list sites, skipping");
            return;
        }
    };

    tracing::info!(count = sites.len(), "backfill starting");
    let semaphore = Arc::new(Semaphore::new(state.config.backfill_concurrency.max(1)));
    let mut handles = Vec::with_capacity(sites.len());

    for site in sites {
        let state = state.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            if state.store.is_cached(&site.user_id, &site.site_name).await {
                return;
            }
            if let Err(e) = state.ingest.materialize_on_demand(&site.user_id, &site.site_name).await {
                tracing::warn!(
                    did = %site.user_id,
                    site = %site.site_name,
                    error = %e,
                    "backfill: materialize failed"
                );
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("backfill complete");
}

/// Run the server and every background task until a shutdown signal is
/// received, then drain in-flight requests up to `config.shutdown_grace`
/// before returning.
pub async fn run(services: Services) -> Result<()> {
    let Services { state, shutdown_tx } = services;

    let mut sweeper_shutdown = shutdown_tx.subscribe();
    let domain_cache = state.domain_cache.clone();
    let sweep_interval = state.config.domain_cache_sweep_interval;
    let sweeper = tokio::spawn(async move {
        tokio::select! {
            _ = crate::cache::domain::run_sweeper(domain_cache, sweep_interval) => {}
            _ = sweeper_shutdown.changed() => {}
        }
    });

    let mut verifier_shutdown = shutdown_tx.subscribe();
    let verify_interval = state.config.dns_verify_interval;
    let verifier_handle = state.dns_verifier.clone();
    let verifier = tokio::spawn(async move {
        tokio::select! {
            _ = crate::dns_verify::run_loop(verifier_handle, verify_interval) => {}
            _ = verifier_shutdown.changed() => {}
        }
    });

    let ingest_shutdown = shutdown_tx.subscribe();
    let ingest_handle = state.ingest.clone();
    let ingest_task = tokio::spawn(async move {
        ingest_handle.run(ingest_shutdown).await;
    });

    let app = router::build(state.clone());
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(crate::error::EdgeError::Io)?;
    tracing::info!(%addr, "listening");

    let grace = state.config.shutdown_grace;
    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received, draining connections");
            let _ = shutdown_tx.send(true);
            let _ = shutdown_rx.changed().await;
        })
        .await
        .map_err(crate::error::EdgeError::Io)?;

    tokio::time::sleep(grace).await;
    let _ = tokio::join!(sweeper, verifier, ingest_task);
    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = ctrl_c => {}
    }
}
