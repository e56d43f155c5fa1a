//! # wisp-edge
//!
//! The edge hosting layer for the Wisp decentralized static-site platform.
//! Resolves an inbound host/path to a user's site, serves its cached
//! snapshot (materializing on demand from the user's PDS when not yet
//! cached), and keeps that cache warm by following each site's commit
//! firehose.
//!
//! ## Architecture
//!
//! - `config`: environment-sourced process configuration
//! - `error`: the crate-wide error type and its HTTP status/body mapping
//! - `telemetry`: structured logging setup and the recent-log ring buffer
//! - `pathutil`: path normalization and traversal guards
//! - `manifest`: site settings, file metadata, and snapshot manifests
//! - `blob`: content-addressed blob fetch and verification
//! - `fetch`: upstream PDS/identity HTTP client
//! - `redirects`: `_redirects` parsing and matching
//! - `rewrite`: HTML rewriting for base-path rebasing
//! - `mimeutil`: MIME type inference
//! - `store`: on-disk snapshot storage
//! - `cache`: in-memory content/domain caches and the being-cached barrier
//! - `lock`: cross-process advisory locking during materialization
//! - `ingest`: firehose subscription and on-demand materialization
//! - `dns_verify`: custom-domain DNS verification reconciler
//! - `router`: request dispatch, routing, and response construction
//! - `admin`: internal read-only observability/health surface
//! - `supervisor`: process lifecycle orchestration
//! - `db`: shared relational catalog (`wisp_domain` / `custom_domain` / `site`)

pub mod admin;
pub mod blob;
pub mod cache;
pub mod config;
pub mod db;
pub mod dns_verify;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod lock;
pub mod manifest;
pub mod mimeutil;
pub mod pathutil;
pub mod redirects;
pub mod rewrite;
pub mod router;
pub mod store;
pub mod supervisor;
pub mod telemetry;

pub use error::{EdgeError, Result};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
