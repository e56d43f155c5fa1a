//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns [`EdgeError`] (or a type
//! convertible into it). Handlers at the HTTP boundary turn it into a
//! response via [`IntoResponse`]; everywhere else it just propagates with
//! `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Malformed input from an HTTP request (bad path, bad site name, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An identifier (DID or handle) failed to resolve.
    #[error("bad identifier: {0}")]
    BadIdentifier(String),

    /// No domain mapping, no snapshot, or no matching file.
    #[error("not found: {0}")]
    NotFound(String),

    /// A custom domain exists but is not `verified`.
    #[error("unverified domain: {0}")]
    UnverifiedDomain(String),

    /// A site manifest failed structural validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The safe fetcher refused to contact a blocked host.
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// An outbound request or operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// A declared or streamed response exceeded the configured cap.
    #[error("response too large (limit {limit} bytes)")]
    ResponseTooLarge {
        /// The configured byte limit that was exceeded.
        limit: u64,
    },

    /// The upstream PDS or identity directory could not be reached.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An ingestion event's declared content id disagreed with the PDS.
    #[error("content id mismatch: event={event_cid} pds={pds_cid}")]
    ContentMismatch {
        /// Content id carried by the ingestion event.
        event_cid: String,
        /// Content id observed by re-fetching the record from the PDS.
        pds_cid: String,
    },

    /// Local disk I/O failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// The distributed advisory lock could not be acquired.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// `_redirects` contained at least one unparsable line (non-fatal).
    #[error("malformed _redirects line {line_no}: {text}")]
    MalformedRedirects {
        /// 1-based line number of the offending line.
        line_no: usize,
        /// The offending line's raw text.
        text: String,
    },

    /// Wrapped I/O error, for `?`-propagation from stdlib/tokio::fs calls.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapped JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Wrapped database error.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Wrapped HTTP client error.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl EdgeError {
    fn status(&self) -> StatusCode {
        match self {
            EdgeError::BadRequest(_) | EdgeError::InvalidManifest(_) => StatusCode::BAD_REQUEST,
            EdgeError::BadIdentifier(_) => StatusCode::BAD_REQUEST,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::UnverifiedDomain(_) => StatusCode::NOT_FOUND,
            EdgeError::BlockedHost(_) => StatusCode::BAD_REQUEST,
            EdgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EdgeError::ResponseTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            EdgeError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            EdgeError::ContentMismatch { .. } => StatusCode::BAD_GATEWAY,
            EdgeError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::LockUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EdgeError::MalformedRedirects { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::Io(_) | EdgeError::Json(_) | EdgeError::Database(_) | EdgeError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(error = %self, status = %status, "request failed");
        (status, self.to_string()).into_response()
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EdgeError>;
