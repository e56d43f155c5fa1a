//! On-disk site snapshot store (spec component F).
//!
//! Disk layout:
//! ```text
//! <cache-root>/<user-id>/<site-name>/
//!   <path>/<file>
//!   <path>/<file>.meta
//!   .metadata.json
//! ```

mod swap;

pub use swap::{swap_snapshot, BlobDownloader, FileToMaterialize, SwapInput};

use std::path::{Path, PathBuf};

use crate::error::{EdgeError, Result};
use crate::manifest::{FileMeta, SnapshotMetadata};
use crate::pathutil::sanitize_path;

/// Handle onto the disk cache root. Cheap to clone (just a `PathBuf`);
/// all methods are pure path/IO helpers with no shared mutable state of
/// their own (the barrier and in-memory caches live alongside this in
/// `AppState`, not inside `SiteStore`).
#[derive(Debug, Clone)]
pub struct SiteStore {
    root: PathBuf,
}

impl SiteStore {
    /// Construct a store rooted at `root`, creating the directory if it
    /// does not exist.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory a given site's snapshot lives (or would live) in.
    pub fn site_dir(&self, user_id: &str, site_name: &str) -> PathBuf {
        self.root.join(user_id).join(site_name)
    }

    /// Whether a snapshot directory exists for this site (does not
    /// validate `.metadata.json`; callers that need a validated snapshot
    /// should read [`SiteStore::read_metadata`] as well).
    pub async fn is_cached(&self, user_id: &str, site_name: &str) -> bool {
        tokio::fs::metadata(self.site_dir(user_id, site_name))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Resolve a sanitized, absolute filesystem path for a file within a
    /// site's snapshot. The returned path always lies under
    /// `<root>/<user_id>/<site_name>/`, since `path` is run through
    /// [`sanitize_path`] first.
    pub fn get_cached_file_path(&self, user_id: &str, site_name: &str, path: &str) -> PathBuf {
        let clean = sanitize_path(path);
        let mut p = self.site_dir(user_id, site_name);
        if !clean.is_empty() {
            p.push(clean);
        }
        p
    }

    /// Read a file's bytes, returning `NotFound` if it doesn't exist.
    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    EdgeError::NotFound(format!("{}", path.display()))
                }
                _ => EdgeError::Io(e),
            })
    }

    /// Read the `.meta` sidecar for a file, if present.
    pub async fn read_file_meta(&self, file_path: &Path) -> Option<FileMeta> {
        let meta_path = sibling_meta_path(file_path);
        let bytes = tokio::fs::read(meta_path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Read and parse `.metadata.json` for a site's snapshot.
    pub async fn read_metadata(&self, user_id: &str, site_name: &str) -> Option<SnapshotMetadata> {
        let path = self.site_dir(user_id, site_name).join(".metadata.json");
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Remove a site's snapshot entirely (used by ingestion on delete).
    pub async fn remove_site(&self, user_id: &str, site_name: &str) -> Result<()> {
        let dir = self.site_dir(user_id, site_name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EdgeError::Io(e)),
        }
    }
}

/// The `<file>.meta` path for a given file path.
pub fn sibling_meta_path(file_path: &Path) -> PathBuf {
    let mut s = file_path.as_os_str().to_os_string();
    s.push(".meta");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_cached_file_path_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path()).await.unwrap();
        let p = store.get_cached_file_path("did:plc:u1", "blog", "../../etc/passwd");
        assert!(p.starts_with(store.site_dir("did:plc:u1", "blog")));
        assert_eq!(
            p,
            store.site_dir("did:plc:u1", "blog").join("etc/passwd")
        );
    }

    #[tokio::test]
    async fn is_cached_reflects_directory_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path()).await.unwrap();
        assert!(!store.is_cached("u1", "blog").await);
        tokio::fs::create_dir_all(store.site_dir("u1", "blog"))
            .await
            .unwrap();
        assert!(store.is_cached("u1", "blog").await);
    }
}
