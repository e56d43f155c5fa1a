//! Site manifest, settings, and snapshot-descriptor data types (spec §3).

use serde::{Deserialize, Serialize};

/// The root record of a site, as written by the user's PDS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteManifest {
    /// Display name, 1..512 bytes, non-empty.
    pub site: String,
    /// Root directory node of the file tree.
    pub root: DirNode,
    /// RFC 3339 creation timestamp.
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Informational; not relied on for correctness.
    #[serde(rename = "fileCount", skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u64>,
}

/// An ordered directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirNode {
    /// Entries in manifest order.
    pub entries: Vec<DirEntry>,
}

/// One named entry in a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    /// Non-empty, no `/`, `\`, or NUL.
    pub name: String,
    /// The entry's payload.
    pub node: Node,
}

/// A directory entry is either a file leaf or another directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    /// A file leaf.
    File(FileNode),
    /// A nested directory.
    Directory(DirNode),
}

/// A file leaf: a reference to a content-addressed blob plus overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// The blob this leaf references.
    pub blob: BlobRef,
    /// Present iff the stored blob bytes are gzip-compressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    /// Overrides the blob's declared MIME type when present.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// When true, the blob bytes are themselves base64 of the logical
    /// payload (one more encoding layer beneath `encoding`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<bool>,
}

/// The one recognized content encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// gzip-compressed bytes.
    Gzip,
}

/// A reference to a content-addressed blob, in one of the shapes accepted
/// by [`crate::blob::extract_content_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRef {
    /// Declared MIME type of the blob (may be overridden by `FileNode::mime_type`).
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Declared byte size of the blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// The raw JSON value carrying the content id, in one of the
    /// `{$link}` / `{ref}` / `{cid}` shapes.
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

/// Per-site routing/behavior settings (all optional; absence means the
/// corresponding default/disabled behavior).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiteSettings {
    /// Ordered filenames to try for a directory request. Defaults to
    /// `["index.html", "index.htm"]` via [`SiteSettings::index_files`].
    #[serde(rename = "indexFiles", skip_serializing_if = "Option::is_none")]
    pub index_files: Option<Vec<String>>,
    /// Enable `X` -> `X.html` -> `X/<index>` fallback for extensionless paths.
    #[serde(rename = "cleanUrls", default)]
    pub clean_urls: bool,
    /// Render a directory listing when no index matches.
    #[serde(rename = "directoryListing", default)]
    pub directory_listing: bool,
    /// Filename served (200) for any otherwise-unmatched path.
    #[serde(rename = "spaMode", skip_serializing_if = "Option::is_none")]
    pub spa_mode: Option<String>,
    /// Filename served (404) for any otherwise-unmatched path.
    #[serde(rename = "custom404", skip_serializing_if = "Option::is_none")]
    pub custom_404: Option<String>,
    /// Custom response headers, optionally scoped to a glob-matched path.
    #[serde(default)]
    pub headers: Vec<CustomHeader>,
}

impl SiteSettings {
    /// The configured index file list, or the default.
    pub fn index_files(&self) -> Vec<String> {
        self.index_files
            .clone()
            .unwrap_or_else(|| vec!["index.html".to_string(), "index.htm".to_string()])
    }

    /// `spaMode`, `directoryListing`, and `custom404` are supposed to be
    /// mutually exclusive (enforced upstream at write time). A record that
    /// violates this is treated as having none of the three set, rather
    /// than guessing which one wins.
    pub fn routing_mode(&self) -> RoutingMode {
        let set_count = self.spa_mode.is_some() as u8
            + self.directory_listing as u8
            + self.custom_404.is_some() as u8;
        if set_count > 1 {
            return RoutingMode::None;
        }
        if let Some(f) = &self.spa_mode {
            return RoutingMode::Spa(f.clone());
        }
        if self.directory_listing {
            return RoutingMode::DirectoryListing;
        }
        if let Some(f) = &self.custom_404 {
            return RoutingMode::Custom404(f.clone());
        }
        RoutingMode::None
    }
}

/// The (at most one) configured unmatched-path fallback behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingMode {
    /// No fallback mode configured (or an inconsistent record).
    None,
    /// `spaMode`: serve the named file with 200 for any unmatched path.
    Spa(String),
    /// `directoryListing`: render a listing of the root with 404.
    DirectoryListing,
    /// `custom404`: serve the named file with 404.
    Custom404(String),
}

/// One custom response header, optionally scoped by a glob path pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
    /// Glob (`*`/`?`) matched against the request path; `None` means "all paths".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The `.metadata.json` snapshot descriptor written alongside each
/// materialized site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Content id of the manifest record that produced this snapshot.
    #[serde(rename = "recordCid")]
    pub record_cid: String,
    /// Materialization time, in milliseconds since the Unix epoch.
    #[serde(rename = "cachedAt")]
    pub cached_at: i64,
    /// DID of the authoring repo.
    pub did: String,
    /// Record key of the manifest within the authoring repo.
    pub rkey: String,
    /// Map from slash-joined file path to the blob content id last used
    /// to materialize it.
    #[serde(rename = "fileCids")]
    pub file_cids: std::collections::BTreeMap<String, String>,
}

/// The `<file>.meta` sidecar, written only when a file overrides the
/// blob's declared encoding/MIME type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileMeta {
    /// Present iff the file is stored gzip-compressed on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    /// Overridden MIME type, if any.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_index_files() {
        let s = SiteSettings::default();
        assert_eq!(s.index_files(), vec!["index.html", "index.htm"]);
    }

    #[test]
    fn routing_mode_picks_the_one_set_field() {
        let mut s = SiteSettings::default();
        s.spa_mode = Some("index.html".to_string());
        assert_eq!(s.routing_mode(), RoutingMode::Spa("index.html".to_string()));
    }

    #[test]
    fn routing_mode_rejects_conflicting_fields() {
        let mut s = SiteSettings::default();
        s.spa_mode = Some("index.html".to_string());
        s.directory_listing = true;
        assert_eq!(s.routing_mode(), RoutingMode::None);
    }
}
