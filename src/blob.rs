//! Content addressing (spec component C): computing and extracting CIDs,
//! and walking a manifest tree to build a path -> CID map.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::manifest::{DirNode, FileNode, Node};

/// CIDv1 multicodec for raw binary (0x55), varint-encoded as a single byte
/// since it's < 0x80.
const CODEC_RAW: u8 = 0x55;
/// Multihash function code for SHA-256, varint-encoded as a single byte.
const MULTIHASH_SHA256: u8 = 0x12;
/// SHA-256 digest length in bytes.
const SHA256_LEN: u8 = 0x20;

/// Compute a CIDv1 (raw codec, SHA-256 multihash) for `bytes`, serialized
/// in base32-lower with the multibase prefix `b`. Well-known inputs
/// produce ids beginning with `bafkrei` (the fixed prefix for this
/// codec/hash/version combination).
pub fn compute_content_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);

    // CIDv1 byte layout: <version=1><codec><multihash-code><multihash-len><digest>
    let mut buf = Vec::with_capacity(4 + digest.len());
    buf.push(0x01); // CID version 1
    buf.push(CODEC_RAW);
    buf.push(MULTIHASH_SHA256);
    buf.push(SHA256_LEN);
    buf.extend_from_slice(&digest);

    let encoded = base32::encode(base32::Alphabet::Rfc4648Lower { padding: false }, &buf);
    format!("b{encoded}")
}

/// Extract the string form of a content id from any of the blob-reference
/// shapes the manifest format allows: `{$link: "<cid>"}`, `{ref: <cid-obj>
/// | {$link: "<cid>"}}`, `{cid: "<cid>"}`. Returns `None` for anything
/// else (including bare scalars and empty objects).
pub fn extract_content_id(blob_ref: &serde_json::Value) -> Option<String> {
    let obj = blob_ref.as_object()?;

    if let Some(link) = obj.get("$link").and_then(|v| v.as_str()) {
        return Some(link.to_string());
    }

    if let Some(cid) = obj.get("cid").and_then(|v| v.as_str()) {
        return Some(cid.to_string());
    }

    if let Some(r) = obj.get("ref") {
        if let Some(s) = r.as_str() {
            return Some(s.to_string());
        }
        if let Some(r_obj) = r.as_object() {
            if let Some(link) = r_obj.get("$link").and_then(|v| v.as_str()) {
                return Some(link.to_string());
            }
        }
    }

    None
}

/// Walk a directory tree, returning a map from slash-joined file path to
/// `(blob_ref, content_id)` for every file leaf whose blob reference has
/// an extractable content id. Leaves whose content id can't be extracted
/// are skipped (the caller's manifest validation step is expected to
/// reject such a manifest before this is reached).
pub fn extract_blob_map(root: &DirNode) -> BTreeMap<String, (serde_json::Value, String)> {
    let mut out = BTreeMap::new();
    walk(root, &mut Vec::new(), &mut out);
    out
}

fn walk(
    dir: &DirNode,
    prefix: &mut Vec<String>,
    out: &mut BTreeMap<String, (serde_json::Value, String)>,
) {
    for entry in &dir.entries {
        prefix.push(entry.name.clone());
        match &entry.node {
            Node::File(file) => {
                let raw = file.blob.raw.clone();
                if let Some(cid) = extract_content_id(&raw) {
                    out.insert(prefix.join("/"), (raw, cid));
                }
            }
            Node::Directory(sub) => walk(sub, prefix, out),
        }
    }
    prefix.pop();
}

/// Walk a directory tree, returning `(path, file_node, content_id)` for
/// every file leaf with an extractable content id -- the input the Site
/// Store's snapshot swap needs (path plus the leaf's encoding/MIME
/// overrides, not just its blob reference).
pub fn extract_files_to_materialize(root: &DirNode) -> Vec<(String, FileNode, String)> {
    let mut out = Vec::new();
    walk_files(root, &mut Vec::new(), &mut out);
    out
}

fn walk_files(dir: &DirNode, prefix: &mut Vec<String>, out: &mut Vec<(String, FileNode, String)>) {
    for entry in &dir.entries {
        prefix.push(entry.name.clone());
        match &entry.node {
            Node::File(file) => {
                if let Some(cid) = extract_content_id(&file.blob.raw) {
                    out.push((prefix.join("/"), file.clone(), cid));
                }
            }
            Node::Directory(sub) => walk_files(sub, prefix, out),
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compute_content_id_is_deterministic() {
        let a = compute_content_id(b"hello world");
        let b = compute_content_id(b"hello world");
        assert_eq!(a, b);
        assert!(a.starts_with("bafkrei"));
    }

    #[test]
    fn compute_content_id_differs_for_different_bytes() {
        let a = compute_content_id(b"hello world");
        let b = compute_content_id(b"hello world!");
        assert_ne!(a, b);
    }

    #[test]
    fn extract_content_id_handles_all_shapes() {
        assert_eq!(
            extract_content_id(&json!({"$link": "abc"})),
            Some("abc".to_string())
        );
        assert_eq!(
            extract_content_id(&json!({"ref": {"$link": "abc"}})),
            Some("abc".to_string())
        );
        assert_eq!(
            extract_content_id(&json!({"ref": "abc"})),
            Some("abc".to_string())
        );
        assert_eq!(
            extract_content_id(&json!({"cid": "abc"})),
            Some("abc".to_string())
        );
    }

    #[test]
    fn extract_content_id_rejects_non_matching_shapes() {
        assert_eq!(extract_content_id(&json!({})), None);
        assert_eq!(extract_content_id(&json!(null)), None);
        assert_eq!(extract_content_id(&json!("string")), None);
        assert_eq!(extract_content_id(&json!(123)), None);
    }
}
