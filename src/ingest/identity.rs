//! Resolution of `did:plc:*`/`did:web:*` identifiers to their owning
//! PDS's HTTP endpoint, plus platform-handle resolution for the
//! path-prefix host (spec §4.K step 1, §9 Open Question on `did:web`).

use serde::Deserialize;

use crate::error::{EdgeError, Result};
use crate::fetch::{self, Expect, FetchOptions};

const PLC_DIRECTORY: &str = "https://plc.directory";

#[derive(Debug, Deserialize)]
struct DidDocument {
    service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
struct DidService {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(rename = "serviceEndpoint")]
    service_endpoint: String,
}

/// Resolve a DID to its `AtprotoPersonalDataServer` endpoint.
pub async fn resolve_pds_endpoint(did: &str, timeout: std::time::Duration) -> Result<String> {
    let doc_url = did_document_url(did)?;
    let fetched = fetch::fetch(
        &doc_url,
        FetchOptions {
            max_bytes: 64 * 1024,
            timeout,
            expect: Expect::Json,
        },
    )
    .await?;
    let json = fetched
        .into_json()
        .ok_or_else(|| EdgeError::BadIdentifier(format!("non-JSON DID document for {did}")))?;
    let doc: DidDocument = serde_json::from_value(json)
        .map_err(|e| EdgeError::BadIdentifier(format!("malformed DID document for {did}: {e}")))?;

    doc.service
        .into_iter()
        .find(|s| s.service_type == "AtprotoPersonalDataServer")
        .map(|s| s.service_endpoint)
        .ok_or_else(|| EdgeError::BadIdentifier(format!("no PDS service in DID document for {did}")))
}

/// Resolve a path-prefix host's identifier segment (spec §4.K step 1) to a
/// DID: a `did:*` string passes through unchanged; anything else is
/// treated as a handle and resolved via its `.well-known/atproto-did`
/// HTTP endpoint. Fails with `BadIdentifier` for an unknown handle, an
/// unreachable host, or a response that isn't itself a `did:*` string.
pub async fn resolve_identifier(identifier: &str, timeout: std::time::Duration) -> Result<String> {
    if identifier.starts_with("did:") {
        return Ok(identifier.to_string());
    }

    let url = format!("https://{identifier}/.well-known/atproto-did");
    let fetched = fetch::fetch(
        &url,
        FetchOptions {
            max_bytes: 1024,
            timeout,
            expect: Expect::Bytes,
        },
    )
    .await
    .map_err(|e| EdgeError::BadIdentifier(format!("handle {identifier} did not resolve: {e}")))?;

    let bytes = fetched
        .into_bytes()
        .ok_or_else(|| EdgeError::BadIdentifier(format!("handle {identifier} returned no body")))?;
    let did = String::from_utf8(bytes)
        .map_err(|_| EdgeError::BadIdentifier(format!("handle {identifier} returned non-UTF8 body")))?
        .trim()
        .to_string();

    if !did.starts_with("did:") {
        return Err(EdgeError::BadIdentifier(format!(
            "handle {identifier} resolved to a non-DID value"
        )));
    }

    Ok(did)
}

/// Build the URL to fetch a DID document from, per identifier method.
fn did_document_url(did: &str) -> Result<String> {
    if let Some(rest) = did.strip_prefix("did:plc:") {
        if rest.is_empty() {
            return Err(EdgeError::BadIdentifier(did.to_string()));
        }
        return Ok(format!("{PLC_DIRECTORY}/{did}"));
    }

    if let Some(rest) = did.strip_prefix("did:web:") {
        return Ok(did_web_document_url(rest));
    }

    Err(EdgeError::BadIdentifier(did.to_string()))
}

/// `did:web` encodes a host (and optional path) with `:` in place of `/`,
/// percent-encoded. No path component means
/// `https://<host>/.well-known/did.json`; a path means
/// `https://<host>/<path>/did.json`.
fn did_web_document_url(rest: &str) -> String {
    let segments: Vec<String> = rest
        .split(':')
        .map(|seg| percent_decode(seg))
        .collect();

    match segments.split_first() {
        Some((host, &[])) => format!("https://{host}/.well-known/did.json"),
        Some((host, path)) => format!("https://{host}/{}/did.json", path.join("/")),
        None => String::new(),
    }
}

fn percent_decode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&segment[i + 1..i + 3], 16) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plc_did_uses_directory() {
        let url = did_document_url("did:plc:abc123").unwrap();
        assert_eq!(url, "https://plc.directory/did:plc:abc123");
    }

    #[test]
    fn did_web_without_path_uses_well_known() {
        let url = did_document_url("did:web:example.com").unwrap();
        assert_eq!(url, "https://example.com/.well-known/did.json");
    }

    #[test]
    fn did_web_with_path_uses_path_did_json() {
        let url = did_document_url("did:web:example.com:users:alice").unwrap();
        assert_eq!(url, "https://example.com/users/alice/did.json");
    }

    #[test]
    fn unknown_method_is_bad_identifier() {
        assert!(did_document_url("did:key:abc").is_err());
    }

    #[tokio::test]
    async fn did_identifier_passes_through_without_a_fetch() {
        let did = resolve_identifier("did:plc:abc123", std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(did, "did:plc:abc123");
    }
}
