//! Path, site-name, and identifier sanitization (spec component B).
//!
//! These are the first line of defense against path traversal: every
//! filesystem path derived from an HTTP request is built from
//! [`sanitize_path`]'s output, never the raw request path.

use once_cell::sync::Lazy;
use regex::Regex;

static SITE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._~:-]+$").unwrap());

/// Normalize a user-supplied path: strip a leading slash, split on `/`,
/// drop empty segments, `.` segments, `..` segments, and any segment
/// containing a NUL byte, then rejoin with `/`.
///
/// This *filters* `..` rather than resolving it -- the result never walks
/// above the root, and never needs to, since dropped segments simply
/// vanish rather than cancelling a preceding segment.
pub fn sanitize_path(path: &str) -> String {
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != ".." && !seg.contains('\0'))
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate a site name: 1..512 bytes, not `.`/`..`, no `/`, `\`, NUL, and
/// matching `^[A-Za-z0-9._~:-]+$`.
pub fn is_valid_site_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 512 {
        return false;
    }
    if name == "." || name == ".." {
        return false;
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return false;
    }
    SITE_NAME_RE.is_match(name)
}

/// Validate a user/site identifier (a DID or a handle) before attempting
/// resolution: length >= 3, no `..`, no NUL. Full syntactic validation of
/// the DID/handle grammar happens downstream during resolution.
pub fn is_valid_identifier(id: &str) -> bool {
    id.len() >= 3 && !id.contains("..") && !id.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_path_filters_traversal() {
        assert_eq!(sanitize_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_path("//"), "");
        assert_eq!(sanitize_path("a//b//c"), "a/b/c");
        assert_eq!(sanitize_path("/a/./b/../c"), "a/b/c");
        assert_eq!(sanitize_path(""), "");
    }

    #[test]
    fn sanitize_path_drops_nul_segments() {
        assert_eq!(sanitize_path("a/b\0c/d"), "a/d");
    }

    #[test]
    fn site_name_validation() {
        assert!(is_valid_site_name("my-blog"));
        assert!(is_valid_site_name("a.b.c"));
        assert!(!is_valid_site_name(""));
        assert!(!is_valid_site_name("."));
        assert!(!is_valid_site_name(".."));
        assert!(!is_valid_site_name("a/b"));
        assert!(!is_valid_site_name("a\\b"));
        assert!(!is_valid_site_name("a b"));
        assert!(!is_valid_site_name(&"x".repeat(513)));
    }

    #[test]
    fn identifier_validation() {
        assert!(is_valid_identifier("did:plc:abc123"));
        assert!(!is_valid_identifier("ab"));
        assert!(!is_valid_identifier("a/../b"));
        assert!(!is_valid_identifier("a\0b"));
    }
}
