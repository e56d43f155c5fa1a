//! The closed MIME classifications from the glossary: which types are
//! worth gzip-compressing, and which arrive already compressed and
//! should never be re-compressed.

const COMPRESSIBLE: &[&str] = &[
    "text/html",
    "text/css",
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "text/xml",
    "application/xml",
    "application/json",
    "text/plain",
    "image/svg+xml",
];

/// Whether `mime` is in the closed compressible set, used both to decide
/// whether to leave content gzipped on disk and whether to advertise
/// `Content-Encoding: gzip` on the wire.
pub fn is_compressible(mime: &str) -> bool {
    let base = mime.split(';').next().unwrap_or(mime).trim();
    COMPRESSIBLE.iter().any(|m| m.eq_ignore_ascii_case(base))
}

/// Whether `mime` is already compressed (video/audio/most images, pdf,
/// zip, gzip) and should be served as-is, never re-compressed.
pub fn is_already_compressed(mime: &str) -> bool {
    let base = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
    if base == "image/svg+xml" {
        return false;
    }
    base.starts_with("video/")
        || base.starts_with("audio/")
        || base.starts_with("image/")
        || base == "application/pdf"
        || base == "application/zip"
        || base == "application/gzip"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_compressible_types() {
        assert!(is_compressible("text/html"));
        assert!(is_compressible("text/html; charset=utf-8"));
        assert!(is_compressible("image/svg+xml"));
        assert!(!is_compressible("image/png"));
    }

    #[test]
    fn classifies_already_compressed_types() {
        assert!(is_already_compressed("image/png"));
        assert!(is_already_compressed("video/mp4"));
        assert!(is_already_compressed("application/pdf"));
        assert!(!is_already_compressed("image/svg+xml"));
        assert!(!is_already_compressed("text/html"));
    }
}
