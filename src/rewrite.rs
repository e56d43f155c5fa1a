//! HTML attribute URL rewriter (spec component E).
//!
//! Rebase `src`/`href`/`action`/`data`/`poster`/`srcset` URLs inside an
//! HTML document so that absolute-path references keep working when the
//! document is served under a path prefix (e.g.
//! `/did:plc:u1/blog/index.html` instead of `/index.html`). Deliberately
//! regex-based rather than a full HTML parse, trading precision for
//! predictable latency; all regexes bound whitespace runs to <=5
//! characters to keep backtracking bounded (ReDoS-safe by construction).

use once_cell::sync::Lazy;
use regex::Regex;

const ATTRS: &[&str] = &["src", "href", "action", "data", "poster", "srcset"];

static ATTR_RE: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    ATTRS
        .iter()
        .map(|attr| {
            // Matches: attr="..." or attr='...', with at most 5 whitespace
            // characters allowed around the `=`.
            let pattern = format!(
                r#"(?i)\b{attr}\s{{0,5}}=\s{{0,5}}("([^"]*)"|'([^']*)')"#
            );
            (attr.to_string(), Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Rewrite every recognized attribute URL in `html`, rebasing relative and
/// absolute-path URLs under `base`. `doc_dir` is the slash-joined
/// directory of the document being rewritten (used to resolve relative
/// URLs before rebasing), with no leading or trailing slash (`""` for the
/// site root).
pub fn rewrite_html(html: &str, base: &str, doc_dir: &str) -> String {
    let base = normalize_base(base);
    let mut out = html.to_string();

    for (attr, re) in ATTR_RE.iter() {
        out = re
            .replace_all(&out, |caps: &regex::Captures| {
                let quote = if caps.get(2).is_some() { '"' } else { '\'' };
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or("");

                let rewritten = if attr == "srcset" {
                    rewrite_srcset(value, &base, doc_dir)
                } else {
                    rewrite_url(value, &base, doc_dir)
                };

                format!("{attr}={quote}{rewritten}{quote}")
            })
            .into_owned();
    }

    out
}

fn normalize_base(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    trimmed.to_string()
}

fn rewrite_srcset(value: &str, base: &str, doc_dir: &str) -> String {
    value
        .split(',')
        .map(|entry| {
            let entry = entry.trim();
            let mut parts = entry.splitn(2, char::is_whitespace);
            let url = parts.next().unwrap_or("");
            let descriptor = parts.next().unwrap_or("").trim();
            let rewritten = rewrite_url(url, base, doc_dir);
            if descriptor.is_empty() {
                rewritten
            } else {
                format!("{rewritten} {descriptor}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn rewrite_url(url: &str, base: &str, doc_dir: &str) -> String {
    if url.is_empty() || !should_rewrite(url) {
        return url.to_string();
    }

    if let Some(rest) = url.strip_prefix('/') {
        return format!("{base}/{rest}");
    }

    // Relative URL: resolve against the document's directory, normalize,
    // then prefix with base.
    let resolved = resolve_relative(doc_dir, url);
    if resolved.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{resolved}")
    }
}

fn should_rewrite(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || url.starts_with("//") {
        return false;
    }
    if url.starts_with('#') {
        return false;
    }
    if url.starts_with("./") || url.starts_with("../") {
        return true;
    }
    // A scheme like mailto:/data:/tel: -- anything with a `:` before the
    // first `/` that isn't a relative-path marker is left alone.
    if let Some(colon) = url.find(':') {
        let slash = url.find('/');
        if slash.is_none() || colon < slash.unwrap() {
            return false;
        }
    }
    true
}

fn resolve_relative(doc_dir: &str, url: &str) -> String {
    let mut stack: Vec<&str> = if doc_dir.is_empty() {
        Vec::new()
    } else {
        doc_dir.split('/').collect()
    };

    for seg in url.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    stack.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_absolute_path_href() {
        let out = rewrite_html(r#"<a href="/x/y">"#, "/b/", "");
        assert_eq!(out, r#"<a href="/b/x/y">"#);
    }

    #[test]
    fn leaves_absolute_urls_untouched() {
        let out = rewrite_html(r#"<a href="https://e/">"#, "/b/", "");
        assert_eq!(out, r#"<a href="https://e/">"#);
    }

    #[test]
    fn leaves_fragment_and_mailto_untouched() {
        assert_eq!(rewrite_html(r#"<a href="#top">"#, "/b", ""), r#"<a href="#top">"#);
        assert_eq!(
            rewrite_html(r#"<a href="mailto:a@b.com">"#, "/b", ""),
            r#"<a href="mailto:a@b.com">"#
        );
    }

    #[test]
    fn rewrites_srcset_pairs() {
        let out = rewrite_html(r#"<img srcset="/a 1x, /b 2x">"#, "/b", "");
        assert_eq!(out, r#"<img srcset="/b/a 1x, /b/b 2x">"#);
    }

    #[test]
    fn rewrites_relative_url_against_doc_dir() {
        let out = rewrite_html(r#"<link href="styles.css">"#, "/did:plc:u1/blog", "");
        assert_eq!(out, r#"<link href="/did:plc:u1/blog/styles.css">"#);
    }

    #[test]
    fn resolves_dot_dot_within_doc_dir() {
        let out = rewrite_html(r#"<a href="../shared.css">"#, "/b", "sub/page");
        assert_eq!(out, r#"<a href="/b/sub/shared.css">"#);
    }
}
