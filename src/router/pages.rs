//! Built-in styled HTML pages: the generic 404, the "being cached" 503,
//! and a directory listing, used whenever a site has no content of its
//! own to serve for these cases (spec §4.D step 10, §4.G barrier, §4.K
//! serve procedure).

use std::fmt::Write as _;

/// The generic 404 page served when a site has no `custom404`/autodetected
/// `404.html`/`not_found.html` of its own.
pub fn not_found_page() -> String {
    r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>404 Not Found</title></head>
<body>
<h1>404 Not Found</h1>
<p>The page you requested does not exist.</p>
</body>
</html>
"#
    .to_string()
}

/// The "Site Updating" page served (with a 503 status and
/// `Retry-After: 3`) while the being-cached barrier is set for a site.
pub fn site_updating_page() -> String {
    r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Site Updating</title></head>
<body>
<h1>Site Updating</h1>
<p>This site is being updated. Please try again in a few seconds.</p>
</body>
</html>
"#
    .to_string()
}

/// Render a directory listing of `entries` (names, with a trailing `/`
/// already applied to subdirectories by the caller), linked relative to
/// `base` (the request's mount-point prefix, e.g. `/did:plc:u1/blog`).
pub fn directory_listing_page(base: &str, entries: &[String]) -> String {
    let mut body = String::new();
    writeln!(body, r#"<!doctype html>"#).unwrap();
    writeln!(body, r#"<html lang="en">"#).unwrap();
    writeln!(body, r#"<head><meta charset="utf-8"><title>Index</title></head>"#).unwrap();
    writeln!(body, "<body>").unwrap();
    writeln!(body, "<h1>Index</h1>").unwrap();
    writeln!(body, "<ul>").unwrap();
    for entry in entries {
        let href = format!("{}/{}", base.trim_end_matches('/'), entry);
        writeln!(body, r#"<li><a href="{href}">{entry}</a></li>"#).unwrap();
    }
    writeln!(body, "</ul>").unwrap();
    writeln!(body, "</body>").unwrap();
    writeln!(body, "</html>").unwrap();
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_page_mentions_404() {
        assert!(not_found_page().contains("404"));
    }

    #[test]
    fn site_updating_page_mentions_updating() {
        assert!(site_updating_page().contains("Site Updating"));
    }

    #[test]
    fn directory_listing_links_each_entry() {
        let page = directory_listing_page("/u1/blog", &["a.html".to_string(), "sub/".to_string()]);
        assert!(page.contains(r#"href="/u1/blog/a.html""#));
        assert!(page.contains(r#"href="/u1/blog/sub/""#));
    }
}
