//! `_redirects` parsing, pattern compilation, and matching (spec component D).

use std::collections::HashMap;

use regex::Regex;

use crate::error::EdgeError;

/// One compiled redirect rule.
#[derive(Debug, Clone)]
pub struct RedirectRule {
    /// Original source pattern, for diagnostics.
    pub from: String,
    /// Destination template; may reference `:name`/`:splat` captures.
    pub to: String,
    /// Response status.
    pub status: RedirectStatus,
    /// Whether the rule applies even when the requested file exists.
    pub force: bool,
    /// Query parameters that must be present (any value) for a match.
    pub query_params: Vec<String>,
    /// `Country=` condition values (case-sensitive, comma-separated in source).
    pub country: Option<Vec<String>>,
    /// `Language=` condition values.
    pub language: Option<Vec<String>>,
    /// `Cookie=` condition values (cookie *names* that must be present).
    pub cookie: Option<Vec<String>>,
    compiled: Regex,
    capture_names: Vec<String>,
}

/// The closed set of statuses a redirect rule may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStatus {
    /// Internal rewrite: URL unchanged, different content served.
    Ok200,
    /// Permanent redirect.
    Moved301,
    /// Temporary redirect.
    Found302,
    /// Not-found rewrite.
    NotFound404,
}

impl RedirectStatus {
    fn parse(digits: &str) -> Option<Self> {
        match digits {
            "200" => Some(Self::Ok200),
            "301" => Some(Self::Moved301),
            "302" => Some(Self::Found302),
            "404" => Some(Self::NotFound404),
            _ => None,
        }
    }

    /// The numeric HTTP status code.
    pub fn code(self) -> u16 {
        match self {
            Self::Ok200 => 200,
            Self::Moved301 => 301,
            Self::Found302 => 302,
            Self::NotFound404 => 404,
        }
    }
}

/// Conditions evaluated against an incoming request.
pub struct RequestContext<'a> {
    /// Request path (already sanitized), without query string.
    pub path: &'a str,
    /// Raw query string, without the leading `?` (empty if none).
    pub query: &'a str,
    /// `cf-ipcountry` or `x-country` header value, if present.
    pub country: Option<&'a str>,
    /// `Accept-Language` header value, if present.
    pub accept_language: Option<&'a str>,
    /// Cookie names present on the request.
    pub cookie_names: Vec<&'a str>,
}

/// A successful match: the rule plus its captured variables.
pub struct Matched<'a> {
    /// The matching rule.
    pub rule: &'a RedirectRule,
    /// Named captures (`:name` -> value, `*` -> `splat`).
    pub captures: HashMap<String, String>,
}

/// Parse a `_redirects` file into an ordered list of rules. Malformed
/// lines are skipped (and reported via `errors`); the rest of the file is
/// still parsed.
pub fn parse(contents: &str) -> (Vec<RedirectRule>, Vec<EdgeError>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Ok(rule) => rules.push(rule),
            Err(_) => errors.push(EdgeError::MalformedRedirects {
                line_no: idx + 1,
                text: raw_line.to_string(),
            }),
        }
    }

    (rules, errors)
}

fn parse_line(line: &str) -> Result<RedirectRule, ()> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(());
    }

    let from = tokens[0].to_string();
    if !from.starts_with('/') {
        return Err(());
    }

    let mut idx = 1;
    let mut query_params = Vec::new();

    // Leading key=value tokens before the destination are required query
    // parameter names (the parameter must be present on the request,
    // regardless of the stated value, per spec).
    while idx < tokens.len() {
        let t = tokens[idx];
        if t.starts_with('/') || t.starts_with("http://") || t.starts_with("https://") {
            break;
        }
        let Some((k, _v)) = t.split_once('=') else {
            break;
        };
        query_params.push(k.to_string());
        idx += 1;
    }

    if idx >= tokens.len() {
        return Err(());
    }
    let to = tokens[idx].to_string();
    idx += 1;

    let mut status = RedirectStatus::Moved301;
    let mut force = false;
    let mut country = None;
    let mut language = None;
    let mut cookie = None;

    if idx < tokens.len() {
        let t = tokens[idx];
        let (digits, bang) = match t.strip_suffix('!') {
            Some(d) => (d, true),
            None => (t, false),
        };
        if digits.chars().all(|c| c.is_ascii_digit()) && !digits.is_empty() {
            status = RedirectStatus::parse(digits).ok_or(())?;
            force = bang;
            idx += 1;
        }
    }

    while idx < tokens.len() {
        let t = tokens[idx];
        let (key, value) = t.split_once('=').ok_or(())?;
        let values: Vec<String> = value.split(',').map(|s| s.to_string()).collect();
        match key.to_ascii_lowercase().as_str() {
            "country" => country = Some(values),
            "language" => language = Some(values),
            "cookie" => cookie = Some(values),
            "role" => {
                // Per spec: Role= is parsed but never evaluated.
            }
            _ => return Err(()),
        }
        idx += 1;
    }

    let (compiled, capture_names) = compile_pattern(&from).map_err(|_| ())?;

    Ok(RedirectRule {
        from,
        to,
        status,
        force,
        query_params,
        country,
        language,
        cookie,
        compiled,
        capture_names,
    })
}

/// Compile a `_redirects` source pattern into a regex plus the ordered
/// list of capture names it produces (`:name` segments, and `splat` for
/// a trailing `*`).
fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>), regex::Error> {
    let mut out = String::from("^");
    let mut names = Vec::new();

    for segment in pattern.trim_start_matches('/').split('/') {
        out.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            out.push_str("([^/?]+)");
            names.push(name.to_string());
        } else if segment == "*" {
            out.push_str("(.*)");
            names.push("splat".to_string());
        } else {
            out.push_str(&regex::escape(segment));
        }
    }
    out.push_str("/?$");

    Ok((Regex::new(&out)?, names))
}

/// Scan `rules` in file order for the first one that matches `ctx`,
/// honoring `queryParams`/`Country`/`Language`/`Cookie` conditions.
/// `Role=` conditions are present in parsed rules but are never evaluated
/// (always considered satisfied), per the source format's documented
/// quirk.
pub fn match_request<'a>(rules: &'a [RedirectRule], ctx: &RequestContext) -> Option<Matched<'a>> {
    let normalized_path = format!("/{}", ctx.path.trim_start_matches('/'));

    'rules: for rule in rules {
        let Some(caps) = rule.compiled.captures(&normalized_path) else {
            continue;
        };

        for param in &rule.query_params {
            if !has_query_param(ctx.query, param) {
                continue 'rules;
            }
        }

        if let Some(countries) = &rule.country {
            match ctx.country {
                Some(c) if countries.iter().any(|v| v.eq_ignore_ascii_case(c)) => {}
                _ => continue 'rules,
            }
        }

        if let Some(languages) = &rule.language {
            match ctx.accept_language {
                Some(accept) => {
                    let matched = languages.iter().any(|lang| {
                        accept
                            .split(',')
                            .any(|tag| tag.trim().to_ascii_lowercase().starts_with(&lang.to_ascii_lowercase()))
                    });
                    if !matched {
                        continue 'rules;
                    }
                }
                None => continue 'rules,
            }
        }

        if let Some(cookies) = &rule.cookie {
            let matched = cookies
                .iter()
                .any(|name| ctx.cookie_names.iter().any(|c| c.eq_ignore_ascii_case(name)));
            if !matched {
                continue 'rules;
            }
        }

        let mut captures = HashMap::new();
        for (i, name) in rule.capture_names.iter().enumerate() {
            if let Some(m) = caps.get(i + 1) {
                captures.insert(name.clone(), m.as_str().to_string());
            }
        }

        return Some(Matched { rule, captures });
    }

    None
}

fn has_query_param(query: &str, name: &str) -> bool {
    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .any(|kv| kv.split('=').next().unwrap_or("") == name)
}

/// Substitute `:name`/`:splat` captures into a destination template, then
/// (for 200/301/302 whose template has no `?` already) append the
/// inbound query string verbatim.
pub fn render_target(matched: &Matched, status: RedirectStatus, inbound_query: &str) -> String {
    let mut out = matched.rule.to.clone();
    for (name, value) in &matched.captures {
        out = out.replace(&format!(":{name}"), value);
    }

    if matches!(
        status,
        RedirectStatus::Ok200 | RedirectStatus::Moved301 | RedirectStatus::Found302
    ) && !out.contains('?')
        && !inbound_query.is_empty()
    {
        out.push('?');
        out.push_str(inbound_query);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(path: &str, query: &str) -> RequestContext<'static> {
        RequestContext {
            path: Box::leak(path.to_string().into_boxed_str()),
            query: Box::leak(query.to_string().into_boxed_str()),
            country: None,
            accept_language: None,
            cookie_names: vec![],
        }
    }

    #[test]
    fn captures_named_segments_and_splat() {
        let (rules, errors) = parse("/blog/:year/:month /archive/:year/:month 301\n/old/* /new/:splat 301\n");
        assert!(errors.is_empty());
        let m = match_request(&rules, &ctx("/blog/2024/01", "")).unwrap();
        assert_eq!(m.captures.get("year").unwrap(), "2024");
        assert_eq!(m.captures.get("month").unwrap(), "01");

        let m2 = match_request(&rules, &ctx("/old/a/b/c", "")).unwrap();
        assert_eq!(m2.captures.get("splat").unwrap(), "a/b/c");
    }

    #[test]
    fn force_flag_parses() {
        let (rules, errors) = parse("/old/:x /new/:x 301!\n");
        assert!(errors.is_empty());
        assert!(rules[0].force);
        assert_eq!(rules[0].status, RedirectStatus::Moved301);
    }

    #[test]
    fn malformed_line_is_skipped_rest_kept() {
        let (rules, errors) = parse("garbage line with no slash\n/a /b 301\n");
        assert_eq!(rules.len(), 1);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn query_preservation_when_target_has_no_question_mark() {
        let (rules, _) = parse("/a /b 301\n");
        let m = match_request(&rules, &ctx("/a", "x=1")).unwrap();
        let target = render_target(&m, m.rule.status, "x=1");
        assert_eq!(target, "/b?x=1");
    }

    #[test]
    fn role_condition_is_parsed_but_never_required() {
        let (rules, errors) = parse("/a /b 301 Role=admin\n");
        assert!(errors.is_empty());
        // Role is never evaluated, so the rule matches regardless.
        assert!(match_request(&rules, &ctx("/a", "")).is_some());
    }

    #[test]
    fn country_condition_gates_match() {
        let (rules, _) = parse("/a /b 301 Country=US,CA\n");
        let mut c = ctx("/a", "");
        assert!(match_request(&rules, &c).is_none());
        c.country = Some("US");
        assert!(match_request(&rules, &c).is_some());
    }
}
