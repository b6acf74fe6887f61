use url::Url;

/// Resolve `href` against `base`.
///
/// Absolute hrefs are returned normalized. When `base` is not a valid absolute
/// URL, or the join fails, `href` is returned unchanged.
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    if let Ok(absolute) = Url::parse(href) {
        return absolute.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

/// `scheme://host[:port]/` of an absolute http(s) URL.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}/", parsed.scheme(), host, port),
        None => format!("{}://{}/", parsed.scheme(), host),
    })
}
