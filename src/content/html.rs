//! HTML transforms applied to item bodies before they are stored.
//!
//! Every transform here is infallible from the caller's point of view: a
//! rewriting failure is logged and the input is returned unchanged.
use std::borrow::Cow;

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use scraper::Html;
use url::Url;

use crate::config::Config;
use crate::util::resolve_url;

/// The escape sequences counted by [`unescape`].
const ESCAPE_SEQUENCES: [&str; 5] = ["&amp;", "&lt;", "&gt;", "&#34;", "&apos;"];

// ============================================================================
// Image Proxy
// ============================================================================

/// Image proxy settings taken from [`Config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageProxy {
    pub insecure: bool,
    pub secure: bool,
    pub base: String,
}

impl ImageProxy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            insecure: config.proxy_insecure_images,
            secure: config.proxy_secure_images,
            base: config.proxy_url_base.clone(),
        }
    }

    /// The proxied form of an absolute image URL, if it should be proxied.
    pub fn rewrite(&self, url: &str) -> Option<String> {
        if !self.insecure || self.base.is_empty() {
            return None;
        }
        let scheme = Url::parse(url).ok()?.scheme().to_string();
        let proxied = scheme == "http" || (self.secure && scheme == "https");
        if !proxied {
            return None;
        }
        Some(format!(
            "{}/cache?url={}",
            self.base.trim_end_matches('/'),
            urlencoding::encode(url)
        ))
    }
}

// ============================================================================
// Text
// ============================================================================

/// Undo double escaping.
///
/// Counts `&amp; &lt; &gt; &#34; &apos;` in aggregate; with more than one
/// occurrence the string is entity-decoded, otherwise returned as is.
pub fn unescape(s: &str) -> Cow<'_, str> {
    let count: usize = ESCAPE_SEQUENCES
        .iter()
        .map(|seq| s.matches(seq).count())
        .sum();
    if count > 1 {
        html_escape::decode_html_entities(s)
    } else {
        Cow::Borrowed(s)
    }
}

/// Concatenated text nodes of an HTML fragment or document.
///
/// The HTML5 parser recovers from any input, so malformed markup still
/// yields its text.
pub fn extract_text(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.to_string();
    }
    let fragment = Html::parse_fragment(html);
    fragment.root_element().text().collect()
}

// ============================================================================
// Document Rewriting
// ============================================================================

/// Wrap a fragment in `<html><head></head><body>…</body></html>` unless it
/// already has a body.
pub fn ensure_document(html: &str) -> String {
    if html.to_ascii_lowercase().contains("<body") {
        return html.to_string();
    }
    format!("<html><head></head><body>{html}</body></html>")
}

/// Prepend one `<img>` per URL to the document's `<body>`, in order.
///
/// URLs must already be absolute.
pub fn prepend_images(html: &str, image_urls: &[String]) -> String {
    if image_urls.is_empty() {
        return html.to_string();
    }

    let images: String = image_urls
        .iter()
        .map(|url| {
            format!(
                r#"<img src="{}">"#,
                html_escape::encode_double_quoted_attribute(url)
            )
        })
        .collect();

    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("body", |el| {
                el.prepend(&images, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => rewritten,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to prepend enclosure images");
            html.to_string()
        }
    }
}

/// Absolutize link and image URLs against `base`, routing images through the
/// proxy where configured.
///
/// Only relative `<a href>`s are touched; every `<img src>` is resolved.
pub fn rewrite_urls(html: &str, base: &str, proxy: &ImageProxy) -> String {
    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("a[href]", |el| {
                    if let Some(href) = el.get_attribute("href") {
                        if Url::parse(href.trim()).is_err() {
                            el.set_attribute("href", &resolve_url(base, &href))?;
                        }
                    }
                    Ok(())
                }),
                element!("img[src]", |el| {
                    if let Some(src) = el.get_attribute("src") {
                        let absolute = resolve_url(base, &src);
                        let target = proxy.rewrite(&absolute).unwrap_or(absolute);
                        el.set_attribute("src", &target)?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => rewritten,
        Err(e) => {
            tracing::warn!(error = %e, base = %base, "Failed to rewrite URLs");
            html.to_string()
        }
    }
}

/// Strict user-generated-content sanitization.
///
/// Images keep `alt` and `title`; links are forced to
/// `rel="noopener noreferrer nofollow"`. The result is a fragment.
pub fn sanitize(html: &str) -> String {
    ammonia::Builder::default()
        .add_tag_attributes("img", &["alt", "title"])
        .link_rel(Some("noopener noreferrer nofollow"))
        .clean(html)
        .to_string()
}
