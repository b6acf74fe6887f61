use chrono::{DateTime, Duration, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser::{Builder, ParseFeedError};

use super::dates::parse_timestamp;
use crate::util::{resolve_url, strip_control_chars};

/// Refresh interval assumed when a feed advertises no TTL.
pub const DEFAULT_REFRESH_MINUTES: i64 = 10;

const IMAGE_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".svg"];

/// A feed document as returned by the external fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFeed {
    pub title: String,
    pub description: String,
    /// Homepage
    pub link: String,
    pub image_url: Option<String>,
    /// When the feed asks to be polled next
    pub refresh: DateTime<Utc>,
    /// In document order
    pub items: Vec<FetchedItem>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchedItem {
    pub title: String,
    pub link: String,
    pub content: String,
    pub summary: String,
    /// `None` when missing or unparseable
    pub date: Option<DateTime<Utc>>,
    pub enclosures: Vec<Enclosure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime: Option<String>,
}

impl Enclosure {
    /// Image MIME type, or an image file extension when the type is absent.
    pub fn is_image(&self) -> bool {
        match &self.mime {
            Some(mime) => mime.starts_with("image/"),
            None => {
                let path = self.url.split(['?', '#']).next().unwrap_or("").to_ascii_lowercase();
                IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            }
        }
    }
}

/// The homepage link of a feed: the first link that is not `rel="self"`.
fn homepage(links: &[Link], feed_url: &str) -> String {
    links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self") && l.href != feed_url)
        .or_else(|| links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default()
}

fn entry_link(entry: &Entry) -> String {
    entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default()
}

fn enclosures(entry: &Entry, base: &str) -> Vec<Enclosure> {
    entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .filter_map(|content| {
            let url = content.url.as_ref()?.to_string();
            Some(Enclosure {
                url: resolve_url(base, &url),
                mime: content.content_type.as_ref().map(|m| m.to_string()),
            })
        })
        .collect()
}

fn convert_entry(entry: Entry, base: &str) -> FetchedItem {
    let link = entry_link(&entry);
    let enclosures = enclosures(&entry, base);
    FetchedItem {
        title: entry
            .title
            .map(|t| strip_control_chars(&t.content).into_owned())
            .unwrap_or_default(),
        link,
        content: entry.content.and_then(|c| c.body).unwrap_or_default(),
        summary: entry.summary.map(|s| s.content).unwrap_or_default(),
        date: entry.published.or(entry.updated),
        enclosures,
    }
}

/// Parse RSS, Atom or JSON Feed bytes fetched from `feed_url` at `now`.
///
/// `refresh` is `now + ttl` when the feed advertises a TTL in minutes and
/// `now + 10 minutes` otherwise.
pub fn parse_feed(
    bytes: &[u8],
    feed_url: &str,
    now: DateTime<Utc>,
) -> Result<FetchedFeed, ParseFeedError> {
    let feed = Builder::new()
        .base_uri(Some(feed_url))
        .timestamp_parser(parse_timestamp)
        .build()
        .parse(bytes)?;

    let refresh_minutes = feed
        .ttl
        .map(i64::from)
        .filter(|ttl| *ttl > 0)
        .unwrap_or(DEFAULT_REFRESH_MINUTES);

    let link = homepage(&feed.links, feed_url);
    let base = if link.is_empty() { feed_url } else { link.as_str() };
    let items = feed
        .entries
        .into_iter()
        .map(|entry| convert_entry(entry, base))
        .collect();

    Ok(FetchedFeed {
        title: feed
            .title
            .map(|t| strip_control_chars(&t.content).into_owned())
            .unwrap_or_default(),
        description: feed
            .description
            .map(|d| strip_control_chars(&d.content).into_owned())
            .unwrap_or_default(),
        image_url: feed
            .logo
            .or(feed.icon)
            .map(|image| image.uri)
            .filter(|uri| !uri.is_empty()),
        link,
        refresh: now + Duration::minutes(refresh_minutes),
        items,
    })
}
