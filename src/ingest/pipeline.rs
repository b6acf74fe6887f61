use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::RetrievalCache;
use crate::config::Config;
use crate::content::html::{
    ensure_document, extract_text, prepend_images, rewrite_urls, sanitize, unescape,
};
use crate::content::{is_similar, wrap_parsed, ArticleParser, DedupMode, ImageProxy, MuteFilter};
use crate::feed::FetchedItem;
use crate::storage::{timed, Article, Database, Feed};
use crate::util::{collapse_whitespace, resolve_url, strip_control_chars};

/// Title given to items that carry none.
pub const UNTITLED: &str = "(Untitled)";

/// Per-call counters of [`Ingestor::process_items`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub inserted: usize,
    /// Dated at or before the feed's latest accepted article
    pub too_old: usize,
    /// Fingerprint already in the retrieval cache
    pub cache_hits: usize,
    pub muted: usize,
    /// Inserted as read because every similar article was read
    pub marked_read: usize,
    /// Unread similar articles deleted in favour of a new one
    pub superseded: usize,
    /// Insert hit the `(user, feed, fingerprint)` unique key
    pub conflicts: usize,
    pub failed: usize,
}

impl IngestStats {
    /// Items looked at, whatever their fate.
    pub fn seen(&self) -> usize {
        self.inserted + self.too_old + self.cache_hits + self.muted + self.conflicts + self.failed
    }
}

/// Turns fetched items into stored articles for one user.
///
/// Cheap to clone; every feed loop holds one.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    cache: Arc<dyn RetrievalCache>,
    parser: Option<Arc<dyn ArticleParser>>,
    config: Arc<Config>,
    proxy: ImageProxy,
    dedup: DedupMode,
}

impl Ingestor {
    /// `parser` is only consulted when `parse_articles` is enabled.
    pub fn new(
        db: Database,
        cache: Arc<dyn RetrievalCache>,
        parser: Option<Arc<dyn ArticleParser>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            cache,
            parser,
            proxy: ImageProxy::from_config(&config),
            dedup: DedupMode::from_config(&config),
            config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &dyn RetrievalCache {
        self.cache.as_ref()
    }

    // ========================================================================
    // Normalization
    // ========================================================================

    /// Build the article record for `item` as seen at `now`.
    ///
    /// The external parser is not consulted here; see [`Ingestor::enrich`].
    pub fn normalize(&self, feed: &Feed, item: &FetchedItem, now: DateTime<Utc>) -> Article {
        let base = if feed.link.is_empty() {
            feed.url.as_str()
        } else {
            feed.link.as_str()
        };

        let title = normalize_title(&item.title);

        let link = if item.link.is_empty() || Url::parse(&item.link).is_ok() {
            item.link.clone()
        } else {
            resolve_url(base, &item.link)
        };

        let (date, synthetic_date) = match item.date {
            Some(date) => (date.trunc_subsecs(0), false),
            None => (now.trunc_subsecs(0), true),
        };

        let raw_body = if item.content.trim().is_empty() {
            &item.summary
        } else {
            &item.content
        };
        let images: Vec<String> = item
            .enclosures
            .iter()
            .filter(|enclosure| enclosure.is_image())
            .map(|enclosure| resolve_url(base, &enclosure.url))
            .collect();

        let mut content = ensure_document(&unescape(raw_body));
        content = prepend_images(&content, &images);
        content = rewrite_urls(&content, base, &self.proxy);
        if self.config.sanitize_html {
            content = sanitize(&content);
        }

        Article {
            id: 0,
            feed_id: feed.id,
            folder_id: feed.folder_id,
            title,
            summary: unescape(&item.summary).into_owned(),
            content,
            parsed: None,
            link,
            read: false,
            date,
            retrieved: now.trunc_subsecs(0),
            synthetic_date,
        }
    }

    /// Fill `article.parsed` from the external parser, when enabled.
    ///
    /// Parser failures are logged and leave `parsed` empty. Returns `false`
    /// when `cancel` fired before the parser answered.
    pub async fn enrich(&self, article: &mut Article, cancel: &CancellationToken) -> bool {
        if !self.config.parse_articles || article.link.is_empty() {
            return true;
        }
        let Some(parser) = &self.parser else {
            return true;
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = parser.parse(&article.link) => result,
        };
        match result {
            Ok(content) if !content.trim().is_empty() => {
                article.parsed = Some(wrap_parsed(&content));
            }
            Ok(_) => {
                tracing::debug!(link = %article.link, "Article parser returned no content");
            }
            Err(e) => {
                tracing::warn!(link = %article.link, error = %e, "Article parser failed");
            }
        }
        true
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest `items` in order for `user_id`.
    ///
    /// Items dated at or before the feed's `latest` as of this call are
    /// skipped, then cached fingerprints, then muted items. Similar existing
    /// articles are superseded when unread; when all are read the new article
    /// is stored read. `feed.latest` advances with every newer insert.
    ///
    /// Cancellation is checked before each item, while the article parser
    /// runs, and before any storage write; an insert already under way
    /// completes together with its cache entry and `latest` update.
    pub async fn process_items(
        &self,
        user_id: &str,
        feed: &mut Feed,
        items: &[FetchedItem],
        cancel: &CancellationToken,
    ) -> IngestStats {
        let mut stats = IngestStats::default();
        if items.is_empty() {
            return stats;
        }

        let mut existing = match timed(self.db.get_articles_for_feed(user_id, feed.id)).await {
            Ok(articles) => articles,
            Err(e) => {
                tracing::error!(user_id = %user_id, feed_id = feed.id, error = %e, "Failed to load existing articles");
                return stats;
            }
        };
        let mute_words = match timed(self.db.get_mute_words(user_id)).await {
            Ok(words) => words,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load mute words");
                return stats;
            }
        };
        let unmuted = match timed(self.db.get_unmuted_feeds(user_id)).await {
            Ok(feeds) => feeds.contains(&feed.id),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load unmuted feeds");
                return stats;
            }
        };
        let mute = MuteFilter::new(&mute_words);
        let cutoff = feed.latest;

        for item in items {
            if cancel.is_cancelled() {
                tracing::debug!(user_id = %user_id, feed_id = feed.id, "Ingestion cancelled");
                return stats;
            }

            let mut article = self.normalize(feed, item, Utc::now());

            if cutoff.is_some_and(|latest| article.date <= latest) {
                tracing::debug!(feed_id = feed.id, link = %article.link, "Skipping item older than latest");
                stats.too_old += 1;
                continue;
            }

            if !self.enrich(&mut article, cancel).await {
                tracing::debug!(user_id = %user_id, feed_id = feed.id, "Ingestion cancelled during parsing");
                return stats;
            }
            let fingerprint = article.hash();

            if self.cache.contains(user_id, &fingerprint) {
                tracing::debug!(feed_id = feed.id, link = %article.link, "Skipping previously retrieved item");
                stats.cache_hits += 1;
                continue;
            }

            if !unmuted && mute.is_muted(&article.title, &article.summary, &article.content) {
                tracing::debug!(user_id = %user_id, feed_id = feed.id, title = %article.title, "Skipping muted item");
                stats.muted += 1;
                continue;
            }

            let (unread, read): (Vec<&Article>, Vec<&Article>) = existing
                .iter()
                .filter(|other| is_similar(self.dedup, &article, other))
                .partition(|other| !other.read);

            // Nothing is written once the loop is told to stop.
            if cancel.is_cancelled() {
                tracing::debug!(user_id = %user_id, feed_id = feed.id, "Ingestion cancelled");
                return stats;
            }

            if unread.is_empty() && !read.is_empty() {
                article.read = true;
                stats.marked_read += 1;
            }

            if !unread.is_empty() {
                let ids: Vec<i64> = unread.iter().map(|a| a.id).collect();
                match timed(self.db.delete_articles(user_id, &ids)).await {
                    Ok(deleted) => {
                        tracing::debug!(feed_id = feed.id, deleted, "Superseded unread duplicates");
                        stats.superseded += deleted as usize;
                        existing.retain(|a| !ids.contains(&a.id));
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, feed_id = feed.id, error = %e, "Failed to delete duplicates");
                        stats.failed += 1;
                        continue;
                    }
                }
            }

            match timed(self.db.insert_article(user_id, &article)).await {
                Ok(true) => {
                    stats.inserted += 1;
                    self.cache.add(user_id, &fingerprint);
                    self.advance_latest(user_id, feed, article.date).await;
                }
                Ok(false) => {
                    tracing::debug!(feed_id = feed.id, link = %article.link, "Article already stored");
                    stats.conflicts += 1;
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, feed_id = feed.id, link = %article.link, error = %e, "Failed to insert article");
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    async fn advance_latest(&self, user_id: &str, feed: &mut Feed, date: DateTime<Utc>) {
        if feed.latest.is_some_and(|latest| date <= latest) {
            return;
        }
        match timed(self.db.update_feed_latest(user_id, feed.id, date)).await {
            Ok(_) => feed.latest = Some(date),
            Err(e) => {
                tracing::warn!(user_id = %user_id, feed_id = feed.id, error = %e, "Failed to advance feed latest");
            }
        }
    }
}

/// Unescape, strip markup and control characters, collapse whitespace.
pub fn normalize_title(raw: &str) -> String {
    let text = extract_text(&unescape(raw));
    let title = collapse_whitespace(&strip_control_chars(&text));
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExactCache;
    use crate::feed::Enclosure;
    use crate::storage::User;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn feed() -> Feed {
        Feed {
            id: 1,
            folder_id: 1,
            title: "Example".to_string(),
            description: String::new(),
            url: "http://example.com/feed".to_string(),
            link: "http://example.com/feed".to_string(),
            latest: None,
        }
    }

    async fn ingestor(config: Config) -> Ingestor {
        let db = Database::open(":memory:").await.unwrap();
        Ingestor::new(db, Arc::new(ExactCache::new()), None, Arc::new(config))
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title(""), UNTITLED);
        assert_eq!(normalize_title("  <b>Bold</b>\n move "), "Bold move");
        assert_eq!(normalize_title("&lt;i&gt;Hi&lt;/i&gt;"), "Hi");
        assert_eq!(normalize_title("Fish &amp; Chips"), "Fish & Chips");
    }

    #[tokio::test]
    async fn test_normalize_fills_defaults() {
        let ingestor = ingestor(Config::default()).await;
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let item = FetchedItem {
            link: "/posts/1".to_string(),
            summary: "<p>Only a summary</p>".to_string(),
            ..FetchedItem::default()
        };

        let article = ingestor.normalize(&feed(), &item, now);
        assert_eq!(article.title, UNTITLED);
        assert_eq!(article.link, "http://example.com/posts/1");
        assert_eq!(article.date, now);
        assert!(article.synthetic_date);
        assert_eq!(article.retrieved, now);
        assert_eq!(
            article.content,
            "<html><head></head><body><p>Only a summary</p></body></html>"
        );
    }

    #[tokio::test]
    async fn test_normalize_prepends_enclosures_and_proxies() {
        let config = Config {
            proxy_insecure_images: true,
            proxy_url_base: "https://proxy.example.com".to_string(),
            ..Config::default()
        };
        let ingestor = ingestor(config).await;
        let item = FetchedItem {
            title: "t".to_string(),
            content: "<p>hi</p>".to_string(),
            enclosures: vec![
                Enclosure {
                    url: "/image.jpg".to_string(),
                    mime: Some("image/jpeg".to_string()),
                },
                Enclosure {
                    url: "/episode.mp3".to_string(),
                    mime: Some("audio/mpeg".to_string()),
                },
            ],
            ..FetchedItem::default()
        };

        let article = ingestor.normalize(&feed(), &item, Utc::now());
        assert_eq!(
            article.content,
            "<html><head></head><body><img src=\"https://proxy.example.com/cache?url=http%3A%2F%2Fexample.com%2Fimage.jpg\"><p>hi</p></body></html>"
        );
    }

    #[tokio::test]
    async fn test_normalize_sanitizes_when_enabled() {
        let config = Config {
            sanitize_html: true,
            ..Config::default()
        };
        let ingestor = ingestor(config).await;
        let item = FetchedItem {
            content: "<p>ok<script>alert(1)</script></p>".to_string(),
            ..FetchedItem::default()
        };
        let article = ingestor.normalize(&feed(), &item, Utc::now());
        assert_eq!(article.content, "<p>ok</p>");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let ingestor = ingestor(Config::default()).await;
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            password_hash: "x".to_string(),
            api_key: "k".to_string(),
        };
        ingestor.db().create_user(&user).await.unwrap();
        let root = ingestor.db().get_root_folder(&user.id).await.unwrap();
        let feed_id = ingestor
            .db()
            .create_feed(&user.id, root.id, "http://example.com/feed", "Example")
            .await
            .unwrap();
        let mut feed = ingestor.db().get_feed(&user.id, feed_id).await.unwrap().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let items = vec![FetchedItem {
            title: "t".to_string(),
            link: "http://example.com/a".to_string(),
            ..FetchedItem::default()
        }];
        let stats = ingestor.process_items(&user.id, &mut feed, &items, &cancel).await;
        assert_eq!(stats, IngestStats::default());
        assert!(ingestor
            .db()
            .get_articles_for_feed(&user.id, feed_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_stats_seen() {
        let stats = IngestStats {
            inserted: 2,
            too_old: 1,
            cache_hits: 1,
            muted: 1,
            marked_read: 1,
            superseded: 3,
            conflicts: 0,
            failed: 1,
        };
        assert_eq!(stats.seen(), 6);
    }
}
