use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::pipeline::{IngestStats, Ingestor};
use crate::content::{normalize_icon, FeedIcon};
use crate::feed::{FaviconFinder, FeedSource, FetchedFeed, Icon};
use crate::storage::{timed, Feed};
use crate::util::{collapse_whitespace, origin_of, strip_control_chars};

/// Delay before the next attempt after a failed refresh.
pub const FETCH_RETRY_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Floor on the delay between two fetches of the same feed.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Emitted by feed loops as they work.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// A fetch succeeded and its items went through the pipeline
    ItemsProcessed {
        user_id: String,
        feed_id: i64,
        stats: IngestStats,
    },
    FetchFailed {
        user_id: String,
        feed_id: i64,
        error: String,
    },
}

/// Collaborators shared by every feed loop of a generation.
#[derive(Clone)]
pub struct LoopContext {
    pub source: Arc<dyn FeedSource>,
    pub favicons: Arc<dyn FaviconFinder>,
    pub ingestor: Ingestor,
    pub events: Option<mpsc::Sender<FetchEvent>>,
}

/// The polling task of one (user, feed) pair.
///
/// Owns the feed descriptor; nothing else writes to it while the loop runs.
pub struct FeedLoop {
    user_id: String,
    feed: Feed,
    ctx: LoopContext,
}

impl FeedLoop {
    pub fn new(user_id: impl Into<String>, feed: Feed, ctx: LoopContext) -> Self {
        Self {
            user_id: user_id.into(),
            feed,
            ctx,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// A failed first fetch parks the loop until cancellation; a later
    /// failure retries after [`FETCH_RETRY_INTERVAL`].
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!(user_id = %self.user_id, feed_id = self.feed.id, url = %self.feed.url, "Feed loop started");

        let Some(fetched) = self.fetch(&cancel).await else {
            cancel.cancelled().await;
            tracing::debug!(user_id = %self.user_id, feed_id = self.feed.id, "Feed loop stopped");
            return;
        };

        self.update_metadata(&fetched, &cancel).await;
        self.update_favicon(&fetched, &cancel).await;
        self.ingest(&fetched, &cancel).await;
        let mut next = Instant::now() + refresh_delay(&fetched);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tokio::time::sleep_until(next) => {
                    next = match self.fetch(&cancel).await {
                        Some(fetched) => {
                            self.ingest(&fetched, &cancel).await;
                            Instant::now() + refresh_delay(&fetched)
                        }
                        None => Instant::now() + FETCH_RETRY_INTERVAL,
                    };
                }
            }
        }

        tracing::debug!(user_id = %self.user_id, feed_id = self.feed.id, "Feed loop stopped");
    }

    /// One fetch, abandoned on cancellation. Failures are logged and reported.
    async fn fetch(&self, cancel: &CancellationToken) -> Option<FetchedFeed> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.ctx.source.fetch(&self.feed.url) => result,
        };

        match result {
            Ok(fetched) => Some(fetched),
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    feed_id = self.feed.id,
                    url = %self.feed.url,
                    error = %e,
                    "Feed fetch failed"
                );
                self.emit(FetchEvent::FetchFailed {
                    user_id: self.user_id.clone(),
                    feed_id: self.feed.id,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    async fn ingest(&mut self, fetched: &FetchedFeed, cancel: &CancellationToken) {
        let stats = self
            .ctx
            .ingestor
            .process_items(&self.user_id, &mut self.feed, &fetched.items, cancel)
            .await;

        if stats.seen() > 0 {
            tracing::info!(
                user_id = %self.user_id,
                feed_id = self.feed.id,
                inserted = stats.inserted,
                too_old = stats.too_old,
                cache_hits = stats.cache_hits,
                muted = stats.muted,
                failed = stats.failed,
                "Processed feed items"
            );
        }
        self.emit(FetchEvent::ItemsProcessed {
            user_id: self.user_id.clone(),
            feed_id: self.feed.id,
            stats,
        });
    }

    /// Store the title, description and homepage the feed now advertises.
    async fn update_metadata(&mut self, fetched: &FetchedFeed, cancel: &CancellationToken) {
        let title = collapse_whitespace(&strip_control_chars(&fetched.title));
        if !title.is_empty() {
            self.feed.title = title;
        }
        self.feed.description = collapse_whitespace(&strip_control_chars(&fetched.description));
        if !fetched.link.is_empty() {
            self.feed.link = fetched.link.clone();
        }

        if cancel.is_cancelled() {
            return;
        }
        let db = self.ctx.ingestor.db();
        if let Err(e) = timed(db.update_feed_metadata(&self.user_id, &self.feed)).await {
            tracing::warn!(user_id = %self.user_id, feed_id = self.feed.id, error = %e, "Failed to update feed metadata");
        }
    }

    /// Store the first decodable icon among the feed image, the homepage and
    /// the feed's host.
    async fn update_favicon(&self, fetched: &FetchedFeed, cancel: &CancellationToken) {
        let candidates = favicon_candidates(fetched, &self.feed);

        for candidate in candidates {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = self.ctx.favicons.find(&candidate) => result,
            };

            let icons = match result {
                Ok(icons) => icons,
                Err(e) => {
                    tracing::debug!(feed_id = self.feed.id, url = %candidate, error = %e, "No favicon at candidate");
                    continue;
                }
            };
            if icons.is_empty() {
                continue;
            }
            let (folder_id, feed_id) = (self.feed.folder_id, self.feed.id);
            let normalize = self.ctx.ingestor.config().normalize_favicons;
            let picked =
                tokio::task::spawn_blocking(move || pick_icon(icons, folder_id, feed_id, normalize))
                    .await;
            let favicon = match picked {
                Ok(Some(icon)) => icon.into_favicon(),
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(feed_id = self.feed.id, error = %e, "Favicon normalization panicked");
                    return;
                }
            };

            if cancel.is_cancelled() {
                return;
            }
            let db = self.ctx.ingestor.db();
            match timed(db.update_feed_favicon(&self.user_id, self.feed.id, &favicon)).await {
                Ok(()) => {
                    tracing::debug!(feed_id = self.feed.id, url = %candidate, mime = %favicon.mime, "Stored favicon");
                }
                Err(e) => {
                    tracing::warn!(user_id = %self.user_id, feed_id = self.feed.id, error = %e, "Failed to store favicon");
                }
            }
            return;
        }

        tracing::debug!(feed_id = self.feed.id, "No favicon found");
    }

    fn emit(&self, event: FetchEvent) {
        let Some(events) = &self.ctx.events else {
            return;
        };
        if let Err(e) = events.try_send(event) {
            tracing::debug!(feed_id = self.feed.id, error = %e, "Dropped fetch event");
        }
    }
}

/// Feed image, homepage, then the origin of the feed URL; blanks and repeats
/// removed.
fn favicon_candidates(fetched: &FetchedFeed, feed: &Feed) -> Vec<String> {
    let homepage = if fetched.link.is_empty() {
        feed.link.clone()
    } else {
        fetched.link.clone()
    };
    let mut candidates: Vec<String> = Vec::new();
    for candidate in [fetched.image_url.clone(), Some(homepage), origin_of(&feed.url)]
        .into_iter()
        .flatten()
    {
        if !candidate.trim().is_empty() && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// The first of `icons` that decodes, ready for storage. Each icon is decoded
/// at most once, so run it off the async workers.
fn pick_icon(icons: Vec<Icon>, folder_id: i64, feed_id: i64, normalize: bool) -> Option<FeedIcon> {
    icons.into_iter().find_map(|icon| {
        let image = icon.decode().ok()?;
        Some(normalize_icon(
            folder_id,
            feed_id,
            &icon.format,
            &icon.bytes,
            &image,
            normalize,
        ))
    })
}

/// Time until the advertised refresh, at least [`MIN_REFRESH_INTERVAL`].
fn refresh_delay(fetched: &FetchedFeed) -> Duration {
    (fetched.refresh - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(MIN_REFRESH_INTERVAL)
}
