//! Integration tests for a single feed loop: refresh scheduling, retry after
//! failure and favicon acquisition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use feedpump::cache::{ExactCache, RetrievalCache};
use feedpump::config::Config;
use feedpump::content::favicon::ICON_SIZE;
use feedpump::feed::{FaviconError, FaviconFinder, FeedSource, FetchError, FetchedFeed, Icon};
use feedpump::ingest::{FeedLoop, FetchEvent, Ingestor, LoopContext, FETCH_RETRY_INTERVAL};
use feedpump::storage::{Database, Feed, User};

const USER: &str = "u1";
const FEED_URL: &str = "http://example.com/feed";
const HOMEPAGE: &str = "http://example.com/";
const IMAGE_URL: &str = "http://cdn.example.com/logo.png";

/// An empty feed that asks to be polled again in an hour. Every fetch time is
/// reported on `fetched`; the fetch numbered `fail_on` (1-based) fails.
struct HourlySource {
    fetches: AtomicUsize,
    fail_on: Option<usize>,
    fetched: mpsc::UnboundedSender<Instant>,
}

#[async_trait]
impl FeedSource for HourlySource {
    async fn fetch(&self, _url: &str) -> Result<FetchedFeed, FetchError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.fetched.send(Instant::now());
        if self.fail_on == Some(n) {
            return Err(FetchError::HttpStatus(503));
        }
        Ok(FetchedFeed {
            title: "Hourly".to_string(),
            description: String::new(),
            link: HOMEPAGE.to_string(),
            image_url: Some(IMAGE_URL.to_string()),
            refresh: Utc::now() + chrono::Duration::hours(1),
            items: Vec::new(),
        })
    }
}

struct NoFavicons;

#[async_trait]
impl FaviconFinder for NoFavicons {
    async fn find(&self, _url: &str) -> Result<Vec<Icon>, FaviconError> {
        Ok(Vec::new())
    }
}

/// Serves a corrupt icon for the feed image and a real one for the homepage.
#[derive(Default)]
struct ScriptedFavicons {
    asked: Mutex<Vec<String>>,
}

#[async_trait]
impl FaviconFinder for ScriptedFavicons {
    async fn find(&self, url: &str) -> Result<Vec<Icon>, FaviconError> {
        self.asked.lock().unwrap().push(url.to_string());
        let icon = |bytes: Vec<u8>| Icon {
            url: url.to_string(),
            format: "image/png".to_string(),
            bytes,
        };
        Ok(match url {
            IMAGE_URL => vec![icon(b"\x89PNG truncated".to_vec())],
            HOMEPAGE => vec![icon(tiny_png())],
            _ => Vec::new(),
        })
    }
}

fn tiny_png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(16, 16, Rgba([0, 128, 0, 255]));
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

async fn setup() -> (Database, Feed) {
    let db = Database::open(":memory:").await.unwrap();
    db.create_user(&User {
        id: USER.to_string(),
        username: "alice".to_string(),
        password_hash: "hash".to_string(),
        api_key: "key".to_string(),
    })
    .await
    .unwrap();
    let root = db.get_root_folder(USER).await.unwrap();
    let feed_id = db.create_feed(USER, root.id, FEED_URL, "Feed").await.unwrap();
    let feed = db.get_feed(USER, feed_id).await.unwrap().unwrap();
    (db, feed)
}

fn context(
    db: &Database,
    source: Arc<dyn FeedSource>,
    favicons: Arc<dyn FaviconFinder>,
    events: Option<mpsc::Sender<FetchEvent>>,
) -> LoopContext {
    LoopContext {
        source,
        favicons,
        ingestor: Ingestor::new(
            db.clone(),
            Arc::new(ExactCache::new()) as Arc<dyn RetrievalCache>,
            None,
            Arc::new(Config::default()),
        ),
        events,
    }
}

/// Run a loop over [`HourlySource`] on a paused clock and return the times
/// of its first three fetches.
async fn three_fetches(fail_on: Option<usize>) -> Vec<Instant> {
    // The database is opened before the clock stops.
    let (db, feed) = setup().await;
    let (tx, mut fetched) = mpsc::unbounded_channel();
    let source = Arc::new(HourlySource {
        fetches: AtomicUsize::new(0),
        fail_on,
        fetched: tx,
    });
    let ctx = context(&db, source, Arc::new(NoFavicons), None);

    tokio::time::pause();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(FeedLoop::new(USER, feed, ctx).run(cancel.clone()));

    let mut times = Vec::new();
    for _ in 0..3 {
        let at = tokio::time::timeout(Duration::from_secs(4 * 3600), fetched.recv())
            .await
            .expect("loop stopped fetching")
            .expect("source dropped");
        times.push(at);
    }

    cancel.cancel();
    task.await.unwrap();
    times
}

#[tokio::test]
async fn test_refetches_at_advertised_refresh() {
    let times = three_fetches(None).await;

    // The first gap may include a stalled metadata write; the second has no
    // storage work in it.
    let gap = times[2] - times[1];
    assert!(gap > Duration::from_secs(59 * 60), "refetched early: {gap:?}");
    assert!(gap < Duration::from_secs(3601), "refetched late: {gap:?}");
}

#[tokio::test]
async fn test_failed_refresh_retries_after_retry_interval() {
    let times = three_fetches(Some(2)).await;

    assert!(times[1] - times[0] > Duration::from_secs(59 * 60));
    let gap = times[2] - times[1];
    assert!(gap >= FETCH_RETRY_INTERVAL, "retried early: {gap:?}");
    assert!(
        gap < FETCH_RETRY_INTERVAL + Duration::from_secs(1),
        "retried late: {gap:?}"
    );
}

#[tokio::test]
async fn test_favicon_taken_from_first_decodable_candidate() {
    let (db, feed) = setup().await;
    let feed_id = feed.id;
    let (fetched, _fetch_times) = mpsc::unbounded_channel();
    let source = Arc::new(HourlySource {
        fetches: AtomicUsize::new(0),
        fail_on: None,
        fetched,
    });
    let favicons = Arc::new(ScriptedFavicons::default());
    let (tx, mut events) = mpsc::channel(8);
    let ctx = context(
        &db,
        source,
        Arc::clone(&favicons) as Arc<dyn FaviconFinder>,
        Some(tx),
    );

    let cancel = CancellationToken::new();
    let task = tokio::spawn(FeedLoop::new(USER, feed, ctx).run(cancel.clone()));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for the first fetch")
        .expect("event channel closed");
    assert!(matches!(event, FetchEvent::ItemsProcessed { .. }));

    let favicon = db.get_favicon(USER, feed_id).await.unwrap().unwrap();
    assert_eq!(favicon.mime, "image/png");
    let decoded = image::load_from_memory(&favicon.data).unwrap();
    assert_eq!(decoded.dimensions(), (ICON_SIZE, ICON_SIZE));
    assert_eq!(
        *favicons.asked.lock().unwrap(),
        vec![IMAGE_URL.to_string(), HOMEPAGE.to_string()]
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}
