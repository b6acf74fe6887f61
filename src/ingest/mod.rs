//! The fetch subsystem: per-feed polling loops feeding the item pipeline,
//! started and stopped by the supervisor.
//!
//! - [`pipeline`] - Normalize, gate, de-duplicate and store fetched items
//! - [`feed_loop`] - One polling task per (user, feed)
//! - [`supervisor`] - Generations of feed loops with pause and resume
//! - [`cleaner`] - Periodic removal of old read articles
//! - [`service`] - Startup and ordered shutdown of the background tasks

pub mod cleaner;
pub mod feed_loop;
pub mod pipeline;
pub mod service;
pub mod supervisor;

pub use cleaner::ReadArticleCleaner;
pub use feed_loop::{FeedLoop, FetchEvent, LoopContext, FETCH_RETRY_INTERVAL, MIN_REFRESH_INTERVAL};
pub use pipeline::{normalize_title, IngestStats, Ingestor, UNTITLED};
pub use service::IngestService;
pub use supervisor::{Supervisor, SupervisorError, SupervisorHandle};
