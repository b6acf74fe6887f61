//! Feed retrieval: the external fetcher and favicon finder capabilities and
//! their HTTP implementations.
//!
//! - [`fetcher`] - HTTP fetching with retry, size limits and `feed-rs` parsing
//! - [`parser`] - Conversion of `feed-rs` documents into [`FetchedFeed`]
//! - [`dates`] - Lenient timestamp formats for the parser
//! - [`favicon`] - Icon discovery for a feed's image, homepage or host

pub mod dates;
mod favicon;
mod fetcher;
mod parser;

pub use favicon::{FaviconError, FaviconFinder, HttpFaviconFinder, Icon};
pub use fetcher::{FeedSource, FetchError, HttpFeedSource};
pub use parser::{parse_feed, Enclosure, FetchedFeed, FetchedItem, DEFAULT_REFRESH_MINUTES};
