//! Content transforms: pure functions over item bodies, titles and icons,
//! plus the external article parser capability.

pub mod dedup;
pub mod favicon;
pub mod html;
pub mod mute;
pub mod parser;

pub use dedup::{is_similar, DedupMode};
pub use favicon::{normalize_icon, resize_decoded, resize_icon, FeedIcon};
pub use html::ImageProxy;
pub use mute::MuteFilter;
pub use parser::{wrap_parsed, ArticleParser, MercuryParser, ParserError};
