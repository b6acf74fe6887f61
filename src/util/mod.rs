//! Small string and URL helpers shared by the storage and content layers.

mod text;
mod url;

pub use text::{collapse_whitespace, strip_control_chars};
pub use url::{origin_of, resolve_url};
