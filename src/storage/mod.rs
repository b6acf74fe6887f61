mod articles;
mod feeds;
mod folders;
mod mute;
mod retrieval;
mod schema;
mod types;
mod users;

pub use folders::{FolderNode, FolderTree};
pub use schema::{timed, Database, STORAGE_TIMEOUT};
pub use types::{Article, DatabaseError, Favicon, Feed, Folder, User, ROOT_FOLDER_NAME};
