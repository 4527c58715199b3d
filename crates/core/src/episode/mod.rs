//! Episode, feed and publication model plus repository backends.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteRepository;
pub use store::{Repository, RepositoryError, RepositoryOps};
pub use types::{
    Episode, EpisodeStatus, Feed, ProcessingMode, Publication, DEFAULT_FEED_ID,
};
