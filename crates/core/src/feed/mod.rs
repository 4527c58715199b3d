//! Feed artifact rendering and regeneration.

mod regenerator;
mod rss;

pub use regenerator::{FeedRegenerator, RegenerateError};
pub use rss::{feed_storage_key, render_feed, FEED_CONTENT_TYPE};
