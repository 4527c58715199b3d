//! RSS 2.0 feed rendering.
//!
//! The feed artifact is rebuilt from scratch on every regeneration; the
//! serde structs below mirror the RSS document shape with iTunes extensions
//! for duration and episode numbering.

use serde::Serialize;

use crate::config::FeedConfig;
use crate::episode::{Episode, Feed};

/// Content type of the rendered artifact.
pub const FEED_CONTENT_TYPE: &str = "application/rss+xml";

const ITUNES_NAMESPACE: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

#[derive(Serialize)]
#[serde(rename = "rss")]
struct Rss {
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "@xmlns:itunes")]
    xmlns_itunes: &'static str,
    channel: Channel,
}

#[derive(Serialize)]
struct Channel {
    title: String,
    link: String,
    description: String,
    language: String,
    #[serde(rename = "item")]
    items: Vec<Item>,
}

#[derive(Serialize)]
struct Item {
    title: String,
    guid: Guid,
    #[serde(rename = "pubDate")]
    pub_date: String,
    enclosure: Enclosure,
    #[serde(rename = "itunes:episode")]
    episode_number: usize,
    #[serde(rename = "itunes:duration", skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
}

#[derive(Serialize)]
struct Guid {
    #[serde(rename = "@isPermaLink")]
    is_perma_link: &'static str,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Serialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@length")]
    length: u64,
    #[serde(rename = "@type")]
    mime_type: String,
}

/// Storage key of a feed's published artifact.
pub fn feed_storage_key(user_id: &str, feed_id: &str) -> String {
    format!("{}/feeds/{}.xml", user_id, feed_id)
}

/// MIME type for an episode's media format.
fn mime_type(media_format: &str) -> &'static str {
    match media_format {
        "m4a" | "mp4" => "audio/mp4",
        "ogg" | "opus" => "audio/ogg",
        // The processing backend produces mp3 unless told otherwise.
        _ => "audio/mpeg",
    }
}

/// `HH:MM:SS` duration tag value.
fn format_duration(total_secs: u32) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Render a feed's RSS document from its metadata and member episodes.
///
/// `episodes` must already be in publication insertion order (oldest
/// first); item numbering follows that order.
pub fn render_feed(
    feed: &Feed,
    episodes: &[Episode],
    config: &FeedConfig,
) -> Result<String, quick_xml::SeError> {
    let items = episodes
        .iter()
        .enumerate()
        .map(|(idx, episode)| Item {
            title: episode.title.clone(),
            guid: Guid {
                is_perma_link: "false",
                value: format!("{}/{}", episode.user_id, episode.id),
            },
            pub_date: episode.created_at.to_rfc2822(),
            enclosure: Enclosure {
                url: episode.artifact_url.clone(),
                length: episode.byte_length.unwrap_or(0),
                mime_type: mime_type(&episode.media_format).to_string(),
            },
            episode_number: idx + 1,
            duration: episode.duration_secs.map(format_duration),
        })
        .collect();

    let document = Rss {
        version: "2.0",
        xmlns_itunes: ITUNES_NAMESPACE,
        channel: Channel {
            title: feed.title.clone(),
            link: feed.artifact_url.clone(),
            description: feed.title.clone(),
            language: config.language.clone(),
            items,
        },
    };

    let body = quick_xml::se::to_string(&document)?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}", body))
}
