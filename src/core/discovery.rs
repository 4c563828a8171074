//! Feed autodiscovery: turn a page URL into tracked feeds.
//!
//! A URL that is already tracked, or that serves feed content directly, maps
//! to a single feed. Otherwise the page is treated as HTML and its
//! `<link rel="alternate">` elements are collected per known feed media
//! type. New feeds start with a placeholder title until their first scan.

use reqwest::Url;
use scraper::{Html, Selector};

use crate::config::Config;
use crate::core::feed::fetcher::{self, ConditionalHeaders, FeedResponse, FetchError};
use crate::core::storage::models::FeedRecord;
use crate::core::storage::repository::{FeedRepository, StorageError};

/// Media types accepted as feed documents, in preference order.
pub const FEED_MIME_TYPES: &[&str] = &["application/atom+xml", "application/rss+xml", "text/xml"];

pub const PLACEHOLDER_TITLE: &str = "no title yet";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no feed found at {0}")]
    NoFeedFound(String),
    #[error("{url} answered with status {status}")]
    UnexpectedStatus { url: String, status: u16 },
}

/// Resolve `url` to one or more tracked feeds, creating rows as needed.
pub async fn discover_feeds(
    repository: &FeedRepository,
    client: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<Vec<FeedRecord>, DiscoveryError> {
    if let Some(existing) = repository.get_feed_by_url(url).await? {
        return Ok(vec![existing]);
    }

    let response = fetcher::fetch(client, url, &ConditionalHeaders::default(), config.max_redirects)
        .await?;
    // error pages can carry alternate links or even a feed media type;
    // only a successful response is discoverable
    if response.status != 200 {
        return Err(DiscoveryError::UnexpectedStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    if response
        .media_type()
        .as_deref()
        .is_some_and(is_feed_media_type)
    {
        let feed = repository
            .get_or_create_feed(&response.final_url, PLACEHOLDER_TITLE)
            .await?;
        return Ok(vec![feed]);
    }

    let candidates = feed_links(&response, config.max_feeds);
    if candidates.is_empty() {
        return Err(DiscoveryError::NoFeedFound(url.to_string()));
    }
    let mut feeds = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        feeds.push(
            repository
                .get_or_create_feed(&candidate, PLACEHOLDER_TITLE)
                .await?,
        );
    }
    Ok(feeds)
}

pub fn is_feed_media_type(media_type: &str) -> bool {
    FEED_MIME_TYPES.contains(&media_type)
}

/// Collect alternate-link feed URLs from an HTML page, at most
/// `max_per_type` per feed media type, resolved against the final page URL.
///
/// Fully synchronous: the parsed document is not `Send` and must not be held
/// across an await point.
fn feed_links(response: &FeedResponse, max_per_type: usize) -> Vec<String> {
    let html = String::from_utf8_lossy(&response.body);
    let document = Html::parse_document(&html);
    let base = Url::parse(&response.final_url).ok();

    let mut found: Vec<String> = Vec::new();
    for media_type in FEED_MIME_TYPES {
        let Ok(selector) =
            Selector::parse(&format!(r#"link[rel="alternate"][type="{media_type}"]"#))
        else {
            continue;
        };
        for element in document.select(&selector).take(max_per_type) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let resolved = match &base {
                Some(base) => base.join(href).map(|joined| joined.to_string()).ok(),
                None => Some(href.to_string()),
            };
            if let Some(url) = resolved {
                if !found.contains(&url) {
                    found.push(url);
                }
            }
        }
    }
    found
}
