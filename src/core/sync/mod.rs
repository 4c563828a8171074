//! Feed scan scheduler: selects due feeds and drives the
//! fetch -> parse -> dedupe -> write pipeline for each, updating per-feed
//! health and writing one scan log per attempt. Fetch and parse failures
//! are converted into feed-health updates at the per-feed boundary; only
//! store errors abort the batch.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::core::feed::fetcher::{self, ConditionalHeaders, FeedResponse, FetchError};
use crate::core::feed::parser;
use crate::core::feed::types::ParsedEntry;
use crate::core::sanitize;
use crate::core::storage::buffer::BulkBuffer;
use crate::core::storage::models::{entry_identifier, FeedRecord, NewEntry, NewFeedLog};
use crate::core::storage::repository::{FeedRepository, StorageError};

pub const DEFAULT_BATCH_SIZE: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("http client setup failed: {0}")]
    Client(#[from] FetchError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    pub new_entries: i64,
}

/// Run one scan batch over at most `num` due feeds.
pub async fn update_feeds(
    repository: &FeedRepository,
    config: &Config,
    num: i64,
) -> Result<ScanSummary, SyncError> {
    let client = fetcher::build_client(config)?;
    let now = Utc::now();
    let feeds = repository.list_due_feeds(now, num).await?;

    // the buffer is closed on every exit path: a store failure mid-batch
    // must not drop entries already buffered for earlier feeds
    let mut entry_buffer = BulkBuffer::<NewEntry>::new(repository, config.max_bulk_create);
    let mut summary = ScanSummary::default();
    let mut batch_result: Result<(), StorageError> = Ok(());
    for mut feed in feeds {
        match scan_feed(repository, &client, config, &mut feed, &mut entry_buffer).await {
            Ok(ingested) => {
                summary.scanned += 1;
                summary.new_entries += ingested;
            }
            Err(error) => {
                batch_result = Err(error);
                break;
            }
        }
    }
    let close_result = entry_buffer.close().await;
    batch_result?;
    close_result?;

    info!(
        scanned = summary.scanned,
        new_entries = summary.new_entries,
        "feed scan batch complete"
    );
    Ok(summary)
}

/// Scan a single feed. Returns the number of entries handed to the buffer.
/// Transport and parse failures are folded into the feed's health state;
/// the returned error covers store failures only.
async fn scan_feed(
    repository: &FeedRepository,
    client: &reqwest::Client,
    config: &Config,
    feed: &mut FeedRecord,
    entry_buffer: &mut BulkBuffer<'_, NewEntry>,
) -> Result<i64, StorageError> {
    let scan_started = Instant::now();
    let now = Utc::now();
    feed.last_checked = Some(now);
    feed.next_checked = Some(now + Duration::hours(feed.check_frequency_hours));

    let mut log = NewFeedLog {
        feed_id: feed.id,
        status_code: None,
        headers: String::new(),
        notes: String::new(),
        duration_ms: 0,
        entries: 0,
    };
    let mut notes: Vec<String> = Vec::new();

    let conditional = ConditionalHeaders {
        etag: feed.etag.clone(),
        last_modified: feed.last_modified,
    };

    match fetcher::fetch(client, &feed.feed_url, &conditional, config.max_redirects).await {
        Err(error) => {
            notes.push(error.to_string());
            feed.increment_error_count(config.max_errors);
            debug!(feed_id = feed.id, %error, "fetch failed");
        }
        Ok(response) => {
            log.status_code = Some(i64::from(response.status));
            log.headers = format!(
                "{}--\n{}",
                fetcher::request_header_dump(&config.user_agent, &conditional),
                fetcher::response_header_dump(&response.headers)
            );
            notes.push(format!("updating {}", feed.title));

            let collided =
                handle_redirect(repository, feed, &response, &mut notes).await?;
            if !collided {
                process_response(repository, config, feed, &response, entry_buffer, &mut log, &mut notes, now)
                    .await?;
            }
        }
    }

    log.notes = notes.join("\n");
    log.duration_ms = scan_started.elapsed().as_millis() as i64;
    repository.update_feed(feed).await?;
    repository.insert_feed_log(&log).await?;
    Ok(log.entries)
}

/// Adopt a permanently moved feed URL, unless another feed already owns the
/// target, in which case the feed is disabled (two rows for one URL cannot
/// be merged here). Returns true on collision, which also skips the body.
async fn handle_redirect(
    repository: &FeedRepository,
    feed: &mut FeedRecord,
    response: &FeedResponse,
    notes: &mut Vec<String>,
) -> Result<bool, StorageError> {
    if response.final_url == feed.feed_url || !response.permanently_moved() {
        return Ok(false);
    }
    if repository.feed_url_exists(&response.final_url).await? {
        feed.disabled = true;
        notes.push(format!(
            "feed moved to {}, but another feed already owns that URL; disabling",
            response.final_url
        ));
        return Ok(true);
    }
    notes.push(format!(
        "updating feed url from {} to {}",
        feed.feed_url, response.final_url
    ));
    feed.feed_url = response.final_url.clone();
    Ok(false)
}

#[allow(clippy::too_many_arguments)]
async fn process_response(
    repository: &FeedRepository,
    config: &Config,
    feed: &mut FeedRecord,
    response: &FeedResponse,
    entry_buffer: &mut BulkBuffer<'_, NewEntry>,
    log: &mut NewFeedLog,
    notes: &mut Vec<String>,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    match response.status {
        304 => {
            notes.push("not modified".to_string());
        }
        200 => {
            notes.push("status OK, parsing".to_string());
            feed.etag = response.header("etag").and_then(normalize_etag);
            feed.last_modified = response
                .header("last-modified")
                .and_then(fetcher::parse_http_date)
                .or(Some(now));

            match parser::parse(&response.body, response.charset().as_deref()) {
                Err(error) => {
                    notes.push("malformed feed".to_string());
                    notes.push(error.to_string());
                    feed.increment_error_count(config.max_errors);
                }
                Ok(parsed) => {
                    feed.reset_error_count();
                    if let Some(title) = parsed.title.as_deref() {
                        feed.title =
                            sanitize::shorten(&sanitize::strip_markup(title), sanitize::MAX_TEXT_LEN);
                    }
                    feed.description = parsed.description.as_deref().map(sanitize::strip_markup);

                    let watermark = repository
                        .latest_entry(feed.id)
                        .await?
                        .map(|entry| entry.published);
                    log.entries =
                        ingest_entries(feed, parsed.entries, watermark, now, entry_buffer).await?;
                    if log.entries > 0 {
                        feed.has_new_entries = true;
                    }
                }
            }
        }
        other => {
            notes.push(format!("error: {other}"));
            feed.increment_error_count(config.max_errors);
        }
    }
    Ok(())
}

/// Classify parsed entries against the published-timestamp watermark and
/// buffer the new ones. Entries are assumed newest-first, so the first
/// non-newer entry ends the scan; a source that backdates or reorders items
/// can hide genuinely new entries behind this early exit (known limitation).
async fn ingest_entries(
    feed: &FeedRecord,
    entries: Vec<ParsedEntry>,
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    entry_buffer: &mut BulkBuffer<'_, NewEntry>,
) -> Result<i64, StorageError> {
    let mut ingested = 0;
    for entry in entries {
        let published = entry.published.or(entry.updated).unwrap_or(now);
        if let Some(watermark) = watermark {
            if published <= watermark {
                break;
            }
        }
        let identity_source = entry
            .source_id
            .clone()
            .unwrap_or_else(|| entry.link.clone());
        let title = sanitize::strip_markup(entry.title.as_deref().unwrap_or("no title"));
        let author = sanitize::strip_markup(entry.author.as_deref().unwrap_or("no author"));

        entry_buffer
            .add(NewEntry {
                feed_id: feed.id,
                entry_id: entry_identifier(&identity_source),
                link: entry.link.clone(),
                title: sanitize::shorten(&title, sanitize::MAX_TEXT_LEN),
                author: sanitize::shorten(&author, sanitize::MAX_TEXT_LEN),
                content: sanitize::entry_content(&entry),
                published,
                updated: entry.updated.unwrap_or(now),
            })
            .await?;
        ingested += 1;
    }
    Ok(ingested)
}

/// ETags are stored stripped of every non-alphanumeric character; an ETag
/// that normalizes to nothing is not stored at all.
fn normalize_etag(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(char::is_ascii_alphanumeric).collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
