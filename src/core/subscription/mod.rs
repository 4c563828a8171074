//! Subscription management and the entry fan-out pass.
//!
//! Scanning and fan-out are separate passes: the scheduler flags feeds that
//! ingested entries, and `update_subscriptions` later copies those entries
//! into per-user reading lists. The `UNIQUE(user_id, entry_id)` constraint
//! makes the copy idempotent, so a crash between the two passes only causes
//! harmless re-work.

use tracing::info;

use crate::config::Config;
use crate::core::storage::buffer::BulkBuffer;
use crate::core::storage::models::{EntryStatus, NewUserEntry};
use crate::core::storage::repository::{FeedRepository, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub feeds: usize,
    pub user_entries: usize,
}

/// Fan entries out to subscriber reading lists.
///
/// Covers every active feed flagged by the scheduler: each entry not yet
/// added to subscribers becomes one unread row per current subscriber. The
/// buffer is flushed before entries are marked, so an entry is never marked
/// added while its user rows are still pending.
pub async fn update_subscriptions(
    repository: &FeedRepository,
    config: &Config,
) -> Result<FanOutSummary, SubscriptionError> {
    let feeds = repository.feeds_with_new_entries().await?;

    // closed on every exit path, like the scan buffer
    let mut buffer = BulkBuffer::<NewUserEntry>::new(repository, config.max_bulk_create);
    let mut summary = FanOutSummary::default();
    let mut batch_result: Result<(), StorageError> = Ok(());
    for feed in feeds {
        match fan_out_feed(repository, &mut buffer, feed.id).await {
            Ok(user_entries) => {
                summary.feeds += 1;
                summary.user_entries += user_entries;
            }
            Err(error) => {
                batch_result = Err(error);
                break;
            }
        }
    }
    let close_result = buffer.close().await;
    batch_result?;
    close_result?;

    info!(
        feeds = summary.feeds,
        user_entries = summary.user_entries,
        "subscription fan-out complete"
    );
    Ok(summary)
}

/// Fan one feed's unflagged entries out to its current subscribers.
/// Returns the number of user-entry rows produced. The buffer is flushed
/// before entries are marked so a row is never marked added while its user
/// copies are still pending.
async fn fan_out_feed(
    repository: &FeedRepository,
    buffer: &mut BulkBuffer<'_, NewUserEntry>,
    feed_id: i64,
) -> Result<usize, StorageError> {
    let subscribers = repository.subscribers(feed_id).await?;
    let entry_ids = repository.unflagged_entry_ids(feed_id).await?;

    for &entry_id in &entry_ids {
        for &user_id in &subscribers {
            buffer
                .add(NewUserEntry {
                    user_id,
                    feed_id,
                    entry_id,
                    status: EntryStatus::Unread,
                })
                .await?;
        }
    }
    buffer.flush().await?;

    repository.mark_entries_added(&entry_ids).await?;
    repository.clear_new_entries_flag(feed_id).await?;
    Ok(entry_ids.len() * subscribers.len())
}

/// Subscribe a user to a feed, keeping the feed's scan eligibility in step.
///
/// Entries already fanned out to earlier subscribers are backfilled into the
/// new subscriber's reading list; entries still awaiting fan-out reach them
/// through the next `update_subscriptions` pass.
pub async fn subscribe_user(
    repository: &FeedRepository,
    user_id: i64,
    feed_id: i64,
) -> Result<(), SubscriptionError> {
    repository.add_subscription(user_id, feed_id).await?;
    repository.set_has_subscribers(feed_id, true).await?;

    let backfill: Vec<NewUserEntry> = repository
        .flagged_entry_ids(feed_id)
        .await?
        .into_iter()
        .map(|entry_id| NewUserEntry {
            user_id,
            feed_id,
            entry_id,
            status: EntryStatus::Unread,
        })
        .collect();
    repository.insert_user_entries(&backfill).await?;
    Ok(())
}

/// Unsubscribe a user, dropping their reading-list rows for the feed. The
/// last unsubscriber takes the feed out of scan selection.
pub async fn unsubscribe_user(
    repository: &FeedRepository,
    user_id: i64,
    feed_id: i64,
) -> Result<(), SubscriptionError> {
    repository.remove_subscription(user_id, feed_id).await?;
    repository.delete_user_entries(user_id, feed_id).await?;
    if repository.count_subscribers(feed_id).await? == 0 {
        repository.set_has_subscribers(feed_id, false).await?;
    }
    Ok(())
}
