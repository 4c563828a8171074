use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sqlx::FromRow;

/// Per-user read state for an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryStatus {
    Unread,
    Read,
    Saved,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Unread => "unread",
            EntryStatus::Read => "read",
            EntryStatus::Saved => "saved",
        }
    }
}

/// A subscribable source, mutated on every scan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedRecord {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub site_url: Option<String>,
    pub feed_url: String,
    pub disabled: bool,
    pub has_subscribers: bool,
    pub has_new_entries: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub next_checked: Option<DateTime<Utc>>,
    pub check_frequency_hours: i64,
    pub error_count: i64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FeedRecord {
    /// Count a failed scan. Reaching `max_errors` disables the feed, which
    /// removes it from future batch selection until an operator intervenes.
    pub fn increment_error_count(&mut self, max_errors: i64) {
        self.error_count += 1;
        if self.error_count >= max_errors {
            self.disabled = true;
        }
    }

    /// A clean scan clears the error state and re-enables the feed.
    pub fn reset_error_count(&mut self) {
        self.error_count = 0;
        self.disabled = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub feed_id: i64,
    pub entry_id: String,
    pub link: String,
    pub title: String,
    pub author: String,
    pub content: String,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntryRecord {
    pub id: i64,
    pub feed_id: i64,
    pub entry_id: String,
    pub link: String,
    pub title: String,
    pub author: String,
    pub content: String,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub added_to_subscribers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUserEntry {
    pub user_id: i64,
    pub feed_id: i64,
    pub entry_id: i64,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserEntryRecord {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub entry_id: i64,
    pub status: String,
}

/// Append-only audit record of one scan attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedLog {
    pub feed_id: i64,
    pub status_code: Option<i64>,
    pub headers: String,
    pub notes: String,
    pub duration_ms: i64,
    pub entries: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedLogRecord {
    pub id: i64,
    pub feed_id: i64,
    pub status_code: Option<i64>,
    pub headers: String,
    pub notes: String,
    pub duration_ms: i64,
    pub entries: i64,
}

/// Stable entry identifier: SHA-1 hex digest of the source-provided id,
/// falling back to the entry link.
pub fn entry_identifier(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> FeedRecord {
        FeedRecord {
            id: 1,
            title: "feed".to_string(),
            description: None,
            icon_url: None,
            site_url: None,
            feed_url: "https://example.com/feed.xml".to_string(),
            disabled: false,
            has_subscribers: true,
            has_new_entries: false,
            last_checked: None,
            next_checked: None,
            check_frequency_hours: 1,
            error_count: 0,
            etag: None,
            last_modified: None,
        }
    }

    #[test]
    fn error_count_disables_at_threshold() {
        let max_errors = 5;

        let mut below = feed();
        for _ in 0..max_errors - 1 {
            below.increment_error_count(max_errors);
        }
        assert_eq!(below.error_count, 4);
        assert!(!below.disabled);

        below.increment_error_count(max_errors);
        assert!(below.disabled);
    }

    #[test]
    fn reset_clears_count_and_disabled_regardless_of_state() {
        let mut broken = feed();
        broken.error_count = 9;
        broken.disabled = true;

        broken.reset_error_count();
        assert_eq!(broken.error_count, 0);
        assert!(!broken.disabled);
    }

    #[test]
    fn entry_identifier_is_sha1_hex() {
        assert_eq!(
            entry_identifier("X"),
            "c032adc1ff629c9b66f22749ad667e6beadf144b"
        );
        assert_eq!(entry_identifier("X").len(), 40);
    }

    #[test]
    fn status_labels_match_storage_values() {
        assert_eq!(EntryStatus::Unread.as_str(), "unread");
        assert_eq!(EntryStatus::Read.as_str(), "read");
        assert_eq!(EntryStatus::Saved.as_str(), "saved");
    }
}
