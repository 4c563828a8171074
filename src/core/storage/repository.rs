use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};

use super::models::{
    EntryRecord, FeedLogRecord, FeedRecord, NewEntry, NewFeedLog, NewUserEntry, UserEntryRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

const FEED_COLUMNS: &str = "id, title, description, icon_url, site_url, feed_url, \
    disabled, has_subscribers, has_new_entries, last_checked, next_checked, \
    check_frequency_hours, error_count, etag, last_modified";

const ENTRY_COLUMNS: &str =
    "id, feed_id, entry_id, link, title, author, content, published, updated, \
    added_to_subscribers";

#[derive(Debug, Clone)]
pub struct FeedRepository {
    pool: SqlitePool,
}

impl FeedRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_or_create_feed(
        &self,
        feed_url: &str,
        title: &str,
    ) -> Result<FeedRecord, StorageError> {
        sqlx::query(
            "INSERT INTO feeds (feed_url, title) VALUES (?1, ?2) \
             ON CONFLICT(feed_url) DO NOTHING",
        )
        .bind(feed_url)
        .bind(title)
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE feed_url = ?1"
        ))
        .bind(feed_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get_feed_by_id(&self, id: i64) -> Result<Option<FeedRecord>, StorageError> {
        let row = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_feed_by_url(
        &self,
        feed_url: &str,
    ) -> Result<Option<FeedRecord>, StorageError> {
        let row = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE feed_url = ?1"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn feed_url_exists(&self, feed_url: &str) -> Result<bool, StorageError> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM feeds WHERE feed_url = ?1)",
        )
        .bind(feed_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Feeds due for a scan: enabled, subscribed to, and never checked or
    /// past their `next_checked` stamp. Bounded to `limit` rows.
    pub async fn list_due_feeds(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FeedRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE disabled = 0 AND has_subscribers = 1 \
               AND (next_checked IS NULL OR next_checked <= ?1) \
             LIMIT ?2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Persist a feed's full scan state back to the store.
    pub async fn update_feed(&self, feed: &FeedRecord) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE feeds SET \
               title = ?1, description = ?2, icon_url = ?3, site_url = ?4, \
               feed_url = ?5, disabled = ?6, has_subscribers = ?7, \
               has_new_entries = ?8, last_checked = ?9, next_checked = ?10, \
               check_frequency_hours = ?11, error_count = ?12, etag = ?13, \
               last_modified = ?14, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?15",
        )
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.icon_url)
        .bind(&feed.site_url)
        .bind(&feed.feed_url)
        .bind(feed.disabled)
        .bind(feed.has_subscribers)
        .bind(feed.has_new_entries)
        .bind(feed.last_checked)
        .bind(feed.next_checked)
        .bind(feed.check_frequency_hours)
        .bind(feed.error_count)
        .bind(&feed.etag)
        .bind(feed.last_modified)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Operator action: make the feed due immediately and drop its
    /// conditional-GET cache so the next scan refetches unconditionally.
    pub async fn force_recheck(
        &self,
        feed_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE feeds SET next_checked = ?1, etag = NULL, last_modified = NULL, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The dedup watermark: most recently published stored entry, if any.
    pub async fn latest_entry(&self, feed_id: i64) -> Result<Option<EntryRecord>, StorageError> {
        let row = sqlx::query_as::<_, EntryRecord>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE feed_id = ?1 ORDER BY published DESC LIMIT 1"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_entries(&self, rows: &[NewEntry]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT INTO entries (feed_id, entry_id, link, title, author, content, \
             published, updated) ",
        );
        query.push_values(rows, |mut values, row| {
            values
                .push_bind(row.feed_id)
                .push_bind(&row.entry_id)
                .push_bind(&row.link)
                .push_bind(&row.title)
                .push_bind(&row.author)
                .push_bind(&row.content)
                .push_bind(row.published)
                .push_bind(row.updated);
        });
        let affected = query.build().execute(&self.pool).await?.rows_affected();
        Ok(affected)
    }

    pub async fn insert_user_entries(&self, rows: &[NewUserEntry]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT INTO user_entries (user_id, feed_id, entry_id, status) ",
        );
        query.push_values(rows, |mut values, row| {
            values
                .push_bind(row.user_id)
                .push_bind(row.feed_id)
                .push_bind(row.entry_id)
                .push_bind(row.status.as_str());
        });
        query.push(" ON CONFLICT(user_id, entry_id) DO NOTHING");
        let affected = query.build().execute(&self.pool).await?.rows_affected();
        Ok(affected)
    }

    pub async fn insert_feed_log(&self, log: &NewFeedLog) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO feed_logs (feed_id, status_code, headers, notes, duration_ms, entries) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(log.feed_id)
        .bind(log.status_code)
        .bind(&log.headers)
        .bind(&log.notes)
        .bind(log.duration_ms)
        .bind(log.entries)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn feed_logs(&self, feed_id: i64) -> Result<Vec<FeedLogRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FeedLogRecord>(
            "SELECT id, feed_id, status_code, headers, notes, duration_ms, entries \
             FROM feed_logs WHERE feed_id = ?1 ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Active feeds whose last scan ingested entries not yet fanned out.
    pub async fn feeds_with_new_entries(&self) -> Result<Vec<FeedRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE disabled = 0 AND has_subscribers = 1 AND has_new_entries = 1"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn unflagged_entry_ids(&self, feed_id: i64) -> Result<Vec<i64>, StorageError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM entries WHERE feed_id = ?1 AND added_to_subscribers = 0 ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn flagged_entry_ids(&self, feed_id: i64) -> Result<Vec<i64>, StorageError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM entries WHERE feed_id = ?1 AND added_to_subscribers = 1 ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn mark_entries_added(&self, entry_ids: &[i64]) -> Result<u64, StorageError> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let mut query =
            QueryBuilder::<Sqlite>::new("UPDATE entries SET added_to_subscribers = 1 WHERE id IN (");
        let mut separated = query.separated(", ");
        for entry_id in entry_ids {
            separated.push_bind(*entry_id);
        }
        separated.push_unseparated(")");
        let affected = query.build().execute(&self.pool).await?.rows_affected();
        Ok(affected)
    }

    pub async fn clear_new_entries_flag(&self, feed_id: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE feeds SET has_new_entries = 0 WHERE id = ?1")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_subscription(&self, user_id: i64, feed_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO subscriptions (user_id, feed_id) VALUES (?1, ?2) \
             ON CONFLICT(user_id, feed_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_subscription(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<u64, StorageError> {
        let affected = sqlx::query("DELETE FROM subscriptions WHERE user_id = ?1 AND feed_id = ?2")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    pub async fn subscribers(&self, feed_id: i64) -> Result<Vec<i64>, StorageError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM subscriptions WHERE feed_id = ?1 ORDER BY user_id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn count_subscribers(&self, feed_id: i64) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscriptions WHERE feed_id = ?1",
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn set_has_subscribers(
        &self,
        feed_id: i64,
        has_subscribers: bool,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE feeds SET has_subscribers = ?1 WHERE id = ?2")
            .bind(has_subscribers)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_user_entries(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<u64, StorageError> {
        let affected =
            sqlx::query("DELETE FROM user_entries WHERE user_id = ?1 AND feed_id = ?2")
                .bind(user_id)
                .bind(feed_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected)
    }

    pub async fn user_entries_for(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<Vec<UserEntryRecord>, StorageError> {
        let rows = sqlx::query_as::<_, UserEntryRecord>(
            "SELECT id, user_id, feed_id, entry_id, status FROM user_entries \
             WHERE user_id = ?1 AND feed_id = ?2 ORDER BY entry_id",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
