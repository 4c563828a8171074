use super::models::{NewEntry, NewUserEntry};
use super::repository::{FeedRepository, StorageError};

/// Row types the buffer knows how to persist in bulk.
pub trait BulkWrite: Sized {
    fn write_batch(
        repository: &FeedRepository,
        rows: &[Self],
    ) -> impl std::future::Future<Output = Result<u64, StorageError>> + Send;
}

impl BulkWrite for NewEntry {
    async fn write_batch(
        repository: &FeedRepository,
        rows: &[Self],
    ) -> Result<u64, StorageError> {
        repository.insert_entries(rows).await
    }
}

impl BulkWrite for NewUserEntry {
    async fn write_batch(
        repository: &FeedRepository,
        rows: &[Self],
    ) -> Result<u64, StorageError> {
        repository.insert_user_entries(rows).await
    }
}

/// Accumulates rows and persists them in bounded batches.
///
/// `add` flushes automatically once `max_items` rows are pending. The owner
/// must finish with [`close`](BulkBuffer::close) on every exit path so the
/// tail batch reaches the store; a buffer dropped with pending rows logs a
/// warning, since flushing needs `await` and cannot happen in `Drop`.
///
/// Not thread-safe: one buffer per logical writer.
#[derive(Debug)]
pub struct BulkBuffer<'a, T: BulkWrite> {
    repository: &'a FeedRepository,
    pending: Vec<T>,
    max_items: usize,
    written: usize,
}

impl<'a, T: BulkWrite> BulkBuffer<'a, T> {
    pub fn new(repository: &'a FeedRepository, max_items: usize) -> Self {
        BulkBuffer {
            repository,
            pending: Vec::new(),
            max_items: max_items.max(1),
            written: 0,
        }
    }

    pub async fn add(&mut self, row: T) -> Result<(), StorageError> {
        self.pending.push(row);
        if self.pending.len() >= self.max_items {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        T::write_batch(self.repository, &self.pending).await?;
        self.written += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Flush the tail batch and return the total number of rows written.
    pub async fn close(mut self) -> Result<usize, StorageError> {
        self.flush().await?;
        Ok(self.written)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl<T: BulkWrite> Drop for BulkBuffer<'_, T> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "bulk buffer dropped without close, pending rows were not written"
            );
        }
    }
}
