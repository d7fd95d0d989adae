//! Buffered, batched upserts of product documents.

use tracing::{debug, info};

use catalogsync_shared::{CatalogSyncError, Product, Result, RetryPolicy, retry_with_backoff};
use catalogsync_storage::Storage;

/// Outcome of a finished [`BatchUpserter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Size of every committed batch, in commit order.
    pub batches: Vec<usize>,
    pub documents_written: usize,
}

/// Accumulates products and commits them in bulk operations of at most
/// `batch_size` documents.
///
/// The buffer is cleared only after storage acknowledges a batch. Call
/// [`BatchUpserter::finish`] once the row stream ends so the tail is
/// committed too.
pub struct BatchUpserter<'a> {
    storage: &'a Storage,
    batch_size: usize,
    retry: RetryPolicy,
    buffer: Vec<Product>,
    summary: UpsertSummary,
}

impl<'a> BatchUpserter<'a> {
    pub fn new(storage: &'a Storage, batch_size: usize, retry: RetryPolicy) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            storage,
            batch_size,
            retry,
            buffer: Vec::with_capacity(batch_size),
            summary: UpsertSummary::default(),
        }
    }

    /// Buffer one product, committing when the buffer is full.
    ///
    /// Returns the size of the batch committed by this call, if any.
    pub async fn push(&mut self, product: Product) -> Result<Option<usize>> {
        self.buffer.push(product);
        if self.buffer.len() >= self.batch_size {
            return self.flush().await;
        }
        Ok(None)
    }

    /// Products waiting for the next commit.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Commit whatever is buffered. An empty buffer is a no-op.
    pub async fn flush(&mut self) -> Result<Option<usize>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let batch = self.summary.batches.len() + 1;
        let size = self.buffer.len();
        let storage = self.storage;
        let buffer = &self.buffer;

        let written = retry_with_backoff(&self.retry, "bulk upsert", || {
            storage.bulk_upsert_by_doc_id(buffer)
        })
        .await
        .map_err(|e| CatalogSyncError::BatchWrite {
            batch,
            size,
            message: e.to_string(),
        })?;

        self.buffer.clear();
        self.summary.batches.push(size);
        self.summary.documents_written += written;
        info!(batch, size, total = self.summary.documents_written, "batch committed");
        Ok(Some(size))
    }

    /// Commit the remainder and return the per-batch summary.
    pub async fn finish(mut self) -> Result<UpsertSummary> {
        if let Some(size) = self.flush().await? {
            debug!(size, "final partial batch committed");
        }
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{product, test_storage};

    #[tokio::test]
    async fn remainder_is_flushed_on_finish() {
        let storage = test_storage().await;
        let mut upserter = BatchUpserter::new(&storage, 2, RetryPolicy::none());

        assert_eq!(upserter.push(product("a", None)).await.unwrap(), None);
        assert_eq!(upserter.push(product("b", None)).await.unwrap(), Some(2));
        assert_eq!(upserter.push(product("c", None)).await.unwrap(), None);
        assert_eq!(upserter.pending(), 1);

        let summary = upserter.finish().await.unwrap();
        assert_eq!(summary.batches, vec![2, 1]);
        assert_eq!(summary.documents_written, 3);
        assert_eq!(storage.count_products().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn exact_multiple_leaves_no_tail() {
        let storage = test_storage().await;
        let mut upserter = BatchUpserter::new(&storage, 2, RetryPolicy::none());
        for name in ["a", "b", "c", "d"] {
            upserter.push(product(name, None)).await.unwrap();
        }
        let summary = upserter.finish().await.unwrap();
        assert_eq!(summary.batches, vec![2, 2]);
    }

    #[tokio::test]
    async fn nothing_pushed_commits_nothing() {
        let storage = test_storage().await;
        let summary = BatchUpserter::new(&storage, 5, RetryPolicy::none())
            .finish()
            .await
            .unwrap();
        assert!(summary.batches.is_empty());
        assert_eq!(summary.documents_written, 0);
    }

    #[tokio::test]
    async fn reimport_of_same_doc_id_replaces() {
        let storage = test_storage().await;
        let first = product("gloves", None);
        let mut second = product("gloves v2", Some("Updated"));
        second.doc_id = first.doc_id.clone();

        let mut upserter = BatchUpserter::new(&storage, 10, RetryPolicy::none());
        upserter.push(first.clone()).await.unwrap();
        upserter.finish().await.unwrap();

        let mut upserter = BatchUpserter::new(&storage, 10, RetryPolicy::none());
        upserter.push(second.clone()).await.unwrap();
        upserter.finish().await.unwrap();

        assert_eq!(storage.count_products().await.unwrap(), 1);
        let stored = storage.get_product(&first.doc_id).await.unwrap().unwrap();
        assert_eq!(stored.data.name, "gloves v2");
        assert_eq!(stored.data.variants.len(), 1);
    }
}
