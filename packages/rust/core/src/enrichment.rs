//! Description backfill.
//!
//! Walks the "description missing or empty" cursor one window at a time,
//! asks the generation service for each document in the window
//! concurrently, joins every call, then commits the successes as one bulk
//! partial update. A failed call skips only that document.

use tracing::{info, instrument, warn};

use catalogsync_generator::{DescriptionRequest, GeneratorClient};
use catalogsync_shared::{DescriptionUpdate, DocId, Result, RetryPolicy, retry_with_backoff};
use catalogsync_storage::Storage;

/// Results of one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Documents read from the cursor.
    pub scanned: usize,
    /// Documents that received a generated description.
    pub enriched: usize,
    /// Documents skipped because generation failed.
    pub failed: usize,
    /// Size of every committed partial-update batch, in commit order.
    pub update_batches: Vec<usize>,
    /// Skipped documents with their causes.
    pub failures: Vec<(DocId, String)>,
}

/// Progress callback for the enrichment pass.
pub trait EnrichmentProgress: Send + Sync {
    /// Called after each window is joined and committed.
    fn window_committed(&self, scanned: usize, enriched: usize);
}

/// Ignores all progress.
pub struct NoEnrichmentProgress;

impl EnrichmentProgress for NoEnrichmentProgress {
    fn window_committed(&self, _scanned: usize, _enriched: usize) {}
}

/// Drives the enrichment pass over one storage handle.
pub struct EnrichmentScanner<'a> {
    storage: &'a Storage,
    generator: GeneratorClient,
    window: usize,
    retry: RetryPolicy,
}

impl<'a> EnrichmentScanner<'a> {
    pub fn new(
        storage: &'a Storage,
        generator: GeneratorClient,
        window: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            generator,
            window: window.max(1),
            retry,
        }
    }

    /// Scan until the cursor is exhausted.
    ///
    /// Generation failures are counted and skipped; storage failures end the
    /// pass with an error.
    #[instrument(skip_all, fields(window = self.window))]
    pub async fn run(&self, progress: &dyn EnrichmentProgress) -> Result<EnrichmentReport> {
        let mut report = EnrichmentReport::default();
        let mut cursor: Option<DocId> = None;
        let storage = self.storage;
        let window = self.window;

        loop {
            let after = cursor.clone();
            let page = retry_with_backoff(&self.retry, "scan missing descriptions", || {
                storage.list_missing_description(after.as_ref(), window)
            })
            .await?;
            if page.is_empty() {
                break;
            }
            // Keyset cursor: failed documents still match the filter and must
            // not be fetched again.
            cursor = page.last().map(|p| p.doc_id.clone());
            report.scanned += page.len();

            let mut handles = Vec::with_capacity(page.len());
            for product in &page {
                let generator = self.generator.clone();
                let request = DescriptionRequest::from_product(product);
                handles.push((
                    product.doc_id.clone(),
                    tokio::spawn(async move { generator.generate_description(&request).await }),
                ));
            }

            let mut updates = Vec::with_capacity(handles.len());
            for (doc_id, handle) in handles {
                let cause = match handle.await {
                    Ok(Ok(description)) => {
                        updates.push(DescriptionUpdate {
                            doc_id,
                            description,
                        });
                        continue;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => format!("generation task failed: {e}"),
                };
                warn!(doc_id = %doc_id, error = %cause, "enrichment skipped");
                report.failed += 1;
                report.failures.push((doc_id, cause));
            }

            if !updates.is_empty() {
                retry_with_backoff(&self.retry, "bulk set description", || {
                    storage.bulk_set_description(&updates)
                })
                .await?;
                report.enriched += updates.len();
                report.update_batches.push(updates.len());
                info!(size = updates.len(), total = report.enriched, "descriptions committed");
            }
            progress.window_committed(report.scanned, report.enriched);
        }

        info!(
            scanned = report.scanned,
            enriched = report.enriched,
            failed = report.failed,
            "enrichment pass complete"
        );
        Ok(report)
    }
}
