//! One vendor import job end to end:
//! storage → download → ingest (transform + batched upsert) → enrichment.
//!
//! Every exit path closes the job's storage handle and removes the staging
//! file before the outcome is returned.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use catalogsync_generator::GeneratorClient;
use catalogsync_ingest::{CsvRowStream, CsvStreamer, RowTransformer};
use catalogsync_shared::{AppConfig, CatalogSyncError, JobPhase, Result, VendorJob};
use catalogsync_storage::Storage;

use crate::enrichment::{EnrichmentProgress, EnrichmentReport, EnrichmentScanner};
use crate::upserter::BatchUpserter;

/// Skipped-row causes kept per report; further skips are only counted.
const MAX_RECORDED_SKIPS: usize = 1_000;

/// A row left out of the import, with its cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based data row number.
    pub row: u64,
    pub reason: String,
}

/// Result of a successful import job.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub vendor: String,
    pub run_id: String,
    /// Data rows consumed, including skipped ones.
    pub rows_read: u64,
    pub rows_skipped: u64,
    /// The first causes of skipped rows.
    pub skipped: Vec<SkippedRow>,
    /// Size of every committed bulk upsert, in commit order.
    pub upsert_batches: Vec<usize>,
    pub documents_written: usize,
    /// Whether the enrichment pass ran.
    pub enrichment_ran: bool,
    pub enrichment: EnrichmentReport,
    pub elapsed: Duration,
}

impl ImportReport {
    fn new(vendor: &str, run_id: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            run_id: run_id.to_string(),
            rows_read: 0,
            rows_skipped: 0,
            skipped: Vec::new(),
            upsert_batches: Vec::new(),
            documents_written: 0,
            enrichment_ran: false,
            enrichment: EnrichmentReport::default(),
            elapsed: Duration::ZERO,
        }
    }

    fn record_skip(&mut self, line: u64, cause: CatalogSyncError) {
        self.rows_skipped += 1;
        let (row, reason) = match cause {
            CatalogSyncError::RowParse { row, message } => (row, message),
            other => (line, other.to_string()),
        };
        warn!(vendor = %self.vendor, row, reason = %reason, "row skipped");
        if self.skipped.len() < MAX_RECORDED_SKIPS {
            self.skipped.push(SkippedRow { row, reason });
        }
    }

    /// Summary stored with the job history.
    pub fn stats_json(&self) -> String {
        serde_json::json!({
            "rows_read": self.rows_read,
            "rows_skipped": self.rows_skipped,
            "upsert_batches": self.upsert_batches,
            "documents_written": self.documents_written,
            "enrichment": {
                "ran": self.enrichment_ran,
                "scanned": self.enrichment.scanned,
                "enriched": self.enrichment.enriched,
                "failed": self.enrichment.failed,
                "update_batches": self.enrichment.update_batches,
            },
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
        .to_string()
    }
}

/// Progress callback for reporting job status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a job enters a new phase.
    fn phase(&self, vendor: &str, phase: JobPhase);
    /// Called after each committed bulk upsert.
    fn batch_committed(&self, vendor: &str, size: usize, total_written: usize);
    /// Called after each committed enrichment window.
    fn enrichment_progress(&self, vendor: &str, scanned: usize, enriched: usize);
    /// Called when a job succeeds.
    fn done(&self, report: &ImportReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _vendor: &str, _phase: JobPhase) {}
    fn batch_committed(&self, _vendor: &str, _size: usize, _total_written: usize) {}
    fn enrichment_progress(&self, _vendor: &str, _scanned: usize, _enriched: usize) {}
    fn done(&self, _report: &ImportReport) {}
}

/// Adapts a `ProgressReporter` to the `EnrichmentProgress` interface.
struct JobEnrichmentProgress<'a> {
    inner: &'a dyn ProgressReporter,
    vendor: &'a str,
}

impl EnrichmentProgress for JobEnrichmentProgress<'_> {
    fn window_committed(&self, scanned: usize, enriched: usize) {
        self.inner.enrichment_progress(self.vendor, scanned, enriched);
    }
}

// ---------------------------------------------------------------------------
// ImportOrchestrator
// ---------------------------------------------------------------------------

/// Runs vendor import jobs. Shared by all workers; each job opens its own
/// storage handle.
pub struct ImportOrchestrator {
    config: AppConfig,
    streamer: CsvStreamer,
    generator: Option<GeneratorClient>,
}

impl ImportOrchestrator {
    /// `generator` may be `None` to import without enrichment.
    pub fn new(config: AppConfig, generator: Option<GeneratorClient>) -> Result<Self> {
        let streamer = CsvStreamer::new(&config.import, config.retry.clone())?;
        Ok(Self {
            config,
            streamer,
            generator,
        })
    }

    fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.config.storage.database_path)
    }

    /// Run one job to completion.
    ///
    /// Failures are returned as `CatalogSyncError::Job` naming the vendor and
    /// the phase the job was in.
    #[instrument(skip_all, fields(vendor = %job.vendor_name))]
    pub async fn run(&self, job: &VendorJob, progress: &dyn ProgressReporter) -> Result<ImportReport> {
        let vendor = job.vendor_name.as_str();
        let run_id = Uuid::now_v7().to_string();
        let start = Instant::now();
        let mut phase = JobPhase::Connecting;
        progress.phase(vendor, phase);
        info!(%run_id, "import job started");

        let storage = match Storage::open(&self.database_path()).await {
            Ok(storage) => storage,
            Err(e) => return Err(self.fail(vendor, phase, e, progress)),
        };
        if let Err(e) = storage.insert_import_run(&run_id, vendor).await {
            storage.close();
            return Err(self.fail(vendor, phase, e, progress));
        }

        let mut report = ImportReport::new(vendor, &run_id);
        let outcome = self
            .drive(&storage, vendor, &mut phase, &mut report, progress)
            .await;
        report.elapsed = start.elapsed();

        let (status, stats) = match &outcome {
            Ok(()) => ("succeeded", report.stats_json()),
            Err(e) => (
                "failed",
                serde_json::json!({ "phase": phase.as_str(), "error": e.to_string() }).to_string(),
            ),
        };
        if let Err(e) = storage.finish_import_run(&run_id, status, &stats).await {
            warn!(error = %e, "failed to record import run outcome");
        }
        storage.close();

        match outcome {
            Ok(()) => {
                info!(
                    %run_id,
                    rows_read = report.rows_read,
                    rows_skipped = report.rows_skipped,
                    documents_written = report.documents_written,
                    enriched = report.enrichment.enriched,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "import job complete"
                );
                progress.done(&report);
                Ok(report)
            }
            Err(e) => Err(self.fail(vendor, phase, e, progress)),
        }
    }

    fn fail(
        &self,
        vendor: &str,
        phase: JobPhase,
        cause: CatalogSyncError,
        progress: &dyn ProgressReporter,
    ) -> CatalogSyncError {
        error!(vendor, phase = %phase, error = %cause, "import job failed");
        progress.phase(vendor, JobPhase::Failed);
        CatalogSyncError::job(vendor, phase, cause)
    }

    /// The phases after `Connecting`. `phase` tracks where a failure happened.
    async fn drive(
        &self,
        storage: &Storage,
        vendor: &str,
        phase: &mut JobPhase,
        report: &mut ImportReport,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        advance(phase, JobPhase::Downloading, vendor, progress);
        let url = self.config.vendors.csv_url(vendor)?;
        let mut stream = self.streamer.open(&url).await?;

        advance(phase, JobPhase::Ingesting, vendor, progress);
        let ingested = self.ingest(&mut stream, storage, report, progress).await;
        stream.release();
        ingested?;

        if self.config.enrichment.enabled {
            if let Some(generator) = &self.generator {
                advance(phase, JobPhase::Enriching, vendor, progress);
                let scanner = EnrichmentScanner::new(
                    storage,
                    generator.clone(),
                    self.config.enrichment.window,
                    self.config.retry.clone(),
                );
                report.enrichment = scanner
                    .run(&JobEnrichmentProgress {
                        inner: progress,
                        vendor,
                    })
                    .await?;
                report.enrichment_ran = true;
            } else {
                warn!("no generation client configured, skipping enrichment");
            }
        }

        advance(phase, JobPhase::Done, vendor, progress);
        Ok(())
    }

    /// Stream → transform → batched upsert, sequentially.
    async fn ingest(
        &self,
        stream: &mut CsvRowStream,
        storage: &Storage,
        report: &mut ImportReport,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let transformer = RowTransformer::new(report.run_id.clone());
        let mut upserter = BatchUpserter::new(
            storage,
            self.config.import.batch_size,
            self.config.retry.clone(),
        );
        let mut written = 0usize;

        while let Some((line, row)) = stream.next_row().await? {
            match row.and_then(|row| transformer.transform(&row, line)) {
                Ok(product) => {
                    if let Some(size) = upserter.push(product).await? {
                        written += size;
                        progress.batch_committed(&report.vendor, size, written);
                    }
                }
                Err(cause) => report.record_skip(line, cause),
            }
        }

        let pending = upserter.pending();
        let summary = upserter.finish().await?;
        if pending > 0 {
            progress.batch_committed(&report.vendor, pending, summary.documents_written);
        }

        report.rows_read = stream.rows_read();
        report.upsert_batches = summary.batches;
        report.documents_written = summary.documents_written;
        Ok(())
    }
}

fn advance(phase: &mut JobPhase, next: JobPhase, vendor: &str, progress: &dyn ProgressReporter) {
    debug_assert!(phase.can_advance_to(next), "{phase} -> {next}");
    info!(vendor, from = %phase, to = %next, "phase transition");
    *phase = next;
    progress.phase(vendor, next);
}

/// Run only the enrichment pass against the configured store.
#[instrument(skip_all)]
pub async fn enrich_store(
    config: &AppConfig,
    generator: GeneratorClient,
    progress: &dyn EnrichmentProgress,
) -> Result<EnrichmentReport> {
    let storage = Storage::open(&PathBuf::from(&config.storage.database_path)).await?;
    let result = EnrichmentScanner::new(
        &storage,
        generator,
        config.enrichment.window,
        config.retry.clone(),
    )
    .run(progress)
    .await;
    storage.close();
    result
}
