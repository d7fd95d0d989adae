//! Import pipeline orchestration for CatalogSync.
//!
//! This crate ties the CSV streamer, row transformer, batch upserter and
//! enrichment scanner into vendor import jobs, and runs those jobs from a
//! bounded queue.

pub mod enrichment;
pub mod pipeline;
pub mod queue;
pub mod upserter;

#[cfg(test)]
mod testing;

pub use enrichment::{EnrichmentProgress, EnrichmentReport, EnrichmentScanner, NoEnrichmentProgress};
pub use pipeline::{
    ImportOrchestrator, ImportReport, ProgressReporter, SilentProgress, SkippedRow, enrich_store,
};
pub use queue::{JobOutcome, JobQueue, Producer, WorkerPool};
pub use upserter::{BatchUpserter, UpsertSummary};
