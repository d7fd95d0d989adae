//! In-process job system: a bounded queue of vendor jobs, a worker pool that
//! runs a fixed maximum of jobs at once, and a periodic producer.
//!
//! Queue-level retry is left to whatever external broker replaces this
//! queue; a failed job is reported once through its [`JobOutcome`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tracing::{info, instrument, warn};

use catalogsync_shared::{CatalogSyncError, Result, VendorJob};

use crate::pipeline::{ImportOrchestrator, ImportReport, ProgressReporter};

/// Terminal report of one job.
#[derive(Debug)]
pub struct JobOutcome {
    pub vendor: String,
    pub result: Result<ImportReport>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// Sending side of the bounded job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<VendorJob>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<VendorJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a job, waiting while the queue is full.
    pub async fn submit(&self, job: VendorJob) -> Result<()> {
        let vendor = job.vendor_name.clone();
        self.tx
            .send(job)
            .await
            .map_err(|_| CatalogSyncError::Connection(format!("job queue closed, dropped job for '{vendor}'")))
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Pulls jobs off the queue and runs them through the orchestrator.
pub struct WorkerPool {
    orchestrator: Arc<ImportOrchestrator>,
    concurrency: usize,
}

impl WorkerPool {
    /// `concurrency` is clamped to `1..=u32::MAX`.
    pub fn new(orchestrator: Arc<ImportOrchestrator>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.clamp(1, u32::MAX as usize),
        }
    }

    fn slot_count(&self) -> u32 {
        u32::try_from(self.concurrency).unwrap_or(u32::MAX)
    }

    /// Consume jobs until every sender is dropped, then wait for in-flight
    /// jobs to finish. One outcome is sent per job.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run(
        self,
        mut jobs: mpsc::Receiver<VendorJob>,
        outcomes: mpsc::UnboundedSender<JobOutcome>,
        progress: Arc<dyn ProgressReporter>,
    ) {
        let slots = Arc::new(Semaphore::new(self.concurrency));

        while let Some(job) = jobs.recv().await {
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let orchestrator = Arc::clone(&self.orchestrator);
            let outcomes = outcomes.clone();
            let progress = Arc::clone(&progress);

            tokio::spawn(async move {
                let _permit = permit;
                let outcomes = outcomes;
                let result = orchestrator.run(&job, progress.as_ref()).await;
                let outcome = JobOutcome {
                    vendor: job.vendor_name,
                    result,
                };
                if outcomes.send(outcome).is_err() {
                    warn!("outcome receiver dropped");
                }
            });
        }

        // Every slot free again means every spawned job has finished.
        match slots.acquire_many(self.slot_count()).await {
            Ok(_all) => info!("worker pool drained"),
            Err(e) => warn!(error = %e, "worker pool semaphore closed before drain"),
        };
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Periodically enqueues one job per configured vendor.
pub struct Producer {
    queue: JobQueue,
    vendors: Vec<String>,
    interval: Duration,
}

impl Producer {
    pub fn new(queue: JobQueue, vendors: Vec<String>, interval: Duration) -> Self {
        Self {
            queue,
            vendors,
            interval,
        }
    }

    /// Enqueue one job per vendor. Returns the number of jobs submitted.
    pub async fn enqueue_round(&self) -> Result<usize> {
        for vendor in &self.vendors {
            self.queue.submit(VendorJob::new(vendor.clone())).await?;
        }
        info!(jobs = self.vendors.len(), "vendor jobs enqueued");
        Ok(self.vendors.len())
    }

    /// Enqueue a round immediately and then once per interval, until the
    /// queue closes. Dropping the returned future stops production and
    /// releases the queue's sender.
    pub async fn run(self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.enqueue_round().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::testing::{csv_body, csv_line, temp_path};
    use catalogsync_shared::{AppConfig, JobPhase, RetryPolicy};

    #[tokio::test]
    async fn producer_enqueues_one_job_per_vendor() {
        let (queue, mut rx) = JobQueue::bounded(8);
        let producer = Producer::new(
            queue,
            vec!["v1".into(), "v2".into()],
            Duration::from_secs(60),
        );
        assert_eq!(producer.enqueue_round().await.unwrap(), 2);
        drop(producer);

        let mut vendors = Vec::new();
        while let Some(job) = rx.recv().await {
            vendors.push(job.vendor_name);
        }
        assert_eq!(vendors, vec!["v1", "v2"]);
    }

    #[tokio::test]
    async fn submit_fails_once_consumer_is_gone() {
        let (queue, rx) = JobQueue::bounded(1);
        drop(rx);
        let err = queue.submit(VendorJob::new("v1")).await.unwrap_err();
        assert!(matches!(err, CatalogSyncError::Connection(_)));
    }

    #[tokio::test]
    async fn oversized_pool_drains_when_queue_closes() {
        let mut config = AppConfig::default();
        config.storage.database_path = temp_path("cs_pool", ".db").to_string_lossy().into_owned();
        config.import.staging_dir = temp_path("cs_stage", "").to_string_lossy().into_owned();
        config.enrichment.enabled = false;

        let orchestrator = Arc::new(ImportOrchestrator::new(config, None).unwrap());
        let pool = WorkerPool::new(orchestrator, usize::MAX);
        assert_eq!(pool.slot_count(), u32::MAX);

        let (queue, jobs) = JobQueue::bounded(1);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        drop(queue);

        tokio::time::timeout(
            Duration::from_secs(5),
            pool.run(jobs, outcome_tx, Arc::new(SilentProgress)),
        )
        .await
        .expect("pool drains");
        assert!(outcome_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pool_reports_each_job_independently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/good"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(csv_body(&[csv_line("a", "1.00"), csv_line("b", "2.00")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut config = AppConfig::default();
        config.storage.database_path = temp_path("cs_pool", ".db").to_string_lossy().into_owned();
        config.vendors.base_url = format!("{}/download", server.uri());
        config.vendors.names = vec!["good".into(), "bad".into()];
        config.import.staging_dir = temp_path("cs_stage", "").to_string_lossy().into_owned();
        config.enrichment.enabled = false;
        config.retry = RetryPolicy::none();

        let orchestrator = Arc::new(ImportOrchestrator::new(config.clone(), None).unwrap());
        let (queue, jobs) = JobQueue::bounded(4);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let pool = tokio::spawn(WorkerPool::new(orchestrator, 2).run(
            jobs,
            outcome_tx,
            Arc::new(SilentProgress),
        ));

        Producer::new(queue, config.vendors.names.clone(), Duration::from_secs(60))
            .enqueue_round()
            .await
            .unwrap();
        pool.await.unwrap();

        let mut outcomes = Vec::new();
        while let Some(outcome) = outcome_rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| a.vendor.cmp(&b.vendor));
        assert_eq!(outcomes.len(), 2);

        assert_eq!(outcomes[0].vendor, "bad");
        let err = outcomes[0].result.as_ref().unwrap_err();
        assert_eq!(err.phase(), Some(JobPhase::Downloading));

        assert_eq!(outcomes[1].vendor, "good");
        assert!(outcomes[1].succeeded());
        let report = outcomes[1].result.as_ref().unwrap();
        assert_eq!(report.documents_written, 2);
    }
}
