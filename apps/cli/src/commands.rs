//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use catalogsync_core::{
    EnrichmentProgress, EnrichmentReport, ImportOrchestrator, ImportReport, JobOutcome, JobQueue,
    Producer, ProgressReporter, SilentProgress, WorkerPool, enrich_store,
};
use catalogsync_generator::GeneratorClient;
use catalogsync_shared::{AppConfig, JobPhase, VendorJob, init_config, load_config, load_config_from};
use catalogsync_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CatalogSync: import vendor product catalogs and backfill descriptions.
#[derive(Parser)]
#[command(
    name = "catalogsync",
    version,
    about = "Import vendor CSV product catalogs into a document store and enrich missing descriptions.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.catalogsync/catalogsync.toml).
    #[arg(long, global = true, env = "CATALOGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one vendor import job now.
    Import {
        /// Vendor name; the CSV is fetched from `{vendors.base_url}/{vendor}`.
        #[arg(long)]
        vendor: String,

        /// Skip the description enrichment pass.
        #[arg(long)]
        no_enrich: bool,
    },

    /// Backfill missing descriptions across the whole store.
    Enrich,

    /// Enqueue one job per configured vendor every interval and run them.
    Schedule {
        /// Run a single round and exit.
        #[arg(long)]
        once: bool,
    },

    /// List stored products.
    Products {
        /// Maximum number of products to show.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List recent import runs.
    Runs {
        /// Maximum number of runs to show.
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "catalogsync=info",
        1 => "catalogsync=debug",
        _ => "catalogsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Import { vendor, no_enrich } => cmd_import(config_path, &vendor, no_enrich).await,
        Command::Enrich => cmd_enrich(config_path).await,
        Command::Schedule { once } => cmd_schedule(config_path, once).await,
        Command::Products { limit } => cmd_products(config_path, limit).await,
        Command::Runs { limit } => cmd_runs(config_path, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Build the generation client when enrichment should run.
fn generator_for(config: &AppConfig, no_enrich: bool) -> Result<Option<GeneratorClient>> {
    if no_enrich || !config.enrichment.enabled {
        return Ok(None);
    }
    let client = GeneratorClient::from_config(&config.generator, config.retry.clone())
        .wrap_err("enrichment is enabled; pass --no-enrich to import without it")?;
    Ok(Some(client))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(config_path: Option<&Path>, vendor: &str, no_enrich: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let generator = generator_for(&config, no_enrich)?;
    let orchestrator = ImportOrchestrator::new(config, generator)?;

    let reporter = CliProgress::new();
    let result = orchestrator.run(&VendorJob::new(vendor), &reporter).await;
    reporter.spinner.finish_and_clear();

    let report = result?;
    print_import_report(&report);
    Ok(())
}

async fn cmd_enrich(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let generator = GeneratorClient::from_config(&config.generator, config.retry.clone())?;

    let reporter = CliProgress::new();
    reporter.spinner.set_message("Scanning for missing descriptions");
    let result = enrich_store(&config, generator, &reporter).await;
    reporter.spinner.finish_and_clear();

    let report = result?;
    println!();
    println!("  Enrichment complete.");
    print_enrichment_report(&report);
    println!();
    Ok(())
}

async fn cmd_schedule(config_path: Option<&Path>, once: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    if config.vendors.names.is_empty() {
        return Err(eyre!("no vendors configured under [vendors].names"));
    }
    let generator = generator_for(&config, false)?;
    let scheduler = config.scheduler.clone();
    let vendors = config.vendors.names.clone();

    let orchestrator = Arc::new(ImportOrchestrator::new(config, generator)?);
    let (queue, jobs) = JobQueue::bounded(scheduler.queue_capacity);
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<JobOutcome>();

    let pool = tokio::spawn(
        WorkerPool::new(orchestrator, scheduler.worker_concurrency).run(
            jobs,
            outcome_tx,
            Arc::new(SilentProgress),
        ),
    );
    let printer = tokio::spawn(async move {
        let mut failed = 0usize;
        while let Some(outcome) = outcome_rx.recv().await {
            match &outcome.result {
                Ok(report) => println!(
                    "  ok      {:<16} {} rows, {} written, {} skipped, {} enriched",
                    outcome.vendor,
                    report.rows_read,
                    report.documents_written,
                    report.rows_skipped,
                    report.enrichment.enriched
                ),
                Err(e) => {
                    failed += 1;
                    error!(vendor = %outcome.vendor, error = %e, "job failed");
                    println!("  FAILED  {:<16} {e}", outcome.vendor);
                }
            }
        }
        failed
    });

    let producer = Producer::new(queue, vendors, Duration::from_secs(scheduler.interval_secs));
    if once {
        producer.enqueue_round().await?;
        drop(producer);
    } else {
        info!(
            interval_secs = scheduler.interval_secs,
            workers = scheduler.worker_concurrency,
            "scheduler started, press Ctrl-C to stop"
        );
        tokio::select! {
            result = producer.run() => result?,
            _ = tokio::signal::ctrl_c() => info!("shutdown requested, finishing running jobs"),
        }
    }

    pool.await.wrap_err("worker pool panicked")?;
    let failed = printer.await.wrap_err("outcome printer panicked")?;
    if failed > 0 {
        return Err(eyre!("{failed} job(s) failed"));
    }
    Ok(())
}

async fn cmd_products(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(Path::new(&config.storage.database_path)).await?;
    let total = storage.count_products().await?;
    let missing = storage.count_missing_description().await?;
    let products = storage.list_products(limit).await?;
    storage.close();

    if products.is_empty() {
        println!("No products stored yet. Run `catalogsync import --vendor <name>` to import.");
        return Ok(());
    }

    println!();
    println!("  {:<36}  {:<32}  {:>10}  {:<5}  DESC", "DOC ID", "NAME", "PRICE", "AVAIL");
    for product in &products {
        let variant = product.data.variants.first();
        println!(
            "  {:<36}  {:<32}  {:>10}  {:<5}  {}",
            product.doc_id.to_string(),
            truncate(&product.data.name, 32),
            variant.map(|v| v.price.to_string()).unwrap_or_default(),
            if variant.is_some_and(|v| v.available) { "yes" } else { "no" },
            if product.description().is_some() { "yes" } else { "-" },
        );
    }
    println!();
    println!("  Showing {} of {total} products ({missing} missing a description).", products.len());
    println!();
    Ok(())
}

async fn cmd_runs(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(Path::new(&config.storage.database_path)).await?;
    let runs = storage.list_import_runs(limit).await?;
    storage.close();

    if runs.is_empty() {
        println!("No import runs recorded.");
        return Ok(());
    }

    println!();
    for run in &runs {
        println!(
            "  {}  {:<16}  {:<10}  started {}  finished {}",
            run.id,
            run.vendor,
            run.status,
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
        );
        if let Some(stats) = &run.stats_json {
            println!("      {stats}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_import_report(report: &ImportReport) {
    println!();
    println!("  Import complete for vendor '{}'.", report.vendor);
    println!("  Run:       {}", report.run_id);
    println!("  Rows:      {}", report.rows_read);
    println!("  Written:   {}", report.documents_written);
    println!("  Batches:   {:?}", report.upsert_batches);
    println!("  Skipped:   {}", report.rows_skipped);
    for skipped in report.skipped.iter().take(10) {
        println!("             row {}: {}", skipped.row, skipped.reason);
    }
    if report.rows_skipped > 10 {
        println!("             ... and {} more", report.rows_skipped - 10);
    }
    if report.enrichment_ran {
        print_enrichment_report(&report.enrichment);
    } else {
        println!("  Enrichment: skipped");
    }
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_enrichment_report(report: &EnrichmentReport) {
    println!("  Scanned:   {}", report.scanned);
    println!("  Enriched:  {}", report.enriched);
    println!("  Failed:    {}", report.failed);
    println!("  Windows:   {:?}", report.update_batches);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, vendor: &str, phase: JobPhase) {
        let message = match phase {
            JobPhase::Connecting => format!("[{vendor}] Opening storage"),
            JobPhase::Downloading => format!("[{vendor}] Downloading catalog"),
            JobPhase::Ingesting => format!("[{vendor}] Importing rows"),
            JobPhase::Enriching => format!("[{vendor}] Generating descriptions"),
            JobPhase::Done => format!("[{vendor}] Done"),
            JobPhase::Failed => format!("[{vendor}] Failed"),
        };
        self.spinner.set_message(message);
    }

    fn batch_committed(&self, vendor: &str, size: usize, total_written: usize) {
        self.spinner.set_message(format!(
            "[{vendor}] Importing rows: committed batch of {size} ({total_written} written)"
        ));
    }

    fn enrichment_progress(&self, vendor: &str, scanned: usize, enriched: usize) {
        self.spinner.set_message(format!(
            "[{vendor}] Generating descriptions: {enriched}/{scanned}"
        ));
    }

    fn done(&self, _report: &ImportReport) {
        self.spinner.finish_and_clear();
    }
}

impl EnrichmentProgress for CliProgress {
    fn window_committed(&self, scanned: usize, enriched: usize) {
        self.spinner
            .set_message(format!("Generating descriptions: {enriched}/{scanned}"));
    }
}
