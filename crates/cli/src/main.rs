//! Command-line interface for archive extraction.
//!
//! Extracts single archives or whole batches described by a `.task` file,
//! drawing progress from the shared segment, and can watch the segment of a
//! run owned by another process.

mod render;

use clap::{Args, Parser, Subcommand};
use extractor::batch::{self, BatchOptions, WorkerRequest};
use extractor::progress::drain;
use extractor::store::DEFAULT_CAPACITY;
use extractor::{
    ExtractOptions, ExtractStats, ProcessLauncher, ProgressStore, ProgressTracker, StoreConfig,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hive")]
#[command(
    version,
    about = "Extract archives concurrently, one at a time or in batches",
    long_about = None
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one archive
    Extract {
        /// Archive to extract
        input: PathBuf,

        /// Output directory (defaults to the input without its archive suffix)
        output: Option<PathBuf>,

        /// Entry units running at once (defaults to logical CPUs x 10)
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Extract every archive listed in a .task file
    Batch {
        /// Task list, one `INPUT` or `INPUT|OUTPUT` per line
        task_file: PathBuf,

        /// Worker processes running at once (defaults to logical CPUs x 4)
        #[arg(short = 'P', long)]
        max_workers: Option<usize>,

        /// Entry units per worker
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Draw the progress of a run owned by another process
    Watch {
        /// Segment name of the run
        store_name: String,

        /// Redraw interval in milliseconds
        #[arg(long, default_value = "100")]
        refresh_ms: u64,
    },

    /// Run one batch task (spawned by `batch`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        task: String,

        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        store: String,

        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// Name of the progress segment (defaults to hive-progress-<pid>)
    #[arg(long)]
    store_name: Option<String>,

    /// Size of the progress segment in bytes
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    store_capacity: usize,

    /// Redraw interval in milliseconds
    #[arg(long, default_value = "100")]
    refresh_ms: u64,
}

impl StoreArgs {
    fn config(&self) -> StoreConfig {
        let default = StoreConfig::default();
        StoreConfig {
            name: self.store_name.clone().unwrap_or(default.name),
            capacity: self.store_capacity,
        }
    }

    fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(10))
    }
}

type CliResult = Result<bool, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing on stderr; stdout carries worker reports
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let result = match cli.command {
        Commands::Extract {
            input,
            output,
            concurrency,
            store,
        } => handle_extract(input, output, concurrency, store).await,
        Commands::Batch {
            task_file,
            max_workers,
            concurrency,
            store,
        } => handle_batch(task_file, max_workers, concurrency, store).await,
        Commands::Watch {
            store_name,
            refresh_ms,
        } => handle_watch(store_name, refresh_ms).await,
        Commands::Worker {
            task,
            input,
            output,
            store,
            concurrency,
        } => {
            let request = WorkerRequest {
                task,
                input,
                output,
                store,
            };
            handle_worker(request, concurrency).await
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Unlink the run's segment if the user interrupts it.
fn unlink_on_interrupt(name: &str) {
    let name = name.to_string();
    let installed = ctrlc::set_handler(move || {
        let _ = ProgressStore::remove(&name);
        process::exit(130);
    });
    if let Err(e) = installed {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }
}

async fn handle_extract(
    input: PathBuf,
    output: Option<PathBuf>,
    concurrency: Option<usize>,
    store: StoreArgs,
) -> CliResult {
    let tracker = ProgressTracker::start(&store.config())?;
    unlink_on_interrupt(tracker.store().name());
    let renderer = render::spawn(tracker.store().clone(), store.refresh());

    let options = ExtractOptions {
        concurrency,
        ..Default::default()
    };
    let result = extractor::extract(&input, output.as_deref(), &options, tracker.sink()).await;

    let renderer = renderer.stop().await;
    let records = tracker.stop()?;
    renderer.finish(&records);

    let stats = result?;
    print_stats(&stats);
    Ok(true)
}

async fn handle_batch(
    task_file: PathBuf,
    max_workers: Option<usize>,
    concurrency: Option<usize>,
    store: StoreArgs,
) -> CliResult {
    let tasks = batch::load(&task_file).await?;

    let mut options = BatchOptions {
        store: store.config(),
        ..Default::default()
    };
    if let Some(max_workers) = max_workers {
        options.max_workers = max_workers;
    }
    let launcher = Arc::new(ProcessLauncher::current_exe()?.with_concurrency(concurrency));

    let tracker = ProgressTracker::start(&options.store_config(tasks.len()))?;
    unlink_on_interrupt(tracker.store().name());
    let renderer = render::spawn(tracker.store().clone(), store.refresh());

    let report = batch::run(tasks, options.max_workers, launcher, &tracker).await;

    let renderer = renderer.stop().await;
    let records = tracker.stop()?;
    renderer.finish(&records);

    for outcome in &report.outcomes {
        let state = records.get(&outcome.task).map(|r| r.state);
        let glyph = state.map_or("❌", render::glyph);
        match &outcome.result {
            Ok(stats) => println!(
                "{glyph} {} -> {} ({} files, {} skipped, {} missing)",
                outcome.task,
                stats.output.display(),
                stats.files_extracted,
                stats.skipped,
                stats.failures.len()
            ),
            Err(e) => println!("{glyph} {} (line {}): {e}", outcome.task, outcome.line),
        }
    }
    println!(
        "{} of {} tasks complete in {:.2}s",
        report.completed(),
        report.outcomes.len(),
        report.duration.as_secs_f64()
    );

    Ok(!report.has_failures())
}

async fn handle_watch(store_name: String, refresh_ms: u64) -> CliResult {
    let store = ProgressStore::open(&store_name)?;
    let mut renderer = render::Renderer::new();
    let mut ticks = tokio::time::interval(Duration::from_millis(refresh_ms.max(10)));
    let mut records = store.snapshot()?;

    // The owner unlinks the segment when its run ends; the mapping stays readable.
    tracing::debug!(segment = %store_name, path = %store.path().display(), "watching segment");
    while store.path().is_file() {
        ticks.tick().await;
        if let Ok(latest) = store.snapshot() {
            records = latest;
            renderer.draw(&records);
        }
    }

    if let Ok(latest) = store.snapshot() {
        records = latest;
    }
    drain(&mut records);
    renderer.finish(&records);
    Ok(true)
}

async fn handle_worker(request: WorkerRequest, concurrency: Option<usize>) -> CliResult {
    let options = ExtractOptions {
        concurrency,
        ..Default::default()
    };
    let report = batch::run_worker(&request, &options).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(true)
}

fn print_stats(stats: &ExtractStats) {
    println!(
        "Extracted {} files and {} directories ({} bytes) into {} in {:.2}s",
        stats.files_extracted,
        stats.directories_created,
        stats.bytes_written,
        stats.output.display(),
        stats.duration.as_secs_f64()
    );
    if stats.skipped > 0 {
        println!("Skipped {} entries already present", stats.skipped);
    }
    for failure in &stats.failures {
        println!("  missing {}: {}", failure.entry, failure.message);
    }
}
