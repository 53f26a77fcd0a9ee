//! The extraction protocol shared by every format.
//!
//! 1. Resolve a strategy and open the archive, enumerating every entry.
//! 2. Register the task with its entry count, before any entry is processed.
//! 3. Create the output root.
//! 4. Fan the entries out over a bounded [`WorkerPool`].
//! 5. Per entry: existing destinations are skipped, directories are created,
//!    file bytes are decoded on the blocking pool and written. Every entry
//!    that ends up in the output tree advances the task by one.
//!
//! Entry failures never abort the archive. They are collected in
//! [`ExtractStats::failures`] and leave the task short of its total.

use crate::error::ExtractError;
use crate::pool::WorkerPool;
use crate::progress::ProgressSink;
use crate::registry::{registry, Resolution};
use crate::safety::entry_target;
use crate::strategy::ArchiveSource;
use crate::types::{
    ArchiveEntry, EntryFailure, EntryOutcome, ExtractOptions, ExtractStats, FailureKind,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// One archive bound to its destination and handler.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    /// Absolute path of the archive
    pub input: PathBuf,
    /// Absolute output root
    pub output: PathBuf,
    /// Handler chosen for the input
    pub resolution: Resolution,
    /// Key of the task in the progress store
    pub task_name: String,
}

impl ExtractionJob {
    /// Resolve the handler and destination for `input`.
    ///
    /// Without `output` the destination is the input path minus its archive
    /// suffix.
    pub fn new(input: &Path, output: Option<&Path>) -> Result<Self, ExtractError> {
        let input = std::path::absolute(input)?;
        if !input.is_file() {
            return Err(ExtractError::NotFound(input));
        }

        let resolution = registry().resolve_path(&input)?;
        let output = match output {
            Some(output) => std::path::absolute(output)?,
            None => resolution.default_output(&input),
        };

        Ok(Self {
            task_name: task_name_for(&input),
            input,
            output,
            resolution,
        })
    }

    /// Use `name` as the progress key instead of the archive file name.
    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }
}

/// Progress key for an archive: its file name.
pub fn task_name_for(input: &Path) -> String {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}

/// Extract `input` into `output`, reporting to `sink`.
///
/// On failure the task is marked failed in the sink before the error is
/// returned.
pub async fn extract(
    input: &Path,
    output: Option<&Path>,
    options: &ExtractOptions,
    sink: Arc<dyn ProgressSink>,
) -> Result<ExtractStats, ExtractError> {
    extract_as(&task_name_for(input), input, output, options, sink).await
}

/// Like [`extract`], tracking progress under `task` instead of the file name.
pub async fn extract_as(
    task: &str,
    input: &Path,
    output: Option<&Path>,
    options: &ExtractOptions,
    sink: Arc<dyn ProgressSink>,
) -> Result<ExtractStats, ExtractError> {
    match ExtractionJob::new(input, output) {
        Ok(job) => run_job(&job.with_task_name(task), options, sink).await,
        Err(e) => {
            error!(task = %task, error = %e, "extraction aborted");
            mark_failed(sink.as_ref(), task);
            Err(e)
        }
    }
}

/// Run a prepared job, marking the task failed if it aborts.
pub async fn run_job(
    job: &ExtractionJob,
    options: &ExtractOptions,
    sink: Arc<dyn ProgressSink>,
) -> Result<ExtractStats, ExtractError> {
    let result = extract_job(job, options, sink.clone()).await;
    if let Err(e) = &result {
        error!(task = %job.task_name, error = %e, "extraction aborted");
        mark_failed(sink.as_ref(), &job.task_name);
    }
    result
}

fn mark_failed(sink: &dyn ProgressSink, task: &str) {
    if let Err(e) = sink.fail(task) {
        warn!(task = %task, error = %e, "could not record task failure");
    }
}

async fn extract_job(
    job: &ExtractionJob,
    options: &ExtractOptions,
    sink: Arc<dyn ProgressSink>,
) -> Result<ExtractStats, ExtractError> {
    let start_time = Instant::now();
    let strategy = job.resolution.strategy;

    info!(
        archive = %job.input.display(),
        output = %job.output.display(),
        format = strategy.name(),
        "extracting"
    );

    let input = job.input.clone();
    let source: Arc<dyn ArchiveSource> =
        tokio::task::spawn_blocking(move || strategy.open(&input))
            .await
            .map_err(|e| ExtractError::open(&job.input, e))??
            .into();

    let total = source.entries().len() as u64;
    sink.add_task(&job.task_name, total)?;

    fs::create_dir_all(&job.output)
        .await
        .map_err(|source| ExtractError::IoWrite {
            path: job.output.clone(),
            source,
        })?;

    let mut pool = WorkerPool::new(options.pool_size());
    debug!(task = %job.task_name, entries = total, pool = pool.limit(), "dispatching entries");

    let root: Arc<Path> = Arc::from(job.output.as_path());
    let task: Arc<str> = Arc::from(job.task_name.as_str());

    for entry in source.entries().iter().cloned() {
        let source = source.clone();
        let sink = sink.clone();
        let root = root.clone();
        let task = task.clone();

        pool.submit(async move {
            let outcome = extract_entry(source, entry, &root).await;
            if outcome.advances() {
                if let Err(e) = sink.update(&task, 1) {
                    warn!(task = %task, error = %e, "could not record progress");
                }
            }
            outcome
        })
        .await
        .map_err(std::io::Error::other)?;
    }

    let mut stats = ExtractStats {
        output: job.output.clone(),
        entries_total: total,
        ..Default::default()
    };
    for result in pool.join().await {
        match result {
            Ok(outcome) => stats.record(outcome),
            Err(e) => stats.record(EntryOutcome::Failed(EntryFailure {
                entry: String::new(),
                kind: FailureKind::Write,
                message: format!("entry worker panicked: {e}"),
            })),
        }
    }
    stats.duration = start_time.elapsed();

    if stats.failures.is_empty() {
        info!(
            task = %job.task_name,
            written = stats.files_extracted,
            skipped = stats.skipped,
            bytes = stats.bytes_written,
            elapsed_ms = stats.duration.as_millis() as u64,
            "extraction finished"
        );
    } else {
        warn!(
            task = %job.task_name,
            failed = stats.failures.len(),
            total,
            "extraction finished with missing entries"
        );
    }

    Ok(stats)
}

/// Process one entry. Never fails; problems come back as `Failed`.
async fn extract_entry(
    source: Arc<dyn ArchiveSource>,
    entry: ArchiveEntry,
    root: &Path,
) -> EntryOutcome {
    let failed = |kind, message: String| {
        warn!(entry = %entry.name, ?kind, %message, "entry not extracted");
        EntryOutcome::Failed(EntryFailure {
            entry: entry.name.clone(),
            kind,
            message,
        })
    };

    let target = match entry_target(root, &entry.name) {
        Ok(target) => target,
        Err(e) => return failed(FailureKind::UnsafePath, e.to_string()),
    };

    // `./` and friends name the output root, which already exists.
    if target == root {
        return EntryOutcome::Skipped;
    }

    if fs::try_exists(&target).await.unwrap_or(false) {
        return EntryOutcome::Skipped;
    }

    if entry.is_directory {
        return match fs::create_dir_all(&target).await {
            Ok(()) => EntryOutcome::Directory,
            Err(e) => failed(FailureKind::Write, e.to_string()),
        };
    }

    let reading = entry.clone();
    let data = match tokio::task::spawn_blocking(move || source.read(&reading)).await {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => return failed(FailureKind::Read, e.to_string()),
        Err(e) => return failed(FailureKind::Read, e.to_string()),
    };

    match write_atomically(&target, &data, entry.index).await {
        Ok(()) => EntryOutcome::Written {
            bytes: data.len() as u64,
        },
        Err(e) => failed(FailureKind::Write, e.to_string()),
    }
}

/// Write through a sibling part file so an interrupted run never leaves a
/// truncated file that a rerun would skip.
async fn write_atomically(target: &Path, data: &[u8], index: usize) -> std::io::Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let part = parent.join(format!(".{file_name}.{index}.part"));

    if let Err(e) = fs::write(&part, data).await {
        let _ = fs::remove_file(&part).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&part, target).await {
        let _ = fs::remove_file(&part).await;
        return Err(e);
    }
    Ok(())
}
