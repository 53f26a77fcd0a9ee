//! Process-level batch orchestration.
//!
//! Every task of a batch runs in its own worker, at most `max_workers` at a
//! time. Workers attach to the run's progress segment by name and report into
//! it directly; the orchestrator awaits each of them and folds the results
//! into a [`BatchReport`]. A failing task never cancels its siblings.
//!
//! How a worker is started is behind [`WorkerLauncher`]: [`ProcessLauncher`]
//! spawns one OS process per task, [`InProcessLauncher`] runs the same worker
//! routine on the current runtime.

use crate::error::{BatchError, ExtractError, WorkerError};
use crate::extract::{extract_as, task_name_for};
use crate::pool::WorkerPool;
use crate::progress::{ProgressSink, ProgressTracker};
use crate::store::{ProgressStore, StoreConfig};
use crate::task_file::{self, BatchTask};
use crate::types::{logical_cpus, ExtractOptions, ExtractStats};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Subcommand of the `hive` binary that runs a single task.
pub const WORKER_COMMAND: &str = "worker";

/// Segment bytes reserved per task of a batch.
pub const STORE_BYTES_PER_TASK: usize = 256;

/// Settings for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Workers running at once
    pub max_workers: usize,
    /// Segment the workers report into
    pub store: StoreConfig,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: logical_cpus() * 4,
            store: StoreConfig::default(),
        }
    }
}

impl BatchOptions {
    /// Segment configuration large enough for `tasks` tasks.
    pub fn store_config(&self, tasks: usize) -> StoreConfig {
        let config = self
            .store
            .clone()
            .with_min_capacity(tasks.saturating_mul(STORE_BYTES_PER_TASK));
        if config.capacity > self.store.capacity {
            info!(
                tasks,
                capacity = config.capacity,
                "raised progress segment capacity for batch"
            );
        }
        config
    }
}

/// Everything a worker needs to run one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    /// Progress key of the task
    pub task: String,
    /// Archive to extract
    pub input: PathBuf,
    /// Explicit destination
    pub output: Option<PathBuf>,
    /// Name of the progress segment
    pub store: String,
}

impl WorkerRequest {
    /// Arguments for the `worker` subcommand.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--task".into(),
            self.task.clone().into(),
            "--input".into(),
            self.input.clone().into(),
            "--store".into(),
            self.store.clone().into(),
        ];
        if let Some(output) = &self.output {
            args.push("--output".into());
            args.push(output.clone().into());
        }
        args
    }
}

/// Result line a worker process prints on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Progress key of the task
    pub task: String,
    /// What the extraction did
    pub stats: ExtractStats,
}

/// Run one task inside the current process, reporting into the named segment.
pub async fn run_worker(
    request: &WorkerRequest,
    options: &ExtractOptions,
) -> Result<WorkerReport, ExtractError> {
    let store: Arc<dyn ProgressSink> = Arc::new(ProgressStore::open(&request.store)?);
    let stats = extract_as(
        &request.task,
        &request.input,
        request.output.as_deref(),
        options,
        store,
    )
    .await?;

    Ok(WorkerReport {
        task: request.task.clone(),
        stats,
    })
}

/// Starts the worker for one task and waits for its result.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Run `request` to completion.
    fn launch(
        &self,
        request: WorkerRequest,
    ) -> impl Future<Output = Result<ExtractStats, WorkerError>> + Send;
}

/// Runs every task as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    concurrency: Option<usize>,
}

impl ProcessLauncher {
    /// Launch `program` with `args` followed by the request arguments.
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            concurrency: None,
        }
    }

    /// Launch the running executable's `worker` subcommand.
    pub fn current_exe() -> Result<Self, BatchError> {
        let program = std::env::current_exe().map_err(BatchError::Launcher)?;
        Ok(Self::new(program, [WORKER_COMMAND]))
    }

    /// Entry pool size passed to every worker.
    pub fn with_concurrency(mut self, concurrency: Option<usize>) -> Self {
        self.concurrency = concurrency;
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, request: WorkerRequest) -> Result<ExtractStats, WorkerError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(request.to_args());
        if let Some(concurrency) = self.concurrency {
            command.arg("--concurrency").arg(concurrency.to_string());
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(task = %request.task, program = %self.program.display(), "spawning worker");
        let output = command.output().await.map_err(WorkerError::Spawn)?;

        if !output.status.success() {
            return Err(WorkerError::Exited {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let report = parse_report(&output.stdout)?;
        if report.task != request.task {
            return Err(WorkerError::Report(format!(
                "expected task {:?}, worker reported {:?}",
                request.task, report.task
            )));
        }
        Ok(report.stats)
    }
}

/// Runs every task on the current runtime.
#[derive(Debug, Clone, Default)]
pub struct InProcessLauncher {
    options: ExtractOptions,
}

impl InProcessLauncher {
    /// Launcher extracting with `options`.
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, request: WorkerRequest) -> Result<ExtractStats, WorkerError> {
        let report = run_worker(&request, &self.options).await?;
        Ok(report.stats)
    }
}

fn parse_report(stdout: &[u8]) -> Result<WorkerReport, WorkerError> {
    let stdout = String::from_utf8_lossy(stdout);
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| WorkerError::Report("worker printed nothing".to_string()))?;
    serde_json::from_str(line).map_err(|e| WorkerError::Report(e.to_string()))
}

/// Last non-empty stderr line, which is where a worker prints its error.
fn stderr_tail(stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output");
    line.strip_prefix("Error: ").unwrap_or(line).to_string()
}

/// How one task of a batch ended.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Progress key of the task
    pub task: String,
    /// Task file line the task came from
    pub line: usize,
    /// Archive of the task
    pub input: PathBuf,
    /// Stats from the worker, or why there are none
    pub result: Result<ExtractStats, WorkerError>,
}

impl TaskOutcome {
    /// True when the task extracted every entry.
    pub fn is_complete(&self) -> bool {
        matches!(&self.result, Ok(stats) if stats.is_complete())
    }
}

/// Aggregated results of a batch, in task file order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One outcome per task
    pub outcomes: Vec<TaskOutcome>,
    /// Wall-clock time of the run
    pub duration: Duration,
}

impl BatchReport {
    /// Tasks whose worker failed.
    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    /// True when at least one task failed.
    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Tasks that extracted every entry.
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_complete()).count()
    }
}

/// Parse a task file for a batch. An empty list is an error.
pub async fn load(path: &Path) -> Result<Vec<BatchTask>, BatchError> {
    let tasks = task_file::parse(path).await?;
    if tasks.is_empty() {
        return Err(BatchError::Empty(path.to_path_buf()));
    }
    Ok(tasks)
}

/// Progress keys for `tasks`: the archive file name, with ` (2)`, ` (3)`...
/// appended to repeats.
pub fn unique_task_names(tasks: &[BatchTask]) -> Vec<String> {
    let mut taken = HashSet::new();
    tasks
        .iter()
        .map(|task| {
            let base = task_name_for(&task.input);
            let mut name = base.clone();
            let mut n = 1;
            while !taken.insert(name.clone()) {
                n += 1;
                name = format!("{base} ({n})");
            }
            name
        })
        .collect()
}

/// Run every task with at most `max_workers` workers at once.
///
/// Returns after every worker has finished. Tasks whose worker fails are
/// marked failed in the tracker's segment, whatever the worker managed to
/// record itself.
pub async fn run<L: WorkerLauncher>(
    tasks: Vec<BatchTask>,
    max_workers: usize,
    launcher: Arc<L>,
    tracker: &ProgressTracker,
) -> BatchReport {
    let start_time = Instant::now();
    let store = tracker.store().name().to_string();
    let names = unique_task_names(&tasks);
    let mut pool = WorkerPool::new(max_workers);
    let mut outcomes = Vec::with_capacity(tasks.len());

    info!(tasks = tasks.len(), workers = pool.limit(), segment = %store, "starting batch");

    for (task, name) in tasks.into_iter().zip(names) {
        let request = WorkerRequest {
            task: name.clone(),
            input: task.input.clone(),
            output: task.output.clone(),
            store: store.clone(),
        };
        let launcher = launcher.clone();
        let sink = tracker.sink();
        let (line, input) = (task.line, task.input.clone());

        let submitted = pool
            .submit(async move {
                let task_name = request.task.clone();
                let launched = tokio::spawn(async move { launcher.launch(request).await });
                let result = match launched.await {
                    Ok(result) => result,
                    Err(e) => Err(WorkerError::Aborted(e.to_string())),
                };
                if let Err(e) = &result {
                    warn!(task = %task_name, error = %e, "task failed");
                    if let Err(e) = sink.fail(&task_name) {
                        warn!(task = %task_name, error = %e, "could not record task failure");
                    }
                }
                TaskOutcome {
                    task: task_name,
                    line: task.line,
                    input: task.input,
                    result,
                }
            })
            .await;

        if let Err(e) = submitted {
            error!(task = %name, error = %e, "could not schedule task");
            outcomes.push(TaskOutcome {
                task: name,
                line,
                input,
                result: Err(WorkerError::Aborted(e.to_string())),
            });
        }
    }

    for result in pool.join().await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(error = %e, "batch unit panicked"),
        }
    }
    outcomes.sort_by_key(|outcome| outcome.line);

    let report = BatchReport {
        outcomes,
        duration: start_time.elapsed(),
    };
    info!(
        completed = report.completed(),
        failed = report.failed().count(),
        elapsed_ms = report.duration.as_millis() as u64,
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TaskState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(line: usize, input: &str) -> BatchTask {
        BatchTask {
            line,
            input: PathBuf::from(input),
            output: None,
        }
    }

    fn tracker(tag: &str) -> ProgressTracker {
        ProgressTracker::start(&StoreConfig {
            name: format!("hive-test-{}-batch-{tag}", std::process::id()),
            capacity: 4096,
        })
        .unwrap()
    }

    /// Fails or panics depending on the archive name, counting workers in flight.
    #[derive(Default)]
    struct ScriptedLauncher {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl WorkerLauncher for ScriptedLauncher {
        async fn launch(&self, request: WorkerRequest) -> Result<ExtractStats, WorkerError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let name = request.input.to_string_lossy().into_owned();
            if name.contains("panic") {
                panic!("worker crashed");
            }
            if name.contains("broken") {
                return Err(WorkerError::Exited {
                    code: Some(1),
                    stderr: "corrupt archive".to_string(),
                });
            }
            Ok(ExtractStats::default())
        }
    }

    #[test]
    fn test_unique_task_names() {
        let tasks = [
            task(1, "/a/data.zip"),
            task(2, "/b/data.zip"),
            task(3, "/c/other.zip"),
            task(4, "/d/data.zip"),
        ];
        assert_eq!(
            unique_task_names(&tasks),
            ["data.zip", "data.zip (2)", "other.zip", "data.zip (3)"]
        );
    }

    #[test]
    fn test_unique_names_skip_literal_collisions() {
        let tasks = [
            task(1, "/a/x.zip"),
            task(2, "/b/x.zip (2)"),
            task(3, "/c/x.zip"),
        ];
        assert_eq!(unique_task_names(&tasks), ["x.zip", "x.zip (2)", "x.zip (3)"]);
    }

    #[test]
    fn test_worker_args() {
        let request = WorkerRequest {
            task: "a.zip".to_string(),
            input: PathBuf::from("/in/a.zip"),
            output: Some(PathBuf::from("/out")),
            store: "seg".to_string(),
        };
        let args: Vec<String> = request
            .to_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["--task", "a.zip", "--input", "/in/a.zip", "--store", "seg", "--output", "/out"]
        );
    }

    #[test]
    fn test_parse_report_uses_last_line() {
        let report = WorkerReport {
            task: "a.zip".to_string(),
            stats: ExtractStats {
                entries_total: 3,
                files_extracted: 2,
                directories_created: 1,
                ..Default::default()
            },
        };
        let stdout = format!("noise\n{}\n\n", serde_json::to_string(&report).unwrap());

        let parsed = parse_report(stdout.as_bytes()).unwrap();
        assert_eq!(parsed.task, "a.zip");
        assert!(parsed.stats.is_complete());

        assert!(matches!(parse_report(b""), Err(WorkerError::Report(_))));
        assert!(matches!(parse_report(b"{oops"), Err(WorkerError::Report(_))));
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail(b"INFO starting\nError: bad zip\n"), "bad zip");
        assert_eq!(stderr_tail(b""), "no output");
    }

    #[test]
    fn test_store_config_scales_with_tasks() {
        let options = BatchOptions::default();
        assert_eq!(options.store_config(1).capacity, options.store.capacity);
        assert_eq!(options.store_config(100).capacity, 100 * STORE_BYTES_PER_TASK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_do_not_stop_siblings() {
        let tracker = tracker("siblings");
        let launcher = Arc::new(ScriptedLauncher::default());
        let tasks = vec![
            task(1, "/in/one.zip"),
            task(2, "/in/broken.zip"),
            task(3, "/in/panic.zip"),
            task(4, "/in/four.zip"),
            task(5, "/in/five.zip"),
        ];

        let report = run(tasks, 2, launcher.clone(), &tracker).await;

        assert!(launcher.peak.load(Ordering::SeqCst) <= 2);
        let lines: Vec<usize> = report.outcomes.iter().map(|o| o.line).collect();
        assert_eq!(lines, [1, 2, 3, 4, 5]);
        assert!(report.has_failures());
        assert_eq!(report.failed().count(), 2);
        assert_eq!(report.completed(), 3);
        assert!(matches!(report.outcomes[2].result, Err(WorkerError::Aborted(_))));

        let records = tracker.stop().unwrap();
        assert_eq!(records["broken.zip"].state, TaskState::Failed);
        assert_eq!(records["panic.zip"].state, TaskState::Failed);
        assert!(!records.contains_key("one.zip"));
    }

    #[tokio::test]
    async fn test_load_rejects_empty_task_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let list = temp_dir.path().join("empty.task");
        std::fs::write(&list, "\n\n").unwrap();

        let result = load(&list).await;
        assert!(matches!(result, Err(BatchError::Empty(_))));
    }
}
