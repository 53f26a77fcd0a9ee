//! Error types for extraction, task files, batch runs and the progress store.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for a single extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Archive file not found at the specified path.
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    /// No registered strategy handles the archive's extension chain.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The container could not be opened or its index could not be read.
    #[error("Cannot open archive {path}: {reason}")]
    ArchiveOpen {
        /// Path of the archive
        path: PathBuf,
        /// Codec-level description of the failure
        reason: String,
    },

    /// The output tree could not be prepared.
    #[error("Cannot write {path}: {source}")]
    IoWrite {
        /// Destination that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Progress could not be recorded in the shared store.
    #[error("Progress store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error occurred outside of a destination write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ExtractError::ArchiveOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while parsing a `.task` file.
///
/// Line numbers are 1-based.
#[derive(Debug, Error)]
pub enum TaskFileError {
    /// The task list does not carry the task-file extension.
    #[error("Task list must be a \"*.{expected}\" file: {path}")]
    Extension {
        /// Offending path
        path: PathBuf,
        /// Required extension
        expected: &'static str,
    },

    /// The task list could not be read.
    #[error("Cannot read task list {path}: {source}")]
    Read {
        /// Task list path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A line does not match `INPUT` or `INPUT|OUTPUT`.
    #[error("Line {line}: malformed task, expected INPUT or INPUT|OUTPUT: {content:?}")]
    Format {
        /// 1-based line number
        line: usize,
        /// The raw line
        content: String,
    },

    /// A path on the line violates the absoluteness or existence rules.
    #[error("Line {line}: {reason}: {path}")]
    PathValidation {
        /// 1-based line number
        line: usize,
        /// Offending path
        path: PathBuf,
        /// Which rule was violated
        reason: PathRule,
    },
}

impl TaskFileError {
    /// Line the error refers to, when it refers to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            TaskFileError::Format { line, .. } | TaskFileError::PathValidation { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }
}

/// Path rule violated by a task line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathRule {
    /// Path must be absolute.
    #[error("path must be absolute")]
    NotAbsolute,

    /// Input does not exist.
    #[error("input does not exist")]
    Missing,
}

/// Errors from the shared progress store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The serialized state does not fit the segment.
    #[error("Progress state needs {needed} bytes but the segment holds {capacity}")]
    CapacityExceeded {
        /// Serialized size
        needed: usize,
        /// Segment capacity
        capacity: usize,
    },

    /// No segment with that name exists.
    #[error("No progress segment named {0}")]
    Missing(String),

    /// Segment names must be plain file names.
    #[error("Invalid segment name: {0:?}")]
    InvalidName(String),

    /// A task was registered twice.
    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    /// A task was updated before being registered.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The cross-process lock could not be taken.
    #[error("Cannot lock progress segment: {0}")]
    Lock(String),

    /// Payload could not be (de)serialized.
    #[error("Corrupt progress payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Segment file I/O failed.
    #[error("Segment IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a whole batch before or while dispatching.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The task file was invalid; nothing was started.
    #[error(transparent)]
    TaskFile(#[from] TaskFileError),

    /// The task file parsed to zero tasks.
    #[error("No tasks found in {0}")]
    Empty(PathBuf),

    /// The shared store could not be prepared.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker program could not be located.
    #[error("Cannot locate worker executable: {0}")]
    Launcher(#[source] std::io::Error),
}

/// Why a batch task produced no extraction result.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be started.
    #[error("Cannot start worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker process exited unsuccessfully.
    #[error("Worker exited with {}: {stderr}", exit_label(*.code))]
    Exited {
        /// Exit code, absent when killed by a signal
        code: Option<i32>,
        /// Last lines the worker wrote to stderr
        stderr: String,
    },

    /// The worker finished but its report could not be read.
    #[error("Unreadable worker report: {0}")]
    Report(String),

    /// The extraction itself failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The worker task panicked or was cancelled.
    #[error("Worker task aborted: {0}")]
    Aborted(String),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
