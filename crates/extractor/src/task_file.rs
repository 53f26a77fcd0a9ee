//! Parser for `.task` batch descriptors.
//!
//! One task per line, either `INPUT` or `INPUT|OUTPUT`, whitespace around each
//! field trimmed:
//!
//! ```text
//! /srv/drop/photos.zip
//! ./relative/logs.tar.gz | /srv/unpacked/logs
//! ```
//!
//! A lone `INPUT` must be absolute and exist. With an `OUTPUT`, the input
//! only has to exist (relative paths are taken from the working directory)
//! and the output must be absolute. Trailing blank lines are ignored; any
//! other blank line is an error. Parsing stops at the first bad line.

use crate::error::{PathRule, TaskFileError};
use std::path::{Path, PathBuf};

/// Extension a task list must carry.
pub const TASK_FILE_EXTENSION: &str = "task";

/// One validated line of a task file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTask {
    /// 1-based line the task came from
    pub line: usize,
    /// Archive to extract, absolute
    pub input: PathBuf,
    /// Explicit destination, absolute
    pub output: Option<PathBuf>,
}

/// Read and validate the task list at `path`.
pub async fn parse(path: &Path) -> Result<Vec<BatchTask>, TaskFileError> {
    if path.extension().and_then(|e| e.to_str()) != Some(TASK_FILE_EXTENSION) {
        return Err(TaskFileError::Extension {
            path: path.to_path_buf(),
            expected: TASK_FILE_EXTENSION,
        });
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TaskFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    parse_str(&content)
}

/// Validate task list content. Existence checks hit the filesystem.
pub fn parse_str(content: &str) -> Result<Vec<BatchTask>, TaskFileError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let lines: Vec<&str> = content.lines().collect();
    let last_used = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |i| i + 1);

    lines[..last_used]
        .iter()
        .enumerate()
        .map(|(i, raw)| parse_line(i + 1, raw))
        .collect()
}

fn parse_line(line: usize, raw: &str) -> Result<BatchTask, TaskFileError> {
    let fields: Vec<&str> = raw.split('|').map(str::trim).collect();

    match fields.as_slice() {
        [input] if !input.is_empty() => {
            let input = PathBuf::from(input);
            if !input.is_absolute() {
                return Err(path_error(line, input, PathRule::NotAbsolute));
            }
            if !input.exists() {
                return Err(path_error(line, input, PathRule::Missing));
            }
            Ok(BatchTask {
                line,
                input,
                output: None,
            })
        }
        [input, output] if !input.is_empty() => {
            let input = PathBuf::from(input);
            if !input.exists() {
                return Err(path_error(line, input, PathRule::Missing));
            }
            let output = PathBuf::from(output);
            if !output.is_absolute() {
                return Err(path_error(line, output, PathRule::NotAbsolute));
            }
            let input = std::path::absolute(&input).map_err(|_| {
                path_error(line, input.clone(), PathRule::Missing)
            })?;
            Ok(BatchTask {
                line,
                input,
                output: Some(output),
            })
        }
        _ => Err(TaskFileError::Format {
            line,
            content: raw.to_string(),
        }),
    }
}

fn path_error(line: usize, path: PathBuf, reason: PathRule) -> TaskFileError {
    TaskFileError::PathValidation { line, path, reason }
}
