//! Type definitions for archive extraction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Individual entry within an archive, as enumerated by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the entry within the archive
    pub name: String,

    /// Whether this entry is a directory
    pub is_directory: bool,

    /// Uncompressed size in bytes, as declared by the codec
    pub size: u64,

    /// Position in the enumeration; the owning source uses it to find the content
    pub index: usize,
}

/// Options for extracting an archive.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// In-flight entries per logical CPU
    pub concurrency_multiplier: usize,

    /// Fixed pool size, overriding the multiplier when set
    pub concurrency: Option<usize>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            concurrency_multiplier: 10,
            concurrency: None,
        }
    }
}

impl ExtractOptions {
    /// Number of entries allowed in flight at once. Never zero.
    pub fn pool_size(&self) -> usize {
        let size = match self.concurrency {
            Some(n) => n,
            None => logical_cpus() * self.concurrency_multiplier,
        };
        size.max(1)
    }
}

/// Logical CPU count, 1 when it cannot be determined.
pub fn logical_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Result of processing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// File content was written
    Written {
        /// Bytes written
        bytes: u64,
    },

    /// Directory was created
    Directory,

    /// Destination already existed and was left alone
    Skipped,

    /// Entry could not be extracted; the rest of the archive continues
    Failed(EntryFailure),
}

impl EntryOutcome {
    /// Whether this outcome counts towards the task's completed total.
    pub fn advances(&self) -> bool {
        !matches!(self, EntryOutcome::Failed(_))
    }
}

/// Why an entry was left out of the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    /// Entry name inside the archive
    pub entry: String,

    /// Stage that failed
    pub kind: FailureKind,

    /// Human readable reason
    pub message: String,
}

/// Stage at which an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The codec could not produce the entry's bytes
    Read,

    /// The destination could not be written
    Write,

    /// The entry name escapes the output root
    UnsafePath,
}

/// Statistics about a completed extraction operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Directory the entries were extracted into
    pub output: PathBuf,

    /// Entries enumerated in the archive
    pub entries_total: u64,

    /// Number of files written
    pub files_extracted: u64,

    /// Number of directories created
    pub directories_created: u64,

    /// Entries whose destination already existed
    pub skipped: u64,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Entries that could not be extracted
    pub failures: Vec<EntryFailure>,

    /// Duration of the extraction operation (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ExtractStats {
    /// Fold one entry outcome into the totals.
    pub fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Written { bytes } => {
                self.files_extracted += 1;
                self.bytes_written += bytes;
            }
            EntryOutcome::Directory => self.directories_created += 1,
            EntryOutcome::Skipped => self.skipped += 1,
            EntryOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    /// Entries that reached the output tree, whether written now or earlier.
    pub fn completed(&self) -> u64 {
        self.files_extracted + self.directories_created + self.skipped
    }

    /// True when every enumerated entry is present in the output tree.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.completed() == self.entries_total
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_override() {
        let options = ExtractOptions {
            concurrency: Some(3),
            ..Default::default()
        };
        assert_eq!(options.pool_size(), 3);

        let options = ExtractOptions {
            concurrency: Some(0),
            ..Default::default()
        };
        assert_eq!(options.pool_size(), 1);
    }

    #[test]
    fn test_pool_size_scales_with_cpus() {
        let options = ExtractOptions::default();
        assert_eq!(options.pool_size(), logical_cpus() * 10);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = ExtractStats {
            entries_total: 4,
            ..Default::default()
        };
        stats.record(EntryOutcome::Written { bytes: 10 });
        stats.record(EntryOutcome::Directory);
        stats.record(EntryOutcome::Skipped);
        assert_eq!(stats.completed(), 3);
        assert_eq!(stats.bytes_written, 10);
        assert!(!stats.is_complete());

        stats.record(EntryOutcome::Failed(EntryFailure {
            entry: "broken.bin".to_string(),
            kind: FailureKind::Read,
            message: "crc mismatch".to_string(),
        }));
        assert_eq!(stats.completed(), 3);
        assert_eq!(stats.failures.len(), 1);
        assert!(!stats.is_complete());
    }

    #[test]
    fn test_stats_serde_duration() {
        let stats = ExtractStats {
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        let back: ExtractStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}
