//! Per-task progress records and the sink extraction reports into.
//!
//! A [`TaskRecord`] follows a small state machine:
//! - `total` is fixed when the task is registered, before any entry completes;
//! - `completed` only grows and is clamped to `total`;
//! - reaching `total` moves a running task to `success`;
//! - `failed` is terminal and wins over everything else;
//! - `warning` is only assigned by [`drain`], for tasks left incomplete.

use crate::error::StoreError;
use crate::store::{ProgressStore, Records, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Entries are still being extracted
    #[default]
    Running,
    /// Every entry reached the output tree
    Success,
    /// The run ended with entries missing
    Warning,
    /// The task aborted
    Failed,
}

/// Progress of one task, as held in the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Entries in the archive
    pub total: u64,
    /// Entries done so far
    pub completed: u64,
    /// Current state
    pub state: TaskState,
}

impl TaskRecord {
    /// Freshly registered task. An empty archive is already complete.
    pub fn new(total: u64) -> Self {
        let state = if total == 0 {
            TaskState::Success
        } else {
            TaskState::Running
        };
        Self {
            total,
            completed: 0,
            state,
        }
    }

    /// Record `by` more completed entries.
    pub fn advance(&mut self, by: u64) {
        if self.state == TaskState::Failed {
            return;
        }
        self.completed = self.completed.saturating_add(by).min(self.total);
        if self.completed == self.total {
            self.state = TaskState::Success;
        }
    }

    /// Mark the task failed. Terminal.
    pub fn fail(&mut self) {
        self.state = TaskState::Failed;
    }

    /// State the task ends the run in.
    pub fn drained(mut self) -> Self {
        self.state = match self.state {
            TaskState::Failed => TaskState::Failed,
            _ if self.completed == self.total => TaskState::Success,
            _ => TaskState::Warning,
        };
        self
    }

    /// Fraction complete in `0.0..=1.0`.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Receiver of extraction progress.
///
/// Extraction calls `add_task` once with the entry count, then `update` for
/// every entry that reaches the output tree; callers use `fail` when a task
/// aborts.
pub trait ProgressSink: Send + Sync {
    /// Register a task and its total entry count.
    fn add_task(&self, name: &str, total: u64) -> Result<(), StoreError>;

    /// Advance a registered task.
    fn update(&self, name: &str, advance: u64) -> Result<(), StoreError>;

    /// Mark a task failed, registering it if needed.
    fn fail(&self, name: &str) -> Result<(), StoreError>;
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn add_task(&self, _name: &str, _total: u64) -> Result<(), StoreError> {
        Ok(())
    }

    fn update(&self, _name: &str, _advance: u64) -> Result<(), StoreError> {
        Ok(())
    }

    fn fail(&self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

impl ProgressSink for ProgressStore {
    fn add_task(&self, name: &str, total: u64) -> Result<(), StoreError> {
        self.update(|records| {
            if records.contains_key(name) {
                return Err(StoreError::DuplicateTask(name.to_string()));
            }
            records.insert(name.to_string(), TaskRecord::new(total));
            Ok(())
        })
    }

    fn update(&self, name: &str, advance: u64) -> Result<(), StoreError> {
        ProgressStore::update(self, |records| {
            let record = records
                .get_mut(name)
                .ok_or_else(|| StoreError::UnknownTask(name.to_string()))?;
            record.advance(advance);
            Ok(())
        })
    }

    fn fail(&self, name: &str) -> Result<(), StoreError> {
        self.update(|records| {
            records
                .entry(name.to_string())
                .or_insert_with(|| TaskRecord {
                    total: 0,
                    completed: 0,
                    state: TaskState::Failed,
                })
                .fail();
            Ok(())
        })
    }
}

/// Resolve every record to its end-of-run state.
pub fn drain(records: &mut Records) {
    for record in records.values_mut() {
        *record = record.drained();
    }
}

/// Owner of the progress segment for one run.
///
/// `start` creates the segment, `stop` runs the drain pass and destroys it.
pub struct ProgressTracker {
    store: Arc<ProgressStore>,
}

impl ProgressTracker {
    /// Create (or attach to) the run's segment.
    pub fn start(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = ProgressStore::create(config)?;
        info!(segment = %store.name(), capacity = store.capacity(), "progress tracking started");
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// The segment, for renderers and in-process writers.
    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// The segment as a progress sink.
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        self.store.clone()
    }

    /// Register a task.
    pub fn add_task(&self, name: &str, total: u64) -> Result<(), StoreError> {
        ProgressSink::add_task(self.store.as_ref(), name, total)
    }

    /// Advance a task.
    pub fn update(&self, name: &str, advance: u64) -> Result<(), StoreError> {
        ProgressSink::update(self.store.as_ref(), name, advance)
    }

    /// Mark a task failed.
    pub fn fail(&self, name: &str) -> Result<(), StoreError> {
        ProgressSink::fail(self.store.as_ref(), name)
    }

    /// Final drain pass, written back to the segment. Returns the final records.
    pub fn drain(&self) -> Result<Records, StoreError> {
        self.store.update(|records| {
            drain(records);
            Ok(records.clone())
        })
    }

    /// Drain, then destroy the segment.
    pub fn stop(self) -> Result<Records, StoreError> {
        let records = self.drain()?;
        let name = self.store.name().to_string();
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.unlink()?,
            // Someone still holds a handle; their mapping stays valid.
            Err(_) => ProgressStore::remove(&name)?,
        }
        debug!(segment = %name, tasks = records.len(), "progress tracking stopped");
        Ok(records)
    }
}

/// One task as a renderer should draw it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    /// Task name
    pub name: String,
    /// Record as read from the store
    pub record: TaskRecord,
    /// Entries per second since the previous sample
    pub throughput: f64,
    /// Estimated time left, when throughput is known
    pub eta: Option<Duration>,
}

/// Turns successive store snapshots into throughput and ETA figures.
#[derive(Debug, Default)]
pub struct Sampler {
    previous: HashMap<String, (u64, Instant)>,
}

impl Sampler {
    /// New sampler with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `records` with the previous sample taken at an earlier instant.
    pub fn sample(&mut self, records: &Records, now: Instant) -> Vec<TaskView> {
        records
            .iter()
            .map(|(name, record)| {
                let throughput = match self.previous.get(name) {
                    Some(&(completed, at)) => {
                        let elapsed = now.saturating_duration_since(at).as_secs_f64();
                        if elapsed > 0.0 {
                            record.completed.saturating_sub(completed) as f64 / elapsed
                        } else {
                            0.0
                        }
                    }
                    None => 0.0,
                };
                self.previous
                    .insert(name.clone(), (record.completed, now));

                let remaining = record.total.saturating_sub(record.completed);
                let eta = (throughput > 0.0)
                    .then(|| Duration::from_secs_f64(remaining as f64 / throughput));

                TaskView {
                    name: name.clone(),
                    record: *record,
                    throughput,
                    eta,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(tag: &str) -> ProgressTracker {
        ProgressTracker::start(&StoreConfig {
            name: format!("hive-test-{}-progress-{tag}", std::process::id()),
            capacity: 1024,
        })
        .unwrap()
    }

    #[test]
    fn test_record_advance_clamps_to_total() {
        let mut record = TaskRecord::new(3);
        record.advance(2);
        assert_eq!(record.state, TaskState::Running);
        record.advance(5);
        assert_eq!(record.completed, 3);
        assert_eq!(record.state, TaskState::Success);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut record = TaskRecord::new(2);
        record.fail();
        record.advance(2);
        assert_eq!(record.completed, 0);
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.drained().state, TaskState::Failed);
    }

    #[test]
    fn test_empty_archive_is_complete() {
        let record = TaskRecord::new(0);
        assert_eq!(record.state, TaskState::Success);
        assert_eq!(record.ratio(), 1.0);
    }

    #[test]
    fn test_drain_marks_incomplete_as_warning() {
        let mut done = TaskRecord::new(2);
        done.advance(2);
        let mut partial = TaskRecord::new(4);
        partial.advance(1);

        assert_eq!(done.drained().state, TaskState::Success);
        assert_eq!(partial.drained().state, TaskState::Warning);
    }

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = tracker("lifecycle");
        let name = tracker.store().name().to_string();

        tracker.add_task("a.zip", 2).unwrap();
        tracker.add_task("b.zip", 3).unwrap();
        tracker.update("a.zip", 1).unwrap();
        tracker.update("a.zip", 1).unwrap();
        tracker.update("b.zip", 1).unwrap();
        tracker.fail("c.zip").unwrap();

        let records = tracker.stop().unwrap();
        assert_eq!(records["a.zip"].state, TaskState::Success);
        assert_eq!(records["b.zip"].state, TaskState::Warning);
        assert_eq!(records["c.zip"].state, TaskState::Failed);
        assert!(!ProgressStore::exists(&name));
    }

    #[test]
    fn test_total_is_set_once() {
        let tracker = tracker("once");
        tracker.add_task("a.zip", 2).unwrap();
        let result = tracker.add_task("a.zip", 9);
        assert!(matches!(result, Err(StoreError::DuplicateTask(_))));
        assert_eq!(tracker.store().get("a.zip").unwrap().unwrap().total, 2);
        tracker.stop().unwrap();
    }

    #[test]
    fn test_update_unknown_task() {
        let tracker = tracker("unknown");
        let result = tracker.update("ghost.zip", 1);
        assert!(matches!(result, Err(StoreError::UnknownTask(_))));
        tracker.stop().unwrap();
    }

    #[test]
    fn test_sampler_throughput_and_eta() {
        let mut sampler = Sampler::new();
        let start = Instant::now();

        let mut records = Records::new();
        records.insert(
            "a.zip".to_string(),
            TaskRecord {
                total: 100,
                completed: 10,
                state: TaskState::Running,
            },
        );
        let first = sampler.sample(&records, start);
        assert_eq!(first[0].throughput, 0.0);
        assert_eq!(first[0].eta, None);

        records.get_mut("a.zip").unwrap().completed = 30;
        let second = sampler.sample(&records, start + Duration::from_secs(2));
        assert_eq!(second[0].throughput, 10.0);
        assert_eq!(second[0].eta, Some(Duration::from_secs(7)));
    }
}
