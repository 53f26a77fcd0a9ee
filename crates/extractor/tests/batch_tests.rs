//! Batch runs driven through the in-process launcher.

use extractor::batch::{self, BatchOptions};
use extractor::{
    BatchError, ExtractOptions, InProcessLauncher, ProgressTracker, StoreConfig, TaskFileError,
    TaskState,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn create_zip(path: &Path, entries: &[(&str, &str)]) {
    use zip::write::{SimpleFileOptions, ZipWriter};

    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn options(tag: &str) -> BatchOptions {
    BatchOptions {
        max_workers: 2,
        store: StoreConfig {
            name: format!("hive-it-{}-batch-{tag}", std::process::id()),
            capacity: 1024,
        },
    }
}

fn write_task_file(dir: &Path, lines: &[String]) -> PathBuf {
    let path = dir.join("jobs.task");
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_isolates_outputs_and_failures() {
    let temp_dir = TempDir::new().unwrap();
    let mut lines = Vec::new();
    for i in 0..5 {
        let archive = temp_dir.path().join(format!("set{i}.zip"));
        let id = format!("archive {i}");
        create_zip(&archive, &[("id.txt", id.as_str()), ("nested/more.txt", "shared name")]);
        lines.push(archive.display().to_string());
    }
    let broken = temp_dir.path().join("broken.zip");
    fs::write(&broken, b"definitely not a zip").unwrap();
    lines.insert(2, broken.display().to_string());

    let task_file = write_task_file(temp_dir.path(), &lines);
    let tasks = batch::load(&task_file).await.unwrap();
    assert_eq!(tasks.len(), 6);

    let options = options("isolate");
    let tracker = ProgressTracker::start(&options.store_config(tasks.len())).unwrap();
    let launcher = Arc::new(InProcessLauncher::new(ExtractOptions::default()));

    let report = batch::run(tasks, options.max_workers, launcher, &tracker).await;
    let records = tracker.stop().unwrap();

    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(report.failed().count(), 1);
    assert_eq!(report.completed(), 5);
    assert_eq!(report.outcomes[2].task, "broken.zip");
    assert!(report.outcomes[2].result.is_err());

    for i in 0..5 {
        let out = temp_dir.path().join(format!("set{i}"));
        assert_eq!(fs::read_to_string(out.join("id.txt")).unwrap(), format!("archive {i}"));
        assert_eq!(records[&format!("set{i}.zip")].state, TaskState::Success);
        assert_eq!(records[&format!("set{i}.zip")].completed, 2);
    }
    assert_eq!(records["broken.zip"].state, TaskState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_explicit_outputs_and_duplicate_names() {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("a");
    let second = temp_dir.path().join("b");
    fs::create_dir_all(&first).unwrap();
    fs::create_dir_all(&second).unwrap();
    create_zip(&first.join("data.zip"), &[("from.txt", "a")]);
    create_zip(&second.join("data.zip"), &[("from.txt", "b")]);

    let out_a = temp_dir.path().join("out/a");
    let out_b = temp_dir.path().join("out/b");
    let lines = vec![
        format!("{} | {}", first.join("data.zip").display(), out_a.display()),
        format!("{}|{}", second.join("data.zip").display(), out_b.display()),
    ];
    let tasks = batch::load(&write_task_file(temp_dir.path(), &lines)).await.unwrap();

    let options = options("dupes");
    let tracker = ProgressTracker::start(&options.store_config(tasks.len())).unwrap();
    let launcher = Arc::new(InProcessLauncher::default());
    let report = batch::run(tasks, options.max_workers, launcher, &tracker).await;
    let records = tracker.stop().unwrap();

    assert!(!report.has_failures());
    assert_eq!(fs::read_to_string(out_a.join("from.txt")).unwrap(), "a");
    assert_eq!(fs::read_to_string(out_b.join("from.txt")).unwrap(), "b");
    assert_eq!(records["data.zip"].state, TaskState::Success);
    assert_eq!(records["data.zip (2)"].state, TaskState::Success);
}

#[tokio::test]
async fn test_bad_task_file_starts_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("good.zip");
    create_zip(&archive, &[("x.txt", "x")]);
    let lines = vec![
        archive.display().to_string(),
        temp_dir.path().join("missing.zip").display().to_string(),
    ];

    let result = batch::load(&write_task_file(temp_dir.path(), &lines)).await;

    match result {
        Err(BatchError::TaskFile(e @ TaskFileError::PathValidation { .. })) => {
            assert_eq!(e.line(), Some(2));
        }
        other => panic!("expected a path error, got {other:?}"),
    }
    assert!(!temp_dir.path().join("good").exists());
}
