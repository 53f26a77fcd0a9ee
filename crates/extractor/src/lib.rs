//! # Extractor
//!
//! Concurrent archive extraction with cross-process progress tracking.
//!
//! An archive is resolved to a format handler by its extension chain, its
//! entries are enumerated, and each entry is extracted by a bounded pool of
//! async units. Progress is reported per task into a named shared segment that
//! other processes can attach to. Batches run one worker per archive, listed
//! in a `.task` file.
//!
//! ## Supported Formats
//!
//! - ZIP (`.zip`)
//! - RAR (`.rar`, read-only)
//! - TAR (`.tar`, `.tar.bz2`, `.tar.xz`)
//! - gzip TAR (`.tar.gz`, `.tgz`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use extractor::{extract, ExtractOptions, ProgressTracker, StoreConfig};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = ProgressTracker::start(&StoreConfig::default())?;
//!
//! let stats = extract(
//!     Path::new("archive.tar.gz"),
//!     None,
//!     &ExtractOptions::default(),
//!     tracker.sink(),
//! )
//! .await?;
//!
//! let records = tracker.stop()?;
//! println!("Extracted {} files into {}", stats.files_extracted, stats.output.display());
//! println!("{:?}", records["archive.tar.gz"].state);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod error;
pub mod extract;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod safety;
pub mod store;
pub mod strategy;
pub mod task_file;
pub mod types;

// Re-export main types
pub use batch::{BatchOptions, BatchReport, InProcessLauncher, ProcessLauncher, WorkerLauncher};
pub use error::{BatchError, ExtractError, StoreError, TaskFileError, WorkerError};
pub use extract::{extract, extract_as, ExtractionJob};
pub use progress::{ProgressSink, ProgressTracker, TaskRecord, TaskState};
pub use registry::{registry, Registry, Resolution};
pub use store::{ProgressStore, Records, StoreConfig};
pub use task_file::BatchTask;
pub use types::{ArchiveEntry, EntryOutcome, ExtractOptions, ExtractStats};
