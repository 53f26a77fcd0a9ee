//! Format handlers.
//!
//! A strategy knows how to open one family of containers and hand back an
//! [`ArchiveSource`]: the eagerly enumerated entry list plus random access to
//! each entry's bytes. Everything else (skip rules, directory creation,
//! concurrency, progress) is shared and lives in [`crate::extract`].

use crate::error::ExtractError;
use crate::types::ArchiveEntry;
use std::io;
use std::path::Path;

pub mod rar;
pub mod tar;
pub mod zip;

pub use self::rar::RarStrategy;
pub use self::tar::{TarGzStrategy, TarStrategy};
pub use self::zip::ZipStrategy;

/// A format handler registered by suffix.
pub trait ExtractionStrategy: Send + Sync + 'static {
    /// Short format label, e.g. `"ZIP"`.
    fn name(&self) -> &'static str;

    /// Lowercase suffixes this handler declares, each starting with a dot.
    fn suffixes(&self) -> &'static [&'static str];

    /// Open the container and enumerate every entry.
    ///
    /// Blocking; callers on an async runtime run it on the blocking pool.
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError>;
}

/// An opened archive.
///
/// `read` may be called from several blocking threads at once, in any order.
pub trait ArchiveSource: Send + Sync {
    /// Entries in archive order. Immutable once opened.
    fn entries(&self) -> &[ArchiveEntry];

    /// Decode the full content of a file entry.
    fn read(&self, entry: &ArchiveEntry) -> io::Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionStrategy")
            .field("name", &self.name())
            .field("suffixes", &self.suffixes())
            .finish()
    }
}
