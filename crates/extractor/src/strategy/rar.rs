//! RAR handler (read-only, via unrar).

use super::{ArchiveSource, ExtractionStrategy};
use crate::error::ExtractError;
use crate::types::ArchiveEntry;
use std::io;
use std::path::{Path, PathBuf};
use unrar::Archive;

/// Handles `.rar`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RarStrategy;

impl ExtractionStrategy for RarStrategy {
    fn name(&self) -> &'static str {
        "RAR"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[".rar"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::NotFound(path.to_path_buf()));
        }

        let mut cursor = Archive::new(path)
            .open_for_listing()
            .map_err(|e| ExtractError::open(path, e))?;

        let mut entries = Vec::new();
        while let Some(header) = cursor
            .read_header()
            .map_err(|e| ExtractError::open(path, e))?
        {
            let entry = header.entry();
            entries.push(ArchiveEntry {
                name: entry.filename.to_string_lossy().into_owned(),
                is_directory: entry.is_directory(),
                size: entry.unpacked_size,
                index: entries.len(),
            });
            cursor = header.skip().map_err(|e| ExtractError::open(path, e))?;
        }

        Ok(Box::new(RarSource {
            path: path.to_path_buf(),
            entries,
        }))
    }
}

/// unrar only walks forward, so every read opens its own cursor and skips
/// to the requested header. Reads never contend with each other.
struct RarSource {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveSource for RarSource {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read(&self, entry: &ArchiveEntry) -> io::Result<Vec<u8>> {
        let mut cursor = Archive::new(&self.path)
            .open_for_processing()
            .map_err(io::Error::other)?;
        let mut position = 0;

        loop {
            let Some(header) = cursor.read_header().map_err(io::Error::other)? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("archive ended before {}", entry.name),
                ));
            };

            if position == entry.index {
                let (data, _) = header.read().map_err(io::Error::other)?;
                return Ok(data);
            }

            cursor = header.skip().map_err(io::Error::other)?;
            position += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_archive() {
        let result = RarStrategy.open(Path::new("/nonexistent/archive.rar"));
        assert!(matches!(result, Err(ExtractError::NotFound(_))));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.rar");
        std::fs::write(&path, b"Rar! but not really").unwrap();

        let result = RarStrategy.open(&path);
        assert!(matches!(result, Err(ExtractError::ArchiveOpen { .. })));
    }
}
