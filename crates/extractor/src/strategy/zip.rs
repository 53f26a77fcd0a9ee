//! ZIP handler.

use super::{ArchiveSource, ExtractionStrategy};
use crate::error::ExtractError;
use crate::types::ArchiveEntry;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use zip::ZipArchive;

/// Handles `.zip`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipStrategy;

impl ExtractionStrategy for ZipStrategy {
    fn name(&self) -> &'static str {
        "ZIP"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[".zip"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
        let file = File::open(path)?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| ExtractError::open(path, e))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            // Raw access reads the local header only, no decompression.
            let file = archive
                .by_index_raw(index)
                .map_err(|e| ExtractError::open(path, e))?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                is_directory: file.is_dir(),
                size: file.size(),
                index,
            });
        }

        Ok(Box::new(ZipSource {
            archive: Mutex::new(archive),
            entries,
        }))
    }
}

/// The central directory is parsed once; entry reads share the handle.
struct ZipSource {
    archive: Mutex<ZipArchive<BufReader<File>>>,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveSource for ZipSource {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read(&self, entry: &ArchiveEntry) -> io::Result<Vec<u8>> {
        let mut archive = self.archive.lock();
        let mut file = archive.by_index(entry.index).map_err(io::Error::other)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::{SimpleFileOptions, ZipWriter};

    #[test]
    fn test_open_enumerates_entries_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.zip");

        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.add_directory("docs/", SimpleFileOptions::default()).unwrap();
        zip.start_file("docs/readme.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"read me").unwrap();
        zip.finish().unwrap();

        let source = ZipStrategy.open(&path).unwrap();
        let entries = source.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].name, "docs/readme.txt");
        assert_eq!(entries[1].size, 7);
        assert_eq!(source.read(&entries[1]).unwrap(), b"read me");
    }

    #[test]
    fn test_open_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let result = ZipStrategy.open(&path);
        assert!(matches!(result, Err(ExtractError::ArchiveOpen { .. })));
    }
}
