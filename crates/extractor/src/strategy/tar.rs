//! TAR handlers: bzip2/xz/plain and gzip.
//!
//! Compressed tar streams cannot be seeked, so opening decodes the whole
//! stream once into an anonymous temp file. Enumeration then records where
//! each member's data starts, and reads seek straight to it.

use super::{ArchiveSource, ExtractionStrategy};
use crate::error::ExtractError;
use crate::types::ArchiveEntry;
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tar::EntryType;
use tracing::debug;

/// Handles `.tar.bz2`, `.tar.xz` and uncompressed `.tar`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarStrategy;

/// Handles `.tar.gz` and `.tgz`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzStrategy;

impl ExtractionStrategy for TarStrategy {
    fn name(&self) -> &'static str {
        "TAR"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[".tar.bz2", ".tar.xz", ".tar"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
        open_tar(path)
    }
}

impl ExtractionStrategy for TarGzStrategy {
    fn name(&self) -> &'static str {
        "TAR.GZ"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[".tar.gz", ".tgz"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
        open_tar(path)
    }
}

/// Outer compression of a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain tar
    None,
    /// gzip (`1F 8B`)
    Gzip,
    /// bzip2 (`BZh`)
    Bzip2,
    /// xz (`FD 37 7A 58 5A 00`)
    Xz,
}

/// Sniff the compression from the leading bytes of the stream.
pub fn detect_compression(header: &[u8]) -> Compression {
    match header {
        [0x1F, 0x8B, ..] => Compression::Gzip,
        [b'B', b'Z', b'h', ..] => Compression::Bzip2,
        [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, ..] => Compression::Xz,
        _ => Compression::None,
    }
}

fn open_tar(path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; 6];
    let read = read_prefix(&mut file, &mut header)?;
    file.rewind()?;
    let compression = detect_compression(&header[..read]);
    debug!(archive = %path.display(), ?compression, "opening tar stream");

    let data = match compression {
        Compression::None => Ok(file),
        Compression::Gzip => spool(MultiGzDecoder::new(BufReader::new(file))),
        Compression::Bzip2 => spool(MultiBzDecoder::new(BufReader::new(file))),
        Compression::Xz => spool_xz(file),
    }
    .map_err(|e| ExtractError::open(path, e))?;

    let members = enumerate(&data).map_err(|e| ExtractError::open(path, e))?;
    let entries = members.iter().map(|m| m.entry.clone()).collect();

    Ok(Box::new(TarSource {
        data: Mutex::new(data),
        members,
        entries,
    }))
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn spool<R: Read>(mut decoder: R) -> io::Result<File> {
    let mut spool = tempfile::tempfile()?;
    io::copy(&mut decoder, &mut spool)?;
    spool.rewind()?;
    Ok(spool)
}

fn spool_xz(file: File) -> io::Result<File> {
    let mut spool = tempfile::tempfile()?;
    lzma_rs::xz_decompress(&mut BufReader::new(file), &mut spool)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))?;
    spool.rewind()?;
    Ok(spool)
}

/// Links are followed through at most this many hops.
const MAX_LINK_HOPS: usize = 16;

/// One tar member with the location of its data.
///
/// A link member that resolves to another member inside the archive takes
/// over that member's kind, offset and size, so reading it yields the
/// target's content.
struct Member {
    entry: ArchiveEntry,
    kind: EntryType,
    offset: u64,
    link: Option<String>,
}

/// Headers that describe other members rather than being members.
fn is_extension_header(kind: EntryType) -> bool {
    kind.is_pax_global_extensions()
        || kind.is_pax_local_extensions()
        || kind.is_gnu_longname()
        || kind.is_gnu_longlink()
}

fn is_link(kind: EntryType) -> bool {
    matches!(kind, EntryType::Symlink | EntryType::Link)
}

fn enumerate(data: &File) -> io::Result<Vec<Member>> {
    let mut reader = data;
    reader.rewind()?;

    let mut archive = tar::Archive::new(reader);
    let mut members = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let kind = entry.header().entry_type();
        if is_extension_header(kind) {
            debug!(?kind, "skipping extension header");
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        let link = if is_link(kind) {
            entry
                .link_name()?
                .map(|target| target.to_string_lossy().into_owned())
        } else {
            None
        };

        members.push(Member {
            entry: ArchiveEntry {
                name,
                is_directory: kind.is_dir(),
                size: entry.size(),
                index: members.len(),
            },
            kind,
            offset: entry.raw_file_position(),
            link,
        });
    }

    resolve_links(&mut members);
    Ok(members)
}

/// Point every resolvable link member at the data of its target.
fn resolve_links(members: &mut [Member]) {
    let by_name: HashMap<String, usize> = members
        .iter()
        .enumerate()
        .filter_map(|(i, m)| member_key("", &m.entry.name).map(|key| (key, i)))
        .collect();

    for i in 0..members.len() {
        if !is_link(members[i].kind) {
            continue;
        }
        let Some(target) = follow_link(members, &by_name, i) else {
            debug!(
                entry = %members[i].entry.name,
                link = ?members[i].link,
                "link target not in archive"
            );
            continue;
        };

        let (kind, offset, size) = {
            let target = &members[target];
            (target.kind, target.offset, target.entry.size)
        };
        let member = &mut members[i];
        member.kind = kind;
        member.offset = offset;
        member.entry.size = size;
        member.entry.is_directory = kind.is_dir();
    }
}

fn follow_link(
    members: &[Member],
    by_name: &HashMap<String, usize>,
    start: usize,
) -> Option<usize> {
    let mut current = start;
    for _ in 0..MAX_LINK_HOPS {
        let member = &members[current];
        if !is_link(member.kind) {
            return Some(current);
        }
        let target = member.link.as_deref()?;

        // Symlinks are relative to their own directory, hard links to the archive root.
        let key = if member.kind == EntryType::Symlink {
            let own = member_key("", &member.entry.name)?;
            let base = own.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
            member_key(base, target)?
        } else {
            member_key("", target)?
        };
        current = *by_name.get(&key)?;
    }
    None
}

/// Lexically resolve `name` against the archive directory `base`. Absolute
/// names and names climbing above the archive root have no key.
fn member_key(base: &str, name: &str) -> Option<String> {
    if name.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    Some(parts.join("/"))
}

struct TarSource {
    data: Mutex<File>,
    members: Vec<Member>,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveSource for TarSource {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read(&self, entry: &ArchiveEntry) -> io::Result<Vec<u8>> {
        let member = self.members.get(entry.index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no member #{}", entry.index))
        })?;

        if let (true, Some(target)) = (is_link(member.kind), &member.link) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("link target {target:?} is not in the archive"),
            ));
        }
        if !(member.kind.is_file() || member.kind.is_contiguous()) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{:?} members carry no content", member.kind),
            ));
        }

        let mut data = vec![0u8; member.entry.size as usize];
        let mut file = self.data.lock();
        file.seek(SeekFrom::Start(member.offset))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }
}
