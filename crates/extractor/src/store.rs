//! Named, fixed-capacity progress segment shared between processes.
//!
//! The segment is a memory-mapped file (under `/dev/shm` on Linux) holding a
//! JSON object `task name -> TaskRecord`, NUL padded to the segment size.
//! Every read deserializes the whole mapping and every write re-serializes it;
//! nothing is cached between calls.
//!
//! Read-modify-write sequences run under an exclusive `flock` on the segment,
//! so writers in different processes cannot lose each other's updates. The
//! lock belongs to the open file description, so a process-local mutex sits
//! on top of it to serialize threads sharing one handle.

use crate::error::StoreError;
use crate::progress::TaskRecord;
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reference segment size in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Deserialized segment payload.
pub type Records = BTreeMap<String, TaskRecord>;

/// Name and size of the segment for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Segment name, a plain file name
    pub name: String,
    /// Segment size in bytes
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: format!("hive-progress-{}", std::process::id()),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Raise the capacity to at least `bytes`.
    pub fn with_min_capacity(mut self, bytes: usize) -> Self {
        self.capacity = self.capacity.max(bytes);
        self
    }
}

/// Where the segment called `name` lives on this host.
pub fn segment_path(name: &str) -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        shm.join(name)
    } else {
        std::env::temp_dir().join(format!("{name}.shm"))
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

struct Segment {
    file: File,
    map: MmapMut,
}

/// Handle on a shared progress segment.
pub struct ProgressStore {
    name: String,
    path: PathBuf,
    capacity: usize,
    segment: Mutex<Segment>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl ProgressStore {
    /// Create the segment, or attach to it when it already exists.
    ///
    /// An existing segment keeps its original capacity.
    pub fn create(config: &StoreConfig) -> Result<Self, StoreError> {
        validate_name(&config.name)?;
        let path = segment_path(&config.name);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        // Size the file before it becomes visible under its name, so an
        // attaching process never maps a half-initialised segment.
        let staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.as_file().set_len(config.capacity.max(1) as u64)?;

        match staged.persist_noclobber(&path) {
            Ok(_) => {
                debug!(
                    segment = %config.name,
                    path = %path.display(),
                    capacity = config.capacity,
                    "created progress segment"
                );
                Self::open(&config.name)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(segment = %config.name, "attaching to existing progress segment");
                Self::open(&config.name)
            }
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }

    /// Attach to an existing segment.
    pub fn open(name: &str) -> Result<Self, StoreError> {
        validate_name(name)?;
        let path = segment_path(name);

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let capacity = file.metadata()?.len() as usize;
        if capacity == 0 {
            return Err(StoreError::Missing(name.to_string()));
        }

        // SAFETY: the mapping is only touched while holding the segment lock,
        // and every writer keeps the file at its original length.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            name: name.to_string(),
            path,
            capacity,
            segment: Mutex::new(Segment { file, map }),
        })
    }

    /// Whether a segment called `name` currently exists.
    pub fn exists(name: &str) -> bool {
        validate_name(name).is_ok() && segment_path(name).is_file()
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segment size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Backing file of the segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole mapping.
    pub fn snapshot(&self) -> Result<Records, StoreError> {
        self.locked(|map| decode(map))
    }

    /// Read one record.
    pub fn get(&self, key: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.snapshot()?.remove(key))
    }

    /// Insert or replace one record.
    pub fn put(&self, key: &str, record: TaskRecord) -> Result<(), StoreError> {
        self.update(|records| {
            records.insert(key.to_string(), record);
            Ok(())
        })
    }

    /// Remove one record, returning it.
    pub fn delete(&self, key: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.update(|records| Ok(records.remove(key)))
    }

    /// Atomic read-modify-write of the whole mapping.
    ///
    /// Nothing is written when `apply` fails or the result does not fit.
    pub fn update<R>(
        &self,
        apply: impl FnOnce(&mut Records) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.locked(|map| {
            let mut records = decode(map)?;
            let output = apply(&mut records)?;
            encode(map, &records)?;
            Ok(output)
        })
    }

    /// Destroy the segment. Other handles keep their mapping until dropped.
    pub fn unlink(self) -> Result<(), StoreError> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path)?;
        debug!(segment = %path.display(), "unlinked progress segment");
        Ok(())
    }

    /// Destroy the segment called `name` without attaching to it.
    pub fn remove(name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        match std::fs::remove_file(segment_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn locked<R>(
        &self,
        body: impl FnOnce(&mut MmapMut) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut segment = self.segment.lock();
        let _lock = lock_segment(&segment.file)?;
        body(&mut segment.map)
    }
}

#[cfg(unix)]
fn lock_segment(file: &File) -> Result<nix::fcntl::Flock<File>, StoreError> {
    use nix::fcntl::{Flock, FlockArg};

    // The duplicate shares the open file description, which is what flock
    // locks. Dropping the guard releases it.
    let handle = file.try_clone()?;
    Flock::lock(handle, FlockArg::LockExclusive)
        .map_err(|(_, errno)| StoreError::Lock(errno.to_string()))
}

#[cfg(not(unix))]
fn lock_segment(_file: &File) -> Result<(), StoreError> {
    Ok(())
}

fn decode(map: &[u8]) -> Result<Records, StoreError> {
    let end = map.iter().position(|&b| b == 0).unwrap_or(map.len());
    if end == 0 {
        return Ok(Records::new());
    }
    Ok(serde_json::from_slice(&map[..end])?)
}

fn encode(map: &mut [u8], records: &Records) -> Result<(), StoreError> {
    let payload = serde_json::to_vec(records)?;
    if payload.len() > map.len() {
        return Err(StoreError::CapacityExceeded {
            needed: payload.len(),
            capacity: map.len(),
        });
    }
    map[..payload.len()].copy_from_slice(&payload);
    map[payload.len()..].fill(0);
    Ok(())
}
