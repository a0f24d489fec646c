//! Sharing one parsed central directory between handles on the same file.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::Result;

use super::archive::ZipFile;
use super::index::CentralDirectory;
use super::options::OpenOptions;

/// Where an archive lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileLocation {
    /// Device and inode numbers.
    Inode { dev: u64, ino: u64 },
    /// Canonical path, where the platform has no file identity.
    Path(PathBuf),
}

/// What makes two opens share an index: the same file, unmodified, read with
/// the same charset and validation setting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveIdentity {
    pub location: FileLocation,
    pub modified: Option<SystemTime>,
    pub charset: &'static str,
    pub validation_enabled: bool,
}

impl ArchiveIdentity {
    pub fn for_path(path: &Path, options: &OpenOptions) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;

        #[cfg(unix)]
        let location = {
            use std::os::unix::fs::MetadataExt;
            FileLocation::Inode {
                dev: metadata.dev(),
                ino: metadata.ino(),
            }
        };
        #[cfg(not(unix))]
        let location = FileLocation::Path(std::fs::canonicalize(path)?);

        Ok(Self {
            location,
            modified: metadata.modified().ok(),
            charset: options.encoding().name(),
            validation_enabled: options.validation_enabled(),
        })
    }
}

struct Shared {
    index: Arc<CentralDirectory>,
    refs: usize,
}

/// Reference-counted cache of open central directories.
///
/// Handles opened through the same registry on an unchanged file share one
/// [`CentralDirectory`] and one open file. The index is closed when the last
/// handle using it is closed.
///
/// ```no_run
/// use std::sync::Arc;
/// use zipindex::{ArchiveRegistry, OpenOptions};
///
/// let registry = Arc::new(ArchiveRegistry::new());
/// let a = registry.open("app.jar", &OpenOptions::default())?;
/// let b = registry.open("app.jar", &OpenOptions::default())?;
/// assert!(a.shares_index_with(&b));
/// # Ok::<(), zipindex::ZipError>(())
/// ```
#[derive(Default)]
pub struct ArchiveRegistry {
    files: Mutex<HashMap<ArchiveIdentity, Shared>>,
}

impl ArchiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path`, reusing an index already opened through this registry.
    pub fn open(self: &Arc<Self>, path: impl AsRef<Path>, options: &OpenOptions) -> Result<ZipFile> {
        ZipFile::open_shared(self, path, options)
    }

    /// Number of distinct archives currently open.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    /// How many handles use the index for `identity`.
    pub fn ref_count(&self, identity: &ArchiveIdentity) -> usize {
        self.files.lock().get(identity).map_or(0, |s| s.refs)
    }

    /// Take a reference on the index for `identity`, building it with `build`
    /// if nobody holds one.
    ///
    /// `build` runs without the registry lock held. When another thread
    /// registers the same identity meanwhile, its index wins and ours is
    /// closed.
    pub(crate) fn acquire<F>(&self, identity: ArchiveIdentity, build: F) -> Result<Arc<CentralDirectory>>
    where
        F: FnOnce() -> Result<CentralDirectory>,
    {
        if let Some(shared) = self.files.lock().get_mut(&identity) {
            shared.refs += 1;
            debug!(archive = %shared.index.name(), refs = shared.refs, "reusing shared index");
            return Ok(Arc::clone(&shared.index));
        }

        let built = Arc::new(build()?);

        let winner = {
            let mut files = self.files.lock();
            match files.entry(identity) {
                Entry::Occupied(mut occupied) => {
                    let shared = occupied.get_mut();
                    shared.refs += 1;
                    Some(Arc::clone(&shared.index))
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Shared {
                        index: Arc::clone(&built),
                        refs: 1,
                    });
                    None
                }
            }
        };

        match winner {
            Some(winner) => {
                warn!(archive = %built.name(), "index built concurrently, discarding duplicate");
                if let Err(e) = built.close() {
                    debug!(error = %e, "closing discarded index");
                }
                Ok(winner)
            }
            None => {
                debug!(archive = %built.name(), "registered new index");
                Ok(built)
            }
        }
    }

    /// Drop one reference on `index`; the last one closes it.
    pub(crate) fn release(&self, index: &Arc<CentralDirectory>) -> Result<()> {
        let Some(identity) = index.identity() else {
            return index.close();
        };

        let mut files = self.files.lock();
        let Some(shared) = files.get_mut(identity) else {
            return Ok(());
        };
        if !Arc::ptr_eq(&shared.index, index) {
            return Ok(());
        }
        shared.refs -= 1;
        if shared.refs > 0 {
            return Ok(());
        }
        files.remove(identity);
        drop(files);

        debug!(archive = %index.name(), "last reference released, closing index");
        index.close()
    }
}
