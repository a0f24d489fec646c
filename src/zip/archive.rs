use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::error::{Result, ZipError};
use crate::io::RandomAccessSource;

use super::entry::ZipEntry;
use super::index::CentralDirectory;
use super::lifecycle::{IndexLease, ResourceLifecycle};
use super::options::OpenOptions;
use super::registry::{ArchiveIdentity, ArchiveRegistry};
use super::stream::{EntryReader, open_entry};

/// The entry most recently returned by [`ZipFile::get_entry`], so that the
/// common "look up, then open" sequence finds it without hashing twice.
#[derive(Default)]
struct LookupCache {
    last_name: Option<String>,
    last_pos: usize,
}

/// An open ZIP archive.
///
/// All methods take `&self`; a handle may be shared between threads. Once
/// [`close`](Self::close) has been called (or the handle dropped) every
/// operation fails with [`ZipError::Closed`], and so do reads from streams
/// that were opened through it.
///
/// ```no_run
/// use std::io::Read;
/// use zipindex::{OpenOptions, ZipFile};
///
/// let zip = ZipFile::open("archive.zip", &OpenOptions::default())?;
/// if let Some(entry) = zip.get_entry("README.md")? {
///     let mut text = String::new();
///     zip.input_stream(&entry)?.read_to_string(&mut text)?;
///     println!("{text}");
/// }
/// zip.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ZipFile {
    name: String,
    close_requested: AtomicBool,
    state: Mutex<LookupCache>,
    resources: Arc<ResourceLifecycle>,
}

impl ZipFile {
    /// Open the archive at `path` with an index of its own.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let index = CentralDirectory::open_path(path, options, None)?;
        Ok(Self::with_lease(
            path.display().to_string(),
            IndexLease::unshared(Arc::new(index)),
        ))
    }

    /// Open the archive at `path`, sharing its index with other handles
    /// opened through `registry`.
    pub fn open_shared(
        registry: &Arc<ArchiveRegistry>,
        path: impl AsRef<Path>,
        options: &OpenOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let identity = ArchiveIdentity::for_path(path, options)?;
        let index = registry.acquire(identity.clone(), || {
            CentralDirectory::open_path(path, options, Some(identity))
        })?;
        Ok(Self::with_lease(
            path.display().to_string(),
            IndexLease::shared(index, Arc::clone(registry)),
        ))
    }

    /// Read an archive from any random-access source, e.g. an
    /// [`HttpRangeSource`](crate::io::HttpRangeSource).
    pub fn from_source(
        source: Arc<dyn RandomAccessSource>,
        name: impl Into<String>,
        options: &OpenOptions,
    ) -> Result<Self> {
        let name = name.into();
        let index = CentralDirectory::from_source(source, name.clone(), options, None)?;
        Ok(Self::with_lease(name, IndexLease::unshared(Arc::new(index))))
    }

    fn with_lease(name: String, lease: IndexLease) -> Self {
        Self {
            name,
            close_requested: AtomicBool::new(false),
            state: Mutex::new(LookupCache::default()),
            resources: ResourceLifecycle::new(lease),
        }
    }

    fn ensure_open(&self) -> Result<&CentralDirectory> {
        if self.close_requested.load(Ordering::Acquire) || self.resources.is_closed() {
            return Err(ZipError::Closed("zip file closed"));
        }
        Ok(self.resources.index())
    }

    /// Path or URL the archive was opened from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an entry by name. A name without a trailing slash also finds
    /// the directory entry `name/`.
    pub fn get_entry(&self, name: &str) -> Result<Option<ZipEntry>> {
        let index = self.ensure_open()?;
        let mut cache = self.state.lock();
        let Some(pos) = index.find(name, true) else {
            return Ok(None);
        };
        let entry = ZipEntry::from_cen(index, pos)?;
        cache.last_name = Some(entry.name.clone());
        cache.last_pos = pos;
        Ok(Some(entry))
    }

    /// All entries, in central directory order.
    pub fn entries(&self) -> Result<Entries<'_>> {
        let index = self.ensure_open()?;
        Ok(Entries {
            zip: self,
            next: 0,
            total: index.total(),
        })
    }

    pub fn entry_names(&self) -> Result<Vec<String>> {
        let index = self.ensure_open()?;
        let _cache = self.state.lock();
        Ok((0..index.total())
            .map(|i| index.entry_name(index.position(i)).into_owned())
            .collect())
    }

    /// Open a stream over the uncompressed data of `entry`.
    pub fn input_stream(&self, entry: &ZipEntry) -> Result<EntryReader> {
        let index = self.ensure_open()?;
        let cache = self.state.lock();
        let pos = match &cache.last_name {
            Some(last) if *last == entry.name => Some(cache.last_pos),
            _ => index.find(&entry.name, false),
        };
        let pos = pos.ok_or_else(|| ZipError::EntryNotFound(entry.name.clone()))?;
        open_entry(&self.resources, pos)
    }

    /// The archive comment, decoded with the configured charset.
    pub fn comment(&self) -> Result<Option<String>> {
        Ok(self.ensure_open()?.comment())
    }

    pub fn comment_bytes(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.ensure_open()?.comment_bytes().map(<[u8]>::to_vec))
    }

    /// Number of entries.
    pub fn size(&self) -> Result<usize> {
        Ok(self.ensure_open()?.total())
    }

    /// Whether the archive starts with a local file header, i.e. has no
    /// prefix such as a self-extractor stub.
    pub fn starts_with_loc_header(&self) -> Result<bool> {
        Ok(self.ensure_open()?.starts_with_loc())
    }

    /// Name of the `META-INF/MANIFEST.MF` entry (any case). With
    /// `only_if_signed`, only when signature files are present too.
    pub fn manifest_name(&self, only_if_signed: bool) -> Result<Option<String>> {
        let index = self.ensure_open()?;
        if only_if_signed && index.signature_positions().is_empty() {
            return Ok(None);
        }
        Ok(index
            .manifest_pos()
            .map(|pos| index.entry_name(pos).into_owned()))
    }

    /// Number of manifest entries; more than one usually means a tampered
    /// archive.
    pub fn manifest_count(&self) -> Result<usize> {
        Ok(self.ensure_open()?.manifest_count())
    }

    /// The manifest followed by the signature files and blocks under
    /// `META-INF/`.
    pub fn manifest_and_signature_files(&self) -> Result<Vec<String>> {
        let index = self.ensure_open()?;
        Ok(index
            .manifest_pos()
            .into_iter()
            .chain(index.signature_positions().iter().copied())
            .map(|pos| index.entry_name(pos).into_owned())
            .collect())
    }

    /// Distinct versions `n` of `META-INF/versions/<n>/` entries, ascending.
    pub fn meta_inf_versions(&self) -> Result<Vec<u32>> {
        Ok(self.ensure_open()?.meta_versions().to_vec())
    }

    /// Identity under which the index is shared, for registry-opened handles.
    pub fn identity(&self) -> Option<&ArchiveIdentity> {
        self.resources.index().identity()
    }

    /// Whether both handles read through the same index.
    pub fn shares_index_with(&self, other: &ZipFile) -> bool {
        Arc::ptr_eq(self.resources.index(), other.resources.index())
    }

    /// Close the archive and every stream opened from it.
    ///
    /// Closing twice is a no-op. Failures releasing the index are returned,
    /// several of them as [`ZipError::Teardown`].
    pub fn close(&self) -> Result<()> {
        if self.close_requested.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _cache = self.state.lock();
        self.resources.close()
    }
}

impl Drop for ZipFile {
    fn drop(&mut self) {
        if self.resources.is_closed() {
            return;
        }
        debug!(archive = %self.name, "zip file dropped without close");
        if let Err(e) = self.resources.close() {
            warn!(archive = %self.name, error = %e, "failed to release archive");
        }
    }
}

impl std::fmt::Debug for ZipFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipFile")
            .field("name", &self.name)
            .field("closed", &self.resources.is_closed())
            .field("index", self.resources.index())
            .finish()
    }
}

/// Iterator over the entries of a [`ZipFile`], created by
/// [`ZipFile::entries`].
///
/// Yields one `Err` and stops if the archive is closed while iterating.
pub struct Entries<'a> {
    zip: &'a ZipFile,
    next: usize,
    total: usize,
}

impl Iterator for Entries<'_> {
    type Item = Result<ZipEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = match self.zip.ensure_open() {
            Ok(index) => index,
            Err(e) => {
                self.next = self.total;
                return Some(Err(e));
            }
        };
        let _cache = self.zip.state.lock();
        let pos = index.position(self.next);
        self.next += 1;
        Some(ZipEntry::from_cen(index, pos))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    fn empty_archive() -> ZipFile {
        let mut end = vec![0u8; 22];
        end[..4].copy_from_slice(&0x0605_4b50u32.to_le_bytes());
        ZipFile::from_source(Arc::new(MemorySource::new(end)), "empty.zip", &OpenOptions::default())
            .unwrap()
    }

    #[test]
    fn empty_archive_has_no_entries() {
        let zip = empty_archive();
        assert_eq!(zip.size().unwrap(), 0);
        assert_eq!(zip.entries().unwrap().count(), 0);
        assert_eq!(zip.get_entry("anything").unwrap(), None);
        assert_eq!(zip.get_entry("").unwrap(), None);
        assert_eq!(zip.comment().unwrap(), None);
        assert!(!zip.starts_with_loc_header().unwrap());
        assert_eq!(zip.manifest_name(false).unwrap(), None);
    }

    #[test]
    fn closed_handle_rejects_everything() {
        let zip = empty_archive();
        zip.close().unwrap();
        zip.close().unwrap();
        assert!(matches!(zip.size(), Err(ZipError::Closed(_))));
        assert!(matches!(zip.get_entry("a"), Err(ZipError::Closed(_))));
        assert!(matches!(zip.entries(), Err(ZipError::Closed(_))));
        assert!(matches!(zip.comment(), Err(ZipError::Closed(_))));
    }
}
