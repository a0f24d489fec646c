//! Random-access reading of ZIP archives.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records (END, Zip64 END, CEN and LOC headers)
//! - [`end`]: locating the End of Central Directory record
//! - [`index`]: the central directory, read once and hashed by entry name
//! - [`registry`]: sharing one index between handles on the same file
//! - [`archive`]: the [`ZipFile`] handle, lookups and iteration
//! - [`stream`]: lazy readers over stored and deflated entry data
//! - [`extractor`]: copying entries out with CRC verification
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (END) record at the end
//!
//! Opening an archive reads the END record and the central directory only.
//! Entry data is read when a stream over it is first read, so listing a
//! remote archive through HTTP Range requests costs two small downloads.
//!
//! ## Limitations
//!
//! - Only STORED and DEFLATED entries
//! - No encryption support
//! - No multi-disk archive support
//! - Read-only

mod archive;
pub mod end;
mod entry;
mod extractor;
pub mod index;
mod lifecycle;
mod options;
pub mod registry;
mod stream;
pub mod structures;

pub use archive::{Entries, ZipFile};
pub use entry::ZipEntry;
pub use extractor::ZipExtractor;
pub use options::{NameValidator, OpenOptions, PathTraversalValidator};
pub use registry::{ArchiveIdentity, ArchiveRegistry, FileLocation};
pub use stream::EntryReader;
pub use structures::CompressionMethod;
