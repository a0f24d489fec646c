//! # zipindex
//!
//! A random-access ZIP reader.
//!
//! Opening an archive reads its central directory once and indexes it by
//! entry name, so lookups are hash probes and no entry data is touched until
//! a stream over it is read. Archives can be read from local files or, with
//! HTTP Range requests, from remote servers.
//!
//! ## Features
//!
//! - O(1) average lookup by name, with `dir` finding the entry `dir/`
//! - Lazy, independent streams over STORED and DEFLATE entries
//! - ZIP64 archives and archives with more than 65535 entries
//! - Handles on the same file share one index through an [`ArchiveRegistry`]
//! - Closing a handle closes every stream it opened, exactly once
//! - Entry-name validation hook and configurable legacy charset
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Read;
//! use std::sync::Arc;
//! use zipindex::{ArchiveRegistry, OpenOptions};
//!
//! let registry = Arc::new(ArchiveRegistry::new());
//! let zip = registry.open("archive.zip", &OpenOptions::default())?;
//!
//! for entry in zip.entries()? {
//!     let entry = entry?;
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! if let Some(entry) = zip.get_entry("docs/readme.txt")? {
//!     let mut data = Vec::new();
//!     zip.input_stream(&entry)?.read_to_end(&mut data)?;
//! }
//!
//! zip.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, ZipError};
pub use io::{HttpRangeSource, LocalFileSource, MemorySource, RandomAccessSource};
pub use zip::{
    ArchiveIdentity, ArchiveRegistry, CompressionMethod, EntryReader, Entries, NameValidator,
    OpenOptions, PathTraversalValidator, ZipEntry, ZipExtractor, ZipFile,
};
