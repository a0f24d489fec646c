//! Error types for archive operations.
//!
//! Errors fall into three families:
//!
//! - format errors: the bytes on disk are not an archive this reader accepts
//!   (see [`ZipError::is_format`]),
//! - I/O errors from the underlying source, passed through untouched,
//! - usage errors: an operation on a handle that has already been closed.

use std::io;
use thiserror::Error;

/// The error type for reading ZIP archives.
#[derive(Debug, Error)]
pub enum ZipError {
    /// Malformed or unsupported archive structure.
    #[error("{0}")]
    Format(String),

    /// Two central directory entries decode to the same name.
    #[error("duplicate entry name: {0}")]
    DuplicateEntry(String),

    /// The configured name validator refused an entry name.
    #[error("invalid zip entry name {name:?}: {reason}")]
    RejectedName {
        /// The decoded entry name.
        name: String,
        /// Why the validator refused it.
        reason: String,
    },

    /// Compression method other than STORED or DEFLATED.
    #[error("invalid CEN header (bad compression method: {0})")]
    UnsupportedMethod(u16),

    /// The general purpose flag marks the entry as encrypted.
    #[error("invalid CEN header (encrypted entry)")]
    EncryptedEntry,

    /// I/O error from the underlying source.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The archive handle has been closed.
    #[error("{0}")]
    Closed(&'static str),

    /// The entry does not belong to this archive.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Extracted data does not match the checksum in the central directory.
    #[error("CRC mismatch for {name}: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Entry name.
        name: String,
        /// CRC-32 stored in the archive.
        expected: u32,
        /// CRC-32 of the bytes actually read.
        computed: u32,
    },

    /// Several failures collected while releasing an archive.
    #[error("{} failures while closing archive: {}", .0.len(), join(.0))]
    Teardown(Vec<ZipError>),
}

/// Result type alias using [`ZipError`].
pub type Result<T> = std::result::Result<T, ZipError>;

impl ZipError {
    /// Create a [`ZipError::Format`] from a message.
    pub fn format(msg: impl Into<String>) -> Self {
        ZipError::Format(msg.into())
    }

    /// Whether this error says the archive itself is malformed.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            ZipError::Format(_)
                | ZipError::DuplicateEntry(_)
                | ZipError::RejectedName { .. }
                | ZipError::UnsupportedMethod(_)
                | ZipError::EncryptedEntry
        )
    }

    /// Fold a list of failures into one error, if there were any.
    pub(crate) fn aggregate(mut errors: Vec<ZipError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ZipError::Teardown(errors)),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => e,
            ZipError::Closed(_) => io::Error::other(err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

fn join(errors: &[ZipError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shorthand for returning a [`ZipError::Format`].
pub(crate) fn zerror<T>(msg: impl Into<String>) -> Result<T> {
    Err(ZipError::format(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_keeps_single_error_unwrapped() {
        let err = ZipError::aggregate(vec![ZipError::Closed("zip file closed")]).unwrap_err();
        assert!(matches!(err, ZipError::Closed(_)));
        assert!(ZipError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn aggregate_joins_multiple_errors() {
        let err = ZipError::aggregate(vec![
            ZipError::format("first"),
            ZipError::Io(io::Error::other("second")),
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("2 failures"));
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn io_errors_pass_through_verbatim() {
        let err: io::Error = ZipError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err: io::Error = ZipError::format("bad").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn classifies_format_family() {
        assert!(ZipError::DuplicateEntry("a".into()).is_format());
        assert!(ZipError::UnsupportedMethod(12).is_format());
        assert!(!ZipError::Closed("zip file closed").is_format());
        assert!(!ZipError::Io(io::Error::other("x")).is_format());
    }
}
