mod http;
mod local;
mod memory;

pub use http::HttpRangeSource;
pub use local::LocalFileSource;
pub use memory::MemorySource;

use std::io;

/// Random access to the bytes of an archive.
///
/// Implementations must make each call atomic with respect to other callers:
/// readers of different entries (and different handles sharing one index)
/// call into the same source concurrently.
pub trait RandomAccessSource: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning how many were read.
    /// Zero means `offset` is at or past the end of the source.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Fill `buf` completely from `offset` or fail with `UnexpectedEof`.
    fn read_fully_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of archive",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Release the underlying resource. Later reads fail.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn closed_source() -> io::Error {
    io::Error::other("archive source closed")
}
