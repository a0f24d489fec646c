use parking_lot::Mutex;
use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use super::{RandomAccessSource, closed_source};

/// Local file with random access support.
///
/// Every read is a `seek` followed by a `read` under one lock, so concurrent
/// readers never observe each other's file position.
pub struct LocalFileSource {
    file: Mutex<Option<File>>,
    size: u64,
}

impl LocalFileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(Some(file)),
            size,
        })
    }

    /// Metadata of the open file, as seen through the handle.
    pub fn metadata(&self) -> io::Result<Metadata> {
        match self.file.lock().as_ref() {
            Some(file) => file.metadata(),
            None => Err(closed_source()),
        }
    }
}

impl RandomAccessSource for LocalFileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(closed_source)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn read_fully_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(closed_source)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&self) -> io::Result<()> {
        // Dropping the handle closes the descriptor.
        self.file.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_at_offsets_and_refuses_after_close() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let source = LocalFileSource::open(tmp.path()).unwrap();
        assert_eq!(source.size(), 10);

        let mut buf = [0u8; 4];
        source.read_fully_at(3, &mut buf).unwrap();
        assert_eq!(&buf, b"3456");

        let mut tail = [0u8; 8];
        let n = source.read_at(6, &mut tail).unwrap();
        assert_eq!(&tail[..n], b"6789");

        let err = source.read_fully_at(8, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        source.close().unwrap();
        assert!(source.read_at(0, &mut buf).is_err());
        assert!(source.metadata().is_err());
        // closing twice is harmless
        source.close().unwrap();
    }
}
