use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, ZipError};

use super::archive::ZipFile;
use super::entry::ZipEntry;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Copies entries out of a [`ZipFile`], checking sizes and CRC-32 on the way.
pub struct ZipExtractor<'a> {
    zip: &'a ZipFile,
}

impl<'a> ZipExtractor<'a> {
    pub fn new(zip: &'a ZipFile) -> Self {
        Self { zip }
    }

    /// List all files in the archive
    pub fn list_files(&self) -> Result<Vec<ZipEntry>> {
        self.zip.entries()?.collect()
    }

    /// Copy the data of `entry` to `out`, returning the number of bytes.
    ///
    /// Fails with [`ZipError::CrcMismatch`] if the data read does not match
    /// the checksum recorded in the central directory.
    pub fn extract_to_writer<W: Write>(&self, entry: &ZipEntry, out: &mut W) -> Result<u64> {
        let mut reader = self.zip.input_stream(entry)?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let n = reader.read(&mut buf).map_err(unwrap_io)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])?;
            written += n as u64;
        }

        if written != entry.size {
            return Err(ZipError::format(format!(
                "invalid entry size (expected {} but got {written} bytes) for {}",
                entry.size, entry.name
            )));
        }
        let computed = hasher.finalize();
        if computed != entry.crc32 {
            return Err(ZipError::CrcMismatch {
                name: entry.name.clone(),
                expected: entry.crc32,
                computed,
            });
        }
        Ok(written)
    }

    /// Read `entry` completely, discarding the data.
    pub fn verify_entry(&self, entry: &ZipEntry) -> Result<()> {
        self.extract_to_writer(entry, &mut io::sink())?;
        Ok(())
    }

    /// Extract file to disk
    pub fn extract_to_file(&self, entry: &ZipEntry, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = io::BufWriter::new(fs::File::create(output_path)?);
        let written = self.extract_to_writer(entry, &mut file)?;
        file.flush()?;
        debug!(entry = %entry.name, path = %output_path.display(), written, "extracted entry");
        Ok(())
    }

    /// Extract file to stdout
    pub fn extract_to_stdout(&self, entry: &ZipEntry) -> Result<()> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        self.extract_to_writer(entry, &mut lock)?;
        lock.flush()?;
        Ok(())
    }
}

/// Recover the typed error from an `io::Error` produced by [`EntryReader`].
///
/// [`EntryReader`]: super::EntryReader
fn unwrap_io(err: io::Error) -> ZipError {
    if err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
        if let Some(inner) = err.into_inner() {
            if let Ok(zip_err) = inner.downcast::<ZipError>() {
                return *zip_err;
            }
        }
        return ZipError::format("stream error");
    }
    ZipError::Io(err)
}
