use crate::error::{Result, ZipError};

use super::index::CentralDirectory;
use super::structures::{CompressionMethod, FILE_ATTRIBUTES_UNIX, Zip64Fields};

/// Metadata of one archive member, decoded from its central directory
/// header.
///
/// Entries are values: looking the same member up twice yields two equal
/// entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    /// General purpose bit flag.
    pub flag: u16,
    /// DOS time in the low 16 bits, DOS date in the high 16 bits.
    pub dos_time: u32,
    pub crc32: u32,
    pub compressed_size: u64,
    pub size: u64,
    pub method: CompressionMethod,
    /// Unix permission bits, when the entry was made on a Unix host.
    pub extra_attributes: Option<u16>,
    pub extra: Vec<u8>,
    pub comment: Option<String>,
}

impl ZipEntry {
    /// Decode the entry whose header starts at `pos` in the CEN buffer.
    pub(crate) fn from_cen(index: &CentralDirectory, pos: usize) -> Result<Self> {
        let cen = index.header(pos);
        let charset = index.charset_for(pos);
        let sizes = Zip64Fields::resolve(&cen)?;

        let method = CompressionMethod::from_u16(cen.method())
            .ok_or(ZipError::UnsupportedMethod(cen.method()))?;
        let unix_host = (cen.version_made_by() >> 8) as u8 == FILE_ATTRIBUTES_UNIX;
        let extra_attributes = unix_host.then(|| cen.external_attrs_high());
        let comment = (cen.comment_len() > 0)
            .then(|| charset.decode_without_bom_handling(cen.comment()).0.into_owned());

        Ok(Self {
            name: index.entry_name(pos).into_owned(),
            flag: cen.flag(),
            dos_time: cen.dos_time(),
            crc32: cen.crc32(),
            compressed_size: sizes.compressed_size,
            size: sizes.size,
            method,
            extra_attributes,
            extra: cen.extra().to_vec(),
            comment,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let date = (self.dos_time >> 16) as u16;
        let day = (date & 0x1F) as u8;
        let month = ((date >> 5) & 0x0F) as u8;
        let year = ((date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let time = self.dos_time as u16;
        let second = ((time & 0x1F) * 2) as u8;
        let minute = ((time >> 5) & 0x3F) as u8;
        let hour = ((time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, dos_time: u32) -> ZipEntry {
        ZipEntry {
            name: name.to_string(),
            flag: 0,
            dos_time,
            crc32: 0,
            compressed_size: 0,
            size: 0,
            method: CompressionMethod::Stored,
            extra_attributes: None,
            extra: Vec::new(),
            comment: None,
        }
    }

    #[test]
    fn dos_timestamp_fields() {
        // 2024-03-15 13:45:30
        let date: u32 = ((2024 - 1980) << 9) | (3 << 5) | 15;
        let time: u32 = (13 << 11) | (45 << 5) | (30 / 2);
        let e = entry("a.txt", (date << 16) | time);
        assert_eq!(e.mod_date(), (2024, 3, 15));
        assert_eq!(e.mod_time(), (13, 45, 30));
    }

    #[test]
    fn directories_end_with_slash() {
        assert!(entry("dir/", 0).is_directory());
        assert!(!entry("dir", 0).is_directory());
    }
}
