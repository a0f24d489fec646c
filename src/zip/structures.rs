use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, zerror};

/// ZIP compression methods this reader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            STORED => Some(CompressionMethod::Stored),
            DEFLATED => Some(CompressionMethod::Deflated),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => STORED,
            CompressionMethod::Deflated => DEFLATED,
        }
    }
}

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;

pub const LOCSIG: u32 = 0x0403_4b50;
pub const CENSIG: u32 = 0x0201_4b50;
pub const ENDSIG: u32 = 0x0605_4b50;
pub const ZIP64_ENDSIG: u32 = 0x0606_4b50;
pub const ZIP64_LOCSIG: u32 = 0x0706_4b50;

pub const LOCHDR: usize = 30;
pub const CENHDR: usize = 46;
pub const ENDHDR: usize = 22;
pub const ZIP64_ENDHDR: usize = 56;
pub const ZIP64_LOCHDR: usize = 20;

/// Block size of the backward END scan.
pub const READBLOCKSZ: usize = 128;
/// Longest possible END record: header plus a maximal comment.
pub const END_MAXLEN: u64 = 0xFFFF + ENDHDR as u64;

pub const ZIP64_MAGICVAL: u64 = 0xFFFF_FFFF;
pub const ZIP64_MAGICCOUNT: u64 = 0xFFFF;
pub const EXTID_ZIP64: u16 = 0x0001;

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Host system value of "version made by" for Unix.
pub const FILE_ATTRIBUTES_UNIX: u8 = 3;

/// Read a little-endian u32 signature from the start of `buf`.
pub fn signature(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(buf)
}

/// End of Central Directory (END) - 22 bytes minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRecord {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndRecord {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ENDHDR || signature(data) != ENDSIG {
            return zerror("invalid END header");
        }

        let mut cursor = Cursor::new(&data[4..ENDHDR]);
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Locator {
    pub disk_with_end64: u32,
    pub end64_offset: u64,
    pub total_disks: u32,
}

impl Zip64Locator {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ZIP64_LOCHDR || signature(data) != ZIP64_LOCSIG {
            return zerror("invalid zip64 END locator");
        }

        let mut cursor = Cursor::new(&data[4..ZIP64_LOCHDR]);
        Ok(Self {
            disk_with_end64: cursor.read_u32::<LittleEndian>()?,
            end64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndRecord {
    pub end64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndRecord {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ZIP64_ENDHDR || signature(data) != ZIP64_ENDSIG {
            return zerror("invalid zip64 END header");
        }

        let mut cursor = Cursor::new(&data[4..ZIP64_ENDHDR]);
        Ok(Self {
            end64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// A view of one central directory header inside the CEN buffer.
///
/// Callers must have checked that `pos + CENHDR` lies within `buf`; the
/// variable-length trailers are only in bounds once the whole directory has
/// been validated.
#[derive(Debug, Clone, Copy)]
pub struct CenHeader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CenHeader<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn u16_at(&self, off: usize) -> u16 {
        LittleEndian::read_u16(&self.buf[self.pos + off..])
    }

    fn u32_at(&self, off: usize) -> u32 {
        LittleEndian::read_u32(&self.buf[self.pos + off..])
    }

    pub fn signature(&self) -> u32 {
        self.u32_at(0)
    }

    pub fn version_made_by(&self) -> u16 {
        self.u16_at(4)
    }

    pub fn flag(&self) -> u16 {
        self.u16_at(8)
    }

    pub fn method(&self) -> u16 {
        self.u16_at(10)
    }

    /// DOS time in the low half, DOS date in the high half.
    pub fn dos_time(&self) -> u32 {
        self.u32_at(12)
    }

    pub fn crc32(&self) -> u32 {
        self.u32_at(16)
    }

    pub fn compressed_size(&self) -> u64 {
        u64::from(self.u32_at(20))
    }

    pub fn size(&self) -> u64 {
        u64::from(self.u32_at(24))
    }

    pub fn name_len(&self) -> usize {
        usize::from(self.u16_at(28))
    }

    pub fn extra_len(&self) -> usize {
        usize::from(self.u16_at(30))
    }

    pub fn comment_len(&self) -> usize {
        usize::from(self.u16_at(32))
    }

    /// High 16 bits of the external attributes (Unix mode on Unix hosts).
    pub fn external_attrs_high(&self) -> u16 {
        self.u16_at(40)
    }

    pub fn local_header_offset(&self) -> u64 {
        u64::from(self.u32_at(42))
    }

    pub fn name(&self) -> &'a [u8] {
        let start = self.pos + CENHDR;
        &self.buf[start..start + self.name_len()]
    }

    pub fn extra(&self) -> &'a [u8] {
        let start = self.pos + CENHDR + self.name_len();
        &self.buf[start..start + self.extra_len()]
    }

    pub fn comment(&self) -> &'a [u8] {
        let start = self.pos + CENHDR + self.name_len() + self.extra_len();
        &self.buf[start..start + self.comment_len()]
    }

    /// Position of the header that follows this one.
    pub fn next_pos(&self) -> usize {
        self.pos + CENHDR + self.name_len() + self.extra_len() + self.comment_len()
    }
}

/// The fields of a local file header needed to find the entry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocHeader {
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LOCHDR || signature(data) != LOCSIG {
            return zerror("invalid LOC header (bad signature)");
        }
        Ok(Self {
            name_len: LittleEndian::read_u16(&data[26..]),
            extra_len: LittleEndian::read_u16(&data[28..]),
        })
    }

    /// Bytes from the start of the local header to the entry data.
    pub fn data_offset(&self) -> u64 {
        LOCHDR as u64 + u64::from(self.name_len) + u64::from(self.extra_len)
    }
}

/// Sizes and offset of an entry after Zip64 escapes are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Fields {
    pub size: u64,
    pub compressed_size: u64,
    pub local_header_offset: u64,
}

impl Zip64Fields {
    /// Resolve the 32-bit escapes of `cen` from its Zip64 extra field.
    ///
    /// Only the escaped fields are present in the extra data, in the order
    /// uncompressed size, compressed size, local header offset.
    pub fn resolve(cen: &CenHeader<'_>) -> Result<Self> {
        let mut fields = Self {
            size: cen.size(),
            compressed_size: cen.compressed_size(),
            local_header_offset: cen.local_header_offset(),
        };
        let wanted = [
            fields.size == ZIP64_MAGICVAL,
            fields.compressed_size == ZIP64_MAGICVAL,
            fields.local_header_offset == ZIP64_MAGICVAL,
        ];
        if !wanted.iter().any(|w| *w) {
            return Ok(fields);
        }

        let Some(data) = find_extra(cen.extra(), EXTID_ZIP64) else {
            return zerror("invalid zip64 extra data (missing zip64 field)");
        };
        let mut off = 0;
        let mut next = || -> Result<u64> {
            if off + 8 > data.len() {
                return zerror("invalid zip64 extra data (field too short)");
            }
            let value = LittleEndian::read_u64(&data[off..]);
            off += 8;
            Ok(value)
        };
        if wanted[0] {
            fields.size = next()?;
        }
        if wanted[1] {
            fields.compressed_size = next()?;
        }
        if wanted[2] {
            fields.local_header_offset = next()?;
        }
        Ok(fields)
    }
}

/// Find the data block of extra field `id`, if present and well formed.
pub fn find_extra(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut off = 0;
    while off + 4 <= extra.len() {
        let tag = LittleEndian::read_u16(&extra[off..]);
        let sz = usize::from(LittleEndian::read_u16(&extra[off + 2..]));
        off += 4;
        if off + sz > extra.len() {
            return None;
        }
        if tag == id {
            return Some(&extra[off..off + sz]);
        }
        off += sz;
    }
    None
}
