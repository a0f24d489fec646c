//! Hand-rolled ZIP writer for building test archives, including broken ones.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use zipindex::{MemorySource, RandomAccessSource};

pub const LOCSIG: u32 = 0x0403_4b50;
pub const CENSIG: u32 = 0x0201_4b50;
pub const ENDSIG: u32 = 0x0605_4b50;

pub struct TestEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub deflate: bool,
    pub flag: u16,
    pub method: Option<u16>,
    pub comment: Vec<u8>,
    pub unix_mode: Option<u16>,
    /// Escape all sizes and the offset into a Zip64 extra field.
    pub zip64: bool,
    /// Keep only this many bytes of the stored payload.
    pub cut_payload: Option<usize>,
}

impl TestEntry {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
            deflate: false,
            flag: 0,
            method: None,
            comment: Vec::new(),
            unix_mode: None,
            zip64: false,
            cut_payload: None,
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            deflate: true,
            ..Self::stored(name, data)
        }
    }

    pub fn dir(name: &str) -> Self {
        Self::stored(name, b"")
    }

    pub fn raw_name(name: &[u8]) -> Self {
        Self {
            name: name.to_vec(),
            ..Self::stored("", b"")
        }
    }

    pub fn flag(mut self, flag: u16) -> Self {
        self.flag = flag;
        self
    }

    pub fn method(mut self, method: u16) -> Self {
        self.method = Some(method);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    pub fn unix_mode(mut self, mode: u16) -> Self {
        self.unix_mode = Some(mode);
        self
    }

    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// Drop the tail of the (compressed) payload, sizes adjusted to match.
    pub fn cut_payload(mut self, keep: usize) -> Self {
        self.cut_payload = Some(keep);
        self
    }
}

#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<TestEntry>,
    prefix: Vec<u8>,
    comment: Vec<u8>,
    trailing: Vec<u8>,
    declared_total: Option<u16>,
    truncate_end: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Bytes before the first local header, like a self-extractor stub.
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Junk after the END record, not covered by the comment length.
    pub fn trailing(mut self, junk: &[u8]) -> Self {
        self.trailing = junk.to_vec();
        self
    }

    /// Override the entry count written to the END record.
    pub fn declared_total(mut self, total: u16) -> Self {
        self.declared_total = Some(total);
        self
    }

    /// Cut the END record short.
    pub fn truncate_end(mut self) -> Self {
        self.truncate_end = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        let base = self.prefix.len();
        let mut cen = Vec::new();

        for e in &self.entries {
            let mut payload = if e.deflate {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(&e.data).unwrap();
                enc.finish().unwrap()
            } else {
                e.data.clone()
            };
            if let Some(keep) = e.cut_payload {
                payload.truncate(keep);
            }
            let method = e.method.unwrap_or(if e.deflate { 8 } else { 0 });
            let crc = crc32fast::hash(&e.data);
            // offsets are relative to the start of the archive proper
            let offset = (out.len() - base) as u64;

            let mut zip64_extra = Vec::new();
            if e.zip64 {
                zip64_extra.extend_from_slice(&1u16.to_le_bytes());
                zip64_extra.extend_from_slice(&24u16.to_le_bytes());
                zip64_extra.extend_from_slice(&(e.data.len() as u64).to_le_bytes());
                zip64_extra.extend_from_slice(&(payload.len() as u64).to_le_bytes());
                zip64_extra.extend_from_slice(&offset.to_le_bytes());
            }
            let (csize, size, cen_offset) = if e.zip64 {
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (payload.len() as u32, e.data.len() as u32, offset as u32)
            };
            let dos_time: u32 = ((44 << 9 | 3 << 5 | 15) << 16) | (13 << 11 | 45 << 5 | 15);

            put_u32(&mut out, LOCSIG);
            put_u16(&mut out, 20);
            put_u16(&mut out, e.flag);
            put_u16(&mut out, method);
            put_u32(&mut out, dos_time);
            put_u32(&mut out, crc);
            put_u32(&mut out, payload.len() as u32);
            put_u32(&mut out, e.data.len() as u32);
            put_u16(&mut out, e.name.len() as u16);
            // a local extra field of a different size than the central one
            put_u16(&mut out, 4);
            out.extend_from_slice(&e.name);
            out.extend_from_slice(&[0xFE, 0xCA, 0, 0]);
            out.extend_from_slice(&payload);

            let made_by: u16 = if e.unix_mode.is_some() { 3 << 8 | 20 } else { 20 };
            put_u32(&mut cen, CENSIG);
            put_u16(&mut cen, made_by);
            put_u16(&mut cen, 20);
            put_u16(&mut cen, e.flag);
            put_u16(&mut cen, method);
            put_u32(&mut cen, dos_time);
            put_u32(&mut cen, crc);
            put_u32(&mut cen, csize);
            put_u32(&mut cen, size);
            put_u16(&mut cen, e.name.len() as u16);
            put_u16(&mut cen, zip64_extra.len() as u16);
            put_u16(&mut cen, e.comment.len() as u16);
            put_u16(&mut cen, 0);
            put_u16(&mut cen, 0);
            put_u32(&mut cen, u32::from(e.unix_mode.unwrap_or(0)) << 16);
            put_u32(&mut cen, cen_offset);
            cen.extend_from_slice(&e.name);
            cen.extend_from_slice(&zip64_extra);
            cen.extend_from_slice(&e.comment);
        }

        let cen_offset = out.len() - base;
        out.extend_from_slice(&cen);

        let total = self
            .declared_total
            .unwrap_or(self.entries.len().min(0xFFFF) as u16);
        let mut end = Vec::new();
        put_u32(&mut end, ENDSIG);
        put_u16(&mut end, 0);
        put_u16(&mut end, 0);
        put_u16(&mut end, total);
        put_u16(&mut end, total);
        put_u32(&mut end, cen.len() as u32);
        put_u32(&mut end, cen_offset as u32);
        put_u16(&mut end, self.comment.len() as u16);
        if self.truncate_end {
            end.truncate(12);
        }
        out.extend_from_slice(&end);
        if !self.truncate_end {
            out.extend_from_slice(&self.comment);
        }
        out.extend_from_slice(&self.trailing);
        out
    }

    /// Build the archive into a file inside a fresh temporary directory.
    pub fn write(self) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zip");
        std::fs::write(&path, self.build()).unwrap();
        (dir, path)
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// The three-entry archive used throughout: a stored file, a deflated file
/// and an empty directory.
pub fn sample() -> ZipBuilder {
    ZipBuilder::new()
        .entry(TestEntry::stored("a.txt", b"data"))
        .entry(TestEntry::deflated("b.txt", &[b'x'; 1000]))
        .entry(TestEntry::dir("dir/"))
}

/// An in-memory source that counts how often it is closed.
pub struct CountingSource {
    inner: MemorySource,
    closes: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(bytes: Vec<u8>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(Self {
            inner: MemorySource::new(bytes),
            closes: Arc::clone(&closes),
        });
        (source, closes)
    }
}

impl RandomAccessSource for CountingSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
