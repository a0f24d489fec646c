use flate2::{FlushDecompress, Status};
use std::io::{self, Read};
use std::sync::Arc;

use crate::error::{Result, ZipError};

use super::lifecycle::{ResourceLifecycle, StreamSlot};
use super::structures::{CompressionMethod, LOCHDR, LocHeader, Zip64Fields};

/// Upper bound of the compressed-input buffer of a deflated stream.
const INPUT_BUFFER_MAX: u64 = 64 * 1024;

/// Open a stream over the data of the entry whose CEN header is at `pos`.
///
/// Nothing is read from the archive until the first `read`.
pub(crate) fn open_entry(lifecycle: &Arc<ResourceLifecycle>, pos: usize) -> Result<EntryReader> {
    let index = lifecycle.index();
    let cen = index.header(pos);
    let fields = Zip64Fields::resolve(&cen)?;
    let method = CompressionMethod::from_u16(cen.method())
        .ok_or(ZipError::UnsupportedMethod(cen.method()))?;

    let (inflate, inflater) = match method {
        CompressionMethod::Stored => (None, None),
        CompressionMethod::Deflated => {
            let len = (fields.compressed_size + 2).min(INPUT_BUFFER_MAX) as usize;
            let state = InflateState {
                input: vec![0u8; len],
                start: 0,
                end: 0,
                finished: false,
            };
            (Some(state), Some(lifecycle.take_inflater()))
        }
    };
    let slot = lifecycle.register(inflater)?;

    Ok(EntryReader {
        slot,
        raw: RawCursor {
            loc_offset: index.loc_pos() + fields.local_header_offset,
            data_pos: None,
            remaining: fields.compressed_size,
            compressed_size: fields.compressed_size,
        },
        size: fields.size,
        inflate,
    })
}

/// Position within the compressed bytes of an entry.
struct RawCursor {
    /// Position of the local header, prefix stub included.
    loc_offset: u64,
    /// Position of the entry data, resolved on first read.
    data_pos: Option<u64>,
    /// Compressed bytes not yet read from the archive.
    remaining: u64,
    compressed_size: u64,
}

impl RawCursor {
    fn data_pos(&mut self, lifecycle: &ResourceLifecycle) -> Result<u64> {
        if let Some(pos) = self.data_pos {
            return Ok(pos);
        }
        let mut buf = [0u8; LOCHDR];
        lifecycle
            .index()
            .source()
            .read_fully_at(self.loc_offset, &mut buf)?;
        let pos = self.loc_offset + LocHeader::from_bytes(&buf)?.data_offset();
        self.data_pos = Some(pos);
        Ok(pos)
    }

    fn read(&mut self, lifecycle: &ResourceLifecycle, buf: &mut [u8]) -> Result<usize> {
        let len = (buf.len() as u64).min(self.remaining) as usize;
        if len == 0 {
            return Ok(0);
        }
        let offset = self.data_pos(lifecycle)? + (self.compressed_size - self.remaining);
        let n = lifecycle
            .index()
            .source()
            .read_at(offset, &mut buf[..len])?;
        if n == 0 {
            return Err(ZipError::Io(unexpected_eof()));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

struct InflateState {
    input: Vec<u8>,
    start: usize,
    end: usize,
    finished: bool,
}

/// A stream over the uncompressed data of one entry.
///
/// Readers of different entries are independent and may be used from
/// different threads. Closing the archive closes every reader it handed out;
/// reading from one afterwards fails.
pub struct EntryReader {
    slot: Arc<StreamSlot>,
    raw: RawCursor,
    size: u64,
    inflate: Option<InflateState>,
}

impl EntryReader {
    /// Uncompressed size of the entry.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn compressed_size(&self) -> u64 {
        self.raw.compressed_size
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Close the stream. Reading afterwards yields no more data.
    pub fn close(&mut self) {
        self.slot.close();
    }

    fn read_stored(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.slot.is_closed() {
            return Ok(0);
        }
        let n = self.raw.read(self.slot.owner(), buf)?;
        if self.raw.remaining == 0 {
            self.slot.close();
        }
        Ok(n)
    }

    fn read_deflated(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(state) = self.inflate.as_mut() else {
            return Ok(0);
        };
        if state.finished {
            return Ok(0);
        }
        if self.slot.is_closed() {
            return Err(stream_closed());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if state.start == state.end && self.raw.remaining > 0 {
                state.end = self.raw.read(self.slot.owner(), &mut state.input)?;
                state.start = 0;
            }

            let (status, consumed, produced) = {
                let mut guard = self.slot.inflater().lock();
                let inflater = guard.as_mut().ok_or_else(stream_closed)?;
                let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
                // never Finish: it requires all remaining output to fit in `buf`
                let status = inflater
                    .decompress(&state.input[state.start..state.end], buf, FlushDecompress::None)
                    .map_err(|e| ZipError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
                (
                    status,
                    (inflater.total_in() - in_before) as usize,
                    (inflater.total_out() - out_before) as usize,
                )
            };
            state.start += consumed;

            if status == Status::StreamEnd {
                state.finished = true;
                self.slot.close();
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if consumed == 0 {
                let exhausted = state.start == state.end && self.raw.remaining == 0;
                return Err(ZipError::Io(if exhausted {
                    unexpected_eof()
                } else {
                    io::Error::new(io::ErrorKind::InvalidData, "inflater made no progress")
                }));
            }
        }
    }
}

fn stream_closed() -> ZipError {
    ZipError::Io(io::Error::other("stream closed"))
}

fn unexpected_eof() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "unexpected end of ZLIB input stream",
    )
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.slot.owner().is_closed() {
            return Err(ZipError::Closed("zip file closed").into());
        }
        let n = if self.inflate.is_some() {
            self.read_deflated(buf)?
        } else {
            self.read_stored(buf)?
        };
        Ok(n)
    }
}

impl Drop for EntryReader {
    fn drop(&mut self) {
        self.slot.close();
    }
}
