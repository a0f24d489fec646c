//! Locating the End of Central Directory record.
//!
//! ZIP files are read from the end: the END record names the position and
//! size of the central directory. Two things make finding it less than
//! trivial:
//!
//! 1. The END record is followed by a comment of up to 65535 bytes, and the
//!    comment may itself contain the END signature.
//! 2. Some tools append bytes after the archive, so the declared comment
//!    length does not reach the end of the file.
//!
//! The scan walks backwards in small overlapping blocks. A candidate whose
//! comment length does not line up with the file size is only accepted when
//! the central directory and first local header it points at carry the
//! right signatures.

use tracing::{debug, warn};

use crate::error::{Result, ZipError, zerror};
use crate::io::RandomAccessSource;

use super::structures::*;

/// How many END candidates the scan verifies and rejects before giving up.
///
/// Only candidates whose central directory would lie inside the file count.
/// Signature bytes in a comment followed by out-of-range offsets are skipped
/// for free, but a comment holding more than this many plausible fake END
/// records makes the archive unreadable.
pub const MAX_END_CANDIDATES: usize = 32;

/// Where the central directory is, according to the END record (or the
/// Zip64 END record when one applies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndLocation {
    pub total: u64,
    pub cen_len: u64,
    pub cen_off: u64,
    /// Position of the END record, or of the Zip64 END record if used.
    pub end_pos: u64,
    pub comment: Option<Vec<u8>>,
}

/// Find and decode the END record of the archive in `source`.
pub fn locate_end(source: &dyn RandomAccessSource) -> Result<EndLocation> {
    let ziplen = i64::try_from(source.size())
        .map_err(|_| ZipError::format("zip file too large"))?;
    if ziplen <= 0 {
        return zerror("zip file is empty");
    }

    let mut buf = [0u8; READBLOCKSZ];
    let step = (READBLOCKSZ - ENDHDR) as i64;
    let min_hdr = (ziplen - END_MAXLEN as i64).max(0);
    let min_pos = min_hdr - step;
    let mut rejected = 0usize;

    let mut pos = ziplen - READBLOCKSZ as i64;
    while pos >= min_pos {
        // Pretend there are NUL bytes before the start of the file.
        let off = if pos < 0 { (-pos) as usize } else { 0 };
        buf[..off].fill(0);
        source.read_fully_at((pos + off as i64) as u64, &mut buf[off..])?;

        for i in (0..=READBLOCKSZ - ENDHDR).rev() {
            if signature(&buf[i..]) != ENDSIG {
                continue;
            }
            let end = EndRecord::from_bytes(&buf[i..i + ENDHDR])?;
            let end_pos = (pos + i as i64) as u64;
            let comment_len = u64::from(end.comment_len);

            if end_pos + ENDHDR as u64 + comment_len != ziplen as u64 {
                // impossible layouts cost no reads and are not counted
                let Some((cen_pos, loc_pos)) = candidate_layout(end_pos, &end) else {
                    continue;
                };
                if !verify_candidate(source, cen_pos, loc_pos) {
                    rejected += 1;
                    if rejected > MAX_END_CANDIDATES {
                        return zerror("zip END header not found (too many candidates)");
                    }
                    continue;
                }
                warn!(
                    end_pos,
                    comment_len,
                    file_len = ziplen,
                    "END comment length does not match file size, accepting verified record"
                );
            }

            let comment = if comment_len > 0 {
                let mut comment = vec![0u8; usize::from(end.comment_len)];
                source
                    .read_fully_at(end_pos + ENDHDR as u64, &mut comment)
                    .map_err(|_| ZipError::format("zip comment read failed"))?;
                Some(comment)
            } else {
                None
            };

            let location = EndLocation {
                total: u64::from(end.total_entries),
                cen_len: u64::from(end.cd_size),
                cen_off: u64::from(end.cd_offset),
                end_pos,
                comment,
            };
            return Ok(apply_zip64(source, location));
        }
        pos -= step;
    }

    zerror("zip END header not found")
}

/// Positions of the central directory and first local header an END
/// candidate points at, if they lie inside the file.
fn candidate_layout(end_pos: u64, end: &EndRecord) -> Option<(u64, u64)> {
    let cen_pos = end_pos.checked_sub(u64::from(end.cd_size))?;
    let loc_pos = cen_pos.checked_sub(u64::from(end.cd_offset))?;
    Some((cen_pos, loc_pos))
}

/// Check that the central directory and first local header of an END
/// candidate start with their signatures.
fn verify_candidate(source: &dyn RandomAccessSource, cen_pos: u64, loc_pos: u64) -> bool {
    signature_at(source, cen_pos) == Some(CENSIG) && signature_at(source, loc_pos) == Some(LOCSIG)
}

fn signature_at(source: &dyn RandomAccessSource, pos: u64) -> Option<u32> {
    let mut sig = [0u8; 4];
    source.read_fully_at(pos, &mut sig).ok()?;
    Some(signature(&sig))
}

/// Replace the END values with those of the Zip64 END record, when a Zip64
/// locator precedes the END record and agrees with it.
///
/// A Zip64 record is always permitted to be present; read failures while
/// probing for one mean there is none.
fn apply_zip64(source: &dyn RandomAccessSource, mut end: EndLocation) -> EndLocation {
    if end.end_pos < ZIP64_LOCHDR as u64 {
        return end;
    }
    let mut loc64 = [0u8; ZIP64_LOCHDR];
    if source
        .read_fully_at(end.end_pos - ZIP64_LOCHDR as u64, &mut loc64)
        .is_err()
    {
        return end;
    }
    let Ok(locator) = Zip64Locator::from_bytes(&loc64) else {
        return end;
    };

    let mut end64buf = [0u8; ZIP64_ENDHDR];
    if source
        .read_fully_at(locator.end64_offset, &mut end64buf)
        .is_err()
    {
        return end;
    }
    let Ok(end64) = Zip64EndRecord::from_bytes(&end64buf) else {
        return end;
    };

    if (end64.cd_size != end.cen_len && end.cen_len != ZIP64_MAGICVAL)
        || (end64.cd_offset != end.cen_off && end.cen_off != ZIP64_MAGICVAL)
        || (end64.total_entries != end.total && end.total != ZIP64_MAGICCOUNT)
    {
        debug!(
            end64_offset = locator.end64_offset,
            "zip64 END record disagrees with END record, ignoring it"
        );
        return end;
    }

    end.cen_len = end64.cd_size;
    end.cen_off = end64.cd_offset;
    end.total = end64.total_entries;
    end.end_pos = locator.end64_offset;
    end
}
