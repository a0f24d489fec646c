//! The parsed central directory of one archive.
//!
//! The whole central directory is read into memory once. Instead of keeping
//! a decoded entry per member, the index remembers three `u32`s per entry in
//! one flat vector: the hash of the entry name, the index of the next entry
//! in the same hash chain, and the offset of the entry's header in the CEN
//! buffer. Names, sizes and everything else are decoded from the buffer on
//! demand.

use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, ZipError, zerror};
use crate::io::{LocalFileSource, RandomAccessSource};

use super::end::locate_end;
use super::options::{NameValidator, OpenOptions};
use super::registry::ArchiveIdentity;
use super::structures::*;

/// Terminates a hash chain; also marks an empty bucket.
const END_CHAIN: u32 = u32::MAX;

/// "META-INF/".len()
const META_INF_LEN: usize = 9;

/// Hash of an entry name, computed as if the name ended with `/`.
///
/// Folding in the slash puts `dir` and `dir/` in the same chain, which lets
/// a lookup for `dir` find the directory entry `dir/`.
pub fn name_hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut h = bytes
        .iter()
        .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    if bytes.last().is_some_and(|&b| b != b'/') {
        h = h.wrapping_mul(31).wrapping_add(u32::from(b'/'));
    }
    h
}

/// A fully validated central directory.
pub struct CentralDirectory {
    name: String,
    identity: Option<ArchiveIdentity>,
    source: Arc<dyn RandomAccessSource>,
    charset: &'static Encoding,
    /// CEN headers followed by the END header bytes.
    cen: Vec<u8>,
    /// Position of the first local header (length of any prefix stub).
    loc_pos: u64,
    comment: Option<Vec<u8>>,
    starts_with_loc: bool,
    tables: Tables,
}

/// Hash index and META-INF classification built from the CEN buffer.
#[derive(Debug, Default)]
struct Tables {
    total: usize,
    /// `(hash, next, pos)` for each entry, in central directory order.
    entries: Vec<u32>,
    /// Chain heads: indexes into `entries`.
    table: Vec<u32>,
    manifest_pos: Option<usize>,
    manifest_count: usize,
    signature_positions: Vec<usize>,
    meta_versions: Vec<u32>,
}

impl CentralDirectory {
    /// Open the file at `path` and index it.
    pub(crate) fn open_path(
        path: &Path,
        options: &OpenOptions,
        identity: Option<ArchiveIdentity>,
    ) -> Result<Self> {
        let source = LocalFileSource::open(path)?;
        if options.delete_on_open {
            std::fs::remove_file(path)?;
        }
        Self::from_source(
            Arc::new(source),
            path.display().to_string(),
            options,
            identity,
        )
    }

    /// Index the archive in `source`. On failure the source is closed.
    pub(crate) fn from_source(
        source: Arc<dyn RandomAccessSource>,
        name: String,
        options: &OpenOptions,
        identity: Option<ArchiveIdentity>,
    ) -> Result<Self> {
        match Self::read(source.clone(), name, options, identity) {
            Ok(index) => Ok(index),
            Err(e) => {
                if let Err(close_err) = source.close() {
                    debug!(error = %close_err, "closing source after failed open");
                }
                Err(e)
            }
        }
    }

    fn read(
        source: Arc<dyn RandomAccessSource>,
        name: String,
        options: &OpenOptions,
        identity: Option<ArchiveIdentity>,
    ) -> Result<Self> {
        let end = locate_end(source.as_ref())?;
        let charset = options.charset;

        let (cen, loc_pos, tables) = if end.end_pos == 0 {
            // only the END header is present
            let tables = Tables {
                table: vec![END_CHAIN],
                ..Tables::default()
            };
            (Vec::new(), 0, tables)
        } else {
            if end.cen_len > end.end_pos {
                return zerror("invalid END header (bad central directory size)");
            }
            let cen_pos = end.end_pos - end.cen_len;
            let Some(loc_pos) = cen_pos.checked_sub(end.cen_off) else {
                return zerror("invalid END header (bad central directory offset)");
            };
            let cen_len = usize::try_from(end.cen_len + ENDHDR as u64)
                .ok()
                .filter(|len| *len < END_CHAIN as usize)
                .ok_or_else(|| ZipError::format("central directory too large"))?;
            let mut cen = vec![0u8; cen_len];
            source.read_fully_at(cen_pos, &mut cen)?;

            let declared = usize::try_from(end.total).unwrap_or(usize::MAX);
            let tables = build_tables(&cen, declared, charset, options.validator.as_deref())?;
            (cen, loc_pos, tables)
        };

        let mut head = [0u8; 4];
        source.read_fully_at(0, &mut head)?;
        let starts_with_loc = signature(&head) == LOCSIG;

        debug!(
            archive = %name,
            total = tables.total,
            cen_len = cen.len(),
            loc_pos,
            "indexed central directory"
        );

        Ok(Self {
            name,
            identity,
            source,
            charset,
            cen,
            loc_pos,
            comment: end.comment,
            starts_with_loc,
            tables,
        })
    }

    /// Display name of the archive (its path or URL).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> Option<&ArchiveIdentity> {
        self.identity.as_ref()
    }

    /// Number of entries.
    pub fn total(&self) -> usize {
        self.tables.total
    }

    /// Raw bytes of the archive comment.
    pub fn comment_bytes(&self) -> Option<&[u8]> {
        self.comment.as_deref()
    }

    pub(crate) fn comment(&self) -> Option<String> {
        self.comment
            .as_deref()
            .map(|c| self.charset.decode_without_bom_handling(c).0.into_owned())
    }

    pub(crate) fn source(&self) -> &Arc<dyn RandomAccessSource> {
        &self.source
    }

    pub(crate) fn loc_pos(&self) -> u64 {
        self.loc_pos
    }

    pub(crate) fn starts_with_loc(&self) -> bool {
        self.starts_with_loc
    }

    pub(crate) fn header(&self, pos: usize) -> CenHeader<'_> {
        CenHeader::new(&self.cen, pos)
    }

    /// CEN position of the `index`-th entry in central directory order.
    pub(crate) fn position(&self, index: usize) -> usize {
        self.tables.entries[index * 3 + 2] as usize
    }

    /// Charset used to decode the name and comment of the entry at `pos`.
    pub(crate) fn charset_for(&self, pos: usize) -> &'static Encoding {
        charset_for_flag(self.charset, self.header(pos).flag())
    }

    /// Decoded name of the entry at `pos`.
    pub(crate) fn entry_name(&self, pos: usize) -> Cow<'_, str> {
        self.charset_for(pos)
            .decode_without_bom_handling(self.header(pos).name())
            .0
    }

    /// CEN position of the entry called `name`.
    ///
    /// With `add_slash`, a directory entry `name/` is returned when there is
    /// no exact match.
    pub(crate) fn find(&self, name: &str, add_slash: bool) -> Option<usize> {
        if self.tables.total == 0 {
            return None;
        }

        let hash = name_hash(name);
        let tables = &self.tables;
        let mut idx = tables.table[(hash % tables.table.len() as u32) as usize];
        let mut slash_match = None;

        while idx != END_CHAIN {
            let i = idx as usize;
            if tables.entries[i] == hash {
                let pos = tables.entries[i + 2] as usize;
                let entry = self.entry_name(pos);
                if entry == name {
                    return Some(pos);
                }
                if add_slash
                    && slash_match.is_none()
                    && !name.is_empty()
                    && entry.len() == name.len() + 1
                    && entry.starts_with(name)
                    && entry.ends_with('/')
                {
                    slash_match = Some(pos);
                }
            }
            idx = tables.entries[i + 1];
        }
        slash_match
    }

    pub(crate) fn manifest_pos(&self) -> Option<usize> {
        self.tables.manifest_pos
    }

    pub(crate) fn manifest_count(&self) -> usize {
        self.tables.manifest_count
    }

    pub(crate) fn signature_positions(&self) -> &[usize] {
        &self.tables.signature_positions
    }

    pub(crate) fn meta_versions(&self) -> &[u32] {
        &self.tables.meta_versions
    }

    /// Release the underlying source.
    pub(crate) fn close(&self) -> Result<()> {
        debug!(archive = %self.name, "closing archive source");
        self.source.close()?;
        Ok(())
    }
}

impl fmt::Debug for CentralDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralDirectory")
            .field("name", &self.name)
            .field("total", &self.tables.total)
            .field("cen_len", &self.cen.len())
            .field("loc_pos", &self.loc_pos)
            .finish_non_exhaustive()
    }
}

fn charset_for_flag(charset: &'static Encoding, flag: u16) -> &'static Encoding {
    if flag & FLAG_UTF8 != 0 { UTF_8 } else { charset }
}

/// Build the hash index, recounting the entries once if the END record
/// under-reports them (more than 65535 entries without Zip64).
fn build_tables(
    cen: &[u8],
    declared: usize,
    charset: &'static Encoding,
    validator: Option<&dyn NameValidator>,
) -> Result<Tables> {
    if let Some(tables) = scan(cen, declared, charset, validator)? {
        return Ok(tables);
    }
    let counted = count_cen_headers(cen, cen.len() - ENDHDR);
    debug!(declared, counted, "central directory holds more entries than declared");
    scan(cen, counted, charset, validator)?
        .ok_or_else(|| ZipError::format("invalid END header (bad entry count)"))
}

/// One validating pass over the CEN. `None` means more headers than `total`.
fn scan(
    cen: &[u8],
    total: usize,
    charset: &'static Encoding,
    validator: Option<&dyn NameValidator>,
) -> Result<Option<Tables>> {
    let limit = cen.len() - ENDHDR;
    // No more headers than fit in the buffer, whatever the END record says.
    let capacity = total.min(limit / CENHDR);
    let entries_len = capacity * 3;
    let table_len = (capacity / 2) | 1;

    let mut entries = vec![0u32; entries_len];
    let mut table = vec![END_CHAIN; table_len];
    let mut names: HashSet<String> = HashSet::with_capacity(capacity);
    let mut manifest_pos = None;
    let mut manifest_count = 0;
    let mut signature_positions = Vec::new();
    let mut versions = BTreeSet::new();

    let mut idx = 0;
    let mut pos = 0;
    while pos + CENHDR <= limit {
        if idx >= entries_len {
            return Ok(None);
        }

        let header = CenHeader::new(cen, pos);
        if header.signature() != CENSIG {
            return zerror("invalid CEN header (bad signature)");
        }
        if header.flag() & FLAG_ENCRYPTED != 0 {
            return Err(ZipError::EncryptedEntry);
        }
        let method = header.method();
        if CompressionMethod::from_u16(method).is_none() {
            return Err(ZipError::UnsupportedMethod(method));
        }
        let nlen = header.name_len();
        if pos + CENHDR + nlen > limit {
            return zerror("invalid CEN header (bad header size)");
        }

        let raw_name = header.name();
        let name = charset_for_flag(charset, header.flag())
            .decode_without_bom_handling_and_without_replacement(raw_name)
            .ok_or_else(|| ZipError::format("invalid CEN header (bad entry name)"))?
            .into_owned();
        if names.contains(&name) {
            return Err(ZipError::DuplicateEntry(name));
        }
        if raw_name.contains(&0) {
            return zerror(format!("Filename contains NUL byte: {name}"));
        }
        if let Some(validator) = validator {
            validator
                .validate(&name)
                .map_err(|reason| ZipError::RejectedName {
                    name: name.clone(),
                    reason,
                })?;
        }

        let hash = name_hash(&name);
        let bucket = (hash % table_len as u32) as usize;
        entries[idx] = hash;
        entries[idx + 1] = table[bucket];
        entries[idx + 2] = pos as u32;
        table[bucket] = idx as u32;
        idx += 3;

        if is_meta_name(raw_name) {
            let rest = &raw_name[META_INF_LEN..];
            if is_manifest_name(rest) {
                manifest_pos = Some(pos);
                manifest_count += 1;
            } else {
                if is_signature_related(raw_name) {
                    signature_positions.push(pos);
                }
                if let Some(version) = meta_version(rest) {
                    versions.insert(version);
                }
            }
        }

        names.insert(name);
        pos = header.next_pos();
    }

    if pos + ENDHDR != cen.len() {
        return zerror("invalid CEN header (bad header size)");
    }

    entries.truncate(idx);
    Ok(Some(Tables {
        total: idx / 3,
        entries,
        table,
        manifest_pos,
        manifest_count,
        signature_positions,
        meta_versions: versions.into_iter().collect(),
    }))
}

/// Number of CEN headers in `cen[..limit]`, following the length fields
/// without validating anything. Never fails, even on a corrupt directory.
fn count_cen_headers(cen: &[u8], limit: usize) -> usize {
    let mut count = 0;
    let mut pos = 0;
    while pos + CENHDR <= limit {
        count += 1;
        pos = CenHeader::new(cen, pos).next_pos();
    }
    count
}

/// Non-directory name starting with `META-INF/`, ignoring ASCII case.
fn is_meta_name(name: &[u8]) -> bool {
    name.len() > META_INF_LEN
        && name[name.len() - 1] != b'/'
        && name[..META_INF_LEN].eq_ignore_ascii_case(b"META-INF/")
}

fn is_manifest_name(rest: &[u8]) -> bool {
    rest.eq_ignore_ascii_case(b"MANIFEST.MF")
}

/// Signature files and signature blocks: `.SF`, `.EC`, `.RSA`, `.DSA`.
fn is_signature_related(name: &[u8]) -> bool {
    [&b".SF"[..], b".EC", b".RSA", b".DSA"].iter().any(|suffix| {
        name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    })
}

/// The version of a non-directory `versions/<n>/...` name under META-INF.
///
/// Zero, leading zeros, non-digits and values beyond `i32::MAX` are not
/// versions.
fn meta_version(rest: &[u8]) -> Option<u32> {
    const VERSIONS: &[u8] = b"versions/";
    if rest.len() <= VERSIONS.len() + 1
        || rest[rest.len() - 1] == b'/'
        || !rest[..VERSIONS.len()].eq_ignore_ascii_case(VERSIONS)
    {
        return None;
    }

    let mut version: i32 = 0;
    for &c in &rest[VERSIONS.len()..] {
        if c == b'/' {
            return u32::try_from(version).ok().filter(|v| *v > 0);
        }
        if !c.is_ascii_digit() {
            return None;
        }
        version = version.checked_mul(10)?.checked_add(i32::from(c - b'0'))?;
        if version <= 0 {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    struct Cen {
        name: Vec<u8>,
        flag: u16,
        method: u16,
    }

    fn cen(name: &str) -> Cen {
        Cen {
            name: name.as_bytes().to_vec(),
            flag: 0,
            method: 0,
        }
    }

    fn directory(entries: &[Cen], declared: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        for e in entries {
            let mut h = vec![0u8; CENHDR];
            LittleEndian::write_u32(&mut h[0..], CENSIG);
            LittleEndian::write_u16(&mut h[8..], e.flag);
            LittleEndian::write_u16(&mut h[10..], e.method);
            LittleEndian::write_u16(&mut h[28..], e.name.len() as u16);
            buf.extend_from_slice(&h);
            buf.extend_from_slice(&e.name);
        }
        let mut end = vec![0u8; ENDHDR];
        LittleEndian::write_u32(&mut end[0..], ENDSIG);
        LittleEndian::write_u16(&mut end[10..], declared);
        buf.extend_from_slice(&end);
        buf
    }

    fn tables(entries: &[Cen]) -> Result<Tables> {
        let cen = directory(entries, entries.len() as u16);
        build_tables(&cen, entries.len(), UTF_8, None)
    }

    #[test]
    fn hash_ignores_trailing_slash() {
        assert_eq!(name_hash("dir"), name_hash("dir/"));
        assert_ne!(name_hash("dir"), name_hash("dirx"));
        assert_eq!(name_hash(""), 0);
    }

    #[test]
    fn builds_chains_for_every_entry() {
        let t = tables(&[cen("a.txt"), cen("b.txt"), cen("dir/"), cen("dir/c")]).unwrap();
        assert_eq!(t.total, 4);
        assert_eq!(t.entries.len(), 12);
        assert_eq!(t.table.len(), 3);

        // every entry is reachable from its bucket
        for i in 0..t.total {
            let hash = t.entries[i * 3];
            let mut idx = t.table[(hash % t.table.len() as u32) as usize];
            let mut found = false;
            while idx != END_CHAIN {
                found |= idx as usize == i * 3;
                idx = t.entries[idx as usize + 1];
            }
            assert!(found, "entry {i} not reachable");
        }
    }

    #[test]
    fn rejects_bad_entries() {
        let dup = tables(&[cen("a"), cen("b"), cen("a")]).unwrap_err();
        assert!(matches!(dup, ZipError::DuplicateEntry(ref n) if n == "a"));

        let nul = tables(&[cen("a\0b")]).unwrap_err();
        assert!(nul.is_format());

        let mut encrypted = cen("secret");
        encrypted.flag = FLAG_ENCRYPTED;
        assert!(matches!(tables(&[encrypted]), Err(ZipError::EncryptedEntry)));

        let mut bzip = cen("b.bz2");
        bzip.method = 12;
        assert!(matches!(tables(&[bzip]), Err(ZipError::UnsupportedMethod(12))));

        let bad_utf8 = Cen {
            name: vec![0xFF, 0xFE],
            flag: 0,
            method: 0,
        };
        assert!(tables(&[bad_utf8]).unwrap_err().is_format());
    }

    #[test]
    fn validator_rejection_is_fatal() {
        let cen = directory(&[cen("ok"), cen("../evil")], 2);
        let validator = crate::zip::PathTraversalValidator;
        let err = build_tables(&cen, 2, UTF_8, Some(&validator)).unwrap_err();
        assert!(matches!(err, ZipError::RejectedName { ref name, .. } if name == "../evil"));
    }

    #[test]
    fn under_declared_total_is_recounted() {
        let entries: Vec<Cen> = (0..10).map(|i| cen(&format!("f{i}"))).collect();
        let cen = directory(&entries, 3);
        let t = build_tables(&cen, 3, UTF_8, None).unwrap();
        assert_eq!(t.total, 10);
        assert_eq!(t.entries.len(), 30);
    }

    #[test]
    fn over_declared_total_shrinks() {
        let cen = directory(&[cen("a"), cen("b")], 7);
        let t = build_tables(&cen, 7, UTF_8, None).unwrap();
        assert_eq!(t.total, 2);
        assert_eq!(t.entries.len(), 6);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut cen = directory(&[cen("a")], 1);
        // a stray byte between the last header and the END record
        cen.insert(CENHDR + 1, b'x');
        assert!(build_tables(&cen, 1, UTF_8, None).unwrap_err().is_format());
    }

    #[test]
    fn counts_headers_without_validation() {
        let cen = directory(&[cen("a"), cen("bb"), cen("ccc")], 0);
        assert_eq!(count_cen_headers(&cen, cen.len() - ENDHDR), 3);
        assert_eq!(count_cen_headers(&[], 0), 0);
    }

    #[test]
    fn classifies_meta_inf() {
        let t = tables(&[
            cen("META-INF/MANIFEST.MF"),
            cen("meta-inf/manifest.mf"),
            cen("META-INF/CERT.SF"),
            cen("META-INF/cert.rsa"),
            cen("META-INF/versions/11/a.class"),
            cen("META-INF/versions/9/b.class"),
            cen("META-INF/versions/11/c.class"),
            cen("META-INF/versions/09/d.class"),
            cen("META-INF/versions/99999999999/e.class"),
            cen("META-INF/versions/12/"),
            cen("META-INF/"),
            cen("other/CERT.SF"),
        ])
        .unwrap();
        assert_eq!(t.manifest_count, 2);
        assert!(t.manifest_pos.is_some());
        assert_eq!(t.signature_positions.len(), 2);
        assert_eq!(t.meta_versions, vec![9, 11]);
    }

    #[test]
    fn meta_version_parsing() {
        assert_eq!(meta_version(b"versions/17/x"), Some(17));
        assert_eq!(meta_version(b"VERSIONS/2/x"), Some(2));
        assert_eq!(meta_version(b"versions/0/x"), None);
        assert_eq!(meta_version(b"versions/1a/x"), None);
        assert_eq!(meta_version(b"versions/3"), None);
        assert_eq!(meta_version(b"versions//x"), None);
        assert_eq!(meta_version(b"versions/2147483648/x"), None);
        assert_eq!(meta_version(b"versions/2147483647/x"), Some(2_147_483_647));
    }
}
