//! Directory parsing: the PMGL leaf chain and its entry records
//!
//! The directory is a B-tree of `block_len`-sized pages following the
//! ITSP header. Only the PMGL leaf pages matter for enumeration; they
//! form a doubly linked chain starting at `index_head`, each carrying
//! densely packed entry records followed by `free_space` unused bytes.

use crate::header::ItspHeader;
use crate::source::{self, ByteSource};
use crate::unmarshal::Unmarshaller;
use crate::{Error, Result};
use bitflags::bitflags;
use std::borrow::Cow;
use std::fmt;
use tracing::trace;

pub(crate) const PMGL_MAGIC: &[u8; 4] = b"PMGL";

/// Size of a PMGL page header.
pub(crate) const PMGL_LEN: u32 = 0x14;

/// Maximum length of an entry path, in bytes.
pub const MAX_PATH_LEN: usize = 512;

bitflags! {
    /// Classification of an entry, derived from its path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// Content object (leading `/`, not special).
        const NORMAL = 1 << 0;
        /// Metadata object (no leading `/`).
        const META = 1 << 1;
        /// System object (leading `/#` or `/$`).
        const SPECIAL = 1 << 2;
        /// Path names a file.
        const FILES = 1 << 3;
        /// Path names a directory (trailing `/`).
        const DIRS = 1 << 4;
    }
}

impl EntryFlags {
    /// Derive flags from the raw bytes of a path.
    pub fn from_path(path: &[u8]) -> Self {
        let mut flags = if path.last() == Some(&b'/') {
            EntryFlags::DIRS
        } else {
            EntryFlags::FILES
        };

        if path.first() == Some(&b'/') {
            if path.len() > 1 && (path[1] == b'#' || path[1] == b'$') {
                flags |= EntryFlags::SPECIAL;
            } else {
                flags |= EntryFlags::NORMAL;
            }
        } else {
            flags |= EntryFlags::META;
        }
        flags
    }
}

/// Raw bytes of an entry path.
///
/// The directory stores paths as opaque bytes; the format prescribes no
/// character set and legacy producers wrote names in whatever encoding
/// the authoring machine used. The bytes are the path's identity —
/// conversion to UTF-8 happens only at display boundaries, and lossily.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EntryPath(Vec<u8>);

impl EntryPath {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The path exactly as stored in the directory.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// ASCII case-insensitive comparison, the equivalence the reserved
    /// metadata entries are located under.
    pub fn eq_ignore_ascii_case(&self, other: impl AsRef<[u8]>) -> bool {
        self.0.eq_ignore_ascii_case(other.as_ref())
    }

    /// UTF-8 rendition for human consumption; invalid sequences are
    /// replaced, so this is not a faithful round-trip of the path.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl AsRef<[u8]> for EntryPath {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<str> for EntryPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for EntryPath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<[u8]> for EntryPath {
    fn eq(&self, other: &[u8]) -> bool {
        self.0 == other
    }
}

/// Which logical stream an entry's `start` and `length` are measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// Stored verbatim in the archive payload.
    Uncompressed,
    /// Stored inside the LZX-compressed content stream.
    Compressed,
    /// Unrecognized content section; reads from such an entry yield no
    /// bytes.
    Other(u64),
}

impl Space {
    pub(crate) fn from_code(code: u64) -> Self {
        match code {
            0 => Space::Uncompressed,
            1 => Space::Compressed,
            n => Space::Other(n),
        }
    }
}

/// One logical file inside the archive.
///
/// Entries are cheap descriptors and `Clone`; reads go through
/// [`Archive::read`](crate::Archive::read) with the entry as a key.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Archive-unique path, at most [`MAX_PATH_LEN`] bytes.
    pub path: EntryPath,
    /// Stream the entry's bytes live in.
    pub space: Space,
    /// Offset within that stream.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// Classification derived from `path`.
    pub flags: EntryFlags,
}

/// PMGL leaf page header.
pub(crate) struct PmglHeader {
    pub free_space: u32,
    #[allow(dead_code)]
    pub block_prev: i32,
    pub block_next: i32,
}

impl PmglHeader {
    pub(crate) fn parse(un: &mut Unmarshaller<'_>, block_len: u32) -> Result<Self> {
        if block_len < PMGL_LEN {
            return Err(Error::Malformed(format!(
                "directory page size {block_len:#x} below PMGL header size"
            )));
        }

        let mut sig = [0u8; 4];
        sig.copy_from_slice(un.bytes(4)?);
        if &sig != PMGL_MAGIC {
            return Err(Error::InvalidSignature {
                expected: PMGL_MAGIC,
                found: sig,
            });
        }

        let free_space = un.u32()?;
        un.skip(4)?;
        let block_prev = un.i32()?;
        let block_next = un.i32()?;

        if free_space > block_len - PMGL_LEN {
            return Err(Error::Malformed(format!(
                "PMGL free space {free_space:#x} exceeds page payload"
            )));
        }

        Ok(Self {
            free_space,
            block_prev,
            block_next,
        })
    }
}

fn parse_entry(un: &mut Unmarshaller<'_>) -> Result<Entry> {
    let name_len = un.cword()?;
    if name_len > MAX_PATH_LEN as u64 {
        return Err(Error::Malformed(format!(
            "entry path length {name_len} exceeds {MAX_PATH_LEN}"
        )));
    }

    let path = EntryPath::new(un.bytes(name_len as usize)?.to_vec());
    let space = Space::from_code(un.cword()?);
    let start = un.cword()?;
    let length = un.cword()?;
    let flags = EntryFlags::from_path(path.as_bytes());

    Ok(Entry {
        path,
        space,
        start,
        length,
        flags,
    })
}

/// Walk the PMGL chain from `index_head` and decode every entry record.
///
/// Enumeration order is emission order across the chain. An archive with
/// no entries at all is malformed.
pub(crate) fn read_directory(
    source: &mut dyn ByteSource,
    dir_offset: u64,
    itsp: &ItspHeader,
) -> Result<Vec<Entry>> {
    let block_len = itsp.block_len as usize;
    let mut buf = vec![0u8; block_len];
    let mut entries = Vec::new();

    let mut page = itsp.index_head;
    let mut pages_walked: u64 = 0;
    while page != -1 {
        if page < 0 {
            return Err(Error::Malformed(format!("negative directory page {page}")));
        }
        pages_walked += 1;
        if pages_walked > u64::from(itsp.num_blocks) {
            return Err(Error::Malformed(
                "directory page chain does not terminate".into(),
            ));
        }

        let off = dir_offset.saturating_add(page as u64 * block_len as u64);
        source::read_exact_at(source, &mut buf, off)?;

        let mut un = Unmarshaller::new(&buf);
        let hdr = PmglHeader::parse(&mut un, itsp.block_len)?;

        // Entry records fill the page up to the free-space trailer.
        let usable = block_len - PMGL_LEN as usize - hdr.free_space as usize;
        let mut un = Unmarshaller::new(&buf[PMGL_LEN as usize..PMGL_LEN as usize + usable]);
        while un.bytes_left() > 0 {
            let entry = parse_entry(&mut un)?;
            trace!(
                path = %entry.path,
                start = entry.start,
                length = entry.length,
                "directory entry"
            );
            entries.push(entry);
        }

        page = hdr.block_next;
    }

    if entries.is_empty() {
        return Err(Error::Malformed("directory contains no entries".into()));
    }
    Ok(entries)
}
