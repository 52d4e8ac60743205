//! The archive handle: open/close lifecycle and the entry read path

use crate::cache::{BlockCache, DEFAULT_CACHE_BLOCKS};
use crate::decompress::Decompressor;
use crate::directory::{self, Entry, Space};
use crate::header::{ItsfHeader, ItspHeader, ITSF_V3_LEN, ITSP_V1_LEN};
use crate::lzxc::{LzxcControlData, ResetTable, RESET_TABLE_LEN};
use crate::source::{self, ByteSource, FileSource, MemorySource};
use crate::{Error, Result, CONTENT_PATH, CONTROL_DATA_PATH, RESET_TABLE_PATH};
use std::path::Path;
use tracing::debug;

/// Control-data entries beyond this size mean a broken archive.
const MAX_CONTROL_DATA_LEN: u64 = 256;

/// An open ITSS archive.
///
/// Created by [`open`](Archive::open)/[`from_bytes`](Archive::from_bytes)
/// /[`with_source`](Archive::with_source), which parse the headers and
/// the full directory and load compression metadata when present.
/// Dropping the handle releases the byte source, the LZX state, and all
/// cache buffers.
///
/// A handle is single-threaded: every read mutates the decoder state and
/// the cache. Open one handle per thread for concurrent access (the
/// archive itself is read-only).
pub struct Archive {
    source: Box<dyn ByteSource>,
    itsf: ItsfHeader,
    itsp: ItspHeader,
    entries: Vec<Entry>,
    /// `None` means compression is disabled: either the reserved
    /// metadata entries are absent or their contents failed validation.
    compression: Option<Decompressor>,
    cache: BlockCache,
}

impl Archive {
    /// Open an archive file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_source(Box::new(FileSource::open(path.as_ref())?))
    }

    /// Open an archive held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::with_source(Box::new(MemorySource::new(data)))
    }

    /// Open an archive over an arbitrary byte source.
    pub fn with_source(mut source: Box<dyn ByteSource>) -> Result<Self> {
        let mut buf = [0u8; ITSF_V3_LEN];
        source::read_exact_at(&mut *source, &mut buf, 0)?;
        let itsf = ItsfHeader::parse(&buf)?;

        let mut buf = [0u8; ITSP_V1_LEN];
        source::read_exact_at(&mut *source, &mut buf, itsf.dir_offset)?;
        let mut itsp = ItspHeader::parse(&buf)?;

        // No PMGI pages: the sole PMGL chain is also the index root.
        if itsp.index_root < 0 {
            itsp.index_root = itsp.index_head;
        }

        let dir_offset = itsf.dir_offset + u64::from(itsp.header_len);
        let entries = directory::read_directory(&mut *source, dir_offset, &itsp)?;
        debug!(entries = entries.len(), version = itsf.version, "opened archive");

        let mut archive = Self {
            source,
            itsf,
            itsp,
            entries,
            compression: None,
            cache: BlockCache::new(DEFAULT_CACHE_BLOCKS),
        };
        archive.load_compression()?;
        Ok(archive)
    }

    /// Locate and validate the compression metadata. Absent or invalid
    /// metadata downgrades the archive to uncompressed-only rather than
    /// failing the open.
    fn load_compression(&mut self) -> Result<()> {
        let find = |path: &str| {
            self.entries
                .iter()
                .find(|e| e.path.eq_ignore_ascii_case(path))
                .cloned()
        };
        let (Some(rt), Some(content), Some(control)) = (
            find(RESET_TABLE_PATH),
            find(CONTENT_PATH),
            find(CONTROL_DATA_PATH),
        ) else {
            debug!("compression metadata entries missing; uncompressed-only");
            return Ok(());
        };

        // The metadata cannot itself live in the compressed stream.
        if rt.space != Space::Uncompressed
            || content.space != Space::Uncompressed
            || control.space != Space::Uncompressed
        {
            debug!("compression metadata not in the uncompressed section; uncompressed-only");
            return Ok(());
        }

        let mut rt_buf = [0u8; RESET_TABLE_LEN];
        if self.try_read(&rt, 0, &mut rt_buf)? != RESET_TABLE_LEN {
            debug!("short reset table; uncompressed-only");
            return Ok(());
        }
        let table = match ResetTable::parse(&rt_buf) {
            Ok(table) => table,
            Err(e) => {
                debug!(error = %e, "invalid reset table; uncompressed-only");
                return Ok(());
            }
        };

        if control.length > MAX_CONTROL_DATA_LEN {
            return Err(Error::Malformed(format!(
                "oversized LZXC control data ({} bytes)",
                control.length
            )));
        }
        let mut ctl_buf = vec![0u8; control.length as usize];
        if self.try_read(&control, 0, &mut ctl_buf)? != ctl_buf.len() {
            debug!("short control data; uncompressed-only");
            return Ok(());
        }
        let ctl = match LzxcControlData::parse(&ctl_buf) {
            Ok(ctl) => ctl,
            Err(e) => {
                debug!(error = %e, "invalid control data; uncompressed-only");
                return Ok(());
            }
        };

        let reset_blkcount = ctl.reset_block_count();
        if reset_blkcount == 0 {
            debug!("zero blocks per reset interval; uncompressed-only");
            return Ok(());
        }

        debug!(
            window_size = ctl.window_size,
            reset_interval = ctl.reset_interval,
            reset_blkcount,
            blocks = table.block_count,
            "compression enabled"
        );
        self.compression = Some(Decompressor::new(
            table,
            ctl.window_size,
            reset_blkcount,
            rt.start,
            content.start,
        ));
        Ok(())
    }

    /// All entries, in directory order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Look up an entry by path, ASCII case-insensitively. Paths are
    /// raw bytes, so lookups work for names that are not valid UTF-8.
    pub fn entry(&self, path: impl AsRef<[u8]>) -> Option<&Entry> {
        let path = path.as_ref();
        self.entries
            .iter()
            .find(|e| e.path.eq_ignore_ascii_case(path))
    }

    /// Whether reads from the compressed section are possible.
    pub fn is_compression_enabled(&self) -> bool {
        self.compression.is_some()
    }

    /// The parsed file header.
    pub fn itsf(&self) -> &ItsfHeader {
        &self.itsf
    }

    /// The parsed directory header.
    pub fn itsp(&self) -> &ItspHeader {
        &self.itsp
    }

    /// Resize the decompressed-block cache (clamped to
    /// [`MAX_CACHE_BLOCKS`](crate::MAX_CACHE_BLOCKS)). Cached contents
    /// are rehashed; reads are unaffected beyond hit rate.
    pub fn set_cache_size(&mut self, capacity: usize) {
        self.cache.resize(capacity);
        debug!(capacity = self.cache.capacity(), "block cache resized");
    }

    /// Read up to `buf.len()` bytes of `entry` starting at `offset`,
    /// returning how many bytes were produced.
    ///
    /// Errors collapse to a short count: malformed archives yield what
    /// they can and then stop. Use [`try_read`](Archive::try_read) to
    /// observe the failure reason.
    pub fn read(&mut self, entry: &Entry, offset: u64, buf: &mut [u8]) -> usize {
        match self.try_read(entry, offset, buf) {
            Ok(n) => n,
            Err(e) => {
                debug!(path = %entry.path, offset, error = %e, "read failed");
                0
            }
        }
    }

    /// Read up to `buf.len()` bytes of `entry` starting at `offset`.
    ///
    /// Returns the number of bytes produced: zero at or past the end of
    /// the entry, short when the archive ends early. A failure after
    /// partial progress reports the short count rather than the error.
    pub fn try_read(&mut self, entry: &Entry, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= entry.length {
            return Ok(0);
        }
        let len = buf.len().min((entry.length - offset) as usize);
        let buf = &mut buf[..len];

        match entry.space {
            Space::Uncompressed => {
                let abs = self
                    .itsf
                    .data_offset
                    .saturating_add(entry.start)
                    .saturating_add(offset);
                self.source.read_at(buf, abs)
            }
            Space::Compressed => {
                let Some(comp) = self.compression.as_mut() else {
                    return Err(Error::CompressionDisabled);
                };

                let mut total = 0usize;
                while total < len {
                    let start = entry
                        .start
                        .saturating_add(offset)
                        .saturating_add(total as u64);
                    match comp.read_region(
                        &mut *self.source,
                        self.itsf.data_offset,
                        &mut self.cache,
                        &mut buf[total..],
                        start,
                    ) {
                        Ok(0) => break,
                        Ok(n) => total += n,
                        Err(e) if total > 0 => {
                            debug!(path = %entry.path, error = %e, "read stopped short");
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(total)
            }
            Space::Other(code) => {
                debug!(path = %entry.path, code, "read from unknown content section");
                Ok(0)
            }
        }
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("version", &self.itsf.version)
            .field("entries", &self.entries.len())
            .field("compression_enabled", &self.compression.is_some())
            .finish()
    }
}
