//! Random-access byte sources backing an archive
//!
//! An [`Archive`](crate::Archive) reads raw bytes exclusively through the
//! [`ByteSource`] trait, so archives can be served from a file, a memory
//! buffer, or anything else that supports pread-style access.

use crate::{Error, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Random-access reader over the raw bytes of an archive.
///
/// Implementations fill up to `buf.len()` bytes starting at the absolute
/// archive offset `offset` and return how many bytes were produced. Short
/// reads are permitted; reads that start at or past the end of the source
/// are errors. The archive handle serialises all access, so `&mut self`
/// carries no concurrency obligations.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;
}

/// Read exactly `buf.len()` bytes at `offset` or fail.
///
/// Header, directory, and reset-table structures require their full size;
/// a short read there means the archive is cut off.
pub(crate) fn read_exact_at(
    source: &mut dyn ByteSource,
    buf: &mut [u8],
    offset: u64,
) -> Result<()> {
    let n = source.read_at(buf, offset)?;
    if n != buf.len() {
        return Err(Error::TruncatedRead {
            expected: buf.len() as u64,
            actual: n as u64,
        });
    }
    Ok(())
}

/// Byte source over an owned in-memory buffer.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Total size of the buffer.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for MemorySource {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of archive",
            )));
        }
        let n = buf.len().min((len - offset) as usize);
        let start = offset as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

/// Byte source over a file.
///
/// Sane archives fit comfortably in an address-space mapping: the ITSF
/// and reset-table sanity guards cap every offset and length the parser
/// will accept at 32 bits, so any plausible archive is at most 4 GiB.
/// Files inside that bound are memory-mapped; anything larger (or a
/// failed map) is served through buffered seeking reads instead.
pub struct FileSource {
    backing: Backing,
    size: u64,
}

enum Backing {
    Mapped(Mmap),
    Seeking(BufReader<File>),
}

impl FileSource {
    /// Open a file for random-access reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        let backing = match Self::try_map(&file, size) {
            Some(mmap) => Backing::Mapped(mmap),
            None => Backing::Seeking(BufReader::new(file)),
        };
        debug!(
            ?path,
            size,
            mapped = matches!(backing, Backing::Mapped(_)),
            "opened archive file"
        );

        Ok(Self { backing, size })
    }

    fn try_map(file: &File, size: u64) -> Option<Mmap> {
        // Beyond the format's 32-bit geometry, mapping buys nothing the
        // parser can use.
        if size == 0 || size > u64::from(u32::MAX) {
            return None;
        }
        unsafe { MmapOptions::new().map(file) }
            .map_err(|e| debug!("memory map failed, using seeking reads: {e}"))
            .ok()
    }

    /// Total size of the file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the fast memory-mapped path is in use.
    pub fn is_memory_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }
}

impl ByteSource for FileSource {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of archive",
            )));
        }
        let n = buf.len().min((self.size - offset) as usize);

        match &mut self.backing {
            Backing::Mapped(mmap) => {
                let start = offset as usize;
                buf[..n].copy_from_slice(&mmap[start..start + n]);
            }
            Backing::Seeking(file) => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf[..n])?;
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reads_in_range() {
        let mut src = MemorySource::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(src.read_at(&mut buf, 1).unwrap(), 3);
        assert_eq!(buf, [2, 3, 4]);
    }

    #[test]
    fn memory_source_short_read_at_tail() {
        let mut src = MemorySource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(src.read_at(&mut buf, 2).unwrap(), 1);
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn memory_source_rejects_out_of_range() {
        let mut src = MemorySource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 1];
        assert!(src.read_at(&mut buf, 3).is_err());
        assert!(src.read_at(&mut buf, 100).is_err());
    }

    #[test]
    fn read_exact_at_requires_full_length() {
        let mut src = MemorySource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 2];
        assert!(read_exact_at(&mut src, &mut buf, 0).is_ok());
        let mut buf = [0u8; 4];
        let err = read_exact_at(&mut src, &mut buf, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedRead {
                expected: 4,
                actual: 3
            }
        ));
    }
}
