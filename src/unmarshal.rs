//! Bounds-checked little-endian decoding of archive structures

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};

/// Positional cursor over a borrowed buffer.
///
/// Every read is bounds-checked; consuming past the end yields
/// [`Error::Malformed`], which callers propagate with `?`. Signed fields
/// are bitwise reinterpretations of their unsigned counterparts, matching
/// the on-disk encoding.
pub(crate) struct Unmarshaller<'a> {
    buf: &'a [u8],
}

impl<'a> Unmarshaller<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn bytes_left(&self) -> usize {
        self.buf.len()
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::Malformed(format!(
            "structure truncated: needed {needed} bytes, {} left",
            self.buf.len()
        ))
    }

    /// Consume `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(self.truncated(n));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Skip `n` bytes of reserved or unknown fields.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.buf.read_u8().map_err(|_| self.truncated(1))
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.buf
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated(4))
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.u32().map(|v| v as i32)
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.buf
            .read_u64::<LittleEndian>()
            .map_err(|_| self.truncated(8))
    }

    /// 16-byte UUID, copied opaquely.
    pub fn uuid(&mut self) -> Result<[u8; 16]> {
        let mut out = [0u8; 16];
        out.copy_from_slice(self.bytes(16)?);
        Ok(out)
    }

    /// Variable-length base-128 integer, big-endian, seven bits per byte,
    /// high bit signalling continuation. Used only by directory entry
    /// records.
    pub fn cword(&mut self) -> Result<u64> {
        let mut res: u64 = 0;
        loop {
            let b = self.u8()?;
            if res > (u64::MAX >> 7) {
                return Err(Error::Malformed(
                    "variable-length integer overflows 64 bits".into(),
                ));
            }
            res <<= 7;
            if b >= 0x80 {
                res += u64::from(b & 0x7f);
            } else {
                return Ok(res + u64::from(b));
            }
        }
    }
}
