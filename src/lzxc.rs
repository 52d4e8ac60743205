//! LZXC compression metadata: control data and the reset table
//!
//! Both structures live in reserved uncompressed entries
//! (`::DataSpace/Storage/MSCompressed/*`). The control data fixes the
//! LZX window and reset interval; the reset table maps block indices to
//! offsets in the compressed content stream, which is what makes random
//! access possible.

use crate::unmarshal::Unmarshaller;
use crate::{Error, Result};

pub(crate) const LZXC_MAGIC: &[u8; 4] = b"LZXC";

/// Exact size of the reset table header read from its entry.
pub const RESET_TABLE_LEN: usize = 0x28;
/// Minimum size of the LZXC control data.
pub const CONTROL_DATA_MIN_LEN: usize = 0x18;

/// LZXC control data.
///
/// Version 2 stores `reset_interval` and `window_size` in units of
/// 0x8000 bytes; [`parse`](LzxcControlData::parse) scales them so both
/// fields are always byte counts.
#[derive(Debug, Clone)]
pub struct LzxcControlData {
    pub version: u32,
    pub reset_interval: u32,
    pub window_size: u32,
    pub windows_per_reset: u32,
}

impl LzxcControlData {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < CONTROL_DATA_MIN_LEN {
            return Err(Error::Malformed(format!(
                "LZXC control data is {} bytes, minimum {CONTROL_DATA_MIN_LEN:#x}",
                buf.len()
            )));
        }

        let mut un = Unmarshaller::new(buf);
        un.skip(4)?;
        let mut sig = [0u8; 4];
        sig.copy_from_slice(un.bytes(4)?);
        if &sig != LZXC_MAGIC {
            return Err(Error::InvalidSignature {
                expected: LZXC_MAGIC,
                found: sig,
            });
        }

        let version = un.u32()?;
        let mut reset_interval = un.u32()?;
        let mut window_size = un.u32()?;
        let windows_per_reset = un.u32()?;

        if version != 1 && version != 2 {
            return Err(Error::Malformed(format!(
                "unsupported LZXC version {version}"
            )));
        }
        if version == 2 {
            reset_interval = reset_interval.wrapping_mul(0x8000);
            window_size = window_size.wrapping_mul(0x8000);
        }

        if window_size == 0 || reset_interval == 0 {
            return Err(Error::Malformed(
                "zero LZX window size or reset interval".into(),
            ));
        }
        if window_size == 1 {
            return Err(Error::UnsupportedWindowSize(1));
        }
        // The reset math below assumes the interval is whole half-windows,
        // which is all known producers emit.
        if reset_interval % (window_size / 2) != 0 {
            return Err(Error::UnsupportedResetInterval {
                interval: reset_interval,
                window: window_size,
            });
        }

        Ok(Self {
            version,
            reset_interval,
            window_size,
            windows_per_reset,
        })
    }

    /// Number of decompressed blocks between mandatory LZX resets, given
    /// the decompressed block size from the reset table.
    pub fn reset_block_count(&self) -> u64 {
        u64::from(self.reset_interval / (self.window_size / 2)) * u64::from(self.windows_per_reset)
    }
}

/// LZX reset table.
///
/// `block_count` 64-bit offsets, one per compressed block, start at
/// `table_offset` within the reset-table entry. Block `b` occupies
/// `[offset[b], offset[b+1])` in the compressed stream, the last block
/// ending at `compressed_len`.
#[derive(Debug, Clone)]
pub struct ResetTable {
    pub version: u32,
    pub block_count: u32,
    pub table_offset: u32,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
    /// Decompressed size of every block except possibly the last.
    pub block_len: u64,
}

impl ResetTable {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != RESET_TABLE_LEN {
            return Err(Error::Malformed(format!(
                "reset table is {} bytes, expected {RESET_TABLE_LEN:#x}",
                buf.len()
            )));
        }

        let mut un = Unmarshaller::new(buf);
        let version = un.u32()?;
        let block_count = un.u32()?;
        un.skip(4)?;
        let table_offset = un.u32()?;
        let uncompressed_len = un.u64()?;
        let compressed_len = un.u64()?;
        let block_len = un.u64()?;

        if version != 2 {
            return Err(Error::Malformed(format!(
                "unsupported reset table version {version}"
            )));
        }
        // Huge lengths are invariably broken files.
        if uncompressed_len > u64::from(u32::MAX) || compressed_len > u64::from(u32::MAX) {
            return Err(Error::Malformed(format!(
                "implausible stream lengths: {uncompressed_len:#x} uncompressed, {compressed_len:#x} compressed"
            )));
        }
        if block_len == 0 || block_len > u64::from(u32::MAX) {
            return Err(Error::Malformed(format!(
                "implausible block length {block_len:#x}"
            )));
        }

        Ok(Self {
            version,
            block_count,
            table_offset,
            uncompressed_len,
            compressed_len,
            block_len,
        })
    }
}
