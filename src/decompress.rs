//! Random-access decompression of the LZX content stream
//!
//! LZX state is history-dependent, so a random read cannot simply decode
//! its target block: every block since the preceding reset boundary must
//! be replayed first. The driver keeps a one-slot memo of the most
//! recently decoded block (which makes sequential reads replay-free and
//! independent of the cache) and installs every decoded block into the
//! shared block cache.

use crate::cache::BlockCache;
use crate::lzx::{BlockDecoder, LzxDecoder};
use crate::lzxc::ResetTable;
use crate::source::{self, ByteSource};
use crate::{Error, Result};
use tracing::trace;

/// Maximum bytes a compressed block may exceed its decompressed size by;
/// bounds the scratch input buffer, and larger blocks are rejected.
pub(crate) const MAX_BLOCK_GROWTH: u64 = 6144;

/// Reads from the compressed content stream.
pub(crate) struct Decompressor {
    reset_table: ResetTable,
    window_size: u32,
    /// Decompressed blocks between mandatory LZX resets. Non-zero.
    reset_blkcount: u64,
    /// `start` of the reset-table entry, in the uncompressed space.
    rt_start: u64,
    /// `start` of the content entry, in the uncompressed space.
    content_start: u64,
    /// Created on first compressed read.
    decoder: Option<Box<dyn BlockDecoder>>,
    /// Most recently decoded block and its contents. Owned separately
    /// from the cache so eviction cannot invalidate it.
    last_block: Option<u64>,
    last_data: Vec<u8>,
}

impl Decompressor {
    pub fn new(
        reset_table: ResetTable,
        window_size: u32,
        reset_blkcount: u64,
        rt_start: u64,
        content_start: u64,
    ) -> Self {
        Self {
            reset_table,
            window_size,
            reset_blkcount,
            rt_start,
            content_start,
            decoder: None,
            last_block: None,
            last_data: Vec::new(),
        }
    }

    /// Resolve `block` to `(absolute_offset, compressed_length)` via the
    /// reset table.
    fn block_bounds(
        &self,
        source: &mut dyn ByteSource,
        data_offset: u64,
        block: u64,
    ) -> Result<(u64, u64)> {
        let table = &self.reset_table;
        let block_count = u64::from(table.block_count);
        if block >= block_count {
            return Err(Error::Malformed(format!(
                "block {block} out of range, reset table has {block_count} blocks"
            )));
        }

        let slot = data_offset
            .saturating_add(self.rt_start)
            .saturating_add(u64::from(table.table_offset))
            .saturating_add(block * 8);
        let start = read_u64_at(source, slot)?;
        let end = if block + 1 < block_count {
            read_u64_at(source, slot.saturating_add(8))?
        } else {
            table.compressed_len
        };

        if end < start || end - start > table.block_len + MAX_BLOCK_GROWTH {
            return Err(Error::Malformed(format!(
                "implausible compressed block bounds [{start:#x}, {end:#x})"
            )));
        }

        let abs = start
            .saturating_add(data_offset)
            .saturating_add(self.content_start);
        Ok((abs, end - start))
    }

    /// Decode `block` into the memo (and the cache), assuming the codec
    /// already holds the right history.
    fn uncompress_block(
        &mut self,
        source: &mut dyn ByteSource,
        data_offset: u64,
        cache: &mut BlockCache,
        block: u64,
    ) -> Result<()> {
        if self.last_block == Some(block) {
            return Ok(());
        }

        let table = &self.reset_table;
        let out_len = {
            let remaining = table.uncompressed_len.saturating_sub(block * table.block_len);
            if remaining == 0 {
                return Err(Error::Malformed(format!(
                    "block {block} lies past the uncompressed stream"
                )));
            }
            remaining.min(table.block_len) as usize
        };

        let (cmp_start, cmp_len) = self.block_bounds(source, data_offset, block)?;
        let mut scratch = vec![0u8; cmp_len as usize];
        source::read_exact_at(source, &mut scratch, cmp_start)?;

        trace!(block, cmp_len, out_len, "decompressing block");

        let decoder = self
            .decoder
            .as_mut()
            .ok_or(Error::CompressionDisabled)?;
        if block % self.reset_blkcount == 0 {
            decoder.reset();
        }
        self.last_data.resize(out_len, 0);
        decoder.decompress(&scratch, &mut self.last_data)?;

        self.last_block = Some(block);
        cache.install(block, &self.last_data);
        Ok(())
    }

    /// Decode `block`, replaying whatever history the codec is missing
    /// since the preceding reset boundary.
    fn decompress_block(
        &mut self,
        source: &mut dyn ByteSource,
        data_offset: u64,
        cache: &mut BlockCache,
        block: u64,
    ) -> Result<()> {
        let mut align = block % self.reset_blkcount;

        // History since the memoized block is sufficient.
        if let Some(last) = self.last_block {
            if block >= last && block - align <= last {
                align = block - last;
            }
        }

        for i in (1..=align).rev() {
            self.uncompress_block(source, data_offset, cache, block - i)?;
        }
        self.uncompress_block(source, data_offset, cache, block)
    }

    /// Copy decompressed bytes starting at `start` (an offset in the
    /// uncompressed content stream) into `buf`, staying within one
    /// block. Returns the number of bytes produced, which is short on
    /// the final block and zero past the end of the stream.
    pub fn read_region(
        &mut self,
        source: &mut dyn ByteSource,
        data_offset: u64,
        cache: &mut BlockCache,
        buf: &mut [u8],
        start: u64,
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let block = start / self.reset_table.block_len;
        let offset = (start % self.reset_table.block_len) as usize;

        if let Some(data) = cache.lookup(block) {
            let n = buf.len().min(data.len().saturating_sub(offset));
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            return Ok(n);
        }

        if self.decoder.is_none() {
            self.decoder = Some(Box::new(LzxDecoder::new(self.window_size)?));
            self.last_block = None;
        }

        self.decompress_block(source, data_offset, cache, block)?;

        let data = &self.last_data;
        let n = buf.len().min(data.len().saturating_sub(offset));
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }
}

/// Read a little-endian u64 at an absolute archive offset.
fn read_u64_at(source: &mut dyn ByteSource, offset: u64) -> Result<u64> {
    let mut buf = [0u8; 8];
    source::read_exact_at(source, &mut buf, offset)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockCache;
    use crate::source::MemorySource;
    use std::cell::Cell;
    use std::rc::Rc;

    const BLOCK_LEN: u64 = 64;
    const NBLOCKS: u64 = 6;
    const CMP_LEN: u64 = 8;

    /// Deterministic stand-in for the LZX codec. Output is the input
    /// cycled to block length and xor'd with the number of blocks
    /// decoded since the last reset, which mimics LZX's history
    /// dependence: a block decodes to the right bytes only when every
    /// block since the reset boundary was replayed in order.
    struct StubDecoder {
        decoded_since_reset: u8,
        calls: Rc<Cell<usize>>,
    }

    impl BlockDecoder for StubDecoder {
        fn reset(&mut self) {
            self.decoded_since_reset = 0;
        }

        fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<()> {
            for (i, byte) in output.iter_mut().enumerate() {
                *byte = input[i % input.len()] ^ self.decoded_since_reset;
            }
            self.decoded_since_reset = self.decoded_since_reset.wrapping_add(1);
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }
    }

    /// Content stream fixture: the reset table (NBLOCKS u64 offsets) at
    /// offset 0, followed by NBLOCKS compressed blocks of CMP_LEN bytes,
    /// block `b` filled with `0x10 + b`.
    fn fixture(
        reset_blkcount: u64,
        uncompressed_len: u64,
    ) -> (Decompressor, MemorySource, BlockCache, Rc<Cell<usize>>) {
        let mut data = Vec::new();
        for b in 0..NBLOCKS {
            data.extend_from_slice(&(b * CMP_LEN).to_le_bytes());
        }
        for b in 0..NBLOCKS {
            data.extend(std::iter::repeat(0x10 + b as u8).take(CMP_LEN as usize));
        }

        let table = ResetTable {
            version: 2,
            block_count: NBLOCKS as u32,
            table_offset: 0,
            uncompressed_len,
            compressed_len: NBLOCKS * CMP_LEN,
            block_len: BLOCK_LEN,
        };

        let calls = Rc::new(Cell::new(0));
        let mut d = Decompressor::new(table, 0x8000, reset_blkcount, 0, NBLOCKS * 8);
        d.decoder = Some(Box::new(StubDecoder {
            decoded_since_reset: 0,
            calls: Rc::clone(&calls),
        }));
        (d, MemorySource::new(data), BlockCache::new(5), calls)
    }

    fn expected_block(block: u64, reset_blkcount: u64) -> Vec<u8> {
        vec![(0x10 + block as u8) ^ (block % reset_blkcount) as u8; BLOCK_LEN as usize]
    }

    fn read_block(
        d: &mut Decompressor,
        src: &mut MemorySource,
        cache: &mut BlockCache,
        block: u64,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_LEN as usize];
        let n = d
            .read_region(src, 0, cache, &mut buf, block * BLOCK_LEN)
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn sequential_reads_decode_in_order() {
        let (mut d, mut src, mut cache, _) = fixture(4, NBLOCKS * BLOCK_LEN);
        for b in 0..NBLOCKS {
            assert_eq!(read_block(&mut d, &mut src, &mut cache, b), expected_block(b, 4));
        }
    }

    #[test]
    fn random_access_replays_history_from_reset_boundary() {
        let (mut d, mut src, mut cache, calls) = fixture(4, NBLOCKS * BLOCK_LEN);
        assert_eq!(read_block(&mut d, &mut src, &mut cache, 2), expected_block(2, 4));
        // blocks 0 and 1 were replayed to rebuild history
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn reset_boundaries_restart_history() {
        let (mut d, mut src, mut cache, _) = fixture(2, NBLOCKS * BLOCK_LEN);
        // block 3 needs block 2 first; block 2 starts a reset interval
        assert_eq!(read_block(&mut d, &mut src, &mut cache, 3), expected_block(3, 2));
        assert_eq!(read_block(&mut d, &mut src, &mut cache, 5), expected_block(5, 2));
    }

    #[test]
    fn reads_straddling_a_reset_boundary_compose() {
        // one read driven across the block-1/block-2 boundary, where
        // block 2 begins a reset interval
        let (mut d, mut src, mut cache, _) = fixture(2, NBLOCKS * BLOCK_LEN);
        let start = 2 * BLOCK_LEN - 10;
        let mut buf = vec![0u8; 20];
        let mut total = 0;
        while total < buf.len() {
            let n = d
                .read_region(&mut src, 0, &mut cache, &mut buf[total..], start + total as u64)
                .unwrap();
            assert!(n > 0);
            total += n;
        }

        let mut expected = expected_block(1, 2)[(BLOCK_LEN - 10) as usize..].to_vec();
        expected.extend_from_slice(&expected_block(2, 2)[..10]);
        assert_eq!(buf, expected);
    }

    #[test]
    fn memo_shrinks_the_replay_window() {
        let (mut d, mut src, mut cache, calls) = fixture(4, NBLOCKS * BLOCK_LEN);
        read_block(&mut d, &mut src, &mut cache, 1);
        assert_eq!(calls.get(), 2);
        // 1 is memoized and within [0, 3]: only 2 and 3 are decoded.
        assert_eq!(read_block(&mut d, &mut src, &mut cache, 3), expected_block(3, 4));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn cache_hit_skips_the_codec() {
        let (mut d, mut src, mut cache, calls) = fixture(4, NBLOCKS * BLOCK_LEN);
        read_block(&mut d, &mut src, &mut cache, 0);
        assert_eq!(calls.get(), 1);
        read_block(&mut d, &mut src, &mut cache, 0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn region_reads_stay_within_one_block() {
        let (mut d, mut src, mut cache, _) = fixture(4, NBLOCKS * BLOCK_LEN);
        let mut buf = vec![0u8; 100];
        let start = BLOCK_LEN - 10;
        let n = d.read_region(&mut src, 0, &mut cache, &mut buf, start).unwrap();
        assert_eq!(n, 10);
        assert_eq!(&buf[..10], &expected_block(0, 4)[(BLOCK_LEN - 10) as usize..]);
    }

    #[test]
    fn final_block_yields_short() {
        let tail = 10u64;
        let (mut d, mut src, mut cache, _) = fixture(4, 5 * BLOCK_LEN + tail);
        let data = read_block(&mut d, &mut src, &mut cache, 5);
        assert_eq!(data.len(), tail as usize);
        assert_eq!(data, &expected_block(5, 4)[..tail as usize]);

        // past the short tail: zero bytes
        let mut buf = [0u8; 4];
        let n = d
            .read_region(&mut src, 0, &mut cache, &mut buf, 5 * BLOCK_LEN + tail)
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn cache_resize_preserves_read_results() {
        let (mut d, mut src, mut cache, _) = fixture(4, NBLOCKS * BLOCK_LEN);
        let b0 = read_block(&mut d, &mut src, &mut cache, 0);
        let b1 = read_block(&mut d, &mut src, &mut cache, 1);
        cache.resize(1);
        assert_eq!(read_block(&mut d, &mut src, &mut cache, 0), b0);
        assert_eq!(read_block(&mut d, &mut src, &mut cache, 1), b1);
    }

    #[test]
    fn reads_are_independent_of_history() {
        let (mut d, mut src, mut cache, _) = fixture(4, NBLOCKS * BLOCK_LEN);
        read_block(&mut d, &mut src, &mut cache, 0);
        let warm = read_block(&mut d, &mut src, &mut cache, 2);

        let (mut d, mut src, mut cache, _) = fixture(4, NBLOCKS * BLOCK_LEN);
        let cold = read_block(&mut d, &mut src, &mut cache, 2);
        assert_eq!(warm, cold);
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let (mut d, mut src, mut cache, _) = fixture(4, NBLOCKS * BLOCK_LEN);
        let mut buf = [0u8; 1];
        assert!(d
            .read_region(&mut src, 0, &mut cache, &mut buf, NBLOCKS * BLOCK_LEN)
            .is_err());
    }

    #[test]
    fn oversized_compressed_block_is_rejected() {
        // the table claims block 0 spans far more than a block can inflate
        let mut data = Vec::new();
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&8000u64.to_le_bytes());
        let table = ResetTable {
            version: 2,
            block_count: 2,
            table_offset: 0,
            uncompressed_len: 2 * BLOCK_LEN,
            compressed_len: 9000,
            block_len: BLOCK_LEN,
        };
        let mut d = Decompressor::new(table, 0x8000, 4, 0, 16);
        d.decoder = Some(Box::new(StubDecoder {
            decoded_since_reset: 0,
            calls: Rc::new(Cell::new(0)),
        }));
        let mut src = MemorySource::new(data);
        let mut cache = BlockCache::new(5);
        let mut buf = [0u8; 1];
        let err = d.read_region(&mut src, 0, &mut cache, &mut buf, 0).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
