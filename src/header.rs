//! ITSF and ITSP header parsing
//!
//! An ITSS archive opens with the ITSF file header, which locates the
//! directory and the payload, followed (at `dir_offset`) by the ITSP
//! directory header describing the PMGL/PMGI page geometry.

use crate::unmarshal::Unmarshaller;
use crate::{Error, Result};

pub(crate) const ITSF_MAGIC: &[u8; 4] = b"ITSF";
pub(crate) const ITSP_MAGIC: &[u8; 4] = b"ITSP";

/// Minimum ITSF header length for a version 2 archive.
pub const ITSF_V2_LEN: usize = 0x58;
/// Length of a version 3 ITSF header; also the amount read at offset 0.
pub const ITSF_V3_LEN: usize = 0x60;
/// Length of the version 1 ITSP header.
pub const ITSP_V1_LEN: usize = 0x54;

/// ITSS file header.
///
/// `dir_offset`/`dir_len` locate the directory; `data_offset` is the
/// origin all uncompressed entry offsets are measured from. Version 2
/// archives do not store `data_offset`; it is synthesized as
/// `dir_offset + dir_len`.
#[derive(Debug, Clone)]
pub struct ItsfHeader {
    pub version: u32,
    pub header_len: u32,
    pub last_modified: u32,
    pub lang_id: u32,
    /// Opaque; current producers do not maintain these UUIDs.
    pub dir_uuid: [u8; 16],
    pub stream_uuid: [u8; 16],
    pub unknown_offset: u64,
    pub unknown_len: u64,
    pub dir_offset: u64,
    pub dir_len: u64,
    pub data_offset: u64,
}

impl ItsfHeader {
    /// Parse and validate an ITSF header from the first [`ITSF_V3_LEN`]
    /// bytes of the archive.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut un = Unmarshaller::new(buf);

        let mut sig = [0u8; 4];
        sig.copy_from_slice(un.bytes(4)?);
        if &sig != ITSF_MAGIC {
            return Err(Error::InvalidSignature {
                expected: ITSF_MAGIC,
                found: sig,
            });
        }

        let version = un.u32()?;
        let header_len = un.u32()?;
        un.skip(4)?;
        let last_modified = un.u32()?;
        let lang_id = un.u32()?;
        let dir_uuid = un.uuid()?;
        let stream_uuid = un.uuid()?;
        let unknown_offset = un.u64()?;
        let unknown_len = un.u64()?;
        let dir_offset = un.u64()?;
        let dir_len = un.u64()?;

        if version != 2 && version != 3 {
            return Err(Error::UnsupportedVersion(version));
        }

        let data_offset = if version == 3 {
            un.u64()?
        } else {
            dir_offset.wrapping_add(dir_len)
        };

        let min_len = if version == 2 { ITSF_V2_LEN } else { ITSF_V3_LEN };
        if (header_len as usize) < min_len {
            return Err(Error::Malformed(format!(
                "ITSF header length {header_len:#x} below minimum {min_len:#x}"
            )));
        }

        // Huge offsets are invariably broken files, not big archives.
        if dir_offset > u64::from(u32::MAX) || dir_len > u64::from(u32::MAX) {
            return Err(Error::Malformed(format!(
                "implausible directory geometry: offset {dir_offset:#x}, length {dir_len:#x}"
            )));
        }

        Ok(Self {
            version,
            header_len,
            last_modified,
            lang_id,
            dir_uuid,
            stream_uuid,
            unknown_offset,
            unknown_len,
            dir_offset,
            dir_len,
            data_offset,
        })
    }
}

/// ITSS directory header.
///
/// Describes the page geometry of the directory: `block_len`-sized pages
/// starting right after this header, with the leaf chain beginning at
/// `index_head`.
#[derive(Debug, Clone)]
pub struct ItspHeader {
    pub version: u32,
    pub header_len: u32,
    /// Size of each directory page. Always non-zero.
    pub block_len: u32,
    pub blockidx_intvl: i32,
    pub index_depth: i32,
    /// Root index page, or −1 when the directory has no PMGI pages.
    pub index_root: i32,
    /// First page of the PMGL leaf chain.
    pub index_head: i32,
    pub num_blocks: u32,
    pub lang_id: u32,
    pub system_uuid: [u8; 16],
}

impl ItspHeader {
    /// Parse and validate an ITSP header from [`ITSP_V1_LEN`] bytes at
    /// the archive's `dir_offset`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut un = Unmarshaller::new(buf);

        let mut sig = [0u8; 4];
        sig.copy_from_slice(un.bytes(4)?);
        if &sig != ITSP_MAGIC {
            return Err(Error::InvalidSignature {
                expected: ITSP_MAGIC,
                found: sig,
            });
        }

        let version = un.u32()?;
        let header_len = un.u32()?;
        un.skip(4)?;
        let block_len = un.u32()?;
        let blockidx_intvl = un.i32()?;
        let index_depth = un.i32()?;
        let index_root = un.i32()?;
        let index_head = un.i32()?;
        un.skip(4)?;
        let num_blocks = un.u32()?;
        un.skip(4)?;
        let lang_id = un.u32()?;
        let system_uuid = un.uuid()?;
        un.skip(16)?;

        if version != 1 {
            return Err(Error::Malformed(format!(
                "unsupported ITSP version {version}"
            )));
        }
        if header_len as usize != ITSP_V1_LEN {
            return Err(Error::Malformed(format!(
                "ITSP header length {header_len:#x}, expected {ITSP_V1_LEN:#x}"
            )));
        }
        if block_len == 0 {
            return Err(Error::Malformed("zero directory page size".into()));
        }

        Ok(Self {
            version,
            header_len,
            block_len,
            blockidx_intvl,
            index_depth,
            index_root,
            index_head,
            num_blocks,
            lang_id,
            system_uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn itsf_v3(version: u32, header_len: u32, dir_offset: u64, dir_len: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ITSF");
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0x409u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&dir_offset.to_le_bytes());
        buf.extend_from_slice(&dir_len.to_le_bytes());
        buf.extend_from_slice(&0x2000u64.to_le_bytes());
        assert_eq!(buf.len(), ITSF_V3_LEN);
        buf
    }

    fn itsp_v1(version: u32, header_len: u32, block_len: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ITSP");
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&block_len.to_le_bytes());
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf.extend_from_slice(&0x409u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        assert_eq!(buf.len(), ITSP_V1_LEN);
        buf
    }

    #[test]
    fn parses_v3_header() {
        let hdr = ItsfHeader::parse(&itsf_v3(3, 0x60, 0x60, 0x1054)).unwrap();
        assert_eq!(hdr.version, 3);
        assert_eq!(hdr.dir_offset, 0x60);
        assert_eq!(hdr.dir_len, 0x1054);
        assert_eq!(hdr.data_offset, 0x2000);
    }

    #[test]
    fn v2_synthesizes_data_offset() {
        let hdr = ItsfHeader::parse(&itsf_v3(2, 0x58, 0x58, 0x1000)).unwrap();
        assert_eq!(hdr.data_offset, 0x58 + 0x1000);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = itsf_v3(3, 0x60, 0x60, 0x1054);
        buf[..4].copy_from_slice(b"NOTI");
        assert!(matches!(
            ItsfHeader::parse(&buf).unwrap_err(),
            Error::InvalidSignature { .. }
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let buf = itsf_v3(4, 0x60, 0x60, 0x1054);
        assert!(matches!(
            ItsfHeader::parse(&buf).unwrap_err(),
            Error::UnsupportedVersion(4)
        ));
    }

    #[test]
    fn rejects_short_header_len() {
        assert!(ItsfHeader::parse(&itsf_v3(3, 0x58, 0x60, 0x1054)).is_err());
        assert!(ItsfHeader::parse(&itsf_v3(2, 0x40, 0x58, 0x1000)).is_err());
    }

    #[test]
    fn rejects_huge_directory_geometry() {
        let buf = itsf_v3(3, 0x60, u64::from(u32::MAX) + 1, 0x1054);
        assert!(ItsfHeader::parse(&buf).is_err());
        let buf = itsf_v3(3, 0x60, 0x60, u64::from(u32::MAX) + 1);
        assert!(ItsfHeader::parse(&buf).is_err());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let buf = itsf_v3(3, 0x60, 0x60, 0x1054);
        assert!(ItsfHeader::parse(&buf[..0x40]).is_err());
    }

    #[test]
    fn parses_itsp_header() {
        let hdr = ItspHeader::parse(&itsp_v1(1, 0x54, 0x1000)).unwrap();
        assert_eq!(hdr.block_len, 0x1000);
        assert_eq!(hdr.index_root, -1);
        assert_eq!(hdr.index_head, 0);
    }

    #[test]
    fn rejects_bad_itsp() {
        assert!(ItspHeader::parse(&itsp_v1(2, 0x54, 0x1000)).is_err());
        assert!(ItspHeader::parse(&itsp_v1(1, 0x58, 0x1000)).is_err());
        assert!(ItspHeader::parse(&itsp_v1(1, 0x54, 0)).is_err());
        let mut buf = itsp_v1(1, 0x54, 0x1000);
        buf[..4].copy_from_slice(b"PMGL");
        assert!(matches!(
            ItspHeader::parse(&buf).unwrap_err(),
            Error::InvalidSignature { .. }
        ));
    }
}
