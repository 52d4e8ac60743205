//! Reader for ITSS compound archives
//!
//! ITSS is the container format behind Microsoft Compiled HTML Help
//! (`.chm`) and related document formats. This crate parses the ITSF
//! file header and ITSP directory, enumerates the entries stored in the
//! archive, and serves arbitrary byte ranges from any entry — including
//! entries inside the archive's single LZX-compressed content stream,
//! which is decompressed block-by-block with random access driven by the
//! LZXC reset table.
//!
//! What an archive's entries *mean* (the `#SYSTEM` and `#STRINGS`
//! metafiles, the TOC, HTML contents) is out of scope; entries are
//! opaque byte ranges here.
//!
//! ## Example
//!
//! ```no_run
//! use itss::Archive;
//!
//! let mut archive = Archive::open("manual.chm")?;
//! for entry in archive.entries() {
//!     println!("{} ({} bytes)", entry.path, entry.length);
//! }
//!
//! let entry = archive.entry("/index.html").cloned().ok_or("not found")?;
//! let mut contents = vec![0u8; entry.length as usize];
//! let n = archive.read(&entry, 0, &mut contents);
//! contents.truncate(n);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod archive;
pub mod cache;
pub mod directory;
pub mod error;
pub mod header;
pub mod lzxc;
pub mod source;

mod decompress;
mod lzx;
mod unmarshal;

pub use archive::Archive;
pub use cache::{DEFAULT_CACHE_BLOCKS, MAX_CACHE_BLOCKS};
pub use directory::{Entry, EntryFlags, EntryPath, Space, MAX_PATH_LEN};
pub use error::{Error, Result};
pub use header::{ItsfHeader, ItspHeader};
pub use source::{ByteSource, FileSource, MemorySource};

/// Path of the reserved entry holding the LZX reset table.
pub const RESET_TABLE_PATH: &str = "::DataSpace/Storage/MSCompressed/Transform/\
{7FC28940-9D31-11D0-9B27-00A0C91E9C7C}/InstanceData/ResetTable";

/// Path of the reserved entry holding the LZXC control data.
pub const CONTROL_DATA_PATH: &str = "::DataSpace/Storage/MSCompressed/ControlData";

/// Path of the reserved entry whose extent is the compressed content
/// stream.
pub const CONTENT_PATH: &str = "::DataSpace/Storage/MSCompressed/Content";
