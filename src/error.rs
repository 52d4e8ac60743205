//! Error types for ITSS archive parsing and decompression

use std::io;
use thiserror::Error;

/// Result type for ITSS operations
pub type Result<T> = std::result::Result<T, Error>;

/// ITSS error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying byte source
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The byte source produced fewer bytes than a structure requires
    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: u64, actual: u64 },

    /// A signature did not match
    #[error("Invalid signature: expected {expected:?}, got {found:?}")]
    InvalidSignature {
        expected: &'static [u8; 4],
        found: [u8; 4],
    },

    /// A bound, version, or sanity check failed
    #[error("Malformed archive: {0}")]
    Malformed(String),

    /// ITSF version outside the supported set {2, 3}
    #[error("Unsupported ITSF version: {0}")]
    UnsupportedVersion(u32),

    /// LZX window size the codec cannot be configured for
    #[error("Unsupported LZX window size: {0:#x}")]
    UnsupportedWindowSize(u32),

    /// LZXC reset interval that is not a multiple of half the window
    #[error("Unsupported LZX reset interval {interval:#x} for window size {window:#x}")]
    UnsupportedResetInterval { interval: u32, window: u32 },

    /// The LZX decoder reported a failure
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// A compressed read was issued while compression is disabled
    #[error("Compression is not enabled for this archive")]
    CompressionDisabled,
}
