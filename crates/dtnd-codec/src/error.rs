use std::io;

/// Errors from encoding or decoding bundle frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame does not start with the expected magic bytes.
    #[error("bad magic: expected \"DTB1\", got {actual:02x?}")]
    BadMagic { actual: [u8; 4] },

    /// The input ended before the frame was complete.
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// A section length field exceeds the allowed maximum.
    #[error("{section} length {length} exceeds maximum {max}")]
    SectionTooLarge {
        section: &'static str,
        length: u32,
        max: u32,
    },

    /// CRC32 integrity check failed for a frame section.
    #[error("{section} CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        section: &'static str,
        expected: u32,
        actual: u32,
    },

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failure.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// I/O error while reading a frame from a stream.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
