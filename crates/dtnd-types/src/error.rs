use crate::block::BlockType;

/// Errors from constructing or converting foundation types.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// The endpoint string is not a valid DTN URI.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A block of one type was interpreted as another.
    #[error("wrong block type: expected {expected}, got {actual}")]
    WrongBlockType {
        expected: BlockType,
        actual: BlockType,
    },

    /// An age block payload has the wrong length.
    #[error("invalid age block data: expected 8 bytes, got {0}")]
    InvalidAgeData(usize),
}
