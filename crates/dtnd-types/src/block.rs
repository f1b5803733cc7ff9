use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Extension block type codes.
///
/// The storage engine treats block contents as opaque bytes. Only two
/// well-known codes are interpreted: the payload block and the age block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    /// The bundle payload (code 1).
    Payload,
    /// Elapsed-seconds age counter (code 10).
    Age,
    /// Any other extension block, carried verbatim.
    Other(u8),
}

impl BlockType {
    /// The wire code for this block type.
    pub fn code(&self) -> u8 {
        match self {
            Self::Payload => 1,
            Self::Age => 10,
            Self::Other(code) => *code,
        }
    }

    /// Resolve a wire code to a block type.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Payload,
            10 => Self::Age,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload => write!(f, "payload"),
            Self::Age => write!(f, "age"),
            Self::Other(code) => write!(f, "block({code})"),
        }
    }
}

/// A single extension block: a type tag and opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The type of this block.
    pub block_type: BlockType,
    /// The raw block data.
    pub data: Vec<u8>,
}

impl Block {
    /// Create a block from a type and raw bytes.
    pub fn new(block_type: BlockType, data: Vec<u8>) -> Self {
        Self { block_type, data }
    }

    /// Create a payload block.
    pub fn payload(data: Vec<u8>) -> Self {
        Self::new(BlockType::Payload, data)
    }

    /// Length of the block data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the block carries no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The age extension block: seconds a bundle has existed.
///
/// Unlike the creation timestamp, the age counter survives hops between
/// nodes without synchronized clocks. Storage refreshes it on retrieval to
/// account for the time a bundle spent resident.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgeBlock {
    /// Elapsed seconds.
    pub seconds: u64,
}

impl AgeBlock {
    /// Create an age block with the given elapsed seconds.
    pub fn new(seconds: u64) -> Self {
        Self { seconds }
    }

    /// Encode into a generic [`Block`] (8 bytes, little-endian).
    pub fn to_block(&self) -> Block {
        Block::new(BlockType::Age, self.seconds.to_le_bytes().to_vec())
    }

    /// Decode from a generic [`Block`].
    pub fn from_block(block: &Block) -> Result<Self, TypeError> {
        if block.block_type != BlockType::Age {
            return Err(TypeError::WrongBlockType {
                expected: BlockType::Age,
                actual: block.block_type,
            });
        }
        let bytes: [u8; 8] = block
            .data
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidAgeData(block.data.len()))?;
        Ok(Self {
            seconds: u64::from_le_bytes(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_codes_roundtrip() {
        for bt in [BlockType::Payload, BlockType::Age, BlockType::Other(42)] {
            assert_eq!(BlockType::from_code(bt.code()), bt);
        }
    }

    #[test]
    fn reserved_codes_resolve_to_known_types() {
        assert_eq!(BlockType::from_code(1), BlockType::Payload);
        assert_eq!(BlockType::from_code(10), BlockType::Age);
        assert_eq!(BlockType::from_code(99), BlockType::Other(99));
    }

    #[test]
    fn age_block_roundtrip() {
        let age = AgeBlock::new(42);
        let block = age.to_block();
        assert_eq!(block.block_type, BlockType::Age);
        assert_eq!(block.len(), 8);
        assert_eq!(AgeBlock::from_block(&block).unwrap(), age);
    }

    #[test]
    fn age_block_rejects_wrong_type() {
        let block = Block::payload(vec![0; 8]);
        let err = AgeBlock::from_block(&block).unwrap_err();
        assert!(matches!(err, TypeError::WrongBlockType { .. }));
    }

    #[test]
    fn age_block_rejects_short_data() {
        let block = Block::new(BlockType::Age, vec![1, 2, 3]);
        let err = AgeBlock::from_block(&block).unwrap_err();
        assert!(matches!(err, TypeError::InvalidAgeData(3)));
    }
}
