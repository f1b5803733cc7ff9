use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::block::{AgeBlock, Block, BlockType};
use crate::endpoint::EndpointId;
use crate::time::DtnTime;

/// Process-wide sequence counter for locally labeled bundles.
///
/// Two bundles created at the same timestamp on the same node must still
/// have distinct identities, so sequence numbers are never reused within a
/// process lifetime.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Composite identity of a bundle.
///
/// Two bundles with equal `BundleId` are the same logical bundle, no matter
/// what their other fields or blocks contain. The canonical string form
/// `"<timestamp>.<sequence>[.<offset>] <source>"` is the input for
/// identity-digest hashing (bloom filters, on-disk file names).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleId {
    /// Source endpoint of the bundle.
    pub source: EndpointId,
    /// Creation timestamp.
    pub timestamp: DtnTime,
    /// Sequence number within the creation second.
    pub sequence: u64,
    /// Fragment offset; `None` for unfragmented bundles.
    pub fragment_offset: Option<u64>,
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fragment_offset {
            Some(offset) => write!(
                f,
                "{}.{}.{} {}",
                self.timestamp, self.sequence, offset, self.source
            ),
            None => write!(f, "{}.{} {}", self.timestamp, self.sequence, self.source),
        }
    }
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({self})")
    }
}

/// Primary-block processing flags.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct BundleFlags {
    /// The bundle is a fragment of a larger bundle.
    pub fragment: bool,
    /// The sender requested custody transfer.
    pub custody_requested: bool,
    /// The destination is a singleton application endpoint.
    pub singleton_destination: bool,
    /// The sender requested a delivery report.
    pub delivery_report: bool,
}

/// A full bundle: primary fields plus an ordered sequence of extension
/// blocks.
///
/// Bundles are immutable value objects once constructed; storage never
/// mutates stored content, except that the age block's elapsed-seconds
/// value may be refreshed when a bundle is retrieved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Destination endpoint.
    pub destination: EndpointId,
    /// Source endpoint.
    pub source: EndpointId,
    /// Creation timestamp.
    pub timestamp: DtnTime,
    /// Sequence number within the creation second.
    pub sequence: u64,
    /// Fragment offset; `None` for unfragmented bundles.
    pub fragment_offset: Option<u64>,
    /// Lifetime in seconds; the bundle expires at `timestamp + lifetime`.
    pub lifetime: u64,
    /// Primary-block flags.
    pub flags: BundleFlags,
    /// Extension blocks in wire order.
    pub blocks: Vec<Block>,
}

impl Bundle {
    /// Create a new locally labeled bundle with a fresh sequence number
    /// and no blocks.
    pub fn new(
        source: EndpointId,
        destination: EndpointId,
        timestamp: DtnTime,
        lifetime: u64,
    ) -> Self {
        Self {
            destination,
            source,
            timestamp,
            sequence: next_sequence(),
            fragment_offset: None,
            lifetime,
            flags: BundleFlags::default(),
            blocks: Vec::new(),
        }
    }

    /// The identity of this bundle.
    pub fn id(&self) -> BundleId {
        BundleId {
            source: self.source.clone(),
            timestamp: self.timestamp,
            sequence: self.sequence,
            fragment_offset: self.fragment_offset,
        }
    }

    /// Give the bundle a fresh identity by assigning the next sequence
    /// number. Used when a node reuses a bundle template for a new
    /// transmission.
    pub fn relabel(&mut self) {
        self.sequence = next_sequence();
    }

    /// Append a payload block.
    pub fn push_payload(&mut self, data: Vec<u8>) {
        self.blocks.push(Block::payload(data));
    }

    /// Append an age block carrying the given elapsed seconds.
    pub fn push_age(&mut self, seconds: u64) {
        self.blocks.push(AgeBlock::new(seconds).to_block());
    }

    /// The payload bytes, if a payload block is present.
    pub fn payload(&self) -> Option<&[u8]> {
        self.blocks
            .iter()
            .find(|b| b.block_type == BlockType::Payload)
            .map(|b| b.data.as_slice())
    }

    /// The age counter in seconds, if an age block is present.
    pub fn age_seconds(&self) -> Option<u64> {
        self.blocks
            .iter()
            .find(|b| b.block_type == BlockType::Age)
            .and_then(|b| AgeBlock::from_block(b).ok())
            .map(|age| age.seconds)
    }

    /// Overwrite the age counter. Returns `false` if the bundle carries no
    /// age block.
    pub fn set_age_seconds(&mut self, seconds: u64) -> bool {
        match self
            .blocks
            .iter_mut()
            .find(|b| b.block_type == BlockType::Age)
        {
            Some(block) => {
                *block = AgeBlock::new(seconds).to_block();
                true
            }
            None => false,
        }
    }
}
