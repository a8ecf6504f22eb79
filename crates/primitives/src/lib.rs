//! Core value types shared across the extraction pipeline.
//!
//! All payloads are stored opaquely as canonical JSON bytes. The extraction
//! pipeline never decodes them into domain objects; downstream query services
//! parse fields out of the stored JSON.

/// The height of a block on the source chain.
pub type BlockHeight = u64;

/// A block of the source chain, addressed by height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block height. Non-zero and monotonically increasing on-chain.
    pub height: BlockHeight,
    /// Canonical JSON serialization of the block RPC response.
    pub data: Vec<u8>,
}

impl Block {
    /// Creates a new block from its height and raw JSON payload.
    pub fn new(height: BlockHeight, data: Vec<u8>) -> Self {
        Self { height, data }
    }
}

/// A transaction contained within a block, addressed by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// The transaction hash. Globally unique across blocks.
    pub hash: String,
    /// Canonical JSON serialization of the decoded transaction.
    pub data: Vec<u8>,
}

/// Consensus-level results associated with a finalized block.
///
/// Contains events that do not appear as transactions: validator slashing,
/// jailing, validator-set updates, and consensus-parameter changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResults {
    /// The height of the block these results belong to.
    pub height: BlockHeight,
    /// Canonical JSON serialization of the block-results RPC response.
    pub data: Vec<u8>,
}
