//! Storage: the block database behind the compaction chain.

use lattice_types::{Block, H256};
use thiserror::Error;

/// Errors from block-database implementations.
///
/// Storage failures are invariant violations for the engine: the
/// orchestrator aborts rather than risk corrupting the compaction chain.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested block is not stored.
    #[error("block not found")]
    NotFound,

    /// A block with the same hash is already stored.
    #[error("block already exists")]
    AlreadyExists,

    /// Backend I/O failure.
    #[error("database I/O error: {0}")]
    Io(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Keyed block storage. The on-disk format is a deployment concern; the
/// engine only needs get/put/update semantics.
pub trait BlockDatabase: Send + Sync {
    /// Whether a block with `hash` is stored.
    fn has(&self, hash: &H256) -> bool;

    /// Fetches a block by hash.
    fn get(&self, hash: &H256) -> StorageResult<Block>;

    /// Stores a new block.
    fn put(&self, block: Block) -> StorageResult<()>;

    /// Replaces a stored block (witness/randomness updates after delivery).
    fn update(&self, block: Block) -> StorageResult<()>;
}
