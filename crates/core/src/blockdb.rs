//! In-memory block database.

use crate::traits::{BlockDatabase, StorageError, StorageResult};
use lattice_types::{Block, H256};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Hash-map backed [`BlockDatabase`], used by tests and single-process
/// deployments.
#[derive(Default)]
pub struct MemoryBlockDatabase {
    blocks: RwLock<HashMap<H256, Block>>,
}

impl MemoryBlockDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockDatabase for MemoryBlockDatabase {
    fn has(&self, hash: &H256) -> bool {
        self.blocks.read().contains_key(hash)
    }

    fn get(&self, hash: &H256) -> StorageResult<Block> {
        self.blocks
            .read()
            .get(hash)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn put(&self, block: Block) -> StorageResult<()> {
        let mut blocks = self.blocks.write();
        if blocks.contains_key(&block.hash) {
            return Err(StorageError::AlreadyExists);
        }
        blocks.insert(block.hash, block);
        Ok(())
    }

    fn update(&self, block: Block) -> StorageResult<()> {
        let mut blocks = self.blocks.write();
        if !blocks.contains_key(&block.hash) {
            return Err(StorageError::NotFound);
        }
        blocks.insert(block.hash, block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with_payload(payload: &[u8]) -> Block {
        let mut block = Block {
            payload: payload.to_vec(),
            ..Default::default()
        };
        block.hash = block.compute_hash();
        block
    }

    #[test]
    fn test_put_get_update() {
        let db = MemoryBlockDatabase::new();
        let mut block = block_with_payload(b"a");
        db.put(block.clone()).unwrap();
        assert!(db.has(&block.hash));

        assert!(matches!(
            db.put(block.clone()),
            Err(StorageError::AlreadyExists)
        ));

        block.witness.height = 7;
        db.update(block.clone()).unwrap();
        assert_eq!(db.get(&block.hash).unwrap().witness.height, 7);
    }

    #[test]
    fn test_update_missing_fails() {
        let db = MemoryBlockDatabase::new();
        let block = block_with_payload(b"a");
        assert!(matches!(db.update(block), Err(StorageError::NotFound)));
    }
}
