//! The compaction chain: linear finalization of delivered blocks.
//!
//! Delivery appends each block to a hash-linked linear chain by assigning
//! `witness.height = prev + 1`. Witness acks from peers checkpoint the chain;
//! only the latest ack per peer is kept, and an ack is accepted only when its
//! witness height strictly exceeds the stored one. Post-confirmation
//! randomness is attached to stored blocks, buffered when the block has not
//! been delivered yet.

use crate::authenticator::verify_witness_ack_signature;
use lattice_core::{BlockDatabase, StorageError};
use lattice_crypto::CryptoError;
use lattice_types::{Block, NodeId, WitnessAck, H256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from the compaction chain.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The witness-ack signature does not recover to its proposer.
    #[error("signature of witness ack is incorrect")]
    IncorrectWitnessAckSignature,

    /// A newer ack from the same peer is already stored.
    #[error("witness ack height does not advance")]
    StaleWitnessAck,

    /// Block storage failed; fatal for the caller.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Cryptographic failure while checking an ack.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The linear chain of delivered blocks.
pub struct CompactionChain {
    db: Arc<dyn BlockDatabase>,
    tip_hash: Option<H256>,
    tip_witness_height: u64,
    witness_acks: HashMap<NodeId, WitnessAck>,
    pending_randomness: HashMap<H256, Vec<u8>>,
}

impl CompactionChain {
    /// Creates an empty compaction chain over a block database.
    pub fn new(db: Arc<dyn BlockDatabase>) -> Self {
        Self {
            db,
            tip_hash: None,
            tip_witness_height: 0,
            witness_acks: HashMap::new(),
            pending_randomness: HashMap::new(),
        }
    }

    /// Appends a delivered block: chains the witness height and attaches any
    /// buffered randomness.
    pub fn process_block(&mut self, block: &mut Block) {
        block.witness.height = match self.tip_hash {
            None => 1,
            Some(_) => self.tip_witness_height + 1,
        };
        if let Some(randomness) = self.pending_randomness.remove(&block.hash) {
            block.randomness = randomness;
        }
        self.tip_hash = Some(block.hash);
        self.tip_witness_height = block.witness.height;
        debug!(hash = %block.hash, height = block.witness.height, "block finalized");
    }

    /// Validates and stores a peer's witness ack.
    pub fn process_witness_ack(&mut self, ack: WitnessAck) -> Result<(), CompactionError> {
        if !verify_witness_ack_signature(&ack)? {
            return Err(CompactionError::IncorrectWitnessAckSignature);
        }
        if let Some(existing) = self.witness_acks.get(&ack.proposer_id) {
            if ack.witness_height <= existing.witness_height {
                return Err(CompactionError::StaleWitnessAck);
            }
        }
        self.witness_acks.insert(ack.proposer_id, ack);
        Ok(())
    }

    /// Attaches threshold randomness to a confirmed block, buffering it when
    /// the block has not been delivered yet.
    pub fn process_block_randomness(
        &mut self,
        hash: H256,
        randomness: Vec<u8>,
    ) -> Result<(), CompactionError> {
        match self.db.get(&hash) {
            Ok(mut block) => {
                block.randomness = randomness;
                self.db.update(block)?;
                Ok(())
            }
            Err(StorageError::NotFound) => {
                self.pending_randomness.insert(hash, randomness);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Latest witness ack per peer (a defensive copy).
    pub fn witness_acks(&self) -> HashMap<NodeId, WitnessAck> {
        self.witness_acks.clone()
    }

    /// Hash of the latest finalized block.
    pub fn tip_hash(&self) -> Option<H256> {
        self.tip_hash
    }

    /// Witness height of the latest finalized block.
    pub fn tip_witness_height(&self) -> u64 {
        self.tip_witness_height
    }
}

impl std::fmt::Debug for CompactionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionChain")
            .field("tip_witness_height", &self.tip_witness_height)
            .field("witness_acks", &self.witness_acks.len())
            .finish()
    }
}
