//! Lattice blocks and their canonical encoding.
//!
//! A block lives on exactly one chain of the lattice. Its parent is the
//! previous block on the same chain; its `acks` reference the tips of other
//! chains observed at proposal time. The block hash is the Keccak256 of the
//! canonical encoding below, which covers every field except the hash itself,
//! the signatures, the post-confirmation randomness and the consensus
//! timestamp assigned at delivery.
//!
//! Canonical encoding (all integers big-endian):
//!
//! ```text
//! proposer_id(32) ‖ parent_hash(32) ‖ round(u64) ‖ chain_id(u32) ‖
//! height(u64) ‖ timestamp(i64, nanos) ‖ len(payload)(u32) ‖ payload ‖
//! sorted_acks(each 32) ‖ witness.height(u64) ‖ witness.data
//! ```

use crate::hash::H256;
use crate::node::NodeId;
use lattice_crypto::ecdsa::Signature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Coordinates of a block (or a vote) in the lattice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    /// Consensus round the block belongs to.
    pub round: u64,
    /// Shard; always zero in the current protocol.
    pub shard_id: u32,
    /// Chain within the lattice.
    pub chain_id: u32,
    /// Height on that chain.
    pub height: u64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(r={}, c={}, h={})",
            self.round, self.chain_id, self.height
        )
    }
}

/// Witness data chaining delivered blocks to application results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// Height on the compaction chain; assigned at delivery.
    pub height: u64,
    /// Application result of the previously delivered block.
    pub data: Vec<u8>,
}

/// A block proposed on one chain of the lattice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Identity of the proposing node.
    pub proposer_id: NodeId,
    /// Hash of the previous block on the same chain; zero for genesis.
    pub parent_hash: H256,
    /// Lattice coordinates.
    pub position: Position,
    /// Proposal wall-clock time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// Hashes of acknowledged blocks on other chains.
    pub acks: BTreeSet<H256>,
    /// Witness of the compaction chain.
    pub witness: Witness,
    /// Keccak256 of the canonical encoding.
    pub hash: H256,
    /// Proposer's recoverable ECDSA signature over the hash.
    pub signature: Signature,
    /// Proposer's signature binding the round CRS to the block hash.
    pub crs_signature: Signature,
    /// Group threshold signature, filled after confirmation.
    pub randomness: Vec<u8>,
    /// Consensus time assigned at delivery, nanoseconds since the Unix epoch.
    pub consensus_timestamp: i64,
}

impl Block {
    /// Serializes the consensus-critical fields into the canonical form.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.payload.len() + self.acks.len() * 32);
        out.extend_from_slice(self.proposer_id.as_bytes());
        out.extend_from_slice(self.parent_hash.as_bytes());
        out.extend_from_slice(&self.position.round.to_be_bytes());
        out.extend_from_slice(&self.position.chain_id.to_be_bytes());
        out.extend_from_slice(&self.position.height.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        // BTreeSet iterates in ascending order, which is the sorted form.
        for ack in &self.acks {
            out.extend_from_slice(ack.as_bytes());
        }
        out.extend_from_slice(&self.witness.height.to_be_bytes());
        out.extend_from_slice(&self.witness.data);
        out
    }

    /// Computes the block hash over the canonical encoding.
    pub fn compute_hash(&self) -> H256 {
        H256::keccak256(&self.canonical_bytes())
    }

    /// A genesis block starts a chain: height zero and no parent.
    pub fn is_genesis(&self) -> bool {
        self.position.height == 0 && self.parent_hash.is_zero()
    }

    /// Whether this block acknowledges `hash` directly (parent included).
    pub fn is_acking(&self, hash: &H256) -> bool {
        !self.parent_hash.is_zero() && (&self.parent_hash == hash || self.acks.contains(hash))
    }
}
