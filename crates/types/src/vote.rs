//! Byzantine Agreement votes and witness acknowledgements.

use crate::block::Position;
use crate::hash::H256;
use crate::node::NodeId;
use lattice_crypto::ecdsa::Signature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an agreement vote.
///
/// The per-chain agreement walks Prepare → Ack → Confirm states; each state
/// emits one vote kind. Two votes from the same voter with the same kind,
/// position and period but different block hashes are an equivocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    /// Candidate announcement emitted by the Prepare state.
    Init,
    /// Acknowledgement emitted by the Ack state (`SKIP` when no candidate
    /// gathered the threshold).
    PreCom,
    /// Commitment emitted by the Confirm state.
    Com,
}

impl VoteType {
    fn as_byte(self) -> u8 {
        match self {
            VoteType::Init => 0,
            VoteType::PreCom => 1,
            VoteType::Com => 2,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::Init => write!(f, "Init"),
            VoteType::PreCom => write!(f, "PreCom"),
            VoteType::Com => write!(f, "Com"),
        }
    }
}

/// A single agreement vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Kind of the vote.
    pub vote_type: VoteType,
    /// Block hash voted for; `H256::SKIP` acknowledges "no block".
    pub block_hash: H256,
    /// Lattice coordinates being agreed on.
    pub position: Position,
    /// Agreement period (increments on timeout).
    pub period: u64,
    /// Identity of the voter.
    pub proposer_id: NodeId,
    /// Voter's recoverable ECDSA signature over [`Vote::signing_bytes`].
    pub signature: Signature,
}

impl Vote {
    /// Creates a new unsigned vote.
    pub fn new(
        vote_type: VoteType,
        block_hash: H256,
        position: Position,
        period: u64,
        proposer_id: NodeId,
    ) -> Self {
        Self {
            vote_type,
            block_hash,
            position,
            period,
            proposer_id,
            signature: Signature::default(),
        }
    }

    /// Canonical signing encoding:
    /// `type(u8) ‖ block_hash(32) ‖ round(u64) ‖ chain_id(u32) ‖ height(u64) ‖ period(u64)`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 8 + 4 + 8 + 8);
        out.push(self.vote_type.as_byte());
        out.extend_from_slice(self.block_hash.as_bytes());
        out.extend_from_slice(&self.position.round.to_be_bytes());
        out.extend_from_slice(&self.position.chain_id.to_be_bytes());
        out.extend_from_slice(&self.position.height.to_be_bytes());
        out.extend_from_slice(&self.period.to_be_bytes());
        out
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}p{} by {}",
            self.vote_type, self.position, self.period, self.proposer_id
        )
    }
}

/// A periodic signed checkpoint over the compaction-chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessAck {
    /// Identity of the acking node.
    pub proposer_id: NodeId,
    /// Hash of the delivered block being acknowledged.
    pub witness_block_hash: H256,
    /// Compaction-chain height of that block.
    pub witness_height: u64,
    /// Keccak256 of [`WitnessAck::signing_bytes`].
    pub hash: H256,
    /// Acking node's recoverable ECDSA signature over `hash`.
    pub signature: Signature,
}

impl WitnessAck {
    /// Canonical signing encoding: `witness_block_hash(32) ‖ witness_height(u64)`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 8);
        out.extend_from_slice(self.witness_block_hash.as_bytes());
        out.extend_from_slice(&self.witness_height.to_be_bytes());
        out
    }

    /// Computes the ack hash over the signing encoding.
    pub fn compute_hash(&self) -> H256 {
        H256::keccak256(&self.signing_bytes())
    }
}

/// Result of a finished agreement, carrying the confirming votes so lagging
/// nodes can fast-forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementResult {
    /// The confirmed block hash.
    pub block_hash: H256,
    /// Position the agreement ran for.
    pub position: Position,
    /// The `Com` votes that crossed the threshold.
    pub votes: Vec<Vote>,
}

/// On-chain randomness for a confirmed block: the group threshold signature
/// over the block hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRandomnessResult {
    /// Hash of the confirmed block.
    pub block_hash: H256,
    /// Position of the confirmed block.
    pub position: Position,
    /// The group threshold signature bytes.
    pub randomness: Vec<u8>,
}
