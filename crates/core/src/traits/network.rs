//! Network: message transport consumed by the engine.

use async_trait::async_trait;
use lattice_crypto::ecdsa::PublicKey;
use lattice_types::{
    AgreementResult, Block, BlockRandomnessResult, DkgPartialSignature, DkgPrivateShare, Position,
    Vote, WitnessAck, H256,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by network implementations.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The target peer is unknown or unreachable.
    #[error("peer unreachable")]
    PeerUnreachable,

    /// The network layer is shut down.
    #[error("network not running")]
    NotRunning,

    /// Generic transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for network operations.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Every message kind the engine sends or receives.
///
/// Dispatch in the orchestrator matches on this tagged union; no other
/// runtime type inspection happens anywhere in the engine.
#[derive(Debug, Clone)]
pub enum ConsensusMessage {
    /// A proposed or relayed block.
    Block(Box<Block>),
    /// An agreement vote.
    Vote(Vote),
    /// A directly-sent DKG private share.
    DkgPrivateShare(DkgPrivateShare),
    /// A broadcast partial threshold signature.
    DkgPartialSignature(DkgPartialSignature),
    /// A witness checkpoint over the compaction chain.
    WitnessAck(WitnessAck),
    /// A finished agreement, for fast-forwarding lagging nodes.
    AgreementResult(AgreementResult),
    /// Post-confirmation randomness for a block.
    BlockRandomness(BlockRandomnessResult),
}

/// Message transport consumed by the engine; implemented externally
/// (gossip fan-out, peer discovery and latency modelling live behind it).
#[async_trait]
pub trait Network: Send + Sync {
    /// Broadcasts a block to every peer.
    async fn broadcast_block(&self, block: &Block) -> NetworkResult<()>;

    /// Broadcasts an agreement vote to every peer.
    async fn broadcast_vote(&self, vote: &Vote) -> NetworkResult<()>;

    /// Broadcasts a DKG private share (used for anti-nack replies).
    async fn broadcast_dkg_private_share(&self, share: &DkgPrivateShare) -> NetworkResult<()>;

    /// Broadcasts a partial threshold signature.
    async fn broadcast_dkg_partial_signature(
        &self,
        psig: &DkgPartialSignature,
    ) -> NetworkResult<()>;

    /// Sends a DKG private share directly to one peer.
    async fn send_dkg_private_share(
        &self,
        target: &PublicKey,
        share: &DkgPrivateShare,
    ) -> NetworkResult<()>;

    /// Requests blocks by hash from peers.
    async fn pull_blocks(&self, hashes: &[H256]) -> NetworkResult<()>;

    /// Requests the votes of an agreement position from peers.
    async fn pull_votes(&self, position: Position) -> NetworkResult<()>;

    /// Requests block randomness by hash from peers.
    async fn pull_randomness(&self, hashes: &[H256]) -> NetworkResult<()>;

    /// Returns the inbound message stream.
    ///
    /// May be called once; the receiver is handed to the dispatch task. The
    /// channel is bounded so a full queue back-pressures the transport.
    fn receive_chan(&self) -> mpsc::Receiver<ConsensusMessage>;
}
