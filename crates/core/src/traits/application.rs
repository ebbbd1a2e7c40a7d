//! Application: the downstream consumer of delivered blocks.

use lattice_types::{Block, Position, WitnessAck, H256};
use tokio::sync::mpsc;

/// Witness data handed back asynchronously after the application processed
/// a delivered block.
#[derive(Debug, Clone)]
pub struct BlockProcessed {
    /// Hash of the processed block.
    pub block_hash: H256,
    /// Application result bytes, chained into the next witness.
    pub data: Vec<u8>,
}

/// Downstream application callbacks.
///
/// Callbacks are invoked from the delivery pipeline while its lock is held;
/// implementations must return promptly and defer heavy work.
pub trait Application: Send + Sync {
    /// Produces the payload for a block about to be proposed at `position`.
    fn prepare_payload(&self, position: Position) -> Vec<u8>;

    /// A block was confirmed by Byzantine Agreement.
    fn block_confirmed(&self, hash: H256);

    /// A block became strongly acked in the reliable-broadcast lattice.
    fn strongly_acked(&self, hash: H256);

    /// Total ordering emitted a batch; `early` marks batches delivered
    /// before full stability.
    fn total_ordering_delivered(&self, hashes: Vec<H256>, early: bool);

    /// A block was finalized with its consensus timestamp and witness.
    fn block_delivered(&self, block: Block);

    /// A witness ack from a peer was accepted.
    fn witness_ack_delivered(&self, ack: &WitnessAck);

    /// Returns the stream of asynchronously processed blocks.
    ///
    /// May be called once; the engine's witness task consumes it.
    fn block_processed_chan(&self) -> mpsc::Receiver<BlockProcessed>;
}
