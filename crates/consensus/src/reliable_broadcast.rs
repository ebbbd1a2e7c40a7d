//! Reliable broadcast: the cross-chain acking lattice.
//!
//! Confirmed blocks from every chain are threaded into per-chain linked
//! chains plus a DAG of cross-chain acks. A block whose parent or ack
//! targets are still unknown is buffered and admitted once its dependencies
//! arrive. A block is **strongly acked** once blocks from more than
//! `2|N|/3` distinct proposers on other chains ack it, directly or
//! transitively; only strongly-acked blocks flow on to total ordering, in
//! the order they crossed the threshold.

use lattice_types::{Block, NodeId, H256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from lattice validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// The chain id exceeds the configured chain count.
    #[error("invalid chain id: {0}")]
    InvalidChainId(u32),

    /// Height or parent linkage contradicts the chain tip.
    #[error("position of block is incorrect")]
    IncorrectPosition,

    /// An ack references a block on the block's own chain.
    #[error("block acks its own chain")]
    InvalidAck,
}

#[derive(Default, Clone)]
struct ChainStatus {
    /// Hash of the tip block; `None` before genesis.
    tip: Option<H256>,
    /// Next expected height.
    next_height: u64,
    /// Timestamp of the tip block (nanoseconds).
    tip_timestamp: i64,
}

/// The acking lattice.
pub struct ReliableBroadcast {
    num_chains: u32,
    nodes: BTreeSet<NodeId>,
    chains: Vec<ChainStatus>,
    /// Admitted blocks by hash.
    blocks: HashMap<H256, Block>,
    /// Blocks waiting for unknown dependencies.
    pending: HashMap<H256, Block>,
    /// Per target block: proposers on other chains that (transitively) ack it.
    ackers: HashMap<H256, BTreeSet<NodeId>>,
    /// Direct ack targets per admitted block, for transitive walks.
    targets: HashMap<H256, Vec<H256>>,
    /// Hashes already acked by each chain, to avoid re-acking in proposals.
    acked_by_chain: Vec<HashSet<H256>>,
    strongly_acked: HashSet<H256>,
    /// Strongly-acked blocks not yet handed to total ordering.
    extracted: Vec<Block>,
}

impl ReliableBroadcast {
    /// Creates an empty lattice.
    pub fn new() -> Self {
        Self {
            num_chains: 0,
            nodes: BTreeSet::new(),
            chains: Vec::new(),
            blocks: HashMap::new(),
            pending: HashMap::new(),
            ackers: HashMap::new(),
            targets: HashMap::new(),
            acked_by_chain: Vec::new(),
            strongly_acked: HashSet::new(),
            extracted: Vec::new(),
        }
    }

    /// Sets the number of chains.
    pub fn set_chain_num(&mut self, num_chains: u32) {
        self.num_chains = num_chains;
        self.chains = vec![ChainStatus::default(); num_chains as usize];
        self.acked_by_chain = vec![HashSet::new(); num_chains as usize];
    }

    /// Registers a node for the strong-ack threshold.
    pub fn add_node(&mut self, id: NodeId) {
        self.nodes.insert(id);
    }

    /// Next height on `chain_id`.
    pub fn next_height(&self, chain_id: u32) -> u64 {
        self.chains
            .get(chain_id as usize)
            .map(|c| c.next_height)
            .unwrap_or(0)
    }

    /// Timestamp of the tip of `chain_id`; zero before genesis.
    pub fn chain_time(&self, chain_id: u32) -> i64 {
        self.chains
            .get(chain_id as usize)
            .map(|c| c.tip_timestamp)
            .unwrap_or(0)
    }

    /// Number of configured chains.
    pub fn chain_num(&self) -> u32 {
        self.num_chains
    }

    /// Fills parentage and acks of a block about to be proposed.
    ///
    /// The parent is the current tip of the block's chain; the acks are the
    /// tips of every other chain this chain has not acked yet.
    pub fn prepare_block(&self, block: &mut Block) {
        let chain_id = block.position.chain_id as usize;
        let status = &self.chains[chain_id];
        block.parent_hash = status.tip.unwrap_or(H256::ZERO);
        block.position.height = status.next_height;
        block.acks.clear();
        for (other, other_status) in self.chains.iter().enumerate() {
            if other == chain_id {
                continue;
            }
            if let Some(tip) = other_status.tip {
                if !self.acked_by_chain[chain_id].contains(&tip) {
                    block.acks.insert(tip);
                }
            }
        }
    }

    /// Validates and admits a confirmed block, buffering it when its parent
    /// or ack targets are still unknown.
    pub fn process_block(&mut self, block: Block) -> Result<(), BroadcastError> {
        let chain_id = block.position.chain_id;
        if chain_id >= self.num_chains {
            return Err(BroadcastError::InvalidChainId(chain_id));
        }
        if self.blocks.contains_key(&block.hash) || self.pending.contains_key(&block.hash) {
            return Ok(());
        }
        for ack in &block.acks {
            if self
                .blocks
                .get(ack)
                .map(|target| target.position.chain_id == chain_id)
                .unwrap_or(false)
            {
                return Err(BroadcastError::InvalidAck);
            }
        }

        if !self.dependencies_known(&block) {
            trace!(hash = %block.hash, "buffering block with unknown dependencies");
            self.pending.insert(block.hash, block);
            return Ok(());
        }

        self.admit(block)?;
        self.drain_pending();
        Ok(())
    }

    /// Returns blocks that became strongly acked, in threshold-crossing
    /// order.
    pub fn extract_blocks(&mut self) -> Vec<Block> {
        std::mem::take(&mut self.extracted)
    }

    /// Whether `hash` is strongly acked already.
    pub fn is_strongly_acked(&self, hash: &H256) -> bool {
        self.strongly_acked.contains(hash)
    }

    fn dependencies_known(&self, block: &Block) -> bool {
        if !block.is_genesis() && !self.blocks.contains_key(&block.parent_hash) {
            return false;
        }
        block.acks.iter().all(|ack| self.blocks.contains_key(ack))
    }

    fn admit(&mut self, block: Block) -> Result<(), BroadcastError> {
        let chain_id = block.position.chain_id as usize;
        {
            let status = &self.chains[chain_id];
            if block.position.height != status.next_height {
                return Err(BroadcastError::IncorrectPosition);
            }
            let expected_parent = status.tip.unwrap_or(H256::ZERO);
            if block.parent_hash != expected_parent {
                return Err(BroadcastError::IncorrectPosition);
            }
        }

        let mut direct: Vec<H256> = Vec::with_capacity(block.acks.len() + 1);
        if !block.parent_hash.is_zero() {
            direct.push(block.parent_hash);
        }
        direct.extend(block.acks.iter().copied());

        let status = &mut self.chains[chain_id];
        status.tip = Some(block.hash);
        status.next_height = block.position.height + 1;
        status.tip_timestamp = block.timestamp;
        for ack in &block.acks {
            self.acked_by_chain[chain_id].insert(*ack);
        }

        self.targets.insert(block.hash, direct.clone());
        self.ackers.entry(block.hash).or_default();
        debug!(hash = %block.hash, position = %block.position, "block admitted to lattice");

        // Credit this proposer to everything reachable through the ack DAG.
        let proposer = block.proposer_id;
        let mut queue: VecDeque<H256> = direct.into();
        let mut seen: HashSet<H256> = HashSet::new();
        while let Some(target) = queue.pop_front() {
            if !seen.insert(target) {
                continue;
            }
            let target_chain = match self.blocks.get(&target) {
                Some(target_block) => target_block.position.chain_id,
                None => continue,
            };
            if target_chain != block.position.chain_id {
                self.ackers.entry(target).or_default().insert(proposer);
                self.check_strongly_acked(&target);
            }
            if let Some(next) = self.targets.get(&target) {
                queue.extend(next.iter().copied());
            }
        }

        self.blocks.insert(block.hash, block);
        Ok(())
    }

    fn check_strongly_acked(&mut self, hash: &H256) {
        if self.strongly_acked.contains(hash) {
            return;
        }
        let acker_count = self.ackers.get(hash).map(|s| s.len()).unwrap_or(0);
        if acker_count * 3 > self.nodes.len() * 2 {
            self.strongly_acked.insert(*hash);
            if let Some(block) = self.blocks.get(hash) {
                debug!(hash = %hash, "block strongly acked");
                self.extracted.push(block.clone());
            }
        }
    }

    fn drain_pending(&mut self) {
        loop {
            let ready: Vec<H256> = self
                .pending
                .iter()
                .filter(|(_, block)| self.dependencies_known(block))
                .map(|(hash, _)| *hash)
                .collect();
            if ready.is_empty() {
                return;
            }
            // Admit in chain order so heights line up.
            let mut blocks: Vec<Block> = ready
                .into_iter()
                .filter_map(|hash| self.pending.remove(&hash))
                .collect();
            blocks.sort_by_key(|b| (b.position.chain_id, b.position.height));
            for block in blocks {
                // A buffered block can still be stale; drop it quietly.
                let _ = self.admit(block);
            }
        }
    }
}

impl Default for ReliableBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReliableBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableBroadcast")
            .field("num_chains", &self.num_chains)
            .field("blocks", &self.blocks.len())
            .field("pending", &self.pending.len())
            .field("strongly_acked", &self.strongly_acked.len())
            .finish()
    }
}
