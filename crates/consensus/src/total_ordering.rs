//! Deterministic linearization of the strongly-acked lattice.
//!
//! Strongly-acked blocks arrive in admission order. A pending block is a
//! **candidate** once every block it directly acks has been delivered. A
//! candidate becomes **READY** when blocks on at least `phi` distinct chains
//! (counting its own) transitively ack it. With `K = 0` a batch is emitted
//! only when every READY candidate is acked by all chains (fully stable);
//! with `K > 0` READY candidates are emitted as soon as the threshold holds
//! and the batch is flagged `early` if any member is not yet acked by every
//! chain.
//!
//! Within a batch, blocks are emitted in ascending hash order, so two
//! instances fed the same lattice deliver byte-identical sequences.

use lattice_types::{Block, H256};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

struct PendingBlock {
    block: Block,
    /// Direct ack targets (parent + cross-chain acks).
    targets: Vec<H256>,
    /// Pending blocks that transitively ack this one.
    acked_by: BTreeSet<H256>,
}

/// The total-ordering module.
pub struct TotalOrdering {
    k: u32,
    phi: u64,
    num_chains: u32,
    /// Pending blocks in admission order.
    pending: Vec<H256>,
    blocks: HashMap<H256, PendingBlock>,
    delivered: HashSet<H256>,
}

impl TotalOrdering {
    /// Creates an instance with the round's `(K, φ, NumChains)` parameters.
    pub fn new(k: u32, phi: u64, num_chains: u32) -> Self {
        Self {
            k,
            phi,
            num_chains,
            pending: Vec::new(),
            blocks: HashMap::new(),
            delivered: HashSet::new(),
        }
    }

    /// Admits one strongly-acked block and returns every batch that became
    /// deliverable, flattened, plus the early-delivery flag.
    pub fn process_block(&mut self, block: &Block) -> (Vec<Block>, bool) {
        let hash = block.hash;
        if self.delivered.contains(&hash) || self.blocks.contains_key(&hash) {
            return (Vec::new(), false);
        }

        let mut targets: Vec<H256> = Vec::with_capacity(block.acks.len() + 1);
        if !block.parent_hash.is_zero() {
            targets.push(block.parent_hash);
        }
        targets.extend(block.acks.iter().copied());

        // Propagate: this block transitively acks everything reachable
        // through pending targets.
        let mut reach: Vec<H256> = targets
            .iter()
            .copied()
            .filter(|t| self.blocks.contains_key(t))
            .collect();
        let mut seen: HashSet<H256> = reach.iter().copied().collect();
        while let Some(target) = reach.pop() {
            if let Some(entry) = self.blocks.get_mut(&target) {
                entry.acked_by.insert(hash);
                let next: Vec<H256> = entry
                    .targets
                    .iter()
                    .copied()
                    .filter(|t| !seen.contains(t))
                    .collect();
                for t in next {
                    if self.blocks.contains_key(&t) {
                        seen.insert(t);
                        reach.push(t);
                    }
                }
            }
        }

        self.pending.push(hash);
        self.blocks.insert(
            hash,
            PendingBlock {
                block: block.clone(),
                targets,
                acked_by: BTreeSet::new(),
            },
        );
        trace!(hash = %hash, "block admitted to total ordering");

        self.extract()
    }

    /// Chains (including its own) with a pending block transitively acking
    /// `hash`.
    fn acking_chains(&self, hash: &H256) -> BTreeSet<u32> {
        let entry = &self.blocks[hash];
        let mut chains: BTreeSet<u32> = BTreeSet::new();
        chains.insert(entry.block.position.chain_id);
        for acker in &entry.acked_by {
            if let Some(acker_entry) = self.blocks.get(acker) {
                chains.insert(acker_entry.block.position.chain_id);
            }
        }
        chains
    }

    fn candidates(&self) -> Vec<H256> {
        self.pending
            .iter()
            .copied()
            .filter(|hash| {
                self.blocks[hash]
                    .targets
                    .iter()
                    .all(|t| !self.blocks.contains_key(t))
            })
            .collect()
    }

    /// Repeatedly extracts deliverable antichains until none remains.
    fn extract(&mut self) -> (Vec<Block>, bool) {
        let mut delivered: Vec<Block> = Vec::new();
        let mut early = false;

        loop {
            let ready: Vec<H256> = self
                .candidates()
                .into_iter()
                .filter(|hash| self.acking_chains(hash).len() as u64 >= self.phi)
                .collect();
            if ready.is_empty() {
                break;
            }

            let batch: Vec<H256> = if self.k == 0 {
                // Only fully-stable antichains: every READY candidate must be
                // acked by all chains.
                let stable: Vec<H256> = ready
                    .iter()
                    .copied()
                    .filter(|hash| self.acking_chains(hash).len() as u32 == self.num_chains)
                    .collect();
                if stable.len() != ready.len() || stable.is_empty() {
                    break;
                }
                stable
            } else {
                for hash in &ready {
                    if (self.acking_chains(hash).len() as u32) < self.num_chains {
                        early = true;
                    }
                }
                ready
            };

            // Fixed tie-breaker: ascending block hash.
            let mut ordered = batch;
            ordered.sort();
            debug!(count = ordered.len(), early = early, "delivering antichain");
            for hash in ordered {
                let Some(entry) = self.blocks.remove(&hash) else {
                    continue;
                };
                self.delivered.insert(hash);
                delivered.push(entry.block);
            }
            self.pending.retain(|h| self.blocks.contains_key(h));
        }

        (delivered, early)
    }

    /// Number of blocks still pending.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for TotalOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotalOrdering")
            .field("k", &self.k)
            .field("phi", &self.phi)
            .field("num_chains", &self.num_chains)
            .field("pending", &self.pending.len())
            .field("delivered", &self.delivered.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{NodeId, Position};

    fn make_block(
        chain_id: u32,
        height: u64,
        parent: H256,
        acks: &[H256],
        tag: &str,
    ) -> Block {
        let mut block = Block {
            proposer_id: NodeId(H256::keccak256(tag.as_bytes())),
            parent_hash: parent,
            position: Position {
                round: 0,
                shard_id: 0,
                chain_id,
                height,
            },
            payload: tag.as_bytes().to_vec(),
            acks: acks.iter().copied().collect(),
            ..Default::default()
        };
        block.hash = block.compute_hash();
        block
    }

    #[test]
    fn test_single_chain_fifo() {
        let mut to = TotalOrdering::new(0, 1, 1);
        let a = make_block(0, 0, H256::ZERO, &[], "a");
        let b = make_block(0, 1, a.hash, &[], "b");

        let (delivered, early) = to.process_block(&a);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].hash, a.hash);
        assert!(!early);

        let (delivered, _) = to.process_block(&b);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].hash, b.hash);
    }

    #[test]
    fn test_two_chains_wait_for_cross_ack() {
        let mut to = TotalOrdering::new(0, 2, 2);
        let a = make_block(0, 0, H256::ZERO, &[], "a");
        // Nothing acks a yet; not deliverable.
        let (delivered, _) = to.process_block(&a);
        assert!(delivered.is_empty());

        // A block on chain 1 acking a makes it stable for both chains.
        let b = make_block(1, 0, H256::ZERO, &[a.hash], "b");
        let (delivered, early) = to.process_block(&b);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].hash, a.hash);
        assert!(!early);
    }

    #[test]
    fn test_early_delivery_with_positive_k() {
        // Three chains, phi = 2, K > 0: two acking chains suffice and the
        // batch is flagged early.
        let mut to = TotalOrdering::new(1, 2, 3);
        let a = make_block(0, 0, H256::ZERO, &[], "a");
        to.process_block(&a);
        let b = make_block(1, 0, H256::ZERO, &[a.hash], "b");
        let (delivered, early) = to.process_block(&b);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].hash, a.hash);
        assert!(early);
    }
}
