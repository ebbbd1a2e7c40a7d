//! Consensus timestamps for delivered blocks.
//!
//! Each delivered block is assigned the median of the per-chain head
//! timestamps observed at delivery (after its own chain's head is updated
//! with the block's timestamp), clamped to be monotonic non-decreasing. The
//! first delivered block keeps its own timestamp, which the median of a
//! single populated entry yields naturally.

use lattice_types::Block;

/// Assigns consensus timestamps in delivery order.
pub struct ConsensusTimestamp {
    /// Latest observed timestamp per chain; `None` until a chain delivers.
    chain_heads: Vec<Option<i64>>,
    /// Timestamp of the previously delivered block.
    last: i64,
}

impl ConsensusTimestamp {
    /// Creates an instance for `num_chains` chains.
    pub fn new(num_chains: u32) -> Self {
        Self {
            chain_heads: vec![None; num_chains as usize],
            last: 0,
        }
    }

    /// Assigns `consensus_timestamp` to every block of a delivered batch,
    /// in order.
    pub fn process_blocks(&mut self, blocks: &mut [Block]) {
        for block in blocks {
            let chain = block.position.chain_id as usize;
            if chain < self.chain_heads.len() {
                self.chain_heads[chain] = Some(block.timestamp);
            }
            let median = self.median().unwrap_or(block.timestamp);
            let assigned = median.max(self.last);
            block.consensus_timestamp = assigned;
            self.last = assigned;
        }
    }

    fn median(&self) -> Option<i64> {
        let mut present: Vec<i64> = self.chain_heads.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }
        present.sort_unstable();
        Some(present[(present.len() - 1) / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Position;

    fn block_on(chain_id: u32, timestamp: i64) -> Block {
        let mut block = Block {
            position: Position {
                chain_id,
                ..Default::default()
            },
            timestamp,
            ..Default::default()
        };
        block.hash = block.compute_hash();
        block
    }

    #[test]
    fn test_first_block_keeps_own_timestamp() {
        let mut ct = ConsensusTimestamp::new(4);
        let mut blocks = vec![block_on(0, 1_000)];
        ct.process_blocks(&mut blocks);
        assert_eq!(blocks[0].consensus_timestamp, 1_000);
    }

    #[test]
    fn test_median_of_chain_heads() {
        let mut ct = ConsensusTimestamp::new(3);
        let mut batch = vec![block_on(0, 100), block_on(1, 300), block_on(2, 200)];
        ct.process_blocks(&mut batch);
        // Heads after the last block: [100, 300, 200] -> median 200.
        assert_eq!(batch[2].consensus_timestamp, 200);
    }

    #[test]
    fn test_monotonic_clamp() {
        let mut ct = ConsensusTimestamp::new(2);
        let mut batch = vec![block_on(0, 500), block_on(1, 100)];
        ct.process_blocks(&mut batch);
        assert_eq!(batch[0].consensus_timestamp, 500);
        // Raw median would drop to 100; the clamp holds it at 500.
        assert_eq!(batch[1].consensus_timestamp, 500);
    }

    #[test]
    fn test_never_decreasing_across_batches() {
        let mut ct = ConsensusTimestamp::new(2);
        let mut first = vec![block_on(0, 900)];
        ct.process_blocks(&mut first);
        let mut second = vec![block_on(1, 100)];
        ct.process_blocks(&mut second);
        assert!(second[0].consensus_timestamp >= first[0].consensus_timestamp);
    }
}
