//! Reliable-broadcast lattice tests: validation, dependency buffering,
//! proposal preparation and the strong-ack threshold.

use lattice_consensus::reliable_broadcast::{BroadcastError, ReliableBroadcast};
use lattice_types::{Block, NodeId, Position, H256};

fn node(tag: &str) -> NodeId {
    NodeId(H256::keccak256(tag.as_bytes()))
}

fn make_block(
    proposer: NodeId,
    chain_id: u32,
    height: u64,
    parent: H256,
    acks: &[H256],
    timestamp: i64,
) -> Block {
    let mut block = Block {
        proposer_id: proposer,
        parent_hash: parent,
        position: Position {
            round: 0,
            shard_id: 0,
            chain_id,
            height,
        },
        timestamp,
        acks: acks.iter().copied().collect(),
        ..Default::default()
    };
    block.hash = block.compute_hash();
    block
}

fn lattice(num_chains: u32, nodes: &[NodeId]) -> ReliableBroadcast {
    let mut rb = ReliableBroadcast::new();
    rb.set_chain_num(num_chains);
    for id in nodes {
        rb.add_node(*id);
    }
    rb
}

#[test]
fn test_chain_bookkeeping() {
    let proposer = node("p");
    let mut rb = lattice(2, &[proposer]);

    assert_eq!(rb.next_height(0), 0);
    assert_eq!(rb.chain_time(0), 0);

    let genesis = make_block(proposer, 0, 0, H256::ZERO, &[], 1_000);
    rb.process_block(genesis.clone()).unwrap();
    assert_eq!(rb.next_height(0), 1);
    assert_eq!(rb.chain_time(0), 1_000);

    let child = make_block(proposer, 0, 1, genesis.hash, &[], 2_000);
    rb.process_block(child).unwrap();
    assert_eq!(rb.next_height(0), 2);
    assert_eq!(rb.chain_time(0), 2_000);
}

#[test]
fn test_position_validation() {
    let proposer = node("p");
    let mut rb = lattice(2, &[proposer]);

    // Chain out of range.
    let stray = make_block(proposer, 5, 0, H256::ZERO, &[], 0);
    assert!(matches!(
        rb.process_block(stray),
        Err(BroadcastError::InvalidChainId(5))
    ));

    let genesis = make_block(proposer, 0, 0, H256::ZERO, &[], 0);
    rb.process_block(genesis.clone()).unwrap();

    // Height not advancing from the tip.
    let repeat = make_block(proposer, 0, 0, H256::ZERO, &[], 0);
    assert!(matches!(
        rb.process_block(repeat),
        Err(BroadcastError::IncorrectPosition)
    ));

    // Reprocessing the identical block is a no-op.
    rb.process_block(genesis).unwrap();
}

#[test]
fn test_dependency_buffering() {
    let proposer = node("p");
    let mut rb = lattice(1, &[proposer]);

    let genesis = make_block(proposer, 0, 0, H256::ZERO, &[], 0);
    let child = make_block(proposer, 0, 1, genesis.hash, &[], 0);

    // The child arrives first, with its parent unknown; it must be held
    // back, then admitted when the parent lands.
    rb.process_block(child).unwrap();
    assert_eq!(rb.next_height(0), 0);

    rb.process_block(genesis).unwrap();
    assert_eq!(rb.next_height(0), 2);
}

#[test]
fn test_prepare_block_fills_parent_and_acks() {
    let proposer = node("p");
    let mut rb = lattice(3, &[proposer]);

    let g0 = make_block(node("a"), 0, 0, H256::ZERO, &[], 0);
    let g1 = make_block(node("b"), 1, 0, H256::ZERO, &[], 0);
    rb.process_block(g0.clone()).unwrap();
    rb.process_block(g1.clone()).unwrap();

    let mut block = Block {
        proposer_id: proposer,
        position: Position {
            round: 0,
            shard_id: 0,
            chain_id: 2,
            height: 0,
        },
        ..Default::default()
    };
    rb.prepare_block(&mut block);
    assert_eq!(block.parent_hash, H256::ZERO);
    assert_eq!(block.position.height, 0);
    assert!(block.acks.contains(&g0.hash));
    assert!(block.acks.contains(&g1.hash));

    // Once chain 2 acked those tips, a second proposal must not re-ack them.
    block.hash = block.compute_hash();
    rb.process_block(block.clone()).unwrap();
    let mut next = Block {
        proposer_id: proposer,
        position: Position {
            round: 0,
            shard_id: 0,
            chain_id: 2,
            height: 0,
        },
        ..Default::default()
    };
    rb.prepare_block(&mut next);
    assert_eq!(next.position.height, 1);
    assert_eq!(next.parent_hash, block.hash);
    assert!(next.acks.is_empty());
}

/// Strong ack requires more than two thirds of the node set acking from
/// other chains.
#[test]
fn test_strong_ack_threshold() {
    let nodes: Vec<NodeId> = (0..4).map(|i| node(&format!("n{i}"))).collect();
    let mut rb = lattice(4, &nodes);

    let g0 = make_block(nodes[0], 0, 0, H256::ZERO, &[], 0);
    rb.process_block(g0.clone()).unwrap();
    assert!(rb.extract_blocks().is_empty());

    // Two ackers from other chains: 2 of 4 nodes is not enough.
    let g1 = make_block(nodes[1], 1, 0, H256::ZERO, &[g0.hash], 0);
    let g2 = make_block(nodes[2], 2, 0, H256::ZERO, &[g0.hash], 0);
    rb.process_block(g1.clone()).unwrap();
    rb.process_block(g2.clone()).unwrap();
    assert!(!rb.is_strongly_acked(&g0.hash));

    // The third acker crosses 2n/3.
    let g3 = make_block(nodes[3], 3, 0, H256::ZERO, &[g0.hash], 0);
    rb.process_block(g3).unwrap();
    assert!(rb.is_strongly_acked(&g0.hash));

    let extracted = rb.extract_blocks();
    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted[0].hash, g0.hash);
    // Extraction drains the queue.
    assert!(rb.extract_blocks().is_empty());
}

/// Acks count transitively: a block acking an acker credits the origin.
#[test]
fn test_transitive_strong_ack() {
    let nodes: Vec<NodeId> = (0..4).map(|i| node(&format!("n{i}"))).collect();
    let mut rb = lattice(4, &nodes);

    let g0 = make_block(nodes[0], 0, 0, H256::ZERO, &[], 0);
    let g1 = make_block(nodes[1], 1, 0, H256::ZERO, &[g0.hash], 0);
    // g2 acks only g1, reaching g0 transitively.
    let g2 = make_block(nodes[2], 2, 0, H256::ZERO, &[g1.hash], 0);
    let g3 = make_block(nodes[3], 3, 0, H256::ZERO, &[g2.hash], 0);

    rb.process_block(g0.clone()).unwrap();
    rb.process_block(g1).unwrap();
    rb.process_block(g2).unwrap();
    assert!(!rb.is_strongly_acked(&g0.hash));
    rb.process_block(g3).unwrap();
    assert!(rb.is_strongly_acked(&g0.hash));
}
