//! Byzantine Agreement tests: the happy path across seven honest nodes and
//! tolerance of an equivocating voter.

use lattice_consensus::agreement::{Agreement, AgreementReceiver};
use lattice_consensus::authenticator::Authenticator;
use lattice_consensus::test_utils::generate_private_keys;
use lattice_types::{Block, NodeId, Position, Vote, VoteType, H256};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Signs produced votes, queues them on a shared bus and records
/// confirmations; block proposals are seeded by the test instead.
struct TestReceiver {
    auth: Arc<Authenticator>,
    bus: Arc<Mutex<Vec<Vote>>>,
    confirmed: Mutex<Vec<H256>>,
}

impl AgreementReceiver for TestReceiver {
    fn propose_vote(&self, mut vote: Vote) {
        self.auth.sign_vote(&mut vote).unwrap();
        self.bus.lock().push(vote);
    }

    fn propose_block(&self) {}

    fn confirm_block(&self, hash: H256) {
        self.confirmed.lock().push(hash);
    }
}

struct Cluster {
    agreements: Vec<Arc<Agreement>>,
    receivers: Vec<Arc<TestReceiver>>,
    auths: Vec<Arc<Authenticator>>,
    bus: Arc<Mutex<Vec<Vote>>>,
    position: Position,
}

fn setup(n: usize) -> Cluster {
    let keys = generate_private_keys(n);
    let auths: Vec<Arc<Authenticator>> = keys
        .into_iter()
        .map(|key| Arc::new(Authenticator::new(key)))
        .collect();
    let notary: BTreeSet<NodeId> = auths.iter().map(|a| a.id()).collect();
    let bus = Arc::new(Mutex::new(Vec::new()));
    let position = Position {
        round: 0,
        shard_id: 0,
        chain_id: 0,
        height: 0,
    };
    let crs = H256::keccak256(b"agreement-tests");

    let mut agreements = Vec::new();
    let mut receivers = Vec::new();
    for auth in &auths {
        let receiver = Arc::new(TestReceiver {
            auth: auth.clone(),
            bus: bus.clone(),
            confirmed: Mutex::new(Vec::new()),
        });
        let agreement = Arc::new(Agreement::new(
            auth.id(),
            receiver.clone() as Arc<dyn AgreementReceiver>,
        ));
        agreement.restart(notary.clone(), position, crs);
        agreements.push(agreement);
        receivers.push(receiver);
    }
    Cluster {
        agreements,
        receivers,
        auths,
        bus,
        position,
    }
}

fn candidate_block(cluster: &Cluster, proposer: usize) -> Block {
    let mut block = Block {
        proposer_id: cluster.auths[proposer].id(),
        position: cluster.position,
        payload: Vec::new(),
        ..Default::default()
    };
    block.hash = block.compute_hash();
    block
}

/// Delivers every queued vote to every live node until the bus drains.
fn deliver(bus: &Arc<Mutex<Vec<Vote>>>, agreements: &[Arc<Agreement>], live: &[usize]) {
    loop {
        let votes: Vec<Vote> = std::mem::take(&mut *bus.lock());
        if votes.is_empty() {
            return;
        }
        for vote in votes {
            for &i in live {
                let _ = agreements[i].process_vote(&vote);
            }
        }
    }
}

fn drive(cluster: &Cluster, live: &[usize], max_steps: usize) {
    for _ in 0..max_steps {
        if live.iter().all(|&i| cluster.agreements[i].confirmed()) {
            return;
        }
        for &i in live {
            cluster.agreements[i].next_state().unwrap();
        }
        deliver(&cluster.bus, &cluster.agreements, live);
    }
}

/// Seven honest nodes proposing the same candidate confirm it within one
/// period, each exactly once.
#[test]
fn test_happy_path_single_period() {
    let cluster = setup(7);
    let live: Vec<usize> = (0..7).collect();
    let block = candidate_block(&cluster, 0);
    for agreement in &cluster.agreements {
        agreement.process_block(block.clone()).unwrap();
    }

    drive(&cluster, &live, 4);

    for (i, receiver) in cluster.receivers.iter().enumerate() {
        let confirmed = receiver.confirmed.lock().clone();
        assert_eq!(confirmed, vec![block.hash], "node {i} confirmations");
        assert_eq!(cluster.agreements[i].period(), 0);
    }
}

/// One Byzantine voter double-votes in the Ack phase; the six honest nodes
/// exclude it and still confirm the same block.
#[test]
fn test_equivocating_acker_is_excluded() {
    let cluster = setup(7);
    let honest: Vec<usize> = (0..6).collect();
    let block = candidate_block(&cluster, 0);
    for &i in &honest {
        cluster.agreements[i].process_block(block.clone()).unwrap();
    }

    // The Byzantine node (index 6) acknowledges two different hashes for
    // the same period.
    let other_hash = H256::keccak256(b"byzantine-alternative");
    for target_hash in [block.hash, other_hash] {
        let mut vote = Vote::new(
            VoteType::PreCom,
            target_hash,
            cluster.position,
            0,
            cluster.auths[6].id(),
        );
        cluster.auths[6].sign_vote(&mut vote).unwrap();
        for &i in &honest {
            let _ = cluster.agreements[i].process_vote(&vote);
        }
    }

    // A commit vote from the equivocator must be ignored entirely.
    let mut byz_commit = Vote::new(
        VoteType::Com,
        other_hash,
        cluster.position,
        0,
        cluster.auths[6].id(),
    );
    cluster.auths[6].sign_vote(&mut byz_commit).unwrap();
    for &i in &honest {
        let _ = cluster.agreements[i].process_vote(&byz_commit);
    }

    drive(&cluster, &honest, 12);

    for &i in &honest {
        let confirmed = cluster.receivers[i].confirmed.lock().clone();
        assert_eq!(confirmed, vec![block.hash], "node {i} confirmations");
        assert!(cluster.agreements[i].period() <= 2);
    }
}

/// A vote from outside the notary set is rejected.
#[test]
fn test_outsider_vote_rejected() {
    let cluster = setup(4);
    let outsider = Arc::new(Authenticator::new(
        generate_private_keys(1).pop().unwrap(),
    ));
    let mut vote = Vote::new(
        VoteType::Init,
        H256::keccak256(b"x"),
        cluster.position,
        0,
        outsider.id(),
    );
    outsider.sign_vote(&mut vote).unwrap();
    assert!(cluster.agreements[0].process_vote(&vote).is_err());
}

/// A vote whose signature does not match its claimed voter is rejected.
#[test]
fn test_forged_vote_rejected() {
    let cluster = setup(4);
    let mut vote = Vote::new(
        VoteType::Init,
        H256::keccak256(b"x"),
        cluster.position,
        0,
        cluster.auths[1].id(),
    );
    // Signed by node 0 but claiming to be node 1.
    cluster.auths[0].sign_vote(&mut vote).unwrap();
    vote.proposer_id = cluster.auths[1].id();
    assert!(cluster.agreements[0].process_vote(&vote).is_err());
}
