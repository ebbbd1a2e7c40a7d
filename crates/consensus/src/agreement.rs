//! Per-chain Byzantine Agreement.
//!
//! One [`Agreement`] instance runs for one chain at a time, selecting one
//! block per (chain, height). The machine walks `Prepare → Ack → Confirm →
//! Pass` within a period, each state occupying a fixed number of clocks of
//! the shared LambdaBA ticker:
//!
//! - **Prepare** announces a candidate with an `Init` vote. The CRS-ranked
//!   leader proposes its own block; followers prefer the leader's announced
//!   candidate, falling back to the lowest-hash candidate they hold.
//! - **Ack** tallies `Init` votes: a candidate reaching the threshold
//!   `T = ⌊2|N|/3⌋ + 1` is acknowledged with `PreCom(h)`, otherwise
//!   `PreCom(SKIP)`.
//! - **Confirm** tallies `PreCom` votes: a non-SKIP hash reaching `T` is
//!   locked and committed with `Com(h)`. A node observing `T` matching
//!   `Com` votes confirms the block, at any state.
//! - **Pass** times the period out: the period number increments, the locked
//!   candidate carries over, and the machine restarts at Prepare.
//!
//! A voter emitting two conflicting votes for the same (type, period) is an
//! equivocator: its existing votes are struck from every tally and all its
//! future votes ignored for the lifetime of this (chain, height).

use crate::authenticator::verify_vote_signature;
use lattice_crypto::CryptoError;
use lattice_types::{Block, NodeId, NodeSet, Position, SubsetTarget, Vote, VoteType, H256};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Bound on the candidate-block cache; overflow evicts an arbitrary entry.
const CANDIDATE_CACHE_CAP: usize = 1000;

/// Errors from the agreement state machine.
#[derive(Debug, Error)]
pub enum AgreementError {
    /// The vote targets a different (chain, height) than the running one.
    #[error("vote position {0} does not match the running agreement")]
    PositionMismatch(Position),

    /// The vote signature does not recover to the embedded voter.
    #[error("signature of vote is incorrect")]
    IncorrectVoteSignature,

    /// The voter is not a member of the current notary set.
    #[error("voter is not in the notary set")]
    NotInNotarySet,

    /// A block arrived for a position this instance is not agreeing on.
    #[error("unknown block is proposed")]
    UnknownBlockProposed,

    /// Cryptographic failure while checking a vote.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// States of the per-period agreement machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaState {
    /// Candidate announcement.
    Prepare,
    /// Acknowledgement of the leading candidate.
    Ack,
    /// Commitment to an acknowledged candidate.
    Confirm,
    /// Period timeout and restart.
    Pass,
}

impl BaState {
    /// Number of LambdaBA clocks the state occupies.
    pub fn clocks(self) -> u32 {
        match self {
            BaState::Prepare => 2,
            BaState::Ack => 2,
            BaState::Confirm => 2,
            BaState::Pass => 1,
        }
    }
}

impl std::fmt::Display for BaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaState::Prepare => write!(f, "Prepare"),
            BaState::Ack => write!(f, "Ack"),
            BaState::Confirm => write!(f, "Confirm"),
            BaState::Pass => write!(f, "Pass"),
        }
    }
}

/// Callbacks from an agreement instance back into its owner.
///
/// The receiver is a lookup handle, never an owner: the orchestrator owns
/// both the agreement and the receiver, and the receiver reaches back with
/// a weak reference to break the cycle.
pub trait AgreementReceiver: Send + Sync {
    /// Sign, locally process and broadcast a vote produced by the machine.
    fn propose_vote(&self, vote: Vote);

    /// Build, register and broadcast a candidate block for this chain
    /// (invoked on the leader at period start).
    fn propose_block(&self);

    /// A block hash gathered `T` commit votes.
    fn confirm_block(&self, hash: H256);
}

struct AgreementData {
    id: NodeId,
    position: Position,
    crs: H256,
    period: u64,
    notary_set: BTreeSet<NodeId>,
    threshold: usize,
    leader: Option<NodeId>,
    state: BaState,
    /// Votes by (type, period), then voter.
    votes: HashMap<(VoteType, u64), HashMap<NodeId, Vote>>,
    /// Equivocators excluded from every tally.
    excluded: HashSet<NodeId>,
    candidates: HashMap<H256, Block>,
    /// Hash of the block this node itself proposed for the height.
    own_candidate: Option<H256>,
    /// Candidate locked by a PreCom quorum; carried across periods.
    locked: Option<H256>,
    /// (type, period) pairs this node has already voted.
    emitted: HashSet<(VoteType, u64)>,
    confirmed: bool,
}

impl AgreementData {
    fn tally(&self, vote_type: VoteType, period: u64) -> HashMap<H256, usize> {
        let mut counts: HashMap<H256, usize> = HashMap::new();
        if let Some(votes) = self.votes.get(&(vote_type, period)) {
            for vote in votes.values() {
                *counts.entry(vote.block_hash).or_default() += 1;
            }
        }
        counts
    }

    fn quorum(&self, vote_type: VoteType, period: u64) -> Option<H256> {
        self.tally(vote_type, period)
            .into_iter()
            .find(|(_, count)| *count >= self.threshold)
            .map(|(hash, _)| hash)
    }

    fn compute_leader(&self) -> Option<NodeId> {
        let set: NodeSet = self.notary_set.iter().copied().collect();
        set.leader(&SubsetTarget::Leader {
            crs: self.crs,
            chain_id: self.position.chain_id,
            height: self.position.height,
            period: self.period,
        })
    }

    /// The candidate to announce in Prepare: the locked hash wins, then the
    /// leader's announced candidate, then the lowest-hash block held.
    fn preferred_candidate(&self) -> H256 {
        if let Some(locked) = self.locked {
            return locked;
        }
        if let Some(leader) = self.leader {
            if leader != self.id {
                // Follower: adopt the leader's announced candidate.
                if let Some(vote) = self
                    .votes
                    .get(&(VoteType::Init, self.period))
                    .and_then(|votes| votes.get(&leader))
                {
                    if !vote.block_hash.is_skip() {
                        return vote.block_hash;
                    }
                }
            }
        }
        if let Some(own) = self.own_candidate {
            return own;
        }
        self.candidates.keys().min().copied().unwrap_or(H256::SKIP)
    }
}

enum Action {
    Vote(Vote),
    Confirm(H256),
}

/// One chain's Byzantine Agreement instance.
///
/// Vote and block processing are serialized by the instance lock; receiver
/// callbacks are invoked outside it.
pub struct Agreement {
    id: NodeId,
    receiver: Arc<dyn AgreementReceiver>,
    data: Mutex<AgreementData>,
}

impl Agreement {
    /// Creates an idle agreement instance for this node.
    pub fn new(id: NodeId, receiver: Arc<dyn AgreementReceiver>) -> Self {
        Self {
            id,
            receiver,
            data: Mutex::new(AgreementData {
                id,
                position: Position::default(),
                crs: H256::ZERO,
                period: 0,
                notary_set: BTreeSet::new(),
                threshold: 1,
                leader: None,
                state: BaState::Pass,
                votes: HashMap::new(),
                excluded: HashSet::new(),
                candidates: HashMap::new(),
                own_candidate: None,
                locked: None,
                emitted: HashSet::new(),
                confirmed: true,
            }),
        }
    }

    /// Resets the machine for a fresh (round, height) with a new notary set.
    pub fn restart(&self, notary_set: BTreeSet<NodeId>, position: Position, crs: H256) {
        let propose = {
            let mut data = self.data.lock();
            let threshold = notary_set.len() * 2 / 3 + 1;
            *data = AgreementData {
                id: self.id,
                position,
                crs,
                period: 0,
                threshold,
                notary_set,
                leader: None,
                state: BaState::Prepare,
                votes: HashMap::new(),
                excluded: HashSet::new(),
                candidates: HashMap::new(),
                own_candidate: None,
                locked: None,
                emitted: HashSet::new(),
                confirmed: false,
            };
            data.leader = data.compute_leader();
            debug!(position = %position, leader = ?data.leader, "agreement restarted");
            data.leader == Some(self.id)
        };
        if propose {
            self.receiver.propose_block();
        }
    }

    /// Clock budget of the current state.
    pub fn clocks(&self) -> u32 {
        self.data.lock().state.clocks()
    }

    /// Position currently being agreed on.
    pub fn position(&self) -> Position {
        self.data.lock().position
    }

    /// Current period.
    pub fn period(&self) -> u64 {
        self.data.lock().period
    }

    /// Leader of the current period.
    pub fn leader(&self) -> Option<NodeId> {
        self.data.lock().leader
    }

    /// Whether this instance already confirmed a block.
    pub fn confirmed(&self) -> bool {
        self.data.lock().confirmed
    }

    /// Advances the machine after its state's clocks elapsed.
    pub fn next_state(&self) -> Result<(), AgreementError> {
        let mut actions: Vec<Action> = Vec::new();
        {
            let mut data = self.data.lock();
            if data.confirmed {
                return Ok(());
            }
            match data.state {
                BaState::Prepare => {
                    let hash = data.preferred_candidate();
                    let period = data.period;
                    if data.emitted.insert((VoteType::Init, period)) {
                        actions.push(Action::Vote(Vote::new(
                            VoteType::Init,
                            hash,
                            data.position,
                            period,
                            self.id,
                        )));
                    }
                    data.state = BaState::Ack;
                }
                BaState::Ack => {
                    let period = data.period;
                    let hash = data.quorum(VoteType::Init, period).unwrap_or(H256::SKIP);
                    if data.emitted.insert((VoteType::PreCom, period)) {
                        actions.push(Action::Vote(Vote::new(
                            VoteType::PreCom,
                            hash,
                            data.position,
                            period,
                            self.id,
                        )));
                    }
                    data.state = BaState::Confirm;
                }
                BaState::Confirm => {
                    let period = data.period;
                    if let Some(hash) = data.quorum(VoteType::PreCom, period) {
                        if !hash.is_skip() {
                            data.locked = Some(hash);
                            if data.emitted.insert((VoteType::Com, period)) {
                                actions.push(Action::Vote(Vote::new(
                                    VoteType::Com,
                                    hash,
                                    data.position,
                                    period,
                                    self.id,
                                )));
                            }
                        }
                    }
                    data.state = BaState::Pass;
                }
                BaState::Pass => {
                    data.period += 1;
                    data.leader = data.compute_leader();
                    data.state = BaState::Prepare;
                    debug!(
                        position = %data.position,
                        period = data.period,
                        "agreement period passed"
                    );
                }
            }
        }
        self.run_actions(actions);
        Ok(())
    }

    /// Processes one vote; serialized with every other mutation by the
    /// instance lock.
    pub fn process_vote(&self, vote: &Vote) -> Result<(), AgreementError> {
        let mut actions: Vec<Action> = Vec::new();
        {
            let mut data = self.data.lock();
            if vote.position != data.position {
                return Err(AgreementError::PositionMismatch(vote.position));
            }
            if !data.notary_set.contains(&vote.proposer_id) {
                return Err(AgreementError::NotInNotarySet);
            }
            if !verify_vote_signature(vote)? {
                return Err(AgreementError::IncorrectVoteSignature);
            }
            if data.excluded.contains(&vote.proposer_id) {
                return Ok(());
            }

            let key = (vote.vote_type, vote.period);
            if let Some(existing) = data.votes.get(&key).and_then(|m| m.get(&vote.proposer_id)) {
                if existing.block_hash != vote.block_hash {
                    warn!(
                        voter = %vote.proposer_id,
                        position = %vote.position,
                        period = vote.period,
                        "equivocation detected; excluding voter"
                    );
                    let voter = vote.proposer_id;
                    data.excluded.insert(voter);
                    for votes in data.votes.values_mut() {
                        votes.remove(&voter);
                    }
                }
                return Ok(());
            }
            data.votes
                .entry(key)
                .or_default()
                .insert(vote.proposer_id, vote.clone());

            // T matching commit votes confirm immediately, whatever the
            // local state; this is how lagging nodes catch up.
            if vote.vote_type == VoteType::Com && !vote.block_hash.is_skip() && !data.confirmed {
                let count = data
                    .tally(VoteType::Com, vote.period)
                    .remove(&vote.block_hash)
                    .unwrap_or(0);
                if count >= data.threshold {
                    data.confirmed = true;
                    actions.push(Action::Confirm(vote.block_hash));
                }
            }
        }
        self.run_actions(actions);
        Ok(())
    }

    /// Registers a candidate block received for the running position.
    pub fn process_block(&self, block: Block) -> Result<(), AgreementError> {
        let mut data = self.data.lock();
        if block.position != data.position {
            return Err(AgreementError::UnknownBlockProposed);
        }
        self.insert_candidate(&mut data, block);
        Ok(())
    }

    /// Registers this node's own freshly proposed candidate.
    pub fn add_candidate_block(&self, block: Block) {
        let mut data = self.data.lock();
        if block.proposer_id == self.id {
            data.own_candidate = Some(block.hash);
        }
        self.insert_candidate(&mut data, block);
    }

    /// Looks up a candidate block held for this height.
    pub fn find_candidate(&self, hash: &H256) -> Option<Block> {
        self.data.lock().candidates.get(hash).cloned()
    }

    fn insert_candidate(&self, data: &mut AgreementData, block: Block) {
        if data.candidates.len() >= CANDIDATE_CACHE_CAP && !data.candidates.contains_key(&block.hash)
        {
            if let Some(evict) = data.candidates.keys().next().copied() {
                data.candidates.remove(&evict);
            }
        }
        data.candidates.insert(block.hash, block);
    }

    fn run_actions(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Vote(vote) => self.receiver.propose_vote(vote),
                Action::Confirm(hash) => self.receiver.confirm_block(hash),
            }
        }
    }
}

impl std::fmt::Debug for Agreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Agreement")
            .field("id", &self.id)
            .field("position", &data.position)
            .field("period", &data.period)
            .field("state", &data.state)
            .field("confirmed", &data.confirmed)
            .finish()
    }
}
