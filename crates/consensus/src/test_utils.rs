//! Test support: a recording application and a mock governance.
//!
//! These live in the library (not behind `cfg(test)`) so integration tests
//! and simulations can compare delivery records across nodes: two engines
//! fed the same traffic must produce [`App`] records that `compare` equal.

use lattice_core::{Application, BlockProcessed, Governance};
use lattice_crypto::ecdsa::{PrivateKey, PublicKey};
use lattice_types::{
    Block, Config, DkgComplaint, DkgFinalize, DkgMasterPublicKey, Position, WitnessAck, H256,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::mpsc;

/// Mismatches reported when comparing or verifying delivery records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Two apps delivered different block hashes at the same index.
    #[error("mismatch block hash sequence")]
    MismatchBlockHashSequence,

    /// Two apps delivered the same block at different consensus times.
    #[error("mismatch consensus time")]
    MismatchConsensusTime,

    /// One of the compared apps delivered nothing.
    #[error("empty deliver sequence")]
    EmptyDeliverSequence,

    /// A delivered block was never strongly acked.
    #[error("delivered block not acked")]
    DeliveredBlockNotAcked,

    /// Consensus timestamps went backwards within one app.
    #[error("consensus timestamp out of order")]
    ConsensusTimestampOutOfOrder,

    /// A delivered block never appeared in a total-ordering batch.
    #[error("mismatch total ordering and delivered sequence")]
    MismatchTotalOrderingAndDelivered,
}

#[derive(Default)]
struct AppInner {
    acked: HashSet<H256>,
    total_ordered: Vec<(Vec<H256>, bool)>,
    deliver_sequence: Vec<H256>,
    deliver_times: HashMap<H256, i64>,
}

/// Records every engine callback for later comparison and verification.
pub struct App {
    inner: Mutex<AppInner>,
    processed_tx: mpsc::Sender<BlockProcessed>,
    processed_rx: Mutex<Option<mpsc::Receiver<BlockProcessed>>>,
}

impl App {
    /// Creates an empty recording app.
    pub fn new() -> Self {
        let (processed_tx, processed_rx) = mpsc::channel(1000);
        Self {
            inner: Mutex::new(AppInner::default()),
            processed_tx,
            processed_rx: Mutex::new(Some(processed_rx)),
        }
    }

    /// Records a strong ack.
    pub fn ack(&self, hash: H256) {
        self.inner.lock().acked.insert(hash);
    }

    /// Records a total-ordering batch.
    pub fn total_order(&self, hashes: Vec<H256>, early: bool) {
        self.inner.lock().total_ordered.push((hashes, early));
    }

    /// Records a delivery with its consensus time.
    pub fn deliver(&self, hash: H256, consensus_time: i64) {
        let mut inner = self.inner.lock();
        inner.deliver_sequence.push(hash);
        inner.deliver_times.insert(hash, consensus_time);
    }

    /// Number of delivered blocks.
    pub fn delivered_len(&self) -> usize {
        self.inner.lock().deliver_sequence.len()
    }

    /// The delivered hashes in order.
    pub fn deliver_sequence(&self) -> Vec<H256> {
        self.inner.lock().deliver_sequence.clone()
    }

    /// The recorded total-ordering batches.
    pub fn total_ordered(&self) -> Vec<(Vec<H256>, bool)> {
        self.inner.lock().total_ordered.clone()
    }

    /// Compares two delivery records position by position.
    pub fn compare(&self, other: &App) -> Result<(), AppError> {
        let a = self.inner.lock();
        let b = other.inner.lock();
        if a.deliver_sequence.is_empty() || b.deliver_sequence.is_empty() {
            return Err(AppError::EmptyDeliverSequence);
        }
        let common = a.deliver_sequence.len().min(b.deliver_sequence.len());
        for i in 0..common {
            let (ha, hb) = (a.deliver_sequence[i], b.deliver_sequence[i]);
            if ha != hb {
                return Err(AppError::MismatchBlockHashSequence);
            }
            if a.deliver_times[&ha] != b.deliver_times[&hb] {
                return Err(AppError::MismatchConsensusTime);
            }
        }
        Ok(())
    }

    /// Verifies this record's internal invariants.
    pub fn verify(&self) -> Result<(), AppError> {
        let inner = self.inner.lock();
        let ordered: HashSet<H256> = inner
            .total_ordered
            .iter()
            .flat_map(|(hashes, _)| hashes.iter().copied())
            .collect();
        let mut previous_time = i64::MIN;
        for hash in &inner.deliver_sequence {
            if !inner.acked.contains(hash) {
                return Err(AppError::DeliveredBlockNotAcked);
            }
            let time = inner.deliver_times[hash];
            if time < previous_time {
                return Err(AppError::ConsensusTimestampOutOfOrder);
            }
            previous_time = time;
            if !ordered.contains(hash) {
                return Err(AppError::MismatchTotalOrderingAndDelivered);
            }
        }
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl Application for App {
    fn prepare_payload(&self, _position: Position) -> Vec<u8> {
        Vec::new()
    }

    fn block_confirmed(&self, _hash: H256) {}

    fn strongly_acked(&self, hash: H256) {
        self.ack(hash);
    }

    fn total_ordering_delivered(&self, hashes: Vec<H256>, early: bool) {
        self.total_order(hashes, early);
    }

    fn block_delivered(&self, block: Block) {
        self.deliver(block.hash, block.consensus_timestamp);
        let _ = self.processed_tx.try_send(BlockProcessed {
            block_hash: block.hash,
            data: Vec::new(),
        });
    }

    fn witness_ack_delivered(&self, _ack: &WitnessAck) {}

    fn block_processed_chan(&self) -> mpsc::Receiver<BlockProcessed> {
        self.processed_rx
            .lock()
            .take()
            .expect("block_processed_chan taken twice")
    }
}

enum NodeSetMode {
    /// The same keys every round.
    Static(Vec<PublicKey>),
    /// Freshly generated keys on every query, like a membership that churns
    /// completely between rounds.
    Fresh(usize),
}

/// In-memory governance for tests.
pub struct MockGovernance {
    config: Config,
    crs: H256,
    mode: NodeSetMode,
    mpks: Mutex<HashMap<u64, Vec<DkgMasterPublicKey>>>,
    complaints: Mutex<HashMap<u64, Vec<DkgComplaint>>>,
    finalizes: Mutex<HashMap<u64, Vec<DkgFinalize>>>,
}

impl MockGovernance {
    /// Governance serving the same key set for every round.
    pub fn with_keys(keys: Vec<PublicKey>, config: Config, crs: H256) -> Self {
        Self {
            config,
            crs,
            mode: NodeSetMode::Static(keys),
            mpks: Mutex::new(HashMap::new()),
            complaints: Mutex::new(HashMap::new()),
            finalizes: Mutex::new(HashMap::new()),
        }
    }

    /// Governance generating a fresh key set on every node-set query.
    pub fn with_fresh_node_sets(size: usize, config: Config, crs: H256) -> Self {
        Self {
            config,
            crs,
            mode: NodeSetMode::Fresh(size),
            mpks: Mutex::new(HashMap::new()),
            complaints: Mutex::new(HashMap::new()),
            finalizes: Mutex::new(HashMap::new()),
        }
    }
}

impl Governance for MockGovernance {
    fn configuration(&self, _round: u64) -> Option<Config> {
        Some(self.config.clone())
    }

    fn crs(&self, _round: u64) -> Option<H256> {
        Some(self.crs)
    }

    fn node_set(&self, _round: u64) -> Option<Vec<PublicKey>> {
        match &self.mode {
            NodeSetMode::Static(keys) => Some(keys.clone()),
            NodeSetMode::Fresh(size) => Some(
                (0..*size)
                    .map(|_| PrivateKey::random().public_key())
                    .collect(),
            ),
        }
    }

    fn is_dkg_final(&self, round: u64) -> bool {
        let count = self
            .finalizes
            .lock()
            .get(&round)
            .map(|f| f.len())
            .unwrap_or(0);
        count >= self.config.dkg_threshold()
    }

    fn dkg_master_public_keys(&self, round: u64) -> Vec<DkgMasterPublicKey> {
        self.mpks.lock().get(&round).cloned().unwrap_or_default()
    }

    fn dkg_complaints(&self, round: u64) -> Vec<DkgComplaint> {
        self.complaints.lock().get(&round).cloned().unwrap_or_default()
    }

    fn add_dkg_master_public_key(&self, mpk: DkgMasterPublicKey) {
        self.mpks.lock().entry(mpk.round).or_default().push(mpk);
    }

    fn add_dkg_complaint(&self, complaint: DkgComplaint) {
        self.complaints
            .lock()
            .entry(complaint.round)
            .or_default()
            .push(complaint);
    }

    fn add_dkg_finalize(&self, finalize: DkgFinalize) {
        self.finalizes
            .lock()
            .entry(finalize.round)
            .or_default()
            .push(finalize);
    }
}

/// Generates `n` fresh private keys.
pub fn generate_private_keys(n: usize) -> Vec<PrivateKey> {
    (0..n).map(|_| PrivateKey::random()).collect()
}
