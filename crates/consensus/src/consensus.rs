//! The consensus orchestrator.
//!
//! Owns every engine component and wires them together: one long-running
//! task per chain drives that chain's Byzantine Agreement from the fanned
//! out LambdaBA ticker; a round task advances the round every round
//! interval, starting each new round's DKG on its own task and handing
//! every chain a fresh notary set; a dispatch task routes inbound network
//! messages by kind; a witness task consumes the application's
//! processed-block stream. Confirmed blocks flow
//! through the delivery pipeline (reliable broadcast → total ordering →
//! consensus timestamp → compaction chain) under a single lock, so delivery
//! order is identical on every honest node.
//!
//! Protocol-validation failures are logged and dropped without advancing
//! state; storage failures are invariant violations and abort the affected
//! task. Shutdown is a watch channel observed by every task.

use crate::agreement::{Agreement, AgreementError, AgreementReceiver};
use crate::authenticator::{verify_block_signature, Authenticator};
use crate::compaction_chain::{CompactionChain, CompactionError};
use crate::configuration_chain::{hash_round_anchor, ConfigurationChain, ConfigurationChainError};
use crate::dkg::{DkgReceiver, TsigVerifier, TsigVerifierCache};
use crate::node_set_cache::{CacheError, NodeSetCache};
use crate::reliable_broadcast::{BroadcastError, ReliableBroadcast};
use crate::ticker::Ticker;
use crate::timestamp::ConsensusTimestamp;
use crate::total_ordering::TotalOrdering;
use lattice_core::{
    Application, BlockDatabase, BlockProcessed, ConsensusMessage, Governance, Network,
    StorageError,
};
use lattice_crypto::ecdsa::{PrivateKey, PublicKey};
use lattice_crypto::tdkg::GroupSignature;
use lattice_crypto::CryptoError;
use lattice_types::{
    AgreementResult, Block, BlockRandomnessResult, Config, DkgComplaint, DkgFinalize,
    DkgMasterPublicKey, DkgPartialSignature, DkgPrivateShare, NodeId, Position, Vote, VoteType,
    WitnessAck, H256,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// A witness ack is signed every this many compaction heights.
const WITNESS_ACK_INTERVAL: u64 = 5;

/// Rounds of threshold-signature verifiers kept cached.
const TSIG_VERIFIER_CACHE_SIZE: usize = 7;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The block proposer is not in the round's node set.
    #[error("proposer is not in node set")]
    ProposerNotInNodeSet,

    /// The block hash does not match its canonical encoding.
    #[error("hash of block is incorrect")]
    IncorrectHash,

    /// The block signature does not recover to its proposer.
    #[error("signature of block is incorrect")]
    IncorrectSignature,

    /// A genesis block carried a payload.
    #[error("genesis block should be empty")]
    GenesisBlockNotEmpty,

    /// An agreement confirmed a hash with no matching candidate block.
    #[error("unknown block is confirmed")]
    UnknownBlockConfirmed,

    /// The block position is outside the configured lattice.
    #[error("position of block is incorrect")]
    IncorrectBlockPosition,

    /// The block timestamp violates the chain's block-interval bounds.
    #[error("block timestamp is incorrect")]
    IncorrectBlockTime,

    /// Randomness failed verification under the round's group key.
    #[error("block randomness is incorrect")]
    IncorrectBlockRandomness,

    /// A required block field was left unset.
    #[error("missing {0} in block")]
    MissingBlockInfo(&'static str),

    /// `run` was called more than once.
    #[error("consensus is already running")]
    AlreadyRunning,

    /// Node-set cache failure (round not ready).
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Agreement-level failure.
    #[error(transparent)]
    Agreement(#[from] AgreementError),

    /// Lattice validation failure.
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    /// Compaction-chain failure.
    #[error(transparent)]
    Compaction(#[from] CompactionError),

    /// Configuration-chain failure.
    #[error(transparent)]
    Configuration(#[from] ConfigurationChainError),

    /// Storage failure; fatal.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A pull request issued from synchronous component code.
enum PullRequest {
    Blocks(Vec<H256>),
    Votes(Position),
    Randomness(Vec<H256>),
}

/// Outbound traffic queued by synchronous component code and drained by the
/// network task.
enum Outbound {
    Block(Box<Block>),
    Vote(Vote),
    DkgShare {
        target: PublicKey,
        share: DkgPrivateShare,
    },
    DkgShareBroadcast(DkgPrivateShare),
    PartialSignature(DkgPartialSignature),
}

/// The delivery pipeline, serialized under one lock so every honest node
/// observes the same order.
struct Pipeline {
    rb: ReliableBroadcast,
    to: TotalOrdering,
    ct: ConsensusTimestamp,
    cc: CompactionChain,
}

/// Back-channel from one chain's agreement into the orchestrator.
///
/// Holds only a weak reference: the orchestrator owns the receiver, never
/// the other way around.
struct ConsensusBaReceiver {
    consensus: Weak<Consensus>,
    chain_id: u32,
    restart_tx: mpsc::UnboundedSender<bool>,
    restart_rx: Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
}

impl AgreementReceiver for ConsensusBaReceiver {
    fn propose_vote(&self, mut vote: Vote) {
        let Some(con) = self.consensus.upgrade() else {
            return;
        };
        if let Err(e) = con.authenticator.sign_vote(&mut vote) {
            warn!(error = %e, "failed to sign vote");
            return;
        }
        if let Err(e) = con.ba_modules[self.chain_id as usize].process_vote(&vote) {
            warn!(error = %e, "own vote rejected");
        }
        let _ = con.outbound_tx.send(Outbound::Vote(vote));
    }

    fn propose_block(&self) {
        let Some(con) = self.consensus.upgrade() else {
            return;
        };
        let block = match con.propose_block(self.chain_id) {
            Ok(block) => block,
            Err(e) => {
                warn!(chain = self.chain_id, error = %e, "failed to propose block");
                return;
            }
        };
        con.ba_modules[self.chain_id as usize].add_candidate_block(block.clone());
        let _ = con.outbound_tx.send(Outbound::Block(Box::new(block)));
    }

    fn confirm_block(&self, hash: H256) {
        let Some(con) = self.consensus.upgrade() else {
            return;
        };
        let Some(block) = con.ba_modules[self.chain_id as usize].find_candidate(&hash) else {
            warn!(hash = %hash, error = %ConsensusError::UnknownBlockConfirmed, "confirmation dropped");
            return;
        };
        if let Err(e) = con.process_block(&block) {
            error!(hash = %hash, error = %e, "failed to process confirmed block");
            return;
        }
        let _ = self.restart_tx.send(false);
    }
}

/// Signs and routes the DKG protocol's outbound messages.
struct ConsensusDkgReceiver {
    id: NodeId,
    gov: Arc<dyn Governance>,
    authenticator: Arc<Authenticator>,
    cache: Arc<NodeSetCache>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl DkgReceiver for ConsensusDkgReceiver {
    fn propose_complaint(&self, mut complaint: DkgComplaint) {
        if let Err(e) = self.authenticator.sign_dkg_complaint(&mut complaint) {
            warn!(error = %e, "failed to sign DKG complaint");
            return;
        }
        self.gov.add_dkg_complaint(complaint);
    }

    fn propose_master_public_key(&self, mut mpk: DkgMasterPublicKey) {
        if let Err(e) = self.authenticator.sign_dkg_master_public_key(&mut mpk) {
            warn!(error = %e, "failed to sign DKG master public key");
            return;
        }
        self.gov.add_dkg_master_public_key(mpk);
    }

    fn propose_private_share(&self, mut share: DkgPrivateShare) {
        if let Err(e) = self.authenticator.sign_dkg_private_share(&mut share) {
            warn!(error = %e, "failed to sign DKG private share");
            return;
        }
        let Some(target) = self.cache.public_key(&share.receiver_id) else {
            warn!(receiver = %share.receiver_id, "no public key for share receiver");
            return;
        };
        let _ = self.outbound_tx.send(Outbound::DkgShare { target, share });
    }

    fn propose_anti_nack_complaint(&self, mut share: DkgPrivateShare) {
        // Only our own reveal needs a fresh signature; relayed anti-nacks
        // keep the dealer's.
        if share.proposer_id == self.id {
            if let Err(e) = self.authenticator.sign_dkg_private_share(&mut share) {
                warn!(error = %e, "failed to sign anti-nack share");
                return;
            }
        }
        let _ = self.outbound_tx.send(Outbound::DkgShareBroadcast(share));
    }

    fn propose_finalize(&self, mut finalize: DkgFinalize) {
        if let Err(e) = self.authenticator.sign_dkg_finalize(&mut finalize) {
            warn!(error = %e, "failed to sign DKG finalize");
            return;
        }
        self.gov.add_dkg_finalize(finalize);
    }
}

/// The consensus engine.
pub struct Consensus {
    id: NodeId,
    config: Config,
    round: AtomicU64,
    authenticator: Arc<Authenticator>,
    ba_modules: Vec<Arc<Agreement>>,
    receivers: Vec<Arc<ConsensusBaReceiver>>,
    pipeline: Mutex<Pipeline>,
    cfg_module: Arc<ConfigurationChain>,
    tsig_verifiers: TsigVerifierCache,
    node_set_cache: Arc<NodeSetCache>,
    gov: Arc<dyn Governance>,
    network: Arc<dyn Network>,
    app: Arc<dyn Application>,
    db: Arc<dyn BlockDatabase>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Consensus {
    /// Constructs an engine for the initial round, wiring every component.
    pub fn new(
        app: Arc<dyn Application>,
        gov: Arc<dyn Governance>,
        db: Arc<dyn BlockDatabase>,
        network: Arc<dyn Network>,
        private_key: PrivateKey,
    ) -> Result<Arc<Self>, ConsensusError> {
        let round = 0u64;
        let node_set_cache = Arc::new(NodeSetCache::new(gov.clone()));
        let config = gov.configuration(round).ok_or(CacheError::RoundNotReady)?;
        let nodes = node_set_cache.node_set(round)?;

        let authenticator = Arc::new(Authenticator::new(private_key));
        let id = authenticator.id();

        let mut rb = ReliableBroadcast::new();
        rb.set_chain_num(config.num_chains);
        for node in nodes.ids() {
            rb.add_node(*node);
        }
        let pipeline = Pipeline {
            to: TotalOrdering::new(config.k, config.phi(), config.num_chains),
            ct: ConsensusTimestamp::new(config.num_chains),
            cc: CompactionChain::new(db.clone()),
            rb,
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dkg_recv = Arc::new(ConsensusDkgReceiver {
            id,
            gov: gov.clone(),
            authenticator: authenticator.clone(),
            cache: node_set_cache.clone(),
            outbound_tx: outbound_tx.clone(),
        });
        let cfg_module = Arc::new(ConfigurationChain::new(id, dkg_recv, gov.clone()));
        cfg_module.register_dkg(round, config.dkg_threshold());

        let tsig_verifiers = TsigVerifierCache::new(gov.clone(), TSIG_VERIFIER_CACHE_SIZE);

        let num_chains = config.num_chains;
        let con = Arc::new_cyclic(|weak: &Weak<Consensus>| {
            let mut ba_modules = Vec::with_capacity(num_chains as usize);
            let mut receivers = Vec::with_capacity(num_chains as usize);
            for chain_id in 0..num_chains {
                let (restart_tx, restart_rx) = mpsc::unbounded_channel();
                let receiver = Arc::new(ConsensusBaReceiver {
                    consensus: weak.clone(),
                    chain_id,
                    restart_tx,
                    restart_rx: Mutex::new(Some(restart_rx)),
                });
                ba_modules.push(Arc::new(Agreement::new(
                    id,
                    receiver.clone() as Arc<dyn AgreementReceiver>,
                )));
                receivers.push(receiver);
            }
            Consensus {
                id,
                config,
                round: AtomicU64::new(round),
                authenticator,
                ba_modules,
                receivers,
                pipeline: Mutex::new(pipeline),
                cfg_module,
                tsig_verifiers,
                node_set_cache,
                gov,
                network,
                app,
                db,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                shutdown_tx,
                shutdown_rx,
            }
        });
        Ok(con)
    }

    /// This node's identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The round this node is currently running.
    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    /// Starts every engine task. The call returns once the initial DKG and
    /// round-anchor TSIG finished (or failed and was skipped).
    pub async fn run(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or(ConsensusError::AlreadyRunning)?;
        tokio::spawn(Self::run_outbound(
            self.network.clone(),
            outbound_rx,
            self.shutdown_rx.clone(),
        ));

        let inbound = self.network.receive_chan();
        tokio::spawn(Self::run_dispatch(self.clone(), inbound));

        self.run_dkg_tsig(self.round.load(Ordering::SeqCst)).await;

        tokio::spawn(Self::run_witness(self.clone()));
        tokio::spawn(Self::run_rounds(self.clone()));

        let mut tick_txs = Vec::with_capacity(self.config.num_chains as usize);
        for chain_id in 0..self.config.num_chains {
            let (tick_tx, tick_rx) = mpsc::channel::<()>(1);
            tick_txs.push(tick_tx);
            tokio::spawn(Self::run_ba(self.clone(), chain_id, tick_rx));
        }
        tokio::spawn(Self::run_ticker(self.clone(), tick_txs));

        info!(id = %self.id, chains = self.config.num_chains, "consensus running");
        Ok(())
    }

    /// Signals every task to drain its current tick and exit.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Runs one round's DKG, then threshold-signs the round anchor.
    ///
    /// A failed DKG is not fatal: consensus advances to the next round
    /// without its own group key and randomness verification falls back to
    /// governance-provided keys.
    async fn run_dkg_tsig(self: &Arc<Self>, round: u64) {
        if let Err(e) = self.cfg_module.run_dkg(round).await {
            warn!(round = round, error = %e, "DKG failed; continuing round without group key");
            return;
        }
        let result: Result<(), ConsensusError> = async {
            let config = self
                .gov
                .configuration(round)
                .ok_or(CacheError::RoundNotReady)?;
            let nodes = self.node_set_cache.node_set(round)?;
            let crs = self.gov.crs(round).ok_or(CacheError::RoundNotReady)?;
            let anchor = hash_round_anchor(
                &nodes.sorted_ids(),
                &config,
                self.cfg_module.prev_anchor(),
                crs,
            );
            let mut psig = self.cfg_module.prepare_partial_signature(round, anchor)?;
            self.authenticator.sign_dkg_partial_signature(&mut psig)?;
            self.cfg_module.process_partial_signature(&psig)?;
            let _ = self.outbound_tx.send(Outbound::PartialSignature(psig));
            self.cfg_module
                .run_block_tsig(round, anchor, config.round_interval / 4)
                .await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(round = round, error = %e, "round-anchor TSIG failed");
        }
    }

    /// Drives round transitions.
    ///
    /// Every round interval the round number advances: the node-set cache is
    /// repopulated for the new round (purging stale rounds), the new round's
    /// DKG is registered and started on its own task when this node is in
    /// its DKG set, and every chain's agreement is restarted with the new
    /// round's notary set.
    async fn run_rounds(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut boundary = Ticker::new(self.config.round_interval);
        // The first tick fires immediately; the initial round is already
        // set up by `run`.
        boundary.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = boundary.tick() => {}
            }
            let round = self.round.fetch_add(1, Ordering::SeqCst) + 1;
            info!(round = round, "entering round");

            // Populate the new round before anything consumes it;
            // governance may still be catching up, in which case the BA
            // tasks keep retrying their restart below.
            if let Err(e) = self.node_set_cache.node_set(round) {
                warn!(round = round, error = %e, "node set unavailable at round boundary");
            }

            match self.node_set_cache.dkg_set(round) {
                Ok(dkg_set) if dkg_set.contains(&self.id) => {
                    if let Some(config) = self.gov.configuration(round) {
                        self.cfg_module.register_dkg(round, config.dkg_threshold());
                        let con = self.clone();
                        tokio::spawn(async move {
                            con.run_dkg_tsig(round).await;
                        });
                    }
                }
                Ok(_) => debug!(round = round, "not in this round's DKG set"),
                Err(e) => warn!(round = round, error = %e, "DKG set unavailable"),
            }

            // Hand every chain a fresh notary set for the new round.
            for receiver in &self.receivers {
                let _ = receiver.restart_tx.send(true);
            }
        }
    }

    async fn run_outbound(
        network: Arc<dyn Network>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => return,
                message = outbound_rx.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };
            let result = match message {
                Outbound::Block(block) => network.broadcast_block(&block).await,
                Outbound::Vote(vote) => network.broadcast_vote(&vote).await,
                Outbound::DkgShare { target, share } => {
                    network.send_dkg_private_share(&target, &share).await
                }
                Outbound::DkgShareBroadcast(share) => {
                    network.broadcast_dkg_private_share(&share).await
                }
                Outbound::PartialSignature(psig) => {
                    network.broadcast_dkg_partial_signature(&psig).await
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "network send failed");
            }
        }
    }

    async fn run_dispatch(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<ConsensusMessage>,
    ) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => return,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };
            // Protocol errors are dropped and logged; they never advance
            // state.
            let result = match message {
                ConsensusMessage::Block(block) => self.pre_process_block(&block),
                ConsensusMessage::Vote(vote) => self.process_vote(&vote),
                ConsensusMessage::DkgPrivateShare(share) => self
                    .cfg_module
                    .process_private_share(&share)
                    .map_err(Into::into),
                ConsensusMessage::DkgPartialSignature(psig) => self
                    .cfg_module
                    .process_partial_signature(&psig)
                    .map_err(Into::into),
                ConsensusMessage::WitnessAck(ack) => self.process_witness_ack(ack),
                ConsensusMessage::AgreementResult(result) => {
                    self.process_agreement_result(result)
                }
                ConsensusMessage::BlockRandomness(result) => {
                    self.process_block_randomness(result)
                }
            };
            if let Err(e) = result {
                debug!(error = %e, "message dropped");
            }
        }
    }

    async fn run_ticker(self: Arc<Self>, tick_txs: Vec<mpsc::Sender<()>>) {
        let mut ticker = Ticker::new(self.config.lambda_ba);
        let mut shutdown = self.shutdown_rx.clone();
        // Swallow the immediate first tick so every consumer starts aligned.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    for tick_tx in &tick_txs {
                        // A chain mid-computation simply coalesces ticks.
                        let _ = tick_tx.try_send(());
                    }
                }
            }
        }
    }

    /// One chain's agreement loop: wait the state's clock budget, apply a
    /// pending restart, advance the machine.
    async fn run_ba(self: Arc<Self>, chain_id: u32, mut tick_rx: mpsc::Receiver<()>) {
        let agreement = self.ba_modules[chain_id as usize].clone();
        let receiver = self.receivers[chain_id as usize].clone();
        let mut restart_rx = receiver
            .restart_rx
            .lock()
            .take()
            .expect("run_ba started twice for one chain");
        let _ = receiver.restart_tx.send(true);

        let mut notary_set: BTreeSet<NodeId> = BTreeSet::new();
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            for _ in 0..agreement.clocks() {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    tick = tick_rx.recv() => {
                        if tick.is_none() {
                            return;
                        }
                    }
                }
            }

            // Coalesce queued restarts; any `true` refreshes the notary set.
            let mut restart = None;
            while let Ok(new_notary) = restart_rx.try_recv() {
                restart = Some(restart.unwrap_or(false) || new_notary);
            }
            if let Some(new_notary) = restart {
                let round = self.round.load(Ordering::SeqCst);
                if new_notary || notary_set.is_empty() {
                    match self.node_set_cache.notary_set(round, chain_id) {
                        Ok(set) => notary_set = set,
                        Err(e) => {
                            warn!(chain = chain_id, error = %e, "notary set unavailable");
                            // Re-queue so the restart is retried once
                            // governance catches up.
                            let _ = receiver.restart_tx.send(new_notary);
                            continue;
                        }
                    }
                }
                let Some(crs) = self.gov.crs(round) else {
                    warn!(chain = chain_id, round = round, "CRS unavailable");
                    let _ = receiver.restart_tx.send(new_notary);
                    continue;
                };
                let height = self.pipeline.lock().rb.next_height(chain_id);
                let position = Position {
                    round,
                    shard_id: 0,
                    chain_id,
                    height,
                };
                agreement.restart(notary_set.clone(), position, crs);
            }

            if let Err(e) = agreement.next_state() {
                warn!(chain = chain_id, error = %e, "agreement state error");
            }
        }
    }

    /// Consumes the application's processed-block stream, chaining witness
    /// data and signing a witness ack every few heights.
    async fn run_witness(self: Arc<Self>) {
        let mut processed = self.app.block_processed_chan();
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let block_processed = tokio::select! {
                _ = shutdown.changed() => return,
                block_processed = processed.recv() => match block_processed {
                    Some(block_processed) => block_processed,
                    None => return,
                },
            };
            if let Err(e) = self.handle_block_processed(block_processed) {
                // Witness data touches storage; failure here is fatal.
                error!(error = %e, "witness processing failed; stopping");
                self.stop();
                return;
            }
        }
    }

    fn handle_block_processed(&self, processed: BlockProcessed) -> Result<(), ConsensusError> {
        let mut block = self.db.get(&processed.block_hash)?;
        block.witness.data = processed.data;
        self.db.update(block.clone())?;
        if block.witness.height % WITNESS_ACK_INTERVAL != 0 {
            return Ok(());
        }
        let ack = self.authenticator.sign_witness_ack(&block)?;
        self.process_witness_ack(ack.clone())?;
        self.app.witness_ack_delivered(&ack);
        Ok(())
    }

    /// Builds, signs and CRS-signs a block for `chain_id`.
    fn propose_block(&self, chain_id: u32) -> Result<Block, ConsensusError> {
        let round = self.round.load(Ordering::SeqCst);
        let crs = self.gov.crs(round).ok_or(CacheError::RoundNotReady)?;
        let mut block = Block {
            proposer_id: self.id,
            position: Position {
                round,
                shard_id: 0,
                chain_id,
                height: 0,
            },
            ..Default::default()
        };
        self.pipeline.lock().rb.prepare_block(&mut block);
        block.timestamp = now_nanos();
        block.payload = self.app.prepare_payload(block.position);
        self.authenticator.sign_block(&mut block)?;
        self.authenticator
            .sign_crs(&mut block, H256::keccak256(crs.as_bytes()))?;
        Ok(block)
    }

    /// Sets up and signs a genesis block for the proposer's chain.
    pub fn prepare_genesis_block(
        &self,
        block: &mut Block,
        propose_time: i64,
    ) -> Result<(), ConsensusError> {
        if !block.payload.is_empty() {
            return Err(ConsensusError::GenesisBlockNotEmpty);
        }
        let round = self.round.load(Ordering::SeqCst);
        let crs = self.gov.crs(round).ok_or(CacheError::RoundNotReady)?;
        block.position.height = 0;
        block.parent_hash = H256::ZERO;
        block.timestamp = propose_time;
        self.authenticator.sign_block(block)?;
        self.authenticator
            .sign_crs(block, H256::keccak256(crs.as_bytes()))?;
        Ok(())
    }

    /// Validates a block before any component sees it.
    pub fn sanity_check(&self, block: &Block) -> Result<(), ConsensusError> {
        if block.position.shard_id != 0 || block.position.chain_id >= self.config.num_chains {
            return Err(ConsensusError::IncorrectBlockPosition);
        }
        if block.proposer_id == NodeId::default() {
            return Err(ConsensusError::MissingBlockInfo("proposer_id"));
        }
        if !block.is_genesis() {
            let chain_time = self.pipeline.lock().rb.chain_time(block.position.chain_id);
            if chain_time != 0 {
                let min = chain_time + self.config.min_block_interval.as_nanos() as i64;
                let max = chain_time + self.config.max_block_interval.as_nanos() as i64;
                if block.timestamp < min || block.timestamp > max {
                    return Err(ConsensusError::IncorrectBlockTime);
                }
            }
        }
        if block.compute_hash() != block.hash {
            return Err(ConsensusError::IncorrectHash);
        }
        if !verify_block_signature(block)? {
            return Err(ConsensusError::IncorrectSignature);
        }
        Ok(())
    }

    /// Hands a proposed block to its chain's Byzantine Agreement.
    pub fn pre_process_block(&self, block: &Block) -> Result<(), ConsensusError> {
        self.sanity_check(block)?;
        self.ba_modules[block.position.chain_id as usize].process_block(block.clone())?;
        Ok(())
    }

    /// Hands a vote to its chain's Byzantine Agreement.
    pub fn process_vote(&self, vote: &Vote) -> Result<(), ConsensusError> {
        if vote.position.chain_id >= self.config.num_chains {
            return Err(ConsensusError::IncorrectBlockPosition);
        }
        let vote = vote.clone();
        self.ba_modules[vote.position.chain_id as usize].process_vote(&vote)?;
        Ok(())
    }

    /// Runs a confirmed block through the delivery pipeline.
    ///
    /// Cross-task hand-off clones the block; nothing downstream mutates the
    /// caller's instance.
    pub fn process_block(&self, block: &Block) -> Result<(), ConsensusError> {
        self.sanity_check(block)?;
        let mut missing_randomness: Vec<H256> = Vec::new();
        let mut pipeline = self.pipeline.lock();
        pipeline.rb.process_block(block.clone())?;
        self.app.block_confirmed(block.hash);

        let extracted = pipeline.rb.extract_blocks();
        for acked in extracted {
            self.app.strongly_acked(acked.hash);
            let (mut delivered, early) = pipeline.to.process_block(&acked);
            if delivered.is_empty() {
                continue;
            }
            for block in &delivered {
                self.db.put(block.clone())?;
            }
            let hashes: Vec<H256> = delivered.iter().map(|b| b.hash).collect();
            self.app.total_ordering_delivered(hashes, early);

            pipeline.ct.process_blocks(&mut delivered);
            for mut block in delivered {
                pipeline.cc.process_block(&mut block);
                if block.randomness.is_empty() {
                    missing_randomness.push(block.hash);
                }
                self.db.update(block.clone())?;
                self.app.block_delivered(block);
            }
        }
        drop(pipeline);

        if !missing_randomness.is_empty() {
            self.spawn_pull(PullRequest::Randomness(missing_randomness));
        }
        Ok(())
    }

    /// Issues a pull on the network task; a no-op outside a runtime.
    fn spawn_pull(&self, request: PullRequest) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let network = self.network.clone();
        handle.spawn(async move {
            let result = match request {
                PullRequest::Blocks(hashes) => network.pull_blocks(&hashes).await,
                PullRequest::Votes(position) => network.pull_votes(position).await,
                PullRequest::Randomness(hashes) => network.pull_randomness(&hashes).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "pull request failed");
            }
        });
    }

    /// Validates and stores a peer's witness ack.
    pub fn process_witness_ack(&self, ack: WitnessAck) -> Result<(), ConsensusError> {
        let round = self.round.load(Ordering::SeqCst);
        if !self.node_set_cache.exists(round, &ack.proposer_id)? {
            return Err(ConsensusError::ProposerNotInNodeSet);
        }
        self.pipeline.lock().cc.process_witness_ack(ack)?;
        Ok(())
    }

    /// Latest witness ack received from every peer.
    pub fn witness_acks(&self) -> HashMap<NodeId, WitnessAck> {
        self.pipeline.lock().cc.witness_acks()
    }

    /// Fast-forwards a lagging agreement from a relayed result.
    fn process_agreement_result(&self, result: AgreementResult) -> Result<(), ConsensusError> {
        if result.position.chain_id >= self.config.num_chains {
            return Err(ConsensusError::IncorrectBlockPosition);
        }
        let agreement = &self.ba_modules[result.position.chain_id as usize];
        for vote in &result.votes {
            if vote.vote_type != VoteType::Com
                || vote.block_hash != result.block_hash
                || vote.position != result.position
            {
                continue;
            }
            if let Err(e) = agreement.process_vote(vote) {
                debug!(error = %e, "relayed vote dropped");
            }
        }
        if agreement.find_candidate(&result.block_hash).is_none() {
            self.spawn_pull(PullRequest::Blocks(vec![result.block_hash]));
        }
        // A result ahead of our running height means we lag; ask peers for
        // the votes of the position we are stuck on.
        let current = agreement.position();
        if result.position.height > current.height {
            self.spawn_pull(PullRequest::Votes(current));
        }
        Ok(())
    }

    /// Verifies relayed randomness under the round's group key and attaches
    /// it to the block.
    fn process_block_randomness(
        &self,
        result: BlockRandomnessResult,
    ) -> Result<(), ConsensusError> {
        let signature = GroupSignature::from_slice(&result.randomness)?;
        match self.tsig_verifiers.update_and_get(result.position.round) {
            Ok(Some(verifier)) => {
                if !verifier.verify_signature(&result.block_hash, &signature) {
                    return Err(ConsensusError::IncorrectBlockRandomness);
                }
            }
            Ok(None) => {
                // No verifier yet; drop and let a later pull retry.
                debug!(round = result.position.round, "randomness arrived before verifier");
                return Ok(());
            }
            Err(e) => return Err(ConsensusError::Configuration(e.into())),
        }
        self.pipeline
            .lock()
            .cc
            .process_block_randomness(result.block_hash, result.randomness)?;
        Ok(())
    }
}

impl std::fmt::Debug for Consensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consensus")
            .field("id", &self.id)
            .field("round", &self.round.load(Ordering::SeqCst))
            .field("chains", &self.config.num_chains)
            .finish()
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
