//! The configuration chain: per-round DKG orchestration and the
//! round-anchor threshold signature.
//!
//! For every round the chain drives the [`DkgProtocol`] through its phases
//! on a schedule budgeted from the round interval, assembles the group
//! public key, and runs a TSIG over the round-anchor hash so the new group
//! key attests the round's membership and configuration.

use crate::dkg::{
    DkgError, DkgGroupPublicKey, DkgProtocol, DkgReceiver, DkgShareSecret, TsigProtocol,
};
use lattice_core::Governance;
use lattice_crypto::tdkg::GroupSignature;
use lattice_types::{
    Config, DkgPartialSignature, DkgPrivateShare, NodeId, H256,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// The DKG phase schedule divides the round interval into this many slots.
const DKG_PHASE_SLOTS: u32 = 10;

/// Errors from the configuration chain.
#[derive(Debug, Error)]
pub enum ConfigurationChainError {
    /// `run_dkg` was called without a prior `register_dkg`.
    #[error("DKG not registered")]
    DkgNotRegistered,

    /// The DKG result for the round is not available.
    #[error("DKG not ready")]
    DkgNotReady,

    /// A TSIG for the same hash is already running.
    #[error("TSIG is already running")]
    TsigAlreadyRunning,

    /// The TSIG did not gather enough partials within its budget.
    #[error("TSIG timed out")]
    TsigTimeout,

    /// Governance has no configuration for the round yet.
    #[error("round is not ready")]
    RoundNotReady,

    /// A DKG-level failure.
    #[error(transparent)]
    Dkg(#[from] DkgError),
}

/// Computes the round-anchor hash over the round's sorted membership,
/// configuration, the previous anchor and the CRS.
pub fn hash_round_anchor(
    node_ids: &[NodeId],
    config: &Config,
    prev_hash: H256,
    crs: H256,
) -> H256 {
    let mut sorted: Vec<NodeId> = node_ids.to_vec();
    sorted.sort();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(sorted.len() + 3);
    for id in &sorted {
        parts.push(id.as_bytes());
    }
    let config_bytes = config.to_bytes();
    parts.push(&config_bytes);
    parts.push(prev_hash.as_bytes());
    parts.push(crs.as_bytes());
    H256::keccak256_concat(&parts)
}

/// Drives one DKG per round and threshold-signs the round anchor.
pub struct ConfigurationChain {
    id: NodeId,
    recv: Arc<dyn DkgReceiver>,
    gov: Arc<dyn Governance>,
    dkg: Mutex<Option<DkgProtocol>>,
    signers: Mutex<HashMap<u64, Arc<DkgShareSecret>>>,
    group_keys: Mutex<HashMap<u64, Arc<DkgGroupPublicKey>>>,
    tsigs: Mutex<HashMap<H256, TsigProtocol>>,
    pending_psigs: Mutex<HashMap<H256, Vec<DkgPartialSignature>>>,
    tsig_notify: Notify,
    prev_anchor: Mutex<H256>,
}

impl ConfigurationChain {
    /// Creates a configuration chain for this node.
    pub fn new(id: NodeId, recv: Arc<dyn DkgReceiver>, gov: Arc<dyn Governance>) -> Self {
        Self {
            id,
            recv,
            gov,
            dkg: Mutex::new(None),
            signers: Mutex::new(HashMap::new()),
            group_keys: Mutex::new(HashMap::new()),
            tsigs: Mutex::new(HashMap::new()),
            pending_psigs: Mutex::new(HashMap::new()),
            tsig_notify: Notify::new(),
            prev_anchor: Mutex::new(H256::ZERO),
        }
    }

    /// Registers this node for `round`'s DKG, publishing its master public
    /// key.
    pub fn register_dkg(&self, round: u64, threshold: usize) {
        let mut dkg = self.dkg.lock();
        if dkg.as_ref().map(|d| d.round()) == Some(round) {
            return;
        }
        *dkg = Some(DkgProtocol::new(
            self.id,
            self.recv.clone(),
            round,
            threshold,
        ));
        info!(round = round, threshold = threshold, "registered for DKG");
    }

    /// Runs the registered DKG through its phases.
    ///
    /// Phase budgets are slices of the round interval; between phases the
    /// task suspends while shares and complaints propagate.
    pub async fn run_dkg(&self, round: u64) -> Result<(), ConfigurationChainError> {
        let config = self
            .gov
            .configuration(round)
            .ok_or(ConfigurationChainError::RoundNotReady)?;
        let phase = config.round_interval / DKG_PHASE_SLOTS;

        {
            let dkg = self.dkg.lock();
            match dkg.as_ref() {
                Some(d) if d.round() == round => {}
                _ => return Err(ConfigurationChainError::DkgNotRegistered),
            }
        }

        // Phase 2: everyone published a master public key; send shares.
        tokio::time::sleep(phase).await;
        let mpks = self.gov.dkg_master_public_keys(round);
        if !mpks.iter().any(|mpk| mpk.proposer_id == self.id) {
            return Err(DkgError::NotDkgParticipant.into());
        }
        {
            let mut dkg = self.dkg.lock();
            let d = dkg.as_mut().ok_or(ConfigurationChainError::DkgNotRegistered)?;
            d.process_master_public_keys(&mpks)?;
        }

        // Phase 3: shares had time to arrive; nack the silent.
        tokio::time::sleep(phase).await;
        self.dkg
            .lock()
            .as_mut()
            .ok_or(ConfigurationChainError::DkgNotRegistered)?
            .propose_nack_complaints();

        // Phase 4: answer nacks against us.
        tokio::time::sleep(phase).await;
        let complaints = self.gov.dkg_complaints(round);
        self.dkg
            .lock()
            .as_mut()
            .ok_or(ConfigurationChainError::DkgNotRegistered)?
            .process_nack_complaints(&complaints)?;

        // Phase 5: join unanswered nacks.
        tokio::time::sleep(phase).await;
        let complaints = self.gov.dkg_complaints(round);
        self.dkg
            .lock()
            .as_mut()
            .ok_or(ConfigurationChainError::DkgNotRegistered)?
            .enforce_nack_complaints(&complaints);

        // Final phase: qualification and group-key assembly.
        tokio::time::sleep(phase).await;
        let mpks = self.gov.dkg_master_public_keys(round);
        let complaints = self.gov.dkg_complaints(round);
        let group_key = Arc::new(DkgGroupPublicKey::new(
            round,
            &mpks,
            &complaints,
            config.dkg_threshold(),
        )?);
        let signer = {
            let dkg = self.dkg.lock();
            let d = dkg.as_ref().ok_or(ConfigurationChainError::DkgNotRegistered)?;
            Arc::new(d.recover_share_secret(group_key.qualified_ids())?)
        };
        self.signers.lock().insert(round, signer);
        self.group_keys.lock().insert(round, group_key);
        self.dkg
            .lock()
            .as_ref()
            .ok_or(ConfigurationChainError::DkgNotRegistered)?
            .propose_finalize();
        *self.dkg.lock() = None;
        info!(round = round, "DKG finished");
        Ok(())
    }

    /// Produces this node's partial signature over `hash` with the round's
    /// share secret.
    pub fn prepare_partial_signature(
        &self,
        round: u64,
        hash: H256,
    ) -> Result<DkgPartialSignature, ConfigurationChainError> {
        let signer = self
            .signers
            .lock()
            .get(&round)
            .cloned()
            .ok_or(ConfigurationChainError::DkgNotReady)?;
        Ok(DkgPartialSignature {
            proposer_id: self.id,
            round,
            hash,
            partial_signature: signer.sign(&hash)?,
            signature: Default::default(),
        })
    }

    /// Routes a private share into the running DKG, if any.
    pub fn process_private_share(
        &self,
        share: &DkgPrivateShare,
    ) -> Result<(), ConfigurationChainError> {
        let mut dkg = self.dkg.lock();
        match dkg.as_mut() {
            Some(d) if d.round() == share.round => {
                d.process_private_share(share)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Routes a partial signature into the TSIG running for its hash,
    /// buffering it when none is running yet.
    pub fn process_partial_signature(
        &self,
        psig: &DkgPartialSignature,
    ) -> Result<(), ConfigurationChainError> {
        let mut tsigs = self.tsigs.lock();
        if let Some(tsig) = tsigs.get_mut(&psig.hash) {
            tsig.process_partial_signature(psig)?;
            self.tsig_notify.notify_waiters();
        } else {
            self.pending_psigs
                .lock()
                .entry(psig.hash)
                .or_default()
                .push(psig.clone());
        }
        Ok(())
    }

    /// Runs a threshold signature over `hash` with `round`'s group key,
    /// waiting until enough partials arrive or the budget elapses.
    pub async fn run_tsig(
        &self,
        round: u64,
        hash: H256,
        budget: Duration,
    ) -> Result<GroupSignature, ConfigurationChainError> {
        {
            let group_key = self
                .group_keys
                .lock()
                .get(&round)
                .cloned()
                .ok_or(ConfigurationChainError::DkgNotReady)?;
            let mut tsigs = self.tsigs.lock();
            if tsigs.contains_key(&hash) {
                return Err(ConfigurationChainError::TsigAlreadyRunning);
            }
            let mut tsig = TsigProtocol::new(group_key, hash);
            for psig in self
                .pending_psigs
                .lock()
                .remove(&hash)
                .unwrap_or_default()
            {
                if let Err(e) = tsig.process_partial_signature(&psig) {
                    warn!(error = %e, "dropping buffered partial signature");
                }
            }
            tsigs.insert(hash, tsig);
        }

        let deadline = tokio::time::Instant::now() + budget;
        let signature = loop {
            // Arm the notification before checking, so a partial landing in
            // between cannot be missed.
            let notified = self.tsig_notify.notified();
            match self.tsigs.lock().get(&hash).expect("tsig registered").signature() {
                Ok(signature) => break signature,
                Err(DkgError::NotEnoughPartialSignatures) => {}
                Err(e) => {
                    self.tsigs.lock().remove(&hash);
                    return Err(e.into());
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.tsigs.lock().remove(&hash);
                return Err(ConfigurationChainError::TsigTimeout);
            }
        };
        self.tsigs.lock().remove(&hash);
        Ok(signature)
    }

    /// Threshold-signs the round anchor and records it as the previous
    /// anchor for the next round.
    pub async fn run_block_tsig(
        &self,
        round: u64,
        anchor: H256,
        budget: Duration,
    ) -> Result<GroupSignature, ConfigurationChainError> {
        let signature = self.run_tsig(round, anchor, budget).await?;
        *self.prev_anchor.lock() = anchor;
        debug!(round = round, anchor = %anchor, "round anchor signed");
        Ok(signature)
    }

    /// Whether the DKG of `round` completed, locally or per governance.
    pub fn is_dkg_final(&self, round: u64) -> bool {
        if self.group_keys.lock().contains_key(&round) {
            return true;
        }
        self.gov.is_dkg_final(round)
    }

    /// The group public key assembled for `round`, if any.
    pub fn group_public_key(&self, round: u64) -> Option<Arc<DkgGroupPublicKey>> {
        self.group_keys.lock().get(&round).cloned()
    }

    /// The previous round-anchor hash.
    pub fn prev_anchor(&self) -> H256 {
        *self.prev_anchor.lock()
    }
}

impl std::fmt::Debug for ConfigurationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationChain")
            .field("id", &self.id)
            .field("signers", &self.signers.lock().len())
            .field("group_keys", &self.group_keys.lock().len())
            .finish()
    }
}
