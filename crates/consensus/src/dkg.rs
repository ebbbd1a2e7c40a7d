//! One round of distributed key generation and threshold signing.
//!
//! Each member of the round's DKG set runs a [`DkgProtocol`]:
//!
//! 1. publish polynomial commitments (the master public key),
//! 2. send every participant its private share,
//! 3. complain about invalid shares (with the bad share attached) or silent
//!    participants (nack complaints, answered by anti-nacks),
//! 4. disqualify participants with a valid complaint or more than
//!    `threshold` unresolved nacks,
//! 5. sum the qualified dealers' contributions into the group public key
//!    and this node's secret share.
//!
//! A [`TsigProtocol`] then collects verified partial signatures over one
//! hash and interpolates them into a group signature checked against the
//! [`DkgGroupPublicKey`]. [`TsigVerifierCache`] keeps the verifiers of
//! recent rounds.

use crate::authenticator::{
    verify_dkg_partial_signature_signature, verify_dkg_private_share_signature,
};
use lattice_core::Governance;
use lattice_crypto::tdkg::{
    self, DkgId, DkgPrivateKey, DkgPublicKey, GroupSignature, PartialSignature,
    PrivateKeyShares, PublicKeyShares,
};
use lattice_crypto::CryptoError;
use lattice_types::{
    DkgComplaint, DkgFinalize, DkgMasterPublicKey, DkgPartialSignature, DkgPrivateShare, NodeId,
    H256,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the DKG and TSIG protocols.
#[derive(Debug, Error)]
pub enum DkgError {
    /// The sender is not a member of this round's DKG set.
    #[error("not a DKG participant")]
    NotDkgParticipant,

    /// The sender was disqualified during this round's DKG.
    #[error("not a qualified DKG participant")]
    NotQualifyDkgParticipant,

    /// No private share exists for the requested participant.
    #[error("private share not found for specific ID")]
    IdShareNotFound,

    /// Fewer qualified participants than the threshold.
    #[error("threshold not reached")]
    NotReachThreshold,

    /// A private share envelope failed signature verification.
    #[error("incorrect private share signature")]
    IncorrectPrivateShareSignature,

    /// A partial signature was produced over a different hash.
    #[error("mismatch partial signature hash")]
    MismatchPartialSignatureHash,

    /// A partial signature envelope failed signature verification.
    #[error("incorrect partial signature signature")]
    IncorrectPartialSignatureSignature,

    /// A partial signature failed verification under the signer's key share.
    #[error("incorrect partial signature")]
    IncorrectPartialSignature,

    /// Too few partial signatures to interpolate.
    #[error("not enough partial signatures")]
    NotEnoughPartialSignatures,

    /// The verifier for that round was already purged from the cache.
    #[error("cache of round already been purged")]
    RoundAlreadyPurged,

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Outbound messages of a DKG participant; implemented by the orchestrator,
/// which signs and routes them.
pub trait DkgReceiver: Send + Sync {
    /// Publishes a complaint through governance.
    fn propose_complaint(&self, complaint: DkgComplaint);

    /// Publishes this node's master public key through governance.
    fn propose_master_public_key(&self, mpk: DkgMasterPublicKey);

    /// Sends a private share directly to its receiver.
    fn propose_private_share(&self, share: DkgPrivateShare);

    /// Broadcasts a revealed share answering a nack complaint.
    fn propose_anti_nack_complaint(&self, share: DkgPrivateShare);

    /// Publishes a finalize notice through governance.
    fn propose_finalize(&self, finalize: DkgFinalize);
}

fn dkg_id_of(node_id: &NodeId) -> DkgId {
    DkgId::from_bytes(node_id.hash().as_fixed_bytes())
}

/// One participant's state for one DKG round.
pub struct DkgProtocol {
    id: NodeId,
    recv: Arc<dyn DkgReceiver>,
    round: u64,
    threshold: usize,
    id_map: HashMap<NodeId, DkgId>,
    mpk_map: HashMap<NodeId, PublicKeyShares>,
    master_private_shares: PrivateKeyShares,
    received_shares: PrivateKeyShares,
    shares_received: HashSet<NodeId>,
    /// Dealers this node already complained about with an invalid share.
    node_complained: HashSet<NodeId>,
    /// Dealers this node already joined an unanswered nack against. Kept
    /// separate from `node_complained`: an enforce-nack must never suppress
    /// a later invalid-share complaint carrying real evidence.
    enforced_against: HashSet<NodeId>,
    /// anti_complaints[complainer] = accused dealers whose reveal answered
    /// that complainer's nack.
    anti_complaints: HashMap<NodeId, HashSet<NodeId>>,
}

impl DkgProtocol {
    /// Starts a DKG round: samples the polynomial and publishes the master
    /// public key through the receiver.
    pub fn new(id: NodeId, recv: Arc<dyn DkgReceiver>, round: u64, threshold: usize) -> Self {
        let (master_private_shares, public_shares) = tdkg::new_private_key_shares(threshold);

        recv.propose_master_public_key(DkgMasterPublicKey {
            proposer_id: id,
            round,
            dkg_id: dkg_id_of(&id),
            public_key_shares: public_shares,
            signature: Default::default(),
        });

        Self {
            id,
            recv,
            round,
            threshold,
            id_map: HashMap::new(),
            mpk_map: HashMap::new(),
            master_private_shares,
            received_shares: PrivateKeyShares::empty(),
            shares_received: HashSet::new(),
            node_complained: HashSet::new(),
            enforced_against: HashSet::new(),
            anti_complaints: HashMap::new(),
        }
    }

    /// Round this protocol instance runs for.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Registers the announced master public keys and sends every
    /// participant its private share.
    pub fn process_master_public_keys(
        &mut self,
        mpks: &[DkgMasterPublicKey],
    ) -> Result<(), DkgError> {
        self.id_map = mpks
            .iter()
            .map(|mpk| (mpk.proposer_id, mpk.dkg_id))
            .collect();
        self.mpk_map = mpks
            .iter()
            .map(|mpk| (mpk.proposer_id, mpk.public_key_shares.clone()))
            .collect();
        self.shares_received.clear();

        let ids: Vec<DkgId> = mpks.iter().map(|mpk| mpk.dkg_id).collect();
        self.master_private_shares.set_participants(ids);

        for mpk in mpks {
            let share = self
                .master_private_shares
                .share(&mpk.dkg_id)
                .ok_or(DkgError::IdShareNotFound)?;
            self.recv.propose_private_share(DkgPrivateShare {
                proposer_id: self.id,
                receiver_id: mpk.proposer_id,
                round: self.round,
                share: share.to_be_bytes(),
                signature: Default::default(),
            });
        }
        Ok(())
    }

    /// Nack-complains about every participant whose share never arrived.
    pub fn propose_nack_complaints(&mut self) {
        let silent: Vec<NodeId> = self
            .mpk_map
            .keys()
            .filter(|node| !self.shares_received.contains(node))
            .copied()
            .collect();
        for node in silent {
            debug!(round = self.round, accused = %node, "proposing nack complaint");
            self.recv.propose_complaint(DkgComplaint {
                proposer_id: self.id,
                round: self.round,
                private_share: DkgPrivateShare {
                    proposer_id: node,
                    receiver_id: NodeId::default(),
                    round: self.round,
                    share: [0u8; 32],
                    signature: Default::default(),
                },
                signature: Default::default(),
            });
        }
    }

    /// Answers nack complaints naming this node by revealing the share.
    pub fn process_nack_complaints(&mut self, complaints: &[DkgComplaint]) -> Result<(), DkgError> {
        let mut result = Ok(());
        for complaint in complaints {
            if !complaint.is_nack() {
                continue;
            }
            if complaint.private_share.proposer_id != self.id {
                continue;
            }
            let Some(id) = self.id_map.get(&complaint.proposer_id) else {
                result = Err(DkgError::NotDkgParticipant);
                continue;
            };
            let Some(share) = self.master_private_shares.share(id) else {
                result = Err(DkgError::IdShareNotFound);
                continue;
            };
            self.recv.propose_anti_nack_complaint(DkgPrivateShare {
                proposer_id: self.id,
                receiver_id: complaint.proposer_id,
                round: self.round,
                share: share.to_be_bytes(),
                signature: Default::default(),
            });
        }
        result
    }

    /// Joins outstanding nack complaints that no anti-nack answered.
    pub fn enforce_nack_complaints(&mut self, complaints: &[DkgComplaint]) {
        for complaint in complaints {
            if !complaint.is_nack() {
                continue;
            }
            let accused = complaint.private_share.proposer_id;
            let complainer = complaint.proposer_id;
            // Never against ourselves, and never twice.
            if accused == self.id || complainer == self.id {
                continue;
            }
            let answered = self
                .anti_complaints
                .get(&complainer)
                .map(|set| set.contains(&accused))
                .unwrap_or(false);
            if !answered && self.enforced_against.insert(accused) {
                self.recv.propose_complaint(DkgComplaint {
                    proposer_id: self.id,
                    round: self.round,
                    private_share: DkgPrivateShare {
                        proposer_id: accused,
                        receiver_id: NodeId::default(),
                        round: self.round,
                        share: [0u8; 32],
                        signature: Default::default(),
                    },
                    signature: Default::default(),
                });
            }
        }
    }

    fn sanity_check(&self, share: &DkgPrivateShare) -> Result<(), DkgError> {
        if !self.id_map.contains_key(&share.proposer_id) {
            return Err(DkgError::NotDkgParticipant);
        }
        if !verify_dkg_private_share_signature(share)? {
            return Err(DkgError::IncorrectPrivateShareSignature);
        }
        Ok(())
    }

    /// Verifies an incoming private share against the dealer's commitments.
    ///
    /// An invalid share triggers a complaint with the share attached; a
    /// share addressed to another receiver is treated as an anti-nack and
    /// adopted in place of our own nack.
    pub fn process_private_share(&mut self, share: &DkgPrivateShare) -> Result<(), DkgError> {
        if share.round != self.round {
            return Ok(());
        }
        // Not a participant ourselves: nothing to verify against.
        let Some(receiver_dkg_id) = self.id_map.get(&share.receiver_id).copied() else {
            return Ok(());
        };
        self.sanity_check(share)?;
        let mpk = self
            .mpk_map
            .get(&share.proposer_id)
            .ok_or(DkgError::NotDkgParticipant)?;

        let private_key = DkgPrivateKey::from_be_bytes(&share.share);
        let valid = mpk.verify_private_share(&receiver_dkg_id, &private_key)?;

        if share.receiver_id == self.id {
            self.shares_received.insert(share.proposer_id);
        }

        if !valid {
            if self.node_complained.insert(share.proposer_id) {
                warn!(round = self.round, dealer = %share.proposer_id, "invalid private share");
                self.recv.propose_complaint(DkgComplaint {
                    proposer_id: self.id,
                    round: self.round,
                    private_share: share.clone(),
                    signature: Default::default(),
                });
            }
        } else if share.receiver_id == self.id {
            let dealer = self.id_map[&share.proposer_id];
            self.received_shares.add_share(dealer, &private_key);
        } else {
            // A share addressed to someone else is an anti-nack; adopt it and
            // rebroadcast once.
            let entry = self
                .anti_complaints
                .entry(share.receiver_id)
                .or_insert_with(|| {
                    self.recv.propose_anti_nack_complaint(share.clone());
                    HashSet::new()
                });
            entry.insert(share.proposer_id);
        }
        Ok(())
    }

    /// Publishes the finalize notice for this round.
    pub fn propose_finalize(&self) {
        self.recv.propose_finalize(DkgFinalize {
            proposer_id: self.id,
            round: self.round,
            signature: Default::default(),
        });
    }

    /// Sums the qualified dealers' shares into this node's share secret.
    pub fn recover_share_secret(&self, qualified: &[DkgId]) -> Result<DkgShareSecret, DkgError> {
        if qualified.len() < self.threshold {
            return Err(DkgError::NotReachThreshold);
        }
        let private_key = self
            .received_shares
            .recover_private_key(qualified)
            .map_err(|_| DkgError::IdShareNotFound)?;
        Ok(DkgShareSecret { private_key })
    }
}

impl std::fmt::Debug for DkgProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkgProtocol")
            .field("id", &self.id)
            .field("round", &self.round)
            .field("threshold", &self.threshold)
            .field("participants", &self.id_map.len())
            .finish()
    }
}

/// A node's secret share of the round's group key.
pub struct DkgShareSecret {
    private_key: DkgPrivateKey,
}

impl DkgShareSecret {
    /// Signs a hash with the share; partials from `threshold` holders
    /// interpolate into the group signature.
    pub fn sign(&self, hash: &H256) -> Result<PartialSignature, DkgError> {
        Ok(self.private_key.sign(hash.as_fixed_bytes())?)
    }
}

/// The assembled result of one round's DKG.
pub struct DkgGroupPublicKey {
    round: u64,
    qualified_ids: Vec<DkgId>,
    qualified_nodes: HashSet<NodeId>,
    id_map: HashMap<NodeId, DkgId>,
    /// Per-node public key shares of the qualified participants.
    public_keys: HashMap<NodeId, DkgPublicKey>,
    group_public_key: DkgPublicKey,
    threshold: usize,
}

impl DkgGroupPublicKey {
    /// Qualifies participants and assembles the group public key.
    ///
    /// A participant is disqualified by any valid non-nack complaint, or by
    /// more than `threshold` unanswered nacks.
    pub fn new(
        round: u64,
        mpks: &[DkgMasterPublicKey],
        complaints: &[DkgComplaint],
        threshold: usize,
    ) -> Result<Self, DkgError> {
        let mut disqualified: HashSet<NodeId> = HashSet::new();
        let mut nack_counts: BTreeMap<NodeId, usize> = BTreeMap::new();
        for complaint in complaints {
            if complaint.is_nack() {
                *nack_counts
                    .entry(complaint.private_share.proposer_id)
                    .or_default() += 1;
            } else {
                disqualified.insert(complaint.private_share.proposer_id);
            }
        }
        for (node, count) in nack_counts {
            if count > threshold {
                disqualified.insert(node);
            }
        }

        let mut qualified_ids = Vec::with_capacity(mpks.len());
        let mut qualified_nodes = HashSet::new();
        let mut id_map = HashMap::new();
        let mut qualified_mpks: Vec<&PublicKeyShares> = Vec::new();
        let mut qualified_proposers: Vec<NodeId> = Vec::new();
        for mpk in mpks {
            if disqualified.contains(&mpk.proposer_id) {
                continue;
            }
            qualified_ids.push(mpk.dkg_id);
            qualified_nodes.insert(mpk.proposer_id);
            id_map.insert(mpk.proposer_id, mpk.dkg_id);
            qualified_mpks.push(&mpk.public_key_shares);
            qualified_proposers.push(mpk.proposer_id);
        }
        if qualified_ids.len() < threshold {
            return Err(DkgError::NotReachThreshold);
        }

        let mut public_keys = HashMap::with_capacity(qualified_ids.len());
        for (node, dkg_id) in qualified_proposers.iter().zip(qualified_ids.iter()) {
            public_keys.insert(
                *node,
                tdkg::recover_node_public_key(&qualified_mpks, dkg_id)?,
            );
        }
        let group_public_key = tdkg::recover_group_public_key(&qualified_mpks)?;

        Ok(Self {
            round,
            qualified_ids,
            qualified_nodes,
            id_map,
            public_keys,
            group_public_key,
            threshold,
        })
    }

    /// Round this group key belongs to.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The qualified participants' scalar identities.
    pub fn qualified_ids(&self) -> &[DkgId] {
        &self.qualified_ids
    }

    /// Whether a node survived qualification.
    pub fn is_qualified(&self, node: &NodeId) -> bool {
        self.qualified_nodes.contains(node)
    }

    /// The aggregated group public key.
    pub fn group_public_key(&self) -> &DkgPublicKey {
        &self.group_public_key
    }
}

/// Verifies group threshold signatures.
pub trait TsigVerifier: Send + Sync {
    /// Whether `signature` is the group signature over `hash`.
    fn verify_signature(&self, hash: &H256, signature: &GroupSignature) -> bool;
}

impl TsigVerifier for DkgGroupPublicKey {
    fn verify_signature(&self, hash: &H256, signature: &GroupSignature) -> bool {
        self.group_public_key.verify(hash.as_fixed_bytes(), signature)
    }
}

/// Collects partial signatures over one hash and interpolates the group
/// signature.
pub struct TsigProtocol {
    group_public_key: Arc<DkgGroupPublicKey>,
    hash: H256,
    signatures: BTreeMap<DkgId, PartialSignature>,
}

impl TsigProtocol {
    /// Starts a threshold-signing session for `hash`.
    pub fn new(group_public_key: Arc<DkgGroupPublicKey>, hash: H256) -> Self {
        Self {
            group_public_key,
            hash,
            signatures: BTreeMap::new(),
        }
    }

    /// Verifies and records one partial signature.
    pub fn process_partial_signature(
        &mut self,
        psig: &DkgPartialSignature,
    ) -> Result<(), DkgError> {
        if psig.round != self.group_public_key.round {
            return Ok(());
        }
        let Some(dkg_id) = self.group_public_key.id_map.get(&psig.proposer_id).copied() else {
            return Err(DkgError::NotQualifyDkgParticipant);
        };
        if !verify_dkg_partial_signature_signature(psig)? {
            return Err(DkgError::IncorrectPartialSignatureSignature);
        }
        if psig.hash != self.hash {
            return Err(DkgError::MismatchPartialSignatureHash);
        }
        let public_key = self
            .group_public_key
            .public_keys
            .get(&psig.proposer_id)
            .ok_or(DkgError::NotQualifyDkgParticipant)?;
        if !public_key.verify_partial(self.hash.as_fixed_bytes(), &psig.partial_signature) {
            return Err(DkgError::IncorrectPartialSignature);
        }
        self.signatures.insert(dkg_id, psig.partial_signature);
        Ok(())
    }

    /// Interpolates the group signature once `threshold` partials are held.
    pub fn signature(&self) -> Result<GroupSignature, DkgError> {
        if self.signatures.len() < self.group_public_key.threshold {
            return Err(DkgError::NotEnoughPartialSignatures);
        }
        let partials: Vec<(DkgId, PartialSignature)> = self
            .signatures
            .iter()
            .map(|(id, sig)| (*id, *sig))
            .collect();
        Ok(tdkg::recover_signature(&partials)?)
    }

    /// Number of partials collected so far.
    pub fn partial_count(&self) -> usize {
        self.signatures.len()
    }
}

/// Bounded cache of recent rounds' threshold-signature verifiers.
pub struct TsigVerifierCache {
    gov: Arc<dyn Governance>,
    inner: RwLock<TsigVerifierCacheInner>,
    cache_size: usize,
}

#[derive(Default)]
struct TsigVerifierCacheInner {
    verifiers: HashMap<u64, Arc<DkgGroupPublicKey>>,
    min_round: u64,
}

impl TsigVerifierCache {
    /// Creates a cache keeping at most `cache_size` rounds.
    pub fn new(gov: Arc<dyn Governance>, cache_size: usize) -> Self {
        Self {
            gov,
            inner: RwLock::new(TsigVerifierCacheInner::default()),
            cache_size: cache_size.max(1),
        }
    }

    /// Updates the cache for `round` and returns its verifier if the DKG is
    /// final.
    pub fn update_and_get(
        &self,
        round: u64,
    ) -> Result<Option<Arc<DkgGroupPublicKey>>, DkgError> {
        if !self.update(round)? {
            return Ok(None);
        }
        Ok(self.get(round))
    }

    /// Builds the verifier for `round` if governance finalized its DKG.
    /// Returns whether a verifier for that round is cached.
    pub fn update(&self, round: u64) -> Result<bool, DkgError> {
        let mut inner = self.inner.write();
        if !inner.verifiers.is_empty() && round < inner.min_round {
            return Err(DkgError::RoundAlreadyPurged);
        }
        if inner.verifiers.contains_key(&round) {
            return Ok(true);
        }
        if !self.gov.is_dkg_final(round) {
            return Ok(false);
        }
        let Some(config) = self.gov.configuration(round) else {
            return Ok(false);
        };
        let gpk = DkgGroupPublicKey::new(
            round,
            &self.gov.dkg_master_public_keys(round),
            &self.gov.dkg_complaints(round),
            config.dkg_threshold(),
        )?;
        if inner.verifiers.is_empty() {
            inner.min_round = round;
        }
        inner.verifiers.insert(round, Arc::new(gpk));
        if inner.verifiers.len() > self.cache_size {
            let evict = inner.min_round;
            inner.verifiers.remove(&evict);
        }
        while !inner.verifiers.is_empty() && !inner.verifiers.contains_key(&inner.min_round) {
            inner.min_round += 1;
        }
        Ok(true)
    }

    /// The cached verifier of `round`, if any.
    pub fn get(&self, round: u64) -> Option<Arc<DkgGroupPublicKey>> {
        self.inner.read().verifiers.get(&round).cloned()
    }
}
