//! Wire messages of the distributed key generation protocol.
//!
//! One DKG runs per round among the CRS-sampled DKG set. Master public keys
//! and complaints go through governance; private shares travel directly
//! between participants; partial signatures and finalize notices are
//! broadcast.

use crate::hash::H256;
use crate::node::NodeId;
use lattice_crypto::ecdsa::Signature;
use lattice_crypto::tdkg::{DkgId, PartialSignature, PublicKeyShares};
use serde::{Deserialize, Serialize};

/// A participant's polynomial commitments for one DKG round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgMasterPublicKey {
    /// Publishing participant.
    pub proposer_id: NodeId,
    /// DKG round.
    pub round: u64,
    /// The participant's scalar identity in the sharing scheme.
    pub dkg_id: DkgId,
    /// Commitments `[g^a_0, …, g^a_{t-1}]` to the secret polynomial.
    pub public_key_shares: PublicKeyShares,
    /// Publisher's recoverable ECDSA signature.
    pub signature: Signature,
}

impl DkgMasterPublicKey {
    /// Canonical signing encoding.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.proposer_id.as_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(self.dkg_id.as_bytes());
        for commitment in self.public_key_shares.commitments() {
            out.extend_from_slice(commitment);
        }
        out
    }
}

/// A private polynomial evaluation sent from one participant to another.
///
/// A zero share is the "nack" form used inside complaints to report a
/// participant that never sent its share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgPrivateShare {
    /// Dealing participant.
    pub proposer_id: NodeId,
    /// Receiving participant.
    pub receiver_id: NodeId,
    /// DKG round.
    pub round: u64,
    /// Big-endian scalar share `s_proposer(id_receiver)`; zero when absent.
    pub share: [u8; 32],
    /// Dealer's recoverable ECDSA signature.
    pub signature: Signature,
}

impl DkgPrivateShare {
    /// Whether the share field is the zero placeholder.
    pub fn is_empty_share(&self) -> bool {
        self.share == [0u8; 32]
    }

    /// Canonical signing encoding.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 32 + 8 + 32);
        out.extend_from_slice(self.proposer_id.as_bytes());
        out.extend_from_slice(self.receiver_id.as_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(&self.share);
        out
    }
}

/// A complaint against a DKG participant.
///
/// Carries the offending private share when the share failed verification,
/// or a nack (zero share naming the silent participant) when none arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgComplaint {
    /// Complaining participant.
    pub proposer_id: NodeId,
    /// DKG round.
    pub round: u64,
    /// The disputed share; `private_share.proposer_id` names the accused.
    pub private_share: DkgPrivateShare,
    /// Complainer's recoverable ECDSA signature.
    pub signature: Signature,
}

impl DkgComplaint {
    /// A nack complaint reports a share that never arrived.
    pub fn is_nack(&self) -> bool {
        self.private_share.is_empty_share()
    }

    /// Canonical signing encoding.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.proposer_id.as_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(&self.private_share.signing_bytes());
        out.extend_from_slice(&self.private_share.signature.to_bytes());
        out
    }
}

/// A participant's partial threshold signature over a fixed hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgPartialSignature {
    /// Signing participant.
    pub proposer_id: NodeId,
    /// DKG round whose group key the partial belongs to.
    pub round: u64,
    /// The hash that was signed.
    pub hash: H256,
    /// BLS partial signature produced with the participant's secret share.
    pub partial_signature: PartialSignature,
    /// Participant's recoverable ECDSA signature over the envelope.
    pub signature: Signature,
}

impl DkgPartialSignature {
    /// Canonical signing encoding.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 8 + 32 + 96);
        out.extend_from_slice(self.proposer_id.as_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(self.hash.as_bytes());
        out.extend_from_slice(self.partial_signature.as_bytes());
        out
    }
}

/// Notice that a participant finished the DKG for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgFinalize {
    /// Finishing participant.
    pub proposer_id: NodeId,
    /// DKG round.
    pub round: u64,
    /// Participant's recoverable ECDSA signature.
    pub signature: Signature,
}

impl DkgFinalize {
    /// Canonical signing encoding.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 8);
        out.extend_from_slice(self.proposer_id.as_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out
    }
}
