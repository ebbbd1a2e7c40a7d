//! Signing and verification of every consensus message kind.
//!
//! The [`Authenticator`] holds this node's secp256k1 private key and signs
//! blocks, votes, witness acks and DKG messages. Verification is stateless:
//! the signer's public key is recovered from the signature and its derived
//! [`NodeId`] compared against the proposer embedded in the message, so the
//! free `verify_*` functions need no key material.

use lattice_crypto::ecdsa::PrivateKey;
use lattice_crypto::Result as CryptoResult;
use lattice_types::{
    Block, DkgComplaint, DkgFinalize, DkgMasterPublicKey, DkgPartialSignature, DkgPrivateShare,
    NodeId, Vote, WitnessAck, H256,
};

/// Signs outgoing messages with this node's key.
pub struct Authenticator {
    private_key: PrivateKey,
    id: NodeId,
}

impl Authenticator {
    /// Creates an authenticator around a private key.
    pub fn new(private_key: PrivateKey) -> Self {
        let id = NodeId::new(&private_key.public_key());
        Self { private_key, id }
    }

    /// This node's identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Computes the block hash over the canonical encoding, then signs it.
    pub fn sign_block(&self, block: &mut Block) -> CryptoResult<()> {
        block.proposer_id = self.id;
        block.hash = block.compute_hash();
        block.signature = self.private_key.sign_prehash(block.hash.as_fixed_bytes())?;
        Ok(())
    }

    /// Signs the round CRS bound to the block hash.
    ///
    /// The digest is `keccak(crs_hash ‖ block_hash)`, so a CRS signature for
    /// one block cannot be replayed on another.
    pub fn sign_crs(&self, block: &mut Block, crs_hash: H256) -> CryptoResult<()> {
        let digest =
            H256::keccak256_concat(&[crs_hash.as_bytes(), block.hash.as_bytes()]);
        block.crs_signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }

    /// Signs an agreement vote.
    pub fn sign_vote(&self, vote: &mut Vote) -> CryptoResult<()> {
        vote.proposer_id = self.id;
        let digest = H256::keccak256(&vote.signing_bytes());
        vote.signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }

    /// Builds and signs a witness ack over a delivered block.
    pub fn sign_witness_ack(&self, block: &Block) -> CryptoResult<WitnessAck> {
        let mut ack = WitnessAck {
            proposer_id: self.id,
            witness_block_hash: block.hash,
            witness_height: block.witness.height,
            hash: H256::ZERO,
            signature: Default::default(),
        };
        ack.hash = ack.compute_hash();
        ack.signature = self.private_key.sign_prehash(ack.hash.as_fixed_bytes())?;
        Ok(ack)
    }

    /// Signs a DKG master public key.
    pub fn sign_dkg_master_public_key(&self, mpk: &mut DkgMasterPublicKey) -> CryptoResult<()> {
        let digest = H256::keccak256(&mpk.signing_bytes());
        mpk.signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }

    /// Signs a DKG private share.
    pub fn sign_dkg_private_share(&self, share: &mut DkgPrivateShare) -> CryptoResult<()> {
        let digest = H256::keccak256(&share.signing_bytes());
        share.signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }

    /// Signs a DKG complaint.
    pub fn sign_dkg_complaint(&self, complaint: &mut DkgComplaint) -> CryptoResult<()> {
        let digest = H256::keccak256(&complaint.signing_bytes());
        complaint.signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }

    /// Signs a partial threshold signature envelope.
    pub fn sign_dkg_partial_signature(&self, psig: &mut DkgPartialSignature) -> CryptoResult<()> {
        let digest = H256::keccak256(&psig.signing_bytes());
        psig.signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }

    /// Signs a DKG finalize notice.
    pub fn sign_dkg_finalize(&self, finalize: &mut DkgFinalize) -> CryptoResult<()> {
        let digest = H256::keccak256(&finalize.signing_bytes());
        finalize.signature = self.private_key.sign_prehash(digest.as_fixed_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").field("id", &self.id).finish()
    }
}

fn recovered_matches(
    digest: &H256,
    signature: &lattice_crypto::ecdsa::Signature,
    proposer: &NodeId,
) -> CryptoResult<bool> {
    let public_key = signature.recover_prehash(digest.as_fixed_bytes())?;
    Ok(&NodeId::new(&public_key) == proposer)
}

/// Verifies a block signature against its embedded proposer.
///
/// The hash itself is checked separately by the orchestrator's sanity check.
pub fn verify_block_signature(block: &Block) -> CryptoResult<bool> {
    recovered_matches(&block.hash, &block.signature, &block.proposer_id)
}

/// Verifies a vote signature against its embedded voter.
pub fn verify_vote_signature(vote: &Vote) -> CryptoResult<bool> {
    let digest = H256::keccak256(&vote.signing_bytes());
    recovered_matches(&digest, &vote.signature, &vote.proposer_id)
}

/// Verifies a witness-ack signature against its embedded proposer.
pub fn verify_witness_ack_signature(ack: &WitnessAck) -> CryptoResult<bool> {
    if ack.hash != ack.compute_hash() {
        return Ok(false);
    }
    recovered_matches(&ack.hash, &ack.signature, &ack.proposer_id)
}

/// Verifies a DKG master public key signature.
pub fn verify_dkg_master_public_key_signature(mpk: &DkgMasterPublicKey) -> CryptoResult<bool> {
    let digest = H256::keccak256(&mpk.signing_bytes());
    recovered_matches(&digest, &mpk.signature, &mpk.proposer_id)
}

/// Verifies a DKG private share signature.
pub fn verify_dkg_private_share_signature(share: &DkgPrivateShare) -> CryptoResult<bool> {
    let digest = H256::keccak256(&share.signing_bytes());
    recovered_matches(&digest, &share.signature, &share.proposer_id)
}

/// Verifies a DKG complaint signature.
pub fn verify_dkg_complaint_signature(complaint: &DkgComplaint) -> CryptoResult<bool> {
    let digest = H256::keccak256(&complaint.signing_bytes());
    recovered_matches(&digest, &complaint.signature, &complaint.proposer_id)
}

/// Verifies a partial threshold signature envelope.
pub fn verify_dkg_partial_signature_signature(
    psig: &DkgPartialSignature,
) -> CryptoResult<bool> {
    let digest = H256::keccak256(&psig.signing_bytes());
    recovered_matches(&digest, &psig.signature, &psig.proposer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Position, VoteType};

    #[test]
    fn test_block_sign_and_verify() {
        let auth = Authenticator::new(PrivateKey::random());
        let mut block = Block {
            payload: b"payload".to_vec(),
            ..Default::default()
        };
        auth.sign_block(&mut block).unwrap();

        assert_eq!(block.hash, block.compute_hash());
        assert!(verify_block_signature(&block).unwrap());

        // A different proposer id no longer matches the recovered key.
        block.proposer_id = NodeId(H256::keccak256(b"other"));
        assert!(!verify_block_signature(&block).unwrap());
    }

    #[test]
    fn test_vote_sign_and_verify() {
        let auth = Authenticator::new(PrivateKey::random());
        let mut vote = Vote::new(
            VoteType::PreCom,
            H256::keccak256(b"block"),
            Position::default(),
            3,
            auth.id(),
        );
        auth.sign_vote(&mut vote).unwrap();
        assert!(verify_vote_signature(&vote).unwrap());

        // Tampering with the period invalidates the signature.
        vote.period = 4;
        assert!(!verify_vote_signature(&vote).unwrap());
    }

    #[test]
    fn test_witness_ack_sign_and_verify() {
        let auth = Authenticator::new(PrivateKey::random());
        let mut block = Block::default();
        block.witness.height = 10;
        auth.sign_block(&mut block).unwrap();

        let ack = auth.sign_witness_ack(&block).unwrap();
        assert!(verify_witness_ack_signature(&ack).unwrap());

        let mut forged = ack.clone();
        forged.witness_height = 11;
        assert!(!verify_witness_ack_signature(&forged).unwrap());
    }

    #[test]
    fn test_crs_signature_binds_block() {
        let auth = Authenticator::new(PrivateKey::random());
        let crs = H256::keccak256(b"crs");

        let mut a = Block::default();
        auth.sign_block(&mut a).unwrap();
        auth.sign_crs(&mut a, crs).unwrap();

        let mut b = Block {
            payload: b"x".to_vec(),
            ..Default::default()
        };
        auth.sign_block(&mut b).unwrap();

        // Replaying a's CRS signature on b fails.
        let digest = H256::keccak256_concat(&[crs.as_bytes(), b.hash.as_bytes()]);
        let recovered = a
            .crs_signature
            .recover_prehash(digest.as_fixed_bytes())
            .map(|pk| NodeId::new(&pk) == b.proposer_id)
            .unwrap_or(false);
        assert!(!recovered);
    }
}
