//! Governance: the external source of membership and configuration.

use lattice_crypto::ecdsa::PublicKey;
use lattice_types::{Config, DkgComplaint, DkgFinalize, DkgMasterPublicKey, H256};

/// Source of per-round node sets, configuration and randomness, plus the
/// registry the DKG publishes through.
///
/// In production this is backed by a governance contract; returning `None`
/// from the round-keyed getters means the round is not ready yet and the
/// caller should retry once governance advances.
pub trait Governance: Send + Sync {
    /// Consensus parameters for `round`.
    fn configuration(&self, round: u64) -> Option<Config>;

    /// Common reference string for `round`.
    fn crs(&self, round: u64) -> Option<H256>;

    /// Public keys of the nodes eligible in `round`.
    fn node_set(&self, round: u64) -> Option<Vec<PublicKey>>;

    /// Whether the DKG for `round` has finalized.
    fn is_dkg_final(&self, round: u64) -> bool;

    /// Master public keys published for `round`'s DKG.
    fn dkg_master_public_keys(&self, round: u64) -> Vec<DkgMasterPublicKey>;

    /// Complaints published for `round`'s DKG.
    fn dkg_complaints(&self, round: u64) -> Vec<DkgComplaint>;

    /// Publishes a master public key.
    fn add_dkg_master_public_key(&self, mpk: DkgMasterPublicKey);

    /// Publishes a complaint.
    fn add_dkg_complaint(&self, complaint: DkgComplaint);

    /// Publishes a finalize notice.
    fn add_dkg_finalize(&self, finalize: DkgFinalize);
}
