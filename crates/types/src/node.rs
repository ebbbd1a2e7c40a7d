//! Node identity and deterministic subset selection.
//!
//! A [`NodeId`] is the Keccak256 of a node's uncompressed public key and is
//! stable across rounds. A [`NodeSet`] is the unordered set of nodes eligible
//! for a round; notary sets, DKG sets and the per-period agreement leader are
//! all derived from it by ranking every member with a CRS-keyed hash and
//! taking the smallest ranks. Selection is deterministic and independent of
//! insertion order.

use crate::hash::H256;
use lattice_crypto::ecdsa::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identity of a consensus node.
///
/// `NodeId = Keccak256(uncompressed_public_key)`.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub H256);

impl NodeId {
    /// Derives the node identity from a public key.
    pub fn new(public_key: &PublicKey) -> Self {
        Self(H256::keccak256(&public_key.to_uncompressed()))
    }

    /// Returns the identity as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns the underlying hash.
    #[inline]
    pub fn hash(&self) -> H256 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &self.0.to_hex()[..10])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_hex()[..10])
    }
}

impl From<H256> for NodeId {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

/// Target of a subset selection.
///
/// Each target kind mixes a distinct tag into the rank hash so that the
/// notary set of one chain, the DKG set, and the leader ranking never
/// coincide by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetTarget {
    /// Notary set for one chain of a round.
    Notary {
        /// The round's common reference string.
        crs: H256,
        /// Chain the notary set serves.
        chain_id: u32,
    },
    /// DKG set of a round.
    Dkg {
        /// The round's common reference string.
        crs: H256,
    },
    /// Leader ranking for one agreement period.
    Leader {
        /// The round's common reference string.
        crs: H256,
        /// Chain being agreed on.
        chain_id: u32,
        /// Height being agreed on.
        height: u64,
        /// Agreement period.
        period: u64,
    },
}

impl SubsetTarget {
    /// Computes the rank of a node under this target.
    ///
    /// `rank = Keccak256(crs ‖ tag ‖ parameters ‖ node_id)`, interpreted as a
    /// big-endian integer by comparing the hash bytes directly.
    pub fn rank(&self, id: &NodeId) -> H256 {
        match self {
            SubsetTarget::Notary { crs, chain_id } => H256::keccak256_concat(&[
                crs.as_bytes(),
                b"NOTARY",
                &chain_id.to_be_bytes(),
                id.as_bytes(),
            ]),
            SubsetTarget::Dkg { crs } => {
                H256::keccak256_concat(&[crs.as_bytes(), b"DKG", id.as_bytes()])
            }
            SubsetTarget::Leader {
                crs,
                chain_id,
                height,
                period,
            } => H256::keccak256_concat(&[
                crs.as_bytes(),
                b"LEADER",
                &chain_id.to_be_bytes(),
                &height.to_be_bytes(),
                &period.to_be_bytes(),
                id.as_bytes(),
            ]),
        }
    }
}

/// The unordered set of nodes eligible for a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    ids: BTreeSet<NodeId>,
}

impl NodeSet {
    /// Creates an empty node set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node set from an iterator of identities.
    pub fn from_ids<I: IntoIterator<Item = NodeId>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Adds a node to the set.
    pub fn add(&mut self, id: NodeId) {
        self.ids.insert(id);
    }

    /// Checks membership.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.ids.contains(id)
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates over the member identities.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.ids.iter()
    }

    /// Returns the member identities sorted by raw bytes.
    pub fn sorted_ids(&self) -> Vec<NodeId> {
        self.ids.iter().copied().collect()
    }

    /// Selects the `size` members with the smallest rank under `target`.
    ///
    /// Ties on the rank are broken by the raw node identity bytes. If `size`
    /// is at least the set size, the whole set is returned.
    pub fn subset(&self, size: usize, target: &SubsetTarget) -> BTreeSet<NodeId> {
        if size >= self.ids.len() {
            return self.ids.clone();
        }
        let mut ranked: Vec<(H256, NodeId)> = self
            .ids
            .iter()
            .map(|id| (target.rank(id), *id))
            .collect();
        ranked.sort();
        ranked.into_iter().take(size).map(|(_, id)| id).collect()
    }

    /// Returns the member with the smallest rank under `target`.
    ///
    /// Used for agreement leader election on a notary set. Returns `None`
    /// for an empty set.
    pub fn leader(&self, target: &SubsetTarget) -> Option<NodeId> {
        self.ids
            .iter()
            .map(|id| (target.rank(id), *id))
            .min()
            .map(|(_, id)| id)
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}
