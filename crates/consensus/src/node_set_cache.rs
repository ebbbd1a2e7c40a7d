//! Per-round caching of node sets, notary sets, DKG sets and public keys.
//!
//! Every getter lazily populates its round from governance on a miss. A
//! populate purges all rounds older than the window and unreferences their
//! members from the process-wide key pool; a key is dropped when its last
//! cached round goes away.

use lattice_core::Governance;
use lattice_crypto::ecdsa::PublicKey;
use lattice_types::{NodeId, NodeSet, SubsetTarget};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Rounds older than `current - PURGE_WINDOW` are purged on populate.
const PURGE_WINDOW: u64 = 5;

/// Errors from the node-set cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Governance has no data for the round yet; retry once it advances.
    #[error("round is not ready")]
    RoundNotReady,

    /// The chain id exceeds the round's chain count.
    #[error("invalid chain id: {0}")]
    InvalidChainId(u32),
}

struct Sets {
    node_set: NodeSet,
    notary_sets: Vec<BTreeSet<NodeId>>,
    dkg_set: BTreeSet<NodeId>,
}

struct KeyEntry {
    public_key: PublicKey,
    ref_count: usize,
}

#[derive(Default)]
struct Inner {
    rounds: HashMap<u64, Arc<Sets>>,
    key_pool: HashMap<NodeId, KeyEntry>,
}

/// Caches node-set information from governance.
pub struct NodeSetCache {
    gov: Arc<dyn Governance>,
    inner: RwLock<Inner>,
}

impl NodeSetCache {
    /// Creates a cache over a governance source.
    pub fn new(gov: Arc<dyn Governance>) -> Self {
        Self {
            gov,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Whether `node_id` is in the node set of `round`.
    pub fn exists(&self, round: u64, node_id: &NodeId) -> Result<bool, CacheError> {
        let sets = self.get_or_update(round)?;
        Ok(sets.node_set.contains(node_id))
    }

    /// Public key of a node, if any cached round references it.
    pub fn public_key(&self, node_id: &NodeId) -> Option<PublicKey> {
        self.inner
            .read()
            .key_pool
            .get(node_id)
            .map(|entry| entry.public_key)
    }

    /// The node set of `round` (a defensive copy).
    pub fn node_set(&self, round: u64) -> Result<NodeSet, CacheError> {
        Ok(self.get_or_update(round)?.node_set.clone())
    }

    /// The notary set of `(round, chain_id)` (a defensive copy).
    pub fn notary_set(
        &self,
        round: u64,
        chain_id: u32,
    ) -> Result<BTreeSet<NodeId>, CacheError> {
        let sets = self.get_or_update(round)?;
        sets.notary_sets
            .get(chain_id as usize)
            .cloned()
            .ok_or(CacheError::InvalidChainId(chain_id))
    }

    /// The DKG set of `round` (a defensive copy).
    pub fn dkg_set(&self, round: u64) -> Result<BTreeSet<NodeId>, CacheError> {
        Ok(self.get_or_update(round)?.dkg_set.clone())
    }

    fn get_or_update(&self, round: u64) -> Result<Arc<Sets>, CacheError> {
        if let Some(sets) = self.inner.read().rounds.get(&round) {
            return Ok(sets.clone());
        }
        self.update(round)
    }

    /// Populates `round` from governance and purges rounds outside the
    /// retention window.
    fn update(&self, round: u64) -> Result<Arc<Sets>, CacheError> {
        let mut inner = self.inner.write();

        // Raced with another writer.
        if let Some(sets) = inner.rounds.get(&round) {
            return Ok(sets.clone());
        }

        let keys = match self.gov.node_set(round) {
            Some(keys) if !keys.is_empty() => keys,
            _ => return Err(CacheError::RoundNotReady),
        };
        let config = self.gov.configuration(round).ok_or(CacheError::RoundNotReady)?;
        let crs = self.gov.crs(round).ok_or(CacheError::RoundNotReady)?;

        let mut node_set = NodeSet::new();
        for key in keys {
            let id = NodeId::new(&key);
            node_set.add(id);
            inner
                .key_pool
                .entry(id)
                .and_modify(|entry| entry.ref_count += 1)
                .or_insert(KeyEntry {
                    public_key: key,
                    ref_count: 1,
                });
        }

        let notary_sets = (0..config.num_chains)
            .map(|chain_id| {
                node_set.subset(
                    config.notary_set_size as usize,
                    &SubsetTarget::Notary { crs, chain_id },
                )
            })
            .collect();
        let dkg_set = node_set.subset(config.dkg_set_size as usize, &SubsetTarget::Dkg { crs });

        let sets = Arc::new(Sets {
            node_set,
            notary_sets,
            dkg_set,
        });
        inner.rounds.insert(round, sets.clone());

        // Purge rounds that fell out of the window and drop unreferenced keys.
        let stale: Vec<u64> = inner
            .rounds
            .keys()
            .copied()
            .filter(|cached| round > cached + PURGE_WINDOW)
            .collect();
        for stale_round in stale {
            let Some(removed) = inner.rounds.remove(&stale_round) else {
                continue;
            };
            for id in removed.node_set.ids() {
                if let Some(entry) = inner.key_pool.get_mut(id) {
                    entry.ref_count -= 1;
                    if entry.ref_count == 0 {
                        inner.key_pool.remove(id);
                    }
                }
            }
            debug!(round = stale_round, "purged node-set cache round");
        }

        Ok(sets)
    }
}

impl std::fmt::Debug for NodeSetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("NodeSetCache")
            .field("rounds", &inner.rounds.len())
            .field("key_pool", &inner.key_pool.len())
            .finish()
    }
}
