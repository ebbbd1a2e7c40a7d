//! # Lattice Consensus
//!
//! A Byzantine fault-tolerant consensus engine that lets a set of
//! authenticated nodes agree, round after round, on a total order of blocks
//! proposed concurrently across many parallel chains, tolerating up to
//! `f < n/3` Byzantine participants.
//!
//! ## Architecture
//!
//! ```text
//!        Network ──► Consensus (dispatch by message kind)
//!                        │
//!          ┌─────────────┼────────────────────┐
//!          ▼             ▼                    ▼
//!      Agreement     ConfigurationChain   CompactionChain
//!     (per chain)     (DKG + TSIG)        (witness acks)
//!          │ confirmed
//!          ▼
//!   ReliableBroadcast ──► TotalOrdering ──► ConsensusTimestamp
//!     (strong acks)        (K, φ)            (median, monotonic)
//!                                               │
//!                                               ▼
//!                                        CompactionChain ──► Application
//! ```
//!
//! Per-chain **Byzantine Agreement** selects one block per (chain, height).
//! Confirmed blocks enter the **reliable-broadcast lattice**, which sequences
//! them into a partial order by strong acking. **Total ordering** linearizes
//! the partial order deterministically, **consensus timestamps** assign a
//! monotonic time to every delivered block, and the **compaction chain**
//! finalizes delivery with witness data and periodic signed witness acks.
//! At round boundaries the **configuration chain** runs a DKG producing a
//! per-round group key used to threshold-sign per-block randomness and the
//! round anchor.
//!
//! Governance, the network, the application and block storage are injected
//! behind the capability traits of `lattice-core`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod agreement;
pub mod authenticator;
pub mod compaction_chain;
pub mod configuration_chain;
pub mod consensus;
pub mod dkg;
pub mod node_set_cache;
pub mod reliable_broadcast;
pub mod test_utils;
mod ticker;
pub mod timestamp;
pub mod total_ordering;

pub use agreement::{Agreement, AgreementError, AgreementReceiver, BaState};
pub use authenticator::Authenticator;
pub use compaction_chain::{CompactionChain, CompactionError};
pub use configuration_chain::{
    hash_round_anchor, ConfigurationChain, ConfigurationChainError,
};
pub use consensus::{Consensus, ConsensusError};
pub use dkg::{
    DkgError, DkgGroupPublicKey, DkgProtocol, DkgReceiver, DkgShareSecret, TsigProtocol,
    TsigVerifier, TsigVerifierCache,
};
pub use node_set_cache::{CacheError, NodeSetCache};
pub use reliable_broadcast::{BroadcastError, ReliableBroadcast};
pub use timestamp::ConsensusTimestamp;
pub use total_ordering::TotalOrdering;
