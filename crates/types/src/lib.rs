//! # Lattice Types
//!
//! Core data types for the Lattice consensus engine.
//!
//! This crate provides:
//! - **[`H256`]** - 32-byte Keccak256 hash values
//! - **[`NodeId`] / [`NodeSet`]** - node identity and CRS-ranked subset selection
//! - **[`Block`] / [`Position`]** - lattice blocks and their canonical encoding
//! - **[`Vote`] / [`WitnessAck`]** - Byzantine Agreement votes and witness checkpoints
//! - **DKG messages** - the wire types exchanged by the distributed key generation
//! - **[`Config`]** - per-round consensus parameters supplied by governance
//!
//! A node's identity is the Keccak256 of its uncompressed secp256k1 public key
//! and is stable across rounds. All consensus-critical encodings are explicit
//! big-endian byte layouts; serde is provided for transport and tooling, never
//! for hashing.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block;
pub mod config;
pub mod dkg;
pub mod hash;
pub mod node;
pub mod vote;

pub use block::{Block, Position, Witness};
pub use config::Config;
pub use dkg::{
    DkgComplaint, DkgFinalize, DkgMasterPublicKey, DkgPartialSignature, DkgPrivateShare,
};
pub use hash::H256;
pub use node::{NodeId, NodeSet, SubsetTarget};
pub use vote::{AgreementResult, BlockRandomnessResult, Vote, VoteType, WitnessAck};

/// Errors for type-level validation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A byte slice had the wrong length for the target type.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        actual: usize,
    },

    /// A hash string could not be parsed.
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// Hex decoding failed.
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for type-level operations.
pub type Result<T> = std::result::Result<T, Error>;
