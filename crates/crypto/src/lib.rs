//! # Lattice Crypto
//!
//! Cryptographic primitives for the Lattice consensus engine.
//!
//! This crate provides:
//! - **Keccak256 hashing** - digest helpers used for block hashes and identities
//! - **ECDSA signatures** - secp256k1 recoverable signing and verification
//! - **Threshold DKG/TSIG** - BLS12-381 polynomial secret sharing, share
//!   verification against public commitments, and Lagrange recovery of group
//!   signatures
//!
//! ## Example
//!
//! ```rust
//! use lattice_crypto::{keccak256, ecdsa};
//!
//! let private_key = ecdsa::PrivateKey::random();
//! let public_key = private_key.public_key();
//!
//! let digest = keccak256(b"message");
//! let signature = private_key.sign_prehash(&digest).unwrap();
//! assert!(signature.verify_prehash(&digest, &public_key).unwrap());
//!
//! let recovered = signature.recover_prehash(&digest).unwrap();
//! assert_eq!(recovered, public_key);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ecdsa;
pub mod hash;
pub mod tdkg;

pub use hash::{keccak256, keccak256_concat};

/// Common type alias for 32-byte digests.
pub type Hash = [u8; 32];

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A byte slice had the wrong length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        actual: usize,
    },

    /// Public-key recovery from a signature failed.
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// A compressed curve point failed to decode.
    #[error("invalid curve point: {0}")]
    InvalidPoint(String),

    /// A share was requested for an unknown participant.
    #[error("no share for participant")]
    ShareNotFound,

    /// Too few shares to interpolate.
    #[error("not enough shares: got {got}, need {needed}")]
    NotEnoughShares {
        /// Shares provided.
        got: usize,
        /// Shares required.
        needed: usize,
    },

    /// Hex decoding failed.
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
