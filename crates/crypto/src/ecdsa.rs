//! ECDSA signatures using secp256k1.
//!
//! Recoverable signatures over 32-byte Keccak256 digests. The 65-byte wire
//! form is `r ‖ s ‖ v` where `v` is the recovery id. Node identities are
//! derived from the 64-byte uncompressed public key (without the SEC1
//! prefix), so [`PublicKey::to_uncompressed`] is the canonical identity
//! input.
//!
//! ## Example
//!
//! ```rust
//! use lattice_crypto::ecdsa::PrivateKey;
//! use lattice_crypto::keccak256;
//!
//! let key = PrivateKey::random();
//! let digest = keccak256(b"block");
//! let sig = key.sign_prehash(&digest).unwrap();
//! assert_eq!(sig.recover_prehash(&digest).unwrap(), key.public_key());
//! ```

use crate::{keccak256, CryptoError, Result};
use k256::{
    ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    SecretKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// ECDSA private key (32 bytes).
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generates a random private key using the OS RNG.
    pub fn random() -> Self {
        let secret_key = SecretKey::random(&mut OsRng);
        Self {
            inner: SigningKey::from(secret_key),
        }
    }

    /// Creates a private key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret_key = SecretKey::from_bytes(bytes.into())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            inner: SigningKey::from(secret_key),
        })
    }

    /// Returns the raw secret bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes().into()
    }

    /// Derives the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Signs a 32-byte digest, producing a recoverable signature.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<Signature> {
        let (sig, recovery_id) = self
            .inner
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        let r: [u8; 32] = sig.r().to_bytes().into();
        let s: [u8; 32] = sig.s().to_bytes().into();

        Ok(Signature {
            r,
            s,
            v: recovery_id.to_byte(),
        })
    }

    /// Hashes `data` with Keccak256 and signs the digest.
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.sign_prehash(&keccak256(data))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// ECDSA public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Creates a public key from SEC1 bytes (33-byte compressed or 65-byte
    /// uncompressed with prefix).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Returns the 64-byte uncompressed form without the SEC1 prefix.
    ///
    /// This is the canonical input for node-identity derivation.
    pub fn to_uncompressed(&self) -> [u8; 64] {
        let point = self.inner.to_encoded_point(false);
        let bytes = point.as_bytes();
        let mut out = [0u8; 64];
        out.copy_from_slice(&bytes[1..65]);
        out
    }

    /// Returns the 33-byte compressed form.
    pub fn to_compressed(&self) -> [u8; 33] {
        let point = self.inner.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Verifies a recoverable signature against a 32-byte digest.
    pub fn verify_prehash(&self, digest: &[u8; 32], signature: &Signature) -> Result<bool> {
        let sig = signature.to_k256()?;
        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        Ok(self.inner.verify_prehash(digest, &sig).is_ok())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("compressed", &hex::encode(self.to_compressed()))
            .finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.to_compressed()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        PublicKey::from_sec1_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Recoverable ECDSA signature (`r ‖ s ‖ v`, 65 bytes on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    /// The r component (32 bytes).
    pub r: [u8; 32],
    /// The s component (32 bytes).
    pub s: [u8; 32],
    /// Recovery id (0 or 1).
    pub v: u8,
}

impl Signature {
    /// Creates a signature from its 65-byte wire form.
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { r, s, v: bytes[64] }
    }

    /// Returns the 65-byte wire form.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// Whether this is the all-zero placeholder of an unsigned message.
    pub fn is_empty(&self) -> bool {
        self.r == [0u8; 32] && self.s == [0u8; 32]
    }

    fn to_k256(self) -> Result<K256Signature> {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        K256Signature::from_bytes((&bytes).into())
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    /// Recovers the signing public key from a 32-byte digest.
    pub fn recover_prehash(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        let sig = self.to_k256()?;
        let recovery_id = RecoveryId::from_byte(self.v)
            .ok_or_else(|| CryptoError::RecoveryFailed("invalid recovery id".to_string()))?;

        let inner = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;

        Ok(PublicKey { inner })
    }

    /// Verifies this signature against a 32-byte digest and public key.
    pub fn verify_prehash(&self, digest: &[u8; 32], public_key: &PublicKey) -> Result<bool> {
        public_key.verify_prehash(digest, self)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("r", &hex::encode(self.r))
            .field("s", &hex::encode(self.s))
            .field("v", &self.v)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let key = PrivateKey::random();
        let digest = keccak256(b"message");
        let sig = key.sign_prehash(&digest).unwrap();
        assert!(sig.verify_prehash(&digest, &key.public_key()).unwrap());
    }

    #[test]
    fn test_recovery() {
        let key = PrivateKey::random();
        let digest = keccak256(b"message");
        let sig = key.sign_prehash(&digest).unwrap();
        assert_eq!(sig.recover_prehash(&digest).unwrap(), key.public_key());
    }

    #[test]
    fn test_wrong_digest_fails() {
        let key = PrivateKey::random();
        let sig = key.sign_prehash(&keccak256(b"a")).unwrap();
        assert!(!sig
            .verify_prehash(&keccak256(b"b"), &key.public_key())
            .unwrap());
    }

    #[test]
    fn test_wire_round_trip() {
        let key = PrivateKey::random();
        let digest = keccak256(b"message");
        let sig = key.sign_prehash(&digest).unwrap();
        let decoded = Signature::from_bytes(&sig.to_bytes());
        assert_eq!(decoded, sig);
        assert!(decoded.verify_prehash(&digest, &key.public_key()).unwrap());
    }

    #[test]
    fn test_key_from_bytes() {
        let key = PrivateKey::random();
        let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn test_empty_signature_placeholder() {
        assert!(Signature::default().is_empty());
    }
}
