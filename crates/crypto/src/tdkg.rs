//! Threshold DKG/TSIG primitives over BLS12-381.
//!
//! Pedersen-style secret sharing in the BLS12-381 scalar field: a dealer
//! samples a polynomial of degree `t - 1`, publishes commitments
//! `[g^a_0, …, g^a_{t-1}]` in G1, and sends each participant the evaluation
//! at that participant's [`DkgId`]. Receivers verify shares against the
//! commitments, sum the shares of all qualified dealers into their secret
//! share, and produce partial signatures that any `t` holders can combine
//! into a group signature by Lagrange interpolation in G2.
//!
//! Keys follow the `min_pk` convention: 48-byte G1 public keys, 96-byte G2
//! signatures. Signing and verification go through the audited `blst`
//! `min_pk` API; only the polynomial and interpolation arithmetic use the
//! low-level field/point operations, since `min_pk` does not expose them.

use crate::{CryptoError, Result};
use blst::min_pk::{PublicKey as BlsPublicKey, SecretKey as BlsSecretKey, Signature as BlsSignature};
use blst::{
    blst_bendian_from_scalar, blst_fr, blst_fr_add, blst_fr_eucl_inverse, blst_fr_from_scalar,
    blst_fr_mul, blst_fr_sub, blst_p1, blst_p1_add_or_double, blst_p1_affine, blst_p1_compress,
    blst_p1_from_affine, blst_p1_generator, blst_p1_mult, blst_p1_uncompress, blst_p2,
    blst_p2_add_or_double, blst_p2_affine, blst_p2_compress, blst_p2_from_affine, blst_p2_mult,
    blst_p2_uncompress, blst_scalar, blst_scalar_from_be_bytes, blst_scalar_from_fr, BLST_ERROR,
};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Domain separation tag for all threshold signatures of this engine.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_LATTICE_TSIG_";

/// Compressed G1 point size (public keys, commitments).
pub const PUBLIC_KEY_SIZE: usize = 48;
/// Compressed G2 point size (signatures).
pub const SIGNATURE_SIZE: usize = 96;

// ---------------------------------------------------------------------------
// Scalar-field and curve-point helpers
// ---------------------------------------------------------------------------

/// Element of the BLS12-381 scalar field.
#[derive(Clone, Copy)]
struct Fr(blst_fr);

impl Fr {
    fn zero() -> Self {
        Fr(blst_fr::default())
    }

    fn one() -> Self {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        Self::from_be_reduced(&bytes)
    }

    /// Interprets big-endian bytes as an integer and reduces it mod r.
    fn from_be_reduced(bytes: &[u8]) -> Self {
        let mut scalar = blst_scalar::default();
        let mut fr = blst_fr::default();
        unsafe {
            blst_scalar_from_be_bytes(&mut scalar, bytes.as_ptr(), bytes.len());
            blst_fr_from_scalar(&mut fr, &scalar);
        }
        Fr(fr)
    }

    /// Samples a uniform nonzero field element from the OS RNG.
    fn random() -> Self {
        let mut rng = rand::rngs::OsRng;
        loop {
            let mut seed = [0u8; 64];
            rng.fill_bytes(&mut seed);
            let fr = Self::from_be_reduced(&seed);
            if !fr.is_zero() {
                return fr;
            }
        }
    }

    fn to_scalar(self) -> blst_scalar {
        let mut scalar = blst_scalar::default();
        unsafe {
            blst_scalar_from_fr(&mut scalar, &self.0);
        }
        scalar
    }

    fn to_be_bytes(self) -> [u8; 32] {
        let scalar = self.to_scalar();
        let mut out = [0u8; 32];
        unsafe {
            blst_bendian_from_scalar(out.as_mut_ptr(), &scalar);
        }
        out
    }

    fn is_zero(self) -> bool {
        self.to_be_bytes() == [0u8; 32]
    }

    fn add(self, other: Fr) -> Fr {
        let mut out = blst_fr::default();
        unsafe {
            blst_fr_add(&mut out, &self.0, &other.0);
        }
        Fr(out)
    }

    fn sub(self, other: Fr) -> Fr {
        let mut out = blst_fr::default();
        unsafe {
            blst_fr_sub(&mut out, &self.0, &other.0);
        }
        Fr(out)
    }

    fn mul(self, other: Fr) -> Fr {
        let mut out = blst_fr::default();
        unsafe {
            blst_fr_mul(&mut out, &self.0, &other.0);
        }
        Fr(out)
    }

    fn inverse(self) -> Fr {
        let mut out = blst_fr::default();
        unsafe {
            blst_fr_eucl_inverse(&mut out, &self.0);
        }
        Fr(out)
    }
}

/// Projective G1 point.
#[derive(Clone, Copy)]
struct G1(blst_p1);

impl G1 {
    fn infinity() -> Self {
        G1(blst_p1::default())
    }

    fn generator() -> Self {
        unsafe { G1(*blst_p1_generator()) }
    }

    fn add(self, other: G1) -> G1 {
        let mut out = blst_p1::default();
        unsafe {
            blst_p1_add_or_double(&mut out, &self.0, &other.0);
        }
        G1(out)
    }

    fn mul(self, k: Fr) -> G1 {
        let scalar = k.to_scalar();
        let mut out = blst_p1::default();
        unsafe {
            blst_p1_mult(&mut out, &self.0, scalar.b.as_ptr(), 255);
        }
        G1(out)
    }

    fn compress(self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        unsafe {
            blst_p1_compress(out.as_mut_ptr(), &self.0);
        }
        out
    }

    fn uncompress(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<G1> {
        let mut affine = blst_p1_affine::default();
        let mut out = blst_p1::default();
        unsafe {
            if blst_p1_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return Err(CryptoError::InvalidPoint("bad G1 encoding".to_string()));
            }
            blst_p1_from_affine(&mut out, &affine);
        }
        Ok(G1(out))
    }
}

/// Projective G2 point.
#[derive(Clone, Copy)]
struct G2(blst_p2);

impl G2 {
    fn infinity() -> Self {
        G2(blst_p2::default())
    }

    fn add(self, other: G2) -> G2 {
        let mut out = blst_p2::default();
        unsafe {
            blst_p2_add_or_double(&mut out, &self.0, &other.0);
        }
        G2(out)
    }

    fn mul(self, k: Fr) -> G2 {
        let scalar = k.to_scalar();
        let mut out = blst_p2::default();
        unsafe {
            blst_p2_mult(&mut out, &self.0, scalar.b.as_ptr(), 255);
        }
        G2(out)
    }

    fn compress(self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        unsafe {
            blst_p2_compress(out.as_mut_ptr(), &self.0);
        }
        out
    }

    fn uncompress(bytes: &[u8; SIGNATURE_SIZE]) -> Result<G2> {
        let mut affine = blst_p2_affine::default();
        let mut out = blst_p2::default();
        unsafe {
            if blst_p2_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return Err(CryptoError::InvalidPoint("bad G2 encoding".to_string()));
            }
            blst_p2_from_affine(&mut out, &affine);
        }
        Ok(G2(out))
    }
}

// ---------------------------------------------------------------------------
// Participant identity
// ---------------------------------------------------------------------------

/// Scalar identity of a DKG participant.
///
/// Derived from the node identity bytes, reduced into the scalar field and
/// guaranteed nonzero. Stored big-endian.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DkgId([u8; 32]);

impl DkgId {
    /// Derives a participant identity from 32 seed bytes (the node id).
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        let mut input = *seed;
        loop {
            let fr = Fr::from_be_reduced(&input);
            if !fr.is_zero() {
                return DkgId(fr.to_be_bytes());
            }
            // Astronomically unlikely; re-derive deterministically.
            input = crate::keccak256(&input);
        }
    }

    /// Returns the big-endian scalar bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn fr(&self) -> Fr {
        Fr::from_be_reduced(&self.0)
    }
}

impl fmt::Debug for DkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DkgId(0x{})", &hex::encode(self.0)[..8])
    }
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

/// A share of the group secret: either a dealer's evaluation for one
/// participant or a holder's accumulated secret.
#[derive(Clone, Copy)]
pub struct DkgPrivateKey(Fr);

impl DkgPrivateKey {
    /// Creates a share from big-endian scalar bytes.
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        DkgPrivateKey(Fr::from_be_reduced(bytes))
    }

    /// Returns the big-endian scalar bytes.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    /// Whether the share is the zero scalar.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Derives the matching public key `g^share`.
    pub fn public_key(&self) -> DkgPublicKey {
        DkgPublicKey(G1::generator().mul(self.0).compress())
    }

    /// Signs a 32-byte digest, producing a partial signature.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<PartialSignature> {
        let sk = BlsSecretKey::from_bytes(&self.to_be_bytes())
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("{e:?}")))?;
        let sig = sk.sign(digest, DST, &[]);
        Ok(PartialSignature(sig.to_bytes()))
    }
}

impl fmt::Debug for DkgPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkgPrivateKey").finish_non_exhaustive()
    }
}

/// A public key (or public key share) in G1.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DkgPublicKey([u8; PUBLIC_KEY_SIZE]);

impl DkgPublicKey {
    /// Creates a public key from its 48-byte compressed form, validating the
    /// point.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self> {
        BlsPublicKey::key_validate(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{e:?}")))?;
        Ok(DkgPublicKey(*bytes))
    }

    /// Returns the 48-byte compressed form.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    fn verify_bytes(&self, digest: &[u8; 32], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        let pk = match BlsPublicKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match BlsSignature::from_bytes(signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        sig.verify(true, digest, DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
    }

    /// Verifies a partial signature produced by the matching private share.
    pub fn verify_partial(&self, digest: &[u8; 32], signature: &PartialSignature) -> bool {
        self.verify_bytes(digest, &signature.0)
    }

    /// Verifies a recovered group signature.
    pub fn verify(&self, digest: &[u8; 32], signature: &GroupSignature) -> bool {
        self.verify_bytes(digest, &signature.0)
    }
}

impl fmt::Debug for DkgPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DkgPublicKey(0x{})", &hex::encode(self.0)[..12])
    }
}

impl Serialize for DkgPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for DkgPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = decode_fixed::<D, PUBLIC_KEY_SIZE>(deserializer)?;
        DkgPublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A participant's partial signature (96-byte compressed G2 point).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PartialSignature([u8; SIGNATURE_SIZE]);

impl PartialSignature {
    /// Creates a partial signature from its compressed form.
    pub fn from_bytes(bytes: &[u8; SIGNATURE_SIZE]) -> Self {
        PartialSignature(*bytes)
    }

    /// Returns the compressed form.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl Default for PartialSignature {
    fn default() -> Self {
        PartialSignature([0u8; SIGNATURE_SIZE])
    }
}

impl fmt::Debug for PartialSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartialSignature(0x{})", &hex::encode(self.0)[..12])
    }
}

impl Serialize for PartialSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PartialSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(PartialSignature(decode_fixed::<D, SIGNATURE_SIZE>(
            deserializer,
        )?))
    }
}

/// A recovered group signature (96-byte compressed G2 point).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupSignature([u8; SIGNATURE_SIZE]);

impl GroupSignature {
    /// Creates a group signature from its compressed form.
    pub fn from_bytes(bytes: &[u8; SIGNATURE_SIZE]) -> Self {
        GroupSignature(*bytes)
    }

    /// Creates a group signature from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(bytes);
        Ok(GroupSignature(out))
    }

    /// Returns the compressed form.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for GroupSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupSignature(0x{})", &hex::encode(self.0)[..12])
    }
}

impl Serialize for GroupSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for GroupSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(GroupSignature(decode_fixed::<D, SIGNATURE_SIZE>(
            deserializer,
        )?))
    }
}

fn decode_fixed<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> std::result::Result<[u8; N], D::Error> {
    let s = String::deserialize(deserializer)?;
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != N {
        return Err(serde::de::Error::custom(format!(
            "expected {} bytes, got {}",
            N,
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Secret sharing
// ---------------------------------------------------------------------------

/// Private side of the sharing scheme.
///
/// A dealer instance (created by [`new_private_key_shares`]) evaluates its
/// secret polynomial for each participant. A holder instance (created by
/// [`PrivateKeyShares::empty`]) accumulates the shares received from
/// qualified dealers and recovers the node's secret share of the group key.
#[derive(Clone)]
pub struct PrivateKeyShares {
    poly: Vec<Fr>,
    ids: Vec<DkgId>,
    shares: BTreeMap<DkgId, Fr>,
}

impl PrivateKeyShares {
    /// Creates an empty holder instance.
    pub fn empty() -> Self {
        Self {
            poly: Vec::new(),
            ids: Vec::new(),
            shares: BTreeMap::new(),
        }
    }

    /// Registers the participant set and precomputes their evaluations
    /// (dealer role).
    pub fn set_participants(&mut self, ids: Vec<DkgId>) {
        if !self.poly.is_empty() {
            self.shares = ids
                .iter()
                .map(|id| (*id, eval_poly(&self.poly, id.fr())))
                .collect();
        }
        self.ids = ids;
    }

    /// Returns the share held for `id`: the dealer's evaluation, or for a
    /// holder the share received from dealer `id`.
    pub fn share(&self, id: &DkgId) -> Option<DkgPrivateKey> {
        if let Some(fr) = self.shares.get(id) {
            return Some(DkgPrivateKey(*fr));
        }
        if !self.poly.is_empty() {
            return Some(DkgPrivateKey(eval_poly(&self.poly, id.fr())));
        }
        None
    }

    /// Records the share received from dealer `id` (holder role).
    pub fn add_share(&mut self, id: DkgId, share: &DkgPrivateKey) {
        self.shares.insert(id, share.0);
    }

    /// Sums the shares received from the qualified dealers into this node's
    /// secret share of the group key.
    pub fn recover_private_key(&self, qualified: &[DkgId]) -> Result<DkgPrivateKey> {
        let mut sum = Fr::zero();
        for id in qualified {
            let share = self.shares.get(id).ok_or(CryptoError::ShareNotFound)?;
            sum = sum.add(*share);
        }
        Ok(DkgPrivateKey(sum))
    }

    /// Number of shares currently held.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether no share is held.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

impl fmt::Debug for PrivateKeyShares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyShares")
            .field("participants", &self.ids.len())
            .field("shares", &self.shares.len())
            .finish_non_exhaustive()
    }
}

/// Public commitments `[g^a_0, …, g^a_{t-1}]` of a dealer's polynomial.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyShares {
    commitments: Vec<[u8; PUBLIC_KEY_SIZE]>,
}

impl PublicKeyShares {
    /// Reconstructs commitments received over the wire.
    pub fn from_commitments(commitments: Vec<[u8; PUBLIC_KEY_SIZE]>) -> Self {
        Self { commitments }
    }

    /// The commitment points in coefficient order.
    pub fn commitments(&self) -> &[[u8; PUBLIC_KEY_SIZE]] {
        &self.commitments
    }

    /// The committed threshold (number of coefficients).
    pub fn threshold(&self) -> usize {
        self.commitments.len()
    }

    /// Evaluates the committed polynomial at `id`, yielding the public key
    /// share `g^{s(id)}`.
    pub fn share(&self, id: &DkgId) -> Result<DkgPublicKey> {
        if self.commitments.is_empty() {
            return Err(CryptoError::InvalidPoint("no commitments".to_string()));
        }
        let x = id.fr();
        // Horner's rule over G1.
        let mut acc = G1::uncompress(self.commitments.last().expect("nonempty"))?;
        for commitment in self.commitments.iter().rev().skip(1) {
            acc = acc.mul(x).add(G1::uncompress(commitment)?);
        }
        Ok(DkgPublicKey(acc.compress()))
    }

    /// Verifies a private share against the commitments: `g^share` must equal
    /// the polynomial evaluation at `id`.
    pub fn verify_private_share(&self, id: &DkgId, share: &DkgPrivateKey) -> Result<bool> {
        let expected = self.share(id)?;
        Ok(expected == share.public_key())
    }
}

impl fmt::Debug for PublicKeyShares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyShares")
            .field("threshold", &self.commitments.len())
            .finish_non_exhaustive()
    }
}

impl Serialize for PublicKeyShares {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let hexes: Vec<String> = self.commitments.iter().map(hex::encode).collect();
        hexes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKeyShares {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hexes: Vec<String> = Vec::deserialize(deserializer)?;
        let mut commitments = Vec::with_capacity(hexes.len());
        for h in hexes {
            let bytes = hex::decode(&h).map_err(serde::de::Error::custom)?;
            if bytes.len() != PUBLIC_KEY_SIZE {
                return Err(serde::de::Error::custom("bad commitment length"));
            }
            let mut out = [0u8; PUBLIC_KEY_SIZE];
            out.copy_from_slice(&bytes);
            commitments.push(out);
        }
        Ok(PublicKeyShares { commitments })
    }
}

fn eval_poly(poly: &[Fr], x: Fr) -> Fr {
    let mut acc = *poly.last().expect("nonempty polynomial");
    for coeff in poly.iter().rev().skip(1) {
        acc = acc.mul(x).add(*coeff);
    }
    acc
}

/// Samples a fresh secret polynomial of degree `threshold - 1` and returns
/// the private evaluator together with the public commitments.
pub fn new_private_key_shares(threshold: usize) -> (PrivateKeyShares, PublicKeyShares) {
    assert!(threshold >= 1, "threshold must be positive");
    let poly: Vec<Fr> = (0..threshold).map(|_| Fr::random()).collect();
    let commitments = poly
        .iter()
        .map(|coeff| G1::generator().mul(*coeff).compress())
        .collect();
    (
        PrivateKeyShares {
            poly,
            ids: Vec::new(),
            shares: BTreeMap::new(),
        },
        PublicKeyShares { commitments },
    )
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Aggregates the group public key `Σ g^{a_0}` over qualified dealers.
pub fn recover_group_public_key(shares: &[&PublicKeyShares]) -> Result<DkgPublicKey> {
    if shares.is_empty() {
        return Err(CryptoError::NotEnoughShares { got: 0, needed: 1 });
    }
    let mut acc = G1::infinity();
    for share in shares {
        let commitment = share
            .commitments
            .first()
            .ok_or_else(|| CryptoError::InvalidPoint("no commitments".to_string()))?;
        acc = acc.add(G1::uncompress(commitment)?);
    }
    Ok(DkgPublicKey(acc.compress()))
}

/// Aggregates one participant's public key share `Σ g^{s_d(id)}` over
/// qualified dealers.
pub fn recover_node_public_key(
    shares: &[&PublicKeyShares],
    id: &DkgId,
) -> Result<DkgPublicKey> {
    if shares.is_empty() {
        return Err(CryptoError::NotEnoughShares { got: 0, needed: 1 });
    }
    let mut acc = G1::infinity();
    for share in shares {
        acc = acc.add(G1::uncompress(share.share(id)?.as_bytes())?);
    }
    Ok(DkgPublicKey(acc.compress()))
}

/// Recovers the group signature from partial signatures by Lagrange
/// interpolation at zero over the signers' [`DkgId`]s.
///
/// The caller is responsible for only passing verified partials; an invalid
/// partial yields a signature that fails group verification, never a panic.
pub fn recover_signature(partials: &[(DkgId, PartialSignature)]) -> Result<GroupSignature> {
    if partials.is_empty() {
        return Err(CryptoError::NotEnoughShares { got: 0, needed: 1 });
    }
    let distinct: BTreeSet<&DkgId> = partials.iter().map(|(id, _)| id).collect();
    if distinct.len() != partials.len() {
        return Err(CryptoError::InvalidSignature(
            "duplicate signer id".to_string(),
        ));
    }

    let mut acc = G2::infinity();
    for (i, (id_i, sig_i)) in partials.iter().enumerate() {
        let xi = id_i.fr();
        let mut num = Fr::one();
        let mut den = Fr::one();
        for (j, (id_j, _)) in partials.iter().enumerate() {
            if i == j {
                continue;
            }
            let xj = id_j.fr();
            num = num.mul(xj);
            den = den.mul(xj.sub(xi));
        }
        let lambda = num.mul(den.inverse());
        acc = acc.add(G2::uncompress(sig_i.as_bytes())?.mul(lambda));
    }
    Ok(GroupSignature(acc.compress()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keccak256;

    fn ids(n: u8) -> Vec<DkgId> {
        (0..n).map(|i| DkgId::from_bytes(&keccak256(&[i]))).collect()
    }

    /// Runs a full DKG among `n` honest dealers with threshold `t` and
    /// returns each participant's secret share plus the group public key.
    fn run_dkg(n: u8, t: usize) -> (Vec<DkgId>, Vec<DkgPrivateKey>, DkgPublicKey) {
        let participant_ids = ids(n);
        let dealers: Vec<(PrivateKeyShares, PublicKeyShares)> = (0..n)
            .map(|_| {
                let (mut prv, publ) = new_private_key_shares(t);
                prv.set_participants(participant_ids.clone());
                (prv, publ)
            })
            .collect();

        let mut secrets = Vec::new();
        for id in &participant_ids {
            let mut holder = PrivateKeyShares::empty();
            for (dealer_idx, (prv, publ)) in dealers.iter().enumerate() {
                let share = prv.share(id).unwrap();
                assert!(publ.verify_private_share(id, &share).unwrap());
                holder.add_share(participant_ids[dealer_idx], &share);
            }
            secrets.push(holder.recover_private_key(&participant_ids).unwrap());
        }

        let all_public: Vec<&PublicKeyShares> = dealers.iter().map(|(_, p)| p).collect();
        let group_pk = recover_group_public_key(&all_public).unwrap();
        (participant_ids, secrets, group_pk)
    }

    #[test]
    fn test_share_matches_commitment() {
        let participant_ids = ids(5);
        let (mut prv, publ) = new_private_key_shares(3);
        prv.set_participants(participant_ids.clone());

        for id in &participant_ids {
            let share = prv.share(id).unwrap();
            assert!(publ.verify_private_share(id, &share).unwrap());
        }
    }

    #[test]
    fn test_tampered_share_rejected() {
        let participant_ids = ids(5);
        let (mut prv, publ) = new_private_key_shares(3);
        prv.set_participants(participant_ids.clone());

        let mut bytes = prv.share(&participant_ids[0]).unwrap().to_be_bytes();
        bytes[31] ^= 1;
        let forged = DkgPrivateKey::from_be_bytes(&bytes);
        assert!(!publ.verify_private_share(&participant_ids[0], &forged).unwrap());
    }

    #[test]
    fn test_threshold_signature_recovers() {
        let (participant_ids, secrets, group_pk) = run_dkg(5, 3);
        let digest = keccak256(b"round anchor");

        // Any 3 of 5 shares suffice.
        for window in [[0usize, 1, 2], [1, 3, 4], [0, 2, 4]] {
            let partials: Vec<(DkgId, PartialSignature)> = window
                .iter()
                .map(|&i| (participant_ids[i], secrets[i].sign(&digest).unwrap()))
                .collect();
            let group_sig = recover_signature(&partials).unwrap();
            assert!(group_pk.verify(&digest, &group_sig));
        }
    }

    #[test]
    fn test_below_threshold_fails_verification() {
        let (participant_ids, secrets, group_pk) = run_dkg(5, 3);
        let digest = keccak256(b"round anchor");

        let partials: Vec<(DkgId, PartialSignature)> = (0..2)
            .map(|i| (participant_ids[i], secrets[i].sign(&digest).unwrap()))
            .collect();
        let group_sig = recover_signature(&partials).unwrap();
        assert!(!group_pk.verify(&digest, &group_sig));
    }

    #[test]
    fn test_partial_verifies_under_node_public_key() {
        let participant_ids = ids(4);
        let dealers: Vec<(PrivateKeyShares, PublicKeyShares)> = (0..4)
            .map(|_| {
                let (mut prv, publ) = new_private_key_shares(2);
                prv.set_participants(participant_ids.clone());
                (prv, publ)
            })
            .collect();
        let all_public: Vec<&PublicKeyShares> = dealers.iter().map(|(_, p)| p).collect();

        let id = &participant_ids[1];
        let mut holder = PrivateKeyShares::empty();
        for (dealer_idx, (prv, _)) in dealers.iter().enumerate() {
            holder.add_share(participant_ids[dealer_idx], &prv.share(id).unwrap());
        }
        let secret = holder.recover_private_key(&participant_ids).unwrap();

        let digest = keccak256(b"hash");
        let partial = secret.sign(&digest).unwrap();
        let node_pk = recover_node_public_key(&all_public, id).unwrap();
        assert!(node_pk.verify_partial(&digest, &partial));
        assert!(!node_pk.verify_partial(&keccak256(b"other"), &partial));
    }

    #[test]
    fn test_duplicate_signer_rejected() {
        let (participant_ids, secrets, _) = run_dkg(4, 2);
        let digest = keccak256(b"hash");
        let partial = secrets[0].sign(&digest).unwrap();
        let dup = vec![
            (participant_ids[0], partial),
            (participant_ids[0], partial),
        ];
        assert!(recover_signature(&dup).is_err());
    }

    #[test]
    fn test_missing_share_on_recovery() {
        let participant_ids = ids(3);
        let holder = PrivateKeyShares::empty();
        assert!(matches!(
            holder.recover_private_key(&participant_ids),
            Err(CryptoError::ShareNotFound)
        ));
    }

    #[test]
    fn test_dkg_id_nonzero_and_stable() {
        let a = DkgId::from_bytes(&keccak256(b"node"));
        let b = DkgId::from_bytes(&keccak256(b"node"));
        assert_eq!(a, b);
        assert_ne!(a.as_bytes(), &[0u8; 32]);
    }
}
