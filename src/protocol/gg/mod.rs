//! GG18/GG20 threshold ECDSA on secp256k1.
//!
//! Polynomial sharing with Feldman VSS, per-participant Paillier keys for
//! the MtA phase, and a DLN-style setup proof over the (N-tilde, h1, h2)
//! auxiliary modulus. GG18 runs the four-round commit/reveal DKG; GG20
//! compresses setup into one broadcast + one unicast phase and produces
//! byte-compatible share bundles.

pub mod dkg;
pub mod sign;

use curv::arithmetic::{Converter, Modulo, One, Samplable, Zero};
use curv::BigInt;
use paillier::{
    Add, Decrypt, DecryptionKey, Encrypt, EncryptionKey, KeyGeneration, Mul, Paillier,
    RawCiphertext, RawPlaintext,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CustodyError, Result};
use crate::protocol::math::secp;
use crate::types::GgPeerAux;

/// secp256k1 group order as a big integer.
pub fn curve_order() -> BigInt {
    BigInt::from_bytes(
        &hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141")
            .expect("static hex"),
    )
}

pub fn scalar_to_bigint(s: &k256::Scalar) -> BigInt {
    BigInt::from_bytes(&secp::scalar_to_be(s))
}

pub fn bigint_to_scalar(v: &BigInt) -> Result<k256::Scalar> {
    // Values reaching here are non-negative, so plain remainder reduces.
    let reduced = v % &curve_order();
    let bytes = reduced.to_bytes();
    if bytes.len() > 32 {
        return Err(CustodyError::internal("reduced value exceeds 32 bytes"));
    }
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    secp::scalar_from_be(&padded)
        .ok_or_else(|| CustodyError::internal("reduced value is not a canonical scalar"))
}

/// MtA blinding values are sampled below 2^768 (~ q^3) against a >= 1024-bit
/// Paillier modulus so the homomorphic sum k*gamma + beta' never wraps and
/// the additive relation holds exactly modulo the curve order.
const MTA_BLINDING_BITS: usize = 768;

pub fn sample_blinding() -> BigInt {
    BigInt::sample(MTA_BLINDING_BITS)
}

/// Local Paillier/zk auxiliary material, generated ahead of DKG (the
/// expensive part: two fresh moduli) and fed to the state machine.
#[derive(Clone, Serialize, Deserialize)]
pub struct PreParams {
    pub paillier_dk: DecryptionKey,
    pub public: GgPeerAux,
}

impl std::fmt::Debug for PreParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The decryption key never appears in debug output.
        f.debug_struct("PreParams").field("public", &self.public).finish_non_exhaustive()
    }
}

/// Generate fresh pre-parameters: a Paillier keypair plus the (N-tilde,
/// h1, h2) modulus with its discrete-log proof.
pub fn generate_pre_params(bits: usize) -> Result<PreParams> {
    let (ek, dk) = Paillier::keypair_with_modulus_size(bits).keys();

    // Auxiliary modulus for the range-proof setup. The factorisation is
    // discarded; only knowledge of dlog(h2, h1) is proven.
    let (aux_ek, _aux_dk) = Paillier::keypair_with_modulus_size(bits).keys();
    let n_tilde = aux_ek.n.clone();
    let r = BigInt::sample_below(&n_tilde);
    let h1 = BigInt::mod_mul(&r, &r, &n_tilde);
    let alpha = BigInt::sample(256);
    let h2 = BigInt::mod_pow(&h1, &alpha, &n_tilde);
    let proof = DlnProof::prove(&h1, &h2, &n_tilde, &alpha);

    let public = GgPeerAux {
        paillier_ek: ek,
        n_tilde,
        h1,
        h2,
        dln_proof: bincode::serialize(&proof)
            .map_err(|e| CustodyError::internal(format!("DLN proof serialisation: {e}")))?,
    };
    Ok(PreParams { paillier_dk: dk, public })
}

/// Verify a peer's auxiliary bundle: modulus sanity plus the DLN proof.
pub fn verify_peer_aux(aux: &GgPeerAux) -> bool {
    if aux.n_tilde.is_zero() || aux.h1.is_zero() || aux.h2.is_zero() {
        return false;
    }
    if aux.h1 >= aux.n_tilde || aux.h2 >= aux.n_tilde || aux.h1 == aux.h2 {
        return false;
    }
    let proof: DlnProof = match bincode::deserialize(&aux.dln_proof) {
        Ok(p) => p,
        Err(_) => return false,
    };
    proof.verify(&aux.h1, &aux.h2, &aux.n_tilde)
}

/// Fiat-Shamir Schnorr proof of knowledge of `alpha` with
/// `h2 = h1^alpha mod N-tilde`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlnProof {
    commitment: BigInt,
    response: BigInt,
}

impl DlnProof {
    pub fn prove(h1: &BigInt, h2: &BigInt, n_tilde: &BigInt, alpha: &BigInt) -> Self {
        // The masking exponent dominates e * alpha by ~256 bits.
        let r = BigInt::sample(768);
        let a = BigInt::mod_pow(h1, &r, n_tilde);
        let e = Self::challenge(h1, h2, n_tilde, &a);
        let response = &r + &e * alpha;
        DlnProof { commitment: a, response }
    }

    pub fn verify(&self, h1: &BigInt, h2: &BigInt, n_tilde: &BigInt) -> bool {
        if self.commitment.is_zero() || self.commitment >= *n_tilde {
            return false;
        }
        let e = Self::challenge(h1, h2, n_tilde, &self.commitment);
        let lhs = BigInt::mod_pow(h1, &self.response, n_tilde);
        let rhs = BigInt::mod_mul(
            &self.commitment,
            &BigInt::mod_pow(h2, &e, n_tilde),
            n_tilde,
        );
        lhs == rhs
    }

    fn challenge(h1: &BigInt, h2: &BigInt, n_tilde: &BigInt, a: &BigInt) -> BigInt {
        let mut hasher = Sha256::new();
        hasher.update(b"custody-mpc dln v1");
        for v in [n_tilde, h1, h2, a] {
            let bytes = v.to_bytes();
            hasher.update((bytes.len() as u32).to_be_bytes());
            hasher.update(&bytes);
        }
        BigInt::from_bytes(&hasher.finalize())
    }
}

/// Multiplicative-to-additive conversion.
///
/// The initiator holds `a` and publishes `Enc_A(a)`; the responder holds `b`
/// and returns `Enc_A(a*b + blind)` together with its own additive share
/// `-blind mod q`. The initiator decrypts to obtain `a*b + blind`, so the
/// two shares sum to `a*b` modulo the curve order.
pub fn mta_initiate(ek: &EncryptionKey, a: &k256::Scalar) -> BigInt {
    let c = Paillier::encrypt(ek, RawPlaintext::from(scalar_to_bigint(a)));
    c.0.into_owned()
}

pub fn mta_respond(ek: &EncryptionKey, c_a: &BigInt, b: &k256::Scalar) -> (BigInt, k256::Scalar) {
    let blind = sample_blinding();
    let scaled = Paillier::mul(
        ek,
        RawCiphertext::from(c_a.clone()),
        RawPlaintext::from(scalar_to_bigint(b)),
    );
    let masked = Paillier::add(ek, scaled, Paillier::encrypt(ek, RawPlaintext::from(blind.clone())));
    let beta = BigInt::mod_sub(&BigInt::zero(), &blind, &curve_order());
    let beta_scalar = bigint_to_scalar(&beta).expect("mod_sub output below order");
    (masked.0.into_owned(), beta_scalar)
}

pub fn mta_finalize(dk: &DecryptionKey, response: &BigInt) -> Result<k256::Scalar> {
    let plain: RawPlaintext = Paillier::decrypt(dk, &RawCiphertext::from(response.clone()));
    bigint_to_scalar(&plain.0.into_owned())
}

/// Sanity bound shared by ciphertext fields on the wire: a Paillier value
/// must be positive and below N^2.
pub fn ciphertext_in_range(ek: &EncryptionKey, c: &BigInt) -> bool {
    !c.is_zero() && *c < ek.nn && *c > BigInt::one()
}
