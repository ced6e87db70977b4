//! FROST threshold Schnorr/EdDSA on Ed25519 and secp256k1.
//!
//! The ZF frost stack drives the rounds; share bundles hold raw scalars and
//! points in curve-native encodings, and the frost types are reconstructed
//! at the call boundary. On secp256k1 the taproot ciphersuite is used, so
//! signatures are 64-byte BIP340 and bundles are kept normalised to an
//! even-Y group key.

pub mod dkg;
pub mod sign;

use std::collections::BTreeMap;

use frost_core::keys::{KeyPackage, PublicKeyPackage, SigningShare, VerifyingShare};
use frost_core::{Ciphersuite, Identifier, VerifyingKey};

use crate::error::{AbortKind, CustodyError, Result};
use crate::protocol::math::{ed, secp};
use crate::types::{Curve, LocalShareBundle, PartyIndex, Scheme, SecretScalar};

/// The two ciphersuites the engine instantiates, with the curve tag and the
/// bundle-normalisation hook each needs.
pub trait Suite: Ciphersuite {
    const CURVE: Curve;

    /// Scheme-level fixup of a freshly produced or derived bundle.
    fn normalize_bundle(bundle: &mut LocalShareBundle) -> Result<()>;

    /// Check `x_i * G == X_i` on the curve-native encodings.
    fn share_consistent(x_i: &[u8; 32], public_share: &[u8]) -> bool;
}

impl Suite for frost_ed25519::Ed25519Sha512 {
    const CURVE: Curve = Curve::Ed25519;

    fn normalize_bundle(_bundle: &mut LocalShareBundle) -> Result<()> {
        Ok(())
    }

    fn share_consistent(x_i: &[u8; 32], public_share: &[u8]) -> bool {
        match (ed::scalar_from_le(x_i), ed::point_from_bytes(public_share)) {
            (Some(x), Ok(p)) => ed::mul_base(&x) == p,
            _ => false,
        }
    }
}

impl Suite for frost_secp256k1_tr::Secp256K1Sha256TR {
    const CURVE: Curve = Curve::Secp256k1;

    /// BIP340 public keys are x-only: force an even-Y group key by negating
    /// every share and public share together, which preserves the share
    /// relation and the Lagrange sum.
    fn normalize_bundle(bundle: &mut LocalShareBundle) -> Result<()> {
        let group = secp::point_from_bytes(&bundle.group_public_key)?;
        if !secp::y_is_odd(&group) {
            return Ok(());
        }
        let x = secp::scalar_from_be(&bundle.x_i.0)
            .ok_or_else(|| CustodyError::internal("share is not a canonical scalar"))?;
        bundle.x_i = SecretScalar(secp::scalar_to_be(&(-x)));
        bundle.group_public_key = secp::point_to_bytes(&(-group));
        for encoded in bundle.public_shares.values_mut() {
            let p = secp::point_from_bytes(encoded)?;
            *encoded = secp::point_to_bytes(&(-p));
        }
        Ok(())
    }

    fn share_consistent(x_i: &[u8; 32], public_share: &[u8]) -> bool {
        match (secp::scalar_from_be(x_i), secp::point_from_bytes(public_share)) {
            (Some(x), Ok(p)) => secp::mul_base(&x) == p,
            _ => false,
        }
    }
}

pub fn identifier<C: Ciphersuite>(index: u16) -> Result<Identifier<C>> {
    Identifier::<C>::try_from(index)
        .map_err(|_| CustodyError::invalid("participant indices are 1-based and non-zero"))
}

/// Rebuild this participant's frost key package from the raw bundle.
pub fn key_package_from_bundle<C: Suite>(bundle: &LocalShareBundle) -> Result<KeyPackage<C>> {
    let id = identifier::<C>(bundle.index.0)?;
    let signing_share = SigningShare::<C>::deserialize(&bundle.x_i.0)
        .map_err(|_| CustodyError::abort(AbortKind::InconsistentShare))?;
    let verifying_share = VerifyingShare::<C>::deserialize(bundle.public_share(bundle.index)?)
        .map_err(|_| CustodyError::abort(AbortKind::InconsistentShare))?;
    let verifying_key = VerifyingKey::<C>::deserialize(&bundle.group_public_key)
        .map_err(|_| CustodyError::internal("group key does not decode for this ciphersuite"))?;
    Ok(KeyPackage::new(
        id,
        signing_share,
        verifying_share,
        verifying_key,
        bundle.threshold + 1,
    ))
}

/// Rebuild the group's public key package from the raw bundle.
pub fn public_package_from_bundle<C: Suite>(
    bundle: &LocalShareBundle,
) -> Result<PublicKeyPackage<C>> {
    let mut verifying_shares = BTreeMap::new();
    for p in &bundle.indices {
        let id = identifier::<C>(p.0)?;
        let share = VerifyingShare::<C>::deserialize(bundle.public_share(*p)?)
            .map_err(|_| CustodyError::internal("public share does not decode"))?;
        verifying_shares.insert(id, share);
    }
    let verifying_key = VerifyingKey::<C>::deserialize(&bundle.group_public_key)
        .map_err(|_| CustodyError::internal("group key does not decode for this ciphersuite"))?;
    Ok(PublicKeyPackage::new(verifying_shares, verifying_key))
}

/// Entry check shared by signing machines: the local share must match its
/// public commitment, and the bundle must belong to this suite.
pub fn check_bundle<C: Suite>(bundle: &LocalShareBundle, me: PartyIndex) -> Result<()> {
    if bundle.scheme != Scheme::Frost || bundle.curve != C::CURVE {
        return Err(CustodyError::invalid("share bundle does not match the FROST ciphersuite"));
    }
    if bundle.index != me {
        return Err(CustodyError::invalid("share bundle belongs to a different participant"));
    }
    if !C::share_consistent(&bundle.x_i.0, bundle.public_share(me)?) {
        return Err(CustodyError::abort(AbortKind::InconsistentShare));
    }
    Ok(())
}
