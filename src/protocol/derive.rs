//! Non-hardened child-key derivation.
//!
//! Given parent public key `P`, parent chain code `c` and index `i < 2^31`:
//!
//! ```text
//! I      = HMAC-SHA512(key = c, data = encode(P) || be32(i))
//! il, c' = I[0..32] as scalar, I[32..64]
//! P'     = P + il*G
//! ```
//!
//! The share update applies to every participant, not just the local one:
//! `x_j' = x_j + il` and `X_j' = X_j + il*G`. This preserves the invariant
//! `x_j' * G == X_j'` and keeps `sum(lambda_j * x_j') = x + il` for any
//! qualified set, because the Lagrange weights sum to one.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{AbortKind, CustodyError, Result};
use crate::protocol::math::{ed, secp};
use crate::types::{Curve, LocalShareBundle, Scheme, SecretScalar};

type HmacSha512 = Hmac<Sha512>;

/// Chain code of a freshly generated key, derived deterministically from the
/// DKG transcript so all participants agree without extra interaction.
pub fn chain_code_for(group_public_key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"chaincode");
    hasher.update(group_public_key);
    hasher.finalize().into()
}

/// Parse a BIP-32 style derivation path ("m/0/5" or "0/5") into indices.
/// A `'`/`h`/`H` suffix marks a hardened index, which is rejected before any
/// protocol round begins.
pub fn parse_path(path: &str) -> Result<Vec<u32>> {
    let mut parts: Vec<&str> = path.split('/').collect();
    if parts.first() == Some(&"m") {
        parts.remove(0);
    }

    let mut indices = Vec::with_capacity(parts.len());
    for part in parts {
        if part.is_empty() {
            continue;
        }
        let (digits, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
            Some(rest) => (rest, true),
            None => (part, false),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| CustodyError::invalid(format!("invalid path component: {part}")))?;
        if hardened || index >= 0x8000_0000 {
            return Err(CustodyError::HardenedNotSupported);
        }
        indices.push(index);
    }
    Ok(indices)
}

fn compute_il(encoded_parent: &[u8], chain_code: &[u8; 32], index: u32) -> ([u8; 32], [u8; 32]) {
    let mut mac = HmacSha512::new_from_slice(chain_code).expect("HMAC accepts any key length");
    mac.update(encoded_parent);
    mac.update(&index.to_be_bytes());
    let i = mac.finalize().into_bytes();

    let mut il = [0u8; 32];
    let mut ir = [0u8; 32];
    il.copy_from_slice(&i[..32]);
    ir.copy_from_slice(&i[32..]);
    (il, ir)
}

/// Derive a child share bundle along `path`, returning the child bundle and
/// child chain code. Pure and local; hardened indices fail before any work.
pub fn derive_bundle(
    bundle: &LocalShareBundle,
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<(LocalShareBundle, [u8; 32])> {
    for &index in path {
        if index >= 0x8000_0000 {
            return Err(CustodyError::HardenedNotSupported);
        }
    }

    match bundle.curve {
        Curve::Secp256k1 => derive_secp(bundle, chain_code, path),
        Curve::Ed25519 => derive_ed(bundle, chain_code, path),
    }
}

/// Derive only the public side (public key + chain code) along `path`.
/// Usable by any holder of the public material.
pub fn derive_public(
    curve: Curve,
    public_key: &[u8],
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<(Vec<u8>, [u8; 32])> {
    match curve {
        Curve::Secp256k1 => {
            let mut point = secp::point_from_bytes(public_key)?;
            let mut code = *chain_code;
            for &index in path {
                if index >= 0x8000_0000 {
                    return Err(CustodyError::HardenedNotSupported);
                }
                let encoded = secp::point_to_bytes(&point);
                let (il_bytes, ir) = compute_il(&encoded, &code, index);
                let il = decode_il_secp(&il_bytes)?;
                point += secp::mul_base(&il);
                code = ir;
            }
            Ok((secp::point_to_bytes(&point), code))
        }
        Curve::Ed25519 => {
            let mut point = ed::point_from_bytes(public_key)?;
            let mut code = *chain_code;
            for &index in path {
                if index >= 0x8000_0000 {
                    return Err(CustodyError::HardenedNotSupported);
                }
                let encoded = ed::point_to_bytes(&point);
                let (il_bytes, ir) = compute_il(&encoded, &code, index);
                let il = decode_il_ed(&il_bytes)?;
                point += ed::mul_base(&il);
                code = ir;
            }
            Ok((ed::point_to_bytes(&point), code))
        }
    }
}

fn decode_il_secp(il: &[u8; 32]) -> Result<k256::Scalar> {
    match secp::scalar_from_be(il) {
        Some(s) if s != k256::Scalar::ZERO => Ok(s),
        // il == 0 or il >= n: the derived key would be invalid.
        _ => Err(CustodyError::invalid("invalid derived key (IL >= n or IL = 0)")),
    }
}

fn decode_il_ed(il: &[u8; 32]) -> Result<curve25519_dalek::Scalar> {
    // IL is a big-endian integer; dalek scalars are little-endian.
    let mut le = *il;
    le.reverse();
    match ed::scalar_from_le(&le) {
        Some(s) if s != curve25519_dalek::Scalar::ZERO => Ok(s),
        _ => Err(CustodyError::invalid("invalid derived key (IL >= n or IL = 0)")),
    }
}

fn derive_secp(
    bundle: &LocalShareBundle,
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<(LocalShareBundle, [u8; 32])> {
    let mut x_i = secp::scalar_from_be(&bundle.x_i.0)
        .ok_or_else(|| CustodyError::internal("stored share is not a canonical scalar"))?;
    let mut group = secp::point_from_bytes(&bundle.group_public_key)?;
    let mut shares = Vec::with_capacity(bundle.public_shares.len());
    for (&j, encoded) in &bundle.public_shares {
        shares.push((j, secp::point_from_bytes(encoded)?));
    }
    let mut code = *chain_code;

    for &index in path {
        let encoded = secp::point_to_bytes(&group);
        let (il_bytes, ir) = compute_il(&encoded, &code, index);
        let il = decode_il_secp(&il_bytes)?;
        let delta = secp::mul_base(&il);

        x_i += il;
        group += delta;
        for (_, share) in shares.iter_mut() {
            *share += delta;
        }
        code = ir;

        // BIP340 keys are x-only: renormalise FROST bundles to an even-Y
        // group key. Negating every share together preserves the relation.
        if bundle.scheme == Scheme::Frost && secp::y_is_odd(&group) {
            x_i = -x_i;
            group = -group;
            for (_, share) in shares.iter_mut() {
                *share = -*share;
            }
        }
    }

    // Local post-derivation check: x_i' * G must equal X_i'.
    let my_share = shares
        .iter()
        .find(|(j, _)| *j == bundle.index.0)
        .map(|(_, p)| *p)
        .ok_or_else(|| CustodyError::internal("own index missing from public shares"))?;
    if secp::mul_base(&x_i) != my_share {
        return Err(CustodyError::abort(AbortKind::DerivationInvariantBroken));
    }

    let child = LocalShareBundle {
        curve: bundle.curve,
        scheme: bundle.scheme,
        index: bundle.index,
        threshold: bundle.threshold,
        x_i: SecretScalar(secp::scalar_to_be(&x_i)),
        indices: bundle.indices.clone(),
        public_shares: shares
            .into_iter()
            .map(|(j, p)| (j, secp::point_to_bytes(&p)))
            .collect(),
        group_public_key: secp::point_to_bytes(&group),
        auxiliary: bundle.auxiliary.clone(),
    };
    Ok((child, code))
}

fn derive_ed(
    bundle: &LocalShareBundle,
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<(LocalShareBundle, [u8; 32])> {
    let mut x_i = ed::scalar_from_le(&bundle.x_i.0)
        .ok_or_else(|| CustodyError::internal("stored share is not a canonical scalar"))?;
    let mut group = ed::point_from_bytes(&bundle.group_public_key)?;
    let mut shares = Vec::with_capacity(bundle.public_shares.len());
    for (&j, encoded) in &bundle.public_shares {
        shares.push((j, ed::point_from_bytes(encoded)?));
    }
    let mut code = *chain_code;

    for &index in path {
        let encoded = ed::point_to_bytes(&group);
        let (il_bytes, ir) = compute_il(&encoded, &code, index);
        let il = decode_il_ed(&il_bytes)?;
        let delta = ed::mul_base(&il);

        x_i += il;
        group += delta;
        for (_, share) in shares.iter_mut() {
            *share += delta;
        }
        code = ir;
    }

    let my_share = shares
        .iter()
        .find(|(j, _)| *j == bundle.index.0)
        .map(|(_, p)| *p)
        .ok_or_else(|| CustodyError::internal("own index missing from public shares"))?;
    if ed::mul_base(&x_i) != my_share {
        return Err(CustodyError::abort(AbortKind::DerivationInvariantBroken));
    }

    let child = LocalShareBundle {
        curve: bundle.curve,
        scheme: bundle.scheme,
        index: bundle.index,
        threshold: bundle.threshold,
        x_i: SecretScalar(ed::scalar_to_le(&x_i)),
        indices: bundle.indices.clone(),
        public_shares: shares
            .into_iter()
            .map(|(j, p)| (j, ed::point_to_bytes(&p)))
            .collect(),
        group_public_key: ed::point_to_bytes(&group),
        auxiliary: bundle.auxiliary.clone(),
    };
    Ok((child, code))
}
