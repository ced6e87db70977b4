//! Curve arithmetic helpers for the protocol engine.
//!
//! The curve is a tag carried on every operation; dispatch happens at the
//! entry boundary and the arithmetic below stays monomorphic. Scalars and
//! points cross module boundaries in their curve-native encodings:
//! big-endian scalars and compressed SEC1 points on secp256k1, little-endian
//! scalars and compressed Edwards points on Ed25519.

use sha2::{Digest, Sha256};

use crate::error::{CustodyError, Result};

const COMMIT_LABEL: &[u8] = b"custody-mpc commitment v1";

/// Hash commitment over a blinding value and an arbitrary payload.
pub fn commit(blind: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(COMMIT_LABEL);
    hasher.update(blind);
    hasher.update(payload);
    hasher.finalize().into()
}

/// secp256k1 arithmetic (k256).
pub mod secp {
    use k256::elliptic_curve::{
        ops::Reduce,
        point::AffineCoordinates,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Curve as _, Field, PrimeField,
    };
    use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, Secp256k1};
    use rand_core::CryptoRngCore;

    use super::*;

    /// Decode a canonical big-endian scalar; `None` when out of range.
    pub fn scalar_from_be(bytes: &[u8; 32]) -> Option<Scalar> {
        Option::from(Scalar::from_repr(*FieldBytes::from_slice(bytes)))
    }

    pub fn scalar_to_be(s: &Scalar) -> [u8; 32] {
        s.to_bytes().into()
    }

    /// Reduce arbitrary 32 bytes into the scalar field.
    pub fn scalar_reduce(bytes: &[u8; 32]) -> Scalar {
        <Scalar as Reduce<<Secp256k1 as k256::elliptic_curve::Curve>::Uint>>::reduce_bytes(
            FieldBytes::from_slice(bytes),
        )
    }

    pub fn random_scalar(rng: &mut impl CryptoRngCore) -> Scalar {
        <Scalar as Field>::random(rng)
    }

    pub fn mul_base(s: &Scalar) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * s
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn point_to_bytes(p: &ProjectivePoint) -> Vec<u8> {
        p.to_affine().to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
        let encoded = EncodedPoint::from_bytes(bytes)
            .map_err(|_| CustodyError::invalid("malformed secp256k1 point encoding"))?;
        let affine: Option<AffinePoint> = Option::from(AffinePoint::from_encoded_point(&encoded));
        affine
            .map(ProjectivePoint::from)
            .ok_or_else(|| CustodyError::invalid("secp256k1 point not on curve"))
    }

    /// x-coordinate of a point reduced into the scalar field (the ECDSA `r`).
    pub fn x_coordinate_scalar(p: &ProjectivePoint) -> Scalar {
        let affine = p.to_affine();
        <Scalar as Reduce<<Secp256k1 as k256::elliptic_curve::Curve>::Uint>>::reduce_bytes(
            &affine.x(),
        )
    }

    /// Whether the affine y-coordinate of `p` is odd.
    pub fn y_is_odd(p: &ProjectivePoint) -> bool {
        p.to_affine().y_is_odd().into()
    }

    /// A secret polynomial over the scalar field; `coefficients[0]` is the
    /// shared secret's contribution.
    #[derive(Clone, Debug)]
    pub struct Polynomial {
        coefficients: Vec<Scalar>,
    }

    impl Polynomial {
        /// Random polynomial of the given degree (degree + 1 coefficients).
        pub fn random(rng: &mut impl CryptoRngCore, degree: u16) -> Self {
            let coefficients = (0..=degree).map(|_| random_scalar(rng)).collect();
            Polynomial { coefficients }
        }

        pub fn evaluate(&self, x: &Scalar) -> Scalar {
            let mut acc = Scalar::ZERO;
            for c in self.coefficients.iter().rev() {
                acc = acc * x + c;
            }
            acc
        }

        /// Evaluate at the field element of a 1-based participant index.
        pub fn evaluate_index(&self, index: u16) -> Scalar {
            self.evaluate(&Scalar::from(index as u64))
        }

        /// Feldman commitment: one group element per coefficient.
        pub fn commitment(&self) -> Vec<ProjectivePoint> {
            self.coefficients.iter().map(mul_base).collect()
        }
    }

    /// Evaluate a Feldman commitment at a participant index:
    /// `sum_k index^k * A_k`.
    pub fn commitment_eval(commitment: &[ProjectivePoint], index: u16) -> ProjectivePoint {
        let x = Scalar::from(index as u64);
        let mut acc = ProjectivePoint::IDENTITY;
        for a in commitment.iter().rev() {
            acc = acc * x + a;
        }
        acc
    }

    /// Lagrange coefficient at zero for `me` within the signer set
    /// `indices`. `None` when `me` is absent or the set has duplicates.
    pub fn lagrange_at_zero(indices: &[u16], me: u16) -> Option<Scalar> {
        if !indices.contains(&me) {
            return None;
        }
        let x_me = Scalar::from(me as u64);
        let mut num = Scalar::ONE;
        let mut den = Scalar::ONE;
        for &j in indices {
            if j == me {
                continue;
            }
            let x_j = Scalar::from(j as u64);
            num *= x_j;
            den *= x_j - x_me;
        }
        let inv: Option<Scalar> = Option::from(den.invert());
        inv.map(|inv| num * inv)
    }
}

/// Ed25519 arithmetic (curve25519-dalek).
pub mod ed {
    use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
    use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
    use curve25519_dalek::scalar::Scalar;
    use curve25519_dalek::traits::Identity;
    use rand_core::CryptoRngCore;

    use super::*;

    /// Decode a canonical little-endian scalar; `None` when out of range.
    pub fn scalar_from_le(bytes: &[u8; 32]) -> Option<Scalar> {
        Option::from(Scalar::from_canonical_bytes(*bytes))
    }

    pub fn scalar_to_le(s: &Scalar) -> [u8; 32] {
        s.to_bytes()
    }

    pub fn random_scalar(rng: &mut impl CryptoRngCore) -> Scalar {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        Scalar::from_bytes_mod_order_wide(&wide)
    }

    pub fn mul_base(s: &Scalar) -> EdwardsPoint {
        ED25519_BASEPOINT_POINT * s
    }

    /// Compressed Edwards y encoding (32 bytes).
    pub fn point_to_bytes(p: &EdwardsPoint) -> Vec<u8> {
        p.compress().to_bytes().to_vec()
    }

    pub fn point_from_bytes(bytes: &[u8]) -> Result<EdwardsPoint> {
        let compressed = CompressedEdwardsY::from_slice(bytes)
            .map_err(|_| CustodyError::invalid("malformed ed25519 point encoding"))?;
        compressed
            .decompress()
            .ok_or_else(|| CustodyError::invalid("ed25519 point not on curve"))
    }

    #[derive(Clone)]
    pub struct Polynomial {
        coefficients: Vec<Scalar>,
    }

    impl Polynomial {
        pub fn random(rng: &mut impl CryptoRngCore, degree: u16) -> Self {
            let coefficients = (0..=degree).map(|_| random_scalar(rng)).collect();
            Polynomial { coefficients }
        }

        pub fn evaluate(&self, x: &Scalar) -> Scalar {
            let mut acc = Scalar::ZERO;
            for c in self.coefficients.iter().rev() {
                acc = acc * x + c;
            }
            acc
        }

        pub fn evaluate_index(&self, index: u16) -> Scalar {
            self.evaluate(&Scalar::from(index as u64))
        }

        pub fn commitment(&self) -> Vec<EdwardsPoint> {
            self.coefficients.iter().map(mul_base).collect()
        }
    }

    pub fn commitment_eval(commitment: &[EdwardsPoint], index: u16) -> EdwardsPoint {
        let x = Scalar::from(index as u64);
        let mut acc = EdwardsPoint::identity();
        for a in commitment.iter().rev() {
            acc = acc * x + a;
        }
        acc
    }

    pub fn lagrange_at_zero(indices: &[u16], me: u16) -> Option<Scalar> {
        if !indices.contains(&me) {
            return None;
        }
        let x_me = Scalar::from(me as u64);
        let mut num = Scalar::ONE;
        let mut den = Scalar::ONE;
        for &j in indices {
            if j == me {
                continue;
            }
            let x_j = Scalar::from(j as u64);
            num *= x_j;
            den *= x_j - x_me;
        }
        if den == Scalar::ZERO {
            return None;
        }
        Some(num * den.invert())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    /// Secret reconstruction fidelity: for any qualified set S with
    /// |S| = t + 1, `sum lambda_i * f(i) == f(0)`.
    #[test]
    fn secp_lagrange_reconstructs_secret() {
        let mut rng = OsRng;
        let poly = secp::Polynomial::random(&mut rng, 2);
        let secret = poly.evaluate(&k256::Scalar::ZERO);

        for set in [[1u16, 2, 3], [2, 4, 5], [1, 3, 5]] {
            let mut acc = k256::Scalar::ZERO;
            for &i in &set {
                let lambda = secp::lagrange_at_zero(&set, i).unwrap();
                acc += lambda * poly.evaluate_index(i);
            }
            assert_eq!(acc, secret);
        }
    }

    #[test]
    fn ed_lagrange_reconstructs_secret() {
        let mut rng = OsRng;
        let poly = ed::Polynomial::random(&mut rng, 1);
        let secret = poly.evaluate(&curve25519_dalek::scalar::Scalar::ZERO);

        let set = [2u16, 3];
        let mut acc = curve25519_dalek::scalar::Scalar::ZERO;
        for &i in &set {
            let lambda = ed::lagrange_at_zero(&set, i).unwrap();
            acc += lambda * poly.evaluate_index(i);
        }
        assert_eq!(acc, secret);
    }

    /// Lagrange weights sum to one, the property the derivation trick
    /// (`x_j' = x_j + il`) relies on.
    #[test]
    fn lagrange_weights_sum_to_one() {
        let set = [1u16, 4, 7];
        let mut acc = k256::Scalar::ZERO;
        for &i in &set {
            acc += secp::lagrange_at_zero(&set, i).unwrap();
        }
        assert_eq!(acc, k256::Scalar::ONE);
    }

    #[test]
    fn commitment_eval_matches_polynomial() {
        let mut rng = OsRng;
        let poly = secp::Polynomial::random(&mut rng, 3);
        let commitment = poly.commitment();
        for i in 1u16..=5 {
            let expected = secp::mul_base(&poly.evaluate_index(i));
            assert_eq!(secp::commitment_eval(&commitment, i), expected);
        }
    }

    #[test]
    fn point_encoding_round_trips() {
        let mut rng = OsRng;
        let s = secp::random_scalar(&mut rng);
        let p = secp::mul_base(&s);
        let bytes = secp::point_to_bytes(&p);
        assert_eq!(bytes.len(), 33);
        assert_eq!(secp::point_from_bytes(&bytes).unwrap(), p);

        let se = ed::random_scalar(&mut rng);
        let pe = ed::mul_base(&se);
        let bytes = ed::point_to_bytes(&pe);
        assert_eq!(bytes.len(), 32);
        assert_eq!(ed::point_from_bytes(&bytes).unwrap(), pe);
    }

    #[test]
    fn commitments_bind_payload() {
        let blind = [9u8; 32];
        let a = commit(&blind, b"payload-a");
        let b = commit(&blind, b"payload-b");
        assert_ne!(a, b);
        assert_eq!(a, commit(&blind, b"payload-a"));
    }
}
