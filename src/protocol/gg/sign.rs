//! GG20 MtA-based threshold signing.
//!
//! Signing parties derive Lagrange coefficients for the signer subset S and
//! work with `w_i = lambda_i * x_i` so the weighted shares sum to the
//! secret. Phases: nonce commitment + Enc(k_i), pairwise MtA/MtAwc
//! responses, delta reveal + Gamma decommit, and s-share aggregation with
//! low-s canonicalisation. The same machine serves the gg18 and gg20 scheme
//! ids; the share bundles are byte-compatible.

use std::collections::{BTreeMap, VecDeque};

use curv::BigInt;
use ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use k256::ProjectivePoint;
use rand::rngs::StdRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AbortKind, CustodyError, ProtocolAbort, Result};
use crate::protocol::gg::{
    ciphertext_in_range, mta_finalize, mta_initiate, mta_respond,
};
use crate::protocol::math::{commit, secp};
use crate::protocol::tracker::{Disposition, Inbound, RoundTracker};
use crate::protocol::{EngineOutput, Outbound, ProtocolResult, SignResult};
use crate::types::{GgAuxiliary, LocalShareBundle, PartyIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum GgSignMessage {
    /// Broadcast: commitment to Gamma_i and the Paillier encryption of k_i.
    Round1 { gamma_commitment: [u8; 32], enc_k: BigInt },
    /// Unicast response of the two MtA legs against the sender's Enc(k).
    MtaResponse { c_gamma: BigInt, c_w: BigInt },
    /// Broadcast: delta share and the Gamma decommitment.
    Reveal { delta: [u8; 32], blind: [u8; 32], big_gamma: Vec<u8> },
    /// Broadcast: additive share of s.
    SigShare { s: [u8; 32] },
}

#[derive(Debug)]
pub struct GgSign {
    me: PartyIndex,
    signers: Vec<u16>,
    tracker: RoundTracker,
    auxiliary: GgAuxiliary,
    group: ProjectivePoint,
    digest: [u8; 32],
    m: k256::Scalar,
    k_i: k256::Scalar,
    gamma_i: k256::Scalar,
    w_i: k256::Scalar,
    my_blind: [u8; 32],
    round1: BTreeMap<u16, ([u8; 32], BigInt)>,
    beta_gamma: BTreeMap<u16, k256::Scalar>,
    beta_w: BTreeMap<u16, k256::Scalar>,
    alpha_gamma: BTreeMap<u16, k256::Scalar>,
    alpha_w: BTreeMap<u16, k256::Scalar>,
    reveals: BTreeMap<u16, (k256::Scalar, ProjectivePoint)>,
    sig_shares: BTreeMap<u16, k256::Scalar>,
    delta_i: Option<k256::Scalar>,
    sigma_i: Option<k256::Scalar>,
    r: Option<k256::Scalar>,
    done: bool,
}

impl GgSign {
    pub fn new(
        bundle: LocalShareBundle,
        message_digest: [u8; 32],
        signer_set: &[PartyIndex],
        me: PartyIndex,
        max_pending: usize,
        mut rng: StdRng,
    ) -> Result<(Self, Vec<Outbound>)> {
        let auxiliary = bundle
            .auxiliary
            .clone()
            .ok_or_else(|| CustodyError::invalid("GG share bundle lacks Paillier material"))?;

        let x_i = secp::scalar_from_be(&bundle.x_i.0)
            .ok_or_else(|| CustodyError::abort(AbortKind::InconsistentShare))?;

        // Entry invariant: x_i * G must equal the recorded X_i.
        let my_public = secp::point_from_bytes(bundle.public_share(me)?)?;
        if secp::mul_base(&x_i) != my_public {
            return Err(CustodyError::abort(AbortKind::InconsistentShare));
        }

        let mut signers: Vec<u16> = signer_set.iter().map(|p| p.0).collect();
        signers.sort_unstable();

        let lambda = secp::lagrange_at_zero(&signers, me.0)
            .ok_or_else(|| CustodyError::invalid("local index not in signer set"))?;
        let w_i = lambda * x_i;

        let group = secp::point_from_bytes(&bundle.group_public_key)?;
        let m = secp::scalar_reduce(&message_digest);

        let k_i = secp::random_scalar(&mut rng);
        let gamma_i = secp::random_scalar(&mut rng);
        let mut my_blind = [0u8; 32];
        rng.fill_bytes(&mut my_blind);

        let my_ek = auxiliary
            .peers
            .get(&me.0)
            .ok_or_else(|| CustodyError::internal("own Paillier key missing from bundle"))?
            .paillier_ek
            .clone();
        let enc_k = mta_initiate(&my_ek, &k_i);

        let big_gamma = secp::mul_base(&gamma_i);
        let gamma_commitment = commit(&my_blind, &secp::point_to_bytes(&big_gamma));

        let mut machine = GgSign {
            me,
            signers,
            tracker: RoundTracker::new(4, max_pending),
            auxiliary,
            group,
            digest: message_digest,
            m,
            k_i,
            gamma_i,
            w_i,
            my_blind,
            round1: BTreeMap::new(),
            beta_gamma: BTreeMap::new(),
            beta_w: BTreeMap::new(),
            alpha_gamma: BTreeMap::new(),
            alpha_w: BTreeMap::new(),
            reveals: BTreeMap::new(),
            sig_shares: BTreeMap::new(),
            delta_i: None,
            sigma_i: None,
            r: None,
            done: false,
        };
        machine.round1.insert(me.0, (gamma_commitment, enc_k.clone()));

        let outbound = vec![Outbound::broadcast(
            1,
            encode(&GgSignMessage::Round1 { gamma_commitment, enc_k })?,
        )];
        Ok((machine, outbound))
    }

    pub fn current_round(&self) -> u32 {
        self.tracker.current_round()
    }

    pub fn handle(&mut self, msg: Inbound) -> Result<EngineOutput> {
        if self.done {
            return Ok(EngineOutput::nothing());
        }
        match self.tracker.accept(&msg)? {
            Disposition::Deliver => {}
            Disposition::Buffered | Disposition::Discarded => {
                return Ok(EngineOutput::nothing());
            }
        }

        let mut outbound = Vec::new();
        let mut queue = VecDeque::from([msg]);
        while let Some(next) = queue.pop_front() {
            self.absorb(next)?;
            if self.round_complete() {
                if let Some(result) = self.finish_round(&mut outbound)? {
                    return Ok(EngineOutput { outbound, result: Some(result) });
                }
                queue.extend(self.tracker.advance());
            }
        }
        Ok(EngineOutput::messages(outbound))
    }

    fn peers(&self) -> impl Iterator<Item = u16> + '_ {
        let me = self.me.0;
        self.signers.iter().copied().filter(move |&j| j != me)
    }

    fn absorb(&mut self, msg: Inbound) -> Result<()> {
        let from = msg.from;
        let decoded: GgSignMessage = bincode::deserialize(&msg.payload)
            .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;

        match (self.tracker.current_round(), decoded) {
            (1, GgSignMessage::Round1 { gamma_commitment, enc_k }) => {
                let ek = &self.peer_aux(from)?.paillier_ek;
                if !ciphertext_in_range(ek, &enc_k) {
                    return Err(ProtocolAbort::blaming(AbortKind::MaliciousPeer, from).into());
                }
                self.round1.insert(from.0, (gamma_commitment, enc_k));
            }
            (2, GgSignMessage::MtaResponse { c_gamma, c_w }) => {
                let alpha_g = mta_finalize(&self.auxiliary.paillier_dk, &c_gamma)?;
                let alpha_w = mta_finalize(&self.auxiliary.paillier_dk, &c_w)?;
                self.alpha_gamma.insert(from.0, alpha_g);
                self.alpha_w.insert(from.0, alpha_w);
            }
            (3, GgSignMessage::Reveal { delta, blind, big_gamma }) => {
                let delta = secp::scalar_from_be(&delta)
                    .ok_or_else(|| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                let gamma_point = secp::point_from_bytes(&big_gamma)
                    .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                let (expected, _) = self
                    .round1
                    .get(&from.0)
                    .ok_or_else(|| ProtocolAbort::blaming(AbortKind::WrongRound, from))?;
                if commit(&blind, &big_gamma) != *expected {
                    return Err(
                        ProtocolAbort::blaming(AbortKind::InconsistentCommitment, from).into()
                    );
                }
                self.reveals.insert(from.0, (delta, gamma_point));
            }
            (4, GgSignMessage::SigShare { s }) => {
                let s = secp::scalar_from_be(&s)
                    .ok_or_else(|| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                self.sig_shares.insert(from.0, s);
            }
            _ => return Err(ProtocolAbort::blaming(AbortKind::WrongRound, from).into()),
        }
        Ok(())
    }

    fn round_complete(&self) -> bool {
        let n = self.signers.len();
        match self.tracker.current_round() {
            1 => self.round1.len() == n,
            2 => self.alpha_gamma.len() == n - 1 && self.alpha_w.len() == n - 1,
            3 => self.reveals.len() == n,
            4 => self.sig_shares.len() == n,
            _ => false,
        }
    }

    fn finish_round(&mut self, outbound: &mut Vec<Outbound>) -> Result<Option<ProtocolResult>> {
        match self.tracker.current_round() {
            1 => {
                // Respond to every peer's Enc(k_j) on both MtA legs.
                for j in self.peers().collect::<Vec<_>>() {
                    let ek = self.peer_aux(PartyIndex(j))?.paillier_ek.clone();
                    let enc_k = self.round1[&j].1.clone();
                    let (c_gamma, beta_g) = mta_respond(&ek, &enc_k, &self.gamma_i);
                    let (c_w, beta_w) = mta_respond(&ek, &enc_k, &self.w_i);
                    self.beta_gamma.insert(j, beta_g);
                    self.beta_w.insert(j, beta_w);
                    outbound.push(Outbound::unicast(
                        2,
                        PartyIndex(j),
                        encode(&GgSignMessage::MtaResponse { c_gamma, c_w })?,
                    ));
                }
            }
            2 => {
                // delta_i = k_i*gamma_i + sum(alpha + beta) over both
                // directions of the gamma leg; sigma_i likewise for w.
                let mut delta_i = self.k_i * self.gamma_i;
                let mut sigma_i = self.k_i * self.w_i;
                for j in self.peers().collect::<Vec<_>>() {
                    delta_i += self.alpha_gamma[&j] + self.beta_gamma[&j];
                    sigma_i += self.alpha_w[&j] + self.beta_w[&j];
                }
                self.delta_i = Some(delta_i);
                self.sigma_i = Some(sigma_i);

                let big_gamma = secp::mul_base(&self.gamma_i);
                self.reveals.insert(self.me.0, (delta_i, big_gamma));
                outbound.push(Outbound::broadcast(
                    3,
                    encode(&GgSignMessage::Reveal {
                        delta: secp::scalar_to_be(&delta_i),
                        blind: self.my_blind,
                        big_gamma: secp::point_to_bytes(&big_gamma),
                    })?,
                ));
            }
            3 => {
                let mut delta = k256::Scalar::ZERO;
                let mut gamma_sum = ProjectivePoint::IDENTITY;
                for (d, g) in self.reveals.values() {
                    delta += d;
                    gamma_sum += g;
                }
                let delta_inv: Option<k256::Scalar> = Option::from(delta.invert());
                let delta_inv =
                    delta_inv.ok_or_else(|| CustodyError::abort(AbortKind::SignatureInvalid))?;

                // R = k^-1 * G and r = R.x mod n.
                let big_r = gamma_sum * delta_inv;
                let r = secp::x_coordinate_scalar(&big_r);
                if r == k256::Scalar::ZERO {
                    return Err(CustodyError::abort(AbortKind::SignatureInvalid));
                }
                self.r = Some(r);

                let sigma_i = self.sigma_i.expect("set at round 2");
                let s_i = self.m * self.k_i + r * sigma_i;
                self.sig_shares.insert(self.me.0, s_i);
                outbound.push(Outbound::broadcast(
                    4,
                    encode(&GgSignMessage::SigShare { s: secp::scalar_to_be(&s_i) })?,
                ));
            }
            4 => {
                return self.finalize().map(Some);
            }
            _ => {}
        }
        Ok(None)
    }

    fn finalize(&mut self) -> Result<ProtocolResult> {
        let r = self.r.expect("set at round 3");
        let mut s = k256::Scalar::ZERO;
        for share in self.sig_shares.values() {
            s += share;
        }

        let sig = Signature::from_scalars(r, s)
            .map_err(|_| CustodyError::abort(AbortKind::SignatureInvalid))?;
        // Canonicalise s to the lower half of the curve order.
        let sig = sig.normalize_s().unwrap_or(sig);

        let verifying_key = VerifyingKey::from_sec1_bytes(&secp::point_to_bytes(&self.group))
            .map_err(|_| CustodyError::internal("group key is not a valid verifying key"))?;
        if verifying_key.verify_prehash(&self.digest, &sig).is_err() {
            // A peer fed us a bad MtA response or s-share; without range
            // proofs the aggregate check is where it surfaces.
            return Err(CustodyError::abort(AbortKind::SignatureInvalid));
        }

        debug!(me = self.me.0, "gg sign complete");
        self.done = true;
        Ok(ProtocolResult::Sign(SignResult { signature: sig.to_bytes().to_vec() }))
    }

    fn peer_aux(&self, j: PartyIndex) -> Result<&crate::types::GgPeerAux> {
        self.auxiliary
            .peers
            .get(&j.0)
            .ok_or_else(|| CustodyError::internal(format!("no Paillier key for participant {j}")))
    }
}

fn encode(msg: &GgSignMessage) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| CustodyError::internal(format!("encode sign message: {e}")))
}
