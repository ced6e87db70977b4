//! GG18/GG20 distributed key generation.
//!
//! GG18 rounds: (1) commit to the Feldman coefficient commitments,
//! (2) reveal + VSS share delivery, (3) Paillier/zk auxiliary broadcast,
//! (4) final consistency checks. GG20 compresses setup into one
//! broadcast+unicast phase followed by the consistency round; both variants
//! produce byte-compatible share bundles.

use std::collections::{BTreeMap, VecDeque};

use k256::ProjectivePoint;
use rand::rngs::StdRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AbortKind, CustodyError, ProtocolAbort, Result};
use crate::protocol::gg::{self, PreParams};
use crate::protocol::math::{commit, secp};
use crate::protocol::tracker::{Disposition, Inbound, RoundTracker};
use crate::protocol::{derive, DkgResult, EngineOutput, Outbound, ProtocolResult};
use crate::types::{Curve, GgAuxiliary, GgPeerAux, LocalShareBundle, PartyIndex, Scheme, SecretScalar};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum GgDkgMessage {
    /// GG18 round 1: hash commitment to the coefficient commitments.
    Commit { commitment: [u8; 32] },
    /// Reveal of the Feldman commitments; GG20 carries the auxiliary bundle
    /// in the same phase.
    Reveal { blind: [u8; 32], vss: Vec<Vec<u8>>, aux: Option<GgPeerAux> },
    /// Unicast VSS share evaluation f_i(j).
    Share { eval: [u8; 32] },
    /// GG18 round 3: Paillier/zk auxiliary broadcast.
    Aux { aux: GgPeerAux },
    /// Final round: claimed public share and transcript digest.
    Confirm { public_share: Vec<u8>, transcript: [u8; 32] },
}

#[derive(Debug)]
pub struct GgDkg {
    variant: Scheme,
    me: PartyIndex,
    indices: Vec<u16>,
    threshold: u16,
    tracker: RoundTracker,
    poly: secp::Polynomial,
    my_blind: [u8; 32],
    pre: PreParams,
    commits: BTreeMap<u16, [u8; 32]>,
    reveals: BTreeMap<u16, Vec<ProjectivePoint>>,
    shares: BTreeMap<u16, k256::Scalar>,
    aux: BTreeMap<u16, GgPeerAux>,
    confirms: BTreeMap<u16, (Vec<u8>, [u8; 32])>,
    x_i: Option<k256::Scalar>,
    public_shares: BTreeMap<u16, ProjectivePoint>,
    group: Option<ProjectivePoint>,
    done: bool,
}

impl GgDkg {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        variant: Scheme,
        me: PartyIndex,
        participants: &[PartyIndex],
        threshold: u16,
        max_pending: usize,
        mut rng: StdRng,
        pre: PreParams,
    ) -> Result<(Self, Vec<Outbound>)> {
        let mut indices: Vec<u16> = participants.iter().map(|p| p.0).collect();
        indices.sort_unstable();

        let poly = secp::Polynomial::random(&mut rng, threshold);
        let mut my_blind = [0u8; 32];
        rng.fill_bytes(&mut my_blind);

        let mut machine = GgDkg {
            variant,
            me,
            indices,
            threshold,
            tracker: RoundTracker::new(variant.dkg_rounds(), max_pending),
            poly,
            my_blind,
            pre,
            commits: BTreeMap::new(),
            reveals: BTreeMap::new(),
            shares: BTreeMap::new(),
            aux: BTreeMap::new(),
            confirms: BTreeMap::new(),
            x_i: None,
            public_shares: BTreeMap::new(),
            group: None,
            done: false,
        };

        // Record our own contributions so completion counts cover all n.
        let vss = machine.poly.commitment();
        machine.commits.insert(me.0, commit(&machine.my_blind, &encode_vss(&vss)));
        machine.reveals.insert(me.0, vss);
        machine.shares.insert(me.0, machine.poly.evaluate_index(me.0));
        machine.aux.insert(me.0, machine.pre.public.clone());

        let outbound = match variant {
            Scheme::Gg18 => vec![Outbound::broadcast(
                1,
                encode(&GgDkgMessage::Commit { commitment: machine.commits[&me.0] })?,
            )],
            Scheme::Gg20 => machine.reveal_messages(1)?,
            Scheme::Frost => return Err(CustodyError::invalid("FROST is not a GG variant")),
        };
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

    fn n(&self) -> usize {
        self.indices.len()
    }

    fn peers(&self) -> impl Iterator<Item = u16> + '_ {
        let me = self.me.0;
        self.indices.iter().copied().filter(move |&j| j != me)
    }

    /// Which setup phase the current round is, mapped across variants.
    fn phase(&self) -> Phase {
        match (self.variant, self.tracker.current_round()) {
            (Scheme::Gg18, 1) => Phase::Commit,
            (Scheme::Gg18, 2) => Phase::Reveal,
            (Scheme::Gg18, 3) => Phase::Aux,
            (Scheme::Gg18, 4) => Phase::Confirm,
            (Scheme::Gg20, 1) => Phase::Reveal,
            (Scheme::Gg20, 2) => Phase::Confirm,
            _ => Phase::Confirm,
        }
    }

    fn absorb(&mut self, msg: Inbound) -> Result<()> {
        let from = msg.from;
        let decoded: GgDkgMessage = bincode::deserialize(&msg.payload)
            .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;

        match (self.phase(), decoded) {
            (Phase::Commit, GgDkgMessage::Commit { commitment }) => {
                self.commits.insert(from.0, commitment);
            }
            (Phase::Reveal, GgDkgMessage::Reveal { blind, vss, aux }) => {
                if vss.len() != self.threshold as usize + 1 {
                    return Err(
                        ProtocolAbort::blaming(AbortKind::InconsistentCommitment, from).into()
                    );
                }
                let mut points = Vec::with_capacity(vss.len());
                for encoded in &vss {
                    points.push(
                        secp::point_from_bytes(encoded)
                            .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?,
                    );
                }
                match self.variant {
                    Scheme::Gg18 => {
                        // The reveal must match the round-1 commitment.
                        let expected = self.commits.get(&from.0).ok_or_else(|| {
                            ProtocolAbort::blaming(AbortKind::InconsistentCommitment, from)
                        })?;
                        if commit(&blind, &encode_vss(&points)) != *expected {
                            return Err(ProtocolAbort::blaming(
                                AbortKind::InconsistentCommitment,
                                from,
                            )
                            .into());
                        }
                    }
                    _ => {
                        let aux = aux.ok_or_else(|| {
                            ProtocolAbort::blaming(AbortKind::MaliciousPeer, from)
                        })?;
                        self.aux.insert(from.0, aux);
                    }
                }
                self.reveals.insert(from.0, points);
            }
            (Phase::Reveal, GgDkgMessage::Share { eval }) => {
                let share = secp::scalar_from_be(&eval)
                    .ok_or_else(|| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                self.shares.insert(from.0, share);
            }
            (Phase::Aux, GgDkgMessage::Aux { aux }) => {
                self.aux.insert(from.0, aux);
            }
            (Phase::Confirm, GgDkgMessage::Confirm { public_share, transcript }) => {
                self.confirms.insert(from.0, (public_share, transcript));
            }
            _ => return Err(ProtocolAbort::blaming(AbortKind::WrongRound, from).into()),
        }
        Ok(())
    }

    fn round_complete(&self) -> bool {
        let n = self.n();
        match self.phase() {
            Phase::Commit => self.commits.len() == n,
            Phase::Reveal => {
                let aux_done = match self.variant {
                    Scheme::Gg18 => true,
                    _ => self.aux.len() == n,
                };
                self.reveals.len() == n && self.shares.len() == n && aux_done
            }
            Phase::Aux => self.aux.len() == n,
            Phase::Confirm => self.confirms.len() == n,
        }
    }

    fn finish_round(&mut self, outbound: &mut Vec<Outbound>) -> Result<Option<ProtocolResult>> {
        let round = self.tracker.current_round();
        match self.phase() {
            Phase::Commit => {
                outbound.extend(self.reveal_messages(round + 1)?);
            }
            Phase::Reveal => {
                self.verify_vss()?;
                self.compute_shares()?;
                if self.variant == Scheme::Gg18 {
                    outbound.push(Outbound::broadcast(
                        round + 1,
                        encode(&GgDkgMessage::Aux { aux: self.pre.public.clone() })?,
                    ));
                } else {
                    self.verify_aux()?;
                    outbound.push(self.confirm_message(round + 1)?);
                }
            }
            Phase::Aux => {
                self.verify_aux()?;
                outbound.push(self.confirm_message(round + 1)?);
            }
            Phase::Confirm => {
                return self.finalize().map(Some);
            }
        }
        Ok(None)
    }

    fn reveal_messages(&mut self, round: u32) -> Result<Vec<Outbound>> {
        let vss = self.reveals[&self.me.0].clone();
        let aux = match self.variant {
            Scheme::Gg18 => None,
            _ => Some(self.pre.public.clone()),
        };
        let mut out = vec![Outbound::broadcast(
            round,
            encode(&GgDkgMessage::Reveal { blind: self.my_blind, vss: encode_vss_vec(&vss), aux })?,
        )];
        for j in self.peers().collect::<Vec<_>>() {
            let eval = secp::scalar_to_be(&self.poly.evaluate_index(j));
            out.push(Outbound::unicast(
                round,
                PartyIndex(j),
                encode(&GgDkgMessage::Share { eval })?,
            ));
        }
        Ok(out)
    }

    /// Feldman check for every received share: f_j(me) * G must equal the
    /// evaluation of j's coefficient commitments at our index.
    fn verify_vss(&self) -> Result<()> {
        for j in self.peers() {
            let share = &self.shares[&j];
            let commitment = &self.reveals[&j];
            if secp::mul_base(share) != secp::commitment_eval(commitment, self.me.0) {
                return Err(CustodyError::abort_blaming(AbortKind::MaliciousPeer, PartyIndex(j)));
            }
        }
        Ok(())
    }

    fn verify_aux(&self) -> Result<()> {
        for j in self.peers() {
            if !gg::verify_peer_aux(&self.aux[&j]) {
                return Err(CustodyError::abort_blaming(AbortKind::InvalidProof, PartyIndex(j)));
            }
        }
        Ok(())
    }

    fn compute_shares(&mut self) -> Result<()> {
        let mut x_i = k256::Scalar::ZERO;
        for share in self.shares.values() {
            x_i += share;
        }
        let mut group = ProjectivePoint::IDENTITY;
        for commitment in self.reveals.values() {
            group += commitment[0];
        }
        for &j in &self.indices {
            let mut x_j_pub = ProjectivePoint::IDENTITY;
            for commitment in self.reveals.values() {
                x_j_pub += secp::commitment_eval(commitment, j);
            }
            self.public_shares.insert(j, x_j_pub);
        }

        // Our own share must be consistent with the committed polynomials.
        if secp::mul_base(&x_i) != self.public_shares[&self.me.0] {
            return Err(CustodyError::abort(AbortKind::InconsistentShare));
        }

        debug!(me = self.me.0, "gg dkg local share computed");
        self.x_i = Some(x_i);
        self.group = Some(group);
        Ok(())
    }

    fn transcript(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"custody-mpc gg-dkg transcript v1");
        hasher.update(secp::point_to_bytes(self.group.as_ref().expect("computed")));
        for (&j, p) in &self.public_shares {
            hasher.update(j.to_be_bytes());
            hasher.update(secp::point_to_bytes(p));
        }
        hasher.finalize().into()
    }

    fn confirm_message(&mut self, round: u32) -> Result<Outbound> {
        let public_share = secp::point_to_bytes(&self.public_shares[&self.me.0]);
        let transcript = self.transcript();
        self.confirms.insert(self.me.0, (public_share.clone(), transcript));
        Ok(Outbound::broadcast(
            round,
            encode(&GgDkgMessage::Confirm { public_share, transcript })?,
        ))
    }

    fn finalize(&mut self) -> Result<ProtocolResult> {
        let transcript = self.transcript();
        for j in self.peers() {
            let (claimed_share, claimed_transcript) = &self.confirms[&j];
            if *claimed_transcript != transcript {
                return Err(CustodyError::abort_blaming(
                    AbortKind::InconsistentCommitment,
                    PartyIndex(j),
                ));
            }
            if *claimed_share != secp::point_to_bytes(&self.public_shares[&j]) {
                return Err(CustodyError::abort_blaming(AbortKind::MaliciousPeer, PartyIndex(j)));
            }
        }

        let x_i = self.x_i.take().ok_or_else(|| CustodyError::internal("share not computed"))?;
        let group = self.group.ok_or_else(|| CustodyError::internal("group key not computed"))?;
        let group_public_key = secp::point_to_bytes(&group);
        let chain_code = derive::chain_code_for(&group_public_key);

        let bundle = LocalShareBundle {
            curve: Curve::Secp256k1,
            scheme: self.variant,
            index: self.me,
            threshold: self.threshold,
            x_i: SecretScalar(secp::scalar_to_be(&x_i)),
            indices: self.indices.iter().map(|&j| PartyIndex(j)).collect(),
            public_shares: self
                .public_shares
                .iter()
                .map(|(&j, p)| (j, secp::point_to_bytes(p)))
                .collect(),
            group_public_key: group_public_key.clone(),
            auxiliary: Some(GgAuxiliary {
                paillier_dk: self.pre.paillier_dk.clone(),
                peers: self.aux.clone(),
            }),
        };

        self.done = true;
        Ok(ProtocolResult::Dkg(Box::new(DkgResult {
            bundle,
            group_public_key,
            chain_code,
        })))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Commit,
    Reveal,
    Aux,
    Confirm,
}

fn encode(msg: &GgDkgMessage) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| CustodyError::internal(format!("encode dkg message: {e}")))
}

fn encode_vss(points: &[ProjectivePoint]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * 33);
    for p in points {
        out.extend_from_slice(&secp::point_to_bytes(p));
    }
    out
}

fn encode_vss_vec(points: &[ProjectivePoint]) -> Vec<Vec<u8>> {
    points.iter().map(|p| secp::point_to_bytes(p)).collect()
}
