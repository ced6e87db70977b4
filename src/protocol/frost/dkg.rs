//! FROST distributed key generation (trusted-dealer-free, two message
//! rounds): round-1 commitment broadcast, round-2 unicast share packages,
//! then local finalisation into a raw share bundle.

use std::collections::{BTreeMap, VecDeque};

use frost_core::keys::dkg::{part1, part2, part3, round1, round2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AbortKind, CustodyError, ProtocolAbort, Result};
use crate::protocol::frost::{identifier, Suite};
use crate::protocol::tracker::{Disposition, Inbound, RoundTracker};
use crate::protocol::{derive, DkgResult, EngineOutput, Outbound, ProtocolResult};
use crate::types::{LocalShareBundle, PartyIndex, Scheme, SecretScalar};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FrostDkgMessage {
    /// Serialized round-1 package (broadcast).
    Round1(Vec<u8>),
    /// Serialized round-2 package (unicast to each peer).
    Round2(Vec<u8>),
}

#[derive(Debug)]
enum DkgStage<C: Suite> {
    Round1 { secret: round1::SecretPackage<C> },
    Round2 { secret: round2::SecretPackage<C> },
    Done,
}

#[derive(Debug)]
pub struct FrostDkg<C: Suite> {
    me: PartyIndex,
    indices: Vec<u16>,
    threshold: u16,
    tracker: RoundTracker,
    stage: DkgStage<C>,
    round1_packages: BTreeMap<u16, round1::Package<C>>,
    round2_packages: BTreeMap<u16, round2::Package<C>>,
    done: bool,
}

impl<C: Suite> FrostDkg<C> {
    pub fn new(
        me: PartyIndex,
        participants: &[PartyIndex],
        threshold: u16,
        max_pending: usize,
        mut rng: StdRng,
    ) -> Result<(Self, Vec<Outbound>)> {
        let mut indices: Vec<u16> = participants.iter().map(|p| p.0).collect();
        indices.sort_unstable();

        let id = identifier::<C>(me.0)?;
        let (secret, package) = part1::<C, _>(
            id,
            indices.len() as u16,
            threshold + 1,
            &mut rng,
        )
        .map_err(|e| CustodyError::internal(format!("frost dkg part1: {e}")))?;

        let payload = package
            .serialize()
            .map_err(|e| CustodyError::internal(format!("serialize round1 package: {e}")))?;

        let machine = FrostDkg {
            me,
            indices,
            threshold,
            tracker: RoundTracker::new(Scheme::Frost.dkg_rounds(), max_pending),
            stage: DkgStage::Round1 { secret },
            round1_packages: BTreeMap::new(),
            round2_packages: BTreeMap::new(),
            done: false,
        };
        let outbound = vec![Outbound::broadcast(1, encode(&FrostDkgMessage::Round1(payload))?)];
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

    fn absorb(&mut self, msg: Inbound) -> Result<()> {
        let from = msg.from;
        let decoded: FrostDkgMessage = bincode::deserialize(&msg.payload)
            .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
        match (self.tracker.current_round(), decoded) {
            (1, FrostDkgMessage::Round1(bytes)) => {
                let package = round1::Package::<C>::deserialize(&bytes)
                    .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                self.round1_packages.insert(from.0, package);
            }
            (2, FrostDkgMessage::Round2(bytes)) => {
                let package = round2::Package::<C>::deserialize(&bytes)
                    .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                self.round2_packages.insert(from.0, package);
            }
            _ => return Err(ProtocolAbort::blaming(AbortKind::WrongRound, from).into()),
        }
        Ok(())
    }

    fn round_complete(&self) -> bool {
        let peers = self.indices.len() - 1;
        match self.tracker.current_round() {
            1 => self.round1_packages.len() == peers,
            2 => self.round2_packages.len() == peers,
            _ => false,
        }
    }

    fn received_round1(&self) -> Result<BTreeMap<frost_core::Identifier<C>, round1::Package<C>>> {
        let mut map = BTreeMap::new();
        for (&j, package) in &self.round1_packages {
            map.insert(identifier::<C>(j)?, package.clone());
        }
        Ok(map)
    }

    fn finish_round(&mut self, outbound: &mut Vec<Outbound>) -> Result<Option<ProtocolResult>> {
        match std::mem::replace(&mut self.stage, DkgStage::Done) {
            DkgStage::Round1 { secret } => {
                let received = self.received_round1()?;
                let (round2_secret, packages) = part2(secret, &received).map_err(|e| {
                    // part2 verifies the embedded proofs of knowledge.
                    abort_with(AbortKind::InvalidProof, culprit_index::<C>(&e, &self.indices))
                })?;

                for (id, package) in packages {
                    let to = index_of::<C>(&id, &self.indices).ok_or_else(|| {
                        CustodyError::internal("part2 produced a package for an unknown peer")
                    })?;
                    let payload = package
                        .serialize()
                        .map_err(|e| CustodyError::internal(format!("serialize round2: {e}")))?;
                    outbound.push(Outbound::unicast(
                        2,
                        PartyIndex(to),
                        encode(&FrostDkgMessage::Round2(payload))?,
                    ));
                }
                self.stage = DkgStage::Round2 { secret: round2_secret };
            }
            DkgStage::Round2 { secret } => {
                let round1_received = self.received_round1()?;
                let mut round2_received = BTreeMap::new();
                for (&j, package) in &self.round2_packages {
                    round2_received.insert(identifier::<C>(j)?, package.clone());
                }
                let (key_package, pubkey_package) =
                    part3(&secret, &round1_received, &round2_received).map_err(|e| {
                        abort_with(
                            AbortKind::InconsistentCommitment,
                            culprit_index::<C>(&e, &self.indices),
                        )
                    })?;

                let result = self.finalize(key_package, pubkey_package)?;
                return Ok(Some(result));
            }
            DkgStage::Done => {}
        }
        Ok(None)
    }

    fn finalize(
        &mut self,
        key_package: frost_core::keys::KeyPackage<C>,
        pubkey_package: frost_core::keys::PublicKeyPackage<C>,
    ) -> Result<ProtocolResult> {
        let share_bytes = key_package.signing_share().serialize();
        if share_bytes.len() != 32 {
            return Err(CustodyError::internal("unexpected signing share length"));
        }
        let mut x_i = [0u8; 32];
        x_i.copy_from_slice(&share_bytes);

        let mut public_shares = BTreeMap::new();
        for &j in &self.indices {
            let id = identifier::<C>(j)?;
            let share = pubkey_package
                .verifying_shares()
                .get(&id)
                .ok_or_else(|| CustodyError::internal("missing verifying share after dkg"))?;
            let encoded = share
                .serialize()
                .map_err(|e| CustodyError::internal(format!("serialize verifying share: {e}")))?;
            public_shares.insert(j, encoded);
        }
        let group_public_key = pubkey_package
            .verifying_key()
            .serialize()
            .map_err(|e| CustodyError::internal(format!("serialize group key: {e}")))?;

        let mut bundle = LocalShareBundle {
            curve: C::CURVE,
            scheme: Scheme::Frost,
            index: self.me,
            threshold: self.threshold,
            x_i: SecretScalar(x_i),
            indices: self.indices.iter().map(|&j| PartyIndex(j)).collect(),
            public_shares,
            group_public_key,
            auxiliary: None,
        };
        C::normalize_bundle(&mut bundle)?;

        // Share consistency after normalisation.
        if !C::share_consistent(&bundle.x_i.0, bundle.public_share(self.me)?) {
            return Err(CustodyError::abort(AbortKind::InconsistentShare));
        }

        let group_public_key = bundle.group_public_key.clone();
        let chain_code = derive::chain_code_for(&group_public_key);
        debug!(me = self.me.0, "frost dkg complete");
        self.done = true;
        Ok(ProtocolResult::Dkg(Box::new(DkgResult { bundle, group_public_key, chain_code })))
    }
}

fn abort_with(kind: AbortKind, offender: Option<PartyIndex>) -> ProtocolAbort {
    match offender {
        Some(id) => ProtocolAbort::blaming(kind, id),
        None => ProtocolAbort::new(kind),
    }
}

fn index_of<C: Suite>(id: &frost_core::Identifier<C>, indices: &[u16]) -> Option<u16> {
    indices
        .iter()
        .copied()
        .find(|&j| identifier::<C>(j).map(|candidate| candidate == *id).unwrap_or(false))
}

/// Extract the culprit index from a frost error, when it names one.
fn culprit_index<C: Suite>(error: &frost_core::Error<C>, indices: &[u16]) -> Option<PartyIndex> {
    match error.culprit() {
        Some(id) => index_of::<C>(&id, indices).map(PartyIndex),
        None => None,
    }
}

fn encode(msg: &FrostDkgMessage) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| CustodyError::internal(format!("encode dkg message: {e}")))
}
