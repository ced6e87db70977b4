//! FROST two-round threshold signing: nonce-commitment broadcast, then
//! signature-share broadcast and local aggregation.

use std::collections::{BTreeMap, VecDeque};

use frost_core::round1::{self, NonceCommitment, SigningCommitments, SigningNonces};
use frost_core::round2::{self, SignatureShare};
use frost_core::SigningPackage;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AbortKind, CustodyError, ProtocolAbort, Result};
use crate::protocol::frost::{
    check_bundle, identifier, key_package_from_bundle, public_package_from_bundle, Suite,
};
use crate::protocol::tracker::{Disposition, Inbound, RoundTracker};
use crate::protocol::{EngineOutput, Outbound, ProtocolResult, SignResult};
use crate::types::{LocalShareBundle, PartyIndex, Scheme};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FrostSignMessage {
    /// Broadcast nonce commitments (D_i, E_i).
    Commitments { hiding: Vec<u8>, binding: Vec<u8> },
    /// Broadcast signature share z_i.
    Share(Vec<u8>),
}

#[derive(Debug)]
pub struct FrostSign<C: Suite> {
    me: PartyIndex,
    signers: Vec<u16>,
    tracker: RoundTracker,
    bundle: LocalShareBundle,
    digest: [u8; 32],
    nonces: Option<SigningNonces<C>>,
    commitments: BTreeMap<u16, SigningCommitments<C>>,
    shares: BTreeMap<u16, SignatureShare<C>>,
    signing_package: Option<SigningPackage<C>>,
    done: bool,
}

impl<C: Suite> FrostSign<C> {
    pub fn new(
        bundle: LocalShareBundle,
        message_digest: [u8; 32],
        signer_set: &[PartyIndex],
        me: PartyIndex,
        max_pending: usize,
        mut rng: StdRng,
    ) -> Result<(Self, Vec<Outbound>)> {
        check_bundle::<C>(&bundle, me)?;
        let mut signers: Vec<u16> = signer_set.iter().map(|p| p.0).collect();
        signers.sort_unstable();
        for j in &signers {
            if !bundle.indices.contains(&PartyIndex(*j)) {
                return Err(CustodyError::invalid(format!(
                    "signer {j} does not hold a share of this key"
                )));
            }
        }

        let key_package = key_package_from_bundle::<C>(&bundle)?;
        let (nonces, commitments) = round1::commit(key_package.signing_share(), &mut rng);

        let hiding = commitments
            .hiding()
            .serialize()
            .map_err(|e| CustodyError::internal(format!("serialize hiding commitment: {e}")))?;
        let binding = commitments
            .binding()
            .serialize()
            .map_err(|e| CustodyError::internal(format!("serialize binding commitment: {e}")))?;

        let mut machine = FrostSign {
            me,
            signers,
            tracker: RoundTracker::new(Scheme::Frost.sign_rounds(), max_pending),
            bundle,
            digest: message_digest,
            nonces: Some(nonces),
            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
            signing_package: None,
            done: false,
        };
        machine.commitments.insert(me.0, commitments);

        let outbound =
            vec![Outbound::broadcast(1, encode(&FrostSignMessage::Commitments { hiding, binding })?)];
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
        if !self.signers.contains(&from.0) {
            return Err(ProtocolAbort::blaming(AbortKind::MaliciousPeer, from).into());
        }
        let decoded: FrostSignMessage = bincode::deserialize(&msg.payload)
            .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
        match (self.tracker.current_round(), decoded) {
            (1, FrostSignMessage::Commitments { hiding, binding }) => {
                let hiding = NonceCommitment::<C>::deserialize(&hiding)
                    .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                let binding = NonceCommitment::<C>::deserialize(&binding)
                    .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                self.commitments.insert(from.0, SigningCommitments::new(hiding, binding));
            }
            (2, FrostSignMessage::Share(bytes)) => {
                let share = SignatureShare::<C>::deserialize(&bytes)
                    .map_err(|_| ProtocolAbort::blaming(AbortKind::MaliciousPeer, from))?;
                self.shares.insert(from.0, share);
            }
            _ => return Err(ProtocolAbort::blaming(AbortKind::WrongRound, from).into()),
        }
        Ok(())
    }

    fn round_complete(&self) -> bool {
        let n = self.signers.len();
        match self.tracker.current_round() {
            1 => self.commitments.len() == n,
            2 => self.shares.len() == n,
            _ => false,
        }
    }

    fn finish_round(&mut self, outbound: &mut Vec<Outbound>) -> Result<Option<ProtocolResult>> {
        match self.tracker.current_round() {
            1 => {
                let mut commitment_map = BTreeMap::new();
                for (&j, commitments) in &self.commitments {
                    commitment_map.insert(identifier::<C>(j)?, commitments.clone());
                }
                let signing_package = SigningPackage::<C>::new(commitment_map, &self.digest);

                let key_package = key_package_from_bundle::<C>(&self.bundle)?;
                let nonces = self
                    .nonces
                    .take()
                    .ok_or_else(|| CustodyError::internal("signing nonces consumed twice"))?;
                let share = round2::sign(&signing_package, &nonces, &key_package)
                    .map_err(|e| CustodyError::internal(format!("frost round2 sign: {e}")))?;

                self.shares.insert(self.me.0, share.clone());
                self.signing_package = Some(signing_package);
                outbound.push(Outbound::broadcast(
                    2,
                    encode(&FrostSignMessage::Share(share.serialize()))?,
                ));
            }
            2 => {
                return self.finalize().map(Some);
            }
            _ => {}
        }
        Ok(None)
    }

    fn finalize(&mut self) -> Result<ProtocolResult> {
        let signing_package = self
            .signing_package
            .take()
            .ok_or_else(|| CustodyError::internal("signing package missing at aggregation"))?;
        let mut share_map = BTreeMap::new();
        for (&j, share) in &self.shares {
            share_map.insert(identifier::<C>(j)?, share.clone());
        }
        let public_package = public_package_from_bundle::<C>(&self.bundle)?;

        // The aggregator verifies the signature under the group key and, on
        // failure, names the misbehaving signer when it can.
        let signature = frost_core::aggregate(&signing_package, &share_map, &public_package)
            .map_err(|e| match e.culprit() {
                Some(id) => {
                    let offender = self
                        .signers
                        .iter()
                        .copied()
                        .find(|&j| identifier::<C>(j).map(|c| c == id).unwrap_or(false))
                        .map(PartyIndex);
                    match offender {
                        Some(p) => ProtocolAbort::blaming(AbortKind::MaliciousPeer, p),
                        None => ProtocolAbort::new(AbortKind::SignatureInvalid),
                    }
                }
                None => ProtocolAbort::new(AbortKind::SignatureInvalid),
            })?;

        let bytes = signature
            .serialize()
            .map_err(|e| CustodyError::internal(format!("serialize signature: {e}")))?;
        if bytes.len() != 64 {
            return Err(CustodyError::internal(format!(
                "unexpected signature length {}",
                bytes.len()
            )));
        }

        debug!(me = self.me.0, "frost sign complete");
        self.done = true;
        Ok(ProtocolResult::Sign(SignResult { signature: bytes }))
    }
}

fn encode(msg: &FrostSignMessage) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| CustodyError::internal(format!("encode sign message: {e}")))
}
