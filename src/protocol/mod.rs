//! The MPC protocol engine.
//!
//! Pure state machines for GG18/GG20 threshold ECDSA and FROST threshold
//! Schnorr/EdDSA. The engine is passive: it accepts inbound messages,
//! returns outbound messages and/or a final result, and never performs I/O.
//! Engine transitions are CPU-bound and synchronous; callers run them off
//! the I/O path.

pub mod derive;
pub mod frost;
pub mod gg;
pub mod math;
pub mod tracker;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, Result};
use crate::types::{Curve, LocalShareBundle, PartyIndex, Scheme};

pub use tracker::{Disposition, Inbound, RoundTracker};

/// An outbound protocol message produced by the engine. `to = None` means
/// broadcast to every other participant of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    pub round: u32,
    pub to: Option<PartyIndex>,
    pub payload: Vec<u8>,
}

impl Outbound {
    pub fn broadcast(round: u32, payload: Vec<u8>) -> Self {
        Outbound { round, to: None, payload }
    }

    pub fn unicast(round: u32, to: PartyIndex, payload: Vec<u8>) -> Self {
        Outbound { round, to: Some(to), payload }
    }
}

/// Result of a completed DKG.
#[derive(Debug, Clone)]
pub struct DkgResult {
    pub bundle: LocalShareBundle,
    pub group_public_key: Vec<u8>,
    pub chain_code: [u8; 32],
}

/// Result of a completed signing protocol: signature bytes in the scheme's
/// boundary encoding (64-byte `r || s` for ECDSA and BIP340, 64-byte
/// `R || S` for Ed25519).
#[derive(Debug, Clone)]
pub struct SignResult {
    pub signature: Vec<u8>,
}

#[derive(Debug)]
pub enum ProtocolResult {
    Dkg(Box<DkgResult>),
    Sign(SignResult),
}

/// Output of one engine step: zero or more messages to send, plus the final
/// result once the last aggregation succeeds. Failure is the `Err` side of
/// the caller's `Result`; a failed state machine must not be stepped again.
#[derive(Debug)]
pub struct EngineOutput {
    pub outbound: Vec<Outbound>,
    pub result: Option<ProtocolResult>,
}

impl EngineOutput {
    pub fn messages(outbound: Vec<Outbound>) -> Self {
        EngineOutput { outbound, result: None }
    }

    pub fn nothing() -> Self {
        EngineOutput { outbound: Vec::new(), result: None }
    }
}

/// Everything a state machine needs at construction beyond its inputs: the
/// deterministic seed (recorded in the WAL so crash recovery replays to a
/// byte-identical state) and, for the GG schemes, the pre-generated
/// Paillier/zk material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInit {
    pub seed: [u8; 32],
    pub gg_pre_params: Option<gg::PreParams>,
}

impl EngineInit {
    pub fn random(gg_pre_params: Option<gg::PreParams>) -> Self {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);
        EngineInit { seed, gg_pre_params }
    }
}

/// One protocol state machine, scheme-erased. Callers never switch on the
/// scheme: they pump inbound messages and forward outbound ones.
#[derive(Debug)]
pub enum SchemeEngine {
    GgDkg(gg::dkg::GgDkg),
    GgSign(gg::sign::GgSign),
    FrostDkgEd25519(frost::dkg::FrostDkg<frost_ed25519::Ed25519Sha512>),
    FrostDkgSecp256k1(frost::dkg::FrostDkg<frost_secp256k1_tr::Secp256K1Sha256TR>),
    FrostSignEd25519(frost::sign::FrostSign<frost_ed25519::Ed25519Sha512>),
    FrostSignSecp256k1(frost::sign::FrostSign<frost_secp256k1_tr::Secp256K1Sha256TR>),
}

impl SchemeEngine {
    /// Start distributed key generation. Returns the machine and its
    /// round-1 broadcast.
    pub fn begin_dkg(
        curve: Curve,
        scheme: Scheme,
        me: PartyIndex,
        participants: &[PartyIndex],
        threshold: u16,
        max_pending: usize,
        init: EngineInit,
    ) -> Result<(Self, Vec<Outbound>)> {
        if !scheme.supports(curve) {
            return Err(CustodyError::invalid(format!(
                "scheme {scheme} does not support curve {curve}"
            )));
        }
        validate_party_set(me, participants, threshold)?;
        let rng = StdRng::from_seed(init.seed);
        match (scheme, curve) {
            (Scheme::Gg18 | Scheme::Gg20, Curve::Secp256k1) => {
                let pre = init.gg_pre_params.ok_or_else(|| {
                    CustodyError::invalid("GG DKG requires pre-generated Paillier parameters")
                })?;
                let (machine, outbound) =
                    gg::dkg::GgDkg::new(scheme, me, participants, threshold, max_pending, rng, pre)?;
                Ok((SchemeEngine::GgDkg(machine), outbound))
            }
            (Scheme::Frost, Curve::Ed25519) => {
                let (machine, outbound) =
                    frost::dkg::FrostDkg::new(me, participants, threshold, max_pending, rng)?;
                Ok((SchemeEngine::FrostDkgEd25519(machine), outbound))
            }
            (Scheme::Frost, Curve::Secp256k1) => {
                let (machine, outbound) =
                    frost::dkg::FrostDkg::new(me, participants, threshold, max_pending, rng)?;
                Ok((SchemeEngine::FrostDkgSecp256k1(machine), outbound))
            }
            _ => unreachable!("scheme/curve combination rejected above"),
        }
    }

    /// Start threshold signing over a 32-byte message digest with the given
    /// signer subset. The share invariant `x_i * G == X_i` is checked at
    /// entry.
    pub fn begin_sign(
        bundle: LocalShareBundle,
        message_digest: [u8; 32],
        signers: &[PartyIndex],
        me: PartyIndex,
        max_pending: usize,
        init: EngineInit,
    ) -> Result<(Self, Vec<Outbound>)> {
        validate_party_set(me, signers, bundle.threshold)?;
        if signers.len() != bundle.threshold as usize + 1 {
            return Err(CustodyError::invalid(format!(
                "signing requires exactly {} participants, got {}",
                bundle.threshold + 1,
                signers.len()
            )));
        }
        let rng = StdRng::from_seed(init.seed);
        match (bundle.scheme, bundle.curve) {
            (Scheme::Gg18 | Scheme::Gg20, Curve::Secp256k1) => {
                let (machine, outbound) =
                    gg::sign::GgSign::new(bundle, message_digest, signers, me, max_pending, rng)?;
                Ok((SchemeEngine::GgSign(machine), outbound))
            }
            (Scheme::Frost, Curve::Ed25519) => {
                let (machine, outbound) =
                    frost::sign::FrostSign::new(bundle, message_digest, signers, me, max_pending, rng)?;
                Ok((SchemeEngine::FrostSignEd25519(machine), outbound))
            }
            (Scheme::Frost, Curve::Secp256k1) => {
                let (machine, outbound) =
                    frost::sign::FrostSign::new(bundle, message_digest, signers, me, max_pending, rng)?;
                Ok((SchemeEngine::FrostSignSecp256k1(machine), outbound))
            }
            (scheme, curve) => Err(CustodyError::invalid(format!(
                "share bundle pairs {scheme} with unsupported curve {curve}"
            ))),
        }
    }

    /// Feed one inbound message to the state machine.
    pub fn handle(&mut self, msg: Inbound) -> Result<EngineOutput> {
        match self {
            SchemeEngine::GgDkg(m) => m.handle(msg),
            SchemeEngine::GgSign(m) => m.handle(msg),
            SchemeEngine::FrostDkgEd25519(m) => m.handle(msg),
            SchemeEngine::FrostDkgSecp256k1(m) => m.handle(msg),
            SchemeEngine::FrostSignEd25519(m) => m.handle(msg),
            SchemeEngine::FrostSignSecp256k1(m) => m.handle(msg),
        }
    }

    /// The round this machine is currently collecting.
    pub fn current_round(&self) -> u32 {
        match self {
            SchemeEngine::GgDkg(m) => m.current_round(),
            SchemeEngine::GgSign(m) => m.current_round(),
            SchemeEngine::FrostDkgEd25519(m) => m.current_round(),
            SchemeEngine::FrostDkgSecp256k1(m) => m.current_round(),
            SchemeEngine::FrostSignEd25519(m) => m.current_round(),
            SchemeEngine::FrostSignSecp256k1(m) => m.current_round(),
        }
    }
}

/// Non-interactive, local child-key derivation (re-exported from
/// [`derive`]); see that module for the full contract.
pub fn derive_bundle(
    bundle: &LocalShareBundle,
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<(LocalShareBundle, [u8; 32])> {
    derive::derive_bundle(bundle, chain_code, path)
}

fn validate_party_set(me: PartyIndex, participants: &[PartyIndex], threshold: u16) -> Result<()> {
    if !participants.contains(&me) {
        return Err(CustodyError::invalid("local index not in participant set"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for p in participants {
        if p.0 == 0 {
            return Err(CustodyError::invalid("participant indices are 1-based"));
        }
        if !seen.insert(p.0) {
            return Err(CustodyError::invalid("duplicate participant index"));
        }
    }
    // 1 <= t, and at least t+1 participants must be present.
    if threshold == 0 || participants.len() < threshold as usize + 1 {
        return Err(CustodyError::invalid(format!(
            "invalid threshold {threshold} for {} participants",
            participants.len()
        )));
    }
    Ok(())
}
