//! Shared data types for the custody core: curve and scheme tags, identity
//! newtypes, key/share/session records and the signing-policy model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CustodyError, Result};

/// Supported elliptic curves. The tag is carried on every operation; the
/// arithmetic dispatches on it at the entry boundary and stays monomorphic
/// inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    Secp256k1,
    Ed25519,
}

impl Curve {
    /// Scalar byte length (32 on both supported curves).
    pub const SCALAR_LEN: usize = 32;

    /// Encoded point length: compressed SEC1 for secp256k1, compressed
    /// Edwards y for Ed25519.
    pub fn point_len(&self) -> usize {
        match self {
            Curve::Secp256k1 => 33,
            Curve::Ed25519 => 32,
        }
    }
}

impl std::fmt::Display for Curve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Curve::Secp256k1 => f.write_str("secp256k1"),
            Curve::Ed25519 => f.write_str("ed25519"),
        }
    }
}

impl std::str::FromStr for Curve {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(Curve::Secp256k1),
            "ed25519" => Ok(Curve::Ed25519),
            other => Err(CustodyError::invalid(format!("unknown curve: {other}"))),
        }
    }
}

/// Threshold-signature schemes implemented by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Gg18,
    Gg20,
    Frost,
}

impl Scheme {
    /// Whether this scheme runs on the given curve.
    pub fn supports(&self, curve: Curve) -> bool {
        match self {
            Scheme::Gg18 | Scheme::Gg20 => curve == Curve::Secp256k1,
            Scheme::Frost => true,
        }
    }

    /// Total message rounds of distributed key generation.
    pub fn dkg_rounds(&self) -> u32 {
        match self {
            Scheme::Gg18 => 4,
            Scheme::Gg20 => 2,
            Scheme::Frost => 2,
        }
    }

    /// Total message rounds of threshold signing.
    pub fn sign_rounds(&self) -> u32 {
        match self {
            Scheme::Gg18 | Scheme::Gg20 => 4,
            Scheme::Frost => 2,
        }
    }

    /// Infer the scheme from a user-facing algorithm + curve pair, the way
    /// key-creation requests that predate explicit scheme ids expressed it.
    pub fn infer(algorithm: &str, curve: Curve) -> Result<Scheme> {
        match (algorithm.to_ascii_lowercase().as_str(), curve) {
            ("ecdsa", Curve::Secp256k1) => Ok(Scheme::Gg20),
            ("eddsa" | "schnorr", _) => Ok(Scheme::Frost),
            (alg, curve) => Err(CustodyError::invalid(format!(
                "no scheme for algorithm {alg} on curve {curve}"
            ))),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Gg18 => f.write_str("gg18"),
            Scheme::Gg20 => f.write_str("gg20"),
            Scheme::Frost => f.write_str("frost"),
        }
    }
}

/// 128-bit random identifier of a root key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct KeyId(pub Uuid);

impl KeyId {
    pub fn fresh() -> Self {
        KeyId(Uuid::new_v4())
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// 128-bit random identifier of a protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn fresh() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// 1-based share index of a participant within a key's polynomial sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyIndex(pub u16);

impl std::fmt::Display for PartyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable identifier of a custody node (transport endpoint owner).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// User-facing required signer count for a polynomial of degree `t`.
///
/// `threshold t` inside the crate is always the polynomial degree; this pair
/// of helpers is the only place the two meanings meet.
pub fn required_signers(t: u16) -> u16 {
    t + 1
}

/// Polynomial degree for a user-facing required signer count.
pub fn polynomial_degree(required: u16) -> Result<u16> {
    if required < 2 {
        return Err(CustodyError::invalid(
            "required signer count must be at least 2",
        ));
    }
    Ok(required - 1)
}

/// Root key lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Pending,
    Active,
    Revoked,
}

/// Metadata record of a root key held across the participant set.
///
/// Invariant: `1 <= threshold < total_participants`; a signature requires
/// exactly `threshold + 1` share holders to cooperate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootKeyRecord {
    pub key_id: KeyId,
    pub curve: Curve,
    pub scheme: Scheme,
    /// Polynomial degree, NOT the required signer count.
    pub threshold: u16,
    pub total_participants: u16,
    /// Encoded group public key.
    pub public_key: Vec<u8>,
    /// Derivation chain code, identical on every participant.
    pub chain_code: [u8; 32],
    /// Ordered participant nodes; share index `i + 1` belongs to entry `i`.
    pub participant_ids: Vec<NodeId>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

impl RootKeyRecord {
    /// Share index of `node` within this key, if it participates.
    pub fn index_of(&self, node: &NodeId) -> Option<PartyIndex> {
        self.participant_ids
            .iter()
            .position(|n| n == node)
            .map(|p| PartyIndex(p as u16 + 1))
    }

    pub fn indices(&self) -> Vec<PartyIndex> {
        (1..=self.total_participants).map(PartyIndex).collect()
    }
}

/// A secret scalar share, wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretScalar(pub [u8; 32]);

impl std::fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print share bytes.
        f.write_str("SecretScalar(..)")
    }
}

/// Per-peer Paillier/zk auxiliary material required by the GG schemes.
///
/// The proof material is carried as an opaque bundle with known
/// serialisation; `dln_proof` is verified during DKG.
#[derive(Clone, Serialize, Deserialize)]
pub struct GgPeerAux {
    pub paillier_ek: paillier::EncryptionKey,
    pub n_tilde: curv::BigInt,
    pub h1: curv::BigInt,
    pub h2: curv::BigInt,
    pub dln_proof: Vec<u8>,
}

impl std::fmt::Debug for GgPeerAux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GgPeerAux").field("dln_proof_len", &self.dln_proof.len()).finish_non_exhaustive()
    }
}

/// GG auxiliary material local to one participant: its Paillier decryption
/// key plus the verified per-peer bundles (own bundle included).
#[derive(Clone, Serialize, Deserialize)]
pub struct GgAuxiliary {
    pub paillier_dk: paillier::DecryptionKey,
    pub peers: BTreeMap<u16, GgPeerAux>,
}

impl std::fmt::Debug for GgAuxiliary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The decryption key never appears in debug output.
        f.debug_struct("GgAuxiliary").field("peers", &self.peers.len()).finish_non_exhaustive()
    }
}

/// The local share bundle persisted per (key, participant).
///
/// Invariant, preserved across derivation and persistence: for every
/// participant j, `x_j * G == X_j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalShareBundle {
    pub curve: Curve,
    pub scheme: Scheme,
    /// This participant's share index.
    pub index: PartyIndex,
    /// Polynomial degree.
    pub threshold: u16,
    /// Secret share x_i, curve-native scalar encoding.
    pub x_i: SecretScalar,
    /// The ordered index set {k_j}.
    pub indices: Vec<PartyIndex>,
    /// Public commitments X_j = x_j * G for every participant.
    pub public_shares: BTreeMap<u16, Vec<u8>>,
    /// Encoded group public key.
    pub group_public_key: Vec<u8>,
    /// GG-only Paillier/zk auxiliary material.
    pub auxiliary: Option<GgAuxiliary>,
}

impl LocalShareBundle {
    pub fn public_share(&self, index: PartyIndex) -> Result<&[u8]> {
        self.public_shares
            .get(&index.0)
            .map(|v| v.as_slice())
            .ok_or_else(|| CustodyError::internal(format!("no public share for participant {index}")))
    }
}

/// Derived (non-hardened child) key record. No share is stored for a derived
/// key; derivation is recomputed from the root share at sign time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedKeyRecord {
    pub wallet_id: Uuid,
    pub parent_key_id: KeyId,
    pub path: Vec<u32>,
    pub public_key: Vec<u8>,
    pub chain_code: [u8; 32],
    /// Opaque bytes produced by the chain adapter.
    pub address: Vec<u8>,
}

/// Session kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Dkg,
    Sign,
    DeriveAndSign,
}

/// Session lifecycle. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// Result of a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionResult {
    /// DKG: group public key and chain code.
    PublicKey { public_key: Vec<u8>, chain_code: [u8; 32] },
    /// Sign: final signature bytes in the scheme's boundary encoding.
    Signature(Vec<u8>),
}

/// One protocol session as tracked by every participant. Peers each hold
/// their own local copy with identical id, kind and participant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub key_id: KeyId,
    pub kind: SessionKind,
    pub scheme: Scheme,
    pub curve: Curve,
    /// Ordered signer subset: exactly t+1 for sign, all n for DKG.
    pub participants: Vec<PartyIndex>,
    /// Monotone round counter.
    pub round: u32,
    pub total_rounds: u32,
    pub status: SessionStatus,
    pub message_digest: Option<Vec<u8>>,
    pub derivation_path: Option<String>,
    pub result: Option<SessionResult>,
    pub created_at: DateTime<Utc>,
    /// Absolute deadline; reaching it before completion fails the session.
    pub deadline: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_reason: Option<String>,
}

/// A peer-to-peer protocol message.
///
/// Invariants: `round` observed by a receiver is non-decreasing per sender;
/// each `(session_id, from, round, sequence)` is delivered at most once to
/// the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub session_id: SessionId,
    pub round: u32,
    pub from: PartyIndex,
    /// None = broadcast to all current participants.
    pub to: Option<PartyIndex>,
    /// Per-session monotone per-sender.
    pub sequence: u32,
    /// Opaque bytes produced by the engine.
    pub payload: Vec<u8>,
    /// Optional end-user assertion accompanying the client-attested leg.
    pub assertion: Option<Vec<u8>>,
}

/// A WebAuthn-style assertion presented to the authorisation gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthAssertion {
    pub credential_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Signature algorithm a credential registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialAlgorithm {
    EcdsaP256,
    Ed25519,
}

/// A credential allowed by a signing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredCredential {
    pub id: Vec<u8>,
    pub algorithm: CredentialAlgorithm,
    /// SEC1 (P-256) or 32-byte Edwards (Ed25519) public key.
    pub public_key: Vec<u8>,
}

/// Signing-policy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    Single,
    TeamMofN,
}

/// Per-key signing policy evaluated by the authorisation gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningPolicy {
    pub key_id: KeyId,
    pub kind: PolicyKind,
    pub min_signatures: u32,
    pub allowed_credentials: Vec<RegisteredCredential>,
}

impl SigningPolicy {
    /// Default policy when none is registered for a key.
    pub fn single(key_id: KeyId) -> Self {
        SigningPolicy {
            key_id,
            kind: PolicyKind::Single,
            min_signatures: 1,
            allowed_credentials: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_conversion_round_trips() {
        assert_eq!(required_signers(1), 2);
        assert_eq!(polynomial_degree(2).unwrap(), 1);
        assert!(polynomial_degree(1).is_err());
    }

    #[test]
    fn scheme_inference_matches_curve() {
        assert_eq!(Scheme::infer("ecdsa", Curve::Secp256k1).unwrap(), Scheme::Gg20);
        assert_eq!(Scheme::infer("eddsa", Curve::Ed25519).unwrap(), Scheme::Frost);
        assert_eq!(Scheme::infer("schnorr", Curve::Secp256k1).unwrap(), Scheme::Frost);
        assert!(Scheme::infer("ecdsa", Curve::Ed25519).is_err());
    }

    #[test]
    fn secret_scalar_debug_hides_bytes() {
        let s = SecretScalar([7u8; 32]);
        assert_eq!(format!("{s:?}"), "SecretScalar(..)");
    }

    #[test]
    fn index_lookup_is_one_based() {
        let record = RootKeyRecord {
            key_id: KeyId::fresh(),
            curve: Curve::Secp256k1,
            scheme: Scheme::Gg20,
            threshold: 1,
            total_participants: 3,
            public_key: vec![],
            chain_code: [0; 32],
            participant_ids: vec!["p1".into(), "p2".into(), "p3".into()],
            status: KeyStatus::Pending,
            created_at: Utc::now(),
        };
        assert_eq!(record.index_of(&"p2".into()), Some(PartyIndex(2)));
        assert_eq!(record.index_of(&"p9".into()), None);
    }
}
