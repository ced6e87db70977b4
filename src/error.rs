//! Centralized custody error types.
//!
//! Every error surfaced by the core maps to one of the kinds below. The
//! engine never retries; retry is a caller decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PartyIndex;

/// Protocol-level abort reasons. A session that aborts is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortKind {
    /// A zero-knowledge or setup proof failed verification.
    InvalidProof,
    /// A commit/reveal pair or a VSS transcript did not match.
    InconsistentCommitment,
    /// A message referenced a round the state machine cannot accept.
    WrongRound,
    /// The same (from, round, sequence) key was observed twice.
    DuplicateMessage,
    /// A peer sent provably inconsistent material and is named.
    MaliciousPeer,
    /// A peer exceeded the router's receive window or flooded a session.
    PeerMisbehaving,
    /// The local share failed the `x_i * G == X_i` check at sign entry.
    InconsistentShare,
    /// The post-derivation local invariant check failed.
    DerivationInvariantBroken,
    /// The aggregated signature did not verify under the group key.
    SignatureInvalid,
}

impl std::fmt::Display for AbortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbortKind::InvalidProof => "invalid proof",
            AbortKind::InconsistentCommitment => "inconsistent commitment",
            AbortKind::WrongRound => "wrong round",
            AbortKind::DuplicateMessage => "duplicate message",
            AbortKind::MaliciousPeer => "malicious peer",
            AbortKind::PeerMisbehaving => "peer misbehaving",
            AbortKind::InconsistentShare => "inconsistent share",
            AbortKind::DerivationInvariantBroken => "derivation invariant broken",
            AbortKind::SignatureInvalid => "aggregated signature invalid",
        };
        f.write_str(s)
    }
}

/// A protocol abort, optionally naming the offending participant so that
/// operators can investigate. No automatic blacklist is maintained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAbort {
    pub kind: AbortKind,
    pub offender: Option<PartyIndex>,
}

impl ProtocolAbort {
    pub fn new(kind: AbortKind) -> Self {
        ProtocolAbort { kind, offender: None }
    }

    pub fn blaming(kind: AbortKind, offender: PartyIndex) -> Self {
        ProtocolAbort { kind, offender: Some(offender) }
    }
}

impl std::fmt::Display for ProtocolAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.offender {
            Some(id) => write!(f, "{} (participant {})", self.kind, id.0),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ProtocolAbort {}

/// Root error type for the custody core.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// Malformed input. Surfaced to the caller; never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A derivation path contained a hardened (>= 2^31) index.
    #[error("hardened derivation is not supported")]
    HardenedNotSupported,

    /// The authorisation gate rejected the request.
    #[error("authorisation denied: {0}")]
    AuthDenied(String),

    /// key_id, session_id or share unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Protocol-level abort; the session is terminal.
    #[error("protocol abort: {0}")]
    Protocol(#[from] ProtocolAbort),

    /// A round or session deadline was exceeded; the session is terminal.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport failed to deliver after its own bounded retries.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Router backpressure overflow; the caller may retry from scratch.
    #[error("router congested towards peer {0}")]
    Congested(String),

    /// Storage corruption, serialisation failure or a boundary invariant
    /// violation. Fatal; operator attention required.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustodyError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CustodyError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CustodyError::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CustodyError::NotFound(msg.into())
    }

    pub fn abort(kind: AbortKind) -> Self {
        CustodyError::Protocol(ProtocolAbort::new(kind))
    }

    pub fn abort_blaming(kind: AbortKind, offender: PartyIndex) -> Self {
        CustodyError::Protocol(ProtocolAbort::blaming(kind, offender))
    }

    /// Whether this error terminates the session it occurred in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CustodyError::Protocol(_)
                | CustodyError::Timeout(_)
                | CustodyError::Unreachable(_)
                | CustodyError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CustodyError>;
