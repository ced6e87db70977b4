//! Custody MPC core library.
//!
//! Threshold-signature custody without a complete private key on any single
//! machine: GG18/GG20 threshold ECDSA on secp256k1 and FROST threshold
//! Schnorr/EdDSA on Ed25519 and secp256k1, driven by a session state machine
//! with durable progress, a transport-agnostic message router, an
//! envelope-encrypted key-share store and a WebAuthn authorisation gate.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{AbortKind, CustodyError, ProtocolAbort};
pub use node::CustodyNode;
pub use types::{Curve, KeyId, PartyIndex, Scheme, SessionId};
