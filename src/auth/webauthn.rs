//! WebAuthn assertion verification.
//!
//! An assertion is valid when its client data is a "webauthn.get" record
//! whose challenge equals the request digest (base64url), the
//! authenticator data carries the User-Present flag, and the signature over
//! `authenticator_data || SHA256(client_data_json)` verifies under the
//! credential's registered public key (ECDSA-P256 or Ed25519).

use p256::ecdsa::signature::Verifier as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{CustodyError, Result};
use crate::types::{AuthAssertion, CredentialAlgorithm, RegisteredCredential};

/// Minimum authenticator data: 32-byte rpIdHash, 1 flag byte, 4-byte
/// counter.
const MIN_AUTH_DATA: usize = 37;
const FLAG_USER_PRESENT: u8 = 0x01;

#[derive(Debug, Deserialize)]
struct CollectedClientData {
    #[serde(rename = "type")]
    ceremony: String,
    challenge: String,
}

pub fn challenge_for(request_digest: &[u8]) -> String {
    base64::encode_config(request_digest, base64::URL_SAFE_NO_PAD)
}

/// Verify one assertion against its registered credential. Returns `Ok(())`
/// or a denial reason.
pub fn verify_assertion(
    assertion: &AuthAssertion,
    credential: &RegisteredCredential,
    expected_challenge: &str,
) -> Result<()> {
    let client_data: CollectedClientData = serde_json::from_slice(&assertion.client_data_json)
        .map_err(|_| CustodyError::AuthDenied("malformed clientDataJSON".to_string()))?;

    if client_data.ceremony != "webauthn.get" {
        return Err(CustodyError::AuthDenied(format!(
            "unexpected ceremony type {}",
            client_data.ceremony
        )));
    }

    // Tolerate padding differences in the base64url challenge.
    let presented = client_data.challenge.trim_end_matches('=');
    if presented != expected_challenge.trim_end_matches('=') {
        return Err(CustodyError::AuthDenied("challenge mismatch".to_string()));
    }

    if assertion.authenticator_data.len() < MIN_AUTH_DATA {
        return Err(CustodyError::AuthDenied("authenticator data too short".to_string()));
    }
    let flags = assertion.authenticator_data[32];
    if flags & FLAG_USER_PRESENT == 0 {
        return Err(CustodyError::AuthDenied("user-present flag not set".to_string()));
    }

    // Signed payload: authData || SHA256(clientDataJSON).
    let client_data_hash = Sha256::digest(&assertion.client_data_json);
    let mut signed = Vec::with_capacity(assertion.authenticator_data.len() + 32);
    signed.extend_from_slice(&assertion.authenticator_data);
    signed.extend_from_slice(&client_data_hash);

    match credential.algorithm {
        CredentialAlgorithm::EcdsaP256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&credential.public_key)
                .map_err(|_| CustodyError::AuthDenied("bad registered P-256 key".to_string()))?;
            let signature = p256::ecdsa::Signature::from_der(&assertion.signature)
                .or_else(|_| p256::ecdsa::Signature::from_slice(&assertion.signature))
                .map_err(|_| CustodyError::AuthDenied("malformed P-256 signature".to_string()))?;
            key.verify(&signed, &signature)
                .map_err(|_| CustodyError::AuthDenied("assertion signature invalid".to_string()))
        }
        CredentialAlgorithm::Ed25519 => {
            let key_bytes: [u8; 32] = credential
                .public_key
                .as_slice()
                .try_into()
                .map_err(|_| CustodyError::AuthDenied("bad registered Ed25519 key".to_string()))?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map_err(|_| CustodyError::AuthDenied("bad registered Ed25519 key".to_string()))?;
            let sig_bytes: [u8; 64] = assertion
                .signature
                .as_slice()
                .try_into()
                .map_err(|_| CustodyError::AuthDenied("malformed Ed25519 signature".to_string()))?;
            let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            ed25519_dalek::Verifier::verify(&key, &signed, &signature)
                .map_err(|_| CustodyError::AuthDenied("assertion signature invalid".to_string()))
        }
    }
}
