//! Authorisation gate.
//!
//! Admits a signing (or administrative) request only after enough distinct
//! valid WebAuthn assertions satisfy the key's policy. The gate is
//! stateless modulo policy/credential lookups and never relies on request
//! ordering; replay protection is the caller's responsibility because the
//! request digest binds the message being signed.

pub mod webauthn;

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{CustodyError, Result};
use crate::metrics::{inc, METRICS};
use crate::types::{AuthAssertion, KeyId, SigningPolicy};

/// Backing store of per-key signing policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, key_id: KeyId) -> Result<Option<SigningPolicy>>;
    async fn put_policy(&self, policy: SigningPolicy) -> Result<()>;
}

/// In-memory policy store; the SQL driver behind the production one is an
/// external collaborator.
#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: Mutex<HashMap<KeyId, SigningPolicy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        MemoryPolicyStore::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_policy(&self, key_id: KeyId) -> Result<Option<SigningPolicy>> {
        Ok(self.policies.lock().expect("policy lock").get(&key_id).cloned())
    }

    async fn put_policy(&self, policy: SigningPolicy) -> Result<()> {
        self.policies.lock().expect("policy lock").insert(policy.key_id, policy);
        Ok(())
    }
}

/// Outcome of an authorisation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Admitted, listing the distinct credential ids that counted.
    Admitted { credentials: Vec<Vec<u8>> },
    Denied { reason: String },
}

pub struct AuthorisationGate {
    policies: std::sync::Arc<dyn PolicyStore>,
}

impl AuthorisationGate {
    pub fn new(policies: std::sync::Arc<dyn PolicyStore>) -> Self {
        AuthorisationGate { policies }
    }

    pub fn policy_store(&self) -> &dyn PolicyStore {
        self.policies.as_ref()
    }

    /// Evaluate `assertions` against the key's policy. A key with no
    /// registered policy defaults to `Single` with one required signature -
    /// and an empty allowed-credential set, which admits nothing, so keys
    /// must register credentials before signing.
    pub async fn authorise(
        &self,
        key_id: KeyId,
        request_digest: &[u8],
        assertions: &[AuthAssertion],
    ) -> Result<Decision> {
        let policy = self
            .policies
            .get_policy(key_id)
            .await?
            .unwrap_or_else(|| SigningPolicy::single(key_id));

        let expected_challenge = webauthn::challenge_for(request_digest);
        let mut valid: BTreeSet<Vec<u8>> = BTreeSet::new();

        for assertion in assertions {
            let Some(credential) = policy
                .allowed_credentials
                .iter()
                .find(|c| c.id == assertion.credential_id)
            else {
                debug!(key = %key_id, "assertion from unregistered credential skipped");
                continue;
            };
            match webauthn::verify_assertion(assertion, credential, &expected_challenge) {
                Ok(()) => {
                    // Dedupe on credential id.
                    valid.insert(credential.id.clone());
                }
                Err(e) => {
                    debug!(key = %key_id, error = %e, "assertion rejected");
                }
            }
        }

        let required = policy.min_signatures as usize;
        if valid.len() >= required {
            Ok(Decision::Admitted { credentials: valid.into_iter().collect() })
        } else {
            inc(&METRICS.auth_denied);
            let reason = format!(
                "policy requires {} distinct valid assertions, got {}",
                required,
                valid.len()
            );
            warn!(key = %key_id, %reason, "authorisation denied");
            Ok(Decision::Denied { reason })
        }
    }

    /// Convenience wrapper that converts a denial into `AuthDenied`.
    pub async fn require(
        &self,
        key_id: KeyId,
        request_digest: &[u8],
        assertions: &[AuthAssertion],
    ) -> Result<Vec<Vec<u8>>> {
        match self.authorise(key_id, request_digest, assertions).await? {
            Decision::Admitted { credentials } => Ok(credentials),
            Decision::Denied { reason } => Err(CustodyError::AuthDenied(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::webauthn::testutil::{ed25519_credential, p256_credential};
    use super::*;
    use crate::types::PolicyKind;

    fn team_policy(key_id: KeyId, creds: Vec<crate::types::RegisteredCredential>) -> SigningPolicy {
        SigningPolicy {
            key_id,
            kind: PolicyKind::TeamMofN,
            min_signatures: 2,
            allowed_credentials: creds,
        }
    }

    #[tokio::test]
    async fn m_of_n_policy_admits_with_enough_assertions() {
        let key_id = KeyId::fresh();
        let alice = p256_credential(b"alice");
        let bob = ed25519_credential(b"bob");

        let store = MemoryPolicyStore::new();
        store
            .put_policy(team_policy(
                key_id,
                vec![alice.registered.clone(), bob.registered.clone()],
            ))
            .await
            .unwrap();
        let gate = AuthorisationGate::new(std::sync::Arc::new(store));

        let digest = [5u8; 32];
        let decision = gate
            .authorise(key_id, &digest, &[alice.assert(&digest), bob.assert(&digest)])
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Admitted { credentials } if credentials.len() == 2));
    }

    #[tokio::test]
    async fn single_assertion_under_m_of_n_is_denied() {
        let key_id = KeyId::fresh();
        let alice = p256_credential(b"alice");
        let bob = ed25519_credential(b"bob");

        let store = MemoryPolicyStore::new();
        store
            .put_policy(team_policy(
                key_id,
                vec![alice.registered.clone(), bob.registered.clone()],
            ))
            .await
            .unwrap();
        let gate = AuthorisationGate::new(std::sync::Arc::new(store));

        let digest = [5u8; 32];
        let decision = gate.authorise(key_id, &digest, &[alice.assert(&digest)]).await.unwrap();
        assert!(matches!(decision, Decision::Denied { .. }));
        assert!(matches!(
            gate.require(key_id, &digest, &[alice.assert(&digest)]).await,
            Err(CustodyError::AuthDenied(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_credential_counts_once() {
        let key_id = KeyId::fresh();
        let alice = p256_credential(b"alice");
        let bob = ed25519_credential(b"bob");

        let store = MemoryPolicyStore::new();
        store
            .put_policy(team_policy(
                key_id,
                vec![alice.registered.clone(), bob.registered.clone()],
            ))
            .await
            .unwrap();
        let gate = AuthorisationGate::new(std::sync::Arc::new(store));

        let digest = [5u8; 32];
        // Two assertions from the same credential must not satisfy m = 2.
        let decision = gate
            .authorise(key_id, &digest, &[alice.assert(&digest), alice.assert(&digest)])
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Denied { .. }));
    }

    #[tokio::test]
    async fn unregistered_credential_is_ignored() {
        let key_id = KeyId::fresh();
        let alice = p256_credential(b"alice");
        let mallory = p256_credential(b"mallory");

        let store = MemoryPolicyStore::new();
        let mut policy = team_policy(key_id, vec![alice.registered.clone()]);
        policy.min_signatures = 1;
        store.put_policy(policy).await.unwrap();
        let gate = AuthorisationGate::new(std::sync::Arc::new(store));

        let digest = [5u8; 32];
        let decision = gate.authorise(key_id, &digest, &[mallory.assert(&digest)]).await.unwrap();
        assert!(matches!(decision, Decision::Denied { .. }));
    }

    #[tokio::test]
    async fn default_policy_admits_nothing() {
        let gate = AuthorisationGate::new(std::sync::Arc::new(MemoryPolicyStore::new()));
        let decision = gate.authorise(KeyId::fresh(), &[1u8; 32], &[]).await.unwrap();
        assert!(matches!(decision, Decision::Denied { .. }));
    }
}
