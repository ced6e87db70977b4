//! Full-node flows over the in-process transport: announce handling,
//! routing, WAL, policy gate, crash recovery and the inbound operation
//! surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ecdsa::signature::hazmat::PrehashVerifier;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::auth::webauthn::testutil::{ed25519_credential, p256_credential, TestCredential};
use crate::auth::{AuthorisationGate, MemoryPolicyStore, PolicyStore};
use crate::config::CustodyConfig;
use crate::directory::StaticDirectory;
use crate::error::CustodyError;
use crate::node::CustodyNode;
use crate::router::{Router, RouterConfig};
use crate::session::wal::{RoundEvent, WriteAheadLog};
use crate::session::SessionManager;
use crate::store::MemoryShareStore;
use crate::tests::harness::GG_PRE_PARAMS;
use crate::transport::LoopbackHub;
use crate::types::{
    Curve, KeyId, KeyStatus, NodeId, PolicyKind, RegisteredCredential, Scheme, SessionId,
    SessionKind, SessionResult, SessionStatus, SigningPolicy,
};

struct TestNode {
    node: Arc<CustodyNode>,
    policies: Arc<MemoryPolicyStore>,
    store: Arc<MemoryShareStore>,
    wal_dir: TempDir,
    run_task: JoinHandle<()>,
}

struct Cluster {
    hub: Arc<LoopbackHub>,
    nodes: Vec<TestNode>,
}

fn test_config(name: &str) -> CustodyConfig {
    CustodyConfig {
        node_id: name.to_string(),
        paillier_bits: 1024,
        ..CustodyConfig::default()
    }
}

async fn cluster(names: &[&str]) -> Cluster {
    let hub = LoopbackHub::new();
    let mut nodes = Vec::new();
    for name in names {
        let inbound = hub.register((*name).into());
        let config = test_config(name);
        let wal_dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionManager::open(wal_dir.path()).await.unwrap());
        let (router, router_events) = Router::new(
            (*name).into(),
            hub.transport(),
            RouterConfig {
                receive_window: config.receive_window,
                outbound_queue: config.outbound_queue,
                send_attempts: 3,
            },
        );
        let policies = Arc::new(MemoryPolicyStore::new());
        let gate = Arc::new(AuthorisationGate::new(policies.clone()));
        let store = Arc::new(MemoryShareStore::new());
        let node = CustodyNode::new(
            config,
            sessions,
            router,
            router_events,
            store.clone(),
            gate,
            Arc::new(StaticDirectory::default()),
        );
        let run_task = tokio::spawn(node.clone().run(inbound));
        nodes.push(TestNode { node, policies, store, wal_dir, run_task });
    }
    Cluster { hub, nodes }
}

impl Cluster {
    fn node(&self, i: usize) -> &Arc<CustodyNode> {
        &self.nodes[i].node
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.node.node_id().clone()).collect()
    }

    async fn allow_credentials(&self, key_id: KeyId, min: u32, creds: &[&TestCredential]) {
        let policy = SigningPolicy {
            key_id,
            kind: if min > 1 { PolicyKind::TeamMofN } else { PolicyKind::Single },
            min_signatures: min,
            allowed_credentials: creds
                .iter()
                .map(|c| c.registered.clone())
                .collect::<Vec<RegisteredCredential>>(),
        };
        for n in &self.nodes {
            n.policies.put_policy(policy.clone()).await.unwrap();
        }
    }

    /// DKG completion is asynchronous on peers; wait until every node has
    /// activated the key before signing against it.
    async fn wait_active(&self, key_id: KeyId) {
        for n in &self.nodes {
            for _ in 0..500 {
                if let Ok(record) = n.node.key_record(key_id).await {
                    if record.status == KeyStatus::Active {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    /// Hand the GG Paillier pre-parameter pool to every node, the way
    /// deployments stage the material ahead of DKG.
    async fn install_gg_pre_params(&self) {
        for (i, n) in self.nodes.iter().enumerate() {
            n.node.install_pre_params(GG_PRE_PARAMS[i].clone()).await;
        }
    }

    /// Rebuild node `i` over its surviving WAL directory and share store,
    /// re-registering the same node id on the hub: the restarted process.
    async fn restart_node(&self, i: usize, grace: Duration) -> Arc<CustodyNode> {
        let name = self.nodes[i].node.node_id().clone();
        let inbound = self.hub.register(name.clone());
        let config = CustodyConfig { unreachable_grace: grace, ..test_config(&name.0) };
        let sessions =
            Arc::new(SessionManager::open(self.nodes[i].wal_dir.path()).await.unwrap());
        let (router, router_events) = Router::new(
            name,
            self.hub.transport(),
            RouterConfig {
                receive_window: config.receive_window,
                outbound_queue: config.outbound_queue,
                send_attempts: 3,
            },
        );
        let gate = Arc::new(AuthorisationGate::new(self.nodes[i].policies.clone()));
        let node = CustodyNode::new(
            config,
            sessions,
            router,
            router_events,
            self.nodes[i].store.clone(),
            gate,
            Arc::new(StaticDirectory::default()),
        );
        tokio::spawn(node.clone().run(inbound));
        node
    }

    fn wal_file_count(&self, i: usize) -> usize {
        std::fs::read_dir(self.nodes[i].wal_dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().map(|x| x == "wal").unwrap_or(false))
                    .unwrap_or(false)
            })
            .count()
    }
}

fn verify_ecdsa(public_key: &[u8], digest: &[u8; 32], signature: &[u8]) {
    assert_eq!(signature.len(), 64);
    let sig = k256::ecdsa::Signature::from_slice(signature).unwrap();
    // Canonical low-s: normalisation must be a no-op.
    assert!(sig.normalize_s().is_none(), "signature s is not canonical");
    let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key).unwrap();
    key.verify_prehash(digest, &sig).unwrap();
}

/// Locate a node's sign-session WAL, if one exists yet.
async fn find_sign_session(dir: &Path) -> Option<(SessionId, PathBuf)> {
    let wal = WriteAheadLog::open(dir).await.ok()?;
    for id in wal.sessions().await.ok()? {
        let records = wal.replay(id).await.ok()?;
        if let Some(RoundEvent::Created { session, .. }) = records.first().map(|r| &r.event) {
            if session.kind == SessionKind::Sign {
                return Some((id, dir.join(format!("{id}.wal"))));
            }
        }
    }
    None
}

/// Wait until peer `i` has completed its local copy of the sign session and
/// return its id and WAL path.
async fn wait_peer_sign_completed(cluster: &Cluster, i: usize) -> (SessionId, PathBuf) {
    let dir = cluster.nodes[i].wal_dir.path().to_path_buf();
    for _ in 0..500 {
        if let Some((id, path)) = find_sign_session(&dir).await {
            if let Ok(session) = cluster.node(i).session_manager().get(id).await {
                if session.status == SessionStatus::Completed {
                    return (id, path);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("peer never completed its sign session");
}

/// Drop the trailing record of a session WAL: the state left behind by a
/// process killed after its last delivery became durable but before the
/// next projection was appended.
fn chop_last_wal_record(path: &Path) {
    let bytes = std::fs::read(path).unwrap();
    let mut boundaries = vec![0usize];
    let mut offset = 0usize;
    while offset + 4 <= bytes.len() {
        let len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4 + len;
        boundaries.push(offset);
    }
    assert!(boundaries.len() >= 3, "need at least two records to chop one");
    let cut = boundaries[boundaries.len() - 2];
    std::fs::write(path, &bytes[..cut]).unwrap();
}

/// E1: 2-of-3 ECDSA (gg20) DKG + sign through the full node stack.
#[tokio::test(flavor = "multi_thread")]
async fn e1_full_stack_gg20_dkg_and_sign() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    cluster.install_gg_pre_params().await;
    let ids = cluster.node_ids();

    let (key_id, public_key, chain_code) = cluster
        .node(0)
        .generate_key(Curve::Secp256k1, Scheme::Gg20, 2, ids)
        .await
        .unwrap();
    assert_eq!(public_key.len(), 33);
    assert_ne!(chain_code, [0u8; 32]);
    cluster.wait_active(key_id).await;

    let user = p256_credential(b"user-key");
    cluster.allow_credentials(key_id, 1, &[&user]).await;

    let message = b"hello threshold";
    let digest: [u8; 32] = Sha256::digest(message).into();
    let signature = cluster
        .node(0)
        .sign(key_id, message, &[user.assert(&digest)], None)
        .await
        .unwrap();
    verify_ecdsa(&public_key, &digest, &signature);

    // P3 holds a valid share but was never invoked: only the DKG session
    // ever reached its WAL.
    assert_eq!(
        cluster.node(2).key_record(key_id).await.unwrap().status,
        KeyStatus::Active
    );
    assert_eq!(cluster.wal_file_count(2), 1);
}

/// E6: kill signer P2 after the final round deliveries are durable in its
/// WAL but before the completion projection, restart it over the surviving
/// WAL directory and share store, and watch `recover()` replay the session
/// to the identical signature.
#[tokio::test(flavor = "multi_thread")]
async fn e6_full_stack_crash_recovery_replays_wal() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    cluster.install_gg_pre_params().await;
    let ids = cluster.node_ids();

    let (key_id, public_key, _) = cluster
        .node(0)
        .generate_key(Curve::Secp256k1, Scheme::Gg20, 2, ids)
        .await
        .unwrap();
    cluster.wait_active(key_id).await;

    let user = p256_credential(b"user-key");
    cluster.allow_credentials(key_id, 1, &[&user]).await;

    let message = b"hello threshold";
    let digest: [u8; 32] = Sha256::digest(message).into();
    let signature = cluster
        .node(0)
        .sign(key_id, message, &[user.assert(&digest)], None)
        .await
        .unwrap();
    verify_ecdsa(&public_key, &digest, &signature);

    // Signer P2 completed its own copy of the session; capture its key
    // metadata, kill the process, and chop the un-projected tail off its
    // WAL so only the durable round deliveries remain.
    let (sign_id, wal_path) = wait_peer_sign_completed(&cluster, 1).await;
    let record = cluster.node(1).key_record(key_id).await.unwrap();
    cluster.nodes[1].run_task.abort();
    chop_last_wal_record(&wal_path);

    // Restart P2 over the same WAL directory and share store.
    let restarted = cluster.restart_node(1, Duration::from_secs(60)).await;
    restarted.install_key_record(record).await;
    assert_eq!(restarted.recover().await.unwrap(), 1);

    // The session replays from the WAL and completes; the deterministic
    // engine reproduces the exact signature the cluster already emitted.
    let mut replayed = None;
    for _ in 0..500 {
        let session = restarted.session_manager().get(sign_id).await.unwrap();
        if session.status == SessionStatus::Completed {
            replayed = session.result;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match replayed {
        Some(SessionResult::Signature(bytes)) => {
            assert_eq!(bytes, signature);
            verify_ecdsa(&public_key, &digest, &bytes);
        }
        other => panic!("session did not replay to a signature: {other:?}"),
    }
}

/// A recovered session whose key metadata is gone cannot rebuild its
/// engine; it fails after the configured grace instead of hanging.
#[tokio::test(flavor = "multi_thread")]
async fn recovery_without_key_metadata_fails_after_grace() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();
    let (key_id, _, _) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    cluster.wait_active(key_id).await;

    let user = ed25519_credential(b"user-key");
    cluster.allow_credentials(key_id, 1, &[&user]).await;
    let digest: [u8; 32] = Sha256::digest(b"soon lost").into();
    cluster
        .node(0)
        .sign(key_id, b"soon lost", &[user.assert(&digest)], None)
        .await
        .unwrap();

    let (sign_id, wal_path) = wait_peer_sign_completed(&cluster, 1).await;
    cluster.nodes[1].run_task.abort();
    chop_last_wal_record(&wal_path);

    // Restart without reinstalling the key record.
    let restarted = cluster.restart_node(1, Duration::from_millis(50)).await;
    assert_eq!(restarted.recover().await.unwrap(), 1);

    let mut status = SessionStatus::Running;
    for _ in 0..500 {
        status = restarted.session_manager().get(sign_id).await.unwrap().status;
        if status == SessionStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, SessionStatus::Failed);
}

/// E2: 2-of-3 FROST Ed25519 DKG + sign through the full node stack.
#[tokio::test(flavor = "multi_thread")]
async fn e2_full_stack_frost_dkg_and_sign() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();

    let (key_id, public_key, chain_code) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    assert_eq!(public_key.len(), 32);
    assert_ne!(chain_code, [0u8; 32]);

    // Peers also activated the key.
    cluster.wait_active(key_id).await;
    for i in 0..3 {
        let record = cluster.node(i).key_record(key_id).await.unwrap();
        assert_eq!(record.public_key, public_key);
        assert_eq!(record.chain_code, chain_code);
    }

    let user = ed25519_credential(b"user-key");
    cluster.allow_credentials(key_id, 1, &[&user]).await;

    let message = b"hello eddsa";
    let digest: [u8; 32] = Sha256::digest(message).into();
    let signature = cluster
        .node(0)
        .sign(key_id, message, &[user.assert(&digest)], None)
        .await
        .unwrap();

    assert_eq!(signature.len(), 64);
    let key_bytes: [u8; 32] = public_key.try_into().unwrap();
    let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).unwrap();
    let sig = ed25519_dalek::Signature::from_bytes(&signature.try_into().unwrap());
    ed25519_dalek::Verifier::verify(&key, &digest, &sig).unwrap();
}

/// E4: a sign request below the policy's m valid assertions is denied and
/// never reaches the engine (no WAL entry for any new session).
#[tokio::test(flavor = "multi_thread")]
async fn e4_policy_denial_never_reaches_engine() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();
    let (key_id, _, _) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    cluster.wait_active(key_id).await;

    let alice = p256_credential(b"alice");
    let bob = ed25519_credential(b"bob");
    cluster.allow_credentials(key_id, 2, &[&alice, &bob]).await;

    let wal_before = cluster.wal_file_count(0);
    let message = b"needs two approvals";
    let digest: [u8; 32] = Sha256::digest(message).into();
    let err = cluster
        .node(0)
        .sign(key_id, message, &[alice.assert(&digest)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::AuthDenied(_)));

    // No session was created: the WAL did not grow.
    assert_eq!(cluster.wal_file_count(0), wal_before);
}

/// E5: a hardened index is rejected before any round begins.
#[tokio::test(flavor = "multi_thread")]
async fn e5_hardened_index_rejected() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();
    let (key_id, _, _) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    cluster.wait_active(key_id).await;

    let err = cluster.node(0).derive_address(key_id, "m/2147483648").await.unwrap_err();
    assert!(matches!(err, CustodyError::HardenedNotSupported));
    let err = cluster.node(0).derive_address(key_id, "m/44'").await.unwrap_err();
    assert!(matches!(err, CustodyError::HardenedNotSupported));

    let user = ed25519_credential(b"user-key");
    cluster.allow_credentials(key_id, 1, &[&user]).await;
    let digest: [u8; 32] = Sha256::digest(b"m").into();
    let err = cluster
        .node(0)
        .sign(key_id, b"m", &[user.assert(&digest)], Some("m/0h"))
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::HardenedNotSupported));

    let wal_count = cluster.wal_file_count(0);
    // Only the DKG session ever hit the WAL.
    assert_eq!(wal_count, 1);
}

/// Non-hardened derive_address produces a stable derived record.
#[tokio::test(flavor = "multi_thread")]
async fn derive_address_is_deterministic() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();
    let (key_id, root_pk, _) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    cluster.wait_active(key_id).await;

    let (child_pk, address) = cluster.node(0).derive_address(key_id, "m/0/7").await.unwrap();
    assert_ne!(child_pk, root_pk);
    assert!(!address.is_empty());

    let (again_pk, again_addr) = cluster.node(0).derive_address(key_id, "m/0/7").await.unwrap();
    assert_eq!(child_pk, again_pk);
    assert_eq!(address, again_addr);
}

/// E3 (full stack): sign under a derived child key; signature verifies
/// against the derived public key.
#[tokio::test(flavor = "multi_thread")]
async fn e3_full_stack_sign_under_derived_key() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();
    let (key_id, _, _) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    cluster.wait_active(key_id).await;

    let (child_pk, _) = cluster.node(0).derive_address(key_id, "m/0").await.unwrap();

    let user = ed25519_credential(b"user-key");
    cluster.allow_credentials(key_id, 1, &[&user]).await;

    let message = b"hello derived";
    let digest: [u8; 32] = Sha256::digest(message).into();
    let signature = cluster
        .node(0)
        .sign(key_id, message, &[user.assert(&digest)], Some("m/0"))
        .await
        .unwrap();

    let key_bytes: [u8; 32] = child_pk.try_into().unwrap();
    let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).unwrap();
    let sig = ed25519_dalek::Signature::from_bytes(&signature.try_into().unwrap());
    ed25519_dalek::Verifier::verify(&key, &digest, &sig).unwrap();
}

/// Cancellation is terminal and rejects further mutation.
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_session_is_terminal() {
    let cluster = cluster(&["p1", "p2", "p3"]).await;
    let ids = cluster.node_ids();
    let (key_id, _, _) = cluster
        .node(0)
        .generate_key(Curve::Ed25519, Scheme::Frost, 2, ids)
        .await
        .unwrap();
    let _ = key_id;

    // Cancel an unknown session id fails cleanly.
    let err = cluster.node(0).cancel(crate::types::SessionId::fresh()).await.unwrap_err();
    assert!(matches!(err, CustodyError::NotFound(_)));
}

/// An unknown key id surfaces NotFound from both surfaces.
#[tokio::test(flavor = "multi_thread")]
async fn unknown_key_is_not_found() {
    let cluster = cluster(&["p1"]).await;
    let key_id = KeyId::fresh();
    assert!(matches!(
        cluster.node(0).derive_address(key_id, "m/0").await,
        Err(CustodyError::NotFound(_))
    ));
}
