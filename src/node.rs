//! The custody node: the inbound surface (`generate_key`, `derive_address`,
//! `sign`, `cancel`) and the per-session task loop that pumps the router
//! into the protocol engine.
//!
//! Engine transitions are synchronous and CPU-bound; the task loop around
//! them is the only suspension point. Every accepted inbound message is
//! durable in the WAL before the engine observes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthorisationGate;
use crate::config::CustodyConfig;
use crate::directory::{select_signers, NodeDirectory, NodeRole};
use crate::error::{CustodyError, Result};
use crate::protocol::{
    self, derive, gg, DkgResult, EngineInit, Inbound, ProtocolResult, SchemeEngine,
};
use crate::router::{Router, RouterEvent};
use crate::session::{RecoveredSession, SessionManager};
use crate::store::ShareStore;
use crate::transport::{Envelope, SessionAnnounce, WireFrame};
use crate::types::{
    polynomial_degree, AuthAssertion, Curve, DerivedKeyRecord, KeyId, KeyStatus, LocalShareBundle,
    NodeId, PartyIndex, ProtocolMessage, RootKeyRecord, Scheme, Session, SessionId, SessionKind,
    SessionResult, SessionStatus,
};

/// Chain adapter seam: turns a public key into chain-specific address
/// bytes. Address derivation for concrete chains lives outside the core.
pub trait AddressCodec: Send + Sync {
    fn address(&self, curve: Curve, public_key: &[u8]) -> Vec<u8>;
}

/// Stand-in adapter: a truncated hash of the encoded public key.
pub struct OpaqueAddressCodec;

impl AddressCodec for OpaqueAddressCodec {
    fn address(&self, _curve: Curve, public_key: &[u8]) -> Vec<u8> {
        Sha256::digest(public_key)[12..].to_vec()
    }
}

pub struct CustodyNode {
    node_id: NodeId,
    config: CustodyConfig,
    sessions: Arc<SessionManager>,
    router: Arc<Router>,
    store: Arc<dyn ShareStore>,
    gate: Arc<AuthorisationGate>,
    directory: Arc<dyn NodeDirectory>,
    address_codec: Arc<dyn AddressCodec>,
    keys: RwLock<HashMap<KeyId, RootKeyRecord>>,
    derived: RwLock<HashMap<(KeyId, String), DerivedKeyRecord>>,
    waiters: Mutex<HashMap<SessionId, oneshot::Sender<Result<SessionResult>>>>,
    /// Cached GG pre-parameters; generating fresh Paillier moduli is the
    /// expensive part of GG DKG and is done off-session.
    gg_pre_params: Mutex<Option<gg::PreParams>>,
}

struct SessionSetup {
    session: Session,
    roster: Vec<(PartyIndex, NodeId)>,
    me: PartyIndex,
    engine: SchemeEngine,
    initial: Vec<crate::protocol::Outbound>,
    replay: Vec<ProtocolMessage>,
    /// Inbound messages must carry a valid end-user assertion.
    require_assertions: bool,
}

impl CustodyNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CustodyConfig,
        sessions: Arc<SessionManager>,
        router: Arc<Router>,
        router_events: mpsc::UnboundedReceiver<RouterEvent>,
        store: Arc<dyn ShareStore>,
        gate: Arc<AuthorisationGate>,
        directory: Arc<dyn NodeDirectory>,
    ) -> Arc<Self> {
        let node = Arc::new(CustodyNode {
            node_id: NodeId(config.node_id.clone()),
            config,
            sessions,
            router,
            store,
            gate,
            directory,
            address_codec: Arc::new(OpaqueAddressCodec),
            keys: RwLock::new(HashMap::new()),
            derived: RwLock::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            gg_pre_params: Mutex::new(None),
        });
        node.clone().spawn_router_event_loop(router_events);
        node
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Pump transport envelopes into the node until the channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = inbound.recv().await {
            if let Err(e) = self.handle_envelope(envelope).await {
                warn!(error = %e, "inbound envelope rejected");
            }
        }
    }

    fn spawn_router_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RouterEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    RouterEvent::Unreachable { session_id, peer } => {
                        let _ = self
                            .sessions
                            .fail(session_id, format!("peer {peer} unreachable"))
                            .await;
                        self.finish_waiter(
                            session_id,
                            Err(CustodyError::Unreachable(peer.to_string())),
                        )
                        .await;
                    }
                }
            }
        });
    }

    /// Register key metadata known out of band (tests, wallet import).
    pub async fn install_key_record(&self, record: RootKeyRecord) {
        self.keys.write().await.insert(record.key_id, record);
    }

    /// Install pre-generated GG Paillier material. Operators generate this
    /// ahead of time; DKG then picks it up instead of generating inline.
    pub async fn install_pre_params(&self, pre: gg::PreParams) {
        *self.gg_pre_params.lock().await = Some(pre);
    }

    pub async fn key_record(&self, key_id: KeyId) -> Result<RootKeyRecord> {
        self.keys
            .read()
            .await
            .get(&key_id)
            .cloned()
            .ok_or_else(|| CustodyError::not_found(format!("key {key_id}")))
    }

    // ------------------------------------------------------------------
    // Inbound operations
    // ------------------------------------------------------------------

    /// Run distributed key generation across `participant_nodes` (this node
    /// included). `required_signers` is the user-facing signer count; the
    /// polynomial degree is `required_signers - 1`.
    pub async fn generate_key(
        self: &Arc<Self>,
        curve: Curve,
        scheme: Scheme,
        required_signers: u16,
        participant_nodes: Vec<NodeId>,
    ) -> Result<(KeyId, Vec<u8>, [u8; 32])> {
        if !scheme.supports(curve) {
            return Err(CustodyError::invalid(format!(
                "scheme {scheme} does not support curve {curve}"
            )));
        }
        let threshold = polynomial_degree(required_signers)?;
        if participant_nodes.len() <= threshold as usize {
            return Err(CustodyError::invalid(
                "participant set smaller than required signer count",
            ));
        }
        if !participant_nodes.contains(&self.node_id) {
            return Err(CustodyError::invalid("initiator must be a participant"));
        }

        let key_id = KeyId::fresh();
        let record = RootKeyRecord {
            key_id,
            curve,
            scheme,
            threshold,
            total_participants: participant_nodes.len() as u16,
            public_key: Vec::new(),
            chain_code: [0u8; 32],
            participant_ids: participant_nodes.clone(),
            status: KeyStatus::Pending,
            created_at: Utc::now(),
        };
        self.keys.write().await.insert(key_id, record.clone());

        let roster: Vec<(PartyIndex, NodeId)> = participant_nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (PartyIndex(i as u16 + 1), n.clone()))
            .collect();
        let me = record
            .index_of(&self.node_id)
            .ok_or_else(|| CustodyError::internal("initiator index missing"))?;

        let session = Session {
            session_id: SessionId::fresh(),
            key_id,
            kind: SessionKind::Dkg,
            scheme,
            curve,
            participants: roster.iter().map(|(p, _)| *p).collect(),
            round: 0,
            total_rounds: scheme.dkg_rounds(),
            status: SessionStatus::Pending,
            message_digest: None,
            derivation_path: None,
            result: None,
            created_at: Utc::now(),
            deadline: Utc::now()
                + chrono::Duration::from_std(self.config.dkg_deadline)
                    .unwrap_or_else(|_| chrono::Duration::seconds(600)),
            completed_at: None,
            error_reason: None,
        };

        // Announce before our round-1 traffic so peers can accept it.
        let announce = SessionAnnounce {
            session: session.clone(),
            roster: roster.clone(),
            threshold,
            attested: false,
        };
        for (index, node) in &roster {
            if *index != me {
                self.router
                    .send_control(
                        session.session_id,
                        node,
                        WireFrame::Announce(announce.clone()),
                    )
                    .await?;
            }
        }

        let rx = self.start_session(session.clone(), roster, me, None, false).await?;
        match self.await_session(session.session_id, rx).await? {
            SessionResult::PublicKey { public_key, chain_code } => {
                Ok((key_id, public_key, chain_code))
            }
            SessionResult::Signature(_) => {
                Err(CustodyError::internal("DKG session produced a signature"))
            }
        }
    }

    /// Derive a non-hardened child public key and its chain address. Pure
    /// public-material computation; no session, no share access.
    pub async fn derive_address(&self, key_id: KeyId, path: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let record = self.key_record(key_id).await?;
        if record.status != KeyStatus::Active {
            return Err(CustodyError::invalid(format!("key {key_id} is not active")));
        }
        let indices = derive::parse_path(path)?;
        let (public_key, chain_code) =
            derive::derive_public(record.curve, &record.public_key, &record.chain_code, &indices)?;
        let address = self.address_codec.address(record.curve, &public_key);

        let derived = DerivedKeyRecord {
            wallet_id: Uuid::new_v4(),
            parent_key_id: key_id,
            path: indices,
            public_key: public_key.clone(),
            chain_code,
            address: address.clone(),
        };
        self.derived
            .write()
            .await
            .insert((key_id, path.to_string()), derived);
        Ok((public_key, address))
    }

    /// Threshold-sign `message` after the authorisation gate admits the
    /// request. With a derivation path, the transient child bundle is
    /// derived at sign time and discarded afterwards.
    pub async fn sign(
        self: &Arc<Self>,
        key_id: KeyId,
        message: &[u8],
        assertions: &[AuthAssertion],
        path: Option<&str>,
    ) -> Result<Vec<u8>> {
        let digest: [u8; 32] = Sha256::digest(message).into();

        // Policy first: a denied request never reaches the engine and
        // leaves no WAL entry.
        self.gate.require(key_id, &digest, assertions).await?;

        let record = self.key_record(key_id).await?;
        if record.status != KeyStatus::Active {
            return Err(CustodyError::invalid(format!("key {key_id} is not active")));
        }
        let me = record
            .index_of(&self.node_id)
            .ok_or_else(|| CustodyError::invalid("this node holds no share of the key"))?;

        let path_indices = match path {
            Some(p) => Some(derive::parse_path(p)?),
            None => None,
        };

        let signer_roster = self.choose_signers(&record, me).await?;
        let session = Session {
            session_id: SessionId::fresh(),
            key_id,
            kind: if path_indices.is_some() {
                SessionKind::DeriveAndSign
            } else {
                SessionKind::Sign
            },
            scheme: record.scheme,
            curve: record.curve,
            participants: signer_roster.iter().map(|(p, _)| *p).collect(),
            round: 0,
            total_rounds: record.scheme.sign_rounds(),
            status: SessionStatus::Pending,
            message_digest: Some(digest.to_vec()),
            derivation_path: path.map(str::to_string),
            result: None,
            created_at: Utc::now(),
            deadline: Utc::now()
                + chrono::Duration::from_std(self.config.sign_deadline)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            completed_at: None,
            error_reason: None,
        };

        // 2-of-2 topologies carry the end-user assertion on every message
        // of the client leg; the receiving node re-validates it.
        let attested = signer_roster.len() == 2 && !assertions.is_empty();
        let assertion_bytes = if attested {
            Some(
                bincode::serialize(&assertions[0])
                    .map_err(|e| CustodyError::internal(format!("encode assertion: {e}")))?,
            )
        } else {
            None
        };

        let announce = SessionAnnounce {
            session: session.clone(),
            roster: signer_roster.clone(),
            threshold: record.threshold,
            attested,
        };
        for (index, node) in &signer_roster {
            if *index != me {
                self.router
                    .send_control(
                        session.session_id,
                        node,
                        WireFrame::Announce(announce.clone()),
                    )
                    .await?;
            }
        }

        let rx = self
            .start_session(session.clone(), signer_roster, me, assertion_bytes, false)
            .await?;
        match self.await_session(session.session_id, rx).await? {
            SessionResult::Signature(signature) => Ok(signature),
            SessionResult::PublicKey { .. } => {
                Err(CustodyError::internal("sign session produced a public key"))
            }
        }
    }

    /// Cancel a session: terminal, cooperative, router traffic dropped.
    pub async fn cancel(&self, session_id: SessionId) -> Result<()> {
        self.sessions.cancel(session_id).await?;
        self.router.deregister_session(session_id).await;
        self.finish_waiter(session_id, Err(CustodyError::invalid("session cancelled"))).await;
        Ok(())
    }

    /// Rebuild and resume every non-terminal session from the WAL.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let recovered = self.sessions.recover().await?;
        let grace = self.config.unreachable_grace;
        let count = recovered.len();
        for RecoveredSession { session, init, inbound } in recovered {
            if Utc::now() > session.deadline {
                self.sessions
                    .fail(session.session_id, "timeout: session deadline exceeded".to_string())
                    .await?;
                continue;
            }
            match self.resume_session(session.clone(), init, inbound).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(session = %session.session_id, error = %e, "recovery failed");
                    // Peers may simply be gone after a long outage.
                    let sessions = Arc::clone(&self.sessions);
                    let id = session.session_id;
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        let _ = sessions.fail(id, "unreachable after recovery".to_string()).await;
                    });
                }
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Inbound envelopes
    // ------------------------------------------------------------------

    pub async fn handle_envelope(self: &Arc<Self>, envelope: Envelope) -> Result<()> {
        match envelope.frame {
            WireFrame::Announce(announce) => self.accept_announce(envelope.from_node, announce).await,
            WireFrame::Protocol(message) => {
                self.accept_protocol(envelope.from_node, message).await
            }
        }
    }

    async fn accept_protocol(
        self: &Arc<Self>,
        from_node: NodeId,
        message: ProtocolMessage,
    ) -> Result<()> {
        let session_id = message.session_id;
        match self.router.handle_inbound(&from_node, message).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_terminal() => {
                let reason = e.to_string();
                let _ = self.sessions.fail(session_id, reason).await;
                self.router.deregister_session(session_id).await;
                self.finish_waiter(session_id, Err(e)).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn accept_announce(
        self: &Arc<Self>,
        from_node: NodeId,
        announce: SessionAnnounce,
    ) -> Result<()> {
        let session = announce.session.clone();
        // Only a session participant may announce to us.
        if !announce.roster.iter().any(|(_, n)| *n == from_node) {
            return Err(CustodyError::AuthDenied(format!(
                "announce from non-participant {from_node}"
            )));
        }
        let me = announce
            .roster
            .iter()
            .find(|(_, n)| *n == self.node_id)
            .map(|(p, _)| *p)
            .ok_or_else(|| {
                CustodyError::invalid("announced session does not include this node")
            })?;

        if session.kind == SessionKind::Dkg {
            // First sight of the key: record it Pending.
            let mut keys = self.keys.write().await;
            keys.entry(session.key_id).or_insert_with(|| RootKeyRecord {
                key_id: session.key_id,
                curve: session.curve,
                scheme: session.scheme,
                threshold: announce.threshold,
                total_participants: announce.roster.len() as u16,
                public_key: Vec::new(),
                chain_code: [0u8; 32],
                participant_ids: announce.roster.iter().map(|(_, n)| n.clone()).collect(),
                status: KeyStatus::Pending,
                created_at: Utc::now(),
            });
        }

        info!(session = %session.session_id, kind = ?session.kind, "joining announced session");
        // On the client-attested leg only the client side attaches the
        // assertion; this side re-validates every inbound message.
        let rx = self
            .start_session(session, announce.roster, me, None, announce.attested)
            .await?;
        // Peers have no caller to hand the result to; the task finishes the
        // session on its own.
        drop(rx);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session machinery
    // ------------------------------------------------------------------

    async fn choose_signers(
        &self,
        record: &RootKeyRecord,
        me: PartyIndex,
    ) -> Result<Vec<(PartyIndex, NodeId)>> {
        let want = record.threshold as usize + 1;
        let mut roster: Vec<(PartyIndex, NodeId)> = vec![(
            me,
            self.node_id.clone(),
        )];

        // Prefer peers discovery currently reports healthy; tolerate a
        // stale or empty directory by falling back to the key's roster.
        let discovered = self
            .directory
            .discover(NodeRole::Signer)
            .await
            .ok()
            .and_then(|records| select_signers(&records, want.saturating_sub(1)).ok())
            .map(|records| {
                records
                    .into_iter()
                    .map(|r| r.node_id)
                    .collect::<std::collections::HashSet<_>>()
            });

        for (i, node) in record.participant_ids.iter().enumerate() {
            if roster.len() == want {
                break;
            }
            let index = PartyIndex(i as u16 + 1);
            if index == me {
                continue;
            }
            if let Some(healthy) = &discovered {
                if !healthy.contains(node) {
                    continue;
                }
            }
            roster.push((index, node.clone()));
        }
        if roster.len() < want {
            // Retry ignoring discovery; consumers tolerate staleness.
            for (i, node) in record.participant_ids.iter().enumerate() {
                if roster.len() == want {
                    break;
                }
                let index = PartyIndex(i as u16 + 1);
                if roster.iter().any(|(p, _)| *p == index) {
                    continue;
                }
                roster.push((index, node.clone()));
            }
        }
        if roster.len() < want {
            return Err(CustodyError::Unreachable(format!(
                "cannot assemble {want} signers for key {}",
                record.key_id
            )));
        }
        roster.sort_by_key(|(p, _)| p.0);
        Ok(roster)
    }

    async fn engine_init_for(&self, scheme: Scheme, kind: SessionKind) -> Result<EngineInit> {
        let needs_paillier =
            matches!(scheme, Scheme::Gg18 | Scheme::Gg20) && kind == SessionKind::Dkg;
        let pre = if needs_paillier {
            let mut cached = self.gg_pre_params.lock().await;
            if cached.is_none() {
                let bits = self.config.paillier_bits;
                info!(bits, "generating GG pre-parameters");
                let generated =
                    tokio::task::spawn_blocking(move || gg::generate_pre_params(bits))
                        .await
                        .map_err(|e| CustodyError::internal(format!("pre-param task: {e}")))??;
                *cached = Some(generated);
            }
            cached.clone()
        } else {
            None
        };
        Ok(EngineInit::random(pre))
    }

    /// Build the engine for a session from its metadata and local state.
    async fn build_engine(
        &self,
        session: &Session,
        me: PartyIndex,
        init: EngineInit,
    ) -> Result<(SchemeEngine, Vec<crate::protocol::Outbound>)> {
        let max_pending = self.config.max_pending_future_round_messages;
        match session.kind {
            SessionKind::Dkg => SchemeEngine::begin_dkg(
                session.curve,
                session.scheme,
                me,
                &session.participants,
                self.key_record(session.key_id).await?.threshold,
                max_pending,
                init,
            ),
            SessionKind::Sign | SessionKind::DeriveAndSign => {
                let record = self.key_record(session.key_id).await?;
                let mut bundle: LocalShareBundle = self.store.get(session.key_id, me).await?;
                if let Some(path) = &session.derivation_path {
                    let indices = derive::parse_path(path)?;
                    let (derived, _) =
                        protocol::derive_bundle(&bundle, &record.chain_code, &indices)?;
                    bundle = derived;
                }
                let digest: [u8; 32] = session
                    .message_digest
                    .as_deref()
                    .and_then(|d| d.try_into().ok())
                    .ok_or_else(|| {
                        CustodyError::invalid("sign session lacks a 32-byte message digest")
                    })?;
                SchemeEngine::begin_sign(
                    bundle,
                    digest,
                    &session.participants,
                    me,
                    max_pending,
                    init,
                )
            }
        }
    }

    async fn start_session(
        self: &Arc<Self>,
        session: Session,
        roster: Vec<(PartyIndex, NodeId)>,
        me: PartyIndex,
        outbound_assertion: Option<Vec<u8>>,
        require_assertions: bool,
    ) -> Result<oneshot::Receiver<Result<SessionResult>>> {
        let init = self.engine_init_for(session.scheme, session.kind).await?;
        let (engine, initial) = self.build_engine(&session, me, init.clone()).await?;
        self.sessions.create(session.clone(), &init).await?;

        let (done_tx, done_rx) = oneshot::channel();
        self.waiters.lock().await.insert(session.session_id, done_tx);

        // Register before the task runs so its first sends find the route;
        // registration also drains messages that raced ahead of the
        // announcement into the delivery channel.
        let (delivery_tx, delivery_rx) = mpsc::channel(self.config.receive_window as usize * 4);
        self.router
            .register_session(session.session_id, me, roster.clone(), delivery_tx, outbound_assertion)
            .await;

        let setup = SessionSetup {
            session: session.clone(),
            roster,
            me,
            engine,
            initial,
            replay: Vec::new(),
            require_assertions,
        };
        self.clone().spawn_session_task(setup, delivery_rx);
        Ok(done_rx)
    }

    async fn resume_session(
        self: &Arc<Self>,
        session: Session,
        init: EngineInit,
        replay: Vec<ProtocolMessage>,
    ) -> Result<()> {
        let record = self.key_record(session.key_id).await;
        let roster: Vec<(PartyIndex, NodeId)> = match record {
            Ok(record) => session
                .participants
                .iter()
                .filter_map(|p| {
                    record
                        .participant_ids
                        .get(p.0 as usize - 1)
                        .map(|n| (*p, n.clone()))
                })
                .collect(),
            Err(e) => return Err(e),
        };
        let me = roster
            .iter()
            .find(|(_, n)| *n == self.node_id)
            .map(|(p, _)| *p)
            .ok_or_else(|| CustodyError::internal("recovered session excludes this node"))?;

        let (engine, initial) = self.build_engine(&session, me, init).await?;

        let (delivery_tx, delivery_rx) = mpsc::channel(self.config.receive_window as usize * 4);
        self.router
            .register_session(session.session_id, me, roster.clone(), delivery_tx, None)
            .await;
        let setup = SessionSetup {
            session: session.clone(),
            roster,
            me,
            engine,
            initial,
            replay,
            require_assertions: false,
        };
        self.clone().spawn_session_task(setup, delivery_rx);
        Ok(())
    }

    fn spawn_session_task(
        self: Arc<Self>,
        setup: SessionSetup,
        mut delivery: mpsc::Receiver<ProtocolMessage>,
    ) {
        tokio::spawn(async move {
            let SessionSetup {
                session,
                roster: _,
                me,
                mut engine,
                initial,
                replay,
                require_assertions,
            } = setup;
            let session_id = session.session_id;
            let deadline = session.deadline;
            let digest_bytes = session.message_digest.clone().unwrap_or_default();
            let round_deadline = self.config.round_deadline;

            // Re-send the initial round; receivers dedupe on sequence.
            if let Err(e) = self.router.send_outbound(session_id, initial).await {
                self.terminate(session_id, Err(e)).await;
                return;
            }

            // Crash recovery: replay WAL-recorded messages straight into
            // the engine, re-deriving outbound traffic deterministically.
            for message in replay {
                let inbound = Inbound {
                    from: message.from,
                    round: message.round,
                    sequence: message.sequence,
                    payload: message.payload,
                };
                match engine.handle(inbound) {
                    Ok(output) => {
                        if self
                            .flush_engine_output(session_id, me, output)
                            .await
                            .is_none()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        self.terminate(session_id, Err(e)).await;
                        return;
                    }
                }
            }

            let mut round_started = Instant::now();
            let mut current_round = engine.current_round();
            loop {
                let session_deadline = deadline.signed_duration_since(Utc::now());
                let session_left = session_deadline
                    .to_std()
                    .unwrap_or_else(|_| Duration::from_secs(0));
                let round_left = round_deadline
                    .checked_sub(round_started.elapsed())
                    .unwrap_or_default();
                let wait = session_left.min(round_left);

                let message = tokio::select! {
                    maybe = delivery.recv() => match maybe {
                        Some(message) => message,
                        None => return, // router dropped us (cancelled)
                    },
                    _ = tokio::time::sleep(wait) => {
                        let reason = if session_left <= round_left {
                            "timeout: session deadline exceeded"
                        } else {
                            "timeout: round deadline exceeded"
                        };
                        self.terminate(session_id, Err(CustodyError::Timeout(reason.into())))
                            .await;
                        return;
                    }
                };

                // Client-attested leg: re-validate the accompanying
                // assertion before the engine can observe the payload.
                if require_assertions {
                    let valid = match message.assertion.as_deref() {
                        Some(bytes) => match bincode::deserialize::<AuthAssertion>(bytes) {
                            Ok(assertion) => self
                                .gate
                                .require(session.key_id, &digest_bytes, &[assertion])
                                .await
                                .is_ok(),
                            Err(_) => false,
                        },
                        None => false,
                    };
                    if !valid {
                        warn!(session = %session_id, from = message.from.0,
                              "dropping message without a valid assertion");
                        continue;
                    }
                }

                // Durable before the engine observes it.
                if let Err(e) = self.sessions.record_inbound(session_id, &message).await {
                    self.terminate(session_id, Err(e)).await;
                    return;
                }
                let inbound = Inbound {
                    from: message.from,
                    round: message.round,
                    sequence: message.sequence,
                    payload: message.payload,
                };
                match engine.handle(inbound) {
                    Ok(output) => {
                        match self.flush_engine_output(session_id, me, output).await {
                            Some(()) => {}
                            None => return,
                        }
                        // Project round progress after the WAL record.
                        if engine.current_round() > current_round {
                            for round in (current_round + 1)..=engine.current_round() {
                                let _ = self.sessions.advance_round(session_id, round).await;
                            }
                            current_round = engine.current_round();
                            round_started = Instant::now();
                        }
                    }
                    Err(e) => {
                        self.terminate(session_id, Err(e)).await;
                        return;
                    }
                }
            }
        });
    }

    /// Send outbound traffic and handle completion. Returns `None` once the
    /// session reached a terminal state.
    async fn flush_engine_output(
        self: &Arc<Self>,
        session_id: SessionId,
        me: PartyIndex,
        output: crate::protocol::EngineOutput,
    ) -> Option<()> {
        if !output.outbound.is_empty() {
            if let Err(e) = self.router.send_outbound(session_id, output.outbound).await {
                self.terminate(session_id, Err(e)).await;
                return None;
            }
        }

        if let Some(result) = output.result {
            let outcome = self.complete_result(session_id, me, result).await;
            match outcome {
                Ok(session_result) => {
                    let _ = self.sessions.complete(session_id, session_result.clone()).await;
                    self.router.deregister_session(session_id).await;
                    self.finish_waiter(session_id, Ok(session_result)).await;
                }
                Err(e) => {
                    self.terminate(session_id, Err(e)).await;
                }
            }
            return None;
        }
        Some(())
    }

    /// Post-completion bookkeeping: persist DKG shares, activate keys.
    async fn complete_result(
        self: &Arc<Self>,
        session_id: SessionId,
        me: PartyIndex,
        result: ProtocolResult,
    ) -> Result<SessionResult> {
        match result {
            ProtocolResult::Dkg(dkg) => {
                let DkgResult { bundle, group_public_key, chain_code } = *dkg;
                let session = self.sessions.get(session_id).await?;
                self.store.put(session.key_id, me, &bundle).await?;
                {
                    let mut keys = self.keys.write().await;
                    if let Some(record) = keys.get_mut(&session.key_id) {
                        record.public_key = group_public_key.clone();
                        record.chain_code = chain_code;
                        record.status = KeyStatus::Active;
                    }
                }
                info!(session = %session_id, key = %session.key_id, "key active after DKG");
                Ok(SessionResult::PublicKey { public_key: group_public_key, chain_code })
            }
            ProtocolResult::Sign(sign) => Ok(SessionResult::Signature(sign.signature)),
        }
    }

    async fn terminate(self: &Arc<Self>, session_id: SessionId, error: Result<SessionResult>) {
        if let Err(e) = &error {
            let _ = self.sessions.fail(session_id, e.to_string()).await;
        }
        self.router.deregister_session(session_id).await;
        self.finish_waiter(session_id, error).await;
    }

    async fn finish_waiter(&self, session_id: SessionId, result: Result<SessionResult>) {
        if let Some(waiter) = self.waiters.lock().await.remove(&session_id) {
            let _ = waiter.send(result);
        }
    }

    async fn await_session(
        &self,
        session_id: SessionId,
        rx: oneshot::Receiver<Result<SessionResult>>,
    ) -> Result<SessionResult> {
        match rx.await {
            Ok(result) => result,
            Err(_) => {
                debug!(session = %session_id, "session task dropped its waiter");
                Err(CustodyError::internal("session task aborted"))
            }
        }
    }
}
