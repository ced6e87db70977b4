//! Message router: delivers protocol messages to the engine of the
//! destination session.
//!
//! Contracts: per (session, sender) ascending-sequence delivery with a
//! bounded reorder window, at-most-once suppression of duplicates,
//! broadcast fan-out into bounded per-peer outbound queues with
//! `Congested(peer)` on overflow, discard of self-addressed messages, and
//! bounded transport retries before a peer is declared unreachable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{AbortKind, CustodyError, ProtocolAbort, Result};
use crate::metrics::{inc, METRICS};
use crate::protocol::Outbound;
use crate::transport::{Envelope, Transport, WireFrame};
use crate::types::{NodeId, PartyIndex, ProtocolMessage, SessionId};

/// Events the router reports upward to the session owner.
#[derive(Debug)]
pub enum RouterEvent {
    /// Transport gave up on a peer after its bounded retries.
    Unreachable { session_id: SessionId, peer: NodeId },
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Reorder window per (session, sender).
    pub receive_window: u32,
    /// Bound of each per-peer outbound queue.
    pub outbound_queue: usize,
    /// Transport send attempts before `Unreachable`.
    pub send_attempts: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig { receive_window: 64, outbound_queue: 256, send_attempts: 3 }
    }
}

struct SenderState {
    next_sequence: u32,
    last_round: u32,
    pending: BTreeMap<u32, ProtocolMessage>,
}

struct SessionRoute {
    me: PartyIndex,
    roster: Vec<(PartyIndex, NodeId)>,
    delivery: mpsc::Sender<ProtocolMessage>,
    next_out_sequence: u32,
    senders: HashMap<u16, SenderState>,
    /// Assertion bytes attached to every outbound message when this session
    /// runs a client-attested leg.
    outbound_assertion: Option<Vec<u8>>,
}

impl SessionRoute {
    fn node_of(&self, index: PartyIndex) -> Option<&NodeId> {
        self.roster.iter().find(|(p, _)| *p == index).map(|(_, n)| n)
    }
}

/// Per-peer outbound queue entry.
struct PeerQueue {
    tx: mpsc::Sender<(SessionId, Envelope)>,
}

pub struct Router {
    local_node: NodeId,
    transport: Arc<dyn Transport>,
    config: RouterConfig,
    sessions: Mutex<HashMap<SessionId, SessionRoute>>,
    peers: Mutex<HashMap<NodeId, PeerQueue>>,
    /// Messages that raced ahead of their session registration.
    orphans: Mutex<HashMap<SessionId, Vec<(NodeId, ProtocolMessage)>>>,
    events: mpsc::UnboundedSender<RouterEvent>,
}

/// Bounds for the orphan buffer; announcements normally land first, so
/// these only absorb short races.
const MAX_ORPHAN_SESSIONS: usize = 128;
const MAX_ORPHANS_PER_SESSION: usize = 256;

impl Router {
    pub fn new(
        local_node: NodeId,
        transport: Arc<dyn Transport>,
        config: RouterConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RouterEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Router {
            local_node,
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            orphans: Mutex::new(HashMap::new()),
            events,
        });
        (router, events_rx)
    }

    /// Register a session; inbound messages are delivered, in order, to
    /// `delivery`. Messages that raced ahead of registration are replayed
    /// through the normal inbound path.
    pub async fn register_session(
        &self,
        session_id: SessionId,
        me: PartyIndex,
        roster: Vec<(PartyIndex, NodeId)>,
        delivery: mpsc::Sender<ProtocolMessage>,
        outbound_assertion: Option<Vec<u8>>,
    ) {
        let route = SessionRoute {
            me,
            roster,
            delivery,
            next_out_sequence: 0,
            senders: HashMap::new(),
            outbound_assertion,
        };
        self.sessions.lock().await.insert(session_id, route);

        let held = self.orphans.lock().await.remove(&session_id).unwrap_or_default();
        for (from_node, msg) in held {
            if let Err(e) = self.handle_inbound(&from_node, msg).await {
                warn!(session = %session_id, error = %e, "orphaned message rejected on replay");
            }
        }
    }

    /// Drop a session; further traffic for it is discarded.
    pub async fn deregister_session(&self, session_id: SessionId) {
        self.sessions.lock().await.remove(&session_id);
    }

    /// Inbound path. The transport has already authenticated `from_node`;
    /// the router additionally pins the claimed share index to that node.
    pub async fn handle_inbound(&self, from_node: &NodeId, msg: ProtocolMessage) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(route) = sessions.get_mut(&msg.session_id) else {
            drop(sessions);
            // Hold messages that raced ahead of the session announcement.
            let mut orphans = self.orphans.lock().await;
            if orphans.len() < MAX_ORPHAN_SESSIONS {
                let held = orphans.entry(msg.session_id).or_default();
                if held.len() < MAX_ORPHANS_PER_SESSION {
                    held.push((from_node.clone(), msg));
                    return Ok(());
                }
            }
            debug!(session = %msg.session_id, "message for unknown session dropped");
            return Ok(());
        };

        // Self-addressed messages are discarded.
        if msg.from == route.me {
            return Ok(());
        }
        match route.node_of(msg.from) {
            Some(node) if node == from_node => {}
            _ => {
                return Err(CustodyError::from(ProtocolAbort::blaming(
                    AbortKind::MaliciousPeer,
                    msg.from,
                )));
            }
        }
        if let Some(to) = msg.to {
            if to != route.me {
                // Misdelivered unicast; not ours.
                return Ok(());
            }
        }

        let state = route.senders.entry(msg.from.0).or_insert_with(|| SenderState {
            next_sequence: 0,
            last_round: 0,
            pending: BTreeMap::new(),
        });

        // At-most-once on (session, from, sequence).
        if msg.sequence < state.next_sequence || state.pending.contains_key(&msg.sequence) {
            inc(&METRICS.messages_deduplicated);
            return Ok(());
        }
        if msg.sequence - state.next_sequence >= self.config.receive_window {
            return Err(CustodyError::from(ProtocolAbort::blaming(
                AbortKind::PeerMisbehaving,
                msg.from,
            )));
        }
        state.pending.insert(msg.sequence, msg);

        // Deliver the in-order prefix.
        let mut ready = Vec::new();
        while let Some(next) = state.pending.remove(&state.next_sequence) {
            if next.round < state.last_round {
                return Err(CustodyError::from(ProtocolAbort::blaming(
                    AbortKind::PeerMisbehaving,
                    next.from,
                )));
            }
            state.last_round = next.round;
            state.next_sequence += 1;
            ready.push(next);
        }
        let delivery = route.delivery.clone();
        drop(sessions);

        for m in ready {
            inc(&METRICS.messages_routed);
            delivery
                .send(m)
                .await
                .map_err(|_| CustodyError::internal("session delivery queue closed"))?;
        }
        Ok(())
    }

    /// Outbound path: stamp sequences, fan broadcasts out to every peer's
    /// bounded queue, and report `Congested` on overflow.
    pub async fn send_outbound(
        self: &Arc<Self>,
        session_id: SessionId,
        outbound: Vec<Outbound>,
    ) -> Result<()> {
        let mut staged: Vec<(NodeId, Envelope)> = Vec::new();
        {
            let mut sessions = self.sessions.lock().await;
            let route = sessions
                .get_mut(&session_id)
                .ok_or_else(|| CustodyError::not_found(format!("session {session_id}")))?;

            for item in outbound {
                let sequence = route.next_out_sequence;
                route.next_out_sequence += 1;
                let message = ProtocolMessage {
                    session_id,
                    round: item.round,
                    from: route.me,
                    to: item.to,
                    sequence,
                    payload: item.payload,
                    assertion: route.outbound_assertion.clone(),
                };

                let targets: Vec<NodeId> = match item.to {
                    Some(to) if to == route.me => continue,
                    Some(to) => {
                        let node = route.node_of(to).ok_or_else(|| {
                            CustodyError::invalid(format!("unknown recipient index {to}"))
                        })?;
                        vec![node.clone()]
                    }
                    // Broadcast: copy the payload to each peer's queue.
                    None => route
                        .roster
                        .iter()
                        .filter(|(p, _)| *p != route.me)
                        .map(|(_, n)| n.clone())
                        .collect(),
                };
                for node in targets {
                    staged.push((
                        node,
                        Envelope {
                            from_node: self.local_node.clone(),
                            frame: WireFrame::Protocol(message.clone()),
                        },
                    ));
                }
            }
        }

        for (node, envelope) in staged {
            self.enqueue(session_id, node, envelope).await?;
        }
        Ok(())
    }

    /// Send a non-protocol frame (session announcements) with the same
    /// bounded retry policy, bypassing the per-session sequencing.
    pub async fn send_control(
        self: &Arc<Self>,
        session_id: SessionId,
        to: &NodeId,
        frame: WireFrame,
    ) -> Result<()> {
        let envelope = Envelope { from_node: self.local_node.clone(), frame };
        self.enqueue(session_id, to.clone(), envelope).await
    }

    async fn enqueue(self: &Arc<Self>, session_id: SessionId, node: NodeId, envelope: Envelope) -> Result<()> {
        let tx = {
            let mut peers = self.peers.lock().await;
            match peers.get(&node) {
                Some(queue) => queue.tx.clone(),
                None => {
                    let (tx, rx) = mpsc::channel(self.config.outbound_queue);
                    peers.insert(node.clone(), PeerQueue { tx: tx.clone() });
                    self.spawn_peer_pump(node.clone(), rx);
                    tx
                }
            }
        };
        tx.try_send((session_id, envelope)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(peer = %node, "outbound queue overflow");
                CustodyError::Congested(node.to_string())
            }
            mpsc::error::TrySendError::Closed(_) => CustodyError::Unreachable(node.to_string()),
        })
    }

    fn spawn_peer_pump(
        self: &Arc<Self>,
        node: NodeId,
        mut rx: mpsc::Receiver<(SessionId, Envelope)>,
    ) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((session_id, envelope)) = rx.recv().await {
                let mut delivered = false;
                for attempt in 0..router.config.send_attempts {
                    match router.transport.send(&node, envelope.clone()).await {
                        Ok(()) => {
                            delivered = true;
                            break;
                        }
                        Err(e) => {
                            debug!(peer = %node, attempt, error = %e, "transport send failed");
                            tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
                        }
                    }
                }
                if !delivered {
                    let _ = router
                        .events
                        .send(RouterEvent::Unreachable { session_id, peer: node.clone() });
                }
            }
        });
    }
}

impl Router {
    /// Test/introspection helper: number of live peer queues.
    pub async fn peer_queue_count(&self) -> usize {
        self.peers.lock().await.len()
    }
}
