//! Wire transport between custody nodes.
//!
//! Frames are length-prefixed bincode. Channel authenticity is a
//! precondition of the router: in production deployments the TCP listener
//! sits behind mutual TLS and the accepted channel binds the claimed sender
//! to the peer certificate. The in-process hub exists for multi-party tests
//! and single-process topologies.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{CustodyError, Result};
use crate::types::{NodeId, PartyIndex, ProtocolMessage, Session};

/// Announcement of a session by the orchestrating node: each peer creates
/// its own local `Session` with identical id, kind and participant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnnounce {
    pub session: Session,
    /// Share index to node mapping for the whole participant set.
    pub roster: Vec<(PartyIndex, NodeId)>,
    /// Polynomial degree of the key being generated or used.
    pub threshold: u16,
    /// Whether each protocol message must carry an end-user assertion.
    pub attested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireFrame {
    Announce(SessionAnnounce),
    Protocol(ProtocolMessage),
}

/// A frame plus the transport-authenticated sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from_node: NodeId,
    pub frame: WireFrame,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &NodeId, envelope: Envelope) -> Result<()>;
}

/// In-process transport hub: every registered node gets a receive queue and
/// sends resolve to direct queue pushes.
#[derive(Default)]
pub struct LoopbackHub {
    nodes: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(LoopbackHub::default())
    }

    pub fn register(self: &Arc<Self>, node: NodeId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.lock().expect("hub lock").insert(node, tx);
        rx
    }

    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(LoopbackTransport { hub: Arc::clone(self) })
    }
}

struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, to: &NodeId, envelope: Envelope) -> Result<()> {
        let sender = {
            let nodes = self.hub.nodes.lock().expect("hub lock");
            nodes.get(to).cloned()
        };
        match sender {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| CustodyError::Unreachable(to.to_string())),
            None => Err(CustodyError::Unreachable(to.to_string())),
        }
    }
}

/// Direct TCP transport: one length-prefixed frame per connection.
pub struct TcpTransport {
    peers: Mutex<HashMap<NodeId, SocketAddr>>,
}

impl TcpTransport {
    pub fn new(peers: HashMap<NodeId, SocketAddr>) -> Arc<Self> {
        Arc::new(TcpTransport { peers: Mutex::new(peers) })
    }

    pub fn set_peer(&self, node: NodeId, addr: SocketAddr) {
        self.peers.lock().expect("peer map lock").insert(node, addr);
    }

    /// Accept loop: feed every decoded envelope into `deliveries`.
    pub async fn serve(listener: TcpListener, deliveries: mpsc::Sender<Envelope>) {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "transport accept failed");
                    continue;
                }
            };
            let deliveries = deliveries.clone();
            tokio::spawn(async move {
                match read_frame(stream).await {
                    Ok(envelope) => {
                        if deliveries.send(envelope).await.is_err() {
                            warn!("transport delivery queue closed");
                        }
                    }
                    Err(e) => debug!(peer = %peer_addr, error = %e, "dropped malformed frame"),
                }
            });
        }
    }
}

async fn read_frame(mut stream: TcpStream) -> Result<Envelope> {
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(CustodyError::invalid(format!("oversized frame: {len} bytes")));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| CustodyError::invalid(format!("malformed frame: {e}")))
}

/// Upper bound on a single wire frame; GG MtA payloads with 2048-bit
/// Paillier material stay well below this.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, to: &NodeId, envelope: Envelope) -> Result<()> {
        let addr = {
            let peers = self.peers.lock().expect("peer map lock");
            peers
                .get(to)
                .copied()
                .ok_or_else(|| CustodyError::Unreachable(to.to_string()))?
        };
        let payload = bincode::serialize(&envelope)
            .map_err(|e| CustodyError::internal(format!("encode frame: {e}")))?;

        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|_| CustodyError::Unreachable(to.to_string()))?;
        stream.write_u32(payload.len() as u32).await?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
