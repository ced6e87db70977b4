//! Node directory adapter: a thin, stable interface over an external
//! discovery mechanism, with a TTL-bounded cache. Consumers tolerate
//! transient inconsistency.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::{CustodyError, Result};
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Coordinator,
    Signer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Passing,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodePurpose {
    Signing,
    Backup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub endpoint: String,
    pub status: NodeStatus,
    pub purpose: NodePurpose,
}

#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Discover nodes by role. Implementations return only records they
    /// currently believe healthy; callers still filter on `status`.
    async fn discover(&self, role: NodeRole) -> Result<Vec<NodeRecord>>;
    async fn register(&self, record: NodeRecord) -> Result<()>;
    async fn deregister(&self, node_id: &NodeId) -> Result<()>;
}

/// Pick signing-capable nodes, preferring `Signing` purpose over `Backup`.
pub fn select_signers(records: &[NodeRecord], count: usize) -> Result<Vec<NodeRecord>> {
    let mut passing: Vec<&NodeRecord> =
        records.iter().filter(|r| r.status == NodeStatus::Passing).collect();
    passing.sort_by_key(|r| match r.purpose {
        NodePurpose::Signing => 0,
        NodePurpose::Backup => 1,
    });
    if passing.len() < count {
        return Err(CustodyError::Unreachable(format!(
            "need {count} signer nodes, discovery returned {}",
            passing.len()
        )));
    }
    Ok(passing.into_iter().take(count).cloned().collect())
}

/// DNS-backed directory: resolves a headless service name to node
/// endpoints, the way cluster deployments expose signer pods. Registration
/// is managed by the orchestrator, so `register`/`deregister` are no-ops.
pub struct DnsDirectory {
    resolver: TokioAsyncResolver,
    service_name: String,
    port: u16,
}

impl DnsDirectory {
    pub fn new(service_name: impl Into<String>, port: u16) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        DnsDirectory { resolver, service_name: service_name.into(), port }
    }
}

#[async_trait]
impl NodeDirectory for DnsDirectory {
    async fn discover(&self, _role: NodeRole) -> Result<Vec<NodeRecord>> {
        let response = self
            .resolver
            .lookup_ip(self.service_name.as_str())
            .await
            .map_err(|e| CustodyError::Unreachable(format!("discovery lookup failed: {e}")))?;

        let mut records = Vec::new();
        for ip in response.iter() {
            let endpoint = format!("{ip}:{}", self.port);
            records.push(NodeRecord {
                node_id: NodeId(endpoint.clone()),
                role: NodeRole::Signer,
                endpoint,
                status: NodeStatus::Passing,
                purpose: NodePurpose::Signing,
            });
        }
        debug!(count = records.len(), service = %self.service_name, "discovered signer nodes");
        Ok(records)
    }

    async fn register(&self, _record: NodeRecord) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, _node_id: &NodeId) -> Result<()> {
        Ok(())
    }
}

/// Static in-memory directory for tests and fixed topologies.
#[derive(Default)]
pub struct StaticDirectory {
    records: Mutex<Vec<NodeRecord>>,
}

impl StaticDirectory {
    pub fn new(records: Vec<NodeRecord>) -> Self {
        StaticDirectory { records: Mutex::new(records) }
    }
}

#[async_trait]
impl NodeDirectory for StaticDirectory {
    async fn discover(&self, role: NodeRole) -> Result<Vec<NodeRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect())
    }

    async fn register(&self, record: NodeRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.retain(|r| r.node_id != record.node_id);
        records.push(record);
        Ok(())
    }

    async fn deregister(&self, node_id: &NodeId) -> Result<()> {
        self.records.lock().await.retain(|r| &r.node_id != node_id);
        Ok(())
    }
}

/// TTL cache in front of any directory. The staleness bound is the
/// configured discovery TTL.
pub struct CachedDirectory<D: NodeDirectory> {
    inner: D,
    ttl: Duration,
    cache: Mutex<HashMap<NodeRole, (Instant, Vec<NodeRecord>)>>,
}

impl<D: NodeDirectory> CachedDirectory<D> {
    pub fn new(inner: D, ttl: Duration) -> Self {
        CachedDirectory { inner, ttl, cache: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<D: NodeDirectory> NodeDirectory for CachedDirectory<D> {
    async fn discover(&self, role: NodeRole) -> Result<Vec<NodeRecord>> {
        {
            let cache = self.cache.lock().await;
            if let Some((fetched, records)) = cache.get(&role) {
                if fetched.elapsed() < self.ttl {
                    return Ok(records.clone());
                }
            }
        }
        let records = self.inner.discover(role).await?;
        self.cache.lock().await.insert(role, (Instant::now(), records.clone()));
        Ok(records)
    }

    async fn register(&self, record: NodeRecord) -> Result<()> {
        self.cache.lock().await.clear();
        self.inner.register(record).await
    }

    async fn deregister(&self, node_id: &NodeId) -> Result<()> {
        self.cache.lock().await.clear();
        self.inner.deregister(node_id).await
    }
}

/// Parse an `ip:port` endpoint into a socket address.
pub fn endpoint_addr(record: &NodeRecord) -> Result<SocketAddr> {
    record
        .endpoint
        .parse()
        .map_err(|_| CustodyError::invalid(format!("bad endpoint: {}", record.endpoint)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: NodeStatus, purpose: NodePurpose) -> NodeRecord {
        NodeRecord {
            node_id: id.into(),
            role: NodeRole::Signer,
            endpoint: "127.0.0.1:7000".to_string(),
            status,
            purpose,
        }
    }

    #[test]
    fn signer_selection_prefers_signing_purpose() {
        let records = vec![
            record("backup-1", NodeStatus::Passing, NodePurpose::Backup),
            record("signer-1", NodeStatus::Passing, NodePurpose::Signing),
            record("signer-2", NodeStatus::Critical, NodePurpose::Signing),
            record("signer-3", NodeStatus::Passing, NodePurpose::Signing),
        ];
        let selected = select_signers(&records, 2).unwrap();
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|r| r.purpose == NodePurpose::Signing));

        // Backup nodes fill in when signers run short.
        let selected = select_signers(&records, 3).unwrap();
        assert_eq!(selected[2].purpose, NodePurpose::Backup);

        assert!(select_signers(&records, 4).is_err());
    }

    #[tokio::test]
    async fn cached_directory_serves_within_ttl() {
        let inner = StaticDirectory::new(vec![record(
            "signer-1",
            NodeStatus::Passing,
            NodePurpose::Signing,
        )]);
        let cached = CachedDirectory::new(inner, Duration::from_secs(60));

        let first = cached.discover(NodeRole::Signer).await.unwrap();
        assert_eq!(first.len(), 1);

        // Mutating through the cache invalidates it.
        cached
            .register(record("signer-2", NodeStatus::Passing, NodePurpose::Signing))
            .await
            .unwrap();
        let second = cached.discover(NodeRole::Signer).await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn static_directory_register_deregister() {
        let dir = StaticDirectory::default();
        dir.register(record("n1", NodeStatus::Passing, NodePurpose::Signing)).await.unwrap();
        assert_eq!(dir.discover(NodeRole::Signer).await.unwrap().len(), 1);
        dir.deregister(&"n1".into()).await.unwrap();
        assert!(dir.discover(NodeRole::Signer).await.unwrap().is_empty());
    }
}
