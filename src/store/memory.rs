//! In-process replicated store.
//!
//! A single keyspace shared by every node stands in for instant replication.
//! Nodes can be killed, revived and promoted, and discovery can be cut off,
//! which is what the failure-injection tests and the `--memory-store` daemon
//! mode rely on.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::store::connection::{StoreAddr, StoreConnection, StoreDriver};
use crate::store::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct NodeState {
    up: AtomicBool,
}

#[derive(Debug)]
struct ClusterInner {
    keyspace: DashMap<String, Entry>,
    nodes: DashMap<StoreAddr, Arc<NodeState>>,
    primary: RwLock<StoreAddr>,
    discovery_up: AtomicBool,
    latency_ms: AtomicU64,
    connects: AtomicU64,
}

/// Handle to an in-process cluster. Clones share the same cluster.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    /// Create a cluster with the given primary and replicas, all up.
    pub fn new(primary: StoreAddr, replicas: Vec<StoreAddr>) -> Self {
        let nodes = DashMap::new();
        nodes.insert(primary.clone(), Arc::new(NodeState { up: AtomicBool::new(true) }));
        for replica in replicas {
            nodes.insert(replica, Arc::new(NodeState { up: AtomicBool::new(true) }));
        }

        Self {
            inner: Arc::new(ClusterInner {
                keyspace: DashMap::new(),
                nodes,
                primary: RwLock::new(primary),
                discovery_up: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                connects: AtomicU64::new(0),
            }),
        }
    }

    /// A primary on 127.0.0.1:6379 with two replicas.
    pub fn local() -> Self {
        Self::new(
            StoreAddr::new("127.0.0.1", 6379),
            vec![StoreAddr::new("127.0.0.1", 6380), StoreAddr::new("127.0.0.1", 6381)],
        )
    }

    /// Current primary as discovery would report it.
    pub fn primary(&self) -> StoreAddr {
        self.inner.primary.read().clone()
    }

    /// Simulate a node crash; open connections start failing.
    pub fn kill_node(&self, addr: &StoreAddr) {
        if let Some(node) = self.inner.nodes.get(addr) {
            node.up.store(false, Ordering::SeqCst);
        }
    }

    pub fn revive_node(&self, addr: &StoreAddr) {
        if let Some(node) = self.inner.nodes.get(addr) {
            node.up.store(true, Ordering::SeqCst);
        }
    }

    /// Make `addr` the primary, adding it to the cluster if needed.
    pub fn promote(&self, addr: &StoreAddr) {
        self.inner
            .nodes
            .entry(addr.clone())
            .or_insert_with(|| Arc::new(NodeState { up: AtomicBool::new(true) }))
            .up
            .store(true, Ordering::SeqCst);
        *self.inner.primary.write() = addr.clone();
        tracing::debug!(primary = %addr, "Memory cluster promoted new primary");
    }

    /// Take every node down (full outage); discovery keeps answering.
    pub fn kill_all(&self) {
        for node in self.inner.nodes.iter() {
            node.up.store(false, Ordering::SeqCst);
        }
    }

    pub fn revive_all(&self) {
        for node in self.inner.nodes.iter() {
            node.up.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_discovery_reachable(&self, reachable: bool) {
        self.inner.discovery_up.store(reachable, Ordering::SeqCst);
    }

    /// Delay added to every operation, for timeout tests.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of live keys, ignoring expired ones.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .keyspace
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }
}

#[async_trait]
impl StoreDriver for MemoryCluster {
    async fn resolve_primary(&self, _service: &str) -> StoreResult<StoreAddr> {
        if !self.inner.discovery_up.load(Ordering::SeqCst) {
            return Err(StoreError::Discovery(
                "all discovery endpoints unreachable".to_string(),
            ));
        }
        Ok(self.primary())
    }

    async fn resolve_replicas(&self, _service: &str) -> StoreResult<Vec<StoreAddr>> {
        if !self.inner.discovery_up.load(Ordering::SeqCst) {
            return Err(StoreError::Discovery(
                "all discovery endpoints unreachable".to_string(),
            ));
        }
        let primary = self.primary();
        Ok(self
            .inner
            .nodes
            .iter()
            .filter(|n| *n.key() != primary && n.value().up.load(Ordering::SeqCst))
            .map(|n| n.key().clone())
            .collect())
    }

    async fn connect(&self, addr: &StoreAddr) -> StoreResult<Arc<dyn StoreConnection>> {
        let node = self
            .inner
            .nodes
            .get(addr)
            .map(|n| n.value().clone())
            .ok_or_else(|| StoreError::Connection(format!("{}: no route to host", addr)))?;

        if !node.up.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!("{}: connection refused", addr)));
        }

        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            addr: addr.clone(),
            node,
            cluster: self.inner.clone(),
        }))
    }
}

/// Connection to one node of a [`MemoryCluster`].
#[derive(Debug)]
pub struct MemoryConnection {
    addr: StoreAddr,
    node: Arc<NodeState>,
    cluster: Arc<ClusterInner>,
}

impl MemoryConnection {
    async fn check(&self, write: bool) -> StoreResult<()> {
        let latency = self.cluster.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.node.up.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!(
                "{}: connection reset by peer",
                self.addr
            )));
        }

        if write && *self.cluster.primary.read() != self.addr {
            return Err(StoreError::ReadOnly(self.addr.to_string()));
        }

        Ok(())
    }

    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.cluster.keyspace.get(key).map(|e| e.value().clone())?;
        if entry.is_expired(now) {
            self.cluster.keyspace.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    fn address(&self) -> &StoreAddr {
        &self.addr
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(false).await?;
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check(true).await?;
        self.cluster.keyspace.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.check(true).await?;
        let now = Instant::now();
        let mut entry = self
            .cluster
            .keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: None,
            });

        if entry.is_expired(now) {
            *entry = Entry {
                value: "0".to_string(),
                expires_at: None,
            };
        }

        let current: i64 = entry.value.parse().map_err(|_| {
            StoreError::Protocol(format!("value at '{}' is not an integer", key))
        })?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check(true).await?;
        let now = Instant::now();
        match self.cluster.keyspace.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check(false).await?;
        let now = Instant::now();
        Ok(self
            .live_entry(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.check(true).await?;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.cluster.keyspace.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check(false).await
    }
}
